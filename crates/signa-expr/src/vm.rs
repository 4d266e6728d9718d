//! Bytecode executor.
//!
//! [`execute`] steps a program against a data table and a register file.
//! `MOV`/`IMM` load a source into their destination register, `NEG` negates
//! in place, and the arithmetic opcodes compute `dst ← dst op src`. The
//! value of the instruction bearing the `RETURN` flag is the program
//! result; a `NOP` carrying `HALT` is the compile-error sentinel and aborts
//! evaluation. Operand faults surface as [`ExecError`]s, never panics.

use crate::error::ExecError;
use crate::micro::{DataSlot, Dst, Micro, MicroFlags, OpCode, Src};

/// Executes one program, returning the value of its `RETURN`-flagged
/// instruction.
pub fn execute(code: &[Micro], data: &[DataSlot], regs: &mut [f32]) -> Result<f32, ExecError> {
    for (index, micro) in code.iter().enumerate() {
        if micro.op == OpCode::Nop {
            if micro.flags.contains(MicroFlags::HALT) {
                return Err(ExecError::Halted);
            }
            continue;
        }
        let Dst::Reg(dst) = micro.dst else {
            return Err(ExecError::MissingDest { index });
        };
        let dst = dst as usize;
        if dst >= regs.len() {
            return Err(ExecError::BadRegister { index });
        }
        match micro.op {
            OpCode::Mov | OpCode::Imm => {
                let value = source(micro, data, regs, index)?;
                regs[dst] = value;
            }
            OpCode::Pos => {}
            OpCode::Neg => regs[dst] = -regs[dst],
            OpCode::Add => {
                let value = source(micro, data, regs, index)?;
                regs[dst] += value;
            }
            OpCode::Sub => {
                let value = source(micro, data, regs, index)?;
                regs[dst] -= value;
            }
            OpCode::Mul => {
                let value = source(micro, data, regs, index)?;
                regs[dst] *= value;
            }
            OpCode::Div => {
                let value = source(micro, data, regs, index)?;
                regs[dst] /= value;
            }
            OpCode::Ret => return Ok(regs[dst]),
            OpCode::Nop => {}
        }
        if micro.flags.contains(MicroFlags::RETURN) {
            return Ok(regs[dst]);
        }
    }
    Err(ExecError::MissingReturn)
}

fn source(micro: &Micro, data: &[DataSlot], regs: &[f32], index: usize) -> Result<f32, ExecError> {
    match micro.src {
        Src::Reg(r) => regs
            .get(r as usize)
            .copied()
            .ok_or(ExecError::BadRegister { index }),
        Src::Data(d) => data
            .get(d as usize)
            .map(DataSlot::load)
            .ok_or(ExecError::BadData { index }),
        Src::Imm(v) => Ok(v),
        Src::None => Err(ExecError::MissingSource { index }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Microcode;
    use crate::expr::Expr;
    use crate::uniform::Uniform;

    fn eval(expr: Expr) -> f32 {
        let mc = Microcode::compile(&[expr]).unwrap();
        let mut regs = vec![0.0; mc.register_count()];
        execute(mc.program(0), mc.data(), &mut regs).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval(Expr::value(1.0) + 2.0), 3.0);
        assert_eq!(eval(Expr::value(1.0) - 2.0), -1.0);
        assert_eq!(eval(Expr::value(3.0) * 4.0), 12.0);
        assert_eq!(eval(Expr::value(8.0) / 2.0), 4.0);
        assert_eq!(eval(-(Expr::value(2.0) + 3.0)), -5.0);
    }

    #[test]
    fn test_nested_expression() {
        // (1 + 2) * (10 - 4) / 2 = 9
        let e = (Expr::value(1.0) + 2.0) * (Expr::value(10.0) - 4.0) / 2.0;
        assert_eq!(eval(e), 9.0);
    }

    #[test]
    fn test_division_by_zero_is_ieee() {
        assert!(eval(Expr::value(1.0) / 0.0).is_infinite());
        assert!(eval(Expr::value(0.0) / 0.0).is_nan());
    }

    #[test]
    fn test_uniform_reload_without_recompile() {
        let u = Uniform::new(3.0);
        let mc = Microcode::compile(&[Expr::var(&u) + 2.0]).unwrap();
        let mut regs = vec![0.0; mc.register_count()];
        assert_eq!(execute(mc.program(0), mc.data(), &mut regs).unwrap(), 5.0);
        u.set(-4.0);
        assert_eq!(execute(mc.program(0), mc.data(), &mut regs).unwrap(), -2.0);
    }

    #[test]
    fn test_sentinel_halts() {
        let code = [Micro::error_sentinel()];
        let mut regs = vec![0.0; 1];
        assert_eq!(execute(&code, &[], &mut regs), Err(ExecError::Halted));
    }

    #[test]
    fn test_missing_return_is_detected() {
        let code = [Micro {
            op: OpCode::Mov,
            dst: Dst::Reg(0),
            src: Src::Imm(1.0),
            flags: MicroFlags::empty(),
        }];
        let mut regs = vec![0.0; 1];
        assert_eq!(execute(&code, &[], &mut regs), Err(ExecError::MissingReturn));
    }

    #[test]
    fn test_bad_register_is_detected() {
        let code = [Micro {
            op: OpCode::Mov,
            dst: Dst::Reg(9),
            src: Src::Imm(1.0),
            flags: MicroFlags::RETURN,
        }];
        let mut regs = vec![0.0; 1];
        assert_eq!(
            execute(&code, &[], &mut regs),
            Err(ExecError::BadRegister { index: 0 })
        );
    }

    #[test]
    fn test_imm_and_ret_opcodes() {
        let code = [
            Micro {
                op: OpCode::Imm,
                dst: Dst::Reg(0),
                src: Src::Imm(7.5),
                flags: MicroFlags::empty(),
            },
            Micro {
                op: OpCode::Ret,
                dst: Dst::Reg(0),
                src: Src::None,
                flags: MicroFlags::empty(),
            },
        ];
        let mut regs = vec![0.0; 1];
        assert_eq!(execute(&code, &[], &mut regs).unwrap(), 7.5);
    }

    #[test]
    fn test_multiple_programs_share_register_file() {
        let u = Uniform::new(2.0);
        let mc = Microcode::compile(&[Expr::var(&u) * 10.0, Expr::var(&u) - 1.0]).unwrap();
        let mut regs = vec![0.0; mc.register_count()];
        assert_eq!(execute(mc.program(0), mc.data(), &mut regs).unwrap(), 20.0);
        assert_eq!(execute(mc.program(1), mc.data(), &mut regs).unwrap(), 1.0);
    }
}
