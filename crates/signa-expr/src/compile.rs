//! Expression compiler.
//!
//! [`Microcode::compile`] turns one or more [`Expr`] trees ("programs")
//! into a shared instruction buffer plus a data table. Allocations are
//! sized up front from the static bounds the trees advertise: data slots
//! and instructions sum across programs, registers take the maximum, and
//! each total is rounded up to its page quantum. Emission therefore cannot
//! outgrow its buffers while the bounds hold.
//!
//! Emission is a straight post-order walk:
//!
//! - constants load into a fresh data slot (`MOV r, d`, flagged `CONST`;
//!   constants never share slots);
//! - uniform references load through the alias table so repeated
//!   references to one uniform share a slot (`MOV r, d`, flagged
//!   `VOLATILE`);
//! - unary minus on a constant folds at compile time (sign flip, NaN
//!   preserved, negative zero normalized), `-(-x)` folds to `x`, and unary
//!   plus emits nothing;
//! - a binary operation compiles its left operand, pushes a subbranch,
//!   compiles the right operand, emits `OP lhs_r, rhs_r`, drops the
//!   right-hand register, and pops the subbranch, which releases every
//!   register the subbranch allocated.
//!
//! The last instruction of each successful program is flagged
//! `HALT|RETURN`; a failed program is truncated to a single
//! `Nop|HALT|CONST` sentinel and the compilation reports the error.

use core::ops::Range;

use crate::error::CompileError;
use crate::expr::Expr;
use crate::micro::{DataSlot, Dst, INSTRUCTION_PAGE, Micro, MicroFlags, OpCode, REGISTER_PAGE, Src};
use crate::uniform::Uniform;

/// Compiled program set: shared code and data plus per-program ranges.
pub struct Microcode {
    code: Vec<Micro>,
    data: Vec<DataSlot>,
    programs: Vec<Range<usize>>,
    register_count: usize,
    variable_count: usize,
    instruction_count: usize,
}

impl Microcode {
    /// Compiles `programs` into one microcode artifact.
    pub fn compile(programs: &[Expr]) -> Result<Self, CompileError> {
        if programs.is_empty() {
            return Err(CompileError::Empty);
        }
        let variable_count = round_up(
            programs.iter().map(Expr::variable_bound).sum(),
            REGISTER_PAGE,
        );
        let register_count = round_up(
            programs.iter().map(Expr::register_bound).max().unwrap_or(0),
            REGISTER_PAGE,
        );
        let instruction_count = round_up(
            programs.iter().map(Expr::instruction_bound).sum(),
            INSTRUCTION_PAGE,
        );

        let mut compiler = Compiler::new(variable_count, register_count, instruction_count);
        let mut ranges = Vec::with_capacity(programs.len());
        for expr in programs {
            let start = compiler.code.len();
            compiler.push_sub();
            let sealed = match compiler.emit(expr) {
                Ok(last) => compiler.finalize(last),
                Err(e) => Err(e),
            };
            compiler.pop_sub();
            match sealed {
                Ok(()) => ranges.push(start..compiler.code.len()),
                Err(error) => {
                    compiler.seal_error(start);
                    tracing::debug!(%error, program = ranges.len(), "expression compilation failed");
                    return Err(error);
                }
            }
        }

        Ok(Self {
            code: compiler.code,
            data: compiler.data,
            programs: ranges,
            register_count,
            variable_count,
            instruction_count,
        })
    }

    /// Number of compiled programs.
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    /// Instructions of program `index`.
    pub fn program(&self, index: usize) -> &[Micro] {
        &self.code[self.programs[index].clone()]
    }

    /// The whole instruction buffer.
    pub fn code(&self) -> &[Micro] {
        &self.code
    }

    /// The data table shared by all programs.
    pub fn data(&self) -> &[DataSlot] {
        &self.data
    }

    /// Register file size required to execute any program of this set.
    pub fn register_count(&self) -> usize {
        self.register_count
    }

    /// Data slot budget this compilation was sized to.
    pub fn variable_count(&self) -> usize {
        self.variable_count
    }

    /// Instruction budget this compilation was sized to.
    pub fn instruction_count(&self) -> usize {
        self.instruction_count
    }
}

#[inline]
fn round_up(value: usize, quantum: usize) -> usize {
    value.div_ceil(quantum) * quantum
}

/// A register in the live set.
#[derive(Clone, Copy, Default)]
struct LiveReg {
    /// Instruction offset where the register was loaded, `None` when free.
    load: Option<usize>,
    /// Subbranch depth that allocated the register.
    owner: usize,
}

/// Saved register range of one subbranch.
struct SubFrame {
    r_lb: usize,
    r_ub: usize,
}

struct Compiler {
    code: Vec<Micro>,
    data: Vec<DataSlot>,
    /// Uniform identity → data slot, so repeated references share.
    aliases: Vec<(usize, u16)>,
    live: Vec<LiveReg>,
    r_lb: usize,
    r_ub: usize,
    /// Scan cursor of the linear allocator; lowered on release.
    r_last: usize,
    subs: Vec<SubFrame>,
    variable_count: usize,
    instruction_count: usize,
}

impl Compiler {
    fn new(variable_count: usize, register_count: usize, instruction_count: usize) -> Self {
        Self {
            code: Vec::with_capacity(instruction_count),
            data: Vec::with_capacity(variable_count),
            aliases: Vec::new(),
            live: vec![LiveReg::default(); register_count],
            r_lb: 0,
            r_ub: register_count,
            r_last: 0,
            subs: Vec::new(),
            variable_count,
            instruction_count,
        }
    }

    fn emit(&mut self, expr: &Expr) -> Result<usize, CompileError> {
        match expr {
            Expr::Value(v) => self.emit_value_load(*v),
            Expr::Var(u) => self.emit_variable_load(u),
            Expr::Pos(inner) => self.emit(inner),
            Expr::Neg(inner) => match &**inner {
                Expr::Value(v) => self.emit_value_load(fold_neg(*v)),
                Expr::Neg(twice) => self.emit(twice),
                other => {
                    let lhs = self.emit(other)?;
                    self.emit_unary(lhs)
                }
            },
            Expr::Add(l, r) => self.compose(OpCode::Add, l, r),
            Expr::Sub(l, r) => self.compose(OpCode::Sub, l, r),
            Expr::Mul(l, r) => self.compose(OpCode::Mul, l, r),
            Expr::Div(l, r) => self.compose(OpCode::Div, l, r),
        }
    }

    fn compose(&mut self, op: OpCode, lhs: &Expr, rhs: &Expr) -> Result<usize, CompileError> {
        let li = self.emit(lhs)?;
        self.push_sub();
        let result = match self.emit(rhs) {
            Ok(ri) => self.emit_binary(op, li, ri),
            Err(e) => Err(e),
        };
        self.pop_sub();
        result
    }

    fn emit_value_load(&mut self, value: f32) -> Result<usize, CompileError> {
        let slot = self.data_value(value)?;
        let register = self.scratch()?;
        self.push_micro(Micro {
            op: OpCode::Mov,
            dst: Dst::Reg(register),
            src: Src::Data(slot),
            flags: MicroFlags::CONST,
        })
    }

    fn emit_variable_load(&mut self, uniform: &Uniform) -> Result<usize, CompileError> {
        let slot = self.data_var(uniform)?;
        let register = self.scratch()?;
        self.push_micro(Micro {
            op: OpCode::Mov,
            dst: Dst::Reg(register),
            src: Src::Data(slot),
            flags: MicroFlags::VOLATILE,
        })
    }

    /// Negation in place of the operand's destination register.
    fn emit_unary(&mut self, lhs: usize) -> Result<usize, CompileError> {
        let Dst::Reg(register) = self.code[lhs].dst else {
            return Err(CompileError::Malformed);
        };
        self.push_micro(Micro {
            op: OpCode::Neg,
            dst: Dst::Reg(register),
            src: Src::None,
            flags: MicroFlags::empty(),
        })
    }

    /// `OP lhs_r, rhs_r`, releasing the right-hand register.
    ///
    /// The result is constant iff both operands are constant and neither is
    /// volatile; it is volatile iff either operand is.
    fn emit_binary(&mut self, op: OpCode, lhs: usize, rhs: usize) -> Result<usize, CompileError> {
        let Dst::Reg(lr) = self.code[lhs].dst else {
            return Err(CompileError::Malformed);
        };
        let Dst::Reg(rr) = self.code[rhs].dst else {
            return Err(CompileError::Malformed);
        };
        let lf = self.code[lhs].flags;
        let rf = self.code[rhs].flags;
        let mut flags = MicroFlags::empty();
        if lf.contains(MicroFlags::VOLATILE) || rf.contains(MicroFlags::VOLATILE) {
            flags |= MicroFlags::VOLATILE;
        } else if lf.contains(MicroFlags::CONST) && rf.contains(MicroFlags::CONST) {
            flags |= MicroFlags::CONST;
        }
        let index = self.push_micro(Micro {
            op,
            dst: Dst::Reg(lr),
            src: Src::Reg(rr),
            flags,
        })?;
        self.drop_scratch(rr as usize);
        Ok(index)
    }

    fn push_micro(&mut self, micro: Micro) -> Result<usize, CompileError> {
        if self.code.len() >= self.instruction_count {
            return Err(CompileError::CodeOverflow(self.instruction_count));
        }
        self.code.push(micro);
        Ok(self.code.len() - 1)
    }

    /// Marks a program's result instruction.
    fn finalize(&mut self, last: usize) -> Result<(), CompileError> {
        let micro = &mut self.code[last];
        if micro.op == OpCode::Nop || !matches!(micro.dst, Dst::Reg(_)) {
            return Err(CompileError::Malformed);
        }
        micro.flags |= MicroFlags::HALT | MicroFlags::RETURN;
        Ok(())
    }

    /// Replaces a failed program with the error sentinel.
    fn seal_error(&mut self, start: usize) {
        self.code.truncate(start);
        self.code.push(Micro::error_sentinel());
    }

    // --- Data slots ---

    fn data_value(&mut self, value: f32) -> Result<u16, CompileError> {
        if self.data.len() >= self.variable_count {
            return Err(CompileError::DataOverflow(self.variable_count));
        }
        self.data.push(DataSlot::Value(value));
        Ok((self.data.len() - 1) as u16)
    }

    fn data_var(&mut self, uniform: &Uniform) -> Result<u16, CompileError> {
        let key = uniform.key();
        if let Some(&(_, slot)) = self.aliases.iter().find(|(k, _)| *k == key) {
            return Ok(slot);
        }
        if self.data.len() >= self.variable_count {
            return Err(CompileError::DataOverflow(self.variable_count));
        }
        self.data.push(DataSlot::Var(uniform.clone()));
        let slot = (self.data.len() - 1) as u16;
        self.aliases.push((key, slot));
        Ok(slot)
    }

    // --- Registers ---

    /// Next free register at or above the scan cursor.
    fn scratch(&mut self) -> Result<u16, CompileError> {
        let mut register = self.r_last;
        while register < self.r_ub {
            if self.live[register].load.is_none() {
                break;
            }
            register += 1;
        }
        if register >= self.r_ub {
            return Err(CompileError::RegisterOverflow(self.r_ub));
        }
        self.live[register] = LiveReg {
            load: Some(self.code.len()),
            owner: self.subs.len(),
        };
        self.r_last = register;
        Ok(register as u16)
    }

    fn drop_scratch(&mut self, register: usize) {
        if let Some(live) = self.live.get_mut(register) {
            live.load = None;
            live.owner = 0;
        }
        if register < self.r_last {
            self.r_last = register;
        }
    }

    // --- Subbranches ---

    fn push_sub(&mut self) {
        self.subs.push(SubFrame {
            r_lb: self.r_lb,
            r_ub: self.r_ub,
        });
    }

    /// Releases every register the current subbranch allocated, then
    /// restores the register range saved at the matching push.
    fn pop_sub(&mut self) {
        let depth = self.subs.len();
        for register in self.r_lb..self.r_ub {
            if self.live[register].load.is_some() && self.live[register].owner == depth {
                self.drop_scratch(register);
            }
        }
        if let Some(frame) = self.subs.pop() {
            self.r_lb = frame.r_lb;
            self.r_ub = frame.r_ub;
        }
    }
}

/// Compile-time negation of a literal: sign flip, NaN preserved, and
/// negative zero normalized to positive zero.
fn fold_neg(value: f32) -> f32 {
    if value == 0.0 { 0.0 } else { -value }
}
