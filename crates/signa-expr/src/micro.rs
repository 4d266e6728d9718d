//! Micro instructions: the three-address bytecode executed inside leaf
//! nodes.
//!
//! A program is a contiguous run of [`Micro`] records terminated by one
//! bearing the `RETURN` flag. A `Nop` with the `HALT` flag is the error
//! sentinel a failed compilation leaves behind; the VM refuses to run past
//! it.

use crate::uniform::Uniform;

/// Registers and data slots are reserved in pages of this many entries.
pub const REGISTER_PAGE: usize = 16;

/// Instructions are reserved in pages of this many entries.
pub const INSTRUCTION_PAGE: usize = 64;

/// Operation selector of a micro instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Return the destination register.
    Ret = 0x00,
    /// Load an immediate into the destination register.
    Imm = 0x01,
    /// Load a source into the destination register.
    Mov = 0x02,
    /// Unary plus; no effect.
    Pos = 0x03,
    /// Negate the destination register in place.
    Neg = 0x04,
    /// `dst ← dst + src`.
    Add = 0x08,
    /// `dst ← dst - src`.
    Sub = 0x09,
    /// `dst ← dst × src`.
    Mul = 0x0a,
    /// `dst ← dst ÷ src`.
    Div = 0x0b,
    /// No operation; with `HALT` set, the compile-error sentinel.
    Nop = 0xff,
}

/// Destination operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dst {
    /// No destination.
    None,
    /// Scratch register index.
    Reg(u16),
}

/// Source operand.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Src {
    /// No source.
    None,
    /// Scratch register index.
    Reg(u16),
    /// Data slot index (constant or uniform reference).
    Data(u16),
    /// Inline immediate.
    Imm(f32),
}

bitflags::bitflags! {
    /// Flag bits of a micro instruction.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct MicroFlags: u8 {
        /// The value is constant across evaluations.
        const CONST = 0x01;
        /// The value depends on a uniform and may change between
        /// evaluations.
        const VOLATILE = 0x02;
        /// Execution must not continue past this instruction.
        const HALT = 0x04;
        /// This instruction's destination is the program result.
        const RETURN = 0x08;
    }
}

/// One assembled instruction.
#[derive(Clone, Debug)]
pub struct Micro {
    /// Operation selector.
    pub op: OpCode,
    /// Destination operand.
    pub dst: Dst,
    /// Source operand.
    pub src: Src,
    /// Flag bits.
    pub flags: MicroFlags,
}

impl Micro {
    /// True when the instruction carries a usable result (not the error
    /// sentinel).
    pub fn is_valid(&self) -> bool {
        self.op != OpCode::Nop
    }

    /// The error sentinel terminating a failed program.
    pub(crate) fn error_sentinel() -> Self {
        Self {
            op: OpCode::Nop,
            dst: Dst::None,
            src: Src::None,
            flags: MicroFlags::CONST | MicroFlags::HALT,
        }
    }
}

/// One entry of a program's data table.
#[derive(Clone, Debug)]
pub enum DataSlot {
    /// Constant value fixed at compile time.
    Value(f32),
    /// Live reference to a shared control value.
    Var(Uniform),
}

impl DataSlot {
    /// Current value of the slot.
    pub fn load(&self) -> f32 {
        match self {
            Self::Value(v) => *v,
            Self::Var(u) => u.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_shape() {
        let m = Micro::error_sentinel();
        assert!(!m.is_valid());
        assert!(m.flags.contains(MicroFlags::HALT));
        assert!(m.flags.contains(MicroFlags::CONST));
        assert_eq!(m.dst, Dst::None);
    }

    #[test]
    fn test_data_slot_tracks_uniform() {
        let u = Uniform::new(1.0);
        let slot = DataSlot::Var(u.clone());
        assert_eq!(slot.load(), 1.0);
        u.set(-3.0);
        assert_eq!(slot.load(), -3.0);
        assert_eq!(DataSlot::Value(2.0).load(), 2.0);
    }
}
