//! Error types for compilation and execution.

use thiserror::Error;

/// Errors produced while compiling expression trees to bytecode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompileError {
    /// No programs were supplied.
    #[error("expression set is empty")]
    Empty,
    /// The linear-scan allocator ran out of scratch registers.
    #[error("register budget exhausted ({0} registers)")]
    RegisterOverflow(usize),
    /// The instruction buffer is full.
    #[error("instruction budget exhausted ({0} instructions)")]
    CodeOverflow(usize),
    /// The data slot table is full.
    #[error("data slot budget exhausted ({0} slots)")]
    DataOverflow(usize),
    /// An emitted operand did not resolve to a register.
    #[error("malformed program: operand is not a register")]
    Malformed,
}

/// Errors produced while executing a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecError {
    /// The program starts with (or reached) the compile-error sentinel.
    #[error("program halted on error sentinel")]
    Halted,
    /// An instruction required a source operand it does not carry.
    #[error("instruction {index} has no source operand")]
    MissingSource {
        /// Offset of the faulting instruction.
        index: usize,
    },
    /// An instruction required a destination register it does not carry.
    #[error("instruction {index} has no destination register")]
    MissingDest {
        /// Offset of the faulting instruction.
        index: usize,
    },
    /// A register index is outside the register file.
    #[error("instruction {index} addresses a register out of range")]
    BadRegister {
        /// Offset of the faulting instruction.
        index: usize,
    },
    /// A data slot index is outside the data table.
    #[error("instruction {index} addresses a data slot out of range")]
    BadData {
        /// Offset of the faulting instruction.
        index: usize,
    },
    /// The program ran to its end without a `RETURN`-flagged instruction.
    #[error("program has no return instruction")]
    MissingReturn,
}
