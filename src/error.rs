//! Error types for pattern flattening and machine-code translation.

use thiserror::Error;

/// Fatal pattern-database errors raised while flattening instruction
/// semantics at build time. Recoverable conditions (mismatched `set` arity)
/// are not errors: they are logged and the instruction is skipped.
#[derive(Error, Debug)]
pub enum SemaError {
    #[error("operand '{name}' not found in the operand table of {inst}")]
    UnknownOperand { inst: String, name: String },

    #[error("leaf outside an operator in pattern for {inst}")]
    OrphanLeaf { inst: String },

    #[error("'{op}' node below the top level in pattern for {inst}")]
    MisplacedOperator { inst: String, op: &'static str },

    #[error("'{op}' child {index} in pattern for {inst} is not a register leaf")]
    InvalidImplicitChild {
        inst: String,
        op: &'static str,
        index: usize,
    },

    #[error("'set' destination {index} dropped by SDNode equivalence in {inst} is not a leaf")]
    DroppedNonLeaf { inst: String, index: usize },

    #[error("'set' destination {index} dropped by SDNode equivalence in {inst} is not a register")]
    DroppedNonRegister { inst: String, index: usize },

    #[error("'set' destination '{name}' in {inst} is not a register operand or register")]
    InvalidSetDestination { inst: String, name: String },

    #[error("instruction enum value {inst} out of range for table of {size} instructions")]
    InstOutOfRange { inst: usize, size: usize },

    #[error("malformed semantic stream at cell {offset}: {reason}")]
    MalformedStream { offset: usize, reason: String },
}

/// Fatal translation errors. Each aborts translation of the enclosing
/// function and identifies the offending machine instruction; the module
/// stays usable for other functions.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("no semantics for instruction opcode {opcode} at {addr:#x}")]
    UnsupportedInstruction { opcode: u32, addr: u64 },

    #[error("unhandled target-specific semantic opcode {opcode:#x} at {addr:#x}")]
    UnsupportedOpcode { opcode: u32, addr: u64 },

    #[error("target hook could not decode custom operand type {op_type} at {addr:#x}")]
    CustomOperandFailed { op_type: u32, addr: u64 },

    #[error("target hook could not lower intrinsic {id} at {addr:#x}")]
    UnknownIntrinsic { id: u32, addr: u64 },

    #[error("no register-set slot for physical register {reg}")]
    UnknownRegister { reg: u32 },

    #[error("malformed semantic stream for instruction at {addr:#x}: {reason}")]
    MalformedStream { addr: u64, reason: String },

    #[error("indirect branch at {addr:#x} but no dynamic-translation callback is registered")]
    MissingCallback { addr: u64 },

    #[error("IR verification failed for {func}: {reason}")]
    VerifyFailed { func: String, reason: String },
}

pub type SemaResult<T> = Result<T, SemaError>;
pub type TranslateResult<T> = Result<T, TranslateError>;
