use std::fmt;

use crate::ir::types::ValueType;
use crate::ir::value::Value;

/// IR instruction opcodes. Deliberately small: arithmetic and bitwise ops,
/// integer casts, memory access through slot pointers, and calls. Control
/// flow lives on the block terminator, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IrOp {
    /// Address of slot N of a register-set aggregate. args: [regset ptr],
    /// slot index carried as a constant arg.
    SlotAddr,
    /// Typed load through a pointer. args: [ptr].
    Load,
    /// Store through a pointer. args: [value, ptr].
    Store,

    // Integer arithmetic. args: [lhs, rhs].
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,

    // Floating-point arithmetic. args: [lhs, rhs].
    FAdd,
    FSub,
    FMul,
    FDiv,

    // Casts. args: [value]; result type is the instruction type.
    Trunc,
    ZExt,
    SExt,
    Bitcast,
    IntToPtr,

    /// Direct call. args: [callee (Value::Func), call args...].
    Call,
    /// Indirect call through a pointer value. args: [callee ptr, call args...].
    CallInd,
}

impl IrOp {
    pub fn is_binary(self) -> bool {
        use IrOp::*;
        matches!(
            self,
            Add | Sub | Mul | UDiv | SDiv | URem | SRem | And | Or | Xor | Shl | LShr | AShr
                | FAdd | FSub | FMul | FDiv
        )
    }

    pub fn is_cast(self) -> bool {
        use IrOp::*;
        matches!(self, Trunc | ZExt | SExt | Bitcast | IntToPtr)
    }

    pub fn is_call(self) -> bool {
        matches!(self, IrOp::Call | IrOp::CallInd)
    }

    /// Side-effecting instructions survive even when their result is unused.
    pub fn has_side_effects(self) -> bool {
        matches!(self, IrOp::Store | IrOp::Call | IrOp::CallInd)
    }
}

impl fmt::Display for IrOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IrOp::SlotAddr => "slot_addr",
            IrOp::Load => "load",
            IrOp::Store => "store",
            IrOp::Add => "add",
            IrOp::Sub => "sub",
            IrOp::Mul => "mul",
            IrOp::UDiv => "udiv",
            IrOp::SDiv => "sdiv",
            IrOp::URem => "urem",
            IrOp::SRem => "srem",
            IrOp::And => "and",
            IrOp::Or => "or",
            IrOp::Xor => "xor",
            IrOp::Shl => "shl",
            IrOp::LShr => "lshr",
            IrOp::AShr => "ashr",
            IrOp::FAdd => "fadd",
            IrOp::FSub => "fsub",
            IrOp::FMul => "fmul",
            IrOp::FDiv => "fdiv",
            IrOp::Trunc => "trunc",
            IrOp::ZExt => "zext",
            IrOp::SExt => "sext",
            IrOp::Bitcast => "bitcast",
            IrOp::IntToPtr => "inttoptr",
            IrOp::Call => "call",
            IrOp::CallInd => "call_ind",
        };
        write!(f, "{}", s)
    }
}

/// A single IR instruction. `ty` is the result type (`Void` for stores and
/// void calls). Calls take a variable argument count, so arguments are kept
/// in a Vec rather than a fixed array.
#[derive(Debug, Clone)]
pub struct Inst {
    pub op: IrOp,
    pub ty: ValueType,
    pub args: Vec<Value>,
}

impl Inst {
    pub fn new(op: IrOp, ty: ValueType, args: &[Value]) -> Self {
        Self {
            op,
            ty,
            args: args.to_vec(),
        }
    }

    pub fn num_args(&self) -> usize {
        self.args.len()
    }

    pub fn arg(&self, idx: usize) -> Value {
        self.args[idx]
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ty.is_void() {
            write!(f, "{}", self.op)?;
        } else {
            write!(f, "{} {}", self.op, self.ty)?;
        }
        for (i, arg) in self.args.iter().enumerate() {
            if i == 0 {
                write!(f, " ")?;
            } else {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        Ok(())
    }
}
