use std::fmt;

use crate::ir::value::{BlockRef, Value};

/// Block terminator. Every finalized block ends in exactly one of these;
/// `None` marks a block still under construction.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Unset. Only legal while the block is being built.
    None,

    /// Unconditional branch.
    Br(BlockRef),

    /// Two-way conditional branch on an i1 value.
    CondBr {
        cond: Value,
        then_bb: BlockRef,
        else_bb: BlockRef,
    },

    /// Return from the function (translated functions return void; all
    /// results travel through the register set).
    Ret,

    /// Control never reaches the end of this block.
    Unreachable,
}

impl Terminator {
    pub fn is_none(&self) -> bool {
        matches!(self, Terminator::None)
    }

    /// Block successors, in branch order.
    pub fn successors(&self) -> Vec<BlockRef> {
        match self {
            Terminator::Br(bb) => vec![*bb],
            Terminator::CondBr { then_bb, else_bb, .. } => vec![*then_bb, *else_bb],
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::None => write!(f, "<no terminator>"),
            Terminator::Br(bb) => write!(f, "br {}", bb),
            Terminator::CondBr { cond, then_bb, else_bb } => {
                write!(f, "br {}, {}, {}", cond, then_bb, else_bb)
            }
            Terminator::Ret => write!(f, "ret"),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successors() {
        assert_eq!(Terminator::Ret.successors(), vec![]);
        assert_eq!(Terminator::Br(BlockRef(2)).successors(), vec![BlockRef(2)]);
        let cbr = Terminator::CondBr {
            cond: Value::Arg(0),
            then_bb: BlockRef(1),
            else_bb: BlockRef(3),
        };
        assert_eq!(cbr.successors(), vec![BlockRef(1), BlockRef(3)]);
    }

    #[test]
    fn test_is_none() {
        assert!(Terminator::None.is_none());
        assert!(!Terminator::Unreachable.is_none());
    }
}
