use std::fmt;

use crate::ir::terminator::Terminator;
use crate::ir::value::InstRef;

/// An IR basic block: an ordered list of instruction references into the
/// owning function's arena, followed by a terminator.
///
/// Blocks that correspond to machine basic blocks carry the machine start
/// address they were keyed on; synthesized blocks (entry, exit, call blocks)
/// carry none.
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    /// Machine start address, for blocks translated from an MCBB.
    pub addr: Option<u64>,
    /// Instructions, in emission order.
    pub insts: Vec<InstRef>,
    pub term: Terminator,
}

impl Block {
    pub fn new(name: impl Into<String>, addr: Option<u64>) -> Self {
        Self {
            name: name.into(),
            addr,
            insts: Vec::new(),
            term: Terminator::None,
        }
    }

    pub fn push(&mut self, inst: InstRef) {
        self.insts.push(inst);
    }

    pub fn set_term(&mut self, term: Terminator) {
        self.term = term;
    }

    pub fn is_terminated(&self) -> bool {
        !self.term.is_none()
    }

    pub fn inst_count(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

impl fmt::Display for Block {
    // Instruction bodies live in the function arena; a bare block can only
    // show refs. Function's Display prints the full form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.addr {
            Some(a) => writeln!(f, "{} (addr {:#x}):", self.name, a)?,
            None => writeln!(f, "{}:", self.name)?,
        }
        for r in &self.insts {
            writeln!(f, "  {}", r)?;
        }
        writeln!(f, "  {}", self.term)
    }
}
