use std::fmt;

use crate::mc::inst::MachineInst;

/// A machine basic block: a straight-line run of decoded instructions.
/// Keyed by its start address throughout translation.
#[derive(Debug, Clone)]
pub struct MachineBasicBlock {
    start: u64,
    insts: Vec<MachineInst>,
}

impl MachineBasicBlock {
    pub fn new(start: u64, insts: Vec<MachineInst>) -> Self {
        Self { start, insts }
    }

    pub fn start_address(&self) -> u64 {
        self.start
    }

    /// Address one past the last instruction — the fall-through target.
    pub fn end_address(&self) -> u64 {
        self.insts
            .last()
            .map(|mi| mi.next_address())
            .unwrap_or(self.start)
    }

    pub fn insts(&self) -> &[MachineInst] {
        &self.insts
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

impl fmt::Display for MachineBasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mcbb {:#x}..{:#x}:", self.start, self.end_address())?;
        for mi in &self.insts {
            writeln!(f, "  {}", mi)?;
        }
        Ok(())
    }
}

/// A decoded machine function: its entry address and basic blocks in layout
/// order.
#[derive(Debug, Clone)]
pub struct MachineFunction {
    pub name: String,
    pub entry: u64,
    pub blocks: Vec<MachineBasicBlock>,
}

impl MachineFunction {
    pub fn new(name: impl Into<String>, entry: u64, blocks: Vec<MachineBasicBlock>) -> Self {
        Self {
            name: name.into(),
            entry,
            blocks,
        }
    }

    pub fn block_at(&self, addr: u64) -> Option<&MachineBasicBlock> {
        self.blocks.iter().find(|b| b.start_address() == addr)
    }
}

impl fmt::Display for MachineFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "mcfn {} (entry {:#x})", self.name, self.entry)?;
        for b in &self.blocks {
            write!(f, "{}", b)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mc::inst::MachineOperand;

    #[test]
    fn test_block_addresses() {
        let insts = vec![
            MachineInst::new(1, 0x1000, 4, vec![MachineOperand::Reg(0)]),
            MachineInst::new(2, 0x1004, 4, vec![]),
        ];
        let bb = MachineBasicBlock::new(0x1000, insts);
        assert_eq!(bb.start_address(), 0x1000);
        assert_eq!(bb.end_address(), 0x1008);
    }

    #[test]
    fn test_function_block_lookup() {
        let f = MachineFunction::new(
            "f",
            0x1000,
            vec![
                MachineBasicBlock::new(0x1000, vec![]),
                MachineBasicBlock::new(0x1010, vec![]),
            ],
        );
        assert!(f.block_at(0x1010).is_some());
        assert!(f.block_at(0x1004).is_none());
    }
}
