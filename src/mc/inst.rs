use std::fmt;

/// One operand of a decoded machine instruction: a physical register number
/// or an immediate, both in the target's own numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineOperand {
    Reg(u32),
    Imm(u64),
}

impl MachineOperand {
    pub fn is_reg(&self) -> bool {
        matches!(self, MachineOperand::Reg(_))
    }

    pub fn is_imm(&self) -> bool {
        matches!(self, MachineOperand::Imm(_))
    }

    /// Get the register number, panics if not a register operand.
    pub fn reg(&self) -> u32 {
        match self {
            MachineOperand::Reg(r) => *r,
            _ => panic!("MachineOperand::reg called on {:?}", self),
        }
    }

    /// Get the immediate value, panics if not an immediate operand.
    pub fn imm(&self) -> u64 {
        match self {
            MachineOperand::Imm(v) => *v,
            _ => panic!("MachineOperand::imm called on {:?}", self),
        }
    }
}

impl fmt::Display for MachineOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineOperand::Reg(r) => write!(f, "r{}", r),
            MachineOperand::Imm(v) => write!(f, "#{:#x}", v),
        }
    }
}

/// A decoded machine instruction: target opcode enum value, address, encoded
/// size in bytes, and its operand list in decoder order.
#[derive(Debug, Clone)]
pub struct MachineInst {
    pub opcode: u32,
    pub address: u64,
    pub size: u32,
    pub operands: Vec<MachineOperand>,
}

impl MachineInst {
    pub fn new(opcode: u32, address: u64, size: u32, operands: Vec<MachineOperand>) -> Self {
        Self {
            opcode,
            address,
            size,
            operands,
        }
    }

    pub fn operand(&self, idx: usize) -> MachineOperand {
        self.operands[idx]
    }

    pub fn num_operands(&self) -> usize {
        self.operands.len()
    }

    /// Address of the next sequential instruction.
    pub fn next_address(&self) -> u64 {
        self.address + self.size as u64
    }
}

impl fmt::Display for MachineInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}: op{}", self.address, self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i == 0 {
                write!(f, " ")?;
            } else {
                write!(f, ", ")?;
            }
            write!(f, "{}", op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operand_accessors() {
        let r = MachineOperand::Reg(5);
        let i = MachineOperand::Imm(0x40);
        assert!(r.is_reg());
        assert_eq!(r.reg(), 5);
        assert!(i.is_imm());
        assert_eq!(i.imm(), 0x40);
    }

    #[test]
    #[should_panic]
    fn test_reg_on_imm_panics() {
        MachineOperand::Imm(1).reg();
    }

    #[test]
    fn test_next_address() {
        let mi = MachineInst::new(7, 0x1000, 4, vec![MachineOperand::Reg(0)]);
        assert_eq!(mi.next_address(), 0x1004);
        assert_eq!(mi.num_operands(), 1);
    }
}
