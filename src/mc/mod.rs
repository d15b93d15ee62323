//! The decoded machine-code model consumed by the translator: operands,
//! instructions, basic blocks, and functions as produced by a target
//! decoder. The decoder itself lives outside this crate.

pub mod function;
pub mod inst;

pub use function::{MachineBasicBlock, MachineFunction};
pub use inst::{MachineInst, MachineOperand};
