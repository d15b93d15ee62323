//! The typed IR produced by translation: modules, functions, address-keyed
//! basic blocks, instructions, and the builder used to emit them.

pub mod block;
pub mod builder;
pub mod function;
pub mod inst;
pub mod module;
pub mod terminator;
pub mod types;
pub mod value;

pub use block::Block;
pub use builder::Builder;
pub use function::Function;
pub use inst::{Inst, IrOp};
pub use module::Module;
pub use terminator::Terminator;
pub use types::ValueType;
pub use value::{BlockRef, FuncRef, InstRef, Value};
