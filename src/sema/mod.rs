//! The build-time half of the crate: the declarative pattern model, the
//! flattener turning pattern trees into linear semantic streams, and the
//! emitter consolidating every instruction into three parallel tables.

pub mod constant_pool;
pub mod flattener;
pub mod opcode;
pub mod pattern;
pub mod tables;

pub use constant_pool::ConstantPool;
pub use flattener::{flatten_instruction, InstSemantics, SemaNode};
pub use opcode::{
    validate_stream, DcOp, IsdOp, OpSig, OperandClass, SemaOp, DC_OPCODE_BIT,
    TARGET_OPCODE_START,
};
pub use pattern::{
    DagOperator, InstFlags, InstPattern, OperandInfo, OperandKind, PatternNode, SdNodeEquiv,
    SdNodeEquivMap,
};
pub use tables::{SemaTableSet, SemaTables, SemanticsBuilder};
