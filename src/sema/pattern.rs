use std::collections::HashMap;

use bitflags::bitflags;

use crate::ir::types::ValueType;
use crate::sema::opcode::IsdOp;

bitflags! {
    /// Per-instruction flags carried by the pattern database.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InstFlags: u32 {
        /// The instruction exists only for code generation; it never gets
        /// pattern-derived semantics.
        const CODEGEN_ONLY = 1 << 0;
    }
}

/// How a declared machine-instruction operand is classified by the
/// flattener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperandKind {
    /// A register class; reads become `GET_RC`.
    RegisterClass,
    /// A register operand wrapper. Collapses to its underlying register
    /// class during flattening.
    RegisterOperand,
    /// Any other declared operand. Immediate operands become `CONSTANT_OP`;
    /// the rest become `CUSTOM_OP` carrying the target's operand-type enum
    /// value.
    Operand { op_type: u32, immediate: bool },
}

/// One entry of a target instruction's declared operand table.
#[derive(Debug, Clone)]
pub struct OperandInfo {
    pub name: String,
    pub kind: OperandKind,
    /// Index of this operand's first MI operand.
    pub mi_index: u32,
}

impl OperandInfo {
    pub fn new(name: impl Into<String>, kind: OperandKind, mi_index: u32) -> Self {
        Self {
            name: name.into(),
            kind,
            mi_index,
        }
    }
}

/// Operator of an interior pattern node.
#[derive(Debug, Clone, PartialEq)]
pub enum DagOperator {
    /// Assignment; only legal at the top level of a tree.
    Set,
    /// Implicit register def declaration; only legal at the top level.
    Implicit,
    /// A target-independent operator.
    Isd(IsdOp),
    /// A target intrinsic by id. Takes no pattern children; argument-taking
    /// intrinsics go through target-specific operators instead.
    Intrinsic(u32),
    /// A target-specific DAG operator with its semantic opcode value
    /// (within the target opcode space). May be collapsed by an SDNode
    /// equivalence.
    Target { opcode: u32, name: String },
}

/// A node of a decoded pattern tree.
#[derive(Debug, Clone, PartialEq)]
pub enum PatternNode {
    /// A named reference to a machine-instruction operand (`GPR:$a`).
    Operand { name: String, types: Vec<ValueType> },
    /// A leaf naming an explicit physical register (`EFLAGS`).
    RegLeaf { reg: u32, types: Vec<ValueType> },
    /// A leaf carrying an integer literal.
    IntLeaf { value: u64, types: Vec<ValueType> },
    /// An interior node.
    Node {
        op: DagOperator,
        types: Vec<ValueType>,
        children: Vec<PatternNode>,
    },
}

impl PatternNode {
    pub fn operand(name: impl Into<String>, ty: ValueType) -> Self {
        PatternNode::Operand {
            name: name.into(),
            types: vec![ty],
        }
    }

    pub fn reg(reg: u32, ty: ValueType) -> Self {
        PatternNode::RegLeaf {
            reg,
            types: vec![ty],
        }
    }

    pub fn imm(value: u64, ty: ValueType) -> Self {
        PatternNode::IntLeaf {
            value,
            types: vec![ty],
        }
    }

    pub fn isd(op: IsdOp, types: Vec<ValueType>, children: Vec<PatternNode>) -> Self {
        PatternNode::Node {
            op: DagOperator::Isd(op),
            types,
            children,
        }
    }

    pub fn target(
        opcode: u32,
        name: impl Into<String>,
        types: Vec<ValueType>,
        children: Vec<PatternNode>,
    ) -> Self {
        PatternNode::Node {
            op: DagOperator::Target {
                opcode,
                name: name.into(),
            },
            types,
            children,
        }
    }

    pub fn intrinsic(id: u32, types: Vec<ValueType>) -> Self {
        PatternNode::Node {
            op: DagOperator::Intrinsic(id),
            types,
            children: Vec::new(),
        }
    }

    pub fn set(children: Vec<PatternNode>) -> Self {
        PatternNode::Node {
            op: DagOperator::Set,
            types: Vec::new(),
            children,
        }
    }

    pub fn implicit(regs: &[u32]) -> Self {
        PatternNode::Node {
            op: DagOperator::Implicit,
            types: Vec::new(),
            children: regs
                .iter()
                .map(|&r| PatternNode::reg(r, ValueType::Void))
                .collect(),
        }
    }

    /// Inferred result types, or `[Void]` for nodes with none.
    pub fn result_types(&self) -> Vec<ValueType> {
        let types = match self {
            PatternNode::Operand { types, .. } => types,
            PatternNode::RegLeaf { types, .. } => types,
            PatternNode::IntLeaf { types, .. } => types,
            PatternNode::Node { types, .. } => types,
        };
        if types.is_empty() {
            vec![ValueType::Void]
        } else {
            types.clone()
        }
    }

    /// Number of inferred (pre-equivalence) result types.
    pub fn num_types(&self) -> usize {
        match self {
            PatternNode::Operand { types, .. } => types.len(),
            PatternNode::RegLeaf { types, .. } => types.len(),
            PatternNode::IntLeaf { types, .. } => types.len(),
            PatternNode::Node { types, .. } => types.len(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self, PatternNode::Node { .. })
    }
}

/// The pattern record for one target instruction.
#[derive(Debug, Clone)]
pub struct InstPattern {
    /// Target instruction enum value; indexes `OPCODE_TO_SEMA_IDX`.
    pub inst: u32,
    /// Instruction name, used in emitted-table comments and diagnostics.
    pub name: String,
    pub flags: InstFlags,
    pub operands: Vec<OperandInfo>,
    /// Top-level pattern trees, flattened in order.
    pub trees: Vec<PatternNode>,
}

impl InstPattern {
    pub fn new(
        inst: u32,
        name: impl Into<String>,
        operands: Vec<OperandInfo>,
        trees: Vec<PatternNode>,
    ) -> Self {
        Self {
            inst,
            name: name.into(),
            flags: InstFlags::empty(),
            operands,
            trees,
        }
    }

    pub fn with_flags(mut self, flags: InstFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Operand-table lookup by pattern name.
    pub fn named_operand(&self, name: &str) -> Option<&OperandInfo> {
        if name.is_empty() {
            return None;
        }
        self.operands.iter().find(|oi| oi.name == name)
    }
}

/// Equivalence from a target-specific DAG operator to a target-independent
/// one with fewer results. The dropped results must be implicit register
/// definitions.
#[derive(Debug, Clone, Copy)]
pub struct SdNodeEquiv {
    pub isd: IsdOp,
    pub num_results: usize,
}

/// Build-time side table of SDNode equivalences, keyed by target opcode.
#[derive(Debug, Default)]
pub struct SdNodeEquivMap {
    map: HashMap<u32, SdNodeEquiv>,
}

impl SdNodeEquivMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, target_opcode: u32, isd: IsdOp, num_results: usize) {
        self.map.insert(
            target_opcode,
            SdNodeEquiv { isd, num_results },
        );
    }

    pub fn get(&self, target_opcode: u32) -> Option<SdNodeEquiv> {
        self.map.get(&target_opcode).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_operand_lookup() {
        let pat = InstPattern::new(
            1,
            "ADDrr",
            vec![
                OperandInfo::new("dst", OperandKind::RegisterClass, 0),
                OperandInfo::new("a", OperandKind::RegisterClass, 1),
            ],
            vec![],
        );
        assert_eq!(pat.named_operand("a").map(|o| o.mi_index), Some(1));
        assert!(pat.named_operand("").is_none());
        assert!(pat.named_operand("b").is_none());
    }

    #[test]
    fn test_result_types_default_void() {
        let set = PatternNode::set(vec![]);
        assert_eq!(set.result_types(), vec![ValueType::Void]);
        assert_eq!(set.num_types(), 0);
        let op = PatternNode::operand("a", ValueType::I32);
        assert_eq!(op.result_types(), vec![ValueType::I32]);
        assert!(op.is_leaf());
    }

    #[test]
    fn test_equiv_map() {
        let mut m = SdNodeEquivMap::new();
        m.insert(0x1001, IsdOp::Sub, 1);
        let eq = m.get(0x1001).unwrap();
        assert_eq!(eq.isd, IsdOp::Sub);
        assert_eq!(eq.num_results, 1);
        assert!(m.get(0x1002).is_none());
    }
}
