use std::collections::HashMap;
use std::fmt;

use crate::error::{SemaError, SemaResult};
use crate::ir::types::ValueType;
use crate::sema::constant_pool::ConstantPool;
use crate::sema::opcode::{DcOp, IsdOp, SemaOp};
use crate::sema::pattern::{
    DagOperator, InstPattern, OperandInfo, OperandKind, PatternNode, SdNodeEquivMap,
};

/// One flattened semantic node: an opcode, the types of its results, and
/// its operand cells.
#[derive(Debug, Clone, PartialEq)]
pub struct SemaNode {
    pub opcode: SemaOp,
    pub types: Vec<ValueType>,
    pub operands: Vec<u32>,
}

impl SemaNode {
    fn new(opcode: SemaOp, types: Vec<ValueType>) -> Self {
        Self {
            opcode,
            types,
            operands: Vec::new(),
        }
    }
}

impl fmt::Display for SemaNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.opcode)?;
        for ty in &self.types {
            write!(f, " {}", ty)?;
        }
        for op in &self.operands {
            write!(f, " {}", op)?;
        }
        Ok(())
    }
}

/// The flattened semantics of one instruction, without the trailing
/// `END_OF_INSTRUCTION` (the table emitter appends it).
#[derive(Debug, Clone, Default)]
pub struct InstSemantics {
    pub nodes: Vec<SemaNode>,
}

/// Internal control flow: a recoverable skip unwinds the whole instruction
/// without producing semantics; everything else is fatal.
enum Stop {
    Skip,
    Fatal(SemaError),
}

impl From<SemaError> for Stop {
    fn from(e: SemaError) -> Self {
        Stop::Fatal(e)
    }
}

type FlowResult<T> = Result<T, Stop>;

/// Flatten one instruction's pattern trees into linear semantics.
///
/// Returns `Ok(None)` when the pattern is rejected recoverably (mismatched
/// `set` arity): a diagnostic is logged and the instruction ends up without
/// semantics. Fatal pattern violations return an error.
pub fn flatten_instruction(
    pattern: &InstPattern,
    equiv: &SdNodeEquivMap,
    pool: &mut ConstantPool,
) -> SemaResult<Option<InstSemantics>> {
    let mut fl = Flattener {
        pattern,
        equiv,
        pool,
        sema: InstSemantics::default(),
        cur_def: 0,
        operand_by_name: HashMap::new(),
        eliminated_implicit_regs: Vec::new(),
    };

    for tree in &pattern.trees {
        match fl.flatten(tree, None) {
            Ok(()) => {}
            Err(Stop::Skip) => {
                log::warn!(
                    "skipping semantics for {}: 'set' destination count does not match \
                     the value expression's result count",
                    pattern.name
                );
                return Ok(None);
            }
            Err(Stop::Fatal(e)) => return Err(e),
        }
    }

    // Re-emit the implicit register definitions that SDNode equivalences
    // stripped from the data flow.
    for reg in fl.eliminated_implicit_regs.clone() {
        let mut ns = SemaNode::new(SemaOp::Dc(DcOp::Implicit), vec![ValueType::Void]);
        ns.operands.push(reg);
        fl.sema.nodes.push(ns);
    }

    Ok(Some(fl.sema))
}

struct Flattener<'a> {
    pattern: &'a InstPattern,
    equiv: &'a SdNodeEquivMap,
    pool: &'a mut ConstantPool,
    sema: InstSemantics,
    /// Next def-number; incremented per non-void result emitted.
    cur_def: u32,
    /// Named operands already flattened in this instruction, by the
    /// def-number of their first result.
    operand_by_name: HashMap<String, u32>,
    /// Registers dropped from target SDNodes by equivalence, in first-seen
    /// order.
    eliminated_implicit_regs: Vec<u32>,
}

impl<'a> Flattener<'a> {
    fn inst_name(&self) -> String {
        self.pattern.name.clone()
    }

    /// Record `ns`, assigning def-numbers to its non-void results.
    fn add_sema(&mut self, ns: SemaNode) {
        for ty in &ns.types {
            if !ty.is_void() {
                self.cur_def += 1;
            }
        }
        self.sema.nodes.push(ns);
    }

    /// Record `prev` and append its result def-numbers as operands of
    /// `parent`.
    fn add_res_operand(&mut self, parent: &mut SemaNode, prev: SemaNode) {
        let mut def = self.cur_def;
        for ty in &prev.types {
            if !ty.is_void() {
                parent.operands.push(def);
                def += 1;
            }
        }
        self.add_sema(prev);
    }

    /// Flatten a named reference to a machine-instruction operand:
    /// - register class / register operand: `GET_RC <type> <mi_index>`
    /// - immediate operand: `CONSTANT_OP <type> <mi_index>`
    /// - other operand: `CUSTOM_OP <type> <op_type> <mi_index>`
    ///
    /// A name already flattened in this instruction reuses its recorded
    /// def-number; the node is not emitted twice.
    fn flatten_operand(
        &mut self,
        node: &PatternNode,
        name: &str,
        parent: &mut SemaNode,
        info: &OperandInfo,
    ) -> FlowResult<()> {
        if let Some(&def) = self.operand_by_name.get(name) {
            parent.operands.push(def);
            return Ok(());
        }

        // RegisterOperands are the same thing as RegisterClasses.
        let opcode = match &info.kind {
            OperandKind::RegisterClass | OperandKind::RegisterOperand => SemaOp::Dc(DcOp::GetRc),
            OperandKind::Operand { immediate: true, .. } => SemaOp::Dc(DcOp::ConstantOp),
            OperandKind::Operand { op_type, .. } => {
                let mut ns = SemaNode::new(SemaOp::Dc(DcOp::CustomOp), node.result_types());
                ns.operands.push(*op_type);
                ns.operands.push(info.mi_index);
                self.operand_by_name.insert(name.to_string(), self.cur_def);
                self.add_res_operand(parent, ns);
                return Ok(());
            }
        };

        let mut ns = SemaNode::new(opcode, node.result_types());
        ns.operands.push(info.mi_index);
        self.operand_by_name.insert(name.to_string(), self.cur_def);
        self.add_res_operand(parent, ns);
        Ok(())
    }

    /// Flatten a leaf: explicit register → `GET_REG`, integer literal →
    /// `MOV_CONSTANT` through the constant pool.
    fn flatten_leaf(&mut self, node: &PatternNode, parent: &mut SemaNode) -> FlowResult<()> {
        match node {
            PatternNode::RegLeaf { reg, .. } => {
                let mut ns = SemaNode::new(SemaOp::Dc(DcOp::GetReg), node.result_types());
                ns.operands.push(*reg);
                self.add_res_operand(parent, ns);
                Ok(())
            }
            PatternNode::IntLeaf { value, .. } => {
                let mut ns = SemaNode::new(SemaOp::Dc(DcOp::MovConstant), node.result_types());
                ns.operands.push(self.pool.intern(*value));
                self.add_res_operand(parent, ns);
                Ok(())
            }
            _ => Err(SemaError::OrphanLeaf {
                inst: self.inst_name(),
            }
            .into()),
        }
    }

    /// Flatten an `implicit` declaration: one `IMPLICIT` node per child
    /// register.
    fn flatten_implicit(&mut self, children: &[PatternNode]) -> FlowResult<()> {
        for (index, child) in children.iter().enumerate() {
            let PatternNode::RegLeaf { reg, .. } = child else {
                return Err(SemaError::InvalidImplicitChild {
                    inst: self.inst_name(),
                    op: "implicit",
                    index,
                }
                .into());
            };
            let mut ns = SemaNode::new(SemaOp::Dc(DcOp::Implicit), vec![ValueType::Void]);
            ns.operands.push(*reg);
            self.add_sema(ns);
        }
        Ok(())
    }

    /// Flatten a `set`: the last child is the value expression, the
    /// preceding children are destinations (`PUT_RC` for register operands,
    /// `PUT_REG` for explicit registers). Destinations beyond what the
    /// value expression actually defined must be registers stripped by an
    /// SDNode equivalence; they are recorded for later `IMPLICIT` emission.
    fn flatten_set(&mut self, children: &[PatternNode]) -> FlowResult<()> {
        let Some(last) = children.last() else {
            return Err(Stop::Skip);
        };
        let num_node_defs = children.len() - 1;

        if num_node_defs != last.num_types() {
            return Err(Stop::Skip);
        }

        // Thrown away; only its collected def indices matter.
        let mut dummy = SemaNode::new(SemaOp::Dc(DcOp::EndOfInstruction), Vec::new());
        self.flatten(last, Some(&mut dummy))?;

        // The value expression may define fewer results than the pattern
        // declared when an SDNode equivalence dropped some.
        let num_defs = dummy.operands.len();

        for (i, value_def) in dummy.operands.iter().enumerate() {
            let child = &children[i];
            let mut ns = SemaNode::new(SemaOp::Dc(DcOp::PutRc), vec![ValueType::Void]);
            match child {
                PatternNode::Operand { name, .. } => {
                    let info = self.pattern.named_operand(name).ok_or_else(|| {
                        SemaError::UnknownOperand {
                            inst: self.inst_name(),
                            name: name.clone(),
                        }
                    })?;
                    match info.kind {
                        OperandKind::RegisterClass | OperandKind::RegisterOperand => {
                            ns.operands.push(info.mi_index);
                        }
                        _ => {
                            return Err(SemaError::InvalidSetDestination {
                                inst: self.inst_name(),
                                name: name.clone(),
                            }
                            .into())
                        }
                    }
                }
                PatternNode::RegLeaf { reg, .. } => {
                    ns.opcode = SemaOp::Dc(DcOp::PutReg);
                    ns.operands.push(*reg);
                }
                _ => {
                    return Err(SemaError::InvalidSetDestination {
                        inst: self.inst_name(),
                        name: format!("{:?}", child),
                    }
                    .into())
                }
            }
            ns.operands.push(*value_def);
            self.add_sema(ns);
        }

        // Keep track of the registers removed from the target SDNode.
        for index in num_defs..num_node_defs {
            let child = &children[index];
            if !child.is_leaf() {
                return Err(SemaError::DroppedNonLeaf {
                    inst: self.inst_name(),
                    index,
                }
                .into());
            }
            let PatternNode::RegLeaf { reg, .. } = child else {
                return Err(SemaError::DroppedNonRegister {
                    inst: self.inst_name(),
                    index,
                }
                .into());
            };
            if !self.eliminated_implicit_regs.contains(reg) {
                self.eliminated_implicit_regs.push(*reg);
            }
        }

        Ok(())
    }

    /// Flatten an interior DAG node: resolve its opcode (substituting the
    /// target-independent equivalent and truncating the result types when
    /// an SDNode equivalence applies), then flatten its children as operand
    /// sources.
    fn flatten_dag_node(
        &mut self,
        ns: &mut SemaNode,
        op: &DagOperator,
        children: &[PatternNode],
    ) -> FlowResult<()> {
        match op {
            DagOperator::Isd(isd) => ns.opcode = SemaOp::Isd(*isd),
            DagOperator::Intrinsic(id) => {
                ns.opcode = SemaOp::Isd(IsdOp::Intrinsic);
                ns.operands.push(*id);
            }
            DagOperator::Target { opcode, .. } => match self.equiv.get(*opcode) {
                Some(eq) => {
                    ns.opcode = SemaOp::Isd(eq.isd);
                    ns.types.truncate(eq.num_results);
                }
                None => ns.opcode = SemaOp::Target(*opcode),
            },
            DagOperator::Set | DagOperator::Implicit => unreachable!("handled by flatten()"),
        }
        for child in children {
            self.flatten(child, Some(ns))?;
        }
        Ok(())
    }

    /// Flatten one pattern tree.
    fn flatten(&mut self, node: &PatternNode, parent: Option<&mut SemaNode>) -> FlowResult<()> {
        if let PatternNode::Operand { name, .. } = node {
            let Some(info) = self.pattern.named_operand(name) else {
                return Err(SemaError::UnknownOperand {
                    inst: self.inst_name(),
                    name: name.clone(),
                }
                .into());
            };
            let info = info.clone();
            let Some(parent) = parent else {
                return Err(SemaError::OrphanLeaf {
                    inst: self.inst_name(),
                }
                .into());
            };
            return self.flatten_operand(node, name, parent, &info);
        }

        if node.is_leaf() {
            let Some(parent) = parent else {
                return Err(SemaError::OrphanLeaf {
                    inst: self.inst_name(),
                }
                .into());
            };
            return self.flatten_leaf(node, parent);
        }

        let PatternNode::Node { op, children, .. } = node else {
            unreachable!()
        };

        match op {
            DagOperator::Set => {
                if parent.is_some() {
                    return Err(SemaError::MisplacedOperator {
                        inst: self.inst_name(),
                        op: "set",
                    }
                    .into());
                }
                self.flatten_set(children)
            }
            DagOperator::Implicit => {
                if parent.is_some() {
                    return Err(SemaError::MisplacedOperator {
                        inst: self.inst_name(),
                        op: "implicit",
                    }
                    .into());
                }
                self.flatten_implicit(children)
            }
            _ => {
                let mut ns = SemaNode::new(SemaOp::Dc(DcOp::EndOfInstruction), node.result_types());
                self.flatten_dag_node(&mut ns, op, children)?;
                match parent {
                    Some(parent) => self.add_res_operand(parent, ns),
                    None => self.add_sema(ns),
                }
                Ok(())
            }
        }
    }
}
