use crate::error::{TranslateError, TranslateResult};
use crate::ir::builder::Builder;
use crate::ir::types::ValueType;
use crate::ir::value::Value;
use crate::mc::inst::MachineInst;
use crate::translate::regset::RegSetSema;

/// Per-node emission context handed to target hooks.
///
/// Exposes the IR builder positioned on the current block, the working
/// value vector, the register set, the decoded instruction, and a cursor
/// over the semantic stream so a hook can consume the type and operand
/// cells of its own target-specific nodes.
pub struct OpEmitter<'c> {
    pub builder: Builder<'c>,
    regset: &'c mut RegSetSema,
    regset_ptr: Value,
    vals: &'c mut Vec<Value>,
    stream: &'c [u32],
    cursor: &'c mut usize,
    mi: &'c MachineInst,
}

impl<'c> OpEmitter<'c> {
    pub(crate) fn new(
        builder: Builder<'c>,
        regset: &'c mut RegSetSema,
        regset_ptr: Value,
        vals: &'c mut Vec<Value>,
        stream: &'c [u32],
        cursor: &'c mut usize,
        mi: &'c MachineInst,
    ) -> Self {
        Self {
            builder,
            regset,
            regset_ptr,
            vals,
            stream,
            cursor,
            mi,
        }
    }

    pub fn mi(&self) -> &MachineInst {
        self.mi
    }

    /// Address of the machine instruction being translated.
    pub fn addr(&self) -> u64 {
        self.mi.address
    }

    /// Register a result value, assigning it the next def-number.
    pub fn push(&mut self, value: Value) {
        self.vals.push(value);
    }

    /// Value previously registered under a def-number.
    pub fn value(&self, def: u32) -> TranslateResult<Value> {
        self.vals
            .get(def as usize)
            .copied()
            .ok_or_else(|| TranslateError::MalformedStream {
                addr: self.mi.address,
                reason: format!("def-number {} not yet produced", def),
            })
    }

    /// Read the next raw cell of the semantic stream.
    pub fn next_cell(&mut self) -> TranslateResult<u32> {
        let cell = self.stream.get(*self.cursor).copied().ok_or_else(|| {
            TranslateError::MalformedStream {
                addr: self.mi.address,
                reason: "semantic stream ended early".to_string(),
            }
        })?;
        *self.cursor += 1;
        Ok(cell)
    }

    /// Read the next cell as a value type.
    pub fn next_type(&mut self) -> TranslateResult<ValueType> {
        let cell = self.next_cell()?;
        ValueType::from_u32(cell).ok_or_else(|| TranslateError::MalformedStream {
            addr: self.mi.address,
            reason: format!("cell {:#x} is not a value type", cell),
        })
    }

    /// Read the next cell as a def-number and resolve it.
    pub fn next_operand(&mut self) -> TranslateResult<Value> {
        let def = self.next_cell()?;
        self.value(def)
    }

    /// Current IR value of a physical register.
    pub fn get_reg(&mut self, reg: u32) -> TranslateResult<Value> {
        self.regset.get_reg(&mut self.builder, self.regset_ptr, reg)
    }

    /// Write a physical register (store deferred to end of block).
    pub fn set_reg(&mut self, reg: u32, value: Value) -> TranslateResult<()> {
        self.regset.set_reg(reg, value)
    }
}

/// The capability record each target supplies: everything the generic
/// interpreter cannot know about an ISA. The translator takes the record
/// at construction and consults it for every delegation.
pub trait TargetHooks {
    /// Emit IR for a target-specific semantic opcode. The hook owns the
    /// node's remaining stream cells: it must consume its type and operand
    /// cells through `ctx` and push one value per result.
    fn translate_target_opcode(&mut self, ctx: &mut OpEmitter<'_>, opcode: u32)
        -> TranslateResult<()>;

    /// Decode a non-trivial machine operand (addressing mode, shifted
    /// immediate). Must push at least one value.
    fn translate_custom_operand(
        &mut self,
        ctx: &mut OpEmitter<'_>,
        op_type: u32,
        mi_index: u32,
    ) -> TranslateResult<()>;

    /// Express a target-specific implicit register def/use.
    fn translate_implicit(&mut self, ctx: &mut OpEmitter<'_>, reg: u32) -> TranslateResult<()>;

    /// Lower a target intrinsic.
    fn translate_target_intrinsic(
        &mut self,
        ctx: &mut OpEmitter<'_>,
        id: u32,
    ) -> TranslateResult<()>;

    /// Whole-instruction override, called before the semantic stream is
    /// consulted. Return `Ok(true)` when the instruction was fully handled.
    fn translate_target_inst(&mut self, _ctx: &mut OpEmitter<'_>) -> TranslateResult<bool> {
        Ok(false)
    }
}

/// A target with no special behavior: every delegation fails. Useful for
/// targets whose patterns are fully expressible in target-independent
/// operators, and in tests.
#[derive(Debug, Default)]
pub struct NoHooks;

impl TargetHooks for NoHooks {
    fn translate_target_opcode(
        &mut self,
        ctx: &mut OpEmitter<'_>,
        opcode: u32,
    ) -> TranslateResult<()> {
        Err(TranslateError::UnsupportedOpcode {
            opcode,
            addr: ctx.addr(),
        })
    }

    fn translate_custom_operand(
        &mut self,
        ctx: &mut OpEmitter<'_>,
        op_type: u32,
        _mi_index: u32,
    ) -> TranslateResult<()> {
        Err(TranslateError::CustomOperandFailed {
            op_type,
            addr: ctx.addr(),
        })
    }

    fn translate_implicit(&mut self, _ctx: &mut OpEmitter<'_>, _reg: u32) -> TranslateResult<()> {
        // Implicit defs with no target meaning are ignored.
        Ok(())
    }

    fn translate_target_intrinsic(
        &mut self,
        ctx: &mut OpEmitter<'_>,
        id: u32,
    ) -> TranslateResult<()> {
        Err(TranslateError::UnknownIntrinsic {
            id,
            addr: ctx.addr(),
        })
    }
}
