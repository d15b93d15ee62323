use crate::error::{TranslateError, TranslateResult};
use crate::ir::builder::Builder;
use crate::ir::types::ValueType;
use crate::ir::value::Value;

use std::collections::HashMap;

/// One typed slot of the register-set aggregate.
#[derive(Debug, Clone)]
pub struct RegSlot {
    pub name: String,
    pub ty: ValueType,
}

/// The target's register-set layout: the ordered slots of the aggregate, a
/// physical-register → slot mapping, and the slots used to marshal
/// arguments and results across the platform ABI in external wrappers.
#[derive(Debug, Clone, Default)]
pub struct RegSetLayout {
    slots: Vec<RegSlot>,
    reg_to_slot: HashMap<u32, u32>,
    /// Registers carrying ABI arguments, in argument order.
    pub abi_arg_regs: Vec<u32>,
    /// Register receiving an ABI return value, if any.
    pub abi_ret_reg: Option<u32>,
}

impl RegSetLayout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a slot and map each register in `regs` onto it. Aliasing
    /// registers (sub-registers) may share one slot.
    pub fn add_slot(&mut self, name: impl Into<String>, ty: ValueType, regs: &[u32]) -> u32 {
        let idx = self.slots.len() as u32;
        self.slots.push(RegSlot {
            name: name.into(),
            ty,
        });
        for &r in regs {
            self.reg_to_slot.insert(r, idx);
        }
        idx
    }

    pub fn slot_of(&self, reg: u32) -> Option<u32> {
        self.reg_to_slot.get(&reg).copied()
    }

    pub fn slot(&self, idx: u32) -> &RegSlot {
        &self.slots[idx as usize]
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }
}

/// The register-set abstraction: per-slot cached IR values and dirty bits
/// for the block currently under translation.
///
/// Reads materialize a slot address and load on first use within a block;
/// writes are deferred and coalesced into one store per dirty slot when the
/// block is flushed. State never crosses a block boundary: every block
/// begins with an empty cache, so at any function-exit edge each modified
/// slot has been stored back exactly once.
#[derive(Debug)]
pub struct RegSetSema {
    layout: RegSetLayout,
    values: Vec<Option<Value>>,
    dirty: Vec<bool>,
}

impl RegSetSema {
    pub fn new(layout: RegSetLayout) -> Self {
        let n = layout.num_slots();
        Self {
            layout,
            values: vec![None; n],
            dirty: vec![false; n],
        }
    }

    pub fn layout(&self) -> &RegSetLayout {
        &self.layout
    }

    /// Reset all per-block state. Used when entering a block; pending
    /// writes must have been flushed first.
    pub fn begin_block(&mut self) {
        debug_assert!(self.dirty.iter().all(|d| !d), "begin_block with pending stores");
        self.values.iter_mut().for_each(|v| *v = None);
    }

    /// Drop all state unconditionally, pending writes included. Used when
    /// entering a function, where a previous translation may have been
    /// abandoned mid-block.
    pub fn reset(&mut self) {
        self.dirty.iter_mut().for_each(|d| *d = false);
        self.values.iter_mut().for_each(|v| *v = None);
    }

    /// Current IR value for register `reg`, loading from its slot on first
    /// use in this block.
    pub fn get_reg(
        &mut self,
        builder: &mut Builder<'_>,
        regset_ptr: Value,
        reg: u32,
    ) -> TranslateResult<Value> {
        let slot = self
            .layout
            .slot_of(reg)
            .ok_or(TranslateError::UnknownRegister { reg })?;
        if let Some(v) = self.values[slot as usize] {
            return Ok(v);
        }
        let ty = self.layout.slot(slot).ty;
        let addr = builder.slot_addr(regset_ptr, slot);
        let v = builder.load(ty, addr);
        self.values[slot as usize] = Some(v);
        Ok(v)
    }

    /// Record a register write. The store is deferred until `flush`.
    pub fn set_reg(&mut self, reg: u32, value: Value) -> TranslateResult<()> {
        let slot = self
            .layout
            .slot_of(reg)
            .ok_or(TranslateError::UnknownRegister { reg })?;
        self.values[slot as usize] = Some(value);
        self.dirty[slot as usize] = true;
        Ok(())
    }

    /// Store every dirty slot back into the aggregate and clear the block
    /// cache. Must run exactly once per block that modified registers.
    pub fn flush(&mut self, builder: &mut Builder<'_>, regset_ptr: Value) {
        for slot in 0..self.values.len() {
            if !self.dirty[slot] {
                continue;
            }
            let value = self.values[slot].expect("dirty slot without a value");
            let addr = builder.slot_addr(regset_ptr, slot as u32);
            builder.store(value, addr);
            self.dirty[slot] = false;
        }
        self.values.iter_mut().for_each(|v| *v = None);
    }
}
