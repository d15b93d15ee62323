use std::collections::BTreeMap;

use bitflags::bitflags;

use crate::error::{TranslateError, TranslateResult};
use crate::ir::builder::Builder;
use crate::ir::function::Function;
use crate::ir::inst::IrOp;
use crate::ir::module::Module;
use crate::ir::terminator::Terminator;
use crate::ir::types::ValueType;
use crate::ir::value::{BlockRef, FuncRef, Value};
use crate::mc::function::{MachineBasicBlock, MachineFunction};
use crate::mc::inst::{MachineInst, MachineOperand};
use crate::sema::opcode::{DcOp, IsdOp, SemaOp};
use crate::sema::tables::SemaTables;
use crate::translate::hooks::{OpEmitter, TargetHooks};
use crate::translate::regset::{RegSetLayout, RegSetSema};

bitflags! {
    /// Translator behavior switches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TranslateOpts: u32 {
        /// Record a `TranslatedInst` per machine instruction.
        const RECORD_TRANSLATED = 1 << 0;
        /// Run IR consistency checks in `finalize_function`.
        const VERIFY_IR = 1 << 1;
    }
}

/// Diagnostic record: the IR range one machine instruction produced.
#[derive(Debug, Clone)]
pub struct TranslatedInst {
    pub addr: u64,
    pub opcode: u32,
    /// Block the instruction's translation started in.
    pub block: BlockRef,
    /// First IR instruction index and count within the function arena.
    pub first_inst: u32,
    pub num_insts: u32,
}

/// The semantics interpreter and function/block assembler.
///
/// Owns the three translation cursors (current module, function, basic
/// block) plus the register-set state, and walks semantic streams to emit
/// IR. The target supplies its capability record at construction; the
/// translator consults it for every delegation.
///
/// Single-threaded by design: translate one module per instance. The
/// tables are immutable and freely shared between instances.
pub struct Translator<'a> {
    tables: SemaTables<'a>,
    opts: TranslateOpts,
    regset: RegSetSema,
    hooks: &'a mut dyn TargetHooks,
    dyn_translate_at: Option<u64>,

    // Valid inside a module.
    module: Option<Module>,
    init_fn: Option<FuncRef>,
    fini_fn: Option<FuncRef>,

    // Valid inside a function.
    cur_func: Option<FuncRef>,
    exit_bb: Option<BlockRef>,
    /// Call blocks with a dangling terminator, with their continuation
    /// address; resolved in `finalize_function`.
    call_bbs: Vec<(BlockRef, u64)>,
    /// MCBB start address → end address, for fall-through synthesis.
    mc_ranges: BTreeMap<u64, u64>,
    translated: Vec<TranslatedInst>,

    // Valid inside a basic block.
    cur_bb: Option<BlockRef>,
    cur_mcbb: Option<(u64, u64)>,

    // Per-instruction working state: the value vector indexed by def-number.
    vals: Vec<Value>,
}

impl<'a> Translator<'a> {
    pub fn new(
        tables: SemaTables<'a>,
        layout: RegSetLayout,
        hooks: &'a mut dyn TargetHooks,
        opts: TranslateOpts,
    ) -> Self {
        Self {
            tables,
            opts,
            regset: RegSetSema::new(layout),
            hooks,
            dyn_translate_at: None,
            module: None,
            init_fn: None,
            fini_fn: None,
            cur_func: None,
            exit_bb: None,
            call_bbs: Vec::new(),
            mc_ranges: BTreeMap::new(),
            translated: Vec::new(),
            cur_bb: None,
            cur_mcbb: None,
            vals: Vec::new(),
        }
    }

    /// Register the host callback translating an indirect branch target
    /// address into an executable function pointer over the register set.
    /// `fp` is the host function's address; it must be callable from
    /// generated code.
    pub fn set_dyn_translate_at_callback(&mut self, fp: u64) {
        self.dyn_translate_at = Some(fp);
    }

    pub fn translated_insts(&self) -> &[TranslatedInst] {
        &self.translated
    }

    /// Start address of the machine basic block under translation.
    pub fn basic_block_start_address(&self) -> Option<u64> {
        self.cur_mcbb.map(|(s, _)| s)
    }

    /// End address (fall-through target) of the machine basic block under
    /// translation.
    pub fn basic_block_end_address(&self) -> Option<u64> {
        self.cur_mcbb.map(|(_, e)| e)
    }

    // --- Module assembly ---

    /// Establish a fresh module as the translation target.
    pub fn switch_to_module(&mut self, name: impl Into<String>) {
        self.module = Some(Module::new(name));
        self.init_fn = None;
        self.fini_fn = None;
        self.cur_func = None;
        self.cur_bb = None;
        self.exit_bb = None;
        self.call_bbs.clear();
        self.mc_ranges.clear();
        self.translated.clear();
    }

    /// Finish the module and hand it to the caller.
    pub fn finalize_module(&mut self) -> Module {
        assert!(self.cur_func.is_none(), "finalize_module inside a function");
        self.module.take().expect("no module to finalize")
    }

    fn module_mut(&mut self) -> &mut Module {
        self.module.as_mut().expect("no active module")
    }

    /// The `init_regset` declaration: the host-supplied function that
    /// initializes the register-set aggregate. Called from every translated
    /// function's prelude; the ABI boundary with calling code.
    pub fn get_or_create_init_regset_function(&mut self) -> FuncRef {
        if let Some(fr) = self.init_fn {
            return fr;
        }
        let fr = self.module_mut().add_function(Function::new_decl(
            "init_regset",
            None,
            vec![ValueType::Ptr],
            ValueType::Void,
        ));
        self.init_fn = Some(fr);
        fr
    }

    /// The `fini_regset` declaration, called from every exit block.
    pub fn get_or_create_fini_regset_function(&mut self) -> FuncRef {
        if let Some(fr) = self.fini_fn {
            return fr;
        }
        let fr = self.module_mut().add_function(Function::new_decl(
            "fini_regset",
            None,
            vec![ValueType::Ptr],
            ValueType::Void,
        ));
        self.fini_fn = Some(fr);
        fr
    }

    /// Function at a machine address, creating a forward declaration when
    /// the address has not been seen yet.
    pub fn get_function(&mut self, addr: u64) -> FuncRef {
        let module = self.module.as_mut().expect("no active module");
        if let Some(fr) = module.func_by_addr(addr) {
            return fr;
        }
        module.add_function(Function::new_decl(
            format!("fn_{:x}", addr),
            Some(addr),
            vec![ValueType::Ptr],
            ValueType::Void,
        ))
    }

    /// Synthesize `main`: a single call into `entry` through the
    /// register-set protocol.
    pub fn get_or_create_main_function(&mut self, entry: FuncRef) -> FuncRef {
        let module = self.module.as_mut().expect("no active module");
        if let Some(fr) = module.func_by_name("main") {
            return fr;
        }
        let mut main = Function::new_decl("main", None, vec![ValueType::Ptr], ValueType::Void);
        let bb = main.add_block("entry", None);
        main.entry = Some(bb);
        {
            let mut b = Builder::new(&mut main, bb);
            b.call(ValueType::Void, entry, &[Value::Arg(0)]);
            b.ret();
        }
        module.add_function(main)
    }

    /// Synthesize the thin wrapper for an external symbol living at `addr`:
    /// its body marshals the register set into platform ABI arguments,
    /// invokes the symbol, and marshals the result back.
    pub fn create_external_wrapper_function(&mut self, addr: u64, name: &str) -> FuncRef {
        // ABI marshaling plan, copied out before the module borrow.
        let arg_slots: Vec<(u32, ValueType)> = self
            .regset
            .layout()
            .abi_arg_regs
            .iter()
            .filter_map(|&r| self.regset.layout().slot_of(r))
            .map(|s| (s, self.regset.layout().slot(s).ty))
            .collect();
        let ret_slot: Option<(u32, ValueType)> = self
            .regset
            .layout()
            .abi_ret_reg
            .and_then(|r| self.regset.layout().slot_of(r))
            .map(|s| (s, self.regset.layout().slot(s).ty));

        let module = self.module.as_mut().expect("no active module");

        // Import of the symbol itself, with its ABI signature.
        let arg_tys: Vec<ValueType> = arg_slots.iter().map(|(_, ty)| *ty).collect();
        let ret_ty = ret_slot.map(|(_, ty)| ty).unwrap_or(ValueType::Void);
        let import = match module.func_by_name(name) {
            Some(fr) => fr,
            None => module.add_function(Function::new_decl(name, None, arg_tys, ret_ty)),
        };

        // The wrapper carries the register-set signature and is registered
        // at the external address, so calls resolve to it. An earlier
        // forward declaration at that address is filled in place; a later
        // reference to the same symbol reuses the wrapper by name.
        let wrapper_name = format!("{}_wrapper", name);
        let wrapper = match module.func_by_addr(addr) {
            Some(fr) => fr,
            None => match module.func_by_name(&wrapper_name) {
                Some(fr) => fr,
                None => module.add_function(Function::new_decl(
                    wrapper_name,
                    Some(addr),
                    vec![ValueType::Ptr],
                    ValueType::Void,
                )),
            },
        };

        let func = module.func_mut(wrapper);
        if !func.is_declaration() {
            return wrapper;
        }
        let bb = func.add_block("entry", None);
        func.entry = Some(bb);
        let mut b = Builder::new(func, bb);
        let mut args = Vec::with_capacity(arg_slots.len());
        for (slot, ty) in &arg_slots {
            let p = b.slot_addr(Value::Arg(0), *slot);
            args.push(b.load(*ty, p));
        }
        let res = b.call(ret_ty, import, &args);
        if let Some((slot, _)) = ret_slot {
            let p = b.slot_addr(Value::Arg(0), slot);
            b.store(res, p);
        }
        b.ret();
        wrapper
    }

    /// Synthesize the exit block for a known-external tail jump: a block
    /// keyed at `addr` that calls the external wrapper through the register
    /// set and leaves through the function exit.
    pub fn create_external_tail_call_bb(&mut self, addr: u64) -> BlockRef {
        let wrapper = self.get_function(addr);
        let exit = self.exit_bb.expect("no active function");
        let bb = self.get_or_create_basic_block(addr);
        let module = self.module.as_mut().expect("no active module");
        let func = module.func_mut(self.cur_func.expect("no active function"));
        let mut b = Builder::new(func, bb);
        b.call(ValueType::Void, wrapper, &[Value::Arg(0)]);
        b.br(exit);
        bb
    }

    // --- Function assembly ---

    /// Create the IR function for a machine function: an entry prelude
    /// calling `init_regset`, one empty block per machine basic block keyed
    /// by start address, and an exit block calling `fini_regset` and
    /// returning.
    pub fn switch_to_function(&mut self, mcfn: &MachineFunction) -> FuncRef {
        let init = self.get_or_create_init_regset_function();
        let fini = self.get_or_create_fini_regset_function();

        let fr = self.get_function_named(mcfn.entry, &mcfn.name);
        self.mc_ranges.clear();
        self.translated.clear();

        let module = self.module.as_mut().expect("no active module");
        let func = module.func_mut(fr);
        assert!(
            func.is_declaration(),
            "function at {:#x} translated twice",
            mcfn.entry
        );

        let entry = func.add_block("entry", None);
        func.entry = Some(entry);

        for mcbb in &mcfn.blocks {
            let start = mcbb.start_address();
            if func.block_at(start).is_some() {
                log::warn!(
                    "duplicate basic block at {:#x} in {}; keeping the first",
                    start,
                    func.name
                );
            } else {
                func.add_block(format!("bb_{:x}", start), Some(start));
            }
            self.mc_ranges.entry(start).or_insert(mcbb.end_address());
        }

        let first_bb = func.block_at(mcfn.entry);
        {
            let mut b = Builder::new(func, entry);
            b.call(ValueType::Void, init, &[Value::Arg(0)]);
            match first_bb {
                Some(bb) => b.br(bb),
                None => b.unreachable(),
            }
        }

        let exit = func.add_block("exit", None);
        {
            let mut b = Builder::new(func, exit);
            b.call(ValueType::Void, fini, &[Value::Arg(0)]);
            b.ret();
        }

        self.cur_func = Some(fr);
        self.exit_bb = Some(exit);
        self.call_bbs.clear();
        self.cur_bb = None;
        self.cur_mcbb = None;
        self.regset.reset();
        log::debug!("translating {} at {:#x}", mcfn.name, mcfn.entry);
        fr
    }

    fn get_function_named(&mut self, addr: u64, name: &str) -> FuncRef {
        let module = self.module.as_mut().expect("no active module");
        if let Some(fr) = module.func_by_addr(addr) {
            return fr;
        }
        let name = if name.is_empty() || module.func_by_name(name).is_some() {
            format!("fn_{:x}", addr)
        } else {
            name.to_string()
        };
        module.add_function(Function::new_decl(
            name,
            Some(addr),
            vec![ValueType::Ptr],
            ValueType::Void,
        ))
    }

    /// Insert the exit block protocol, resolve dangling call blocks, and
    /// return the completed function.
    pub fn finalize_function(&mut self) -> TranslateResult<FuncRef> {
        if self.cur_bb.is_some() {
            self.finalize_basic_block();
        }
        let fr = self.cur_func.take().expect("no active function");
        let exit = self.exit_bb.take().expect("no exit block");
        let module = self.module.as_mut().expect("no active module");
        let func = module.func_mut(fr);

        for (call_bb, cont_addr) in self.call_bbs.drain(..) {
            if func.block(call_bb).is_terminated() {
                continue;
            }
            match func.block_at(cont_addr) {
                Some(t) => func.set_term(call_bb, Terminator::Br(t)),
                None => func.set_term(call_bb, Terminator::Br(exit)),
            }
        }

        for bb in func.unterminated_blocks() {
            log::debug!("block {} of {} never populated", func.block(bb).name, func.name);
            func.set_term(bb, Terminator::Unreachable);
        }

        if self.opts.contains(TranslateOpts::VERIFY_IR) {
            verify_function(func)?;
        }

        self.mc_ranges.clear();
        Ok(fr)
    }

    // --- Basic-block assembly ---

    /// Block keyed at a machine address, created on demand.
    pub fn get_or_create_basic_block(&mut self, addr: u64) -> BlockRef {
        let module = self.module.as_mut().expect("no active module");
        let func = module.func_mut(self.cur_func.expect("no active function"));
        match func.block_at(addr) {
            Some(bb) => bb,
            None => func.add_block(format!("bb_{:x}", addr), Some(addr)),
        }
    }

    /// Select a machine basic block for instruction translation.
    pub fn switch_to_basic_block(&mut self, mcbb: &MachineBasicBlock) {
        let start = mcbb.start_address();
        self.mc_ranges.entry(start).or_insert(mcbb.end_address());
        self.switch_to_basic_block_at(start);
    }

    /// Select the block at `addr` for instruction translation.
    pub fn switch_to_basic_block_at(&mut self, addr: u64) {
        let bb = self.get_or_create_basic_block(addr);
        self.cur_bb = Some(bb);
        self.cur_mcbb = Some((addr, self.mc_ranges.get(&addr).copied().unwrap_or(addr)));
        self.regset.begin_block();
    }

    /// Store back modified registers and ensure the block has a
    /// terminator; without one, a fall-through branch to the successor
    /// address is synthesized.
    pub fn finalize_basic_block(&mut self) {
        let Some(bb) = self.cur_bb.take() else { return };
        let end = self.cur_mcbb.take().map(|(_, e)| e);

        let module = self.module.as_mut().expect("no active module");
        let func = module.func_mut(self.cur_func.expect("no active function"));
        {
            let mut b = Builder::new(func, bb);
            self.regset.flush(&mut b, Value::Arg(0));
        }
        if func.block(bb).is_terminated() {
            return;
        }
        match end.and_then(|a| func.block_at(a)) {
            Some(t) => func.set_term(bb, Terminator::Br(t)),
            None => {
                log::warn!(
                    "no fall-through target after block {} in {}",
                    func.block(bb).name,
                    func.name
                );
                func.set_term(bb, Terminator::Unreachable);
            }
        }
    }

    // --- Instruction translation ---

    /// Translate one whole machine function: ordered traversal over its
    /// basic blocks and instructions.
    pub fn translate_function(&mut self, mcfn: &MachineFunction) -> TranslateResult<FuncRef> {
        self.switch_to_function(mcfn);
        for mcbb in &mcfn.blocks {
            self.switch_to_basic_block(mcbb);
            for mi in mcbb.insts() {
                self.translate_inst(mi)?;
            }
            self.finalize_basic_block();
        }
        self.finalize_function()
    }

    /// Translate one decoded instruction by walking its semantic stream.
    pub fn translate_inst(&mut self, mi: &MachineInst) -> TranslateResult<()> {
        let addr = mi.address;
        let stream = self.tables.semantics;
        self.vals.clear();

        let start_block = self.cur_bb.expect("no active basic block");
        let first_inst = self.cur_func_ref().inst_count() as u32;

        // Whole-instruction override first.
        let handled = {
            let mut cursor = 0usize;
            let mut ctx = hook_context(
                &mut self.module,
                self.cur_func,
                self.cur_bb,
                &mut self.regset,
                &mut self.vals,
                &[],
                &mut cursor,
                mi,
            );
            self.hooks.translate_target_inst(&mut ctx)?
        };

        if !handled {
            let off = self.tables.sema_offset(mi.opcode);
            if off == 0 {
                return Err(TranslateError::UnsupportedInstruction {
                    opcode: mi.opcode,
                    addr,
                });
            }
            let mut cursor = off as usize;
            loop {
                let cell = next_cell(stream, &mut cursor, addr)?;
                let Some(op) = SemaOp::decode(cell) else {
                    return Err(TranslateError::MalformedStream {
                        addr,
                        reason: format!("cell {:#x} is not a semantic opcode", cell),
                    });
                };
                log::trace!("{:#x}: {}", addr, op);
                match op {
                    SemaOp::Dc(DcOp::EndOfInstruction) => break,
                    SemaOp::Dc(dc) => self.step_dc(dc, stream, &mut cursor, mi)?,
                    SemaOp::Isd(isd) => self.step_isd(isd, stream, &mut cursor, mi)?,
                    SemaOp::Target(t) => {
                        let mut ctx = hook_context(
                            &mut self.module,
                            self.cur_func,
                            self.cur_bb,
                            &mut self.regset,
                            &mut self.vals,
                            stream,
                            &mut cursor,
                            mi,
                        );
                        self.hooks.translate_target_opcode(&mut ctx, t)?;
                    }
                }
            }
        }

        if self.opts.contains(TranslateOpts::RECORD_TRANSLATED) {
            let num_insts = self.cur_func_ref().inst_count() as u32 - first_inst;
            self.translated.push(TranslatedInst {
                addr,
                opcode: mi.opcode,
                block: start_block,
                first_inst,
                num_insts,
            });
        }
        Ok(())
    }

    fn cur_func_ref(&self) -> &Function {
        self.module
            .as_ref()
            .expect("no active module")
            .func(self.cur_func.expect("no active function"))
    }

    fn value_at(&self, def: u32, addr: u64) -> TranslateResult<Value> {
        self.vals
            .get(def as usize)
            .copied()
            .ok_or_else(|| TranslateError::MalformedStream {
                addr,
                reason: format!("def-number {} not yet produced", def),
            })
    }

    /// Dispatch one meta-opcode node.
    fn step_dc(
        &mut self,
        dc: DcOp,
        stream: &[u32],
        cursor: &mut usize,
        mi: &MachineInst,
    ) -> TranslateResult<()> {
        let addr = mi.address;
        let ty = next_type(stream, cursor, addr)?;
        match dc {
            DcOp::GetRc => {
                let mi_idx = next_cell(stream, cursor, addr)?;
                let reg = reg_operand(mi, mi_idx, addr)?;
                let v = {
                    let module = self.module.as_mut().expect("no active module");
                    let func = module.func_mut(self.cur_func.expect("no active function"));
                    let mut b = Builder::new(func, self.cur_bb.expect("no active basic block"));
                    self.regset.get_reg(&mut b, Value::Arg(0), reg)?
                };
                self.vals.push(v);
            }
            DcOp::PutRc => {
                let mi_idx = next_cell(stream, cursor, addr)?;
                let def = next_cell(stream, cursor, addr)?;
                let reg = reg_operand(mi, mi_idx, addr)?;
                let v = self.value_at(def, addr)?;
                self.regset.set_reg(reg, v)?;
            }
            DcOp::GetReg => {
                let reg = next_cell(stream, cursor, addr)?;
                let v = {
                    let module = self.module.as_mut().expect("no active module");
                    let func = module.func_mut(self.cur_func.expect("no active function"));
                    let mut b = Builder::new(func, self.cur_bb.expect("no active basic block"));
                    self.regset.get_reg(&mut b, Value::Arg(0), reg)?
                };
                self.vals.push(v);
            }
            DcOp::PutReg => {
                let reg = next_cell(stream, cursor, addr)?;
                let def = next_cell(stream, cursor, addr)?;
                let v = self.value_at(def, addr)?;
                self.regset.set_reg(reg, v)?;
            }
            DcOp::CustomOp => {
                let op_type = next_cell(stream, cursor, addr)?;
                let mi_idx = next_cell(stream, cursor, addr)?;
                let before = self.vals.len();
                {
                    let mut ctx = hook_context(
                        &mut self.module,
                        self.cur_func,
                        self.cur_bb,
                        &mut self.regset,
                        &mut self.vals,
                        stream,
                        cursor,
                        mi,
                    );
                    self.hooks.translate_custom_operand(&mut ctx, op_type, mi_idx)?;
                }
                if self.vals.len() == before {
                    return Err(TranslateError::CustomOperandFailed { op_type, addr });
                }
            }
            DcOp::ConstantOp => {
                let mi_idx = next_cell(stream, cursor, addr)?;
                let imm = imm_operand(mi, mi_idx, addr)?;
                self.vals.push(Value::const_of(ty, imm));
            }
            DcOp::MovConstant => {
                let pool_idx = next_cell(stream, cursor, addr)?;
                let value = self.tables.constant(pool_idx).ok_or_else(|| {
                    TranslateError::MalformedStream {
                        addr,
                        reason: format!("constant-pool index {} out of range", pool_idx),
                    }
                })?;
                self.vals.push(Value::const_of(ty, value));
            }
            DcOp::Implicit => {
                let reg = next_cell(stream, cursor, addr)?;
                let mut ctx = hook_context(
                    &mut self.module,
                    self.cur_func,
                    self.cur_bb,
                    &mut self.regset,
                    &mut self.vals,
                    stream,
                    cursor,
                    mi,
                );
                self.hooks.translate_implicit(&mut ctx, reg)?;
            }
            DcOp::EndOfInstruction => unreachable!("handled by the walk loop"),
        }
        Ok(())
    }

    /// Dispatch one target-independent operator node.
    fn step_isd(
        &mut self,
        isd: IsdOp,
        stream: &[u32],
        cursor: &mut usize,
        mi: &MachineInst,
    ) -> TranslateResult<()> {
        let addr = mi.address;
        let ty = next_type(stream, cursor, addr)?;

        if isd.is_binary() {
            let a = self.value_at(next_cell(stream, cursor, addr)?, addr)?;
            let b = self.value_at(next_cell(stream, cursor, addr)?, addr)?;
            let op = isd_binop(isd);
            let v = self.with_builder(|bld| bld.binop(op, ty, a, b));
            self.vals.push(v);
            return Ok(());
        }
        if isd.is_cast() {
            let a = self.value_at(next_cell(stream, cursor, addr)?, addr)?;
            let op = isd_cast(isd);
            let v = self.with_builder(|bld| bld.cast(op, ty, a));
            self.vals.push(v);
            return Ok(());
        }

        match isd {
            IsdOp::Load => {
                let a = self.value_at(next_cell(stream, cursor, addr)?, addr)?;
                let v = self.with_builder(|bld| {
                    let p = bld.cast(IrOp::IntToPtr, ValueType::Ptr, a);
                    bld.load(ty, p)
                });
                self.vals.push(v);
            }
            IsdOp::Store => {
                let v = self.value_at(next_cell(stream, cursor, addr)?, addr)?;
                let a = self.value_at(next_cell(stream, cursor, addr)?, addr)?;
                self.with_builder(|bld| {
                    let p = bld.cast(IrOp::IntToPtr, ValueType::Ptr, a);
                    bld.store(v, p);
                });
            }
            IsdOp::Br => {
                let t = self.value_at(next_cell(stream, cursor, addr)?, addr)?;
                match t.const_bits() {
                    Some(target) => {
                        let bb = self.get_or_create_basic_block(target);
                        self.with_builder(|bld| bld.br(bb));
                    }
                    None => self.insert_tail_translate_at(t, addr)?,
                }
            }
            IsdOp::BrCond => {
                let cond = self.value_at(next_cell(stream, cursor, addr)?, addr)?;
                let t = self.value_at(next_cell(stream, cursor, addr)?, addr)?;
                let target = t.const_bits().ok_or_else(|| TranslateError::MalformedStream {
                    addr,
                    reason: "conditional branch with non-constant target".to_string(),
                })?;
                let then_bb = self.get_or_create_basic_block(target);
                let else_bb = self.get_or_create_basic_block(mi.next_address());
                self.with_builder(|bld| bld.cond_br(cond, then_bb, else_bb));
            }
            IsdOp::Call => {
                let t = self.value_at(next_cell(stream, cursor, addr)?, addr)?;
                match t.const_bits() {
                    Some(target) => self.insert_call_direct(target, mi)?,
                    None => self.insert_call_indirect(t, mi)?,
                }
            }
            IsdOp::Intrinsic => {
                let id = next_cell(stream, cursor, addr)?;
                let mut ctx = hook_context(
                    &mut self.module,
                    self.cur_func,
                    self.cur_bb,
                    &mut self.regset,
                    &mut self.vals,
                    stream,
                    cursor,
                    mi,
                );
                self.hooks.translate_target_intrinsic(&mut ctx, id)?;
            }
            IsdOp::Ret => {
                let exit = self.exit_bb.expect("no exit block");
                self.with_builder(|bld| bld.br(exit));
            }
            IsdOp::Trap => {
                self.with_builder(|bld| bld.unreachable());
            }
            _ => unreachable!("binary and cast opcodes handled above"),
        }
        Ok(())
    }

    fn with_builder<R>(&mut self, f: impl FnOnce(&mut Builder<'_>) -> R) -> R {
        let module = self.module.as_mut().expect("no active module");
        let func = module.func_mut(self.cur_func.expect("no active function"));
        let mut b = Builder::new(func, self.cur_bb.expect("no active basic block"));
        f(&mut b)
    }

    /// Split a direct call into its own basic block so the return edge is
    /// well-defined: flush and branch into the call block, emit the call,
    /// and continue translation in the block at the return address. The
    /// call block's terminator stays dangling until `finalize_function`.
    fn insert_call_direct(&mut self, target: u64, mi: &MachineInst) -> TranslateResult<()> {
        let callee = self.get_function(target);
        self.split_for_call(mi, |bld| {
            bld.call(ValueType::Void, callee, &[Value::Arg(0)]);
        })
    }

    /// An indirect call goes through the registered host callback: the
    /// callback maps the target address value to a function pointer over
    /// the register set, and the call proceeds through that pointer.
    fn insert_call_indirect(&mut self, target: Value, mi: &MachineInst) -> TranslateResult<()> {
        let pc_fn = self.insert_translate_at(target, mi.address)?;
        self.split_for_call(mi, |bld| {
            bld.call_ind(ValueType::Void, pc_fn, &[Value::Arg(0)]);
        })
    }

    fn split_for_call(
        &mut self,
        mi: &MachineInst,
        emit_call: impl FnOnce(&mut Builder<'_>),
    ) -> TranslateResult<()> {
        let cont_addr = mi.next_address();
        let module = self.module.as_mut().expect("no active module");
        let func = module.func_mut(self.cur_func.expect("no active function"));
        let cur = self.cur_bb.expect("no active basic block");

        let call_bb = func.add_block(format!("call_{:x}", mi.address), None);
        {
            let mut b = Builder::new(func, cur);
            self.regset.flush(&mut b, Value::Arg(0));
            b.br(call_bb);
        }
        {
            let mut b = Builder::new(func, call_bb);
            emit_call(&mut b);
        }
        self.call_bbs.push((call_bb, cont_addr));

        let cont = self.get_or_create_basic_block(cont_addr);
        self.cur_bb = Some(cont);
        self.regset.begin_block();
        Ok(())
    }

    /// Produce the function pointer for a dynamic target address via the
    /// registered host callback.
    fn insert_translate_at(&mut self, target: Value, addr: u64) -> TranslateResult<Value> {
        let cb = self
            .dyn_translate_at
            .ok_or(TranslateError::MissingCallback { addr })?;
        Ok(self.with_builder(|bld| {
            let cb_addr = bld.iconst(ValueType::I64, cb);
            let cb_ptr = bld.cast(IrOp::IntToPtr, ValueType::Ptr, cb_addr);
            bld.call_ind(ValueType::Ptr, cb_ptr, &[target])
        }))
    }

    /// Indirect tail jump: translate the target, call through the pointer,
    /// and leave through the exit block.
    fn insert_tail_translate_at(&mut self, target: Value, addr: u64) -> TranslateResult<()> {
        let pc_fn = self.insert_translate_at(target, addr)?;
        let exit = self.exit_bb.expect("no exit block");
        let module = self.module.as_mut().expect("no active module");
        let func = module.func_mut(self.cur_func.expect("no active function"));
        let cur = self.cur_bb.expect("no active basic block");
        let mut b = Builder::new(func, cur);
        self.regset.flush(&mut b, Value::Arg(0));
        b.call_ind(ValueType::Void, pc_fn, &[Value::Arg(0)]);
        b.br(exit);
        Ok(())
    }
}

/// Assemble the emission context handed to target hooks. A free function
/// over the translator's split fields, so the hook record itself stays
/// borrowable alongside it.
#[allow(clippy::too_many_arguments)]
fn hook_context<'c>(
    module: &'c mut Option<Module>,
    cur_func: Option<FuncRef>,
    cur_bb: Option<BlockRef>,
    regset: &'c mut RegSetSema,
    vals: &'c mut Vec<Value>,
    stream: &'c [u32],
    cursor: &'c mut usize,
    mi: &'c MachineInst,
) -> OpEmitter<'c> {
    let module = module.as_mut().expect("no active module");
    let func = module.func_mut(cur_func.expect("no active function"));
    OpEmitter::new(
        Builder::new(func, cur_bb.expect("no active basic block")),
        regset,
        Value::Arg(0),
        vals,
        stream,
        cursor,
        mi,
    )
}

// --- Stream cursor helpers ---

fn next_cell(stream: &[u32], cursor: &mut usize, addr: u64) -> TranslateResult<u32> {
    let cell = stream
        .get(*cursor)
        .copied()
        .ok_or_else(|| TranslateError::MalformedStream {
            addr,
            reason: "semantic stream ended early".to_string(),
        })?;
    *cursor += 1;
    Ok(cell)
}

fn next_type(stream: &[u32], cursor: &mut usize, addr: u64) -> TranslateResult<ValueType> {
    let cell = next_cell(stream, cursor, addr)?;
    ValueType::from_u32(cell).ok_or_else(|| TranslateError::MalformedStream {
        addr,
        reason: format!("cell {:#x} is not a value type", cell),
    })
}

fn reg_operand(mi: &MachineInst, idx: u32, addr: u64) -> TranslateResult<u32> {
    match mi.operands.get(idx as usize) {
        Some(MachineOperand::Reg(r)) => Ok(*r),
        _ => Err(TranslateError::MalformedStream {
            addr,
            reason: format!("MI operand {} is not a register", idx),
        }),
    }
}

fn imm_operand(mi: &MachineInst, idx: u32, addr: u64) -> TranslateResult<u64> {
    match mi.operands.get(idx as usize) {
        Some(MachineOperand::Imm(v)) => Ok(*v),
        _ => Err(TranslateError::MalformedStream {
            addr,
            reason: format!("MI operand {} is not an immediate", idx),
        }),
    }
}

fn isd_binop(isd: IsdOp) -> IrOp {
    match isd {
        IsdOp::Add => IrOp::Add,
        IsdOp::Sub => IrOp::Sub,
        IsdOp::Mul => IrOp::Mul,
        IsdOp::UDiv => IrOp::UDiv,
        IsdOp::SDiv => IrOp::SDiv,
        IsdOp::URem => IrOp::URem,
        IsdOp::SRem => IrOp::SRem,
        IsdOp::And => IrOp::And,
        IsdOp::Or => IrOp::Or,
        IsdOp::Xor => IrOp::Xor,
        IsdOp::Shl => IrOp::Shl,
        IsdOp::Srl => IrOp::LShr,
        IsdOp::Sra => IrOp::AShr,
        IsdOp::FAdd => IrOp::FAdd,
        IsdOp::FSub => IrOp::FSub,
        IsdOp::FMul => IrOp::FMul,
        IsdOp::FDiv => IrOp::FDiv,
        _ => unreachable!("not a binary ISD opcode"),
    }
}

fn isd_cast(isd: IsdOp) -> IrOp {
    match isd {
        IsdOp::Trunc => IrOp::Trunc,
        IsdOp::ZExt => IrOp::ZExt,
        IsdOp::SExt => IrOp::SExt,
        IsdOp::Bitcast => IrOp::Bitcast,
        _ => unreachable!("not a cast ISD opcode"),
    }
}

/// Consistency checks over a finished function: every block terminated,
/// every instruction reference within the arena, every branch target a
/// real block.
fn verify_function(func: &Function) -> TranslateResult<()> {
    let fail = |reason: String| {
        Err(TranslateError::VerifyFailed {
            func: func.name.clone(),
            reason,
        })
    };
    for (_, block) in func.blocks() {
        if !block.is_terminated() {
            return fail(format!("block {} has no terminator", block.name));
        }
        for target in block.term.successors() {
            if target.index() >= func.block_count() {
                return fail(format!("block {} branches to a missing block", block.name));
            }
        }
        for r in &block.insts {
            if r.index() >= func.inst_count() {
                return fail(format!("block {} lists a missing instruction", block.name));
            }
            for arg in &func.inst(*r).args {
                if let Value::Inst(a) = arg {
                    if a.index() >= func.inst_count() {
                        return fail(format!(
                            "instruction {} in block {} uses a missing value",
                            r, block.name
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::value::InstRef;
    use crate::sema::opcode::IsdOp;
    use crate::sema::pattern::{
        InstPattern, OperandInfo, OperandKind, PatternNode, SdNodeEquivMap,
    };
    use crate::sema::tables::{SemaTableSet, SemanticsBuilder};
    use crate::translate::hooks::NoHooks;

    // Toy target: four I32 registers, one flags register, and a handful of
    // instructions covering every DCINS and control-flow path.
    const R0: u32 = 0;
    const R1: u32 = 1;
    const R2: u32 = 2;
    const FLAGS: u32 = 10;

    const I_ADDRR: u32 = 1;
    const I_ADDRI: u32 = 2;
    const I_SUBRR: u32 = 3;
    const I_RET: u32 = 4;
    const I_CALL: u32 = 5;
    const I_CONST2: u32 = 6;
    const I_BRIND: u32 = 7;
    const I_FENCE: u32 = 8;
    const NUM_INSTS: usize = 9;

    const TGT_SUBF: u32 = 0x1010;

    fn gpr(name: &str, mi_index: u32) -> OperandInfo {
        OperandInfo::new(name, OperandKind::RegisterClass, mi_index)
    }

    fn toy_layout() -> RegSetLayout {
        let mut l = RegSetLayout::new();
        l.add_slot("r0", ValueType::I32, &[R0]);
        l.add_slot("r1", ValueType::I32, &[R1]);
        l.add_slot("r2", ValueType::I32, &[R2]);
        l.add_slot("flags", ValueType::I32, &[FLAGS]);
        l.abi_arg_regs = vec![R0, R1];
        l.abi_ret_reg = Some(R0);
        l
    }

    fn toy_tables() -> SemaTableSet {
        let mut equiv = SdNodeEquivMap::new();
        equiv.insert(TGT_SUBF, IsdOp::Sub, 1);
        let mut b = SemanticsBuilder::new(NUM_INSTS, equiv);

        b.add_instruction(&InstPattern::new(
            I_ADDRR,
            "ADDrr",
            vec![gpr("dst", 0), gpr("a", 1), gpr("b", 2)],
            vec![PatternNode::set(vec![
                PatternNode::operand("dst", ValueType::I32),
                PatternNode::isd(
                    IsdOp::Add,
                    vec![ValueType::I32],
                    vec![
                        PatternNode::operand("a", ValueType::I32),
                        PatternNode::operand("b", ValueType::I32),
                    ],
                ),
            ])],
        ))
        .unwrap();

        b.add_instruction(&InstPattern::new(
            I_ADDRI,
            "ADDri",
            vec![
                gpr("dst", 0),
                gpr("a", 1),
                OperandInfo::new(
                    "imm",
                    OperandKind::Operand {
                        op_type: 0,
                        immediate: true,
                    },
                    2,
                ),
            ],
            vec![PatternNode::set(vec![
                PatternNode::operand("dst", ValueType::I32),
                PatternNode::isd(
                    IsdOp::Add,
                    vec![ValueType::I32],
                    vec![
                        PatternNode::operand("a", ValueType::I32),
                        PatternNode::operand("imm", ValueType::I32),
                    ],
                ),
            ])],
        ))
        .unwrap();

        b.add_instruction(&InstPattern::new(
            I_SUBRR,
            "SUBrr",
            vec![gpr("dst", 0), gpr("a", 1), gpr("b", 2)],
            vec![PatternNode::set(vec![
                PatternNode::operand("dst", ValueType::I32),
                PatternNode::reg(FLAGS, ValueType::I32),
                PatternNode::target(
                    TGT_SUBF,
                    "sub_with_flags",
                    vec![ValueType::I32, ValueType::I32],
                    vec![
                        PatternNode::operand("a", ValueType::I32),
                        PatternNode::operand("b", ValueType::I32),
                    ],
                ),
            ])],
        ))
        .unwrap();

        b.add_instruction(&InstPattern::new(
            I_RET,
            "RET",
            vec![],
            vec![PatternNode::isd(IsdOp::Ret, vec![], vec![])],
        ))
        .unwrap();

        b.add_instruction(&InstPattern::new(
            I_CALL,
            "CALLi",
            vec![],
            vec![PatternNode::isd(
                IsdOp::Call,
                vec![],
                vec![PatternNode::imm(0x2000, ValueType::I64)],
            )],
        ))
        .unwrap();

        b.add_instruction(&InstPattern::new(
            I_CONST2,
            "CONST2",
            vec![gpr("dst", 0)],
            vec![PatternNode::set(vec![
                PatternNode::operand("dst", ValueType::I32),
                PatternNode::isd(
                    IsdOp::Add,
                    vec![ValueType::I32],
                    vec![
                        PatternNode::imm(1, ValueType::I32),
                        PatternNode::imm(1, ValueType::I32),
                    ],
                ),
            ])],
        ))
        .unwrap();

        b.add_instruction(&InstPattern::new(
            I_BRIND,
            "BRind",
            vec![gpr("t", 0)],
            vec![PatternNode::isd(
                IsdOp::Br,
                vec![],
                vec![PatternNode::operand("t", ValueType::I32)],
            )],
        ))
        .unwrap();

        b.add_instruction(&InstPattern::new(
            I_FENCE,
            "FENCE",
            vec![],
            vec![PatternNode::intrinsic(42, vec![])],
        ))
        .unwrap();

        b.build()
    }

    fn mi(opcode: u32, addr: u64, operands: Vec<MachineOperand>) -> MachineInst {
        MachineInst::new(opcode, addr, 4, operands)
    }

    fn count_ops(func: &Function, op: IrOp) -> usize {
        (0..func.inst_count())
            .filter(|i| func.inst(InstRef(*i as u32)).op == op)
            .count()
    }

    fn block_named(func: &Function, name: &str) -> BlockRef {
        func.blocks()
            .find(|(_, b)| b.name == name)
            .map(|(r, _)| r)
            .unwrap_or_else(|| panic!("no block named {}", name))
    }

    #[test]
    fn test_toy_tables_validate() {
        let set = toy_tables();
        set.tables().validate(&|_| None).unwrap();
    }

    #[test]
    fn test_translate_add_ret_function() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::VERIFY_IR);
        tr.switch_to_module("m");

        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![
                    mi(
                        I_ADDRR,
                        0x1000,
                        vec![
                            MachineOperand::Reg(R0),
                            MachineOperand::Reg(R1),
                            MachineOperand::Reg(R2),
                        ],
                    ),
                    mi(I_RET, 0x1004, vec![]),
                ],
            )],
        );
        let fr = tr.translate_function(&mcfn).unwrap();
        let module = tr.finalize_module();
        let func = module.func(fr);

        // Prelude calls init_regset and branches into the first block; the
        // exit block calls fini_regset and returns.
        let entry = func.entry.unwrap();
        let body = func.block_at(0x1000).unwrap();
        let exit = block_named(func, "exit");
        assert_eq!(func.block(entry).term, Terminator::Br(body));
        assert_eq!(func.block(body).term, Terminator::Br(exit));
        assert_eq!(func.block(exit).term, Terminator::Ret);

        let init = module.func_by_name("init_regset").unwrap();
        let first_entry_inst = func.inst(func.block(entry).insts[0]);
        assert_eq!(first_entry_inst.op, IrOp::Call);
        assert_eq!(first_entry_inst.args[0], Value::Func(init));

        // Two register reads, one add, one store-back.
        assert_eq!(count_ops(func, IrOp::Load), 2);
        assert_eq!(count_ops(func, IrOp::Add), 1);
        assert_eq!(count_ops(func, IrOp::Store), 1);
    }

    #[test]
    fn test_translate_immediate_operand() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![
                    mi(
                        I_ADDRI,
                        0x1000,
                        vec![
                            MachineOperand::Reg(R0),
                            MachineOperand::Reg(R1),
                            MachineOperand::Imm(5),
                        ],
                    ),
                    mi(I_RET, 0x1004, vec![]),
                ],
            )],
        );
        let fr = tr.translate_function(&mcfn).unwrap();
        let module = tr.finalize_module();
        let func = module.func(fr);

        // The immediate reaches the add as a typed constant, not a load.
        assert_eq!(count_ops(func, IrOp::Load), 1);
        let add = (0..func.inst_count())
            .map(|i| func.inst(InstRef(i as u32)))
            .find(|inst| inst.op == IrOp::Add)
            .unwrap();
        assert_eq!(add.args[1], Value::const_of(ValueType::I32, 5));
    }

    #[test]
    fn test_translate_const_add_structure() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![
                    mi(I_CONST2, 0x1000, vec![MachineOperand::Reg(R0)]),
                    mi(I_RET, 0x1004, vec![]),
                ],
            )],
        );
        let fr = tr.translate_function(&mcfn).unwrap();
        let module = tr.finalize_module();
        let func = module.func(fr);

        // Both pooled constants feed one add, before any folding.
        let add = (0..func.inst_count())
            .map(|i| func.inst(InstRef(i as u32)))
            .find(|inst| inst.op == IrOp::Add)
            .unwrap();
        assert_eq!(add.args[0], Value::const_of(ValueType::I32, 1));
        assert_eq!(add.args[1], Value::const_of(ValueType::I32, 1));
    }

    #[test]
    fn test_translate_equivalence_implicit_flags() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![
                    mi(
                        I_SUBRR,
                        0x1000,
                        vec![
                            MachineOperand::Reg(R0),
                            MachineOperand::Reg(R1),
                            MachineOperand::Reg(R2),
                        ],
                    ),
                    mi(I_RET, 0x1004, vec![]),
                ],
            )],
        );
        // NoHooks ignores the IMPLICIT(FLAGS) delegation.
        let fr = tr.translate_function(&mcfn).unwrap();
        let module = tr.finalize_module();
        let func = module.func(fr);
        assert_eq!(count_ops(func, IrOp::Sub), 1);
    }

    #[test]
    fn test_unsupported_instruction_leaves_module_usable() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");

        let bad = MachineFunction::new(
            "bad",
            0x3000,
            vec![MachineBasicBlock::new(
                0x3000,
                vec![mi(0, 0x3000, vec![])],
            )],
        );
        let err = tr.translate_function(&bad).unwrap_err();
        assert!(matches!(
            err,
            TranslateError::UnsupportedInstruction { opcode: 0, addr: 0x3000 }
        ));

        // The module stays usable for other functions.
        let good = MachineFunction::new(
            "good",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![mi(I_RET, 0x1000, vec![])],
            )],
        );
        tr.translate_function(&good).unwrap();
        let module = tr.finalize_module();
        assert!(module.func_by_name("good").is_some());
    }

    #[test]
    fn test_direct_call_splits_block() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::VERIFY_IR);
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![mi(I_CALL, 0x1000, vec![]), mi(I_RET, 0x1004, vec![])],
            )],
        );
        let fr = tr.translate_function(&mcfn).unwrap();
        let module = tr.finalize_module();
        let func = module.func(fr);

        // A forward declaration materialized for the callee address.
        let callee = module.func_by_addr(0x2000).unwrap();
        assert!(module.func(callee).is_declaration());
        assert_eq!(module.func(callee).name, "fn_2000");

        // The call sits in its own block, continuing at the return address.
        let call_bb = block_named(func, "call_1000");
        let cont = func.block_at(0x1004).unwrap();
        assert_eq!(func.block(call_bb).term, Terminator::Br(cont));
        let body = func.block_at(0x1000).unwrap();
        assert_eq!(func.block(body).term, Terminator::Br(call_bb));
        let call_inst = func.inst(func.block(call_bb).insts[0]);
        assert_eq!(call_inst.op, IrOp::Call);
        assert_eq!(call_inst.args[0], Value::Func(callee));
    }

    #[test]
    fn test_fall_through_branch_synthesized() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![
                MachineBasicBlock::new(
                    0x1000,
                    vec![mi(
                        I_ADDRR,
                        0x1000,
                        vec![
                            MachineOperand::Reg(R0),
                            MachineOperand::Reg(R1),
                            MachineOperand::Reg(R2),
                        ],
                    )],
                ),
                MachineBasicBlock::new(0x1004, vec![mi(I_RET, 0x1004, vec![])]),
            ],
        );
        let fr = tr.translate_function(&mcfn).unwrap();
        let module = tr.finalize_module();
        let func = module.func(fr);
        let first = func.block_at(0x1000).unwrap();
        let second = func.block_at(0x1004).unwrap();
        assert_eq!(func.block(first).term, Terminator::Br(second));
    }

    #[test]
    fn test_missing_fall_through_becomes_unreachable() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![mi(
                    I_ADDRR,
                    0x1000,
                    vec![
                        MachineOperand::Reg(R0),
                        MachineOperand::Reg(R1),
                        MachineOperand::Reg(R2),
                    ],
                )],
            )],
        );
        let fr = tr.translate_function(&mcfn).unwrap();
        let module = tr.finalize_module();
        let func = module.func(fr);
        let body = func.block_at(0x1000).unwrap();
        assert_eq!(func.block(body).term, Terminator::Unreachable);
    }

    #[test]
    fn test_duplicate_block_address_first_wins() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![
                MachineBasicBlock::new(0x1000, vec![mi(I_RET, 0x1000, vec![])]),
                MachineBasicBlock::new(0x1000, vec![mi(I_RET, 0x1000, vec![])]),
            ],
        );
        tr.switch_to_function(&mcfn);
        let fr = tr.finalize_function().unwrap();
        let module = tr.finalize_module();
        // entry + one keyed block + exit.
        assert_eq!(module.func(fr).block_count(), 3);
    }

    #[test]
    fn test_indirect_branch_needs_callback() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![mi(I_BRIND, 0x1000, vec![MachineOperand::Reg(R1)])],
            )],
        );
        let err = tr.translate_function(&mcfn).unwrap_err();
        assert!(matches!(err, TranslateError::MissingCallback { addr: 0x1000 }));
    }

    #[test]
    fn test_indirect_branch_through_callback() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::VERIFY_IR);
        tr.set_dyn_translate_at_callback(0xcafe_0000);
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![mi(I_BRIND, 0x1000, vec![MachineOperand::Reg(R1)])],
            )],
        );
        let fr = tr.translate_function(&mcfn).unwrap();
        let module = tr.finalize_module();
        let func = module.func(fr);
        // One indirect call to the callback, one through the returned
        // pointer, then out through the exit block.
        assert_eq!(count_ops(func, IrOp::CallInd), 2);
        let body = func.block_at(0x1000).unwrap();
        let exit = block_named(func, "exit");
        assert_eq!(func.block(body).term, Terminator::Br(exit));
    }

    #[test]
    fn test_intrinsic_delegates_to_hooks() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![mi(I_FENCE, 0x1000, vec![]), mi(I_RET, 0x1004, vec![])],
            )],
        );
        // NoHooks abstains from intrinsic lowering.
        let err = tr.translate_function(&mcfn).unwrap_err();
        assert!(matches!(
            err,
            TranslateError::UnknownIntrinsic { id: 42, addr: 0x1000 }
        ));
    }

    #[test]
    fn test_translated_inst_recording() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(
            set.tables(),
            toy_layout(),
            &mut hooks,
            TranslateOpts::RECORD_TRANSLATED,
        );
        tr.switch_to_module("m");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![
                    mi(
                        I_ADDRR,
                        0x1000,
                        vec![
                            MachineOperand::Reg(R0),
                            MachineOperand::Reg(R1),
                            MachineOperand::Reg(R2),
                        ],
                    ),
                    mi(I_RET, 0x1004, vec![]),
                ],
            )],
        );
        tr.translate_function(&mcfn).unwrap();
        let recs = tr.translated_insts();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].addr, 0x1000);
        assert_eq!(recs[0].opcode, I_ADDRR);
        assert!(recs[0].num_insts >= 3); // loads + add at minimum
        assert_eq!(recs[1].addr, 0x1004);
    }

    #[test]
    fn test_main_function_synthesis() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        let entry = tr.get_function(0x1000);
        let main = tr.get_or_create_main_function(entry);
        assert_eq!(tr.get_or_create_main_function(entry), main);
        let module = tr.finalize_module();
        let func = module.func(main);
        assert_eq!(func.name, "main");
        let bb = func.entry.unwrap();
        let call = func.inst(func.block(bb).insts[0]);
        assert_eq!(call.op, IrOp::Call);
        assert_eq!(call.args[0], Value::Func(entry));
        assert_eq!(func.block(bb).term, Terminator::Ret);
    }

    #[test]
    fn test_external_wrapper_marshals_abi() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        let wrapper = tr.create_external_wrapper_function(0x9000, "ext_helper");

        // Repeats are reused, by address and by symbol name: a second
        // reference at another address must not clash on the wrapper name.
        assert_eq!(tr.create_external_wrapper_function(0x9000, "ext_helper"), wrapper);
        assert_eq!(tr.create_external_wrapper_function(0x9100, "ext_helper"), wrapper);

        let module = tr.finalize_module();

        let import = module.func_by_name("ext_helper").unwrap();
        assert!(module.func(import).is_declaration());
        assert_eq!(module.func(import).arg_types.len(), 2);
        assert_eq!(module.func(import).ret_type, ValueType::I32);

        let func = module.func(wrapper);
        assert_eq!(func.name, "ext_helper_wrapper");
        assert_eq!(func.addr, Some(0x9000));
        // Two argument loads, the call, one result store.
        assert_eq!(count_ops(func, IrOp::Load), 2);
        assert_eq!(count_ops(func, IrOp::Store), 1);
        assert_eq!(count_ops(func, IrOp::Call), 1);
        assert_eq!(module.func_by_addr(0x9000), Some(wrapper));
    }

    #[test]
    fn test_external_tail_call_bb() {
        let set = toy_tables();
        let mut hooks = NoHooks;
        let mut tr = Translator::new(set.tables(), toy_layout(), &mut hooks, TranslateOpts::empty());
        tr.switch_to_module("m");
        tr.create_external_wrapper_function(0x9000, "ext_exit");
        let mcfn = MachineFunction::new(
            "f",
            0x1000,
            vec![MachineBasicBlock::new(
                0x1000,
                vec![mi(I_RET, 0x1000, vec![])],
            )],
        );
        tr.switch_to_function(&mcfn);
        let bb = tr.create_external_tail_call_bb(0x9000);
        let fr = tr.finalize_function().unwrap();
        let module = tr.finalize_module();
        let func = module.func(fr);
        let exit = block_named(func, "exit");
        assert_eq!(func.block(bb).term, Terminator::Br(exit));
        assert_eq!(func.block(bb).addr, Some(0x9000));
        let call = func.inst(func.block(bb).insts[0]);
        assert_eq!(call.op, IrOp::Call);
    }
}
