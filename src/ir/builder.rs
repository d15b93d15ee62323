use crate::ir::function::Function;
use crate::ir::inst::{Inst, IrOp};
use crate::ir::terminator::Terminator;
use crate::ir::types::ValueType;
use crate::ir::value::{BlockRef, FuncRef, Value};

/// The builder API for emitting IR. Wraps a function and an insertion point
/// (one block); instructions are appended to the current block.
pub struct Builder<'f> {
    func: &'f mut Function,
    bb: BlockRef,
}

impl<'f> Builder<'f> {
    pub fn new(func: &'f mut Function, bb: BlockRef) -> Self {
        Self { func, bb }
    }

    /// Move the insertion point to another block of the same function.
    pub fn set_block(&mut self, bb: BlockRef) {
        self.bb = bb;
    }

    pub fn block(&self) -> BlockRef {
        self.bb
    }

    pub fn func(&self) -> &Function {
        self.func
    }

    /// Internal: emit an instruction and return its result value.
    fn emit(&mut self, op: IrOp, ty: ValueType, args: &[Value]) -> Value {
        let r = self.func.push_inst(self.bb, Inst::new(op, ty, args));
        if ty.is_void() {
            Value::Void
        } else {
            Value::Inst(r)
        }
    }

    // --- Constants ---

    pub fn iconst(&self, ty: ValueType, bits: u64) -> Value {
        Value::const_of(ty, bits)
    }

    // --- Register-set slots and memory ---

    /// Address of slot `idx` within the register-set aggregate at `base`.
    pub fn slot_addr(&mut self, base: Value, idx: u32) -> Value {
        let idx = self.iconst(ValueType::I32, idx as u64);
        self.emit(IrOp::SlotAddr, ValueType::Ptr, &[base, idx])
    }

    pub fn load(&mut self, ty: ValueType, ptr: Value) -> Value {
        self.emit(IrOp::Load, ty, &[ptr])
    }

    pub fn store(&mut self, value: Value, ptr: Value) {
        self.emit(IrOp::Store, ValueType::Void, &[value, ptr]);
    }

    // --- Arithmetic ---

    /// Emit a binary operation. `op` must be one of the binary opcodes.
    pub fn binop(&mut self, op: IrOp, ty: ValueType, lhs: Value, rhs: Value) -> Value {
        assert!(op.is_binary(), "not a binary op: {:?}", op);
        self.emit(op, ty, &[lhs, rhs])
    }

    pub fn add(&mut self, ty: ValueType, lhs: Value, rhs: Value) -> Value {
        self.binop(IrOp::Add, ty, lhs, rhs)
    }

    pub fn sub(&mut self, ty: ValueType, lhs: Value, rhs: Value) -> Value {
        self.binop(IrOp::Sub, ty, lhs, rhs)
    }

    pub fn mul(&mut self, ty: ValueType, lhs: Value, rhs: Value) -> Value {
        self.binop(IrOp::Mul, ty, lhs, rhs)
    }

    pub fn and(&mut self, ty: ValueType, lhs: Value, rhs: Value) -> Value {
        self.binop(IrOp::And, ty, lhs, rhs)
    }

    pub fn or(&mut self, ty: ValueType, lhs: Value, rhs: Value) -> Value {
        self.binop(IrOp::Or, ty, lhs, rhs)
    }

    pub fn xor(&mut self, ty: ValueType, lhs: Value, rhs: Value) -> Value {
        self.binop(IrOp::Xor, ty, lhs, rhs)
    }

    // --- Casts ---

    /// Emit a cast. `op` must be one of the cast opcodes; `ty` is the
    /// destination type.
    pub fn cast(&mut self, op: IrOp, ty: ValueType, value: Value) -> Value {
        assert!(op.is_cast(), "not a cast op: {:?}", op);
        self.emit(op, ty, &[value])
    }

    // --- Calls ---

    /// Direct call. The callee travels as the first argument value.
    pub fn call(&mut self, ret: ValueType, callee: FuncRef, args: &[Value]) -> Value {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(Value::Func(callee));
        all.extend_from_slice(args);
        self.emit(IrOp::Call, ret, &all)
    }

    /// Indirect call through a function-pointer value.
    pub fn call_ind(&mut self, ret: ValueType, callee: Value, args: &[Value]) -> Value {
        let mut all = Vec::with_capacity(args.len() + 1);
        all.push(callee);
        all.extend_from_slice(args);
        self.emit(IrOp::CallInd, ret, &all)
    }

    // --- Terminators ---

    pub fn br(&mut self, target: BlockRef) {
        self.func.set_term(self.bb, Terminator::Br(target));
    }

    pub fn cond_br(&mut self, cond: Value, then_bb: BlockRef, else_bb: BlockRef) {
        self.func.set_term(
            self.bb,
            Terminator::CondBr {
                cond,
                then_bb,
                else_bb,
            },
        );
    }

    pub fn ret(&mut self) {
        self.func.set_term(self.bb, Terminator::Ret);
    }

    pub fn unreachable(&mut self) {
        self.func.set_term(self.bb, Terminator::Unreachable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::Function;
    use crate::ir::value::InstRef;

    fn test_func() -> (Function, BlockRef) {
        let mut func =
            Function::new_decl("f", None, vec![ValueType::Ptr], ValueType::Void);
        let bb = func.add_block("entry", None);
        func.entry = Some(bb);
        (func, bb)
    }

    #[test]
    fn test_builder_add() {
        let (mut func, bb) = test_func();
        {
            let mut b = Builder::new(&mut func, bb);
            let one = b.iconst(ValueType::I32, 1);
            let two = b.iconst(ValueType::I32, 2);
            let sum = b.add(ValueType::I32, one, two);
            assert_eq!(sum, Value::Inst(InstRef(0)));
            b.ret();
        }
        assert_eq!(func.inst_count(), 1);
        assert_eq!(func.inst(InstRef(0)).op, IrOp::Add);
        assert_eq!(func.block(bb).term, Terminator::Ret);
    }

    #[test]
    fn test_builder_slot_load_store() {
        let (mut func, bb) = test_func();
        {
            let mut b = Builder::new(&mut func, bb);
            let slot = b.slot_addr(Value::Arg(0), 3);
            let v = b.load(ValueType::I64, slot);
            b.store(v, slot);
        }
        assert_eq!(func.inst_count(), 3);
        assert_eq!(func.inst(InstRef(0)).op, IrOp::SlotAddr);
        assert_eq!(func.inst(InstRef(1)).ty, ValueType::I64);
        assert_eq!(func.inst(InstRef(2)).op, IrOp::Store);
    }

    #[test]
    fn test_builder_call_shape() {
        let (mut func, bb) = test_func();
        let callee = FuncRef(7);
        {
            let mut b = Builder::new(&mut func, bb);
            b.call(ValueType::Void, callee, &[Value::Arg(0)]);
        }
        let inst = func.inst(InstRef(0));
        assert_eq!(inst.op, IrOp::Call);
        assert_eq!(inst.args[0], Value::Func(callee));
        assert_eq!(inst.args[1], Value::Arg(0));
    }

    #[test]
    #[should_panic]
    fn test_binop_rejects_non_binary() {
        let (mut func, bb) = test_func();
        let mut b = Builder::new(&mut func, bb);
        let v = b.iconst(ValueType::I32, 0);
        b.binop(IrOp::Load, ValueType::I32, v, v);
    }
}
