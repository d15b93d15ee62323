use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::ir::function::Function;
use crate::ir::value::FuncRef;

/// A container of IR functions, indexed by name and (for functions lifted
/// from machine code) by machine address. The module owns every function.
#[derive(Debug, Default)]
pub struct Module {
    pub name: String,
    funcs: Vec<Function>,
    by_name: HashMap<String, FuncRef>,
    by_addr: BTreeMap<u64, FuncRef>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            funcs: Vec::new(),
            by_name: HashMap::new(),
            by_addr: BTreeMap::new(),
        }
    }

    /// Add a function. Panics on a duplicate name; use `func_by_name` first
    /// when the caller may race with itself.
    pub fn add_function(&mut self, func: Function) -> FuncRef {
        assert!(
            !self.by_name.contains_key(&func.name),
            "duplicate function name: {}",
            func.name
        );
        let r = FuncRef(self.funcs.len() as u32);
        self.by_name.insert(func.name.clone(), r);
        if let Some(a) = func.addr {
            self.by_addr.entry(a).or_insert(r);
        }
        self.funcs.push(func);
        r
    }

    pub fn func(&self, r: FuncRef) -> &Function {
        &self.funcs[r.index()]
    }

    pub fn func_mut(&mut self, r: FuncRef) -> &mut Function {
        &mut self.funcs[r.index()]
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncRef> {
        self.by_name.get(name).copied()
    }

    pub fn func_by_addr(&self, addr: u64) -> Option<FuncRef> {
        self.by_addr.get(&addr).copied()
    }

    pub fn func_count(&self) -> usize {
        self.funcs.len()
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncRef, &Function)> {
        self.funcs
            .iter()
            .enumerate()
            .map(|(i, func)| (FuncRef(i as u32), func))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "module {}", self.name)?;
        for (_, func) in self.functions() {
            write!(f, "{}", func)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::ValueType;

    #[test]
    fn test_module_lookup() {
        let mut m = Module::new("test");
        let f = m.add_function(Function::new_decl(
            "fn_1000",
            Some(0x1000),
            vec![ValueType::Ptr],
            ValueType::Void,
        ));
        assert_eq!(m.func_by_name("fn_1000"), Some(f));
        assert_eq!(m.func_by_addr(0x1000), Some(f));
        assert_eq!(m.func_by_addr(0x2000), None);
        assert_eq!(m.func_count(), 1);
    }

    #[test]
    #[should_panic]
    fn test_duplicate_name_panics() {
        let mut m = Module::new("test");
        m.add_function(Function::new_decl("f", None, vec![], ValueType::Void));
        m.add_function(Function::new_decl("f", None, vec![], ValueType::Void));
    }
}
