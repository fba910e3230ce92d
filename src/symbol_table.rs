use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolScope {
    Global,
    Local,
    Builtin,
    Free,
    FunctionSelf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub scope: SymbolScope,
    pub index: usize,
}

impl Symbol {
    pub fn new(name: &str, scope: SymbolScope, index: usize) -> Self {
        Self {
            name: name.to_string(),
            scope,
            index,
        }
    }
}

/// One lexical scope's bindings.
///
/// Tables do not own their parents. Nested scopes are kept as a stack and
/// resolution walks a mutable slice of it, innermost table last, so a child
/// only borrows its ancestors for the duration of a lookup.
#[derive(Debug, Default, Clone)]
pub struct SymbolTable {
    store: HashMap<String, Symbol>,
    pub num_definitions: usize,
    pub free_symbols: Vec<Symbol>,
    enclosed: bool,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_enclosed() -> Self {
        Self {
            enclosed: true,
            ..Self::default()
        }
    }

    pub fn is_global(&self) -> bool {
        !self.enclosed
    }

    pub fn define(&mut self, name: &str) -> Symbol {
        let scope = match self.enclosed {
            true => SymbolScope::Local,
            false => SymbolScope::Global,
        };
        let symbol = Symbol::new(name, scope, self.num_definitions);
        self.store.insert(name.to_string(), symbol.clone());
        self.num_definitions += 1;
        symbol
    }

    pub fn define_builtin(&mut self, index: usize, name: &str) -> Symbol {
        let symbol = Symbol::new(name, SymbolScope::Builtin, index);
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    pub fn define_function_name(&mut self, name: &str) -> Symbol {
        let symbol = Symbol::new(name, SymbolScope::FunctionSelf, 0);
        self.store.insert(name.to_string(), symbol.clone());
        symbol
    }

    fn define_free(&mut self, original: Symbol) -> Symbol {
        let symbol = Symbol::new(&original.name, SymbolScope::Free, self.free_symbols.len());
        log::trace!(
            "promoting '{}' ({:?} {}) to free {}",
            original.name,
            original.scope,
            original.index,
            symbol.index
        );
        self.free_symbols.push(original);
        self.store.insert(symbol.name.clone(), symbol.clone());
        symbol
    }

    pub fn resolve(&mut self, name: &str) -> Option<Symbol> {
        resolve(std::slice::from_mut(self), name)
    }
}

/// Resolves `name` against a chain of tables, outermost first.
///
/// Locals found in an enclosing table are promoted to free variables in every
/// table between the definition and the innermost one.
pub fn resolve(chain: &mut [SymbolTable], name: &str) -> Option<Symbol> {
    let (table, outer) = chain.split_last_mut()?;
    if let Some(symbol) = table.store.get(name) {
        return Some(symbol.clone());
    }

    let symbol = resolve(outer, name)?;
    match symbol.scope {
        SymbolScope::Global | SymbolScope::Builtin => Some(symbol),
        _ => Some(table.define_free(symbol)),
    }
}
