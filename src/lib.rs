pub mod builtins;
pub mod code;
mod compiler;
mod evaluator;
mod frame;
mod lexer;
mod object;
mod parser;
pub mod symbol_table;
mod vm;

pub use self::{
    code::{Instructions, Opcode},
    compiler::*,
    evaluator::*,
    frame::*,
    lexer::*,
    object::*,
    parser::*,
    symbol_table::{Symbol, SymbolScope, SymbolTable},
    vm::*,
};

use std::fmt::Display;

fn flatten(items: &[impl Display], separator: &str) -> String {
    let strings = items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    strings.join(separator)
}
