use crate::object::{Object, NULL};
use std::fmt::{Debug, Formatter, Result as FmtResult};

pub type BuiltinFunction = fn(&[Object]) -> Object;

pub struct Builtin {
    pub name: &'static str,
    pub function: BuiltinFunction,
}

impl Debug for Builtin {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "Builtin({})", self.name)
    }
}

impl PartialEq for Builtin {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Native functions in dispatch order. The compiler registers these names with
/// `SymbolTable::define_builtin` using their position here, and the VM indexes
/// this same slice for `OpGetBuiltin`, so entries must only ever be appended.
pub static BUILTINS: &[Builtin] = &[
    Builtin {
        name: "len",
        function: len,
    },
    Builtin {
        name: "puts",
        function: puts,
    },
    Builtin {
        name: "first",
        function: first,
    },
    Builtin {
        name: "last",
        function: last,
    },
    Builtin {
        name: "rest",
        function: rest,
    },
    Builtin {
        name: "push",
        function: push,
    },
];

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BUILTINS.iter().find(|builtin| builtin.name == name)
}

fn error(message: String) -> Object {
    Object::Error(message)
}

fn check_arity(arguments: &[Object], expected: usize) -> Option<Object> {
    match arguments.len() == expected {
        true => None,
        false => Some(error(format!(
            "wrong number of arguments. got={}, want={}",
            arguments.len(),
            expected
        ))),
    }
}

fn len(arguments: &[Object]) -> Object {
    if let Some(error) = check_arity(arguments, 1) {
        return error;
    }
    match &arguments[0] {
        Object::String(string) => Object::Integer(string.chars().count() as i64),
        Object::Array(elements) => Object::Integer(elements.len() as i64),
        other => error(format!(
            "argument to `len` not supported, got {}",
            other.object_type()
        )),
    }
}

fn puts(arguments: &[Object]) -> Object {
    for argument in arguments {
        println!("{}", argument);
    }
    NULL
}

fn first(arguments: &[Object]) -> Object {
    if let Some(error) = check_arity(arguments, 1) {
        return error;
    }
    match &arguments[0] {
        Object::Array(elements) => elements.first().cloned().unwrap_or(NULL),
        other => error(format!(
            "argument to `first` must be ARRAY, got {}",
            other.object_type()
        )),
    }
}

fn last(arguments: &[Object]) -> Object {
    if let Some(error) = check_arity(arguments, 1) {
        return error;
    }
    match &arguments[0] {
        Object::Array(elements) => elements.last().cloned().unwrap_or(NULL),
        other => error(format!(
            "argument to `last` must be ARRAY, got {}",
            other.object_type()
        )),
    }
}

fn rest(arguments: &[Object]) -> Object {
    if let Some(error) = check_arity(arguments, 1) {
        return error;
    }
    match &arguments[0] {
        Object::Array(elements) if elements.is_empty() => NULL,
        Object::Array(elements) => Object::array(elements[1..].to_vec()),
        other => error(format!(
            "argument to `rest` must be ARRAY, got {}",
            other.object_type()
        )),
    }
}

fn push(arguments: &[Object]) -> Object {
    if let Some(error) = check_arity(arguments, 2) {
        return error;
    }
    match &arguments[0] {
        Object::Array(elements) => {
            let mut elements = elements.to_vec();
            elements.push(arguments[1].clone());
            Object::array(elements)
        }
        other => error(format!(
            "argument to `push` must be ARRAY, got {}",
            other.object_type()
        )),
    }
}
