use crate::{builtins::Builtin, code::Instructions, evaluator::Environment, flatten, FunctionLiteral};
use std::{
    cell::RefCell,
    collections::HashMap,
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    rc::Rc,
};

/// Interned constants. Booleans and null are immediate values, so every
/// occurrence is the same value and identity comparison reduces to `==`.
pub const TRUE: Object = Object::Boolean(true);
pub const FALSE: Object = Object::Boolean(false);
pub const NULL: Object = Object::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Integer,
    Boolean,
    Null,
    String,
    Array,
    Hash,
    CompiledFunction,
    Closure,
    Builtin,
    Function,
    ReturnValue,
    Error,
}

impl Display for ObjectType {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        let name = match self {
            Self::Integer => "INTEGER",
            Self::Boolean => "BOOLEAN",
            Self::Null => "NULL",
            Self::String => "STRING",
            Self::Array => "ARRAY",
            Self::Hash => "HASH",
            Self::CompiledFunction => "COMPILED_FUNCTION",
            Self::Closure => "CLOSURE",
            Self::Builtin => "BUILTIN",
            Self::Function => "FUNCTION",
            Self::ReturnValue => "RETURN_VALUE",
            Self::Error => "ERROR",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Integer(i64),
    Boolean(bool),
    Null,
    String(Rc<str>),
    Array(Rc<Vec<Object>>),
    Hash(Rc<HashMap<HashKey, HashPair>>),
    CompiledFunction(Rc<CompiledFunction>),
    Closure(Rc<Closure>),
    Builtin(&'static Builtin),
    Function(Rc<Function>),
    ReturnValue(Box<Object>),
    Error(String),
}

impl Object {
    pub fn object_type(&self) -> ObjectType {
        match self {
            Self::Integer(_) => ObjectType::Integer,
            Self::Boolean(_) => ObjectType::Boolean,
            Self::Null => ObjectType::Null,
            Self::String(_) => ObjectType::String,
            Self::Array(_) => ObjectType::Array,
            Self::Hash(_) => ObjectType::Hash,
            Self::CompiledFunction(_) => ObjectType::CompiledFunction,
            Self::Closure(_) => ObjectType::Closure,
            Self::Builtin(_) => ObjectType::Builtin,
            Self::Function(_) => ObjectType::Function,
            Self::ReturnValue(_) => ObjectType::ReturnValue,
            Self::Error(_) => ObjectType::Error,
        }
    }

    pub fn string(value: &str) -> Self {
        Self::String(Rc::from(value))
    }

    pub fn array(elements: Vec<Object>) -> Self {
        Self::Array(Rc::new(elements))
    }

    pub fn native_bool(value: bool) -> Self {
        match value {
            true => TRUE,
            false => FALSE,
        }
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Self::Null | Self::Boolean(false))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    pub fn hash_key(&self) -> Option<HashKey> {
        let key = match self {
            Self::Integer(value) => HashKey::Integer(*value),
            Self::Boolean(value) => HashKey::Boolean(*value),
            Self::String(value) => HashKey::String(value.clone()),
            _ => return None,
        };
        Some(key)
    }

    /// Reference identity as the language sees it. Immediate values compare by
    /// value, heap values by pointer.
    pub fn is_identical(&self, other: &Object) -> bool {
        match (self, other) {
            (Self::Integer(left), Self::Integer(right)) => left == right,
            (Self::Boolean(left), Self::Boolean(right)) => left == right,
            (Self::Null, Self::Null) => true,
            (Self::String(left), Self::String(right)) => Rc::ptr_eq(left, right),
            (Self::Array(left), Self::Array(right)) => Rc::ptr_eq(left, right),
            (Self::Hash(left), Self::Hash(right)) => Rc::ptr_eq(left, right),
            (Self::CompiledFunction(left), Self::CompiledFunction(right)) => Rc::ptr_eq(left, right),
            (Self::Closure(left), Self::Closure(right)) => Rc::ptr_eq(left, right),
            (Self::Builtin(left), Self::Builtin(right)) => std::ptr::eq(*left, *right),
            (Self::Function(left), Self::Function(right)) => Rc::ptr_eq(left, right),
            _ => false,
        }
    }
}

impl Display for Object {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::Integer(integer) => write!(f, "{}", integer),
            Self::Boolean(boolean) => write!(f, "{}", boolean),
            Self::Null => write!(f, "null"),
            Self::String(string) => write!(f, "{}", string),
            Self::Array(elements) => write!(f, "[{}]", flatten(elements.as_slice(), ", ")),
            Self::Hash(pairs) => {
                let pairs = pairs
                    .values()
                    .map(|pair| format!("{}: {}", pair.key, pair.value))
                    .collect::<Vec<_>>();
                write!(f, "{{{}}}", pairs.join(", "))
            }
            Self::CompiledFunction(function) => {
                write!(f, "CompiledFunction[{:p}]", Rc::as_ptr(function))
            }
            Self::Closure(closure) => write!(f, "Closure[{:p}]", Rc::as_ptr(closure)),
            Self::Builtin(builtin) => write!(f, "builtin function {}", builtin.name),
            Self::Function(function) => write!(f, "{}", function.literal),
            Self::ReturnValue(value) => write!(f, "{}", value),
            Self::Error(message) => write!(f, "ERROR: {}", message),
        }
    }
}

/// Integer division rounding toward negative infinity. `None` on a zero divisor.
pub fn floor_divide(left: i64, right: i64) -> Option<i64> {
    if right == 0 {
        return None;
    }
    let quotient = left.wrapping_div(right);
    match left.wrapping_rem(right) != 0 && (left < 0) != (right < 0) {
        true => Some(quotient - 1),
        false => Some(quotient),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Integer(i64),
    Boolean(bool),
    String(Rc<str>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashPair {
    pub key: Object,
    pub value: Object,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct CompiledFunction {
    pub instructions: Instructions,
    pub num_locals: usize,
    pub num_parameters: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Closure {
    pub function: Rc<CompiledFunction>,
    pub free: Vec<Object>,
}

impl Closure {
    pub fn new(function: Rc<CompiledFunction>, free: Vec<Object>) -> Self {
        Self { function, free }
    }
}

/// A function value of the tree-walking evaluator.
pub struct Function {
    pub literal: FunctionLiteral,
    pub environment: Rc<RefCell<Environment>>,
}

// The environment can refer back to this function, so it is left out.
impl Debug for Function {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("Function")
            .field("literal", &self.literal)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Function {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn test_string_hash_key() -> Result<()> {
        let hello1 = Object::string("Hello World");
        let hello2 = Object::string("Hello World");
        let diff1 = Object::string("My name is johnny");
        let diff2 = Object::string("My name is johnny");

        assert_eq!(hello1.hash_key(), hello2.hash_key());
        assert_eq!(diff1.hash_key(), diff2.hash_key());
        assert_ne!(hello1.hash_key(), diff1.hash_key());

        Ok(())
    }

    #[test]
    fn test_unhashable_objects() {
        assert!(Object::array(vec![]).hash_key().is_none());
        assert!(NULL.hash_key().is_none());
    }

    #[test]
    fn test_truthiness() {
        assert!(!NULL.is_truthy());
        assert!(!FALSE.is_truthy());
        assert!(TRUE.is_truthy());
        assert!(Object::Integer(0).is_truthy());
        assert!(Object::string("").is_truthy());
    }

    #[test]
    fn test_identity() {
        let array = Object::array(vec![Object::Integer(1)]);
        assert!(array.is_identical(&array.clone()));
        assert!(!array.is_identical(&Object::array(vec![Object::Integer(1)])));
        assert!(TRUE.is_identical(&Object::native_bool(true)));
        assert!(NULL.is_identical(&NULL));
        assert!(!TRUE.is_identical(&NULL));
    }

    #[test]
    fn test_floor_divide() {
        assert_eq!(floor_divide(-7, 2), Some(-4));
        assert_eq!(floor_divide(7, -2), Some(-4));
        assert_eq!(floor_divide(7, 2), Some(3));
        assert_eq!(floor_divide(-8, 2), Some(-4));
        assert_eq!(floor_divide(i64::MIN, -1), Some(i64::MIN));
        assert_eq!(floor_divide(1, 0), None);
    }

    #[test]
    fn test_inspect() {
        let array = Object::array(vec![Object::Integer(1), Object::string("two"), NULL]);
        assert_eq!(array.to_string(), "[1, two, null]");
        assert_eq!(Object::Error("boom".to_string()).to_string(), "ERROR: boom");
        assert_eq!(Object::Integer(1).object_type().to_string(), "INTEGER");
    }
}
