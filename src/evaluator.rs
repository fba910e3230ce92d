use crate::{
    builtins,
    object::{floor_divide, Function, HashPair, Object, NULL},
    Expression, FunctionLiteral, Literal, Operator, Statement,
};
use anyhow::{bail, Context, Result};
use std::{cell::RefCell, collections::HashMap, rc::Rc};

/// Variable bindings of the tree-walking evaluator, chained to the scope that
/// created them.
#[derive(Debug, Default)]
pub struct Environment {
    store: HashMap<String, Object>,
    outer: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn new_rc(outer: Option<Rc<RefCell<Environment>>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            store: HashMap::new(),
            outer,
        }))
    }

    pub fn get(&self, name: &str) -> Option<Object> {
        match self.store.get(name) {
            Some(value) => Some(value.clone()),
            None => self
                .outer
                .as_ref()
                .and_then(|outer| outer.borrow().get(name)),
        }
    }

    pub fn set(&mut self, name: &str, value: Object) {
        self.store.insert(name.to_string(), value);
    }
}

/// Evaluates a whole program. A top-level `return` stops evaluation and yields
/// its value.
pub fn evaluate_statements(
    statements: &[Statement],
    environment: Rc<RefCell<Environment>>,
) -> Result<Object> {
    let mut result = NULL;
    for statement in statements.iter() {
        result = evaluate_statement(statement, &environment)?;
        if let Object::ReturnValue(value) = result {
            return Ok(*value);
        }
    }
    Ok(result)
}

fn evaluate_block(
    statements: &[Statement],
    environment: &Rc<RefCell<Environment>>,
) -> Result<Object> {
    let mut result = NULL;
    for statement in statements.iter() {
        result = evaluate_statement(statement, environment)?;
        if let Object::ReturnValue(_) = result {
            break;
        }
    }
    Ok(result)
}

pub fn evaluate_statement(
    statement: &Statement,
    environment: &Rc<RefCell<Environment>>,
) -> Result<Object> {
    Ok(match statement {
        Statement::Let(name, expression) => {
            let value = evaluate_expression(expression, environment)?;
            environment.borrow_mut().set(name, value);
            NULL
        }
        Statement::Return(expression) => {
            let value = evaluate_expression(expression, environment)?;
            Object::ReturnValue(Box::new(value))
        }
        Statement::Expression(expression) => evaluate_expression(expression, environment)?,
    })
}

pub fn evaluate_expression(
    expression: &Expression,
    environment: &Rc<RefCell<Environment>>,
) -> Result<Object> {
    Ok(match expression {
        Expression::Identifier(name) => evaluate_identifier(name, environment)?,
        Expression::Literal(literal) => evaluate_literal(literal, environment)?,
        Expression::Prefix(operator, operand) => {
            let operand = evaluate_expression(operand, environment)?;
            evaluate_prefix_expression(*operator, &operand)?
        }
        Expression::Infix(left, operator, right) => {
            let left = evaluate_expression(left, environment)?;
            let right = evaluate_expression(right, environment)?;
            evaluate_infix_expression(*operator, &left, &right)?
        }
        Expression::If(condition, consequence, alternative) => {
            let condition = evaluate_expression(condition, environment)?;
            match (condition.is_truthy(), alternative) {
                (true, _) => evaluate_block(consequence, environment)?,
                (false, Some(alternative)) => evaluate_block(alternative, environment)?,
                (false, None) => NULL,
            }
        }
        Expression::Function(literal) => Object::Function(Rc::new(Function {
            literal: literal.clone(),
            environment: environment.clone(),
        })),
        Expression::Call(function, arguments) => {
            let function = evaluate_expression(function, environment)?;
            let arguments = arguments
                .iter()
                .map(|argument| evaluate_expression(argument, environment))
                .collect::<Result<Vec<_>>>()?;
            apply_function(&function, &arguments)?
        }
        Expression::Index(left, index) => {
            let left = evaluate_expression(left, environment)?;
            let index = evaluate_expression(index, environment)?;
            evaluate_index_expression(&left, &index)?
        }
    })
}

fn evaluate_identifier(name: &str, environment: &Rc<RefCell<Environment>>) -> Result<Object> {
    if let Some(value) = environment.borrow().get(name) {
        return Ok(value);
    }
    builtins::lookup(name)
        .map(Object::Builtin)
        .with_context(|| format!("identifier not found: {}", name))
}

fn evaluate_literal(literal: &Literal, environment: &Rc<RefCell<Environment>>) -> Result<Object> {
    Ok(match literal {
        Literal::Integer(integer) => Object::Integer(*integer),
        Literal::Boolean(boolean) => Object::native_bool(*boolean),
        Literal::String(string) => Object::string(string),
        Literal::Array(elements) => {
            let elements = elements
                .iter()
                .map(|element| evaluate_expression(element, environment))
                .collect::<Result<Vec<_>>>()?;
            Object::array(elements)
        }
        Literal::Hash(pairs) => {
            let mut hash = HashMap::with_capacity(pairs.len());
            for (key, value) in pairs.iter() {
                let key = evaluate_expression(key, environment)?;
                let hash_key = match key.hash_key() {
                    Some(hash_key) => hash_key,
                    None => bail!("unusable as hash key: {}", key.object_type()),
                };
                let value = evaluate_expression(value, environment)?;
                hash.insert(hash_key, HashPair { key, value });
            }
            Object::Hash(Rc::new(hash))
        }
    })
}

pub fn evaluate_prefix_expression(operator: Operator, operand: &Object) -> Result<Object> {
    Ok(match (operator, operand) {
        (Operator::Not, operand) => Object::native_bool(!operand.is_truthy()),
        (Operator::Negate, Object::Integer(value)) => Object::Integer(value.wrapping_neg()),
        (operator, operand) => bail!("unknown operator: {}{}", operator, operand.object_type()),
    })
}

pub fn evaluate_infix_expression(operator: Operator, left: &Object, right: &Object) -> Result<Object> {
    Ok(match (left, right) {
        (Object::Integer(left), Object::Integer(right)) => {
            evaluate_integer_infix_expression(operator, *left, *right)?
        }
        (Object::String(left), Object::String(right)) => match operator {
            Operator::Add => Object::string(&format!("{}{}", left, right)),
            operator => bail!("unknown operator: STRING {} STRING", operator),
        },
        _ => match operator {
            Operator::Equal => Object::native_bool(left.is_identical(right)),
            Operator::NotEqual => Object::native_bool(!left.is_identical(right)),
            operator => bail!(
                "type mismatch: {} {} {}",
                left.object_type(),
                operator,
                right.object_type()
            ),
        },
    })
}

fn evaluate_integer_infix_expression(operator: Operator, left: i64, right: i64) -> Result<Object> {
    Ok(match operator {
        Operator::Add => Object::Integer(left.wrapping_add(right)),
        Operator::Subtract => Object::Integer(left.wrapping_sub(right)),
        Operator::Multiply => Object::Integer(left.wrapping_mul(right)),
        Operator::Divide => Object::Integer(floor_divide(left, right).context("division by zero")?),
        Operator::LessThan => Object::native_bool(left < right),
        Operator::GreaterThan => Object::native_bool(left > right),
        Operator::Equal => Object::native_bool(left == right),
        Operator::NotEqual => Object::native_bool(left != right),
        operator => bail!("unknown operator: INTEGER {} INTEGER", operator),
    })
}

fn evaluate_index_expression(left: &Object, index: &Object) -> Result<Object> {
    Ok(match (left, index) {
        (Object::Array(elements), Object::Integer(index)) => usize::try_from(*index)
            .ok()
            .and_then(|index| elements.get(index))
            .cloned()
            .unwrap_or(NULL),
        (Object::Hash(pairs), index) => {
            let key = match index.hash_key() {
                Some(key) => key,
                None => bail!("unusable as hash key: {}", index.object_type()),
            };
            pairs.get(&key).map(|pair| pair.value.clone()).unwrap_or(NULL)
        }
        (left, _) => bail!("index operator not supported: {}", left.object_type()),
    })
}

fn apply_function(function: &Object, arguments: &[Object]) -> Result<Object> {
    match function {
        Object::Function(function) => {
            let environment = extend_function_environment(function, arguments)?;
            let result = evaluate_block(&function.literal.body, &environment)?;
            Ok(match result {
                Object::ReturnValue(value) => *value,
                result => result,
            })
        }
        Object::Builtin(builtin) => Ok((builtin.function)(arguments)),
        other => bail!("not a function: {}", other.object_type()),
    }
}

fn extend_function_environment(
    function: &Function,
    arguments: &[Object],
) -> Result<Rc<RefCell<Environment>>> {
    let FunctionLiteral { parameters, .. } = &function.literal;
    if parameters.len() != arguments.len() {
        bail!(
            "wrong number of arguments: want={}, got={}",
            parameters.len(),
            arguments.len()
        );
    }

    let environment = Environment::new_rc(Some(function.environment.clone()));
    for (parameter, argument) in parameters.iter().zip(arguments) {
        environment.borrow_mut().set(parameter, argument.clone());
    }
    Ok(environment)
}
