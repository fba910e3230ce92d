use crate::{
    builtins::{Builtin, BUILTINS},
    code::{read_u16, read_u8, Opcode},
    compiler::Bytecode,
    frame::Frame,
    object::{
        floor_divide, Closure, CompiledFunction, HashPair, Object, ObjectType, FALSE, NULL, TRUE,
    },
};
use std::{collections::HashMap, rc::Rc};
use thiserror::Error;

pub const STACK_SIZE: usize = 2048;
pub const GLOBALS_SIZE: usize = 65536;
pub const MAX_FRAMES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VmError {
    #[error("unsupported types for binary operation: {left} {operator} {right}")]
    UnsupportedTypes {
        operator: &'static str,
        left: ObjectType,
        right: ObjectType,
    },

    /// `<` compiles to `>` with swapped operands, so no source operator or
    /// operand order is reported.
    #[error("unsupported types for ordering comparison: {left} and {right}")]
    UnorderedTypes { left: ObjectType, right: ObjectType },

    #[error("unsupported operator {operator} for {operand}")]
    UnsupportedOperator {
        operator: &'static str,
        operand: ObjectType,
    },

    #[error("unknown operator: {operator}{operand}")]
    UnknownOperator {
        operator: &'static str,
        operand: ObjectType,
    },

    #[error("calling non-function: {0}")]
    NotAFunction(ObjectType),

    #[error("wrong number of arguments: want={want}, got={got}")]
    WrongArgumentCount { want: usize, got: usize },

    #[error("unusable as hash key: {0}")]
    UnusableHashKey(ObjectType),

    #[error("index operator not supported: {0}")]
    IndexNotSupported(ObjectType),

    #[error("unknown opcode {opcode} at {position}")]
    UnknownOpcode { opcode: u8, position: usize },

    #[error("truncated instruction at {position}")]
    TruncatedInstruction { position: usize },

    #[error("division by zero")]
    DivisionByZero,

    #[error("stack overflow")]
    StackOverflow,

    #[error("frame overflow: call depth exceeds {0}")]
    FrameOverflow(usize),

    #[error("stack underflow")]
    StackUnderflow,

    #[error("constant {0} is out of range")]
    InvalidConstant(usize),

    #[error("operand {operand} of {opcode:?} is out of range")]
    InvalidOperand { opcode: Opcode, operand: usize },
}

pub type VmResult<T = ()> = Result<T, VmError>;

pub struct VirtualMachine {
    constants: Vec<Object>,
    stack: Vec<Object>,
    stack_pointer: usize,
    globals: Vec<Object>,
    frames: Vec<Frame>,
}

impl VirtualMachine {
    pub fn new(bytecode: Bytecode) -> Self {
        Self::new_with_globals_store(bytecode, vec![NULL; GLOBALS_SIZE])
    }

    /// Runs against the globals of an earlier session, as a REPL does between
    /// inputs. The store is resized to `GLOBALS_SIZE` slots.
    pub fn new_with_globals_store(bytecode: Bytecode, mut globals: Vec<Object>) -> Self {
        globals.resize(GLOBALS_SIZE, NULL);

        let main_function = Rc::new(CompiledFunction {
            instructions: bytecode.instructions,
            ..Default::default()
        });
        let main_closure = Rc::new(Closure::new(main_function, Vec::new()));

        let mut frames = Vec::with_capacity(MAX_FRAMES);
        frames.push(Frame::new(main_closure, 0));

        Self {
            constants: bytecode.constants,
            stack: vec![NULL; STACK_SIZE],
            stack_pointer: 0,
            globals,
            frames,
        }
    }

    pub fn stack_top(&self) -> Option<&Object> {
        match self.stack_pointer {
            0 => None,
            stack_pointer => self.stack.get(stack_pointer - 1),
        }
    }

    /// The element most recently popped off the stack. Popping leaves the slot
    /// intact, so this is the result of the last expression statement.
    pub fn last_popped(&self) -> Object {
        self.stack.get(self.stack_pointer).cloned().unwrap_or(NULL)
    }

    pub fn stack_pointer(&self) -> usize {
        self.stack_pointer
    }

    pub fn globals(&self) -> &[Object] {
        &self.globals
    }

    pub fn into_globals(self) -> Vec<Object> {
        self.globals
    }

    pub fn run(&mut self) -> VmResult {
        log::debug!(
            "running {} bytes of instructions with {} constants",
            self.current_frame().instructions().len(),
            self.constants.len()
        );
        let result = self.execute();
        log::debug!("run finished with sp={}: {:?}", self.stack_pointer, result);
        result
    }

    fn execute(&mut self) -> VmResult {
        while self.current_frame().ip < self.current_frame().instructions().len() {
            let position = self.current_frame().ip;
            let byte = self.current_frame().instructions()[position];
            let opcode = Opcode::from_byte(byte).ok_or(VmError::UnknownOpcode {
                opcode: byte,
                position,
            })?;

            let end = position + 1 + opcode.definition().width();
            if end > self.current_frame().instructions().len() {
                return Err(VmError::TruncatedInstruction { position });
            }
            self.current_frame_mut().ip += 1;

            log::trace!(
                "{:04} {} sp={} depth={}",
                position,
                opcode.definition().name,
                self.stack_pointer,
                self.frames.len()
            );

            match opcode {
                Opcode::Constant => {
                    let index = self.read_u16_operand();
                    let constant = self
                        .constants
                        .get(index)
                        .cloned()
                        .ok_or(VmError::InvalidConstant(index))?;
                    self.push(constant)?;
                }
                Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                    self.execute_binary_operation(opcode)?;
                }
                Opcode::Equal | Opcode::NotEqual | Opcode::GreaterThan => {
                    self.execute_comparison(opcode)?;
                }
                Opcode::Pop => {
                    self.pop()?;
                }
                Opcode::True => self.push(TRUE)?,
                Opcode::False => self.push(FALSE)?,
                Opcode::Null => self.push(NULL)?,
                Opcode::Bang => {
                    let operand = self.pop()?;
                    self.push(Object::native_bool(!operand.is_truthy()))?;
                }
                Opcode::Minus => {
                    let operand = self.pop()?;
                    match operand {
                        Object::Integer(value) => self.push(Object::Integer(value.wrapping_neg()))?,
                        other => {
                            return Err(VmError::UnknownOperator {
                                operator: "-",
                                operand: other.object_type(),
                            })
                        }
                    }
                }
                Opcode::Jump => {
                    let target = self.read_u16_operand();
                    self.current_frame_mut().ip = target;
                }
                Opcode::JumpNotTruthy => {
                    let target = self.read_u16_operand();
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.current_frame_mut().ip = target;
                    }
                }
                Opcode::SetGlobal => {
                    let index = self.read_u16_operand();
                    let value = self.pop()?;
                    self.globals[index] = value;
                }
                Opcode::GetGlobal => {
                    let index = self.read_u16_operand();
                    let value = self.globals[index].clone();
                    self.push(value)?;
                }
                Opcode::SetLocal => {
                    let index = self.read_u8_operand();
                    let slot = self.local_slot(opcode, index)?;
                    let value = self.pop()?;
                    self.stack[slot] = value;
                }
                Opcode::GetLocal => {
                    let index = self.read_u8_operand();
                    let slot = self.local_slot(opcode, index)?;
                    let value = self.stack[slot].clone();
                    self.push(value)?;
                }
                Opcode::GetBuiltin => {
                    let index = self.read_u8_operand();
                    let builtin = BUILTINS.get(index).ok_or(VmError::InvalidOperand {
                        opcode,
                        operand: index,
                    })?;
                    self.push(Object::Builtin(builtin))?;
                }
                Opcode::GetFree => {
                    let index = self.read_u8_operand();
                    let value = self
                        .current_frame()
                        .closure
                        .free
                        .get(index)
                        .cloned()
                        .ok_or(VmError::InvalidOperand {
                            opcode,
                            operand: index,
                        })?;
                    self.push(value)?;
                }
                Opcode::CurrentClosure => {
                    let closure = self.current_frame().closure.clone();
                    self.push(Object::Closure(closure))?;
                }
                Opcode::Array => {
                    let count = self.read_u16_operand();
                    let start = self.operand_start(count)?;
                    let elements = self.stack[start..self.stack_pointer].to_vec();
                    self.stack_pointer = start;
                    self.push(Object::array(elements))?;
                }
                Opcode::Hash => {
                    let count = self.read_u16_operand();
                    let start = self.operand_start(count)?;
                    let hash = self.build_hash(start, self.stack_pointer)?;
                    self.stack_pointer = start;
                    self.push(hash)?;
                }
                Opcode::Index => {
                    let index = self.pop()?;
                    let left = self.pop()?;
                    self.execute_index_expression(left, index)?;
                }
                Opcode::Call => {
                    let num_args = self.read_u8_operand();
                    self.execute_call(num_args)?;
                }
                Opcode::ReturnValue => {
                    let return_value = self.pop()?;
                    self.return_from_frame(return_value)?;
                }
                Opcode::Return => {
                    self.return_from_frame(NULL)?;
                }
                Opcode::Closure => {
                    let constant_index = self.read_u16_operand();
                    let free_count = self.read_u8_operand();
                    self.push_closure(constant_index, free_count)?;
                }
            }
        }
        Ok(())
    }

    fn current_frame(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }

    fn current_frame_mut(&mut self) -> &mut Frame {
        let index = self.frames.len() - 1;
        &mut self.frames[index]
    }

    fn read_u16_operand(&mut self) -> usize {
        let frame = self.current_frame_mut();
        let operand = read_u16(frame.instructions(), frame.ip);
        frame.ip += 2;
        operand as usize
    }

    fn read_u8_operand(&mut self) -> usize {
        let frame = self.current_frame_mut();
        let operand = read_u8(frame.instructions(), frame.ip);
        frame.ip += 1;
        operand as usize
    }

    fn push(&mut self, object: Object) -> VmResult {
        if self.stack_pointer >= STACK_SIZE {
            return Err(VmError::StackOverflow);
        }
        self.stack[self.stack_pointer] = object;
        self.stack_pointer += 1;
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Object> {
        if self.stack_pointer == 0 {
            return Err(VmError::StackUnderflow);
        }
        self.stack_pointer -= 1;
        Ok(self.stack[self.stack_pointer].clone())
    }

    /// Index of the first of the top `count` stack elements.
    fn operand_start(&self, count: usize) -> VmResult<usize> {
        self.stack_pointer
            .checked_sub(count)
            .ok_or(VmError::StackUnderflow)
    }

    fn local_slot(&self, opcode: Opcode, index: usize) -> VmResult<usize> {
        let slot = self.current_frame().base_pointer + index;
        match slot < STACK_SIZE {
            true => Ok(slot),
            false => Err(VmError::InvalidOperand {
                opcode,
                operand: index,
            }),
        }
    }

    fn execute_binary_operation(&mut self, opcode: Opcode) -> VmResult {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (&left, &right) {
            (Object::Integer(left), Object::Integer(right)) => {
                execute_integer_operation(opcode, *left, *right)?
            }
            (Object::String(left), Object::String(right)) => match opcode {
                Opcode::Add => Object::string(&format!("{}{}", left, right)),
                _ => {
                    return Err(VmError::UnsupportedOperator {
                        operator: operator_symbol(opcode),
                        operand: ObjectType::String,
                    })
                }
            },
            _ => {
                return Err(VmError::UnsupportedTypes {
                    operator: operator_symbol(opcode),
                    left: left.object_type(),
                    right: right.object_type(),
                })
            }
        };

        self.push(result)
    }

    fn execute_comparison(&mut self, opcode: Opcode) -> VmResult {
        let right = self.pop()?;
        let left = self.pop()?;

        let result = match (&left, &right) {
            (Object::Integer(left), Object::Integer(right)) => match opcode {
                Opcode::Equal => left == right,
                Opcode::NotEqual => left != right,
                _ => left > right,
            },
            (Object::String(_), Object::String(_)) => {
                return Err(VmError::UnsupportedOperator {
                    operator: operator_symbol(opcode),
                    operand: ObjectType::String,
                })
            }
            _ => match opcode {
                Opcode::Equal => left.is_identical(&right),
                Opcode::NotEqual => !left.is_identical(&right),
                _ => {
                    return Err(VmError::UnorderedTypes {
                        left: left.object_type(),
                        right: right.object_type(),
                    })
                }
            },
        };

        self.push(Object::native_bool(result))
    }

    fn build_hash(&self, start: usize, end: usize) -> VmResult<Object> {
        let mut pairs = HashMap::with_capacity((end - start) / 2);
        for pair in self.stack[start..end].chunks_exact(2) {
            let (key, value) = (&pair[0], &pair[1]);
            let hash_key = key
                .hash_key()
                .ok_or_else(|| VmError::UnusableHashKey(key.object_type()))?;
            pairs.insert(
                hash_key,
                HashPair {
                    key: key.clone(),
                    value: value.clone(),
                },
            );
        }
        Ok(Object::Hash(Rc::new(pairs)))
    }

    fn execute_index_expression(&mut self, left: Object, index: Object) -> VmResult {
        let value = match (&left, &index) {
            (Object::Array(elements), Object::Integer(index)) => usize::try_from(*index)
                .ok()
                .and_then(|index| elements.get(index))
                .cloned()
                .unwrap_or(NULL),
            (Object::Hash(pairs), _) => {
                let key = index
                    .hash_key()
                    .ok_or_else(|| VmError::UnusableHashKey(index.object_type()))?;
                pairs.get(&key).map(|pair| pair.value.clone()).unwrap_or(NULL)
            }
            _ => return Err(VmError::IndexNotSupported(left.object_type())),
        };
        self.push(value)
    }

    fn execute_call(&mut self, num_args: usize) -> VmResult {
        let callee_slot = self
            .stack_pointer
            .checked_sub(num_args + 1)
            .ok_or(VmError::StackUnderflow)?;

        match self.stack[callee_slot].clone() {
            Object::Closure(closure) => self.call_closure(closure, num_args),
            Object::Builtin(builtin) => self.call_builtin(builtin, num_args),
            other => Err(VmError::NotAFunction(other.object_type())),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, num_args: usize) -> VmResult {
        let num_parameters = closure.function.num_parameters;
        let num_locals = closure.function.num_locals;

        if num_args != num_parameters {
            return Err(VmError::WrongArgumentCount {
                want: num_parameters,
                got: num_args,
            });
        }

        if self.frames.len() >= MAX_FRAMES {
            return Err(VmError::FrameOverflow(MAX_FRAMES));
        }

        let base_pointer = self.stack_pointer - num_args;
        let stack_pointer = base_pointer + num_locals;
        if stack_pointer > STACK_SIZE {
            return Err(VmError::StackOverflow);
        }

        // Locals that are not arguments start out as null.
        for slot in self.stack_pointer..stack_pointer {
            self.stack[slot] = NULL;
        }

        self.frames.push(Frame::new(closure, base_pointer));
        self.stack_pointer = stack_pointer;
        Ok(())
    }

    fn call_builtin(&mut self, builtin: &'static Builtin, num_args: usize) -> VmResult {
        let arguments = &self.stack[self.stack_pointer - num_args..self.stack_pointer];
        let result = (builtin.function)(arguments);
        log::trace!("builtin {} returned {}", builtin.name, result);
        self.stack_pointer -= num_args + 1;
        self.push(result)
    }

    fn return_from_frame(&mut self, return_value: Object) -> VmResult {
        // A top-level `return` ends the program with its value as the result.
        if self.frames.len() == 1 {
            self.push(return_value)?;
            self.stack_pointer -= 1;
            let frame = self.current_frame_mut();
            frame.ip = frame.instructions().len();
            return Ok(());
        }

        let frame = self.frames.pop().ok_or(VmError::StackUnderflow)?;
        self.stack_pointer = frame
            .base_pointer
            .checked_sub(1)
            .ok_or(VmError::StackUnderflow)?;
        self.push(return_value)
    }

    fn push_closure(&mut self, constant_index: usize, free_count: usize) -> VmResult {
        let function = match self.constants.get(constant_index) {
            Some(Object::CompiledFunction(function)) => function.clone(),
            Some(other) => return Err(VmError::NotAFunction(other.object_type())),
            None => return Err(VmError::InvalidConstant(constant_index)),
        };

        let start = self.operand_start(free_count)?;
        let free = self.stack[start..self.stack_pointer].to_vec();
        self.stack_pointer = start;

        self.push(Object::Closure(Rc::new(Closure::new(function, free))))
    }
}

fn execute_integer_operation(opcode: Opcode, left: i64, right: i64) -> VmResult<Object> {
    let value = match opcode {
        Opcode::Add => left.wrapping_add(right),
        Opcode::Sub => left.wrapping_sub(right),
        Opcode::Mul => left.wrapping_mul(right),
        Opcode::Div => floor_divide(left, right).ok_or(VmError::DivisionByZero)?,
        _ => {
            return Err(VmError::UnsupportedOperator {
                operator: operator_symbol(opcode),
                operand: ObjectType::Integer,
            })
        }
    };
    Ok(Object::Integer(value))
}

fn operator_symbol(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::Add => "+",
        Opcode::Sub => "-",
        Opcode::Mul => "*",
        Opcode::Div => "/",
        Opcode::Equal => "==",
        Opcode::NotEqual => "!=",
        Opcode::GreaterThan => ">",
        other => other.definition().name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        code::{make, Instructions},
        object::HashKey,
        Compiler, Lexer, Parser,
    };
    use anyhow::{Context, Result};

    fn compile(input: &str) -> Result<Bytecode> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.tokenize()?;
        let mut parser = Parser::new(&tokens);
        let program = parser.parse()?;
        let mut compiler = Compiler::new();
        compiler.compile(&program)?;
        Ok(compiler.bytecode())
    }

    fn run_vm_test(input: &str) -> Result<Object> {
        let mut vm = VirtualMachine::new(compile(input)?);
        vm.run()?;
        Ok(vm.last_popped())
    }

    fn run_vm_error(input: &str) -> Result<VmError> {
        let mut vm = VirtualMachine::new(compile(input)?);
        vm.run().err().context("expected a runtime error")
    }

    fn run_vm_tests(tests: &[(&str, Object)]) -> Result<()> {
        for (input, expected) in tests {
            let result = run_vm_test(input)?;
            assert_eq!(&result, expected, "Failed for input: {}", input);
        }
        Ok(())
    }

    fn integers(values: &[i64]) -> Object {
        Object::array(values.iter().map(|value| Object::Integer(*value)).collect())
    }

    #[test]
    fn test_integer_arithmetic() -> Result<()> {
        run_vm_tests(&[
            ("1", Object::Integer(1)),
            ("2", Object::Integer(2)),
            ("1 + 2", Object::Integer(3)),
            ("1 - 2", Object::Integer(-1)),
            ("1 * 2", Object::Integer(2)),
            ("4 / 2", Object::Integer(2)),
            ("50 / 2 * 2 + 10 - 5", Object::Integer(55)),
            ("5 * (2 + 10)", Object::Integer(60)),
            ("-5", Object::Integer(-5)),
            ("-10", Object::Integer(-10)),
            ("-50 + 100 + -50", Object::Integer(0)),
            ("(5 + 10 * 2 + 15 / 3) * 2 + -10", Object::Integer(50)),
            ("-7 / 2", Object::Integer(-4)),
            ("7 / -2", Object::Integer(-4)),
            ("7 / 2", Object::Integer(3)),
        ])
    }

    #[test]
    fn test_boolean_expressions() -> Result<()> {
        run_vm_tests(&[
            ("true", TRUE),
            ("false", FALSE),
            ("1 < 2", TRUE),
            ("1 > 2", FALSE),
            ("1 < 1", FALSE),
            ("1 == 1", TRUE),
            ("1 != 1", FALSE),
            ("1 == 2", FALSE),
            ("true == true", TRUE),
            ("true != false", TRUE),
            ("(1 < 2) == true", TRUE),
            ("(1 > 2) == true", FALSE),
            ("!true", FALSE),
            ("!false", TRUE),
            ("!5", FALSE),
            ("!!5", TRUE),
            ("!(if (false) { 5; })", TRUE),
            ("1 == true", FALSE),
        ])
    }

    #[test]
    fn test_identity_equality() -> Result<()> {
        run_vm_tests(&[
            ("let a = [1]; a == a", TRUE),
            ("[1] == [1]", FALSE),
            ("let f = fn() { 1 }; f == f", TRUE),
            ("fn() { 1 } != fn() { 1 }", TRUE),
            ("len == len", TRUE),
        ])
    }

    #[test]
    fn test_conditionals() -> Result<()> {
        run_vm_tests(&[
            ("if (true) { 10 }", Object::Integer(10)),
            ("if (true) { 10 } else { 20 }", Object::Integer(10)),
            ("if (false) { 10 } else { 20 }", Object::Integer(20)),
            ("if (1) { 10 }", Object::Integer(10)),
            ("if (1 < 2) { 10 }", Object::Integer(10)),
            ("if (1 > 2) { 10 } else { 20 }", Object::Integer(20)),
            ("if (1 > 2) { 10 }", NULL),
            ("if (false) { 10 }", NULL),
            ("if ((if (false) { 10 })) { 10 } else { 20 }", Object::Integer(20)),
            ("if (true) { } else { 10 }", NULL),
            ("if (true) { let x = 5; }", NULL),
        ])
    }

    #[test]
    fn test_global_let_statements() -> Result<()> {
        run_vm_tests(&[
            ("let one = 1; one", Object::Integer(1)),
            ("let one = 1; let two = 2; one + two", Object::Integer(3)),
            ("let one = 1; let two = one + one; one + two", Object::Integer(3)),
            ("let a = 1; let a = a + 1; a", Object::Integer(2)),
        ])
    }

    #[test]
    fn test_string_expressions() -> Result<()> {
        run_vm_tests(&[
            (r#""monkey""#, Object::string("monkey")),
            (r#""mon" + "key""#, Object::string("monkey")),
            (r#""mon" + "key" + "banana""#, Object::string("monkeybanana")),
        ])
    }

    #[test]
    fn test_array_literals() -> Result<()> {
        run_vm_tests(&[
            ("[]", integers(&[])),
            ("[1, 2, 3]", integers(&[1, 2, 3])),
            ("[1 + 2, 3 * 4, 5 + 6]", integers(&[3, 12, 11])),
        ])
    }

    #[test]
    fn test_hash_literals() -> Result<()> {
        let result = run_vm_test("{1: 2, 2: 3}")?;
        let pairs = match result {
            Object::Hash(pairs) => pairs,
            other => anyhow::bail!("expected a hash, got {}", other),
        };
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[&HashKey::Integer(1)].value, Object::Integer(2));
        assert_eq!(pairs[&HashKey::Integer(2)].value, Object::Integer(3));

        let result = run_vm_test("{1 + 1: 2 * 2, 3 + 3: 4 * 4}")?;
        let pairs = match result {
            Object::Hash(pairs) => pairs,
            other => anyhow::bail!("expected a hash, got {}", other),
        };
        assert_eq!(pairs[&HashKey::Integer(2)].value, Object::Integer(4));
        assert_eq!(pairs[&HashKey::Integer(6)].value, Object::Integer(16));

        assert_eq!(run_vm_test("{}")?, Object::Hash(Rc::new(HashMap::new())));
        Ok(())
    }

    #[test]
    fn test_index_expressions() -> Result<()> {
        run_vm_tests(&[
            ("[1, 2, 3][1]", Object::Integer(2)),
            ("[1, 2, 3][0 + 2]", Object::Integer(3)),
            ("[[1, 1, 1]][0][0]", Object::Integer(1)),
            ("[][0]", NULL),
            ("[1, 2, 3][99]", NULL),
            ("[1][-1]", NULL),
            ("{1: 1, 2: 2}[1]", Object::Integer(1)),
            ("{1: 1, 2: 2}[2]", Object::Integer(2)),
            ("{1: 1}[0]", NULL),
            ("{}[0]", NULL),
            (r#"{"one": 1, "two": 2}["t" + "wo"]"#, Object::Integer(2)),
            ("{true: 5}[1 < 2]", Object::Integer(5)),
        ])
    }

    #[test]
    fn test_calling_functions() -> Result<()> {
        run_vm_tests(&[
            ("let fivePlusTen = fn() { 5 + 10; }; fivePlusTen();", Object::Integer(15)),
            (
                "let one = fn() { 1; }; let two = fn() { 2; }; one() + two()",
                Object::Integer(3),
            ),
            (
                "let a = fn() { 1 }; let b = fn() { a() + 1 }; let c = fn() { b() + 1 }; c();",
                Object::Integer(3),
            ),
            ("let earlyExit = fn() { return 99; 100; }; earlyExit();", Object::Integer(99)),
            ("let earlyExit = fn() { return 99; return 100; }; earlyExit();", Object::Integer(99)),
            ("let noReturn = fn() { }; noReturn();", NULL),
            (
                "let noReturn = fn() { }; let noReturnTwo = fn() { noReturn(); }; noReturn(); noReturnTwo();",
                NULL,
            ),
            (
                "let returnsOne = fn() { 1; }; let returnsOneReturner = fn() { returnsOne; }; returnsOneReturner()();",
                Object::Integer(1),
            ),
            ("fn() { if (false) { let x = 1; }; x }()", NULL),
        ])
    }

    #[test]
    fn test_calling_functions_with_bindings() -> Result<()> {
        run_vm_tests(&[
            ("let one = fn() { let one = 1; one }; one();", Object::Integer(1)),
            (
                "let oneAndTwo = fn() { let one = 1; let two = 2; one + two; }; oneAndTwo();",
                Object::Integer(3),
            ),
            (
                "let firstFoobar = fn() { let foobar = 50; foobar; }; let secondFoobar = fn() { let foobar = 100; foobar; }; firstFoobar() + secondFoobar();",
                Object::Integer(150),
            ),
            (
                "let globalSeed = 50; let minusOne = fn() { let num = 1; globalSeed - num; }; let minusTwo = fn() { let num = 2; globalSeed - num; }; minusOne() + minusTwo();",
                Object::Integer(97),
            ),
        ])
    }

    #[test]
    fn test_calling_functions_with_arguments_and_bindings() -> Result<()> {
        run_vm_tests(&[
            ("let identity = fn(a) { a; }; identity(4);", Object::Integer(4)),
            ("let sum = fn(a, b) { a + b; }; sum(1, 2);", Object::Integer(3)),
            ("let sum = fn(a, b) { let c = a + b; c; }; sum(1, 2);", Object::Integer(3)),
            (
                "let sum = fn(a, b) { let c = a + b; c; }; sum(1, 2) + sum(3, 4);",
                Object::Integer(10),
            ),
            (
                "let sum = fn(a, b) { let c = a + b; c; }; let outer = fn() { sum(1, 2) + sum(3, 4); }; outer();",
                Object::Integer(10),
            ),
            (
                "let globalNum = 10; let sum = fn(a, b) { let c = a + b; c + globalNum; }; let outer = fn() { sum(1, 2) + sum(3, 4) + globalNum; }; outer() + globalNum;",
                Object::Integer(50),
            ),
        ])
    }

    #[test]
    fn test_calling_functions_with_wrong_arguments() -> Result<()> {
        let tests = [
            ("fn() { 1; }(1);", VmError::WrongArgumentCount { want: 0, got: 1 }),
            ("fn(a) { a; }();", VmError::WrongArgumentCount { want: 1, got: 0 }),
            ("fn(a, b) { a + b; }(1);", VmError::WrongArgumentCount { want: 2, got: 1 }),
        ];
        for (input, expected) in tests {
            assert_eq!(run_vm_error(input)?, expected, "Failed for input: {}", input);
        }
        Ok(())
    }

    #[test]
    fn test_builtin_functions() -> Result<()> {
        run_vm_tests(&[
            (r#"len("")"#, Object::Integer(0)),
            (r#"len("four")"#, Object::Integer(4)),
            (r#"len("hello world")"#, Object::Integer(11)),
            (
                "len(1)",
                Object::Error("argument to `len` not supported, got INTEGER".to_string()),
            ),
            (
                r#"len("one", "two")"#,
                Object::Error("wrong number of arguments. got=2, want=1".to_string()),
            ),
            ("len([1, 2, 3])", Object::Integer(3)),
            ("len([])", Object::Integer(0)),
            (r#"puts("hello", "world!")"#, NULL),
            ("first([1, 2, 3])", Object::Integer(1)),
            ("first([])", NULL),
            (
                "first(1)",
                Object::Error("argument to `first` must be ARRAY, got INTEGER".to_string()),
            ),
            ("last([1, 2, 3])", Object::Integer(3)),
            ("last([])", NULL),
            ("rest([1, 2, 3])", integers(&[2, 3])),
            ("rest([])", NULL),
            ("push([], 1)", integers(&[1])),
            (
                "push(1, 1)",
                Object::Error("argument to `push` must be ARRAY, got INTEGER".to_string()),
            ),
            ("let f = fn(xs) { len(xs) }; f([1, 2]);", Object::Integer(2)),
        ])
    }

    #[test]
    fn test_closures() -> Result<()> {
        run_vm_tests(&[
            (
                "let newClosure = fn(a) { fn() { a; }; }; let closure = newClosure(99); closure();",
                Object::Integer(99),
            ),
            (
                "let newAdder = fn(a, b) { fn(c) { a + b + c }; }; let adder = newAdder(1, 2); adder(8);",
                Object::Integer(11),
            ),
            (
                "let newAdder = fn(a, b) { let c = a + b; fn(d) { c + d }; }; let adder = newAdder(1, 2); adder(8);",
                Object::Integer(11),
            ),
            (
                "let newAdderOuter = fn(a, b) { let c = a + b; fn(d) { let e = d + c; fn(f) { e + f; }; }; }; let newAdderInner = newAdderOuter(1, 2); let adder = newAdderInner(3); adder(8);",
                Object::Integer(14),
            ),
            (
                "let a = 1; let newAdderOuter = fn(b) { fn(c) { fn(d) { a + b + c + d }; }; }; let newAdderInner = newAdderOuter(2); let adder = newAdderInner(3); adder(8);",
                Object::Integer(14),
            ),
            (
                "let newClosure = fn(a, b) { let one = fn() { a; }; let two = fn() { b; }; fn() { one() + two(); }; }; let closure = newClosure(9, 90); closure();",
                Object::Integer(99),
            ),
        ])
    }

    #[test]
    fn test_recursive_functions() -> Result<()> {
        run_vm_tests(&[
            (
                "let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; countDown(1);",
                Object::Integer(0),
            ),
            (
                "let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; let wrapper = fn() { countDown(1); }; wrapper();",
                Object::Integer(0),
            ),
            (
                "let wrapper = fn() { let countDown = fn(x) { if (x == 0) { return 0; } else { countDown(x - 1); } }; countDown(1); }; wrapper();",
                Object::Integer(0),
            ),
        ])
    }

    #[test]
    fn test_recursive_fibonacci() -> Result<()> {
        let input = r#"
            let fibonacci = fn(x) {
                if (x == 0) {
                    return 0;
                } else {
                    if (x == 1) {
                        return 1;
                    } else {
                        fibonacci(x - 1) + fibonacci(x - 2);
                    }
                }
            };
            fibonacci(10);
        "#;

        let mut vm = VirtualMachine::new(compile(input)?);
        vm.run()?;
        assert_eq!(vm.last_popped(), Object::Integer(55));
        assert_eq!(vm.stack_pointer(), 0);
        assert!(vm.stack_top().is_none());

        assert_eq!(
            run_vm_test(&input.replace("fibonacci(10);", "fibonacci(15);"))?,
            Object::Integer(610)
        );
        Ok(())
    }

    #[test]
    fn test_recursive_fibonacci_leaves_one_result() -> Result<()> {
        let input = r#"
            let fibonacci = fn(x) {
                if (x == 0) {
                    0
                } else if (x == 1) {
                    1
                } else {
                    fibonacci(x - 1) + fibonacci(x - 2)
                }
            };
            fibonacci(10)
        "#;

        // Drop the statement's trailing Pop so the call's result stays on the stack.
        let mut bytecode = compile(input)?;
        assert_eq!(bytecode.instructions.pop(), Some(Opcode::Pop as u8));

        let mut vm = VirtualMachine::new(bytecode);
        vm.run()?;
        assert_eq!(vm.stack_pointer(), 1);
        assert_eq!(vm.stack_top(), Some(&Object::Integer(55)));
        Ok(())
    }

    #[test]
    fn test_top_level_return() -> Result<()> {
        run_vm_tests(&[
            ("return 5; 10;", Object::Integer(5)),
            ("let a = 2; if (a > 1) { return a * 3; }; 0", Object::Integer(6)),
        ])
    }

    #[test]
    fn test_runtime_errors() -> Result<()> {
        let tests = [
            (
                "1 + true",
                VmError::UnsupportedTypes {
                    operator: "+",
                    left: ObjectType::Integer,
                    right: ObjectType::Boolean,
                },
            ),
            (
                "true > false",
                VmError::UnorderedTypes {
                    left: ObjectType::Boolean,
                    right: ObjectType::Boolean,
                },
            ),
            (
                "1 < true",
                VmError::UnorderedTypes {
                    left: ObjectType::Boolean,
                    right: ObjectType::Integer,
                },
            ),
            (
                r#""a" - "b""#,
                VmError::UnsupportedOperator {
                    operator: "-",
                    operand: ObjectType::String,
                },
            ),
            (
                r#""a" == "a""#,
                VmError::UnsupportedOperator {
                    operator: "==",
                    operand: ObjectType::String,
                },
            ),
            (
                "-true",
                VmError::UnknownOperator {
                    operator: "-",
                    operand: ObjectType::Boolean,
                },
            ),
            ("1 / 0", VmError::DivisionByZero),
            ("1()", VmError::NotAFunction(ObjectType::Integer)),
            ("let k = [1]; {k: 2}", VmError::UnusableHashKey(ObjectType::Array)),
            ("{1: 2}[[1]]", VmError::UnusableHashKey(ObjectType::Array)),
            ("1[0]", VmError::IndexNotSupported(ObjectType::Integer)),
            (r#"[1]["a"]"#, VmError::IndexNotSupported(ObjectType::Array)),
            ("let f = fn() { f() }; f();", VmError::FrameOverflow(MAX_FRAMES)),
            ("let f = fn(a, b, c) { f(a, b, c) }; f(1, 2, 3);", VmError::StackOverflow),
        ];

        for (input, expected) in tests {
            assert_eq!(run_vm_error(input)?, expected, "Failed for input: {}", input);
        }
        Ok(())
    }

    #[test]
    fn test_error_messages() -> Result<()> {
        assert_eq!(
            run_vm_error("1 + true")?.to_string(),
            "unsupported types for binary operation: INTEGER + BOOLEAN"
        );
        assert_eq!(
            run_vm_error("1 < true")?.to_string(),
            "unsupported types for ordering comparison: BOOLEAN and INTEGER"
        );
        assert_eq!(
            run_vm_error("fn(a) { a }()")?.to_string(),
            "wrong number of arguments: want=1, got=0"
        );
        Ok(())
    }

    #[test]
    fn test_malformed_bytecode() {
        let tests = [
            (
                Instructions::from(vec![255]),
                VmError::UnknownOpcode {
                    opcode: 255,
                    position: 0,
                },
            ),
            (
                Instructions::from(vec![Opcode::Constant as u8, 0]),
                VmError::TruncatedInstruction { position: 0 },
            ),
            (
                Instructions::from(make(Opcode::Constant, &[3])),
                VmError::InvalidConstant(3),
            ),
            (
                Instructions::from(make(Opcode::Pop, &[])),
                VmError::StackUnderflow,
            ),
            (
                Instructions::from(make(Opcode::GetBuiltin, &[200])),
                VmError::InvalidOperand {
                    opcode: Opcode::GetBuiltin,
                    operand: 200,
                },
            ),
        ];

        for (instructions, expected) in tests {
            let bytecode = Bytecode {
                instructions,
                constants: Vec::new(),
            };
            let mut vm = VirtualMachine::new(bytecode);
            assert_eq!(vm.run(), Err(expected));
        }
    }

    #[test]
    fn test_globals_store_carries_between_runs() -> Result<()> {
        let mut compiler = Compiler::new();
        let program = Parser::new(&Lexer::new("let x = 40;").tokenize()?).parse()?;
        compiler.compile(&program)?;
        let mut vm = VirtualMachine::new(compiler.bytecode());
        vm.run()?;
        let globals = vm.into_globals();

        let (symbol_table, constants) = compiler.into_state();
        let mut compiler = Compiler::new_with_state(symbol_table, constants);
        let program = Parser::new(&Lexer::new("x + 2").tokenize()?).parse()?;
        compiler.compile(&program)?;

        let mut vm = VirtualMachine::new_with_globals_store(compiler.bytecode(), globals);
        vm.run()?;
        assert_eq!(vm.last_popped(), Object::Integer(42));
        assert_eq!(vm.globals()[0], Object::Integer(40));
        Ok(())
    }
}
