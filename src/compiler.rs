use crate::{
    builtins::BUILTINS,
    code::{make, Instructions, Opcode},
    object::{CompiledFunction, Object},
    symbol_table::{self, Symbol, SymbolScope, SymbolTable},
    Expression, FunctionLiteral, Literal, Operator, Statement,
};
use std::rc::Rc;
use thiserror::Error;

// Placeholder target for jumps that are patched once the target is known.
const UNPATCHED_JUMP: usize = 9999;

const U8_OPERAND_LIMIT: usize = u8::MAX as usize;
const U16_OPERAND_LIMIT: usize = u16::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("undefined variable {0}")]
    UndefinedVariable(String),

    #[error("unusable as hash key: {0}")]
    InvalidHashKey(String),

    #[error("unknown operator: {0}")]
    UnknownOperator(Operator),

    #[error("too many {kind}: {count} exceeds the limit of {limit}")]
    OperandOverflow {
        kind: &'static str,
        count: usize,
        limit: usize,
    },
}

type CompileResult<T = ()> = Result<T, CompileError>;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct Bytecode {
    pub instructions: Instructions,
    pub constants: Vec<Object>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmittedInstruction {
    pub opcode: Opcode,
    pub position: usize,
}

#[derive(Debug, Default)]
pub struct CompilationScope {
    pub instructions: Instructions,
    pub last_instruction: Option<EmittedInstruction>,
    pub previous_instruction: Option<EmittedInstruction>,
}

// Outermost state captured before a unit is compiled.
struct Checkpoint {
    symbol_table: SymbolTable,
    constants: usize,
    instructions: usize,
    last_instruction: Option<EmittedInstruction>,
    previous_instruction: Option<EmittedInstruction>,
}

/// Compiles programs to bytecode.
///
/// Compilation scopes and their symbol tables live on two parallel stacks;
/// index 0 holds the outermost program scope and the global table.
pub struct Compiler {
    constants: Vec<Object>,
    symbol_tables: Vec<SymbolTable>,
    scopes: Vec<CompilationScope>,
    scope_index: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        let mut symbol_table = SymbolTable::new();
        for (index, builtin) in BUILTINS.iter().enumerate() {
            symbol_table.define_builtin(index, builtin.name);
        }
        Self::new_with_state(symbol_table, Vec::new())
    }

    /// Resumes from the global symbol table and constant pool of an earlier
    /// compilation, as a REPL does between inputs.
    pub fn new_with_state(symbol_table: SymbolTable, constants: Vec<Object>) -> Self {
        Self {
            constants,
            symbol_tables: vec![symbol_table],
            scopes: vec![CompilationScope::default()],
            scope_index: 0,
        }
    }

    pub fn into_state(mut self) -> (SymbolTable, Vec<Object>) {
        self.symbol_tables.truncate(1);
        let symbol_table = self.symbol_tables.pop().unwrap_or_default();
        (symbol_table, self.constants)
    }

    /// Compiles one unit on top of the current state. A unit that fails
    /// leaves the globals, constants and instructions as they were before it.
    pub fn compile(&mut self, program: &[Statement]) -> CompileResult {
        let checkpoint = self.checkpoint();

        let compiled = program
            .iter()
            .try_for_each(|statement| self.compile_statement(statement));
        if let Err(error) = compiled {
            log::debug!("discarding failed unit: {}", error);
            self.rollback(checkpoint);
            return Err(error);
        }

        log::debug!(
            "compiled {} statements into {} bytes with {} constants",
            program.len(),
            self.current_instructions().len(),
            self.constants.len()
        );
        Ok(())
    }

    fn checkpoint(&self) -> Checkpoint {
        let scope = &self.scopes[0];
        Checkpoint {
            symbol_table: self.symbol_tables[0].clone(),
            constants: self.constants.len(),
            instructions: scope.instructions.len(),
            last_instruction: scope.last_instruction,
            previous_instruction: scope.previous_instruction,
        }
    }

    fn rollback(&mut self, checkpoint: Checkpoint) {
        self.scopes.truncate(1);
        self.symbol_tables.truncate(1);
        self.scope_index = 0;

        self.symbol_tables[0] = checkpoint.symbol_table;
        self.constants.truncate(checkpoint.constants);

        let scope = &mut self.scopes[0];
        scope.instructions.truncate(checkpoint.instructions);
        scope.last_instruction = checkpoint.last_instruction;
        scope.previous_instruction = checkpoint.previous_instruction;
    }

    pub fn bytecode(&self) -> Bytecode {
        Bytecode {
            instructions: self.current_instructions().clone(),
            constants: self.constants.clone(),
        }
    }

    fn compile_statement(&mut self, statement: &Statement) -> CompileResult {
        match statement {
            Statement::Expression(expression) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::Pop, &[]);
            }
            Statement::Let(name, expression) => {
                self.compile_expression(expression)?;
                let symbol = self.current_symbol_table().define(name);
                match symbol.scope {
                    SymbolScope::Global => {
                        let index = check_limit("global bindings", symbol.index, U16_OPERAND_LIMIT)?;
                        self.emit(Opcode::SetGlobal, &[index]);
                    }
                    _ => {
                        let index = check_limit("local bindings", symbol.index, U8_OPERAND_LIMIT)?;
                        self.emit(Opcode::SetLocal, &[index]);
                    }
                }
            }
            Statement::Return(expression) => {
                self.compile_expression(expression)?;
                self.emit(Opcode::ReturnValue, &[]);
            }
        }
        Ok(())
    }

    fn compile_expression(&mut self, expression: &Expression) -> CompileResult {
        match expression {
            Expression::Identifier(name) => {
                let symbol = self.resolve(name)?;
                self.load_symbol(&symbol);
            }
            Expression::Literal(literal) => self.compile_literal(literal)?,
            Expression::Prefix(operator, operand) => {
                self.compile_expression(operand)?;
                match operator {
                    Operator::Not => self.emit(Opcode::Bang, &[]),
                    Operator::Negate => self.emit(Opcode::Minus, &[]),
                    operator => return Err(CompileError::UnknownOperator(*operator)),
                };
            }
            Expression::Infix(left, operator, right) => {
                self.compile_infix(left, *operator, right)?
            }
            Expression::If(condition, consequence, alternative) => {
                self.compile_if(condition, consequence, alternative.as_deref())?
            }
            Expression::Function(function) => self.compile_function(function)?,
            Expression::Call(function, arguments) => {
                self.compile_expression(function)?;
                for argument in arguments.iter() {
                    self.compile_expression(argument)?;
                }
                let count = check_limit("call arguments", arguments.len(), U8_OPERAND_LIMIT)?;
                self.emit(Opcode::Call, &[count]);
            }
            Expression::Index(left, index) => {
                self.compile_expression(left)?;
                self.compile_expression(index)?;
                self.emit(Opcode::Index, &[]);
            }
        }
        Ok(())
    }

    fn compile_literal(&mut self, literal: &Literal) -> CompileResult {
        match literal {
            Literal::Integer(value) => {
                let index = self.add_constant(Object::Integer(*value))?;
                self.emit(Opcode::Constant, &[index]);
            }
            Literal::String(value) => {
                let index = self.add_constant(Object::string(value))?;
                self.emit(Opcode::Constant, &[index]);
            }
            Literal::Boolean(true) => {
                self.emit(Opcode::True, &[]);
            }
            Literal::Boolean(false) => {
                self.emit(Opcode::False, &[]);
            }
            Literal::Array(elements) => {
                for element in elements.iter() {
                    self.compile_expression(element)?;
                }
                let count = check_limit("array elements", elements.len(), U16_OPERAND_LIMIT)?;
                self.emit(Opcode::Array, &[count]);
            }
            Literal::Hash(pairs) => {
                for (key, value) in pairs.iter() {
                    if !is_hashable_expression(key) {
                        return Err(CompileError::InvalidHashKey(key.to_string()));
                    }
                    self.compile_expression(key)?;
                    self.compile_expression(value)?;
                }
                let count = check_limit("hash entries", pairs.len() * 2, U16_OPERAND_LIMIT)?;
                self.emit(Opcode::Hash, &[count]);
            }
        }
        Ok(())
    }

    fn compile_infix(
        &mut self,
        left: &Expression,
        operator: Operator,
        right: &Expression,
    ) -> CompileResult {
        // `a < b` is emitted as `b > a`; there is no less-than opcode.
        if operator == Operator::LessThan {
            self.compile_expression(right)?;
            self.compile_expression(left)?;
            self.emit(Opcode::GreaterThan, &[]);
            return Ok(());
        }

        self.compile_expression(left)?;
        self.compile_expression(right)?;

        let opcode = match operator {
            Operator::Add => Opcode::Add,
            Operator::Subtract => Opcode::Sub,
            Operator::Multiply => Opcode::Mul,
            Operator::Divide => Opcode::Div,
            Operator::GreaterThan => Opcode::GreaterThan,
            Operator::Equal => Opcode::Equal,
            Operator::NotEqual => Opcode::NotEqual,
            Operator::LessThan | Operator::Not | Operator::Negate => {
                return Err(CompileError::UnknownOperator(operator))
            }
        };
        self.emit(opcode, &[]);
        Ok(())
    }

    fn compile_if(
        &mut self,
        condition: &Expression,
        consequence: &[Statement],
        alternative: Option<&[Statement]>,
    ) -> CompileResult {
        self.compile_expression(condition)?;

        let jump_not_truthy_position = self.emit(Opcode::JumpNotTruthy, &[UNPATCHED_JUMP]);

        self.compile_branch(consequence)?;

        let jump_position = self.emit(Opcode::Jump, &[UNPATCHED_JUMP]);

        let after_consequence = self.current_instructions().len();
        self.patch_jump(jump_not_truthy_position, after_consequence)?;

        match alternative {
            Some(alternative) => self.compile_branch(alternative)?,
            None => {
                self.emit(Opcode::Null, &[]);
            }
        }

        let after_alternative = self.current_instructions().len();
        self.patch_jump(jump_position, after_alternative)?;

        Ok(())
    }

    /// Compiles an `if` branch so that it leaves exactly one value behind.
    fn compile_branch(&mut self, block: &[Statement]) -> CompileResult {
        let start = self.current_instructions().len();
        for statement in block.iter() {
            self.compile_statement(statement)?;
        }
        let ends_in_pop = self.current_instructions().len() > start
            && self.last_instruction_is(Opcode::Pop);
        match ends_in_pop {
            true => self.remove_last_pop(),
            false => {
                self.emit(Opcode::Null, &[]);
            }
        }
        Ok(())
    }

    fn compile_function(&mut self, function: &FunctionLiteral) -> CompileResult {
        self.enter_scope();

        if let Some(name) = &function.name {
            self.current_symbol_table().define_function_name(name);
        }

        for parameter in function.parameters.iter() {
            self.current_symbol_table().define(parameter);
        }

        for statement in function.body.iter() {
            self.compile_statement(statement)?;
        }

        if self.last_instruction_is(Opcode::Pop) {
            self.replace_last_pop_with_return();
        }
        if !self.last_instruction_is(Opcode::ReturnValue) {
            self.emit(Opcode::Return, &[]);
        }

        let (instructions, symbol_table) = self.leave_scope();

        let num_locals = check_limit("local bindings", symbol_table.num_definitions, U8_OPERAND_LIMIT)?;
        let num_parameters = check_limit("parameters", function.parameters.len(), U8_OPERAND_LIMIT)?;
        let free_count = check_limit("free variables", symbol_table.free_symbols.len(), U8_OPERAND_LIMIT)?;

        for symbol in symbol_table.free_symbols.iter() {
            self.load_symbol(symbol);
        }

        let compiled_function = CompiledFunction {
            instructions,
            num_locals,
            num_parameters,
        };
        let index = self.add_constant(Object::CompiledFunction(Rc::new(compiled_function)))?;
        self.emit(Opcode::Closure, &[index, free_count]);

        Ok(())
    }

    fn resolve(&mut self, name: &str) -> CompileResult<Symbol> {
        symbol_table::resolve(&mut self.symbol_tables[..=self.scope_index], name)
            .ok_or_else(|| CompileError::UndefinedVariable(name.to_string()))
    }

    fn load_symbol(&mut self, symbol: &Symbol) {
        match symbol.scope {
            SymbolScope::Global => self.emit(Opcode::GetGlobal, &[symbol.index]),
            SymbolScope::Local => self.emit(Opcode::GetLocal, &[symbol.index]),
            SymbolScope::Builtin => self.emit(Opcode::GetBuiltin, &[symbol.index]),
            SymbolScope::Free => self.emit(Opcode::GetFree, &[symbol.index]),
            SymbolScope::FunctionSelf => self.emit(Opcode::CurrentClosure, &[]),
        };
    }

    fn add_constant(&mut self, constant: Object) -> CompileResult<usize> {
        check_limit("constants", self.constants.len(), U16_OPERAND_LIMIT)?;
        self.constants.push(constant);
        Ok(self.constants.len() - 1)
    }

    fn emit(&mut self, opcode: Opcode, operands: &[usize]) -> usize {
        let instruction = make(opcode, operands);
        let position = self.add_instruction(&instruction);
        self.set_last_instruction(opcode, position);
        position
    }

    fn add_instruction(&mut self, instruction: &[u8]) -> usize {
        let instructions = &mut self.scopes[self.scope_index].instructions;
        let position = instructions.len();
        instructions.extend_from_slice(instruction);
        position
    }

    fn set_last_instruction(&mut self, opcode: Opcode, position: usize) {
        let scope = &mut self.scopes[self.scope_index];
        scope.previous_instruction = scope.last_instruction;
        scope.last_instruction = Some(EmittedInstruction { opcode, position });
    }

    fn last_instruction_is(&self, opcode: Opcode) -> bool {
        matches!(
            self.scopes[self.scope_index].last_instruction,
            Some(last) if last.opcode == opcode
        )
    }

    fn remove_last_pop(&mut self) {
        let scope = &mut self.scopes[self.scope_index];
        if let Some(last) = scope.last_instruction {
            scope.instructions.truncate(last.position);
            scope.last_instruction = scope.previous_instruction;
        }
    }

    fn replace_last_pop_with_return(&mut self) {
        let scope = &mut self.scopes[self.scope_index];
        if let Some(last) = scope.last_instruction.as_mut() {
            scope.instructions[last.position] = Opcode::ReturnValue as u8;
            last.opcode = Opcode::ReturnValue;
        }
    }

    /// Rewrites the 16-bit target operand of the jump emitted at `position`.
    fn patch_jump(&mut self, position: usize, target: usize) -> CompileResult {
        let target = check_limit("instruction bytes", target, U16_OPERAND_LIMIT)?;
        let instructions = &mut self.scopes[self.scope_index].instructions;
        instructions[position + 1..position + 3].copy_from_slice(&(target as u16).to_be_bytes());
        Ok(())
    }

    fn current_instructions(&self) -> &Instructions {
        &self.scopes[self.scope_index].instructions
    }

    fn current_symbol_table(&mut self) -> &mut SymbolTable {
        &mut self.symbol_tables[self.scope_index]
    }

    fn enter_scope(&mut self) {
        self.scopes.push(CompilationScope::default());
        self.symbol_tables.push(SymbolTable::new_enclosed());
        self.scope_index += 1;
    }

    fn leave_scope(&mut self) -> (Instructions, SymbolTable) {
        let scope = self.scopes.pop().unwrap_or_default();
        let symbol_table = self.symbol_tables.pop().unwrap_or_default();
        self.scope_index -= 1;
        (scope.instructions, symbol_table)
    }
}

fn check_limit(kind: &'static str, count: usize, limit: usize) -> CompileResult<usize> {
    match count <= limit {
        true => Ok(count),
        false => Err(CompileError::OperandOverflow { kind, count, limit }),
    }
}

// Literals of these kinds can never produce a hashable value.
fn is_hashable_expression(expression: &Expression) -> bool {
    !matches!(
        expression,
        Expression::Function(_)
            | Expression::Literal(Literal::Array(_))
            | Expression::Literal(Literal::Hash(_))
    )
}
