use anyhow::{Context, Result};
use rime::{
    Compiler, Lexer, Object, Parser, Statement, SymbolTable, VirtualMachine, GLOBALS_SIZE, NULL,
};
use rustyline::{error::ReadlineError, Editor};
use std::mem;

/// Compiler and VM state that outlives a single line of input.
struct Session {
    symbol_table: SymbolTable,
    constants: Vec<Object>,
    globals: Vec<Object>,
    disassemble: bool,
}

impl Session {
    fn new() -> Self {
        let (symbol_table, constants) = Compiler::new().into_state();
        Self {
            symbol_table,
            constants,
            globals: vec![NULL; GLOBALS_SIZE],
            disassemble: false,
        }
    }

    fn run_line(&mut self, line: &str) -> Result<Option<Object>> {
        let mut lexer = Lexer::new(line);
        let tokens = lexer.tokenize().context("Error lexing")?;

        let mut parser = Parser::new(&tokens);
        let program = parser.parse().context("Error parsing")?;

        let mut compiler = Compiler::new_with_state(
            mem::take(&mut self.symbol_table),
            mem::take(&mut self.constants),
        );
        let compiled = compiler.compile(&program);
        let bytecode = compiler.bytecode();
        let (symbol_table, constants) = compiler.into_state();
        self.symbol_table = symbol_table;
        self.constants = constants;
        compiled.context("Error compiling")?;

        if self.disassemble {
            println!("{}", bytecode.instructions);
        }

        let mut vm = VirtualMachine::new_with_globals_store(bytecode, mem::take(&mut self.globals));
        let outcome = vm.run();
        let result = vm.last_popped();
        self.globals = vm.into_globals();
        outcome.context("Error running")?;

        let ends_in_expression = matches!(program.last(), Some(Statement::Expression(_)));
        Ok(ends_in_expression.then_some(result))
    }
}

fn main() -> Result<()> {
    env_logger::init();

    println!(
        r"
Welcome to the Rime programming language REPL!
You may type Rime code below for evaluation.
Enter ':dis' to toggle bytecode disassembly.
Enter 'exit' or press 'CTRL+C' to exit the REPL.
    "
    );

    let mut rl = Editor::<()>::new();
    if rl.load_history("history.txt").is_err() {
        println!("No previous history.");
    }

    let mut session = Session::new();

    loop {
        let readline = rl.readline("> ");
        match readline {
            Ok(line) => match line.trim() {
                "exit" => break,
                "" => continue,
                ":dis" => {
                    rl.add_history_entry(line.as_str());
                    session.disassemble = !session.disassemble;
                    println!(
                        "Disassembly {}",
                        if session.disassemble { "on" } else { "off" }
                    );
                }
                input => {
                    rl.add_history_entry(input);
                    match session.run_line(input) {
                        Ok(Some(result)) => println!("{}", result),
                        Ok(None) => {}
                        Err(error) => eprintln!("{:#}", error),
                    }
                }
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        }
    }
    rl.save_history("history.txt")?;
    Ok(())
}
