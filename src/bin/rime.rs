use std::{fs, io, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use rime::{
    evaluate_statements, Compiler, Environment, Lexer, Object, Parser as RimeParser, Statement,
    VirtualMachine,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Engine {
    /// Compile to bytecode and run it on the virtual machine
    Vm,
    /// Walk the syntax tree directly
    Eval,
}

#[derive(Parser)]
#[command(name = "rime")]
#[command(about = "The Rime programming language")]
struct Cli {
    /// Source file to run. Reads standard input when omitted.
    file: Option<PathBuf>,

    /// Execution engine
    #[arg(long, value_enum, default_value_t = Engine::Vm)]
    engine: Engine,

    /// Print the compiled bytecode before running it
    #[arg(long)]
    disassemble: bool,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();

    let source = match &cli.file {
        Some(file) => fs::read_to_string(file)
            .with_context(|| format!("Failed to read file: {}", file.display()))?,
        None => io::read_to_string(io::stdin()).context("Failed to read standard input")?,
    };

    let mut lexer = Lexer::new(&source);
    let tokens = lexer.tokenize().context("Lexer error")?;

    let mut parser = RimeParser::new(&tokens);
    let statements = parser.parse().context("Parser error")?;

    let result = match cli.engine {
        Engine::Vm => {
            let mut compiler = Compiler::new();
            compiler.compile(&statements).context("Compiler error")?;
            let bytecode = compiler.bytecode();

            if cli.disassemble {
                println!("{}", bytecode.instructions);
                for (index, constant) in bytecode.constants.iter().enumerate() {
                    println!("constant {:04}: {}", index, constant);
                }
            }

            let mut vm = VirtualMachine::new(bytecode);
            vm.run().context("Runtime error")?;
            vm.last_popped()
        }
        Engine::Eval => {
            evaluate_statements(&statements, Environment::new_rc(None)).context("Runtime error")?
        }
    };

    // Only an expression statement leaves a meaningful last value behind.
    let ends_in_expression = matches!(statements.last(), Some(Statement::Expression(_)));
    if ends_in_expression && result != Object::Null {
        println!("{}", result);
    }

    Ok(())
}
