use anyhow::{anyhow, Context, Result};
use rime::{evaluate_statements, Compiler, Environment, Lexer, Parser, Program, VirtualMachine};
use std::thread;
use std::time::{Duration, Instant};

const SIMPLE_RECURSION: &str = r#"
let count = fn(x) {
    if (x == 0) { return 0; }
    1 + count(x - 1);
};
count(100);
"#;

const FIBONACCI_VM: &str = r#"
let fibonacci = fn(x) {
    if (x == 0) { return 0; }
    if (x == 1) { return 1; }
    fibonacci(x - 1) + fibonacci(x - 2);
};
fibonacci(25);
"#;

const ARITHMETIC: &str = r#"
let compute = fn(n) { let a = 1; let b = 2; let c = 3; let d = 4; let e = 5; (a + b) * (c + d) - e + n; };
compute(1) + compute(2) + compute(3) + compute(4) + compute(5) + compute(6) + compute(7) + compute(8) + compute(9) + compute(10);
"#;

const CLOSURES: &str = "let newAdder = fn(a, b) { fn(c) { a + b + c }; }; let adder = newAdder(1, 2); adder(8) + adder(9) + adder(10);";

const ARRAY_OPS: &str = r#"
let arr = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];
let getThree = fn(a) { first(a) + first(rest(a)) + first(rest(rest(a))); };
getThree(arr) + getThree(rest(arr));
"#;

fn parse(input: &str) -> Option<Program> {
    let mut lexer = Lexer::new(input);
    let tokens = match lexer.tokenize() {
        Ok(tokens) => tokens,
        Err(error) => {
            eprintln!("  Lexer error: {}", error);
            return None;
        }
    };
    let mut parser = Parser::new(&tokens);
    match parser.parse() {
        Ok(program) => Some(program),
        Err(error) => {
            eprintln!("  Parser error: {}", error);
            None
        }
    }
}

fn run_evaluator(input: &str, iterations: u32) -> Option<Duration> {
    let program = parse(input)?;

    let start = Instant::now();
    for _ in 0..iterations {
        let environment = Environment::new_rc(None);
        if let Err(error) = evaluate_statements(&program, environment) {
            eprintln!("  Eval error: {}", error);
            return None;
        }
    }
    Some(start.elapsed())
}

fn run_vm(input: &str, iterations: u32) -> Option<Duration> {
    let program = parse(input)?;

    let mut compiler = Compiler::new();
    if let Err(error) = compiler.compile(&program) {
        eprintln!("  Compile error: {}", error);
        return None;
    }
    let bytecode = compiler.bytecode();

    let mut total_time = Duration::ZERO;
    for _ in 0..iterations {
        let mut vm = VirtualMachine::new(bytecode.clone());
        let start = Instant::now();
        if let Err(error) = vm.run() {
            eprintln!("  VM error: {}", error);
            return None;
        }
        total_time += start.elapsed();
    }
    Some(total_time)
}

const ITERATIONS: u32 = 100;

fn benchmark(name: &str, input: &str, eval_enabled: bool) {
    println!("{}:", name);

    if eval_enabled {
        if let Some(eval_time) = run_evaluator(input, ITERATIONS) {
            let eval_per_iter = eval_time.as_secs_f64() / ITERATIONS as f64 * 1000.0;
            println!("  Evaluator: {:.3}ms/iter", eval_per_iter);

            if let Some(vm_time) = run_vm(input, ITERATIONS) {
                let vm_per_iter = vm_time.as_secs_f64() / ITERATIONS as f64 * 1000.0;
                println!("  VM:        {:.3}ms/iter", vm_per_iter);
                let speedup = eval_time.as_secs_f64() / vm_time.as_secs_f64();
                if speedup >= 1.0 {
                    println!("  VM is {:.2}x faster", speedup);
                } else {
                    println!("  Evaluator is {:.2}x faster", 1.0 / speedup);
                }
            }
        }
    } else {
        println!("  Evaluator: (skipped)");
        if let Some(vm_time) = run_vm(input, 1) {
            println!("  VM:        {:?}", vm_time);
        }
    }
    println!();
}

fn run_benchmarks() {
    println!("=== Evaluator vs VM Performance ===");
    println!("(100 iterations per benchmark)\n");

    benchmark("Simple recursion (100 calls)", SIMPLE_RECURSION, true);
    benchmark("Arithmetic (10 fn calls)", ARITHMETIC, true);
    benchmark("Closures (6 calls)", CLOSURES, true);
    benchmark("Array builtins", ARRAY_OPS, true);

    println!("--- VM only ---\n");
    benchmark("Fibonacci(25)", FIBONACCI_VM, false);
}

fn main() -> Result<()> {
    env_logger::init();

    let builder = thread::Builder::new().stack_size(32 * 1024 * 1024);
    let handler = builder
        .spawn(run_benchmarks)
        .context("Failed to spawn the benchmark thread")?;
    handler
        .join()
        .map_err(|_| anyhow!("The benchmark thread panicked"))?;
    Ok(())
}
