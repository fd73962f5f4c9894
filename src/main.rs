// ABOUTME: Command-line entry point for the interpreter

use clap::Parser;
use interp::builtins::register_builtins;
use interp::heap::Heap;
use interp::{config, eval, parser, value};
use std::path::PathBuf;

/// Lisp interpreter with a managed heap and mark-and-sweep garbage collector
#[derive(Parser, Debug)]
#[command(name = "interp")]
#[command(version = config::VERSION)]
#[command(about = "A small Lisp interpreter with a managed heap")]
struct CliArgs {
    /// Script file to execute
    #[arg(value_name = "FILE")]
    script: PathBuf,

    /// Print an allocation summary after the program finishes
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let contents = std::fs::read_to_string(&args.script)
        .map_err(|e| format!("Cannot read script file {}: {}", args.script.display(), e))?;

    let mut heap = Heap::new();
    register_builtins(&mut heap);

    let program = parser::read_program(&mut heap, &contents)?;
    heap.push_root(program);
    let toplevel = heap.toplevel();
    let result = eval::eval(&mut heap, program, toplevel)?;
    heap.pop_root();

    println!("{}", value::print(&heap, result));

    if args.verbose {
        heap.push_root(result);
        heap.collect();
        heap.pop_root();
        println!("total allocations: {}", heap.total_allocations());
        println!("live cells: {}", heap.live_cells());
    }

    Ok(())
}
