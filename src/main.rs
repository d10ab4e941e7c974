//! StrayBasic - an interactive interpreter for a vintage-style BASIC
//! dialect running in a simulated 64 KiB machine.
//!
//! With no argument it drops into the REPL; with a file argument it loads
//! and runs the program, then exits.

mod console;
mod error;
mod eval;
mod instr;
mod lexer;
mod program;
mod ram;
mod repl;
mod runtime;
mod token;
mod variables;

use std::env;
use std::process;

use console::Term;
use runtime::Runtime;

fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() > 2 {
        eprintln!("USAGE: straybasic [file.bas]");
        process::exit(1);
    }

    console::install_sigint();
    let mut rt = Runtime::new(Box::new(Term::new()));

    if args.len() == 2 {
        if !rt.load_and_run(&args[1]) {
            process::exit(1);
        }
        return;
    }

    rt.console.write("STRAYBASIC\n");
    rt.console.write("[Type BYE to quit]\n");
    rt.repl();
}
