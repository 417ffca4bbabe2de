//! Mini-C interpreter command line.
//!
//! Interprets each file argument as one complete program (globals, classes,
//! and a `main` function); trace output goes to stdout.

use std::env;
use std::fs;
use std::io;

use anyhow::{bail, Context};

use minic::interpreter::Interpreter;

fn main() -> Result<(), anyhow::Error> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        bail!("usage: minic FILE...");
    }

    let mut interp_stdout = io::stdout();
    for p in &args {
        let source = fs::read_to_string(p).with_context(|| format!("failed to read {}", p))?;
        let mut interp = Interpreter::new(&mut interp_stdout);
        interp
            .run(&source)
            .with_context(|| format!("analysis of {} aborted", p))?;
    }

    Ok(())
}
