//! API to control the interpreter.

use std::io::prelude::*;

pub use crate::diag::{Diagnostic, ErrorKind, Line, MiniCError};
use crate::parser::Parser;
use crate::scanner::Scanner;

/// Single-pass parse-and-interpret engine.
///
/// [`Interpreter::run`] checks the whole program (syntax, declarations,
/// types) in one pass over the source, then executes `main` by re-seeking
/// into the recorded body offsets.  Assignment traces, warnings, and the
/// success message all go to the one supplied output sink; warnings are
/// distinguished only by their `warning: ` prefix.
///
/// # Example
///
/// ```
/// # use minic::interpreter::{Interpreter, MiniCError};
///
/// let mut output: Vec<u8> = Vec::new();
/// let mut interp = Interpreter::new(&mut output);
///
/// let program = r#"
///     class Counter {
///         int value;
///         int bump() { value = value + 1; return value; }
///     };
///
///     int main() {
///         Counter c;
///         c.bump();
///         c.bump();
///         int total = c.value;
///         return total;
///     }
/// "#;
/// interp.run(program)?;
///
/// assert_eq!(
///     String::from_utf8(output).unwrap(),
///     "analysis completed successfully\n\
///      value = 1\n\
///      value = 2\n\
///      total = 2\n\
///      main returned 2\n"
/// );
/// # Ok::<(), MiniCError>(())
/// ```
#[derive(Debug)]
pub struct Interpreter<'t, W: Write> {
    output: &'t mut W,
}

impl<'t, W: Write> Interpreter<'t, W> {
    pub fn new(output: &'t mut W) -> Interpreter<'t, W> {
        Interpreter { output }
    }

    /// Analyzes and runs one complete program.
    pub fn run(&mut self, source: &str) -> Result<(), MiniCError> {
        let scanner = Scanner::new(source);
        let mut parser = Parser::new(scanner, &mut *self.output);
        parser.run()
    }
}
