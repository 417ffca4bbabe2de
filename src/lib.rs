//! An interpreter for a minimal C-like language: `int`/`double`, classes
//! with fields and zero-argument methods, `while`, `return`, arithmetic and
//! compound assignment, pre/post increment.
//!
//! The whole front end runs in a single grammar-driven traversal: the
//! recursive-descent parser doubles as the evaluator and re-enters method
//! bodies by seeking the scanner back to recorded offsets, so no syntax tree
//! is ever built.  The scope tree is both the symbol table and the only
//! durable program representation.
//!
//! # Examples
//!
//! See [`crate::interpreter::Interpreter`].
//!
//! # Limitations
//!
//! - No error recovery: analysis stops at the first lexical, syntax, or
//! semantic error.
//! - Methods take no parameters; classes have no inheritance; there are no
//! arrays or strings.

#![warn(rust_2018_idioms)]
#![warn(missing_debug_implementations)]

pub mod interpreter;

mod diag;
mod parser;
mod scanner;
mod scope;
mod token;
