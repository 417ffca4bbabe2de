//! Diagnostics.
//!
//! Every fatal condition unwinds as a [`MiniCError`] to the single `run()`
//! entry point; there is no recovery or multi-error accumulation.

use std::io;

use thiserror::Error;

/// Line number (starting at one).
pub type Line = u32;

/// A fatal lexical, syntax, or semantic error annotated with the source line
/// it was detected on.
#[derive(Debug, PartialEq, Error)]
#[error("line {line}: {kind}\n    {snippet}")]
pub struct Diagnostic {
    pub line: Line,
    pub kind: ErrorKind,
    /// Full text of the offending line.
    pub snippet: String,
}

#[derive(Debug, PartialEq, Error)]
pub enum ErrorKind {
    // Lexical errors
    #[error("malformed numeric constant '{0}'")]
    MalformedNumber(String),
    #[error("unexpected character '{0}'")]
    UnknownCharacter(String),

    // Syntax errors
    #[error("unexpected token '{found}', expected {expected}")]
    UnexpectedToken { found: String, expected: String },
    #[error("expected a statement")]
    ExpectedStatement,
    #[error("expected an expression")]
    ExpectedExpression,
    #[error("expected a type name")]
    ExpectedType,
    #[error("unsupported statement after '{0}'")]
    BadStatement(String),

    // Semantic errors
    #[error("duplicate declaration of '{0}' in the same scope")]
    DuplicateDeclaration(String),
    #[error("use of undeclared identifier '{0}'")]
    UndeclaredIdentifier(String),
    #[error("incompatible types in assignment to '{0}'")]
    IncompatibleAssignment(String),
    #[error("'{0}' is not assignable")]
    NotAssignable(String),
    #[error("'{0}' does not have a numeric type")]
    NonNumericTarget(String),
    #[error("right-hand side of assignment must be numeric")]
    NonNumericRhs,
    #[error("operands of '{0}' must be numeric")]
    NonNumericOperand(String),
    #[error("'while' condition must be numeric")]
    NonNumericCondition,
    #[error("'return' expression must be numeric")]
    NonNumericReturn,
    #[error("member access on non-object '{0}'")]
    MemberOfNonObject(String),
    #[error("type '{0}' is not a class")]
    UnknownClass(String),
    #[error("class '{class}' has no member '{member}'")]
    UnknownMember { class: String, member: String },
    #[error("'{0}' is not a method")]
    CallOfNonMethod(String),
    #[error("method '{0}' used without a call")]
    MethodNotCalled(String),
    #[error("method call is not allowed here")]
    CallNotAllowedHere,
    #[error("object variable '{0}' cannot be initialized")]
    ObjectInitializer(String),
    #[error("constant '{0}' must have type 'int' or 'double'")]
    BadConstType(String),
    #[error("method '{0}' must return 'int' or 'double'")]
    BadMethodType(String),
    #[error("method '{0}' has no recorded body")]
    MissingBody(String),
}

/// Any error escaping the interpreter: a fatal analysis diagnostic or a
/// failure to write trace output.
#[derive(Debug, Error)]
pub enum MiniCError {
    #[error("{0}")]
    Analysis(#[from] Diagnostic),
    #[error("failed to write output: {0}")]
    Io(#[from] io::Error),
}
