//! Error types for the mathexpr-vm crate.
//!
//! This module defines the error types that can occur while defining symbols,
//! parsing formulas, differentiating and compiling them. The main error types are:
//!
//! - `ParseError`: Structured lexing/parsing failures with an offset and length into the source
//! - `NamespaceError`: Failures when adding, renaming or removing namespace elements
//! - `DeriveError`: Symbolic differentiation failures
//! - `RuleError`: Malformed rewrite rules
//! - `CompileError`: Failures while lowering a tree to IR or bytecode
//! - `EquationError`: High-level errors when working with equations
//!
//! Evaluating compiled bytecode never fails. Undefined results are NaN.

use thiserror::Error;

/// What kind of failure a [`ParseError`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// A bare substring that matches no known symbol
    UnknownSymbol,
    /// Unmatched parenthesis or absolute-value bar
    UnbalancedGroup,
    /// An operator or call without an operand
    MissingOperand,
    /// A call whose argument count matches no definition
    ArityMismatch,
    /// A malformed `name(p1, ...) = expression` header
    InvalidHeader,
    /// A name that violates the naming rules
    InvalidName,
    /// A formula that refers to itself
    Recursive,
    /// An internal inconsistency reported on the user-error channel
    Internal,
}

/// Structured lexing/parsing failure. Offsets are byte offsets into the source.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message} (at {offset}..{end})", end = .offset + .len)]
pub struct ParseError {
    pub message: String,
    pub offset: usize,
    pub len: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, offset: usize, len: usize) -> Self {
        Self {
            message: message.into(),
            offset,
            len,
            kind,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ParseErrorKind::Internal, message, 0, 0)
    }

    /// Shifts the error location by `delta` bytes, for errors raised on a
    /// substring of a larger source.
    pub fn shifted(mut self, delta: usize) -> Self {
        self.offset += delta;
        self
    }

    /// Renders the source line with a caret marker under the offending span.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::errors::{ParseError, ParseErrorKind};
    /// let err = ParseError::new(ParseErrorKind::UnknownSymbol, "unknown symbol 'q'", 4, 1);
    /// assert_eq!(err.render("2 + q"), "2 + q\n    ^\nunknown symbol 'q'");
    /// ```
    pub fn render(&self, source: &str) -> String {
        let prefix = source
            .get(..self.offset.min(source.len()))
            .map(|s| s.chars().count())
            .unwrap_or(0);
        let width = source
            .get(self.offset.min(source.len())..(self.offset + self.len).min(source.len()))
            .map(|s| s.chars().count())
            .unwrap_or(0)
            .max(1);
        format!(
            "{source}\n{}{}\n{}",
            " ".repeat(prefix),
            "^".repeat(width),
            self.message
        )
    }
}

/// Errors raised by namespace mutations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NamespaceError {
    /// The (name, arity) slot is already taken
    #[error("'{name}' with arity {arity} is already defined")]
    Occupied { name: String, arity: usize },
    /// No element with that name and arity exists
    #[error("'{name}' with arity {arity} not found")]
    NotFound { name: String, arity: usize },
    /// The name violates the naming rules
    #[error("invalid name '{0}'")]
    InvalidName(String),
}

/// Errors raised during symbolic differentiation. Always locally recoverable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeriveError {
    /// The function declares no gradient
    #[error("'{0}' is not differentiable")]
    NotDifferentiable(String),
    /// The function is non-deterministic and therefore nowhere differentiable
    #[error("'{0}' is non-deterministic and cannot be differentiated")]
    NonDeterministic(String),
    /// The declared gradient text does not parse
    #[error("gradient of '{function}' does not parse: {source}")]
    Gradient { function: String, source: ParseError },
}

/// Errors raised while reading a rewrite rule.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    /// The line has no `=` separating pattern and replacement
    #[error("expected 'pattern = replacement'")]
    MissingEquals,
    /// One side of the rule does not parse
    #[error("{side} does not parse: {source}")]
    Parse { side: &'static str, source: ParseError },
    /// A domain word that names no known range
    #[error("unknown domain '{0}'")]
    UnknownDomain(String),
    /// Variables listed at the end of the line without a domain
    #[error("no domain given for '{0}'")]
    MissingDomain(String),
    /// A variable that the pattern does not bind
    #[error("'{0}' is not bound by the pattern")]
    UnboundWildcard(String),
    /// A pattern that cannot be matched, such as a bare variable
    #[error("unsupported pattern: {0}")]
    UnsupportedPattern(String),
}

/// Errors raised while lowering a tree to IR and bytecode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    /// A free variable that is not part of the evaluator's input list
    #[error("variable '{0}' is not an input of this evaluator")]
    UnknownVariable(String),
    /// No kernel variant accepts the inferred argument ranges
    #[error("no kernel of '{function}' accepts the argument ranges")]
    NoVariant { function: String },
    /// A function whose arity does not match its argument list
    #[error("'{function}' called with {got} arguments, expected {expected}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },
}

/// High-level errors that can occur when working with equations.
///
/// This enum wraps the lower-level errors from the parsing, differentiation and
/// compilation stages.
#[derive(Debug, Error)]
pub enum EquationError {
    /// Error when parsing the formula text
    #[error("failed to parse formula: {0}")]
    Parse(#[from] ParseError),
    /// Error when differentiating
    #[error("failed to differentiate: {0}")]
    Derive(#[from] DeriveError),
    /// Error when compiling to bytecode
    #[error("failed to compile: {0}")]
    Compile(#[from] CompileError),
    /// Error when defining symbols
    #[error("namespace error: {0}")]
    Namespace(#[from] NamespaceError),
    /// Error when trying to get derivative for a variable that doesn't exist
    #[error("Derivative not found for variable: {0}")]
    DerivativeNotFound(String),
    /// Error when the input length is not the same as the number of variables
    #[error("Invalid input length: expected {expected}, got {got}")]
    InvalidInputLength { expected: usize, got: usize },
    /// Error when a variable is not found in the equation
    #[error("Variable not found in equation: {0}")]
    VariableNotFound(String),
    /// Error when the output length is not the same as the number of equations
    #[error("Invalid output length: expected {expected}, got {got}")]
    InvalidOutputLength { expected: usize, got: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::new(ParseErrorKind::MissingOperand, "missing operand", 3, 1);
        assert_eq!(err.to_string(), "missing operand (at 3..4)");
    }

    #[test]
    fn test_render_multibyte_prefix() {
        let err = ParseError::new(ParseErrorKind::UnknownSymbol, "unknown symbol 'q'", "π + ".len(), 1);
        assert_eq!(err.render("π + q"), "π + q\n    ^\nunknown symbol 'q'");
    }

    #[test]
    fn test_equation_error_from() {
        let err: EquationError = CompileError::UnknownVariable("t".to_string()).into();
        assert!(matches!(err, EquationError::Compile(_)));
    }
}
