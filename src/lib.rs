//! Formula compiler with symbolic differentiation and incremental bytecode evaluation.
//!
//! This crate compiles short mathematical formulas into a flat instruction
//! stream that can be evaluated millions of times per second. Formulas are
//! lexed and parsed against a [`namespace::Namespace`], simplified and
//! differentiated symbolically, lowered into a shared, constant-folded graph and
//! finally scheduled into bytecode that re-runs only the instructions affected
//! by the inputs that changed.
//!
//! # Features
//!
//! - Backtracking lexer for ambiguous symbol names (`xy`, `sinx`, `|x|`)
//! - Algebraic simplification with declarative rewrite rules
//! - Symbolic differentiation to any order
//! - Common-subexpression sharing across several outputs
//! - Incremental re-evaluation through a per-input skip table
//! - Complex arithmetic throughout, with real kernels picked by range inference
//!
//! # Example
//!
//! ```rust
//! use mathexpr_vm::Equation;
//!
//! // Create and compile an equation
//! let eq = Equation::new("2*x + y^2".to_string()).unwrap();
//!
//! // Evaluate at point (x=1, y=2)
//! let result = eq.eval(&[1.0, 2.0]).unwrap();
//! assert_eq!(result.re, 6.0);
//!
//! // Compute gradient [∂/∂x, ∂/∂y]
//! let gradient = eq.gradient(&[1.0, 2.0]).unwrap();
//! assert_eq!(gradient[1].re, 4.0);
//! ```

pub use equation::Equation;
pub use system::EquationSystem;

pub mod prelude {
    pub use crate::backends::vector::Vector;
    pub use crate::builder::{compile, compile_trees};
    pub use crate::config::EngineConfig;
    pub use crate::convert::normalize;
    pub use crate::equation::Equation;
    pub use crate::evaluator::{Context, Evaluator};
    pub use crate::expr::Node;
    pub use crate::namespace::Namespace;
    pub use crate::opt::Graph;
    pub use crate::parser::parse;
    pub use crate::system::EquationSystem;
}

/// Input containers accepted by the evaluation API
pub mod backends {
    pub mod vector;
}
/// Bytecode scheduling of the optimized graph
pub mod builder;
/// Combination table of algebraic shortcuts between functions
pub mod combination;
/// Engine configuration
pub mod config;
/// Normalization of raw parse trees into Sum/Product form and back
pub mod convert;
/// Symbolic differentiation
pub mod derivative;
/// Symbols stored in a namespace
pub mod element;
/// High-level equation handling
pub mod equation;
/// Error types for the various failure modes
pub mod errors;
/// Bytecode evaluator and evaluation contexts
pub mod evaluator;
/// Working Tree representation
pub mod expr;
/// Lazily parsed user formulas
pub mod formula;
/// Function and operator definitions
pub mod function;
/// Tokenization with backtracking over ambiguous names
pub mod lexer;
/// Hierarchical symbol table
pub mod namespace;
/// Built-in functions, operators and constants
pub mod operators {
    pub mod arithmetic;
    pub mod catalog;
    pub mod complex;
    pub mod exp;
    pub mod ln;
    pub mod pow;
    pub mod random;
    pub mod sqrt;
    pub mod trigonometric;
}
/// Optimizing Tree: shared, constant-folded graph IR
pub mod opt;
/// Precedence-climbing parser
pub mod parser;
/// Coarse value domains for type inference
pub mod range;
/// Rewrite rules
pub mod rules;
/// Algebraic simplification
pub mod simplify;
/// System of equations
pub mod system;
/// Kernel and call-shape types
pub mod types;

#[cfg(test)]
mod proptests;
