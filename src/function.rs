//! Function and operator definitions.
//!
//! A [`FunctionDef`] describes one callable of the math library: its kernels, its
//! determinism, how to infer the range of its result, when its real-valued kernel
//! may be used, its algebraic flags and its gradient. Every definition receives a
//! [`FunctionId`] from a process-wide counter; ids are used for identity, for the
//! combination table and for printing compiled code, never raw pointers.
//!
//! An [`OperatorDef`] attaches a symbol, precedence, associativity and fixity to a
//! function so the parser can apply it without parentheses.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use num_complex::Complex64;

use crate::combination::Combination;
use crate::convert::normalize;
use crate::element::Element;
use crate::errors::{DeriveError, ParseError};
use crate::expr::Node;
use crate::namespace::{Locals, Scope};
use crate::parser::parse;
use crate::range::{self, Range};
use crate::types::{
    CallShape, ComplexKernel, ComplexToRealKernel, Dispatch, Kernels, RealKernel,
    RealToComplexKernel,
};

/// Parameter names available inside gradient formula text, in argument order.
pub const GRADIENT_PARAMETERS: [&str; 4] = ["x", "y", "z", "w"];

static NEXT_FUNCTION_ID: AtomicU32 = AtomicU32::new(1);

/// Stable small-integer identity of a function definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(pub u32);

impl FunctionId {
    fn next() -> Self {
        FunctionId(NEXT_FUNCTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Algebraic flags of a unary function, used to populate the combination table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Algebra {
    /// f(f(x)) = x
    pub involution: bool,
    /// f(f(x)) = f(x)
    pub idempotent: bool,
    /// f(f(x)) = 0
    pub annihilating: bool,
    /// f(x + y) = f(x) + f(y)
    pub additive: bool,
    /// f(x * y) = f(x) * f(y)
    pub multiplicative: bool,
    /// f(c * x) = c * f(x) for real c
    pub linear: bool,
}

/// Author-supplied gradient text, parsed lazily on first use.
#[derive(Debug, Clone)]
pub enum GradientText {
    /// One holomorphic derivative per parameter.
    Complex(Vec<String>),
    /// Partial derivatives along the real and the imaginary axis, per parameter.
    Real(Vec<(String, String)>),
}

/// A parsed gradient. Trees refer to the parameters through [`GRADIENT_PARAMETERS`].
#[derive(Debug, Clone)]
pub enum Gradient {
    Complex(Vec<Node>),
    Real(Vec<(Node, Node)>),
}

/// Definition of a callable of the math library.
pub struct FunctionDef {
    id: FunctionId,
    name: String,
    arity: usize,
    deterministic: bool,
    kernels: Kernels,
    real_when: fn(&[Range]) -> bool,
    range: fn(&[Range]) -> Range,
    algebra: Algebra,
    gradient_text: Option<GradientText>,
    gradient: OnceLock<Result<Gradient, ParseError>>,
    pairs: Vec<(String, Combination)>,
}

impl std::fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionDef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("deterministic", &self.deterministic)
            .field("algebra", &self.algebra)
            .finish()
    }
}

impl FunctionDef {
    /// Starts a definition with no kernels. Add at least one with the `with_*` methods.
    pub fn new(name: &str, arity: usize) -> Self {
        debug_assert!(arity <= 4, "kernels take at most four arguments");
        Self {
            id: FunctionId::next(),
            name: name.to_string(),
            arity,
            deterministic: true,
            kernels: Kernels::default(),
            real_when: range::all_real,
            range: range::anything,
            algebra: Algebra::default(),
            gradient_text: None,
            gradient: OnceLock::new(),
            pairs: Vec::new(),
        }
    }

    pub fn with_complex(mut self, kernel: ComplexKernel) -> Self {
        debug_assert_eq!(kernel.arity(), self.arity);
        self.kernels.complex = Some(kernel);
        self
    }

    /// Adds a real kernel, usable when `when` accepts the argument ranges.
    pub fn with_real(mut self, kernel: RealKernel, when: fn(&[Range]) -> bool) -> Self {
        debug_assert_eq!(kernel.arity(), self.arity);
        self.kernels.real = Some(kernel);
        self.real_when = when;
        self
    }

    pub fn with_real_to_complex(mut self, kernel: RealToComplexKernel) -> Self {
        debug_assert_eq!(kernel.arity(), self.arity);
        self.kernels.real_to_complex = Some(kernel);
        self
    }

    pub fn with_complex_to_real(mut self, kernel: ComplexToRealKernel) -> Self {
        debug_assert_eq!(kernel.arity(), self.arity);
        self.kernels.complex_to_real = Some(kernel);
        self
    }

    pub fn with_range(mut self, range: fn(&[Range]) -> Range) -> Self {
        self.range = range;
        self
    }

    pub fn with_algebra(mut self, algebra: Algebra) -> Self {
        self.algebra = algebra;
        self
    }

    pub fn non_deterministic(mut self) -> Self {
        self.deterministic = false;
        self
    }

    pub fn with_complex_gradient(mut self, partials: &[&str]) -> Self {
        debug_assert_eq!(partials.len(), self.arity);
        self.gradient_text = Some(GradientText::Complex(
            partials.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    pub fn with_real_gradient(mut self, partials: &[(&str, &str)]) -> Self {
        debug_assert_eq!(partials.len(), self.arity);
        self.gradient_text = Some(GradientText::Real(
            partials
                .iter()
                .map(|(dx, dy)| (dx.to_string(), dy.to_string()))
                .collect(),
        ));
        self
    }

    /// Declares how `self(inner(x))` combines, for the function named `inner`.
    pub fn with_pair(mut self, inner: &str, combination: Combination) -> Self {
        self.pairs.push((inner.to_string(), combination));
        self
    }

    pub fn build(self) -> Arc<FunctionDef> {
        debug_assert!(!self.kernels.is_empty(), "{} has no kernel", self.name);
        Arc::new(self)
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn is_deterministic(&self) -> bool {
        self.deterministic
    }

    pub fn kernels(&self) -> &Kernels {
        &self.kernels
    }

    pub fn algebra(&self) -> Algebra {
        self.algebra
    }

    pub fn pairs(&self) -> &[(String, Combination)] {
        &self.pairs
    }

    pub fn has_gradient(&self) -> bool {
        self.gradient_text.is_some()
    }

    /// Infers the result range from the argument ranges.
    pub fn range(&self, args: &[Range]) -> Range {
        (self.range)(args)
    }

    /// Picks the cheapest kernel whose precondition holds for the argument ranges.
    pub fn select_shape(&self, args: &[Range]) -> Option<CallShape> {
        let all_real = args.iter().all(|r| r.is_real());
        if self.kernels.real.is_some() && (self.real_when)(args) {
            Some(CallShape::Real)
        } else if self.kernels.complex_to_real.is_some() {
            Some(CallShape::ComplexToReal)
        } else if self.kernels.real_to_complex.is_some() && all_real {
            Some(CallShape::RealToComplex)
        } else if self.kernels.complex.is_some() {
            Some(CallShape::Complex)
        } else {
            None
        }
    }

    /// Evaluates the function on constant arguments, with the same kernel choice
    /// the compiler would make for those values. Returns NaN if no kernel applies.
    pub fn evaluate(&self, args: &[Complex64]) -> Complex64 {
        debug_assert_eq!(args.len(), self.arity);
        let ranges: Vec<Range> = args.iter().map(|z| Range::of_value(*z)).collect();
        let dispatch: Option<Dispatch> = self
            .select_shape(&ranges)
            .and_then(|shape| self.kernels.dispatch(shape));
        match dispatch {
            Some(dispatch) => dispatch.apply(|k| args[k]),
            None => Complex64::new(f64::NAN, f64::NAN),
        }
    }

    /// Returns the parsed gradient, parsing the gradient text on first use.
    ///
    /// # Errors
    /// `DeriveError::NotDifferentiable` if no gradient was declared, and
    /// `DeriveError::Gradient` if the declared text does not parse.
    pub fn gradient(&self, scope: &dyn Scope) -> Result<&Gradient, DeriveError> {
        let text = self
            .gradient_text
            .as_ref()
            .ok_or_else(|| DeriveError::NotDifferentiable(self.name.clone()))?;
        self.gradient
            .get_or_init(|| parse_gradient(text, self.arity, scope))
            .as_ref()
            .map_err(|e| DeriveError::Gradient {
                function: self.name.clone(),
                source: e.clone(),
            })
    }
}

fn parse_gradient(text: &GradientText, arity: usize, scope: &dyn Scope) -> Result<Gradient, ParseError> {
    let parameters = GRADIENT_PARAMETERS[..arity]
        .iter()
        .map(|name| Element::variable(name, false))
        .collect();
    let locals = Locals::new(scope, parameters);
    let parse_one = |source: &str| parse(source, &locals).map(normalize);
    match text {
        GradientText::Complex(partials) => Ok(Gradient::Complex(
            partials
                .iter()
                .map(|s| parse_one(s))
                .collect::<Result<_, _>>()?,
        )),
        GradientText::Real(partials) => Ok(Gradient::Real(
            partials
                .iter()
                .map(|(dx, dy)| Ok((parse_one(dx)?, parse_one(dy)?)))
                .collect::<Result<_, ParseError>>()?,
        )),
    }
}

/// Where an operator sits relative to its operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fixity {
    Prefix,
    Infix,
    Postfix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Associativity {
    Left,
    Right,
}

/// A function applied with operator syntax.
#[derive(Debug)]
pub struct OperatorDef {
    pub symbol: String,
    pub function: Arc<FunctionDef>,
    pub precedence: u8,
    pub associativity: Associativity,
    pub fixity: Fixity,
}

impl OperatorDef {
    pub fn new(
        symbol: &str,
        function: Arc<FunctionDef>,
        precedence: u8,
        associativity: Associativity,
        fixity: Fixity,
    ) -> Arc<OperatorDef> {
        debug_assert_eq!(
            function.arity(),
            if fixity == Fixity::Infix { 2 } else { 1 }
        );
        Arc::new(OperatorDef {
            symbol: symbol.to_string(),
            function,
            precedence,
            associativity,
            fixity,
        })
    }

    pub fn arity(&self) -> usize {
        self.function.arity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Kernel;

    fn twice(x: f64) -> f64 {
        2.0 * x
    }

    fn twice_c(z: Complex64) -> Complex64 {
        z * 2.0
    }

    #[test]
    fn test_ids_are_unique() {
        let a = FunctionDef::new("a", 1).with_real(Kernel::Unary(twice), range::all_real).build();
        let b = FunctionDef::new("b", 1).with_real(Kernel::Unary(twice), range::all_real).build();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_select_shape_prefers_real() {
        let f = FunctionDef::new("twice", 1)
            .with_complex(Kernel::Unary(twice_c))
            .with_real(Kernel::Unary(twice), range::all_real)
            .build();
        assert_eq!(f.select_shape(&[Range::REAL]), Some(CallShape::Real));
        assert_eq!(f.select_shape(&[Range::COMPLEX]), Some(CallShape::Complex));
    }

    #[test]
    fn test_select_shape_without_variant() {
        let f = FunctionDef::new("twice", 1)
            .with_real(Kernel::Unary(twice), range::all_real)
            .build();
        assert_eq!(f.select_shape(&[Range::COMPLEX]), None);
        assert!(f.evaluate(&[Complex64::new(1.0, 1.0)]).re.is_nan());
    }

    #[test]
    fn test_missing_gradient() {
        let f = FunctionDef::new("twice", 1)
            .with_real(Kernel::Unary(twice), range::all_real)
            .build();
        let ns = crate::namespace::Namespace::builtins();
        assert!(matches!(
            f.gradient(&ns),
            Err(DeriveError::NotDifferentiable(_))
        ));
    }
}
