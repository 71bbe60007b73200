//! Working Tree: the canonical, simplifiable expression tree.
//!
//! This module defines the tree every formula is parsed into and every symbolic
//! transformation operates on. The main types are:
//!
//! - `Node`: An enum of the node kinds a formula tree can contain
//! - `Tree`: The root of a parsed formula, owning the root node and the formula's parameters
//!
//! The parser produces *raw* trees made of `Operator` and `Call` nodes that mirror the
//! source text. [`normalize`](crate::convert::normalize) turns them into the canonical form:
//! - n-ary `Sum` and `Product` nodes instead of `+ - * /`
//! - negation and inversion as flip nodes (`neg(x)`, `inv(x)`)
//! - roots as powers (`√x` becomes `x^0.5`)
//!
//! Children are owned by value; restructuring moves them out of the parent (leaving a
//! cheap `Node::default()` behind) rather than cloning.
//!
//! The builder helpers (`Node::sum`, `Node::product`, `Node::neg`, ...) cancel neutral
//! elements immediately: ×0, ×1, ×(−1), +0 and double negation never reach the tree.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use num_complex::Complex64;

use crate::element::{ConstantDef, ParameterDef, VariableDef};
use crate::function::{Fixity, FunctionDef, OperatorDef};
use crate::operators::catalog::{catalog, ADDITIVE, MULTIPLICATIVE, PREFIX};
use crate::range::{self, Range};

const ATOM: u8 = u8::MAX;

/// A node of the Working Tree.
#[derive(Debug, Clone)]
pub enum Node {
    /// A literal number
    Number(Complex64),
    /// A named constant such as `pi`
    Constant(Arc<ConstantDef>),
    /// A free variable
    Variable(Arc<VariableDef>),
    /// A parameter whose value is read at evaluation time
    Parameter(Arc<ParameterDef>),
    /// A function applied with call syntax; child count equals the arity
    Call(Arc<FunctionDef>, Vec<Node>),
    /// A function applied with operator syntax; child count equals the arity
    Operator(Arc<OperatorDef>, Vec<Node>),
    /// n-ary sum (normalized trees only)
    Sum(Vec<Node>),
    /// n-ary product (normalized trees only)
    Product(Vec<Node>),
}

impl Default for Node {
    fn default() -> Self {
        Node::Number(Complex64::new(0.0, 0.0))
    }
}

/// The root of a parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub root: Node,
    pub parameters: Vec<Arc<VariableDef>>,
}

fn same_number(a: Complex64, b: Complex64) -> bool {
    let same = |x: f64, y: f64| x == y || (x.is_nan() && y.is_nan());
    same(a.re, b.re) && same(a.im, b.im)
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Node::Number(a), Node::Number(b)) => same_number(*a, *b),
            (Node::Constant(a), Node::Constant(b)) => a.name == b.name,
            (Node::Variable(a), Node::Variable(b)) => a.name == b.name,
            (Node::Parameter(a), Node::Parameter(b)) => a.name() == b.name(),
            (Node::Sum(a), Node::Sum(b)) | (Node::Product(a), Node::Product(b)) => a == b,
            (
                Node::Call(..) | Node::Operator(..),
                Node::Call(..) | Node::Operator(..),
            ) => match (self.function(), other.function()) {
                (Some(f), Some(g)) => f.id() == g.id() && self.children() == other.children(),
                _ => false,
            },
            _ => false,
        }
    }
}

impl Node {
    pub fn number(value: f64) -> Node {
        Node::Number(Complex64::new(value, 0.0))
    }

    pub fn zero() -> Node {
        Node::number(0.0)
    }

    pub fn one() -> Node {
        Node::number(1.0)
    }

    /// A free variable node.
    pub fn variable(name: &str, real: bool) -> Node {
        Node::Variable(Arc::new(VariableDef {
            name: name.to_string(),
            real,
        }))
    }

    pub fn as_number(&self) -> Option<Complex64> {
        match self {
            Node::Number(v) => Some(*v),
            _ => None,
        }
    }

    /// The number as a real, if it has no imaginary part.
    pub fn as_real(&self) -> Option<f64> {
        self.as_number().filter(|v| v.im == 0.0).map(|v| v.re)
    }

    pub fn is_zero(&self) -> bool {
        self.as_number().is_some_and(|v| v.re == 0.0 && v.im == 0.0)
    }

    pub fn is_one(&self) -> bool {
        self.as_real() == Some(1.0)
    }

    pub fn is_minus_one(&self) -> bool {
        self.as_real() == Some(-1.0)
    }

    /// The callee of a `Call` or `Operator` node.
    pub fn function(&self) -> Option<&Arc<FunctionDef>> {
        match self {
            Node::Call(f, _) => Some(f),
            Node::Operator(op, _) => Some(&op.function),
            _ => None,
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::Call(_, args) | Node::Operator(_, args) | Node::Sum(args) | Node::Product(args) => args,
            _ => &[],
        }
    }

    pub fn children_mut(&mut self) -> &mut [Node] {
        match self {
            Node::Call(_, args) | Node::Operator(_, args) | Node::Sum(args) | Node::Product(args) => args,
            _ => &mut [],
        }
    }

    /// Rebuilds the node with every child passed through `f`. Children are moved, not cloned.
    pub fn map_children(mut self, mut f: impl FnMut(Node) -> Node) -> Node {
        for child in self.children_mut() {
            *child = f(std::mem::take(child));
        }
        self
    }

    /// The argument of a negation flip.
    pub fn as_neg(&self) -> Option<&Node> {
        match self {
            Node::Call(..) | Node::Operator(..) => self
                .function()
                .filter(|f| catalog().is_neg(f.id()))
                .map(|_| &self.children()[0]),
            _ => None,
        }
    }

    /// The argument of an inversion flip.
    pub fn as_inv(&self) -> Option<&Node> {
        self.function()
            .filter(|f| catalog().is_inv(f.id()))
            .map(|_| &self.children()[0])
    }

    /// Base and exponent of a power.
    pub fn as_pow(&self) -> Option<(&Node, &Node)> {
        self.function()
            .filter(|f| catalog().is_pow(f.id()))
            .map(|_| (&self.children()[0], &self.children()[1]))
    }

    /// Moves the children out of the node.
    pub fn into_children(self) -> Vec<Node> {
        match self {
            Node::Call(_, args) | Node::Operator(_, args) | Node::Sum(args) | Node::Product(args) => args,
            _ => Vec::new(),
        }
    }

    /// Moves the single argument out of a unary call.
    pub fn into_only_child(self) -> Node {
        match self {
            Node::Call(_, mut args) | Node::Operator(_, mut args) => args.pop().unwrap_or_default(),
            other => other,
        }
    }

    // ────────────────────────────────────────────────────────────────────
    //  Cancelling builders
    // ────────────────────────────────────────────────────────────────────

    /// `-x`, folding numbers and cancelling double negation.
    pub fn neg(x: Node) -> Node {
        if let Node::Number(v) = x {
            return Node::Number(-v);
        }
        if x.as_neg().is_some() {
            return x.into_only_child();
        }
        Node::Operator(catalog().neg_op.clone(), vec![x])
    }

    /// `1/x`, cancelling double inversion and the units ±1.
    pub fn inv(x: Node) -> Node {
        if x.is_one() || x.is_minus_one() {
            return x;
        }
        if x.as_inv().is_some() {
            return x.into_only_child();
        }
        Node::Call(catalog().inv.clone(), vec![x])
    }

    /// `base^exponent`, cancelling `x^1`, `x^0` and `1^x`.
    pub fn pow(base: Node, exponent: Node) -> Node {
        if exponent.is_one() {
            return base;
        }
        if exponent.is_zero() || base.is_one() {
            return Node::one();
        }
        Node::Operator(catalog().pow_op.clone(), vec![base, exponent])
    }

    /// n-ary sum dropping zero terms and flattening nested sums.
    pub fn sum(terms: Vec<Node>) -> Node {
        let mut flat = Vec::with_capacity(terms.len());
        for term in terms {
            match term {
                Node::Sum(inner) => flat.extend(inner),
                t if t.is_zero() => {}
                t => flat.push(t),
            }
        }
        match flat.len() {
            0 => Node::zero(),
            1 => flat.pop().unwrap_or_default(),
            _ => Node::Sum(flat),
        }
    }

    /// n-ary product cancelling ×0 and ×1 and pulling ×(−1) and negations
    /// out as a single flip.
    pub fn product(factors: Vec<Node>) -> Node {
        let mut flat = Vec::with_capacity(factors.len());
        let mut negative = false;
        let mut pending = factors;
        while let Some(factor) = pending.pop() {
            match factor {
                Node::Product(inner) => pending.extend(inner),
                f if f.is_zero() => return Node::zero(),
                f if f.is_one() => {}
                f if f.is_minus_one() => negative = !negative,
                f if f.as_neg().is_some() => {
                    negative = !negative;
                    pending.push(f.into_only_child());
                }
                f => flat.push(f),
            }
        }
        flat.reverse();
        let product = match flat.len() {
            0 => Node::one(),
            1 => flat.pop().unwrap_or_default(),
            _ => Node::Product(flat),
        };
        if negative {
            Node::neg(product)
        } else {
            product
        }
    }

    /// Absorbs nested Sum-of-Sum and Product-of-Product nodes at every level and
    /// collapses empty and singleton Sum/Product nodes. Purely structural.
    pub fn flatten(self) -> Node {
        let node = self.map_children(Node::flatten);
        match node {
            Node::Sum(terms) => {
                let mut flat = Vec::with_capacity(terms.len());
                for t in terms {
                    match t {
                        Node::Sum(inner) => flat.extend(inner),
                        t => flat.push(t),
                    }
                }
                match flat.len() {
                    0 => Node::zero(),
                    1 => flat.pop().unwrap_or_default(),
                    _ => Node::Sum(flat),
                }
            }
            Node::Product(factors) => {
                let mut flat = Vec::with_capacity(factors.len());
                for f in factors {
                    match f {
                        Node::Product(inner) => flat.extend(inner),
                        f => flat.push(f),
                    }
                }
                match flat.len() {
                    0 => Node::one(),
                    1 => flat.pop().unwrap_or_default(),
                    _ => Node::Product(flat),
                }
            }
            other => other,
        }
    }

    // ────────────────────────────────────────────────────────────────────
    //  Queries
    // ────────────────────────────────────────────────────────────────────

    /// Replaces variables by name, simultaneously.
    pub fn substitute(&self, replacements: &HashMap<String, Node>) -> Node {
        match self {
            Node::Variable(v) => replacements
                .get(&v.name)
                .cloned()
                .unwrap_or_else(|| self.clone()),
            Node::Call(..) | Node::Operator(..) | Node::Sum(_) | Node::Product(_) => self
                .clone()
                .map_children(|child| child.substitute(replacements))
                .flatten_shallow(),
            _ => self.clone(),
        }
    }

    /// Merges nested Sum/Product children into this level only.
    pub fn flatten_shallow(self) -> Node {
        let (children, sum) = match self {
            Node::Sum(c) => (c, true),
            Node::Product(c) => (c, false),
            other => return other,
        };
        let mut flat = Vec::with_capacity(children.len());
        for c in children {
            match (c, sum) {
                (Node::Sum(inner), true) | (Node::Product(inner), false) => flat.extend(inner),
                (c, _) => flat.push(c),
            }
        }
        match (flat.len(), sum) {
            (0, true) => Node::zero(),
            (0, false) => Node::one(),
            (1, _) => flat.pop().unwrap_or_default(),
            (_, true) => Node::Sum(flat),
            (_, false) => Node::Product(flat),
        }
    }

    pub fn contains_variable(&self, name: &str) -> bool {
        match self {
            Node::Variable(v) => v.name == name,
            _ => self.children().iter().any(|c| c.contains_variable(name)),
        }
    }

    /// Distinct free variables, sorted by name.
    pub fn variables(&self) -> Vec<Arc<VariableDef>> {
        fn collect(node: &Node, found: &mut BTreeMap<String, Arc<VariableDef>>) {
            if let Node::Variable(v) = node {
                found.entry(v.name.clone()).or_insert_with(|| v.clone());
            }
            for child in node.children() {
                collect(child, found);
            }
        }
        let mut found = BTreeMap::new();
        collect(self, &mut found);
        found.into_values().collect()
    }

    /// Distinct parameters in first-occurrence order.
    pub fn parameters(&self) -> Vec<Arc<ParameterDef>> {
        fn collect(node: &Node, found: &mut Vec<Arc<ParameterDef>>) {
            if let Node::Parameter(p) = node {
                if !found.iter().any(|q| q.name() == p.name()) {
                    found.push(p.clone());
                }
            }
            for child in node.children() {
                collect(child, found);
            }
        }
        let mut found = Vec::new();
        collect(self, &mut found);
        found
    }

    pub fn is_deterministic(&self) -> bool {
        self.function().map_or(true, |f| f.is_deterministic())
            && self.children().iter().all(Node::is_deterministic)
    }

    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        1 + self.children().iter().map(Node::size).sum::<usize>()
    }

    /// Infers the range of values the subtree can take.
    pub fn range(&self) -> Range {
        match self {
            Node::Number(v) => Range::of_value(*v),
            Node::Constant(c) => Range::of_value(c.value),
            Node::Variable(v) => v.range(),
            Node::Parameter(p) => p.range(),
            Node::Call(f, args) => f.range(&args.iter().map(Node::range).collect::<Vec<_>>()),
            Node::Operator(op, args) => op
                .function
                .range(&args.iter().map(Node::range).collect::<Vec<_>>()),
            Node::Sum(terms) => terms
                .iter()
                .map(Node::range)
                .reduce(|a, b| range::add(&[a, b]))
                .unwrap_or(Range::of_value(Complex64::new(0.0, 0.0))),
            Node::Product(factors) => factors
                .iter()
                .map(Node::range)
                .reduce(|a, b| range::mul(&[a, b]))
                .unwrap_or(Range::of_value(Complex64::new(1.0, 0.0))),
        }
    }

    /// Polynomial degree estimate used for canonical term ordering.
    pub fn degree(&self) -> f64 {
        match self {
            Node::Number(_) | Node::Constant(_) => 0.0,
            Node::Variable(_) | Node::Parameter(_) => 1.0,
            Node::Sum(terms) => terms.iter().map(Node::degree).fold(0.0, f64::max),
            Node::Product(factors) => factors.iter().map(Node::degree).sum(),
            _ => {
                if let Some(x) = self.as_neg() {
                    x.degree()
                } else if let Some(x) = self.as_inv() {
                    -x.degree()
                } else if let Some((base, exponent)) = self.as_pow() {
                    match exponent.as_real() {
                        Some(e) => base.degree() * e,
                        None => base.degree(),
                    }
                } else {
                    1.0
                }
            }
        }
    }

    /// Evaluates the tree directly. Unbound variables evaluate to NaN.
    pub fn evaluate(&self, values: &HashMap<String, Complex64>) -> Complex64 {
        match self {
            Node::Number(v) => *v,
            Node::Constant(c) => c.value,
            Node::Variable(v) => values
                .get(&v.name)
                .copied()
                .unwrap_or(Complex64::new(f64::NAN, f64::NAN)),
            Node::Parameter(p) => p.value(),
            Node::Sum(terms) => terms.iter().map(|t| t.evaluate(values)).sum(),
            Node::Product(factors) => factors.iter().map(|f| f.evaluate(values)).product(),
            Node::Call(f, args) => f.evaluate(&args.iter().map(|a| a.evaluate(values)).collect::<Vec<_>>()),
            Node::Operator(op, args) => op
                .function
                .evaluate(&args.iter().map(|a| a.evaluate(values)).collect::<Vec<_>>()),
        }
    }

    // ────────────────────────────────────────────────────────────────────
    //  Display
    // ────────────────────────────────────────────────────────────────────

    fn precedence(&self) -> u8 {
        match self {
            Node::Number(v) => {
                if v.re != 0.0 && v.im != 0.0 {
                    ADDITIVE
                } else if v.im != 0.0 {
                    if v.im == 1.0 {
                        ATOM
                    } else {
                        MULTIPLICATIVE
                    }
                } else if v.re.is_sign_negative() && v.re != 0.0 {
                    PREFIX
                } else {
                    ATOM
                }
            }
            Node::Constant(_) | Node::Variable(_) | Node::Parameter(_) => ATOM,
            Node::Sum(_) => ADDITIVE,
            Node::Product(_) => MULTIPLICATIVE,
            Node::Call(..) if self.as_inv().is_some() => MULTIPLICATIVE,
            Node::Call(..) => ATOM,
            Node::Operator(op, _) => op.precedence,
        }
    }
}

fn write_number(f: &mut std::fmt::Formatter<'_>, v: Complex64) -> std::fmt::Result {
    let imaginary = |f: &mut std::fmt::Formatter<'_>, im: f64| -> std::fmt::Result {
        if im == 1.0 {
            write!(f, "i")
        } else if im == -1.0 {
            write!(f, "-i")
        } else {
            write!(f, "{im}*i")
        }
    };
    if v.im == 0.0 {
        write!(f, "{}", v.re)
    } else if v.re == 0.0 {
        imaginary(f, v.im)
    } else if v.im < 0.0 {
        write!(f, "{} - ", v.re)?;
        imaginary(f, -v.im)
    } else {
        write!(f, "{} + ", v.re)?;
        imaginary(f, v.im)
    }
}

fn write_child(f: &mut std::fmt::Formatter<'_>, child: &Node, parens: bool) -> std::fmt::Result {
    if parens {
        write!(f, "({child})")
    } else {
        write!(f, "{child}")
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Node::Number(v) => write_number(f, *v),
            Node::Constant(c) => write!(f, "{}", c.name),
            Node::Variable(v) => write!(f, "{}", v.name),
            Node::Parameter(p) => write!(f, "{}", p.name()),
            Node::Call(func, args) => {
                if let Some(x) = self.as_inv() {
                    write!(f, "1/")?;
                    return write_child(f, x, x.precedence() <= MULTIPLICATIVE);
                }
                write!(f, "{}({})", func.name(), args.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(", "))
            }
            Node::Operator(op, args) => match op.fixity {
                Fixity::Prefix => {
                    write!(f, "{}", op.symbol)?;
                    write_child(f, &args[0], args[0].precedence() <= op.precedence)
                }
                Fixity::Postfix => {
                    write_child(f, &args[0], args[0].precedence() <= op.precedence)?;
                    write!(f, "{}", op.symbol)
                }
                Fixity::Infix => {
                    let (left, right) = (&args[0], &args[1]);
                    let right_assoc = op.associativity == crate::function::Associativity::Right;
                    let left_parens = left.precedence() < op.precedence
                        || (right_assoc && left.precedence() == op.precedence);
                    let right_parens = right.precedence() < op.precedence
                        || (!right_assoc && right.precedence() == op.precedence);
                    let symbol = match op.symbol.as_str() {
                        "" => "*",
                        s => s,
                    };
                    write_child(f, left, left_parens)?;
                    if op.precedence <= ADDITIVE {
                        write!(f, " {symbol} ")?;
                    } else {
                        write!(f, "{symbol}")?;
                    }
                    write_child(f, right, right_parens)
                }
            },
            Node::Sum(terms) => {
                for (k, term) in terms.iter().enumerate() {
                    if k == 0 {
                        write_child(f, term, term.precedence() < ADDITIVE)?;
                        continue;
                    }
                    if let Some(x) = term.as_neg() {
                        write!(f, " - ")?;
                        write_child(f, x, x.precedence() <= ADDITIVE)?;
                    } else if let Some(v) = term.as_real().filter(|v| *v < 0.0) {
                        write!(f, " - {}", -v)?;
                    } else {
                        write!(f, " + ")?;
                        write_child(f, term, term.precedence() <= ADDITIVE)?;
                    }
                }
                Ok(())
            }
            Node::Product(factors) => {
                let (denominators, numerators): (Vec<&Node>, Vec<&Node>) =
                    factors.iter().partition(|x| x.as_inv().is_some());
                if numerators.is_empty() {
                    write!(f, "1")?;
                }
                for (k, factor) in numerators.iter().enumerate() {
                    if k > 0 {
                        write!(f, "*")?;
                    }
                    let parens = factor.precedence() < MULTIPLICATIVE
                        || (k > 0 && factor.precedence() == MULTIPLICATIVE);
                    write_child(f, factor, parens)?;
                }
                for denominator in denominators {
                    if let Some(x) = denominator.as_inv() {
                        write!(f, "/")?;
                        write_child(f, x, x.precedence() <= MULTIPLICATIVE)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::fmt::Display for Tree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.root)
    }
}

impl Node {
    /// Structural dump, e.g. `Sum(Pow(x, 2), Product(2, x), 1)`.
    pub fn structure(&self) -> String {
        let list = |items: &[Node]| items.iter().map(Node::structure).collect::<Vec<_>>().join(", ");
        match self {
            Node::Sum(terms) => format!("Sum({})", list(terms)),
            Node::Product(factors) => format!("Product({})", list(factors)),
            Node::Call(func, args) => format!("{}({})", capitalize(func.name()), list(args)),
            Node::Operator(op, args) => format!("{}({})", capitalize(op.function.name()), list(args)),
            leaf => leaf.to_string(),
        }
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn x() -> Node {
        Node::variable("x", true)
    }

    fn y() -> Node {
        Node::variable("y", true)
    }

    #[test]
    fn test_builders_cancel() {
        // x * 1 → x
        assert_eq!(Node::product(vec![x(), Node::one()]), x());
        // x * 0 → 0
        assert_eq!(Node::product(vec![x(), Node::zero(), y()]), Node::zero());
        // x + 0 → x
        assert_eq!(Node::sum(vec![Node::zero(), x()]), x());
        // --x → x
        assert_eq!(Node::neg(Node::neg(x())), x());
        // x * -1 → -x
        assert_eq!(Node::product(vec![x(), Node::number(-1.0)]), Node::neg(x()));
        // (-x) * (-y) → x*y
        assert_eq!(
            Node::product(vec![Node::neg(x()), Node::neg(y())]),
            Node::Product(vec![x(), y()])
        );
        // 1/(1/x) → x
        assert_eq!(Node::inv(Node::inv(x())), x());
        // x^1 → x
        assert_eq!(Node::pow(x(), Node::one()), x());
    }

    #[test]
    fn test_empty_and_singleton() {
        assert_eq!(Node::Sum(vec![]).flatten(), Node::zero());
        assert_eq!(Node::Product(vec![]).flatten(), Node::one());
        assert_eq!(Node::Sum(vec![x()]).flatten(), x());
        assert_eq!(
            Node::Sum(vec![x(), Node::Sum(vec![y(), Node::one()])]).flatten(),
            Node::Sum(vec![x(), y(), Node::one()])
        );
    }

    #[test]
    fn test_display() {
        let node = Node::Sum(vec![
            Node::pow(x(), Node::number(2.0)),
            Node::Product(vec![Node::number(2.0), x()]),
            Node::one(),
        ]);
        assert_eq!(node.to_string(), "x^2 + 2*x + 1");
        let node = Node::Sum(vec![x(), Node::neg(y()), Node::number(-3.0)]);
        assert_eq!(node.to_string(), "x - y - 3");
        let node = Node::Product(vec![x(), Node::inv(Node::Sum(vec![x(), y()]))]);
        assert_eq!(node.to_string(), "x/(x + y)");
        let node = Node::pow(Node::number(-2.0), x());
        assert_eq!(node.to_string(), "(-2)^x");
        let node = Node::neg(Node::pow(x(), Node::number(2.0)));
        assert_eq!(node.to_string(), "-x^2");
    }

    #[test]
    fn test_structure() {
        let node = Node::Sum(vec![
            Node::pow(x(), Node::number(2.0)),
            Node::Product(vec![Node::number(2.0), x()]),
            Node::one(),
        ]);
        assert_eq!(node.structure(), "Sum(Pow(x, 2), Product(2, x), 1)");
    }

    #[test]
    fn test_substitute_and_evaluate() {
        let node = Node::Sum(vec![x(), Node::Product(vec![Node::number(2.0), y()])]);
        let replaced = node.substitute(&HashMap::from([("y".to_string(), Node::Sum(vec![x(), Node::one()]))]));
        assert!(!replaced.contains_variable("y"));
        let value = replaced.evaluate(&HashMap::from([("x".to_string(), Complex64::new(3.0, 0.0))]));
        assert_eq!(value, Complex64::new(11.0, 0.0));
    }

    #[test]
    fn test_equality_ignores_call_syntax() {
        let c = catalog();
        let as_op = Node::Operator(c.mul_op.clone(), vec![x(), y()]);
        let as_implicit = Node::Operator(c.implicit_mul.clone(), vec![x(), y()]);
        assert_eq!(as_op, as_implicit);
        assert_ne!(as_op, Node::Operator(c.add_op.clone(), vec![x(), y()]));
    }

    #[test]
    fn test_range_and_degree() {
        let node = Node::pow(x(), Node::number(2.0));
        assert!(Range::REAL.contains(node.range()));
        assert_eq!(node.degree(), 2.0);
        assert_eq!(Node::inv(x()).degree(), -1.0);
        assert_eq!(Node::variable("z", false).range(), Range::COMPLEX);
    }

    #[test]
    fn test_variables_sorted_unique() {
        let node = Node::Sum(vec![y(), x(), Node::Product(vec![x(), y()])]);
        let names: Vec<String> = node.variables().iter().map(|v| v.name.clone()).collect();
        assert_eq!(names, vec!["x", "y"]);
    }
}
