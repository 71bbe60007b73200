//! The built-in function catalog and operator table.
//!
//! Built-in definitions are created once per process so that every namespace,
//! the simplifier and the derivative engine agree on the same [`FunctionId`]s.

use std::sync::{Arc, OnceLock};

use num_complex::Complex64;

use crate::element::Element;
use crate::function::{Associativity, Fixity, FunctionDef, FunctionId, OperatorDef};
use crate::operators::{arithmetic, complex, exp, ln, pow, random, sqrt, trigonometric};

pub const ADDITIVE: u8 = 10;
pub const MULTIPLICATIVE: u8 = 20;
pub const IMPLICIT: u8 = 25;
pub const PREFIX: u8 = 30;
/// A function name applied without parentheses, as in `sin x`.
pub const APPLICATION: u8 = 35;
pub const POWER: u8 = 40;
pub const POSTFIX: u8 = 50;

/// Handles to every built-in definition.
#[derive(Debug)]
pub struct Catalog {
    pub add: Arc<FunctionDef>,
    pub sub: Arc<FunctionDef>,
    pub mul: Arc<FunctionDef>,
    pub div: Arc<FunctionDef>,
    pub pow: Arc<FunctionDef>,
    pub neg: Arc<FunctionDef>,
    pub inv: Arc<FunctionDef>,
    pub copy: Arc<FunctionDef>,
    pub sqrt: Arc<FunctionDef>,
    pub exp: Arc<FunctionDef>,
    pub ln: Arc<FunctionDef>,
    pub sin: Arc<FunctionDef>,
    pub cos: Arc<FunctionDef>,
    pub tan: Arc<FunctionDef>,
    pub abs: Arc<FunctionDef>,
    pub re: Arc<FunctionDef>,
    pub im: Arc<FunctionDef>,
    pub conj: Arc<FunctionDef>,
    pub arg: Arc<FunctionDef>,
    pub random: Arc<FunctionDef>,

    pub add_op: Arc<OperatorDef>,
    pub sub_op: Arc<OperatorDef>,
    pub mul_op: Arc<OperatorDef>,
    pub div_op: Arc<OperatorDef>,
    pub pow_op: Arc<OperatorDef>,
    pub neg_op: Arc<OperatorDef>,
    pub root_op: Arc<OperatorDef>,
    /// The synthetic operator inserted between juxtaposed operands.
    pub implicit_mul: Arc<OperatorDef>,
}

impl Catalog {
    fn new() -> Self {
        let add = arithmetic::add();
        let sub = arithmetic::sub();
        let mul = arithmetic::mul();
        let div = arithmetic::div();
        let pow = pow::pow();
        let neg = arithmetic::neg();
        let sqrt = sqrt::sqrt();
        Self {
            add_op: OperatorDef::new("+", add.clone(), ADDITIVE, Associativity::Left, Fixity::Infix),
            sub_op: OperatorDef::new("-", sub.clone(), ADDITIVE, Associativity::Left, Fixity::Infix),
            mul_op: OperatorDef::new("*", mul.clone(), MULTIPLICATIVE, Associativity::Left, Fixity::Infix),
            div_op: OperatorDef::new("/", div.clone(), MULTIPLICATIVE, Associativity::Left, Fixity::Infix),
            pow_op: OperatorDef::new("^", pow.clone(), POWER, Associativity::Right, Fixity::Infix),
            neg_op: OperatorDef::new("-", neg.clone(), PREFIX, Associativity::Right, Fixity::Prefix),
            root_op: OperatorDef::new("√", sqrt.clone(), PREFIX, Associativity::Right, Fixity::Prefix),
            implicit_mul: OperatorDef::new("", mul.clone(), IMPLICIT, Associativity::Left, Fixity::Infix),
            add,
            sub,
            mul,
            div,
            pow,
            neg,
            inv: arithmetic::inv(),
            copy: arithmetic::copy(),
            sqrt,
            exp: exp::exp(),
            ln: ln::ln(),
            sin: trigonometric::sin(),
            cos: trigonometric::cos(),
            tan: trigonometric::tan(),
            abs: complex::abs(),
            re: complex::re(),
            im: complex::im(),
            conj: complex::conj(),
            arg: complex::arg(),
            random: random::random(),
        }
    }

    /// Every built-in function definition.
    pub fn functions(&self) -> Vec<Arc<FunctionDef>> {
        vec![
            self.add.clone(),
            self.sub.clone(),
            self.mul.clone(),
            self.div.clone(),
            self.pow.clone(),
            self.neg.clone(),
            self.inv.clone(),
            self.copy.clone(),
            self.sqrt.clone(),
            self.exp.clone(),
            self.ln.clone(),
            self.sin.clone(),
            self.cos.clone(),
            self.tan.clone(),
            self.abs.clone(),
            self.re.clone(),
            self.im.clone(),
            self.conj.clone(),
            self.arg.clone(),
            self.random.clone(),
        ]
    }

    /// The elements of a fresh built-in namespace.
    ///
    /// The arithmetic functions are reachable through their operators only;
    /// everything else is also callable by name.
    pub fn elements(&self) -> Vec<Element> {
        let mut elements = vec![
            Element::operator(self.add_op.clone()),
            Element::operator(self.sub_op.clone()),
            Element::operator(self.mul_op.clone()),
            Element::operator(self.div_op.clone()),
            Element::operator(self.pow_op.clone()),
            Element::operator(self.neg_op.clone()),
            Element::operator(self.root_op.clone()),
        ];
        for function in [
            &self.inv,
            &self.sqrt,
            &self.exp,
            &self.ln,
            &self.sin,
            &self.cos,
            &self.tan,
            &self.abs,
            &self.re,
            &self.im,
            &self.conj,
            &self.arg,
            &self.random,
        ] {
            elements.push(Element::function(function.clone()));
        }
        elements.push(Element::alias("log", "ln", 1));
        elements.push(Element::alias("pow", "^", 2));
        elements.push(Element::constant("pi", Complex64::new(std::f64::consts::PI, 0.0)));
        elements.push(Element::alias("π", "pi", 0));
        elements.push(Element::constant("e", Complex64::new(std::f64::consts::E, 0.0)));
        elements.push(Element::constant("i", Complex64::new(0.0, 1.0)));
        elements
    }

    pub fn is_neg(&self, id: FunctionId) -> bool {
        id == self.neg.id()
    }

    pub fn is_inv(&self, id: FunctionId) -> bool {
        id == self.inv.id()
    }

    pub fn is_pow(&self, id: FunctionId) -> bool {
        id == self.pow.id()
    }
}

/// The process-wide built-in catalog.
pub fn catalog() -> &'static Catalog {
    static CATALOG: OnceLock<Catalog> = OnceLock::new();
    CATALOG.get_or_init(Catalog::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_shared() {
        assert_eq!(catalog().sin.id(), catalog().sin.id());
        assert!(std::ptr::eq(catalog(), catalog()));
    }

    #[test]
    fn test_operator_precedence_order() {
        let c = catalog();
        assert!(c.add_op.precedence < c.mul_op.precedence);
        assert!(c.mul_op.precedence < c.implicit_mul.precedence);
        assert!(c.implicit_mul.precedence < c.neg_op.precedence);
        assert!(c.neg_op.precedence < c.pow_op.precedence);
        assert_eq!(c.pow_op.associativity, Associativity::Right);
    }

    #[test]
    fn test_flip_predicates() {
        let c = catalog();
        assert!(c.is_neg(c.neg.id()));
        assert!(c.is_inv(c.inv.id()));
        assert!(!c.is_neg(c.sub.id()));
    }
}
