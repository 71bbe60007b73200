//! The combination table: algebraic shortcuts for `f(g(x))`.
//!
//! For an outer unary function `f` and an inner unary function `g`, the table
//! records how the composition collapses. Most entries are derived from the
//! [`Algebra`](crate::function::Algebra) flags of each function; the rest come
//! from the pairs a definition declares explicitly.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use num_complex::Complex64;

use crate::expr::Node;
use crate::function::{FunctionDef, FunctionId};
use crate::operators::catalog::catalog;

/// How `f(g(x))` simplifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Combination {
    /// `f(g(x)) = g(f(x))`
    Commutes,
    /// `f(g(x)) = x`
    Inverse,
    /// `f(g(x)) = f(x)`
    AbsorbsInner,
    /// `f(g(x)) = g(x)`
    AbsorbedByInner,
    /// `f(g(x)) = 0`
    Zero,
    /// `f(g(x)) = 1`
    One,
}

/// Table of combinations keyed by (outer, inner) function id.
#[derive(Debug, Clone, Default)]
pub struct CombinationTable {
    entries: HashMap<(FunctionId, FunctionId), Combination>,
}

impl CombinationTable {
    /// Builds the table for a set of functions.
    ///
    /// Derived entries, for every unary `f`:
    /// - involution: `f(f(x)) = x`
    /// - idempotent: `f(f(x)) = f(x)`
    /// - annihilating: `f(f(x)) = 0`
    /// - additive or linear: `f(-x) = -f(x)`
    /// - multiplicative: `f(1/x) = 1/f(x)`, and `f(-x)` is `f(x)` or `-f(x)`
    ///   depending on `f(-1)`
    ///
    /// Explicitly declared pairs take precedence over derived entries.
    pub fn from_functions(functions: &[Arc<FunctionDef>]) -> Self {
        let neg = catalog().neg.id();
        let inv = catalog().inv.id();
        let mut entries = HashMap::new();

        for f in functions.iter().filter(|f| f.arity() == 1) {
            let algebra = f.algebra();
            let id = f.id();
            if algebra.involution {
                entries.insert((id, id), Combination::Inverse);
            } else if algebra.annihilating {
                entries.insert((id, id), Combination::Zero);
            } else if algebra.idempotent {
                entries.insert((id, id), Combination::AbsorbedByInner);
            }
            if algebra.additive || algebra.linear {
                entries.entry((id, neg)).or_insert(Combination::Commutes);
            }
            if algebra.multiplicative {
                entries.entry((id, inv)).or_insert(Combination::Commutes);
                let at_minus_one = f.evaluate(&[Complex64::new(-1.0, 0.0)]);
                if at_minus_one == Complex64::new(1.0, 0.0) {
                    entries.entry((id, neg)).or_insert(Combination::AbsorbsInner);
                } else if at_minus_one == Complex64::new(-1.0, 0.0) {
                    entries.entry((id, neg)).or_insert(Combination::Commutes);
                }
            }
        }

        for f in functions {
            for (inner_name, combination) in f.pairs() {
                if let Some(inner) = functions.iter().find(|g| g.name() == inner_name) {
                    entries.insert((f.id(), inner.id()), *combination);
                }
            }
        }

        Self { entries }
    }

    pub fn get(&self, outer: FunctionId, inner: FunctionId) -> Option<Combination> {
        self.entries.get(&(outer, inner)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Simplifies `node` if it is a unary call of a unary call with a table entry.
    pub fn apply(&self, node: &Node) -> Option<Node> {
        let outer = node.function().filter(|f| f.arity() == 1)?;
        let inner_node = &node.children()[0];
        let inner = inner_node.function().filter(|g| g.arity() == 1)?;
        let x = &inner_node.children()[0];
        let result = match self.get(outer.id(), inner.id())? {
            Combination::Inverse => x.clone(),
            Combination::AbsorbsInner => with_argument(node, x.clone()),
            Combination::AbsorbedByInner => inner_node.clone(),
            Combination::Zero => Node::zero(),
            Combination::One => Node::one(),
            Combination::Commutes => with_argument(inner_node, with_argument(node, x.clone())),
        };
        Some(result)
    }
}

/// `template`'s callee applied to `argument`.
fn with_argument(template: &Node, argument: Node) -> Node {
    match template {
        _ if template.as_neg().is_some() => Node::neg(argument),
        _ if template.as_inv().is_some() => Node::inv(argument),
        Node::Operator(op, _) => Node::Operator(op.clone(), vec![argument]),
        Node::Call(f, _) => Node::Call(f.clone(), vec![argument]),
        other => other.clone(),
    }
}

/// The table over the built-in catalog.
pub fn builtin_table() -> &'static CombinationTable {
    static TABLE: OnceLock<CombinationTable> = OnceLock::new();
    TABLE.get_or_init(|| CombinationTable::from_functions(&catalog().functions()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(f: &Arc<FunctionDef>, x: Node) -> Node {
        Node::Call(f.clone(), vec![x])
    }

    fn z() -> Node {
        Node::variable("z", false)
    }

    #[test]
    fn test_derived_entries() {
        let c = catalog();
        let table = builtin_table();
        assert_eq!(table.get(c.neg.id(), c.neg.id()), Some(Combination::Inverse));
        assert_eq!(table.get(c.conj.id(), c.conj.id()), Some(Combination::Inverse));
        assert_eq!(table.get(c.abs.id(), c.abs.id()), Some(Combination::AbsorbedByInner));
        assert_eq!(table.get(c.im.id(), c.im.id()), Some(Combination::Zero));
        assert_eq!(table.get(c.abs.id(), c.neg.id()), Some(Combination::AbsorbsInner));
        assert_eq!(table.get(c.re.id(), c.neg.id()), Some(Combination::Commutes));
        assert_eq!(table.get(c.inv.id(), c.neg.id()), Some(Combination::Commutes));
        assert_eq!(table.get(c.neg.id(), c.inv.id()), None);
    }

    #[test]
    fn test_declared_pairs() {
        let c = catalog();
        let table = builtin_table();
        assert_eq!(table.get(c.re.id(), c.im.id()), Some(Combination::AbsorbedByInner));
        assert_eq!(table.get(c.im.id(), c.re.id()), Some(Combination::Zero));
        assert_eq!(table.get(c.exp.id(), c.ln.id()), Some(Combination::Inverse));
    }

    #[test]
    fn test_apply() {
        let c = catalog();
        let table = builtin_table();
        assert_eq!(table.apply(&call(&c.exp, call(&c.ln, z()))), Some(z()));
        assert_eq!(table.apply(&call(&c.re, call(&c.im, z()))), Some(call(&c.im, z())));
        assert_eq!(table.apply(&call(&c.im, call(&c.re, z()))), Some(Node::zero()));
        assert_eq!(table.apply(&call(&c.abs, Node::neg(z()))), Some(call(&c.abs, z())));
        assert_eq!(table.apply(&call(&c.re, Node::neg(z()))), Some(Node::neg(call(&c.re, z()))));
        assert_eq!(table.apply(&call(&c.sin, z())), None);
    }
}
