//! Conversion between raw parse trees and the normalized Working Tree.
//!
//! The parser produces raw trees where every `+ - * / ^ √` is its own binary or
//! unary node. The simplifier and the derivative engine work on normalized trees:
//! n-ary `Sum` and `Product` nodes, `^` as the only power, and negation and
//! inversion as flip nodes. `denormalize` re-expands a normalized tree into
//! operator form for display, so that printing and parsing it again gives back
//! the same normalized tree.
//!
//! The main entry points are `normalize` and `denormalize`, which recursively
//! traverse the tree and rebuild it bottom-up.

use crate::expr::Node;
use crate::operators::catalog::catalog;

/// Converts a raw parse tree into the normalized form.
///
/// # Arguments
/// * `node` - The raw tree, as returned by the parser
///
/// # Returns
/// The normalized tree:
/// * `a + b` becomes `Sum(a, b)` and `a - b` becomes `Sum(a, neg(b))`
/// * `a * b` and juxtaposition become `Product(a, b)`, `a / b` becomes `Product(a, inv(b))`
/// * `√a` and `sqrt(a)` become `a^0.5`
/// * nested sums and products are flattened
pub fn normalize(node: Node) -> Node {
    let node = node.map_children(normalize);
    let c = catalog();
    let Some(id) = node.function().map(|f| f.id()) else {
        // Sum and Product may already be present in inlined formula trees
        return node.flatten_shallow();
    };
    let take = |node: Node| match node {
        Node::Call(_, args) | Node::Operator(_, args) => args,
        _ => Vec::new(),
    };

    if id == c.add.id() {
        Node::Sum(take(node)).flatten_shallow()
    } else if id == c.sub.id() {
        let mut args = take(node);
        let b = args.pop().unwrap_or_default();
        args.push(Node::neg(b));
        Node::Sum(args).flatten_shallow()
    } else if id == c.mul.id() {
        Node::Product(take(node)).flatten_shallow()
    } else if id == c.div.id() {
        let mut args = take(node);
        let b = args.pop().unwrap_or_default();
        args.push(Node::inv(b));
        Node::Product(args).flatten_shallow()
    } else if id == c.sqrt.id() {
        let a = take(node).pop().unwrap_or_default();
        Node::Operator(c.pow_op.clone(), vec![a, Node::number(0.5)])
    } else if id == c.pow.id() {
        Node::Operator(c.pow_op.clone(), take(node))
    } else if id == c.neg.id() {
        Node::neg(take(node).pop().unwrap_or_default())
    } else if id == c.inv.id() {
        Node::inv(take(node).pop().unwrap_or_default())
    } else {
        node
    }
}

/// Converts a normalized tree back into operator form for display.
///
/// # Arguments
/// * `node` - A normalized tree
///
/// # Returns
/// A raw tree using the binary operators:
/// * `Sum(a, neg(b), c)` becomes `a - b + c`
/// * `Product(a, inv(b))` becomes `a / b`
/// * `a^0.5` becomes `sqrt(a)`
pub fn denormalize(node: &Node) -> Node {
    let c = catalog();
    match node {
        Node::Sum(terms) => {
            let mut iter = terms.iter();
            let first = iter.next().map(denormalize).unwrap_or_else(Node::zero);
            iter.fold(first, |acc, term| {
                if let Some(x) = term.as_neg() {
                    // subtraction instead of adding a negation
                    Node::Operator(c.sub_op.clone(), vec![acc, denormalize(x)])
                } else if let Some(v) = term.as_real().filter(|v| *v < 0.0) {
                    Node::Operator(c.sub_op.clone(), vec![acc, Node::number(-v)])
                } else if let Some(x) = negated_product(term) {
                    Node::Operator(c.sub_op.clone(), vec![acc, denormalize(&x)])
                } else {
                    Node::Operator(c.add_op.clone(), vec![acc, denormalize(term)])
                }
            })
        }
        Node::Product(factors) => {
            let (denominators, numerators): (Vec<&Node>, Vec<&Node>) =
                factors.iter().partition(|f| f.as_inv().is_some());
            let mut iter = numerators.into_iter();
            let first = iter.next().map(denormalize).unwrap_or_else(Node::one);
            let numerator = iter.fold(first, |acc, factor| {
                Node::Operator(c.mul_op.clone(), vec![acc, denormalize(factor)])
            });
            denominators
                .into_iter()
                .filter_map(Node::as_inv)
                .fold(numerator, |acc, x| {
                    Node::Operator(c.div_op.clone(), vec![acc, denormalize(x)])
                })
        }
        _ => {
            if let Some((base, exponent)) = node.as_pow() {
                if exponent.as_real() == Some(0.5) {
                    return Node::Call(c.sqrt.clone(), vec![denormalize(base)]);
                }
            }
            if let Some(x) = node.as_inv() {
                // a lone inversion outside a product
                return Node::Operator(c.div_op.clone(), vec![Node::one(), denormalize(x)]);
            }
            node.clone().map_children(|child| denormalize(&child))
        }
    }
}

/// `Product(-k, rest..)` as `Product(k, rest..)`, or `None` unless the leading
/// factor is a negative real.
fn negated_product(term: &Node) -> Option<Node> {
    let Node::Product(factors) = term else {
        return None;
    };
    let (first, rest) = factors.split_first()?;
    let v = first.as_real().filter(|v| *v < 0.0)?;
    let mut factors = rest.to_vec();
    if v != -1.0 {
        factors.insert(0, Node::number(-v));
    }
    Some(match factors.len() {
        0 => Node::one(),
        1 => factors.swap_remove(0),
        _ => Node::Product(factors),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use crate::parser::parse;

    fn namespace() -> Namespace {
        let mut ns = Namespace::builtins();
        ns.add_variable("x", true).unwrap();
        ns.add_variable("y", true).unwrap();
        ns
    }

    fn normalized(text: &str) -> Node {
        normalize(parse(text, &namespace()).unwrap())
    }

    #[test]
    fn test_normalize_polynomial() {
        let node = normalized("x^2 + 2*x + 1");
        assert_eq!(node.structure(), "Sum(Pow(x, 2), Product(2, x), 1)");
    }

    #[test]
    fn test_normalize_subtraction_and_division() {
        let node = normalized("x - y/2");
        assert_eq!(node.structure(), "Sum(x, Neg(Product(y, Inv(2))))");
        let node = normalized("x*y*2x");
        assert_eq!(node.structure(), "Product(x, y, 2, x)");
    }

    #[test]
    fn test_normalize_roots() {
        assert_eq!(normalized("√x").structure(), "Pow(x, 0.5)");
        assert_eq!(normalized("sqrt(x + 1)").structure(), "Pow(Sum(x, 1), 0.5)");
    }

    #[test]
    fn test_normalize_keeps_calls() {
        assert_eq!(normalized("sin(x - 1)").structure(), "Sin(Sum(x, -1))");
        assert_eq!(normalized("-(-x)").structure(), "x");
    }

    #[test]
    fn test_denormalize_display() {
        let ns = namespace();
        for (text, printed) in [
            ("x - y", "x - y"),
            ("x/y", "x/y"),
            ("sqrt(x)", "sqrt(x)"),
            ("x - 3", "x - 3"),
            ("2*x/(x + y)", "2*x/(x + y)"),
            ("x^2 + 2*x + 1", "x^2 + 2*x + 1"),
        ] {
            let node = normalize(parse(text, &ns).unwrap());
            assert_eq!(denormalize(&node).to_string(), printed, "{text}");
        }
    }

    #[test]
    fn test_denormalize_negative_coefficients() {
        let x = Node::variable("x", true);
        let y = Node::variable("y", true);
        let sum = Node::Sum(vec![
            x.clone(),
            Node::Product(vec![Node::number(-2.0), y.clone()]),
            Node::Product(vec![Node::number(-1.0), x.clone(), y.clone()]),
            Node::Product(vec![Node::number(-0.5)]),
        ]);
        assert_eq!(denormalize(&sum).to_string(), "x - 2*y - x*y - 0.5");

        let ns = namespace();
        let node = Node::Sum(vec![Node::one(), Node::Product(vec![Node::number(-3.0), x])]);
        let printed = denormalize(&node).to_string();
        assert_eq!(printed, "1 - 3*x");
        assert_eq!(normalize(parse(&printed, &ns).unwrap()).structure(), "Sum(1, Neg(Product(3, x)))");
    }

    #[test]
    fn test_round_trip_through_text() {
        let ns = namespace();
        for text in ["x - y + 1", "(x + 1)/(y - 2)", "sin(x)^2 - √y", "-x^2", "2^-x"] {
            let first = normalize(parse(text, &ns).unwrap());
            let printed = denormalize(&first).to_string();
            let second = normalize(parse(&printed, &ns).unwrap());
            assert_eq!(first, second, "{text} printed as {printed}");
        }
    }
}
