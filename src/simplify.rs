//! Algebraic simplification of normalized Working Trees.
//!
//! The simplifier runs bottom-up passes over a normalized tree until the tree
//! stops changing or the configured pass limit is reached. At every node it:
//!
//! - folds deterministic calls over numbers, unless the result is "uglier" than
//!   the inputs (`1/3` stays a fraction, `sqrt(2)` stays a root)
//! - merges like terms of a `Sum` by coefficient and base (`x + 2x` → `3x`)
//! - merges like factors of a `Product` by summing exponents (`x*x^2` → `x^3`)
//!   and collects numeric factors into one reduced rational coefficient
//! - orders terms canonically: sums by descending degree with the constant last,
//!   products with the coefficient first and divisors last
//! - rewrites powers (`(x^a)^n`, `(-x)^n`, `(x*y)^n` for integer `n`)
//! - applies the combination table and the rewrite rules

use log::trace;
use num_complex::Complex64;

use crate::combination::{builtin_table, CombinationTable};
use crate::config::EngineConfig;
use crate::expr::Node;
use crate::rules::RuleSet;

/// Upper bound on rewrites of a single node within one pass.
const LOCAL_ITERATIONS: usize = 8;

const ONE: Complex64 = Complex64::new(1.0, 0.0);

/// Rates how complicated a number looks when printed.
///
/// # Returns
/// * `0` for integers
/// * `1` for short terminating decimals such as `0.25`
/// * `2` for fractions with a small denominator such as `1/3`
/// * `3` for anything else (`sqrt(2)`, `pi`)
/// * `4` for NaN and infinities
///
/// Complex numbers take the worse rating of their two parts.
pub fn ugliness(value: Complex64) -> u8 {
    fn real(x: f64) -> u8 {
        if !x.is_finite() {
            4
        } else if x.fract() == 0.0 {
            0
        } else if is_short_decimal(x) {
            1
        } else if (2..=1000).any(|q| is_whole(x * q as f64)) {
            2
        } else {
            3
        }
    }
    real(value.re).max(real(value.im))
}

fn is_whole(x: f64) -> bool {
    (x - x.round()).abs() <= 1e-9 * x.abs().max(1.0)
}

fn is_short_decimal(x: f64) -> bool {
    is_whole(x * 1e6)
}

/// True if replacing `inputs` by `result` does not make the tree uglier.
fn fold_allowed(result: Complex64, inputs: impl IntoIterator<Item = Complex64>) -> bool {
    let limit = inputs.into_iter().map(ugliness).max().unwrap_or(0);
    ugliness(result) <= limit
}

fn as_integer(x: f64) -> Option<i64> {
    (x.fract() == 0.0 && x.abs() < 9.0e15).then_some(x as i64)
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

/// Splits a factor into base and exponent: `x^e` → `(x, e)`, `1/x` → `(x, -1)`.
fn split_power(factor: Node) -> (Node, Node) {
    if factor.as_pow().is_some() {
        let mut args = factor.into_children();
        let exponent = args.pop().unwrap_or_default();
        let base = args.pop().unwrap_or_default();
        return (base, exponent);
    }
    if factor.as_inv().is_some() {
        let (base, exponent) = split_power(factor.into_only_child());
        return (base, Node::neg(exponent));
    }
    (factor, Node::one())
}

/// Rebuilds `base^(e1 + e2 + ...)`. Returns `None` for a zero exponent.
fn rebuild_power(base: Node, exponents: Vec<Node>) -> Option<Node> {
    let exponent = if exponents.iter().all(|e| e.as_number().is_some()) {
        Node::Number(exponents.iter().filter_map(Node::as_number).sum())
    } else {
        Node::sum(exponents)
    };
    if exponent.is_zero() {
        return None;
    }
    if let Some(e) = exponent.as_real().filter(|e| *e < 0.0) {
        return Some(Node::inv(Node::pow(base, Node::number(-e))));
    }
    Some(Node::pow(base, exponent))
}

/// Splits a term into numeric coefficient and base: `3*x*y` → `(3, x*y)`.
fn split_coefficient(term: Node) -> (Complex64, Node) {
    match term {
        Node::Product(factors) if factors.iter().any(|f| f.as_number().is_some()) => {
            let (numbers, mut rest): (Vec<Node>, Vec<Node>) =
                factors.into_iter().partition(|f| f.as_number().is_some());
            if rest.is_empty() {
                return (ONE, Node::Product(numbers));
            }
            let coefficient = numbers.iter().filter_map(Node::as_number).product();
            let base = if rest.len() == 1 {
                rest.pop().unwrap_or_default()
            } else {
                Node::Product(rest)
            };
            (coefficient, base)
        }
        term => (ONE, term),
    }
}

fn rebuild_term(base: Node, coefficient: Complex64) -> Option<Node> {
    if coefficient == Complex64::new(0.0, 0.0) {
        None
    } else if coefficient == ONE {
        Some(base)
    } else if coefficient == -ONE {
        Some(Node::neg(base))
    } else {
        Some(Node::product(vec![Node::Number(coefficient), base]))
    }
}

/// Sort key of a product factor: numbers, constants, parameters, variables,
/// other calls, then divisors; ties broken by printed form.
fn factor_key(factor: &Node) -> (u8, String, String) {
    if factor.as_number().is_some() {
        return (0, String::new(), String::new());
    }
    let (inner, bias) = match factor.as_inv() {
        Some(x) => (x, 5),
        None => (factor, 0),
    };
    let base = inner.as_pow().map_or(inner, |(b, _)| b);
    let rank = match base {
        Node::Number(_) | Node::Constant(_) => 1,
        Node::Parameter(_) => 2,
        Node::Variable(_) => 3,
        _ => 4,
    };
    (rank + bias, base.to_string(), factor.to_string())
}

/// Orders sum terms by descending degree, with plain numbers last.
fn sort_terms(terms: &mut [Node]) {
    terms.sort_by(|a, b| {
        let (na, nb) = (a.as_number().is_some(), b.as_number().is_some());
        na.cmp(&nb).then_with(|| b.degree().total_cmp(&a.degree()))
    });
}

/// Rewrites normalized trees into a simpler canonical form.
///
/// # Example
/// ```
/// # use mathexpr_vm::config::EngineConfig;
/// # use mathexpr_vm::convert::normalize;
/// # use mathexpr_vm::namespace::Namespace;
/// # use mathexpr_vm::parser::parse;
/// # use mathexpr_vm::simplify::Simplifier;
/// let mut ns = Namespace::builtins();
/// ns.add_variable("x", true).unwrap();
/// let tree = normalize(parse("x + x + 2*x", &ns).unwrap());
/// let config = EngineConfig::default();
/// let simplified = Simplifier::new(&config).simplify(tree);
/// assert_eq!(simplified.to_string(), "4*x");
/// ```
#[derive(Debug, Clone)]
pub struct Simplifier<'a> {
    table: &'a CombinationTable,
    rules: Vec<&'a RuleSet>,
    passes: usize,
    max_terms: usize,
}

impl<'a> Simplifier<'a> {
    /// Creates a simplifier with the built-in combination table, and the
    /// built-in rules if the configuration enables them.
    pub fn new(config: &EngineConfig) -> Self {
        let mut rules = Vec::new();
        if config.builtin_rules {
            rules.push(RuleSet::builtin());
        }
        Self {
            table: builtin_table(),
            rules,
            passes: config.simplify_passes,
            max_terms: config.max_commutative_terms,
        }
    }

    /// Adds a user rule set, tried after the ones already present.
    pub fn with_rules(mut self, rules: &'a RuleSet) -> Self {
        self.rules.push(rules);
        self
    }

    pub fn with_table(mut self, table: &'a CombinationTable) -> Self {
        self.table = table;
        self
    }

    pub fn with_passes(mut self, passes: usize) -> Self {
        self.passes = passes;
        self
    }

    /// Simplifies `node` until it reaches a fixed point or the pass limit.
    ///
    /// # Arguments
    /// * `node` - A normalized tree
    ///
    /// # Returns
    /// The simplified tree. Its value equals the input's value wherever both
    /// are defined.
    pub fn simplify(&self, node: Node) -> Node {
        let mut current = node;
        for pass in 0..self.passes {
            let next = self.pass(current.clone());
            if next == current {
                trace!("fixed point after {pass} passes: {next}");
                return next;
            }
            trace!("pass {pass}: {next}");
            current = next;
        }
        current
    }

    fn pass(&self, node: Node) -> Node {
        let node = node.map_children(|child| self.pass(child));
        self.simplify_node(node)
    }

    fn simplify_node(&self, node: Node) -> Node {
        let mut current = node;
        for _ in 0..LOCAL_ITERATIONS {
            let next = self.rewrite(current.clone());
            if next == current {
                break;
            }
            current = next;
        }
        current
    }

    fn rewrite(&self, node: Node) -> Node {
        let node = match node {
            Node::Sum(terms) => self.merge_sum(terms),
            Node::Product(factors) => self.merge_product(factors),
            other => self.rewrite_call(other),
        };
        if let Some(result) = self.table.apply(&node) {
            return result;
        }
        for rules in &self.rules {
            if let Some(result) = rules.apply(&node, self.max_terms) {
                trace!("rule: {node} → {result}");
                return result;
            }
        }
        node
    }

    fn merge_sum(&self, terms: Vec<Node>) -> Node {
        let mut numbers: Vec<Complex64> = Vec::new();
        let mut groups: Vec<(Node, Complex64)> = Vec::new();
        let mut pending: Vec<(Complex64, Node)> = terms.into_iter().rev().map(|t| (ONE, t)).collect();

        while let Some((sign, term)) = pending.pop() {
            match term {
                Node::Sum(inner) => pending.extend(inner.into_iter().rev().map(|t| (sign, t))),
                Node::Number(v) => numbers.push(sign * v),
                t if t.as_neg().is_some() => pending.push((-sign, t.into_only_child())),
                t => {
                    let (coefficient, base) = split_coefficient(t);
                    let coefficient = sign * coefficient;
                    match groups.iter_mut().find(|(b, _)| *b == base) {
                        Some((_, total)) => *total += coefficient,
                        None => groups.push((base, coefficient)),
                    }
                }
            }
        }

        let mut out: Vec<Node> = groups
            .into_iter()
            .filter_map(|(base, coefficient)| rebuild_term(base, coefficient))
            .collect();
        let total: Complex64 = numbers.iter().sum();
        if numbers.len() <= 1 || fold_allowed(total, numbers.iter().copied()) {
            out.push(Node::Number(total));
        } else {
            out.extend(numbers.into_iter().map(Node::Number));
        }
        sort_terms(&mut out);
        Node::sum(out)
    }

    fn merge_product(&self, factors: Vec<Node>) -> Node {
        let mut negative = false;
        let mut numbers: Vec<Complex64> = Vec::new();
        let mut divisors: Vec<f64> = Vec::new();
        let mut groups: Vec<(Node, Vec<Node>)> = Vec::new();
        let mut pending: Vec<Node> = factors.into_iter().rev().collect();

        while let Some(factor) = pending.pop() {
            match factor {
                Node::Product(inner) => pending.extend(inner.into_iter().rev()),
                Node::Number(v) => numbers.push(v),
                f if f.as_neg().is_some() => {
                    negative = !negative;
                    pending.push(f.into_only_child());
                }
                f => {
                    let divisor = f
                        .as_inv()
                        .and_then(Node::as_real)
                        .filter(|d| *d != 0.0 && d.is_finite());
                    if let Some(d) = divisor {
                        divisors.push(d);
                        continue;
                    }
                    let (base, exponent) = split_power(f);
                    match groups.iter_mut().find(|(b, _)| *b == base) {
                        Some((_, exponents)) => exponents.push(exponent),
                        None => groups.push((base, vec![exponent])),
                    }
                }
            }
        }

        let mut out: Vec<Node> = Vec::new();

        // numerator
        let product: Complex64 = numbers.iter().product();
        let mut p = ONE;
        if numbers.len() <= 1 || fold_allowed(product, numbers.iter().copied()) {
            p = product;
        } else {
            out.extend(numbers.iter().map(|v| Node::Number(*v)));
        }
        if negative {
            p = -p;
        }
        if p == Complex64::new(0.0, 0.0) {
            return Node::zero();
        }

        // denominator
        let mut q: f64 = divisors.iter().product();
        if divisors.len() > 1
            && !fold_allowed(
                Complex64::new(q, 0.0),
                divisors.iter().map(|d| Complex64::new(*d, 0.0)),
            )
        {
            out.extend(divisors.iter().map(|d| Node::inv(Node::number(*d))));
            q = 1.0;
        }
        if q != 1.0 && p.im == 0.0 {
            if let (Some(a), Some(b)) = (as_integer(p.re), as_integer(q)) {
                let g = gcd(a, b);
                if g > 1 {
                    p.re /= g as f64;
                    q /= g as f64;
                }
            }
            if q < 0.0 {
                p = -p;
                q = -q;
            }
            let ratio = Complex64::new(p.re / q, 0.0);
            if fold_allowed(ratio, [p, Complex64::new(q, 0.0)]) {
                p = ratio;
                q = 1.0;
            }
        }

        if p != ONE {
            out.push(Node::Number(p));
        }
        if q != 1.0 {
            out.push(Node::inv(Node::number(q)));
        }
        for (base, exponents) in groups {
            out.extend(rebuild_power(base, exponents));
        }
        out.sort_by_cached_key(factor_key);
        Node::product(out)
    }

    fn rewrite_call(&self, node: Node) -> Node {
        if let Some(f) = node.function().filter(|f| f.is_deterministic()) {
            let args: Option<Vec<Complex64>> = node.children().iter().map(Node::as_number).collect();
            if let Some(args) = args.filter(|a| !a.is_empty()) {
                let value = f.evaluate(&args);
                if fold_allowed(value, args.iter().copied()) {
                    return Node::Number(value);
                }
            }
        }
        if let Some(x) = node.as_neg() {
            match x {
                Node::Sum(terms) => return Node::sum(terms.iter().cloned().map(Node::neg).collect()),
                Node::Product(factors) if factors.iter().any(|f| f.as_number().is_some()) => {
                    let mut flipped = false;
                    let factors = factors
                        .iter()
                        .map(|f| match f {
                            Node::Number(v) if !flipped => {
                                flipped = true;
                                Node::Number(-v)
                            }
                            other => other.clone(),
                        })
                        .collect();
                    return Node::product(factors);
                }
                _ => {}
            }
        }
        if let Some((base, exponent)) = node.as_pow() {
            if let Some(result) = self.rewrite_pow(base, exponent) {
                return result;
            }
        }
        node
    }

    fn rewrite_pow(&self, base: &Node, exponent: &Node) -> Option<Node> {
        if exponent.is_one() {
            return Some(base.clone());
        }
        if exponent.is_zero() || base.is_one() {
            return Some(Node::one());
        }
        let n = exponent.as_real().filter(|e| e.fract() == 0.0)?;

        if let Some((inner_base, inner_exponent)) = base.as_pow() {
            let combined = match inner_exponent.as_number() {
                Some(a) => Node::Number(a * n),
                None => Node::product(vec![Node::number(n), inner_exponent.clone()]),
            };
            return Some(Node::pow(inner_base.clone(), combined));
        }
        if let Some(x) = base.as_neg() {
            let power = Node::pow(x.clone(), exponent.clone());
            return Some(if n % 2.0 == 0.0 { power } else { Node::neg(power) });
        }
        if let Some(x) = base.as_inv() {
            return Some(Node::inv(Node::pow(x.clone(), exponent.clone())));
        }
        if let Node::Product(factors) = base {
            return Some(Node::product(
                factors
                    .iter()
                    .map(|f| Node::pow(f.clone(), exponent.clone()))
                    .collect(),
            ));
        }
        None
    }
}

/// Simplifies `node` with the built-in table and rules.
pub fn simplify(node: Node, config: &EngineConfig) -> Node {
    Simplifier::new(config).simplify(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::normalize;
    use crate::namespace::Namespace;
    use crate::parser::parse;

    fn namespace() -> Namespace {
        let mut ns = Namespace::builtins();
        ns.add_variable("x", true).unwrap();
        ns.add_variable("y", true).unwrap();
        ns.add_variable("z", false).unwrap();
        ns
    }

    fn simplified(text: &str) -> Node {
        let node = normalize(parse(text, &namespace()).unwrap());
        simplify(node, &EngineConfig::default())
    }

    #[test]
    fn test_ugliness() {
        assert_eq!(ugliness(Complex64::new(3.0, 0.0)), 0);
        assert_eq!(ugliness(Complex64::new(0.25, 0.0)), 1);
        assert_eq!(ugliness(Complex64::new(1.0 / 3.0, 0.0)), 2);
        assert_eq!(ugliness(Complex64::new(2f64.sqrt(), 0.0)), 3);
        assert_eq!(ugliness(Complex64::new(f64::NAN, 0.0)), 4);
        assert_eq!(ugliness(Complex64::new(1.0, 0.5)), 1);
    }

    #[test]
    fn test_merges_like_terms() {
        assert_eq!(simplified("x + x").to_string(), "2*x");
        assert_eq!(simplified("x - x").to_string(), "0");
        assert_eq!(simplified("3x - x + y").to_string(), "2*x + y");
        assert_eq!(simplified("x*y + y*x").to_string(), "2*x*y");
    }

    #[test]
    fn test_merges_like_factors() {
        assert_eq!(simplified("x*x").to_string(), "x^2");
        assert_eq!(simplified("x^2*x^3/x").to_string(), "x^4");
        assert_eq!(simplified("x/x").to_string(), "1");
        assert_eq!(simplified("√x*√x").to_string(), "x");
    }

    #[test]
    fn test_rational_coefficients() {
        assert_eq!(simplified("2*x/4").to_string(), "x/2");
        assert_eq!(simplified("6*x/3").to_string(), "2*x");
        assert_eq!(simplified("1/3").to_string(), "1/3");
        assert_eq!(simplified("-x*2").to_string(), "-2*x");
    }

    #[test]
    fn test_folding_respects_ugliness() {
        assert_eq!(simplified("2^3 + 1").to_string(), "9");
        assert_eq!(simplified("sqrt(4)").to_string(), "2");
        assert_eq!(simplified("sqrt(2)").to_string(), "2^0.5");
        assert_eq!(simplified("0*sin(x)").to_string(), "0");
        // pi stays symbolic
        assert_eq!(simplified("2*pi").to_string(), "2*pi");
    }

    #[test]
    fn test_division_by_zero_stays_undefined() {
        let node = simplified("1/0");
        assert!(node.evaluate(&Default::default()).re.is_nan());
    }

    #[test]
    fn test_power_rules() {
        assert_eq!(simplified("(x^2)^3").to_string(), "x^6");
        assert_eq!(simplified("(-x)^2").to_string(), "x^2");
        assert_eq!(simplified("(-x)^3").to_string(), "-x^3");
        assert_eq!(simplified("(2x)^2").to_string(), "4*x^2");
        assert_eq!(simplified("x^0").to_string(), "1");
    }

    #[test]
    fn test_combination_table() {
        assert_eq!(simplified("exp(ln(z))").to_string(), "z");
        assert_eq!(simplified("abs(-z)").to_string(), "abs(z)");
        assert_eq!(simplified("conj(conj(z))").to_string(), "z");
    }

    #[test]
    fn test_builtin_rules() {
        assert_eq!(simplified("sin(x)^2 + cos(x)^2").to_string(), "1");
        assert_eq!(simplified("ln(exp(x))").to_string(), "x");
        assert_eq!(simplified("re(x)").to_string(), "x");
        assert_eq!(simplified("exp(x)*exp(y)").to_string(), "exp(x + y)");
    }

    #[test]
    fn test_rules_disabled() {
        let node = normalize(parse("ln(exp(x))", &namespace()).unwrap());
        let config = EngineConfig::default().with_builtin_rules(false);
        assert_eq!(simplify(node, &config).to_string(), "ln(exp(x))");
    }

    #[test]
    fn test_canonical_polynomial() {
        let node = simplified("1 + 2*x + x^2");
        assert_eq!(node.structure(), "Sum(Pow(x, 2), Product(2, x), 1)");
        let node = simplified("(x + 1)^2 - 2x - 1 + 2x + 1");
        assert_eq!(node.to_string(), "(x + 1)^2");
    }

    #[test]
    fn test_idempotent() {
        for text in ["x^2 + 2*x + 1", "sin(x)/x + y/2", "exp(-x)*x^2 - 1/3", "(x + y)^2*(x - y)"] {
            let config = EngineConfig::default();
            let once = simplified(text);
            let twice = simplify(once.clone(), &config);
            assert_eq!(once, twice, "{text}");
        }
    }

    #[test]
    fn test_value_preserved() {
        let values = [("x".to_string(), Complex64::new(0.7, 0.0)), ("y".to_string(), Complex64::new(-1.3, 0.0))]
            .into_iter()
            .collect();
        for text in ["x*x - 2x + 3/4", "(x + y)^2/(x*y)", "sin(-x)*cos(-y)", "x^2*x^-3 + 2^x"] {
            let ns = namespace();
            let raw = normalize(parse(text, &ns).unwrap());
            let before = raw.evaluate(&values);
            let after = simplify(raw, &EngineConfig::default()).evaluate(&values);
            assert!((before - after).norm() < 1e-12, "{text}: {before} vs {after}");
        }
    }
}
