//! Pattern-based rewrite rules.
//!
//! A rule is one line of text:
//!
//! ```text
//! pattern = replacement[, variable domain]*
//! ```
//!
//! Every name in the pattern that the scope does not know is a pattern
//! variable. A domain restricts what a variable may bind: a domain word such as
//! `real` or `positive`, or the comparisons `x >= 0` and `x > 0`. Several
//! variables may share one domain: `x, y real`. Lines starting with `#` and
//! blank lines are ignored.
//!
//! `Sum` and `Product` patterns match regardless of term order. At the root of
//! a rule they also match a subset of a longer sum or product, keeping the
//! other terms: `sin(x)^2 + cos(x)^2 = 1` turns `sin(t)^2 + 3 + cos(t)^2` into
//! `1 + 3`.

use std::collections::HashMap;
use std::sync::OnceLock;

use log::{debug, warn};
use num_complex::Complex64;

use crate::convert::normalize;
use crate::element::Element;
use crate::errors::RuleError;
use crate::expr::Node;
use crate::function::FunctionId;
use crate::namespace::{identifiers, Locals, Namespace, Scope};
use crate::parser::parse;
use crate::range::Range;

/// The rules every simplifier starts with.
pub const BUILTIN_RULES: &str = "\
# trigonometric identities
sin(x)^2 + cos(x)^2 = 1
sin(-x) = -sin(x)
cos(-x) = cos(x)

# logarithms and roots on the real line
ln(exp(x)) = x, x real
sqrt(x^2) = abs(x), x real
abs(x) = x, x >= 0
exp(x)*exp(y) = exp(x + y)

# projections of real values
re(x) = x, x real
im(x) = 0, x real
";

/// A compiled rule pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Number(Complex64),
    Constant(String),
    Call(FunctionId, Vec<Pattern>),
    Sum(Vec<Pattern>),
    Product(Vec<Pattern>),
    /// Index into the rule's variable list
    Wildcard(usize),
}

/// Index key for the outermost node of a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Head {
    Call(FunctionId),
    Sum,
    Product,
}

impl Head {
    fn of_node(node: &Node) -> Option<Head> {
        match node {
            Node::Sum(_) => Some(Head::Sum),
            Node::Product(_) => Some(Head::Product),
            _ => node.function().map(|f| Head::Call(f.id())),
        }
    }

    fn of_pattern(pattern: &Pattern) -> Option<Head> {
        match pattern {
            Pattern::Call(id, _) => Some(Head::Call(*id)),
            Pattern::Sum(_) => Some(Head::Sum),
            Pattern::Product(_) => Some(Head::Product),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Wildcard {
    name: String,
    domain: Range,
}

type Bindings = Vec<Option<Node>>;

/// One parsed rewrite rule.
#[derive(Debug, Clone)]
pub struct Rule {
    source: String,
    pattern: Pattern,
    replacement: Node,
    wildcards: Vec<Wildcard>,
}

/// Splits at the `=` that separates pattern from replacement, skipping `>=`.
fn split_equals(line: &str) -> Option<(&str, &str)> {
    let bytes = line.as_bytes();
    let at = bytes.iter().enumerate().position(|(k, &b)| {
        b == b'='
            && (k == 0 || !matches!(bytes[k - 1], b'<' | b'>' | b'!' | b':'))
            && bytes.get(k + 1) != Some(&b'=')
    })?;
    Some((&line[..at], &line[at + 1..]))
}

/// Splits at commas outside parentheses.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (k, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                pieces.push(&text[start..k]);
                start = k + 1;
            }
            _ => {}
        }
    }
    pieces.push(&text[start..]);
    pieces
}

/// Reads the domain clauses that follow the replacement.
fn parse_domains(clauses: &[&str]) -> Result<HashMap<String, Range>, RuleError> {
    let mut domains = HashMap::new();
    let mut pending: Vec<String> = Vec::new();
    for clause in clauses.iter().map(|c| c.trim()) {
        let (name, domain) = if let Some((name, bound)) = clause.split_once(">=") {
            if bound.trim() != "0" {
                return Err(RuleError::UnknownDomain(clause.to_string()));
            }
            (name.trim(), Some(Range::NONNEGATIVE))
        } else if let Some((name, bound)) = clause.split_once('>') {
            if bound.trim() != "0" {
                return Err(RuleError::UnknownDomain(clause.to_string()));
            }
            (name.trim(), Some(Range::POSITIVE))
        } else {
            let words: Vec<&str> = clause.split_whitespace().collect();
            match words.as_slice() {
                [name] => (*name, None),
                [name, word] => {
                    let range = Range::from_domain_name(word)
                        .ok_or_else(|| RuleError::UnknownDomain(word.to_string()))?;
                    (*name, Some(range))
                }
                _ => return Err(RuleError::UnknownDomain(clause.to_string())),
            }
        };
        pending.push(name.to_string());
        if let Some(range) = domain {
            for name in pending.drain(..) {
                domains.insert(name, range);
            }
        }
    }
    match pending.first() {
        Some(name) => Err(RuleError::MissingDomain(name.clone())),
        None => Ok(domains),
    }
}

fn compile(node: &Node, wildcards: &[Wildcard]) -> Result<Pattern, RuleError> {
    let children = |nodes: &[Node]| {
        nodes
            .iter()
            .map(|n| compile(n, wildcards))
            .collect::<Result<Vec<_>, _>>()
    };
    match node {
        Node::Number(v) => Ok(Pattern::Number(*v)),
        Node::Constant(c) => Ok(Pattern::Constant(c.name.clone())),
        Node::Variable(v) => wildcards
            .iter()
            .position(|w| w.name == v.name)
            .map(Pattern::Wildcard)
            .ok_or_else(|| RuleError::UnboundWildcard(v.name.clone())),
        Node::Parameter(p) => Err(RuleError::UnsupportedPattern(format!(
            "parameter '{}' in pattern",
            p.name()
        ))),
        Node::Sum(terms) => Ok(Pattern::Sum(children(terms)?)),
        Node::Product(factors) => Ok(Pattern::Product(children(factors)?)),
        Node::Call(f, args) => Ok(Pattern::Call(f.id(), children(args)?)),
        Node::Operator(op, args) => Ok(Pattern::Call(op.function.id(), children(args)?)),
    }
}

impl Rule {
    /// Parses one rule line.
    ///
    /// # Arguments
    /// * `line` - The rule text, `pattern = replacement[, variable domain]*`
    /// * `scope` - Resolves the function names used by the rule
    ///
    /// # Errors
    /// A [`RuleError`] describing the first problem found.
    pub fn parse(line: &str, scope: &dyn Scope) -> Result<Rule, RuleError> {
        let (lhs, rest) = split_equals(line).ok_or(RuleError::MissingEquals)?;
        let pieces = split_top_level(rest);
        let domains = parse_domains(&pieces[1..])?;

        let mut names: Vec<String> = Vec::new();
        for word in identifiers(lhs).into_iter().chain(identifiers(pieces[0])) {
            let unknown = !scope.is_name(word) || domains.contains_key(word);
            if unknown && !names.iter().any(|n| n == word) {
                names.push(word.to_string());
            }
        }
        let locals = Locals::new(
            scope,
            names.iter().map(|n| Element::variable(n, false)).collect(),
        );
        let pattern_node = parse(lhs, &locals)
            .map(normalize)
            .map_err(|source| RuleError::Parse {
                side: "pattern",
                source,
            })?;
        let replacement = parse(pieces[0], &locals)
            .map(normalize)
            .map_err(|source| RuleError::Parse {
                side: "replacement",
                source,
            })?;

        let wildcards: Vec<Wildcard> = pattern_node
            .variables()
            .iter()
            .map(|v| Wildcard {
                name: v.name.clone(),
                domain: domains.get(&v.name).copied().unwrap_or(Range::COMPLEX),
            })
            .collect();
        for name in domains.keys() {
            if !wildcards.iter().any(|w| &w.name == name) {
                return Err(RuleError::UnboundWildcard(name.clone()));
            }
        }
        for v in replacement.variables() {
            if !wildcards.iter().any(|w| w.name == v.name) {
                return Err(RuleError::UnboundWildcard(v.name.clone()));
            }
        }

        let pattern = compile(&pattern_node, &wildcards)?;
        if Head::of_pattern(&pattern).is_none() {
            return Err(RuleError::UnsupportedPattern(lhs.trim().to_string()));
        }
        Ok(Rule {
            source: line.trim().to_string(),
            pattern,
            replacement,
            wildcards,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Rewrites `node` if the pattern matches it.
    ///
    /// # Arguments
    /// * `node` - The node to rewrite; its children are not searched
    /// * `max_terms` - Largest sum or product for which term orders are tried
    ///
    /// # Returns
    /// The replacement with the bound subtrees substituted, or `None`.
    pub fn apply(&self, node: &Node, max_terms: usize) -> Option<Node> {
        let mut bindings: Bindings = vec![None; self.wildcards.len()];
        let rest = match (&self.pattern, node) {
            (Pattern::Sum(patterns), Node::Sum(terms))
            | (Pattern::Product(patterns), Node::Product(terms)) => {
                if terms.len() < patterns.len() {
                    return None;
                }
                let mut used = vec![false; terms.len()];
                if terms.len() > max_terms {
                    // too many terms to search: in-order match of equal lengths only
                    if terms.len() != patterns.len()
                        || !self.match_sequence(patterns, terms, &mut bindings, max_terms)
                    {
                        return None;
                    }
                    used.fill(true);
                } else if !self.assign(patterns, terms, &mut used, &mut bindings, max_terms) {
                    return None;
                }
                terms
                    .iter()
                    .zip(&used)
                    .filter(|(_, used)| !**used)
                    .map(|(t, _)| t.clone())
                    .collect::<Vec<_>>()
            }
            _ => {
                if !self.match_node(&self.pattern, node, &mut bindings, max_terms) {
                    return None;
                }
                Vec::new()
            }
        };

        let replacements: HashMap<String, Node> = self
            .wildcards
            .iter()
            .zip(bindings)
            .filter_map(|(w, bound)| bound.map(|b| (w.name.clone(), b)))
            .collect();
        let replaced = self.replacement.substitute(&replacements);
        if rest.is_empty() {
            return Some(replaced);
        }
        let mut items = vec![replaced];
        items.extend(rest);
        Some(match self.pattern {
            Pattern::Product(_) => Node::product(items),
            _ => Node::sum(items),
        })
    }

    fn match_node(&self, pattern: &Pattern, node: &Node, bindings: &mut Bindings, max_terms: usize) -> bool {
        match pattern {
            Pattern::Wildcard(k) => match &bindings[*k] {
                Some(bound) => bound == node,
                None => {
                    if !self.wildcards[*k].domain.contains(node.range()) {
                        return false;
                    }
                    bindings[*k] = Some(node.clone());
                    true
                }
            },
            Pattern::Number(v) => node.as_number() == Some(*v),
            Pattern::Constant(name) => matches!(node, Node::Constant(c) if c.name == *name),
            Pattern::Call(id, args) => {
                node.function().is_some_and(|f| f.id() == *id)
                    && node.children().len() == args.len()
                    && self.match_sequence(args, node.children(), bindings, max_terms)
            }
            Pattern::Sum(patterns) => match node {
                Node::Sum(terms) if terms.len() == patterns.len() => {
                    self.match_commutative(patterns, terms, bindings, max_terms)
                }
                _ => false,
            },
            Pattern::Product(patterns) => match node {
                Node::Product(factors) if factors.len() == patterns.len() => {
                    self.match_commutative(patterns, factors, bindings, max_terms)
                }
                _ => false,
            },
        }
    }

    fn match_sequence(&self, patterns: &[Pattern], nodes: &[Node], bindings: &mut Bindings, max_terms: usize) -> bool {
        patterns
            .iter()
            .zip(nodes)
            .all(|(p, n)| self.match_node(p, n, bindings, max_terms))
    }

    fn match_commutative(&self, patterns: &[Pattern], nodes: &[Node], bindings: &mut Bindings, max_terms: usize) -> bool {
        if nodes.len() > max_terms {
            return self.match_sequence(patterns, nodes, bindings, max_terms);
        }
        let mut used = vec![false; nodes.len()];
        self.assign(patterns, nodes, &mut used, bindings, max_terms)
    }

    /// Backtracking assignment of each pattern to a distinct node.
    fn assign(
        &self,
        patterns: &[Pattern],
        nodes: &[Node],
        used: &mut [bool],
        bindings: &mut Bindings,
        max_terms: usize,
    ) -> bool {
        let Some((first, rest)) = patterns.split_first() else {
            return true;
        };
        for k in 0..nodes.len() {
            if used[k] {
                continue;
            }
            let snapshot = bindings.clone();
            if self.match_node(first, &nodes[k], bindings, max_terms) {
                used[k] = true;
                if self.assign(rest, nodes, used, bindings, max_terms) {
                    return true;
                }
                used[k] = false;
            }
            *bindings = snapshot;
        }
        false
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// An ordered collection of rules, indexed by the outermost node of each pattern.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
    index: HashMap<Head, Vec<usize>>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a rule file. Lines that fail to parse are skipped with a warning.
    pub fn parse(text: &str, scope: &dyn Scope) -> RuleSet {
        let mut set = RuleSet::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Rule::parse(line, scope) {
                Ok(rule) => set.push(rule),
                Err(e) => warn!("skipping rule on line {}: '{line}': {e}", number + 1),
            }
        }
        debug!("loaded {} rules", set.len());
        set
    }

    /// The built-in rules over the built-in catalog.
    pub fn builtin() -> &'static RuleSet {
        static BUILTIN: OnceLock<RuleSet> = OnceLock::new();
        BUILTIN.get_or_init(|| RuleSet::parse(BUILTIN_RULES, &Namespace::builtins()))
    }

    pub fn push(&mut self, rule: Rule) {
        if let Some(head) = Head::of_pattern(&rule.pattern) {
            self.index.entry(head).or_default().push(self.rules.len());
        }
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Applies the first rule, in insertion order, whose pattern matches `node`.
    pub fn apply(&self, node: &Node, max_terms: usize) -> Option<Node> {
        let candidates = self.index.get(&Head::of_node(node)?)?;
        candidates
            .iter()
            .find_map(|&k| self.rules[k].apply(node, max_terms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ParameterDef;

    fn namespace() -> Namespace {
        let mut ns = Namespace::builtins();
        ns.add_variable("t", true).unwrap();
        ns.add_variable("z", false).unwrap();
        ns
    }

    fn tree(ns: &Namespace, text: &str) -> Node {
        normalize(parse(text, ns).unwrap())
    }

    #[test]
    fn test_builtin_rules_parse() {
        assert_eq!(RuleSet::builtin().len(), 9);
    }

    #[test]
    fn test_parse_domains() {
        let domains = parse_domains(&["x real", " y", "z >= 0", "w > 0"]).unwrap();
        assert_eq!(domains["x"], Range::REAL);
        assert_eq!(domains["y"], Range::NONNEGATIVE);
        assert_eq!(domains["z"], Range::NONNEGATIVE);
        assert_eq!(domains["w"], Range::POSITIVE);
        assert_eq!(parse_domains(&["x blue"]), Err(RuleError::UnknownDomain("blue".into())));
        assert_eq!(parse_domains(&["x"]), Err(RuleError::MissingDomain("x".into())));
    }

    #[test]
    fn test_invalid_lines_are_skipped() {
        let ns = Namespace::builtins();
        let set = RuleSet::parse("sin(x)\nx = 1\ntan(x) = sin(x)/cos(x)\nsin(x) = y\n", &ns);
        assert_eq!(set.len(), 1);
        assert_eq!(set.rules()[0].source(), "tan(x) = sin(x)/cos(x)");
        assert_eq!(Rule::parse("sin(x) = y", &ns).unwrap_err(), RuleError::UnboundWildcard("y".into()));
        assert!(matches!(Rule::parse("x = 1", &ns), Err(RuleError::UnsupportedPattern(_))));
    }

    #[test]
    fn test_commutative_subset_match() {
        let ns = namespace();
        let rules = RuleSet::builtin();
        let node = tree(&ns, "cos(t)^2 + 3 + sin(t)^2");
        assert_eq!(rules.apply(&node, 6).unwrap().structure(), "Sum(1, 3)");
        // bound variables must agree
        let node = tree(&ns, "sin(t)^2 + cos(z)^2");
        assert_eq!(rules.apply(&node, 6), None);
    }

    #[test]
    fn test_domains_restrict_matches() {
        let mut ns = namespace();
        let rules = RuleSet::builtin();
        assert_eq!(rules.apply(&tree(&ns, "abs(5)"), 6), Some(Node::number(5.0)));
        assert_eq!(rules.apply(&tree(&ns, "abs(t)"), 6), None);
        ns.add_parameter(ParameterDef::new("a", 1.0, 0.0, 2.0)).unwrap();
        let node = tree(&ns, "abs(a)");
        assert_eq!(rules.apply(&node, 6).unwrap().to_string(), "a");
        assert_eq!(rules.apply(&tree(&ns, "ln(exp(t))"), 6).unwrap().to_string(), "t");
        assert_eq!(rules.apply(&tree(&ns, "ln(exp(z))"), 6), None);
    }

    #[test]
    fn test_replacement_substitutes_subtrees() {
        let ns = namespace();
        let rules = RuleSet::builtin();
        let node = tree(&ns, "sin(-(t + 1))");
        assert_eq!(rules.apply(&node, 6).unwrap().to_string(), "-sin(t + 1)");
        let node = tree(&ns, "exp(t)*exp(2z)");
        assert_eq!(rules.apply(&node, 6).unwrap().to_string(), "exp(t + 2*z)");
    }

    #[test]
    fn test_user_rules() {
        let ns = namespace();
        let set = RuleSet::parse("tan(x) = sin(x)/cos(x)", &ns);
        let node = tree(&ns, "tan(z)");
        assert_eq!(set.apply(&node, 6).unwrap().to_string(), "sin(z)/cos(z)");
        assert_eq!(set.apply(&tree(&ns, "sin(z)"), 6), None);
    }

    #[test]
    fn test_term_limit_disables_permutations() {
        let ns = namespace();
        let rules = RuleSet::builtin();
        let node = tree(&ns, "cos(t)^2 + sin(t)^2");
        assert!(rules.apply(&node, 6).is_some());
        assert!(rules.apply(&node, 1).is_none());
    }
}
