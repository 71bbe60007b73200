//! Parser: token chain to a raw Working Tree.
//!
//! Operator-precedence climbing over token ranges. For a range the parser looks
//! for the lowest-precedence binary operator at nesting depth zero (rightmost
//! for left-associative operators, leftmost for right-associative ones),
//! including the synthetic implicit multiplication between juxtaposed operands.
//! A leading prefix operator, a function name applied without parentheses or a
//! trailing postfix operator is peeled instead when it binds more loosely than
//! the best split. What remains must be a single operand, a parenthesized group,
//! an absolute-value group or a call.
//!
//! [`parse`] drives the lexer and the parser together and backtracks over the
//! lexer's waypoints until a token chain parses.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;

use crate::element::{Element, ElementKind};
use crate::errors::{ParseError, ParseErrorKind};
use crate::expr::Node;
use crate::function::{Associativity, Fixity, OperatorDef};
use crate::lexer::{next_choice, Lexer, Token, TokenKind};
use crate::namespace::Scope;
use crate::operators::catalog::{catalog, APPLICATION};

/// Upper bound on lexer re-runs for one input.
const MAX_ATTEMPTS: usize = 256;

/// Parses `text` into a raw tree, resolving names in `scope`.
///
/// Ambiguous symbol cuts are retried until one parses. If none does, the error
/// of the first attempt is returned. No partial tree is ever returned.
///
/// # Arguments
/// * `text` - The formula text
/// * `scope` - Where names are resolved
///
/// # Returns
/// The raw tree, made of `Operator` and `Call` nodes mirroring the text.
pub fn parse(text: &str, scope: &dyn Scope) -> Result<Node, ParseError> {
    let lexer = Lexer::new(text, scope);
    let mut choices = Vec::new();
    let mut first_error: Option<ParseError> = None;

    for attempt in 0..MAX_ATTEMPTS {
        let lexed = lexer.lex(&choices);
        let result = lexed
            .tokens
            .and_then(|tokens| Parser::new(text, &tokens, scope).parse());
        match result {
            Ok(node) => {
                if attempt > 0 {
                    debug!("'{text}' parsed after {attempt} backtracking steps");
                }
                return Ok(node);
            }
            Err(e) if e.kind == ParseErrorKind::Recursive => return Err(e),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
        if !next_choice(&mut choices, &lexed.waypoints) {
            break;
        }
        debug!("backtracking in '{text}' with choices {choices:?}");
    }

    Err(first_error.unwrap_or_else(|| ParseError::internal(format!("no parse found for '{text}'"))))
}

/// A split candidate: the operator token position and the operator.
struct Split {
    at: usize,
    op: Arc<OperatorDef>,
    implicit: bool,
}

struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    scope: &'a dyn Scope,
    /// For every opening token, the index of its closing token.
    matching: Vec<usize>,
    implicit: Option<Arc<OperatorDef>>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: &'a [Token], scope: &'a dyn Scope) -> Self {
        let mut matching = vec![usize::MAX; tokens.len()];
        let mut stack = Vec::new();
        for (k, token) in tokens.iter().enumerate() {
            match token.kind {
                TokenKind::Open | TokenKind::AbsOpen => stack.push(k),
                TokenKind::Close | TokenKind::AbsClose => {
                    if let Some(open) = stack.pop() {
                        matching[open] = k;
                    }
                }
                _ => {}
            }
        }
        Self {
            source,
            tokens,
            scope,
            matching,
            implicit: scope.implicit_multiplication(),
        }
    }

    fn parse(&self) -> Result<Node, ParseError> {
        self.expression(0, self.tokens.len())
    }

    // ────────────────────────────────────────────────────────────────────
    //  Token classification
    // ────────────────────────────────────────────────────────────────────

    fn symbol(&self, k: usize) -> Option<&str> {
        match &self.tokens.get(k)?.kind {
            TokenKind::Symbol(name) => Some(name),
            _ => None,
        }
    }

    fn operator(&self, name: &str, arity: usize, fixity: Fixity) -> Option<Arc<OperatorDef>> {
        match self.scope.lookup(name, arity)?.kind() {
            ElementKind::Operator(op) if op.fixity == fixity && op.symbol == name => Some(op.clone()),
            _ => None,
        }
    }

    fn is_operand(&self, name: &str) -> bool {
        self.scope.lookup(name, 0).is_some_and(|e| e.is_operand())
    }

    /// A name that takes arguments: a function, a formula with parameters or an
    /// alias of an operator spelled as a word.
    fn is_function_name(&self, name: &str) -> bool {
        self.scope.arities(name).into_iter().filter(|&a| a > 0).any(|a| {
            self.scope.lookup(name, a).is_some_and(|e| match e.kind() {
                ElementKind::Operator(op) => op.symbol != name,
                ElementKind::Function(_) | ElementKind::Formula(_) => true,
                _ => false,
            })
        })
    }

    /// A name followed by parentheses is a call rather than a product.
    fn is_callable(&self, name: &str) -> bool {
        self.is_function_name(name)
            || self
                .scope
                .lookup(name, 0)
                .is_some_and(|e| matches!(e.kind(), ElementKind::Function(_)))
    }

    fn ends_operand(&self, k: usize) -> bool {
        match &self.tokens[k].kind {
            TokenKind::Number(_) | TokenKind::Close | TokenKind::AbsClose => true,
            TokenKind::Symbol(name) => {
                self.is_operand(name) || self.operator(name, 1, Fixity::Postfix).is_some()
            }
            _ => false,
        }
    }

    fn starts_operand(&self, k: usize) -> bool {
        match &self.tokens[k].kind {
            TokenKind::Number(_) | TokenKind::Open | TokenKind::AbsOpen => true,
            TokenKind::Symbol(name) => {
                self.is_operand(name)
                    || self.is_function_name(name)
                    || (self.operator(name, 1, Fixity::Prefix).is_some()
                        && self.operator(name, 2, Fixity::Infix).is_none())
            }
            _ => false,
        }
    }

    /// Index just past the group opened at `k`, or `k + 1` for other tokens.
    fn skip(&self, k: usize) -> usize {
        match self.tokens[k].kind {
            TokenKind::Open | TokenKind::AbsOpen if self.matching[k] != usize::MAX => self.matching[k] + 1,
            _ => k + 1,
        }
    }

    fn offset_at(&self, k: usize) -> usize {
        self.tokens
            .get(k)
            .map(|t| t.offset)
            .unwrap_or(self.source.len())
    }

    fn span(&self, lo: usize, hi: usize) -> (usize, usize) {
        let start = self.offset_at(lo);
        let end = self
            .tokens
            .get(hi.saturating_sub(1))
            .map(|t| t.offset + t.len)
            .unwrap_or(start);
        (start, end.saturating_sub(start))
    }

    // ────────────────────────────────────────────────────────────────────
    //  Precedence climbing
    // ────────────────────────────────────────────────────────────────────

    fn best_split(&self, lo: usize, hi: usize) -> Option<Split> {
        let mut best: Option<Split> = None;
        let mut consider = |candidate: Split| {
            let better = match &best {
                None => true,
                Some(b) => {
                    candidate.op.precedence < b.op.precedence
                        || (candidate.op.precedence == b.op.precedence
                            && candidate.op.associativity == Associativity::Left)
                }
            };
            if better {
                best = Some(candidate);
            }
        };

        let mut k = lo;
        while k < hi {
            if k > lo && self.ends_operand(k - 1) {
                let call = self.tokens[k].kind == TokenKind::Open
                    && self.symbol(k - 1).is_some_and(|name| self.is_callable(name));
                if let (Some(op), true) = (&self.implicit, !call && self.starts_operand(k)) {
                    consider(Split {
                        at: k,
                        op: op.clone(),
                        implicit: true,
                    });
                }
                if let Some(name) = self.symbol(k) {
                    if k + 1 < hi {
                        if let Some(op) = self.operator(name, 2, Fixity::Infix) {
                            consider(Split {
                                at: k,
                                op,
                                implicit: false,
                            });
                        }
                    }
                }
            }
            k = self.skip(k);
        }
        best
    }

    fn expression(&self, lo: usize, hi: usize) -> Result<Node, ParseError> {
        if lo >= hi {
            return Err(ParseError::new(
                ParseErrorKind::MissingOperand,
                "missing operand",
                self.offset_at(lo),
                0,
            ));
        }

        let split = self.best_split(lo, hi);
        let split_precedence = split.as_ref().map(|s| s.op.precedence);
        let binds_looser = |precedence: u8| split_precedence.map_or(true, |s| precedence < s);

        if let Some(name) = self.symbol(lo) {
            if let Some(op) = self.operator(name, 1, Fixity::Prefix) {
                if binds_looser(op.precedence) {
                    if lo + 1 >= hi {
                        return Err(ParseError::new(
                            ParseErrorKind::MissingOperand,
                            format!("missing operand after '{name}'"),
                            self.tokens[lo].offset,
                            self.tokens[lo].len,
                        ));
                    }
                    let operand = self.expression(lo + 1, hi)?;
                    return Ok(Node::Operator(op, vec![operand]));
                }
            } else if self.is_function_name(name)
                && lo + 1 < hi
                && self.tokens[lo + 1].kind != TokenKind::Open
                && binds_looser(APPLICATION)
            {
                let operand = self.expression(lo + 1, hi)?;
                return self.apply(name, lo, vec![operand]);
            }
        }

        if hi - lo > 1 {
            if let Some(name) = self.symbol(hi - 1) {
                if let Some(op) = self.operator(name, 1, Fixity::Postfix) {
                    if binds_looser(op.precedence) {
                        let operand = self.expression(lo, hi - 1)?;
                        return Ok(Node::Operator(op, vec![operand]));
                    }
                }
            }
        }

        if let Some(split) = split {
            let right_start = if split.implicit { split.at } else { split.at + 1 };
            let left = self.expression(lo, split.at)?;
            let right = self.expression(right_start, hi)?;
            return Ok(Node::Operator(split.op, vec![left, right]));
        }

        self.atom(lo, hi)
    }

    fn atom(&self, lo: usize, hi: usize) -> Result<Node, ParseError> {
        let first = &self.tokens[lo];
        if hi - lo == 1 {
            return match &first.kind {
                TokenKind::Number(value) => Ok(Node::number(*value)),
                TokenKind::Symbol(name) => self.apply(name, lo, Vec::new()),
                TokenKind::Comma => Err(ParseError::new(
                    ParseErrorKind::MissingOperand,
                    "unexpected ','",
                    first.offset,
                    1,
                )),
                _ => Err(ParseError::internal("unpaired group token")),
            };
        }

        match &first.kind {
            TokenKind::Open if self.matching[lo] == hi - 1 => {
                if lo + 1 == hi - 1 {
                    return Err(ParseError::new(
                        ParseErrorKind::MissingOperand,
                        "empty parentheses",
                        first.offset,
                        2,
                    ));
                }
                return self.expression(lo + 1, hi - 1);
            }
            TokenKind::AbsOpen if self.matching[lo] == hi - 1 => {
                let inner = self.expression(lo + 1, hi - 1)?;
                let abs = match self.scope.lookup("abs", 1).map(|e| e.kind().clone()) {
                    Some(ElementKind::Function(f)) => f,
                    _ => catalog().abs.clone(),
                };
                return Ok(Node::Call(abs, vec![inner]));
            }
            TokenKind::Symbol(name)
                if self.tokens.get(lo + 1).map(|t| &t.kind) == Some(&TokenKind::Open)
                    && self.matching[lo + 1] == hi - 1 =>
            {
                let args = self.arguments(lo + 2, hi - 1)?;
                return self.apply(name, lo, args);
            }
            _ => {}
        }

        Err(self.explain(lo, hi))
    }

    /// Splits `lo..hi` on depth-zero commas and parses every argument.
    fn arguments(&self, lo: usize, hi: usize) -> Result<Vec<Node>, ParseError> {
        if lo == hi {
            return Ok(Vec::new());
        }
        let mut args = Vec::new();
        let mut start = lo;
        let mut k = lo;
        while k < hi {
            if self.tokens[k].kind == TokenKind::Comma {
                args.push(self.expression(start, k)?);
                start = k + 1;
            }
            k = self.skip(k);
        }
        args.push(self.expression(start, hi)?);
        Ok(args)
    }

    /// Resolves `name` with `args.len()` arguments and builds the node.
    fn apply(&self, name: &str, at: usize, args: Vec<Node>) -> Result<Node, ParseError> {
        let token = &self.tokens[at];
        let Some(element) = self.scope.lookup(name, args.len()) else {
            let arities = self.scope.arities(name);
            if arities.is_empty() {
                return Err(ParseError::new(
                    ParseErrorKind::UnknownSymbol,
                    format!("unknown symbol '{name}'"),
                    token.offset,
                    token.len,
                ));
            }
            let expected = arities.iter().map(|a| a.to_string()).collect::<Vec<_>>().join(" or ");
            return Err(ParseError::new(
                ParseErrorKind::ArityMismatch,
                format!("'{name}' takes {expected} arguments, got {}", args.len()),
                token.offset,
                token.len,
            ));
        };
        self.element_node(&element, args, token)
    }

    fn element_node(&self, element: &Element, args: Vec<Node>, token: &Token) -> Result<Node, ParseError> {
        match element.kind() {
            ElementKind::Variable(v) => Ok(Node::Variable(v.clone())),
            ElementKind::Constant(c) => Ok(Node::Constant(c.clone())),
            ElementKind::Parameter(p) => Ok(Node::Parameter(p.clone())),
            ElementKind::Function(f) => Ok(Node::Call(f.clone(), args)),
            ElementKind::Operator(op) => Ok(Node::Operator(op.clone(), args)),
            ElementKind::Formula(formula) => {
                let tree = formula.tree(self.scope).map_err(|e| {
                    let message = match e.kind {
                        ParseErrorKind::Recursive => e.message,
                        _ => format!("in '{}': {}", formula.name(), e.message),
                    };
                    ParseError::new(e.kind, message, token.offset, token.len)
                })?;
                let replacements: HashMap<String, Node> = tree
                    .parameters
                    .iter()
                    .map(|p| p.name.clone())
                    .zip(args)
                    .collect();
                Ok(tree.root.substitute(&replacements))
            }
            ElementKind::Alias(alias) => Err(ParseError::internal(format!(
                "unresolved alias '{}' -> '{}'",
                element.name(),
                alias.target
            ))),
            ElementKind::Namespace(_) => Err(ParseError::new(
                ParseErrorKind::UnknownSymbol,
                format!("'{}' is a namespace", element.name()),
                token.offset,
                token.len,
            )),
        }
    }

    /// Explains why `lo..hi` is not a single operand.
    fn explain(&self, lo: usize, hi: usize) -> ParseError {
        let mut k = lo;
        while k < hi {
            if self.tokens[k].kind == TokenKind::Comma {
                return ParseError::new(ParseErrorKind::MissingOperand, "unexpected ','", self.tokens[k].offset, 1);
            }
            k = self.skip(k);
        }
        if let Some(name) = self.symbol(lo) {
            if self.operator(name, 2, Fixity::Infix).is_some() {
                return ParseError::new(
                    ParseErrorKind::MissingOperand,
                    format!("missing left operand of '{name}'"),
                    self.tokens[lo].offset,
                    self.tokens[lo].len,
                );
            }
        }
        if let Some(name) = self.symbol(hi - 1) {
            if self.operator(name, 2, Fixity::Infix).is_some() {
                return ParseError::new(
                    ParseErrorKind::MissingOperand,
                    format!("missing right operand of '{name}'"),
                    self.tokens[hi - 1].offset,
                    self.tokens[hi - 1].len,
                );
            }
        }
        let (offset, len) = self.span(lo, hi);
        ParseError::new(ParseErrorKind::MissingOperand, "missing operator", offset, len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ParameterDef;
    use crate::namespace::Namespace;
    use num_complex::Complex64;

    fn namespace() -> Namespace {
        let mut ns = Namespace::builtins();
        ns.add_variable("x", true).unwrap();
        ns.add_variable("y", true).unwrap();
        ns
    }

    fn eval(text: &str, x: f64, y: f64) -> Complex64 {
        let ns = namespace();
        let node = parse(text, &ns).unwrap();
        node.evaluate(&HashMap::from([
            ("x".to_string(), Complex64::new(x, 0.0)),
            ("y".to_string(), Complex64::new(y, 0.0)),
        ]))
    }

    fn real(text: &str) -> f64 {
        eval(text, 3.0, -2.0).re
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(real("1 + 2*3"), 7.0);
        assert_eq!(real("2^3^2"), 512.0);
        assert_eq!(real("10 - 4 - 3"), 3.0);
        assert_eq!(real("12 / 3 / 2"), 2.0);
        assert_eq!(real("-2^2"), -4.0);
        assert_eq!(real("2*-3"), -6.0);
        assert_eq!(real("2^-1"), 0.5);
        assert_eq!(real("(1 + 2)*3"), 9.0);
    }

    #[test]
    fn test_implicit_multiplication() {
        assert_eq!(real("2x"), 6.0);
        assert_eq!(real("x(x + 1)"), 12.0);
        assert_eq!(real("2 x y"), -12.0);
        assert_eq!(real("x^2y"), -18.0);
        assert_eq!(real("-2x"), -6.0);
    }

    #[test]
    fn test_functions() {
        assert!((real("sin(pi/2)") - 1.0).abs() < 1e-12);
        assert!((real("sin pi/2")).abs() < 1e-12);
        assert_eq!(real("pow(2, 3)"), 8.0);
        assert!((real("log(e)") - 1.0).abs() < 1e-12);
        assert_eq!(real("√4"), 2.0);
        assert_eq!(real("2sqrt(x + 1)"), 4.0);
        let r = real("random()");
        assert!((0.0..1.0).contains(&r));
        let r = real("random");
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn test_absolute_value_bars() {
        assert_eq!(real("|x - 5|"), 2.0);
        assert_eq!(real("|y| |x|"), 6.0);
        assert_eq!(real("2|y|"), 4.0);
    }

    #[test]
    fn test_complex_constant() {
        let v = eval("i*i", 0.0, 0.0);
        assert_eq!(v, Complex64::new(-1.0, 0.0));
    }

    #[test]
    fn test_errors() {
        let ns = namespace();
        assert_eq!(parse("sin(1, 2)", &ns).unwrap_err().kind, ParseErrorKind::ArityMismatch);
        assert_eq!(parse("1 +", &ns).unwrap_err().kind, ParseErrorKind::MissingOperand);
        assert_eq!(parse("* 2", &ns).unwrap_err().kind, ParseErrorKind::MissingOperand);
        assert_eq!(parse("()", &ns).unwrap_err().kind, ParseErrorKind::MissingOperand);
        assert_eq!(parse("", &ns).unwrap_err().kind, ParseErrorKind::MissingOperand);
        assert_eq!(parse("1, 2", &ns).unwrap_err().kind, ParseErrorKind::MissingOperand);
        let err = parse("x + q", &ns).unwrap_err();
        assert_eq!((err.kind, err.offset, err.len), (ParseErrorKind::UnknownSymbol, 4, 1));
        assert_eq!(parse("sin", &ns).unwrap_err().kind, ParseErrorKind::ArityMismatch);
    }

    #[test]
    fn test_backtracking_over_ambiguous_names() {
        let mut ns = Namespace::builtins();
        ns.add_variable("a", true).unwrap();
        ns.add_variable("b", true).unwrap();
        ns.define("ab(t) = t + 1").unwrap();
        // "ab" alone cannot be the one-argument formula, so it must be a*b
        let node = parse("ab", &ns).unwrap();
        let value = node.evaluate(&HashMap::from([
            ("a".to_string(), Complex64::new(2.0, 0.0)),
            ("b".to_string(), Complex64::new(5.0, 0.0)),
        ]));
        assert_eq!(value, Complex64::new(10.0, 0.0));
        // with an argument the longest cut wins
        let node = parse("ab(a)", &ns).unwrap();
        let value = node.evaluate(&HashMap::from([("a".to_string(), Complex64::new(2.0, 0.0))]));
        assert_eq!(value, Complex64::new(3.0, 0.0));
    }

    #[test]
    fn test_formula_inlining() {
        let mut ns = namespace();
        ns.define("f(t) = t^2 + 1").unwrap();
        ns.define("g(u, v) = u - v").unwrap();
        ns.define("c = 4").unwrap();
        let eval = |text: &str| parse(text, &ns).unwrap().evaluate(&HashMap::new()).re;
        assert_eq!(eval("f(3)"), 10.0);
        assert_eq!(eval("f(f(1))"), 5.0);
        assert_eq!(eval("g(c, 1)"), 3.0);
        assert_eq!(eval("2c"), 8.0);
    }

    #[test]
    fn test_inlined_errors_point_at_call() {
        let mut ns = namespace();
        ns.define("f(t) = t + q").unwrap();
        let err = parse("1 + f(2)", &ns).unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownSymbol);
        assert_eq!(err.offset, 4);
        assert!(err.message.starts_with("in 'f'"));
    }

    #[test]
    fn test_parameters_are_nodes() {
        let mut ns = namespace();
        let a = ns.add_parameter(ParameterDef::new("a", 2.0, 0.0, 10.0)).unwrap();
        let node = parse("a*x", &ns).unwrap();
        let values = HashMap::from([("x".to_string(), Complex64::new(3.0, 0.0))]);
        assert_eq!(node.evaluate(&values).re, 6.0);
        a.set(Complex64::new(4.0, 0.0));
        assert_eq!(node.evaluate(&values).re, 12.0);
    }
}
