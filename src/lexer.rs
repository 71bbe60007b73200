//! Lexer: formula text to an unambiguous token chain.
//!
//! Text is split on whitespace, parentheses, commas and bars. Every remaining
//! bare substring is cut into symbols known to the scope and numeric literals.
//! When a substring admits several cuts, or a bar could either close a group or
//! open a new one, the lexer takes the first alternative and records a
//! [`Waypoint`]. The parse driver re-runs the lexer with a different choice
//! vector when the parser rejects a token chain, so the lexer itself never
//! mutates committed output.
//!
//! Numbers are digits with at most one decimal point and an optional exponent
//! `[eE][+-]?digits`, so `2e3` is two thousand while `2e` and `2e+x` keep the
//! constant `e`.

use std::collections::BTreeSet;

use crate::errors::{ParseError, ParseErrorKind};
use crate::function::Fixity;
use crate::element::ElementKind;
use crate::namespace::Scope;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Symbol(String),
    Open,
    Close,
    Comma,
    AbsOpen,
    AbsClose,
}

/// A token with its byte span in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
    pub len: usize,
}

/// A choice point: the number of alternatives available at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waypoint {
    pub offset: usize,
    pub alternatives: usize,
}

/// Output of one lexer run: the token chain (or the first error) plus every
/// choice point passed on the way.
#[derive(Debug, Clone)]
pub struct Lexed {
    pub tokens: Result<Vec<Token>, ParseError>,
    pub waypoints: Vec<Waypoint>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Group {
    Paren(usize),
    Bar(usize),
}

pub struct Lexer<'a> {
    source: &'a str,
    scope: &'a dyn Scope,
    names: BTreeSet<String>,
}

fn is_separator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | ',' | '|')
}

/// Length of the exponent `[eE][+-]?digits` at the start of `text`, or 0.
pub(crate) fn exponent_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    if !matches!(bytes.first(), Some(b'e' | b'E')) {
        return 0;
    }
    let sign = usize::from(matches!(bytes.get(1), Some(b'+' | b'-')));
    let digits = bytes[1 + sign..].iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        0
    } else {
        1 + sign + digits
    }
}

/// Length of the numeric literal at the start of `text`: digits with at most
/// one decimal point, containing at least one digit, and an optional exponent.
fn number_prefix(text: &str) -> usize {
    let mut seen_dot = false;
    let mut seen_digit = false;
    let mut end = 0;
    for (k, c) in text.char_indices() {
        if c.is_ascii_digit() {
            seen_digit = true;
        } else if c == '.' && !seen_dot {
            seen_dot = true;
        } else {
            break;
        }
        end = k + c.len_utf8();
    }
    if seen_digit {
        end + exponent_len(&text[end..])
    } else {
        0
    }
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, scope: &'a dyn Scope) -> Self {
        let names = scope.names().into_iter().filter(|n| !n.is_empty()).collect();
        Self {
            source,
            scope,
            names,
        }
    }

    pub fn source(&self) -> &str {
        self.source
    }

    /// Symbols known to the scope that `text` starts with, longest first.
    fn prefix_candidates<'b>(&self, text: &'b str) -> Vec<&'b str> {
        let mut candidates: Vec<&'b str> = text
            .char_indices()
            .map(|(k, c)| &text[..k + c.len_utf8()])
            .filter(|prefix| self.names.contains(*prefix))
            .collect();
        candidates.reverse();
        candidates
    }

    /// True if `text` ends with a complete symbol or number, so a cut that
    /// leaves `text` behind can possibly succeed.
    fn has_valid_suffix(&self, text: &str) -> bool {
        if text.is_empty() {
            return true;
        }
        if text.ends_with(|c: char| c.is_ascii_digit()) {
            return true;
        }
        text.char_indices().any(|(k, _)| self.names.contains(&text[k..]))
    }

    /// True if a symbol can stand on its own as an operand.
    fn is_operand_symbol(&self, name: &str) -> bool {
        self.scope
            .lookup(name, 0)
            .is_some_and(|e| e.is_operand())
            || self.scope.lookup(name, 1).is_some_and(|e| {
                matches!(e.kind(), ElementKind::Operator(op) if op.fixity == Fixity::Postfix)
            })
    }

    fn ends_operand(&self, token: Option<&Token>) -> bool {
        match token.map(|t| &t.kind) {
            Some(TokenKind::Number(_)) | Some(TokenKind::Close) | Some(TokenKind::AbsClose) => true,
            Some(TokenKind::Symbol(name)) => self.is_operand_symbol(name),
            _ => false,
        }
    }

    /// Runs the lexer, taking alternative `choices[k]` at the k-th waypoint
    /// (the first alternative where no choice is given).
    pub fn lex(&self, choices: &[usize]) -> Lexed {
        let mut waypoints = Vec::new();
        let tokens = self.lex_inner(choices, &mut waypoints);
        Lexed { tokens, waypoints }
    }

    fn choose(&self, choices: &[usize], waypoints: &mut Vec<Waypoint>, offset: usize, alternatives: usize) -> usize {
        if alternatives <= 1 {
            return 0;
        }
        let choice = choices.get(waypoints.len()).copied().unwrap_or(0);
        waypoints.push(Waypoint { offset, alternatives });
        choice.min(alternatives - 1)
    }

    fn lex_inner(&self, choices: &[usize], waypoints: &mut Vec<Waypoint>) -> Result<Vec<Token>, ParseError> {
        let mut tokens: Vec<Token> = Vec::new();
        let mut groups: Vec<Group> = Vec::new();
        let mut chars = self.source.char_indices().peekable();

        while let Some(&(offset, c)) = chars.peek() {
            match c {
                c if c.is_whitespace() => {
                    chars.next();
                }
                '(' => {
                    chars.next();
                    groups.push(Group::Paren(offset));
                    tokens.push(Token { kind: TokenKind::Open, offset, len: 1 });
                }
                ')' => {
                    chars.next();
                    match groups.pop() {
                        Some(Group::Paren(_)) => tokens.push(Token { kind: TokenKind::Close, offset, len: 1 }),
                        _ => {
                            return Err(ParseError::new(
                                ParseErrorKind::UnbalancedGroup,
                                "unmatched ')'",
                                offset,
                                1,
                            ))
                        }
                    }
                }
                ',' => {
                    chars.next();
                    tokens.push(Token { kind: TokenKind::Comma, offset, len: 1 });
                }
                '|' => {
                    chars.next();
                    let inside_bar = matches!(groups.last(), Some(Group::Bar(_)));
                    let can_close = inside_bar && self.ends_operand(tokens.last());
                    let close = if !can_close {
                        false
                    } else {
                        let can_open = self.scope.implicit_multiplication().is_some();
                        // close first, open a nested group as the fallback
                        let alternatives = if can_open { 2 } else { 1 };
                        self.choose(choices, waypoints, offset, alternatives) == 0
                    };
                    if close {
                        groups.pop();
                        tokens.push(Token { kind: TokenKind::AbsClose, offset, len: 1 });
                    } else {
                        groups.push(Group::Bar(offset));
                        tokens.push(Token { kind: TokenKind::AbsOpen, offset, len: 1 });
                    }
                }
                _ => {
                    let start = offset;
                    let mut end = start;
                    while let Some(&(k, c)) = chars.peek() {
                        if is_separator(c) {
                            break;
                        }
                        end = k + c.len_utf8();
                        chars.next();
                    }
                    self.split_bare(start, end, choices, waypoints, &mut tokens)?;
                }
            }
        }

        match groups.pop() {
            Some(Group::Paren(offset)) => Err(ParseError::new(
                ParseErrorKind::UnbalancedGroup,
                "unmatched '('",
                offset,
                1,
            )),
            Some(Group::Bar(offset)) => Err(ParseError::new(
                ParseErrorKind::UnbalancedGroup,
                "unmatched '|'",
                offset,
                1,
            )),
            None => Ok(tokens),
        }
    }

    /// Cuts the bare substring `source[start..end]` into symbols and numbers.
    fn split_bare(
        &self,
        start: usize,
        end: usize,
        choices: &[usize],
        waypoints: &mut Vec<Waypoint>,
        tokens: &mut Vec<Token>,
    ) -> Result<(), ParseError> {
        let mut at = start;
        while at < end {
            let rest = &self.source[at..end];
            let number = number_prefix(rest);
            if number > 0 {
                let text = &rest[..number];
                let value = text.parse::<f64>().map_err(|_| {
                    ParseError::new(ParseErrorKind::UnknownSymbol, format!("invalid number '{text}'"), at, number)
                })?;
                tokens.push(Token { kind: TokenKind::Number(value), offset: at, len: number });
                at += number;
                continue;
            }

            let mut candidates = self.prefix_candidates(rest);
            if candidates.len() > 1 {
                candidates.retain(|c| self.has_valid_suffix(&rest[c.len()..]) || c.len() == rest.len());
                if candidates.is_empty() {
                    candidates = self.prefix_candidates(rest);
                }
            }
            if candidates.is_empty() {
                let len = rest.chars().next().map_or(0, char::len_utf8);
                let word: String = rest
                    .chars()
                    .take_while(|c| c.is_alphanumeric() || *c == '_')
                    .collect();
                let shown = if word.is_empty() { &rest[..len] } else { word.as_str() };
                return Err(ParseError::new(
                    ParseErrorKind::UnknownSymbol,
                    format!("unknown symbol '{shown}'"),
                    at,
                    shown.len().max(len),
                ));
            }
            let choice = self.choose(choices, waypoints, at, candidates.len());
            let symbol = candidates[choice];
            tokens.push(Token {
                kind: TokenKind::Symbol(symbol.to_string()),
                offset: at,
                len: symbol.len(),
            });
            at += symbol.len();
        }
        Ok(())
    }
}

/// Moves `choices` to the next untried alternative, backtracking from the most
/// recent waypoint. Returns false when every alternative has been tried.
pub fn next_choice(choices: &mut Vec<usize>, waypoints: &[Waypoint]) -> bool {
    choices.resize(waypoints.len(), 0);
    while let Some(last) = choices.pop() {
        let k = choices.len();
        if last + 1 < waypoints[k].alternatives {
            choices.push(last + 1);
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::namespace::Namespace;

    fn kinds(text: &str, ns: &Namespace) -> Vec<TokenKind> {
        Lexer::new(text, ns)
            .lex(&[])
            .tokens
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    fn sym(s: &str) -> TokenKind {
        TokenKind::Symbol(s.to_string())
    }

    #[test]
    fn test_basic_tokens() {
        let mut ns = Namespace::builtins();
        ns.add_variable("x", true).unwrap();
        assert_eq!(
            kinds("2x+sin(x)", &ns),
            vec![
                TokenKind::Number(2.0),
                sym("x"),
                sym("+"),
                sym("sin"),
                TokenKind::Open,
                sym("x"),
                TokenKind::Close,
            ]
        );
        assert_eq!(kinds("1.5 , 3", &ns), vec![TokenKind::Number(1.5), TokenKind::Comma, TokenKind::Number(3.0)]);
    }

    #[test]
    fn test_exponent_notation() {
        let mut ns = Namespace::builtins();
        ns.add_variable("x", true).unwrap();
        assert_eq!(
            kinds("1e2 + 2.5E-1", &ns),
            vec![TokenKind::Number(100.0), sym("+"), TokenKind::Number(0.25)]
        );
        // no digits after the marker: the constant e
        assert_eq!(kinds("2e", &ns), vec![TokenKind::Number(2.0), sym("e")]);
        assert_eq!(
            kinds("2e+x", &ns),
            vec![TokenKind::Number(2.0), sym("e"), sym("+"), sym("x")]
        );
        assert_eq!(exponent_len("e-12x"), 4);
        assert_eq!(exponent_len("e+"), 0);
    }

    #[test]
    fn test_longest_match_first_with_waypoint() {
        let mut ns = Namespace::builtins();
        ns.add_variable("a", true).unwrap();
        ns.add_variable("ab", true).unwrap();
        ns.add_variable("b", true).unwrap();
        let lexer = Lexer::new("ab", &ns);
        let first = lexer.lex(&[]);
        assert_eq!(first.tokens.unwrap()[0].kind, sym("ab"));
        assert_eq!(first.waypoints, vec![Waypoint { offset: 0, alternatives: 2 }]);
        let second = lexer.lex(&[1]);
        let tokens: Vec<TokenKind> = second.tokens.unwrap().into_iter().map(|t| t.kind).collect();
        assert_eq!(tokens, vec![sym("a"), sym("b")]);
    }

    #[test]
    fn test_unique_candidate_has_no_waypoint() {
        let mut ns = Namespace::builtins();
        ns.add_variable("x", true).unwrap();
        let lexed = Lexer::new("sin x", &ns).lex(&[]);
        assert!(lexed.waypoints.is_empty());
    }

    #[test]
    fn test_bars() {
        let mut ns = Namespace::builtins();
        ns.add_variable("x", true).unwrap();
        assert_eq!(
            kinds("|x|", &ns),
            vec![TokenKind::AbsOpen, sym("x"), TokenKind::AbsClose]
        );
        // a bar after an operand closes first; the alternative opens a nested group
        let lexer = Lexer::new("|x|", &ns);
        assert_eq!(lexer.lex(&[]).waypoints.len(), 1);
        assert!(lexer.lex(&[1]).tokens.is_err());
    }

    #[test]
    fn test_unknown_symbol() {
        let ns = Namespace::builtins();
        let err = Lexer::new("2 + qz", &ns).lex(&[]).tokens.unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnknownSymbol);
        assert_eq!((err.offset, err.len), (4, 2));
        assert_eq!(err.message, "unknown symbol 'qz'");
    }

    #[test]
    fn test_unbalanced() {
        let ns = Namespace::builtins();
        let err = Lexer::new("(1 + 2", &ns).lex(&[]).tokens.unwrap_err();
        assert_eq!((err.kind, err.offset), (ParseErrorKind::UnbalancedGroup, 0));
        let err = Lexer::new("1)", &ns).lex(&[]).tokens.unwrap_err();
        assert_eq!((err.kind, err.offset), (ParseErrorKind::UnbalancedGroup, 1));
    }

    #[test]
    fn test_next_choice() {
        let waypoints = [
            Waypoint { offset: 0, alternatives: 2 },
            Waypoint { offset: 3, alternatives: 2 },
        ];
        let mut choices = vec![];
        assert!(next_choice(&mut choices, &waypoints));
        assert_eq!(choices, vec![0, 1]);
        assert!(next_choice(&mut choices, &waypoints));
        assert_eq!(choices, vec![1]);
        assert!(!next_choice(&mut choices, &waypoints[..1]));
    }

    #[test]
    fn test_symbols_from_locals() {
        let ns = Namespace::builtins();
        let locals = crate::namespace::Locals::new(&ns, vec![Element::variable("t", true)]);
        let lexed = Lexer::new("t^2", &locals).lex(&[]);
        assert_eq!(lexed.tokens.unwrap().len(), 3);
    }
}
