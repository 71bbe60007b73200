//! User formulas: `name(p1, ..., pN) [:]= expression`.
//!
//! A [`Formula`] keeps its source text and parses the body lazily. Its state moves
//! from `Dirty` through `Parsing` to `Valid` or `Error`; redefining any name the
//! body mentions puts it back to `Dirty`. Reaching a formula while it is
//! `Parsing` means the formula refers to itself.

use std::cell::RefCell;
use std::sync::Arc;

use crate::element::{Element, VariableDef};
use crate::errors::{ParseError, ParseErrorKind};
use crate::expr::Tree;
use crate::namespace::{is_valid_name, Locals, Scope};
use crate::parser::parse;

/// Parse state of a formula body.
#[derive(Debug, Clone)]
pub enum FormulaState {
    Dirty,
    Parsing,
    Valid(Tree),
    Error(ParseError),
}

/// Result of splitting a definition into header and body.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub name: String,
    pub parameters: Vec<String>,
    /// Byte offset of the body in the definition text.
    pub body_offset: usize,
}

/// Splits `name(p1, ..., pN) [:]= body`. Returns `Ok(None)` for text without
/// a definition sign.
///
/// # Errors
/// `InvalidHeader` for a malformed left-hand side, `InvalidName` for a name or
/// parameter that breaks the naming rules.
pub fn split_header(text: &str) -> Result<Option<Header>, ParseError> {
    let Some(eq) = text.find('=') else {
        return Ok(None);
    };
    let lhs_end = if text[..eq].ends_with(':') { eq - 1 } else { eq };
    let lhs = &text[..lhs_end];
    let lhs_start = lhs.len() - lhs.trim_start().len();
    let lhs = lhs.trim();
    if lhs.is_empty() {
        return Err(ParseError::new(
            ParseErrorKind::InvalidHeader,
            "missing name before '='",
            eq,
            1,
        ));
    }

    let (name, parameters) = match lhs.find('(') {
        None => (lhs, Vec::new()),
        Some(open) => {
            let Some(inner) = lhs[open + 1..].strip_suffix(')') else {
                return Err(ParseError::new(
                    ParseErrorKind::InvalidHeader,
                    "expected ')' after parameters",
                    lhs_start + open,
                    lhs.len() - open,
                ));
            };
            let parameters: Vec<String> = if inner.trim().is_empty() {
                Vec::new()
            } else {
                inner.split(',').map(|p| p.trim().to_string()).collect()
            };
            (lhs[..open].trim_end(), parameters)
        }
    };

    if !is_valid_name(name) {
        return Err(ParseError::new(
            ParseErrorKind::InvalidName,
            format!("invalid formula name '{name}'"),
            lhs_start,
            name.len(),
        ));
    }
    for (k, parameter) in parameters.iter().enumerate() {
        if !is_valid_name(parameter) {
            return Err(ParseError::new(
                ParseErrorKind::InvalidName,
                format!("invalid parameter name '{parameter}'"),
                lhs_start,
                lhs.len(),
            ));
        }
        if parameters[..k].contains(parameter) {
            return Err(ParseError::new(
                ParseErrorKind::InvalidHeader,
                format!("duplicate parameter '{parameter}'"),
                lhs_start,
                lhs.len(),
            ));
        }
    }

    Ok(Some(Header {
        name: name.to_string(),
        parameters,
        body_offset: eq + 1,
    }))
}

/// A lazily parsed user formula.
#[derive(Debug)]
pub struct Formula {
    name: String,
    parameters: Vec<String>,
    source: String,
    body_offset: usize,
    state: RefCell<FormulaState>,
}

impl Formula {
    /// Builds a formula from a full definition.
    pub fn parse_definition(text: &str) -> Result<Formula, ParseError> {
        let header = split_header(text)?.ok_or_else(|| {
            ParseError::new(
                ParseErrorKind::InvalidHeader,
                "expected 'name(parameters) = expression'",
                0,
                text.len(),
            )
        })?;
        if text[header.body_offset..].trim().is_empty() {
            return Err(ParseError::new(
                ParseErrorKind::MissingOperand,
                "empty formula body",
                header.body_offset,
                0,
            ));
        }
        Ok(Formula {
            name: header.name,
            parameters: header.parameters,
            source: text.to_string(),
            body_offset: header.body_offset,
            state: RefCell::new(FormulaState::Dirty),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// The full definition text.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn body(&self) -> &str {
        &self.source[self.body_offset..]
    }

    pub fn state(&self) -> FormulaState {
        self.state.borrow().clone()
    }

    /// The parsed body, parsing it on first access.
    ///
    /// Errors are cached with the formula until one of the names it mentions
    /// is redefined.
    pub fn tree(&self, scope: &dyn Scope) -> Result<Tree, ParseError> {
        match &*self.state.borrow() {
            FormulaState::Valid(tree) => return Ok(tree.clone()),
            FormulaState::Error(e) => return Err(e.clone()),
            FormulaState::Parsing => {
                return Err(ParseError::new(
                    ParseErrorKind::Recursive,
                    format!("'{}' refers to itself", self.name),
                    self.body_offset,
                    self.body().len(),
                ))
            }
            FormulaState::Dirty => {}
        }
        *self.state.borrow_mut() = FormulaState::Parsing;
        let result = self.parse_body(scope);
        *self.state.borrow_mut() = match &result {
            Ok(tree) => FormulaState::Valid(tree.clone()),
            Err(e) => FormulaState::Error(e.clone()),
        };
        result
    }

    fn parse_body(&self, scope: &dyn Scope) -> Result<Tree, ParseError> {
        let parameters: Vec<Arc<VariableDef>> = self
            .parameters
            .iter()
            .map(|name| {
                Arc::new(VariableDef {
                    name: name.clone(),
                    real: true,
                })
            })
            .collect();
        let locals = Locals::new(
            scope,
            parameters
                .iter()
                .map(|p| Element::variable(&p.name, p.real))
                .collect(),
        );
        let root = parse(self.body(), &locals).map_err(|e| e.shifted(self.body_offset))?;
        Ok(Tree { root, parameters })
    }

    /// Marks the formula dirty if its body mentions `name`. Returns true if the
    /// state changed.
    pub fn invalidate(&self, name: &str) -> bool {
        let mut state = self.state.borrow_mut();
        if matches!(*state, FormulaState::Dirty | FormulaState::Parsing) || !self.body().contains(name) {
            return false;
        }
        *state = FormulaState::Dirty;
        true
    }

    /// The same definition under another name, unparsed.
    pub fn renamed(&self, name: &str) -> Formula {
        let header = if self.parameters.is_empty() {
            name.to_string()
        } else {
            format!("{name}({})", self.parameters.join(", "))
        };
        let body = self.body();
        let source = format!("{header} ={body}");
        Formula {
            name: name.to_string(),
            parameters: self.parameters.clone(),
            body_offset: header.len() + 2,
            source,
            state: RefCell::new(FormulaState::Dirty),
        }
    }
}
