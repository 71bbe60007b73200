//! Namespaces: hierarchical, (name, arity)-keyed symbol tables.
//!
//! A [`Namespace`] owns the elements added to it. It may link to parent
//! namespaces for read-only lookup; linked parents are neither owned nor iterated.
//! Every definition change is broadcast to the contained formulas, nested
//! namespaces and namespaces linked to this one, so cached parses that mention
//! the changed name are invalidated.
//!
//! Lookups go through the [`Scope`] trait so the parser can also resolve names in
//! temporary overlays ([`Locals`]) such as formula parameters or gradient variables.

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use log::{debug, warn};
use num_complex::Complex64;

use crate::element::{Element, ElementKind, ParameterDef};
use crate::errors::{EquationError, NamespaceError};
use crate::formula::Formula;
use crate::function::{FunctionId, OperatorDef};
use crate::lexer::exponent_len;
use crate::operators::catalog::catalog;

const MAX_ALIAS_DEPTH: usize = 16;

/// Characters that may not appear in user-defined names.
const RESERVED: &[char] = &[
    '(', ')', '[', ']', '{', '}', ',', '|', '=', ':', ';', '+', '-', '*', '/', '^', '√', '!', '<', '>',
    '&', '#', '\'', '"', '\\', '.', '~', '%', '?', '@', '$',
];

/// Checks the naming rules: non-empty, no whitespace, control or reserved
/// operator characters, and no leading digit.
pub fn is_valid_name(name: &str) -> bool {
    match name.chars().next() {
        None => false,
        Some(first) if first.is_ascii_digit() => false,
        Some(_) => name
            .chars()
            .all(|c| !c.is_whitespace() && !c.is_control() && !RESERVED.contains(&c)),
    }
}

/// Identifier-like runs of the text, in order of appearance. Exponents of
/// number literals such as the `e3` of `2e3` are skipped.
pub fn identifiers(text: &str) -> Vec<&str> {
    let mut words = Vec::new();
    let mut start = None;
    let mut previous = ' ';
    let mut skip_until = 0;
    for (k, c) in text.char_indices().chain(std::iter::once((text.len(), ' '))) {
        if k < skip_until {
            previous = c;
            continue;
        }
        if start.is_none() && previous.is_ascii_digit() {
            skip_until = k + exponent_len(&text[k..]);
            if skip_until > k {
                previous = c;
                continue;
            }
        }
        previous = c;
        let inside = c.is_alphabetic() || c == '_' || (start.is_some() && c.is_ascii_digit());
        match (start, inside) {
            (None, true) => start = Some(k),
            (Some(s), false) => {
                words.push(&text[s..k]);
                start = None;
            }
            _ => {}
        }
    }
    words
}

/// Read access to a symbol table.
pub trait Scope {
    /// Resolves `name` with the given arity, following aliases and links.
    fn lookup(&self, name: &str, arity: usize) -> Option<Element>;

    /// All arities under which `name` is defined.
    fn arities(&self, name: &str) -> Vec<usize>;

    /// Every name visible from this scope.
    fn names(&self) -> BTreeSet<String>;

    /// The operator inserted between juxtaposed operands, if any.
    fn implicit_multiplication(&self) -> Option<Arc<OperatorDef>>;

    fn is_name(&self, name: &str) -> bool {
        !self.arities(name).is_empty()
    }
}

/// A temporary overlay of local elements over a parent scope.
pub struct Locals<'a> {
    parent: &'a dyn Scope,
    elements: Vec<Element>,
}

impl<'a> Locals<'a> {
    pub fn new(parent: &'a dyn Scope, elements: Vec<Element>) -> Self {
        Self { parent, elements }
    }
}

impl Scope for Locals<'_> {
    fn lookup(&self, name: &str, arity: usize) -> Option<Element> {
        self.elements
            .iter()
            .find(|e| e.name() == name && e.arity() == arity)
            .cloned()
            .or_else(|| self.parent.lookup(name, arity))
    }

    fn arities(&self, name: &str) -> Vec<usize> {
        let mut arities = self.parent.arities(name);
        for element in self.elements.iter().filter(|e| e.name() == name) {
            if !arities.contains(&element.arity()) {
                arities.push(element.arity());
            }
        }
        arities
    }

    fn names(&self) -> BTreeSet<String> {
        let mut names = self.parent.names();
        names.extend(self.elements.iter().map(|e| e.name().to_string()));
        names
    }

    fn implicit_multiplication(&self) -> Option<Arc<OperatorDef>> {
        self.parent.implicit_multiplication()
    }
}

/// A namespace element reduced to what an external serializer needs.
#[derive(Debug, Clone, PartialEq)]
pub enum SavedElement {
    Variable {
        name: String,
        real: bool,
    },
    Constant {
        name: String,
        value: Complex64,
    },
    Parameter {
        name: String,
        value: Complex64,
        min: f64,
        max: f64,
        real: bool,
    },
    Alias {
        name: String,
        target: String,
        arity: usize,
    },
    Formula {
        source: String,
    },
}

/// A hierarchical symbol table.
#[derive(Debug, Default)]
pub struct Namespace {
    name: String,
    /// Slots in insertion order; removed elements leave `None` behind so
    /// indices stay stable.
    elements: Vec<Option<Element>>,
    index: HashMap<(String, usize), usize>,
    links: Vec<Rc<RefCell<Namespace>>>,
    dependents: Vec<Weak<RefCell<Namespace>>>,
    implicit_multiplication: Option<Arc<OperatorDef>>,
    pending: VecDeque<String>,
    broadcasting: bool,
}

impl Namespace {
    /// An empty namespace without operators.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// A namespace holding the built-in operators, functions and constants.
    pub fn builtins() -> Self {
        let mut ns = Namespace::new("builtins");
        for element in catalog().elements() {
            ns.insert(element);
        }
        ns.implicit_multiplication = Some(catalog().implicit_mul.clone());
        ns
    }

    /// A new namespace linked to `parent` for lookup.
    pub fn child(name: &str, parent: &Rc<RefCell<Namespace>>) -> Rc<RefCell<Namespace>> {
        let child = Rc::new(RefCell::new(Namespace::new(name)));
        Namespace::link(&child, parent);
        child
    }

    /// Links `child` to `parent`: `child` resolves names through `parent`, and
    /// changes in `parent` are broadcast to `child`.
    pub fn link(child: &Rc<RefCell<Namespace>>, parent: &Rc<RefCell<Namespace>>) {
        child.borrow_mut().links.push(parent.clone());
        parent.borrow_mut().dependents.push(Rc::downgrade(child));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_implicit_multiplication(&mut self, op: Option<Arc<OperatorDef>>) {
        self.implicit_multiplication = op;
    }

    /// Elements in insertion order.
    pub fn elements(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    fn insert(&mut self, element: Element) {
        let key = (element.name().to_string(), element.arity());
        self.index.insert(key, self.elements.len());
        self.elements.push(Some(element));
    }

    fn local(&self, name: &str, arity: usize) -> Option<&Element> {
        self.index
            .get(&(name.to_string(), arity))
            .and_then(|&slot| self.elements[slot].as_ref())
    }

    fn slot_name(&self, name: &str, arity: usize) -> String {
        if self.local(name, arity).is_none() {
            return name.to_string();
        }
        (2..)
            .map(|k| format!("{name}_{k}"))
            .find(|candidate| self.local(candidate, arity).is_none())
            .unwrap_or_else(|| name.to_string())
    }

    /// Takes ownership of `element`. If (name, arity) is taken the element is
    /// renamed with a numeric suffix. Returns the name it was stored under.
    ///
    /// # Errors
    /// `NamespaceError::InvalidName` if the name breaks the naming rules.
    pub fn add(&mut self, element: Element) -> Result<String, NamespaceError> {
        let is_operator = matches!(element.kind(), ElementKind::Operator(_));
        if !is_operator && !is_valid_name(element.name()) {
            return Err(NamespaceError::InvalidName(element.name().to_string()));
        }
        let name = self.slot_name(element.name(), element.arity());
        let element = if name == element.name() {
            element
        } else {
            debug!("'{}' is taken in '{}', storing as '{name}'", element.name(), self.name);
            element.renamed(&name)
        };
        self.insert(element);
        self.broadcast(&name);
        Ok(name)
    }

    /// Adds a free variable.
    pub fn add_variable(&mut self, name: &str, real: bool) -> Result<String, NamespaceError> {
        self.add(Element::variable(name, real))
    }

    /// Adds a live parameter and returns a handle to it.
    pub fn add_parameter(&mut self, parameter: ParameterDef) -> Result<Arc<ParameterDef>, NamespaceError> {
        let name = self.add(Element::parameter(parameter))?;
        match self.local(&name, 0).map(Element::kind) {
            Some(ElementKind::Parameter(p)) => Ok(p.clone()),
            _ => Err(NamespaceError::NotFound { name, arity: 0 }),
        }
    }

    /// Parses `name(p1, ..., pN) [:]= expression` and adds the formula, replacing
    /// an existing formula with the same name and arity. Parsing of the body is
    /// deferred until first use.
    ///
    /// # Errors
    /// `ParseError` for a malformed header, `NamespaceError::Occupied` if the slot
    /// holds something other than a formula.
    pub fn define(&mut self, text: &str) -> Result<Rc<Formula>, EquationError> {
        let formula = Rc::new(Formula::parse_definition(text)?);
        let key = (formula.name().to_string(), formula.parameters().len());
        match self.index.get(&key).copied() {
            Some(slot) => {
                let replaceable = matches!(
                    self.elements[slot].as_ref().map(Element::kind),
                    Some(ElementKind::Formula(_)) | None
                );
                if !replaceable {
                    return Err(NamespaceError::Occupied {
                        name: key.0,
                        arity: key.1,
                    }
                    .into());
                }
                self.elements[slot] = Some(Element::new(&key.0, ElementKind::Formula(formula.clone())));
            }
            None => self.insert(Element::new(&key.0, ElementKind::Formula(formula.clone()))),
        }
        self.broadcast(&key.0);
        Ok(formula)
    }

    /// Finds an element by name and arity, optionally through linked parents.
    /// Aliases are resolved transparently.
    pub fn find(&self, name: &str, arity: usize, recursive: bool) -> Option<Element> {
        self.find_at_depth(name, arity, recursive, 0)
    }

    fn find_at_depth(&self, name: &str, arity: usize, recursive: bool, depth: usize) -> Option<Element> {
        if depth > MAX_ALIAS_DEPTH {
            warn!("alias chain through '{name}' is too deep");
            return None;
        }
        let found = self.local(name, arity).cloned().or_else(|| {
            if !recursive {
                return None;
            }
            self.links
                .iter()
                .filter_map(|link| link.try_borrow().ok())
                .find_map(|link| link.find(name, arity, true))
        })?;
        match found.kind() {
            ElementKind::Alias(alias) => self.find_at_depth(&alias.target, alias.arity, true, depth + 1),
            _ => Some(found),
        }
    }

    /// Recovers the element wrapping a concrete callable, for printing.
    pub fn find_callee(&self, id: FunctionId, arity: usize) -> Option<Element> {
        let local = self.elements().find(|e| {
            e.arity() == arity
                && match e.kind() {
                    ElementKind::Function(f) => f.id() == id,
                    ElementKind::Operator(op) => op.function.id() == id,
                    _ => false,
                }
        });
        // prefer the named function over its operator spelling
        let named = self.elements().find(|e| matches!(e.kind(), ElementKind::Function(f) if f.id() == id));
        named.or(local).cloned().or_else(|| {
            self.links
                .iter()
                .filter_map(|link| link.try_borrow().ok())
                .find_map(|link| link.find_callee(id, arity))
        })
    }

    /// Renames the element at (`name`, `arity`).
    ///
    /// # Errors
    /// `NotFound` if there is no such element, `InvalidName` if `new_name` breaks the
    /// naming rules, `Occupied` if (`new_name`, `arity`) is taken.
    pub fn rename(&mut self, name: &str, arity: usize, new_name: &str) -> Result<(), NamespaceError> {
        if !is_valid_name(new_name) {
            return Err(NamespaceError::InvalidName(new_name.to_string()));
        }
        if self.local(new_name, arity).is_some() {
            return Err(NamespaceError::Occupied {
                name: new_name.to_string(),
                arity,
            });
        }
        let slot = self
            .index
            .remove(&(name.to_string(), arity))
            .ok_or_else(|| NamespaceError::NotFound {
                name: name.to_string(),
                arity,
            })?;
        let renamed = self.elements[slot].as_ref().map(|e| e.renamed(new_name));
        self.elements[slot] = renamed;
        self.index.insert((new_name.to_string(), arity), slot);
        self.broadcast(name);
        self.broadcast(new_name);
        Ok(())
    }

    /// Removes and returns the element at (`name`, `arity`).
    pub fn remove(&mut self, name: &str, arity: usize) -> Result<Element, NamespaceError> {
        let slot = self
            .index
            .remove(&(name.to_string(), arity))
            .ok_or_else(|| NamespaceError::NotFound {
                name: name.to_string(),
                arity,
            })?;
        let element = self.elements[slot].take().ok_or_else(|| NamespaceError::NotFound {
            name: name.to_string(),
            arity,
        })?;
        self.broadcast(name);
        Ok(element)
    }

    /// Notifies everything that may have cached a parse mentioning `name`.
    ///
    /// Broadcasts arriving while one is in flight are queued and handled by the
    /// outer loop. A formula that becomes dirty changes the meaning of its own
    /// name, so its name is queued in turn.
    pub fn broadcast(&mut self, name: &str) {
        self.pending.push_back(name.to_string());
        if self.broadcasting {
            return;
        }
        self.broadcasting = true;
        let mut seen = HashSet::new();
        while let Some(name) = self.pending.pop_front() {
            if !seen.insert(name.clone()) {
                continue;
            }
            let mut invalidated = Vec::new();
            for element in self.elements.iter().flatten() {
                match element.kind() {
                    ElementKind::Formula(formula) => {
                        if formula.invalidate(&name) {
                            invalidated.push(element.name().to_string());
                        }
                    }
                    ElementKind::Namespace(nested) => match nested.try_borrow_mut() {
                        Ok(mut nested) => nested.broadcast(&name),
                        Err(_) => warn!("namespace '{}' is busy, broadcast of '{name}' skipped", element.name()),
                    },
                    _ => {}
                }
            }
            self.dependents.retain(|d| d.strong_count() > 0);
            for dependent in self.dependents.iter().filter_map(Weak::upgrade) {
                match dependent.try_borrow_mut() {
                    Ok(mut dependent) => dependent.broadcast(&name),
                    Err(_) => warn!("linked namespace is busy, broadcast of '{name}' skipped"),
                }
            }
            self.pending.extend(invalidated);
        }
        self.broadcasting = false;
    }

    /// Order-stable records of every user element. Built-in functions,
    /// operators and nested namespaces are not saved.
    pub fn save_elements(&self) -> Vec<SavedElement> {
        self.elements()
            .filter_map(|element| match element.kind() {
                ElementKind::Variable(v) => Some(SavedElement::Variable {
                    name: element.name().to_string(),
                    real: v.real,
                }),
                ElementKind::Constant(c) => Some(SavedElement::Constant {
                    name: element.name().to_string(),
                    value: c.value,
                }),
                ElementKind::Parameter(p) => {
                    let (min, max) = p.bounds();
                    Some(SavedElement::Parameter {
                        name: element.name().to_string(),
                        value: p.value(),
                        min,
                        max,
                        real: p.is_real(),
                    })
                }
                ElementKind::Alias(alias) => Some(SavedElement::Alias {
                    name: element.name().to_string(),
                    target: alias.target.clone(),
                    arity: alias.arity,
                }),
                ElementKind::Formula(formula) => Some(SavedElement::Formula {
                    source: formula.source().to_string(),
                }),
                ElementKind::Function(_) | ElementKind::Operator(_) | ElementKind::Namespace(_) => None,
            })
            .collect()
    }

    /// Re-adds saved records in order.
    pub fn restore(&mut self, records: &[SavedElement]) -> Result<(), EquationError> {
        for record in records {
            match record {
                SavedElement::Variable { name, real } => {
                    self.add(Element::variable(name, *real))?;
                }
                SavedElement::Constant { name, value } => {
                    self.add(Element::constant(name, *value))?;
                }
                SavedElement::Parameter {
                    name,
                    value,
                    min,
                    max,
                    real,
                } => {
                    let parameter = if *real {
                        ParameterDef::new(name, value.re, *min, *max)
                    } else {
                        ParameterDef::complex(name, *value)
                    };
                    self.add(Element::parameter(parameter))?;
                }
                SavedElement::Alias { name, target, arity } => {
                    self.add(Element::alias(name, target, *arity))?;
                }
                SavedElement::Formula { source } => {
                    self.define(source)?;
                }
            }
        }
        Ok(())
    }
}

impl Scope for Namespace {
    fn lookup(&self, name: &str, arity: usize) -> Option<Element> {
        self.find(name, arity, true)
    }

    fn arities(&self, name: &str) -> Vec<usize> {
        let mut arities: Vec<usize> = self
            .index
            .keys()
            .filter(|(n, _)| n == name)
            .map(|(_, arity)| *arity)
            .collect();
        for link in self.links.iter().filter_map(|link| link.try_borrow().ok()) {
            for arity in link.arities(name) {
                if !arities.contains(&arity) {
                    arities.push(arity);
                }
            }
        }
        arities.sort_unstable();
        arities
    }

    fn names(&self) -> BTreeSet<String> {
        let mut names: BTreeSet<String> = self.index.keys().map(|(n, _)| n.clone()).collect();
        for link in self.links.iter().filter_map(|link| link.try_borrow().ok()) {
            names.extend(link.names());
        }
        names
    }

    fn implicit_multiplication(&self) -> Option<Arc<OperatorDef>> {
        self.implicit_multiplication.clone().or_else(|| {
            self.links
                .iter()
                .filter_map(|link| link.try_borrow().ok())
                .find_map(|link| link.implicit_multiplication())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::FormulaState;

    #[test]
    fn test_identifiers_skip_exponents() {
        assert_eq!(identifiers("1e2*x + 3E-4*y2"), vec!["x", "y2"]);
        assert_eq!(identifiers("2e + x2e3"), vec!["e", "x2e3"]);
    }

    #[test]
    fn test_valid_names() {
        assert!(is_valid_name("x"));
        assert!(is_valid_name("alpha_2"));
        assert!(is_valid_name("π"));
        assert!(!is_valid_name("2x"));
        assert!(!is_valid_name("a b"));
        assert!(!is_valid_name("a+b"));
        assert!(!is_valid_name(""));
    }

    #[test]
    fn test_add_auto_suffixes() {
        let mut ns = Namespace::new("test");
        assert_eq!(ns.add_variable("x", true).unwrap(), "x");
        assert_eq!(ns.add_variable("x", true).unwrap(), "x_2");
        assert_eq!(ns.add_variable("x", false).unwrap(), "x_3");
        assert!(ns.find("x_2", 0, false).is_some());
        assert!(matches!(ns.add_variable("1x", true), Err(NamespaceError::InvalidName(_))));
    }

    #[test]
    fn test_find_resolves_aliases_and_links() {
        let parent = Rc::new(RefCell::new(Namespace::builtins()));
        let child = Namespace::child("user", &parent);
        child.borrow_mut().add_variable("t", true).unwrap();

        let ns = child.borrow();
        let log = ns.find("log", 1, true).unwrap();
        assert!(matches!(log.kind(), ElementKind::Function(f) if f.name() == "ln"));
        assert!(ns.find("sin", 1, false).is_none());
        assert!(ns.find("sin", 1, true).is_some());
        assert!(ns.find("t", 0, true).is_some());
        assert!(ns.implicit_multiplication().is_some());
        assert_eq!(ns.arities("-"), vec![1, 2]);
    }

    #[test]
    fn test_find_callee() {
        let ns = Namespace::builtins();
        let c = catalog();
        let found = ns.find_callee(c.sqrt.id(), 1).unwrap();
        assert_eq!(found.name(), "sqrt");
        let found = ns.find_callee(c.add.id(), 2).unwrap();
        assert_eq!(found.name(), "+");
    }

    #[test]
    fn test_rename_and_remove() {
        let mut ns = Namespace::new("test");
        ns.add_variable("a", true).unwrap();
        ns.add_variable("b", true).unwrap();
        assert!(matches!(ns.rename("a", 0, "b"), Err(NamespaceError::Occupied { .. })));
        ns.rename("a", 0, "c").unwrap();
        assert!(ns.find("a", 0, false).is_none());
        let c = ns.find("c", 0, false).unwrap();
        assert!(matches!(c.kind(), ElementKind::Variable(v) if v.name == "c"));
        ns.remove("b", 0).unwrap();
        assert!(matches!(ns.remove("b", 0), Err(NamespaceError::NotFound { .. })));
        assert_eq!(ns.len(), 1);
    }

    #[test]
    fn test_redefinition_invalidates_dependents() {
        let mut ns = Namespace::builtins();
        ns.define("a = 2").unwrap();
        let b = ns.define("b = a + 1").unwrap();
        let c = ns.define("c = b * 3").unwrap();
        c.tree(&ns).unwrap();
        assert!(matches!(b.state(), FormulaState::Valid(_)));
        assert!(matches!(c.state(), FormulaState::Valid(_)));

        ns.define("a = 5").unwrap();
        assert!(matches!(b.state(), FormulaState::Dirty));
        // c only mentions b; it is reached through b's own broadcast
        assert!(matches!(c.state(), FormulaState::Dirty));
    }

    #[test]
    fn test_broadcast_reaches_linked_namespaces() {
        let parent = Rc::new(RefCell::new(Namespace::builtins()));
        parent.borrow_mut().define("k = 2").unwrap();
        let child = Namespace::child("user", &parent);
        let f = child.borrow_mut().define("f(x) = k*x").unwrap();
        f.tree(&*child.borrow()).unwrap();
        assert!(matches!(f.state(), FormulaState::Valid(_)));
        parent.borrow_mut().define("k = 3").unwrap();
        assert!(matches!(f.state(), FormulaState::Dirty));
    }

    #[test]
    fn test_define_refuses_non_formula_slot() {
        let mut ns = Namespace::builtins();
        assert!(matches!(
            ns.define("sin(x) = x"),
            Err(EquationError::Namespace(NamespaceError::Occupied { .. }))
        ));
    }

    #[test]
    fn test_save_and_restore() {
        let mut ns = Namespace::builtins();
        ns.add_variable("t", true).unwrap();
        ns.add_parameter(ParameterDef::new("a", 0.5, 0.0, 1.0)).unwrap();
        ns.define("f(x) = a*x + t").unwrap();
        let saved = ns.save_elements();
        assert_eq!(saved.len(), 3);
        assert!(matches!(&saved[2], SavedElement::Formula { source } if source == "f(x) = a*x + t"));

        let mut restored = Namespace::builtins();
        restored.restore(&saved).unwrap();
        assert_eq!(restored.save_elements(), saved);
    }
}
