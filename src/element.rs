//! Namespace elements: every named symbol a formula can refer to.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::{Arc, Mutex, RwLock};

use num_complex::Complex64;

use crate::formula::Formula;
use crate::function::{FunctionDef, OperatorDef};
use crate::namespace::Namespace;
use crate::range::Range;

/// A free variable. Real variables let the compiler pick real-valued kernels.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDef {
    pub name: String,
    pub real: bool,
}

impl VariableDef {
    pub fn range(&self) -> Range {
        if self.real {
            Range::REAL
        } else {
            Range::COMPLEX
        }
    }
}

/// A named fixed value such as `pi`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantDef {
    pub name: String,
    pub value: Complex64,
}

/// Animation state of a parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Animation {
    /// Units per second.
    pub speed: f64,
    pub playing: bool,
    direction: f64,
}

impl Default for Animation {
    fn default() -> Self {
        Self {
            speed: 1.0,
            playing: false,
            direction: 1.0,
        }
    }
}

/// A named value that can change between evaluations without recompiling.
///
/// The live value sits behind a lock so compiled evaluators on other threads can
/// read it when their contexts are synchronized.
#[derive(Debug)]
pub struct ParameterDef {
    name: String,
    value: RwLock<Complex64>,
    min: f64,
    max: f64,
    real: bool,
    animation: Mutex<Animation>,
}

impl ParameterDef {
    pub fn new(name: &str, value: f64, min: f64, max: f64) -> Self {
        Self {
            name: name.to_string(),
            value: RwLock::new(Complex64::new(value.clamp(min, max), 0.0)),
            min,
            max,
            real: true,
            animation: Mutex::new(Animation::default()),
        }
    }

    /// A parameter that may hold any complex value.
    pub fn complex(name: &str, value: Complex64) -> Self {
        Self {
            name: name.to_string(),
            value: RwLock::new(value),
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            real: false,
            animation: Mutex::new(Animation::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    pub fn is_real(&self) -> bool {
        self.real
    }

    pub fn value(&self) -> Complex64 {
        match self.value.read() {
            Ok(v) => *v,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Sets the live value. Real parameters drop the imaginary part and clamp to bounds.
    pub fn set(&self, value: Complex64) {
        let value = if self.real {
            Complex64::new(value.re.clamp(self.min, self.max), 0.0)
        } else {
            value
        };
        match self.value.write() {
            Ok(mut v) => *v = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }

    /// The range implied by realness and bounds.
    pub fn range(&self) -> Range {
        if !self.real {
            Range::COMPLEX
        } else if self.min > 0.0 {
            Range::POSITIVE
        } else if self.min >= 0.0 {
            Range::NONNEGATIVE
        } else {
            Range::REAL
        }
    }

    pub fn animation(&self) -> Animation {
        match self.animation.lock() {
            Ok(a) => *a,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn set_animation(&self, speed: f64, playing: bool) {
        let mut guard = match self.animation.lock() {
            Ok(a) => a,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.speed = speed;
        guard.playing = playing;
    }

    /// Advances a playing animation by `dt` seconds, bouncing between the bounds.
    /// Unbounded or paused parameters do not move. Returns the new value.
    pub fn step(&self, dt: f64) -> Complex64 {
        let mut animation = match self.animation.lock() {
            Ok(a) => a,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current = self.value();
        if !animation.playing || !self.real || !self.min.is_finite() || !self.max.is_finite() {
            return current;
        }
        let span = self.max - self.min;
        if span <= 0.0 {
            return current;
        }
        let delta = animation.speed * animation.direction * dt;
        if !delta.is_finite() {
            return current;
        }
        // fold the travel into one period of the bounce; the second half runs backwards
        let phase = (current.re - self.min + delta).rem_euclid(2.0 * span);
        let next = if phase > span {
            animation.direction = -animation.direction;
            self.min + 2.0 * span - phase
        } else {
            self.min + phase
        };
        drop(animation);
        self.set(Complex64::new(next, 0.0));
        self.value()
    }

    /// A copy of this parameter under another name, keeping value and bounds.
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            value: RwLock::new(self.value()),
            min: self.min,
            max: self.max,
            real: self.real,
            animation: Mutex::new(self.animation()),
        }
    }
}

/// Transparent substitution of one name for another of the same arity.
#[derive(Debug, Clone, PartialEq)]
pub struct AliasDef {
    pub target: String,
    pub arity: usize,
}

/// The payload of a namespace element.
#[derive(Debug, Clone)]
pub enum ElementKind {
    Function(Arc<FunctionDef>),
    Operator(Arc<OperatorDef>),
    Variable(Arc<VariableDef>),
    Parameter(Arc<ParameterDef>),
    Constant(Arc<ConstantDef>),
    Alias(AliasDef),
    Formula(Rc<Formula>),
    Namespace(Rc<RefCell<Namespace>>),
}

/// A named symbol owned by a namespace.
#[derive(Debug, Clone)]
pub struct Element {
    name: String,
    kind: ElementKind,
}

impl Element {
    pub fn new(name: &str, kind: ElementKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }

    pub fn function(def: Arc<FunctionDef>) -> Self {
        let name = def.name().to_string();
        Self::new(&name, ElementKind::Function(def))
    }

    pub fn operator(def: Arc<OperatorDef>) -> Self {
        let name = def.symbol.clone();
        Self::new(&name, ElementKind::Operator(def))
    }

    pub fn variable(name: &str, real: bool) -> Self {
        Self::new(
            name,
            ElementKind::Variable(Arc::new(VariableDef {
                name: name.to_string(),
                real,
            })),
        )
    }

    pub fn constant(name: &str, value: Complex64) -> Self {
        Self::new(
            name,
            ElementKind::Constant(Arc::new(ConstantDef {
                name: name.to_string(),
                value,
            })),
        )
    }

    pub fn parameter(def: ParameterDef) -> Self {
        let name = def.name().to_string();
        Self::new(&name, ElementKind::Parameter(Arc::new(def)))
    }

    pub fn alias(name: &str, target: &str, arity: usize) -> Self {
        Self::new(
            name,
            ElementKind::Alias(AliasDef {
                target: target.to_string(),
                arity,
            }),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ElementKind {
        &self.kind
    }

    /// Number of arguments the element takes when referenced.
    pub fn arity(&self) -> usize {
        match &self.kind {
            ElementKind::Function(f) => f.arity(),
            ElementKind::Operator(op) => op.arity(),
            ElementKind::Alias(alias) => alias.arity,
            ElementKind::Formula(formula) => formula.parameters().len(),
            ElementKind::Variable(_)
            | ElementKind::Parameter(_)
            | ElementKind::Constant(_)
            | ElementKind::Namespace(_) => 0,
        }
    }

    /// True if the element can stand on its own as an operand.
    pub fn is_operand(&self) -> bool {
        match &self.kind {
            ElementKind::Variable(_) | ElementKind::Parameter(_) | ElementKind::Constant(_) => true,
            ElementKind::Function(f) => f.arity() == 0,
            ElementKind::Formula(formula) => formula.parameters().is_empty(),
            _ => false,
        }
    }

    /// The element under a new name. Value-like payloads are rebuilt so trees
    /// created afterwards print the new name.
    pub fn renamed(&self, name: &str) -> Element {
        let kind = match &self.kind {
            ElementKind::Variable(v) => ElementKind::Variable(Arc::new(VariableDef {
                name: name.to_string(),
                real: v.real,
            })),
            ElementKind::Constant(c) => ElementKind::Constant(Arc::new(ConstantDef {
                name: name.to_string(),
                value: c.value,
            })),
            ElementKind::Parameter(p) => ElementKind::Parameter(Arc::new(p.renamed(name))),
            ElementKind::Formula(f) => ElementKind::Formula(Rc::new(f.renamed(name))),
            other => other.clone(),
        };
        Element::new(name, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_clamps_real_values() {
        let p = ParameterDef::new("a", 0.5, 0.0, 1.0);
        p.set(Complex64::new(3.0, 2.0));
        assert_eq!(p.value(), Complex64::new(1.0, 0.0));
        assert_eq!(p.range(), Range::NONNEGATIVE);
    }

    #[test]
    fn test_parameter_animation_bounces() {
        let p = ParameterDef::new("a", 0.5, 0.0, 1.0);
        p.set_animation(1.0, true);
        let v = p.step(0.25);
        assert!((v.re - 0.75).abs() < 1e-12);
        // overshoots 1.0 by 0.25 and reflects
        let v = p.step(0.5);
        assert!((v.re - 0.75).abs() < 1e-12);
        // now moving down
        let v = p.step(0.25);
        assert!((v.re - 0.5).abs() < 1e-12);
        assert!(p.animation().playing);
    }

    #[test]
    fn test_parameter_animation_with_huge_speed() {
        let p = ParameterDef::new("a", 0.5, 0.0, 1.0);
        p.set_animation(1e10, true);
        let v = p.step(1.0);
        assert!((0.0..=1.0).contains(&v.re));

        // several periods plus a reflection: 0.9 + 4.3 = 5.2, i.e. 1.2 in the period
        let p = ParameterDef::new("b", 0.9, 0.0, 1.0);
        p.set_animation(1.0, true);
        let v = p.step(4.3);
        assert!((v.re - 0.8).abs() < 1e-12);
        let v = p.step(0.1);
        assert!((v.re - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_parameter_animation_with_infinite_speed() {
        let p = ParameterDef::new("a", 0.5, 0.0, 1.0);
        p.set_animation(f64::INFINITY, true);
        assert_eq!(p.step(1.0), Complex64::new(0.5, 0.0));
        p.set_animation(f64::NAN, true);
        assert_eq!(p.step(1.0), Complex64::new(0.5, 0.0));
    }

    #[test]
    fn test_paused_parameter_does_not_move() {
        let p = ParameterDef::new("a", 0.5, 0.0, 1.0);
        assert_eq!(p.step(10.0), Complex64::new(0.5, 0.0));
    }

    #[test]
    fn test_element_arity() {
        assert_eq!(Element::variable("x", true).arity(), 0);
        assert!(Element::constant("c", Complex64::new(2.0, 0.0)).is_operand());
        assert_eq!(Element::alias("π", "pi", 0).arity(), 0);
    }

    #[test]
    fn test_renamed_variable() {
        let e = Element::variable("x", true).renamed("t");
        match e.kind() {
            ElementKind::Variable(v) => assert_eq!(v.name, "t"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(e.name(), "t");
    }
}
