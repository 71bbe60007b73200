//! Mathematical equation evaluation and differentiation.
//!
//! This module provides the core `Equation` type which represents a mathematical expression
//! that can be evaluated and differentiated. Equations are parsed, simplified and compiled to
//! bytecode on creation, and their first and second derivatives are compiled alongside.
//!
//! # Features
//!
//! - Complex-valued evaluation with real kernels wherever realness inference allows
//! - Symbolic differentiation up to second order, simplified before compilation
//! - Formula headers (`f(x, y) = ...`) fixing the input order
//! - Parameters whose live values are read at evaluation time
//!
//! # Example
//!
//! ```
//! use mathexpr_vm::Equation;
//!
//! let eq = Equation::new("2*x + y^2".to_string()).unwrap();
//! let result = eq.eval(&[1.0, 2.0]).unwrap(); // 6
//! let gradient = eq.gradient(&[1.0, 2.0]).unwrap(); // [2, 4]
//! assert_eq!(result.re, 6.0);
//! assert_eq!(gradient[1].re, 4.0);
//! ```
//!
//! # Variable Handling
//!
//! Variables are
//! - the header parameters in order, for `name(p1, ..., pN) = body`
//! - otherwise the variables the expression uses, sorted alphabetically
//! - or explicitly mapped to indices using `from_var_map()`
//!
//! Input arrays must match the variable ordering.

use std::collections::HashMap;
use std::sync::Arc;

use colored::Colorize;
use itertools::Itertools;
use num_complex::Complex64;

use crate::backends::vector::Vector;
use crate::builder::compile_trees;
use crate::config::EngineConfig;
use crate::convert::{denormalize, normalize};
use crate::derivative::differentiate;
use crate::element::VariableDef;
use crate::errors::{DeriveError, EquationError};
use crate::evaluator::Evaluator;
use crate::expr::Node;
use crate::formula::{split_header, Formula};
use crate::namespace::{identifiers, Namespace, Scope};
use crate::parser::parse;
use crate::rules::RuleSet;
use crate::simplify::Simplifier;
use crate::system::EquationSystem;

/// Declares every identifier of `text` that `ns` does not know as a real variable.
///
/// Header parameters of a definition are left alone; they are local to the body.
pub fn declare_unknowns(ns: &mut Namespace, text: &str) -> Result<(), EquationError> {
    let (body, parameters) = match split_header(text)? {
        Some(header) => (&text[header.body_offset..], header.parameters),
        None => (text, Vec::new()),
    };
    for word in identifiers(body) {
        if !parameters.iter().any(|p| p == word) && !ns.is_name(word) {
            ns.add_variable(word, true)?;
        }
    }
    Ok(())
}

/// Parses and simplifies `text`.
///
/// # Returns
/// The simplified tree and the variables it is evaluated over: the header
/// parameters of a definition, otherwise the variables the expression uses,
/// sorted by name.
pub(crate) fn prepare(
    text: &str,
    ns: &Namespace,
    simplifier: &Simplifier,
) -> Result<(Node, Vec<Arc<VariableDef>>), EquationError> {
    let (root, variables) = match split_header(text)? {
        Some(_) => {
            let tree = Formula::parse_definition(text)?.tree(ns)?;
            (tree.root, tree.parameters)
        }
        None => {
            let root = parse(text, ns)?;
            let variables = root.variables();
            (root, variables)
        }
    };
    if let Some(missing) = root
        .variables()
        .into_iter()
        .find(|v| !variables.iter().any(|known| known.name == v.name))
    {
        return Err(EquationError::VariableNotFound(missing.name.clone()));
    }
    Ok((simplifier.simplify(normalize(root)), variables))
}

/// Represents a mathematical equation that can be evaluated and differentiated.
///
/// This struct holds the simplified tree and compiled evaluators for:
/// - Evaluating the equation
/// - Computing first order partial derivatives, one evaluator per variable plus
///   one multi-output evaluator for the whole gradient
/// - Computing second order partial derivatives (Hessian) in one evaluator
///
/// If the equation cannot be differentiated (e.g. it calls `random()`), it still
/// evaluates; the derivative methods return the reason as an error.
pub struct Equation {
    equation_str: String,
    tree: Node,
    evaluator: Evaluator,
    derivatives_first_order: HashMap<String, Evaluator>,
    gradient: Option<Evaluator>,
    hessian: Option<Evaluator>,
    derivative_error: Option<DeriveError>,
    var_map: HashMap<String, u32>,
    sorted_variables: Vec<String>,
    variables: Vec<Arc<VariableDef>>,
    config: EngineConfig,
}

impl std::fmt::Debug for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{{\n")?;
        writeln!(f, "    {}: {}\n", "Equation".cyan(), self.equation_str)?;
        writeln!(f, "    {}: {}\n", "Tree".cyan(), self.tree.structure())?;
        writeln!(f, "    {}: {:?}\n", "Variables".cyan(), self.var_map)?;
        writeln!(
            f,
            "    {}: {:?}\n",
            "Sorted Variables".cyan(),
            self.sorted_variables
        )?;
        writeln!(
            f,
            "    {}: {} instructions\n",
            "Bytecode".cyan(),
            self.evaluator.instructions().len()
        )?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

impl std::fmt::Display for Equation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{{\n")?;
        writeln!(f, "    {}: {}\n", "Equation".cyan(), self.equation_str)?;
        writeln!(f, "    {}: {}\n", "Simplified".cyan(), denormalize(&self.tree))?;
        writeln!(
            f,
            "    {}: {:?}\n",
            "Sorted Variables".cyan(),
            self.sorted_variables
        )?;
        writeln!(f, "}}")?;
        Ok(())
    }
}

impl Equation {
    /// Creates a new `Equation` from a string representation.
    ///
    /// Identifiers that are neither built-ins nor header parameters are declared as
    /// real variables. Without a header the variables are sorted alphabetically and
    /// it is assumed that the input array of values will be in the same order.
    ///
    /// # Arguments
    /// * `equation_str` - The equation as a string (e.g. "2*x + y^2" or "f(y, x) = 2*x + y^2")
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::Equation;
    /// let eq = Equation::new("2*x + y^2".to_string()).unwrap();
    /// let result = eq.eval(&[1.0, 2.0]).unwrap(); // x=1, y=2 -> 2*1 + 2^2 = 6
    /// assert_eq!(result.re, 6.0);
    /// ```
    pub fn new(equation_str: String) -> Result<Self, EquationError> {
        let mut ns = Namespace::builtins();
        declare_unknowns(&mut ns, &equation_str)?;
        Self::with_config(&equation_str, &ns, EngineConfig::default())
    }

    /// Creates an `Equation` whose symbols all come from `ns`.
    ///
    /// # Errors
    /// `EquationError::Parse` if the text uses a name `ns` does not define.
    pub fn with_namespace(equation_str: &str, ns: &Namespace) -> Result<Self, EquationError> {
        Self::with_config(equation_str, ns, EngineConfig::default())
    }

    pub fn with_config(
        equation_str: &str,
        ns: &Namespace,
        config: EngineConfig,
    ) -> Result<Self, EquationError> {
        let simplifier = Simplifier::new(&config);
        let (tree, variables) = prepare(equation_str, ns, &simplifier)?;
        Self::build(equation_str.to_string(), tree, variables, config)
    }

    /// Like [`Equation::with_config`], additionally simplifying with user rules.
    pub fn with_rules(
        equation_str: &str,
        ns: &Namespace,
        config: EngineConfig,
        rules: &RuleSet,
    ) -> Result<Self, EquationError> {
        let simplifier = Simplifier::new(&config).with_rules(rules);
        let (tree, variables) = prepare(equation_str, ns, &simplifier)?;
        Self::build(equation_str.to_string(), tree, variables, config)
    }

    /// Creates a new `Equation` from a map of variable names to their indices.
    ///
    /// # Arguments
    /// * `equation_str` - The equation as a string
    /// * `variables` - A map of variable names to their indices in input arrays
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::Equation;
    /// # use std::collections::HashMap;
    /// let mut vars = HashMap::new();
    /// vars.insert("y".to_string(), 0); // y will be first in input arrays
    /// vars.insert("x".to_string(), 1); // x will be second
    ///
    /// let eq = Equation::from_var_map("2*x + y^2".to_string(), &vars).unwrap();
    /// let result = eq.eval(&[2.0, 1.0]).unwrap(); // y=2, x=1 -> 2*1 + 2^2 = 6
    /// assert_eq!(result.re, 6.0);
    /// ```
    ///
    /// # Errors
    /// `EquationError::VariableNotFound` if the equation uses a name that is
    /// neither a built-in nor in the map.
    pub fn from_var_map(
        equation_str: String,
        variables: &HashMap<String, u32>,
    ) -> Result<Self, EquationError> {
        let (ns, inputs) = namespace_from_var_map(variables)?;
        let unknown: Vec<&str> = identifiers(&equation_str)
            .into_iter()
            .filter(|word| !ns.is_name(word))
            .unique()
            .collect();
        if !unknown.is_empty() {
            return Err(EquationError::VariableNotFound(unknown.join(", ")));
        }
        let config = EngineConfig::default();
        let root = parse(&equation_str, &ns)?;
        let tree = Simplifier::new(&config).simplify(normalize(root));
        Self::build(equation_str, tree, inputs, config)
    }

    /// Compiles the value, the gradient and the Hessian of a simplified tree.
    fn build(
        equation_str: String,
        tree: Node,
        variables: Vec<Arc<VariableDef>>,
        config: EngineConfig,
    ) -> Result<Self, EquationError> {
        let sorted_variables: Vec<String> = variables.iter().map(|v| v.name.clone()).collect();
        let var_map: HashMap<String, u32> = sorted_variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i as u32))
            .collect();
        let evaluator = compile_trees(std::slice::from_ref(&tree), &variables, &config)?;

        let mut equation = Self {
            equation_str,
            tree,
            evaluator,
            derivatives_first_order: HashMap::new(),
            gradient: None,
            hessian: None,
            derivative_error: None,
            var_map,
            sorted_variables,
            variables,
            config,
        };
        match equation.derivative_trees() {
            Ok((first, second)) => {
                for (name, derivative) in equation.sorted_variables.iter().zip(&first) {
                    let evaluator = compile_trees(
                        std::slice::from_ref(derivative),
                        &equation.variables,
                        &equation.config,
                    )?;
                    equation.derivatives_first_order.insert(name.clone(), evaluator);
                }
                equation.gradient = Some(compile_trees(&first, &equation.variables, &equation.config)?);
                equation.hessian = Some(compile_trees(&second, &equation.variables, &equation.config)?);
            }
            Err(e) => equation.derivative_error = Some(e),
        }
        Ok(equation)
    }

    /// First derivatives per variable, and second derivatives row by row.
    fn derivative_trees(&self) -> Result<(Vec<Node>, Vec<Node>), DeriveError> {
        let scope = Namespace::builtins();
        let first = self
            .sorted_variables
            .iter()
            .map(|v| differentiate(&self.tree, v, &scope, &self.config))
            .collect::<Result<Vec<_>, _>>()?;
        let mut second = Vec::with_capacity(first.len() * first.len());
        for derivative in &first {
            for v in &self.sorted_variables {
                second.push(differentiate(derivative, v, &scope, &self.config)?);
            }
        }
        Ok((first, second))
    }

    fn derivative_unavailable(&self) -> EquationError {
        match &self.derivative_error {
            Some(e) => EquationError::Derive(e.clone()),
            None => EquationError::DerivativeNotFound(self.equation_str.clone()),
        }
    }

    /// Evaluates the equation for the given real input values.
    ///
    /// # Arguments
    /// * `values` - Input values corresponding to variables in order
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::Equation;
    /// let eq = Equation::new("2*x + y^2".to_string()).unwrap();
    /// let result = eq.eval(&[1.0, 2.0]).unwrap(); // x=1, y=2
    /// assert_eq!(result.re, 6.0); // 2*1 + 2^2 = 6
    /// ```
    ///
    /// # Errors
    /// Returns `EquationError::InvalidInputLength` if the length of values doesn't match
    /// the number of variables.
    pub fn eval<V: Vector>(&self, values: &V) -> Result<Complex64, EquationError> {
        let mut context = self.evaluator.context();
        context.set_inputs(values.as_slice())?;
        Ok(context.eval()[0])
    }

    /// Evaluates the equation at complex input values.
    pub fn eval_complex(&self, values: &[Complex64]) -> Result<Complex64, EquationError> {
        let mut context = self.evaluator.context();
        context.set_complex_inputs(values)?;
        Ok(context.eval()[0])
    }

    /// Computes the gradient (all first order partial derivatives) at the given point.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::Equation;
    /// let eq = Equation::new("2*x + y^2".to_string()).unwrap();
    /// let gradient = eq.gradient(&[1.0, 2.0]).unwrap(); // at point (1,2)
    /// assert_eq!(gradient[0].re, 2.0); // ∂/∂x = 2
    /// assert_eq!(gradient[1].re, 4.0); // ∂/∂y = 2y
    /// ```
    ///
    /// # Errors
    /// `EquationError::InvalidInputLength` for a wrong number of values,
    /// `EquationError::Derive` if the equation is not differentiable.
    pub fn gradient(&self, values: &[f64]) -> Result<Vec<Complex64>, EquationError> {
        let gradient = self.gradient.as_ref().ok_or_else(|| self.derivative_unavailable())?;
        let mut context = gradient.context();
        context.set_inputs(values)?;
        Ok(context.eval().to_vec())
    }

    /// Computes the Hessian matrix (all second order partial derivatives) at the given point.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::Equation;
    /// let eq = Equation::new("2*x + y^2".to_string()).unwrap();
    /// let hessian = eq.hessian(&[1.0, 2.0]).unwrap(); // at point (1,2)
    /// assert_eq!(hessian[1][1].re, 2.0);
    /// assert_eq!(hessian[0][1].re, 0.0);
    /// ```
    ///
    /// # Errors
    /// `EquationError::InvalidInputLength` for a wrong number of values,
    /// `EquationError::Derive` if the equation is not differentiable.
    pub fn hessian(&self, values: &[f64]) -> Result<Vec<Vec<Complex64>>, EquationError> {
        let hessian = self.hessian.as_ref().ok_or_else(|| self.derivative_unavailable())?;
        let mut context = hessian.context();
        context.set_inputs(values)?;
        let n = self.sorted_variables.len();
        Ok(context.eval().chunks(n.max(1)).map(<[Complex64]>::to_vec).collect())
    }

    /// Returns the compiled derivative for a specific variable.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::Equation;
    /// let eq = Equation::new("2*x + y^2".to_string()).unwrap();
    /// let dx = eq.derivative("x").unwrap();
    /// let mut context = dx.context();
    /// context.set_inputs(&[1.0, 2.0]).unwrap();
    /// assert_eq!(context.eval()[0].re, 2.0);
    /// ```
    ///
    /// # Errors
    /// Returns `EquationError::DerivativeNotFound` if the variable is not found.
    pub fn derivative(&self, variable: &str) -> Result<&Evaluator, EquationError> {
        if let Some(e) = &self.derivative_error {
            return Err(EquationError::Derive(e.clone()));
        }
        self.derivatives_first_order
            .get(variable)
            .ok_or(EquationError::DerivativeNotFound(variable.to_string()))
    }

    fn derive_tree(&self, variables: &[&str]) -> Result<Node, EquationError> {
        let missing: Vec<&str> = variables
            .iter()
            .copied()
            .filter(|v| !self.var_map.contains_key(*v))
            .collect();
        if !missing.is_empty() {
            return Err(EquationError::DerivativeNotFound(missing.join(", ")));
        }
        let scope = Namespace::builtins();
        let mut tree = self.tree.clone();
        for variable in variables {
            tree = differentiate(&tree, variable, &scope, &self.config)?;
        }
        Ok(tree)
    }

    /// Computes the higher-order partial derivative with respect to multiple variables.
    ///
    /// # Arguments
    /// * `variables` - Slice of variable names to differentiate with respect to, in order
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::Equation;
    /// let eq = Equation::new("x^2 * y^2".to_string()).unwrap();
    /// let dxdy = eq.derive_wrt(&["x", "y"]).unwrap();
    /// let mut context = dxdy.context();
    /// context.set_inputs(&[2.0, 3.0]).unwrap();
    /// assert_eq!(context.eval()[0].re, 24.0); // ∂²/∂x∂y(x^2 * y^2) = 4xy
    /// ```
    ///
    /// # Errors
    /// Returns `EquationError::DerivativeNotFound` if any variable is not found.
    pub fn derive_wrt(&self, variables: &[&str]) -> Result<Evaluator, EquationError> {
        let tree = self.derive_tree(variables)?;
        Ok(compile_trees(std::slice::from_ref(&tree), &self.variables, &self.config)?)
    }

    /// Builds a system whose outputs are the first derivatives with respect to
    /// `variables`, in the given order.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::Equation;
    /// let eq = Equation::new("x^2 + y^2".to_string()).unwrap();
    /// let derivatives = eq.derive_wrt_stack(&["x", "y"]).unwrap();
    /// let results = derivatives.eval(&[2.0, 3.0]).unwrap();
    /// assert_eq!(results[0].re, 4.0);
    /// assert_eq!(results[1].re, 6.0);
    /// ```
    pub fn derive_wrt_stack(&self, variables: &[&str]) -> Result<EquationSystem, EquationError> {
        let trees = variables
            .iter()
            .map(|&v| self.derive_tree(&[v]))
            .collect::<Result<Vec<_>, _>>()?;
        let names = variables
            .iter()
            .map(|v| format!("d/d{v}({})", self.equation_str))
            .collect();
        EquationSystem::from_trees(names, trees, self.variables.clone(), self.config.clone())
    }

    /// Returns the map of variable names to their indices.
    pub fn variables(&self) -> &HashMap<String, u32> {
        &self.var_map
    }

    /// Returns the original equation string.
    pub fn equation_str(&self) -> &str {
        &self.equation_str
    }

    /// Returns the simplified Working Tree.
    pub fn tree(&self) -> &Node {
        &self.tree
    }

    /// Returns the compiled evaluator.
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Returns the sorted variables.
    pub fn sorted_variables(&self) -> &[String] {
        &self.sorted_variables
    }
}

/// A namespace with the built-ins plus the mapped names as real variables, and
/// the variables in index order.
pub(crate) fn namespace_from_var_map(
    variables: &HashMap<String, u32>,
) -> Result<(Namespace, Vec<Arc<VariableDef>>), EquationError> {
    let mut ns = Namespace::builtins();
    let mut inputs = Vec::with_capacity(variables.len());
    for (name, _) in variables.iter().sorted_by_key(|(_, &idx)| idx) {
        ns.add_variable(name, true)?;
        inputs.push(Arc::new(VariableDef {
            name: name.clone(),
            real: true,
        }));
    }
    Ok((ns, inputs))
}
