//! Systems of equations compiled into one evaluator.
//!
//! All equations of a system share one instruction stream, so common
//! subexpressions are computed once. The Jacobian is compiled alongside, one
//! multi-output evaluator per variable.
//!
//! # Features
//!
//! - Consistent variable ordering across equations
//! - Automatic variable extraction and mapping
//! - Batch and parallel evaluation
//! - Jacobians and higher-order derivatives
//!
//! # Example
//!
//! ```
//! use mathexpr_vm::system::EquationSystem;
//!
//! let system = EquationSystem::new(vec![
//!     "2*x + y".to_string(),   // first equation
//!     "x^2 + z".to_string(),   // second equation
//! ]).unwrap();
//!
//! // Variables are automatically sorted (x, y, z)
//! let results = system.eval(&[1.0, 2.0, 3.0]).unwrap();
//! assert_eq!(results[0].re, 4.0); // 2*1 + 2
//! assert_eq!(results[1].re, 4.0); // 1^2 + 3
//!
//! let dx = system.gradient(&[1.0, 2.0, 3.0], "x").unwrap();
//! assert_eq!(dx[1].re, 2.0); // d/dx(x^2 + z)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use itertools::Itertools;
use num_complex::Complex64;
use rayon::prelude::*;

use crate::builder::compile_trees;
use crate::config::EngineConfig;
use crate::convert::normalize;
use crate::derivative::differentiate;
use crate::element::VariableDef;
use crate::equation::{declare_unknowns, namespace_from_var_map, prepare};
use crate::errors::{DeriveError, EquationError};
use crate::evaluator::Evaluator;
use crate::expr::Node;
use crate::namespace::{identifiers, Namespace, Scope};
use crate::parser::parse;
use crate::simplify::Simplifier;

/// Represents a system of mathematical equations that can be evaluated together.
#[derive(Debug, Clone)]
pub struct EquationSystem {
    /// The original string representations of the equations
    pub equations: Vec<String>,
    /// The simplified Working Trees of the equations
    pub trees: Vec<Node>,
    /// Maps variable names to their indices in the input array
    pub variable_map: HashMap<String, u32>,
    /// Variables in input order
    pub sorted_variables: Vec<String>,
    variables: Vec<Arc<VariableDef>>,
    evaluator: Evaluator,
    /// Maps variable names to the evaluator of all equations' derivatives
    jacobian: HashMap<String, Evaluator>,
    derivative_error: Option<DeriveError>,
    config: EngineConfig,
}

impl EquationSystem {
    /// Creates a new equation system from a vector of expression strings.
    ///
    /// Identifiers that are not built-ins become real variables, indexed in
    /// alphabetical order across all expressions.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::system::EquationSystem;
    /// let system = EquationSystem::new(vec![
    ///     "2*x + y".to_string(),
    ///     "x^2 + z".to_string()
    /// ]).unwrap();
    ///
    /// let results = system.eval(&[1.0, 2.0, 3.0]).unwrap();
    /// let dx = system.gradient(&[1.0, 2.0, 3.0], "x").unwrap();
    /// ```
    pub fn new(expressions: Vec<String>) -> Result<Self, EquationError> {
        let mut ns = Namespace::builtins();
        for expression in &expressions {
            declare_unknowns(&mut ns, expression)?;
        }
        Self::with_config(expressions, &ns, EngineConfig::default())
    }

    /// Creates a system whose symbols all come from `ns`.
    pub fn with_config(
        expressions: Vec<String>,
        ns: &Namespace,
        config: EngineConfig,
    ) -> Result<Self, EquationError> {
        let simplifier = Simplifier::new(&config);
        let mut trees = Vec::with_capacity(expressions.len());
        let mut variables: Vec<Arc<VariableDef>> = Vec::new();
        for expression in &expressions {
            let (tree, used) = prepare(expression, ns, &simplifier)?;
            trees.push(tree);
            for v in used {
                if !variables.iter().any(|known| known.name == v.name) {
                    variables.push(v);
                }
            }
        }
        variables.sort_by(|a, b| a.name.cmp(&b.name));
        Self::from_trees(expressions, trees, variables, config)
    }

    /// Creates a new equation system from a vector of expressions and a variable map.
    ///
    /// # Arguments
    /// * `expressions` - Vector of mathematical expressions as strings
    /// * `variable_map` - Map of variable names to their indices, defining input order
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::system::EquationSystem;
    /// # use std::collections::HashMap;
    /// let var_map: HashMap<String, u32> = [
    ///     ("x".to_string(), 0),
    ///     ("y".to_string(), 1),
    ///     ("z".to_string(), 2),
    /// ].into_iter().collect();
    ///
    /// let system = EquationSystem::from_var_map(
    ///     vec!["2*x + y".to_string(), "x^2 + z".to_string()],
    ///     &var_map
    /// ).unwrap();
    /// ```
    ///
    /// # Errors
    /// `EquationError::VariableNotFound` if an expression uses a name that is
    /// neither a built-in nor in the map.
    pub fn from_var_map(
        expressions: Vec<String>,
        variable_map: &HashMap<String, u32>,
    ) -> Result<Self, EquationError> {
        let (ns, variables) = namespace_from_var_map(variable_map)?;
        let config = EngineConfig::default();
        let simplifier = Simplifier::new(&config);
        let trees = expressions
            .iter()
            .map(|expression| {
                if let Some(unknown) = identifiers(expression).into_iter().find(|w| !ns.is_name(w)) {
                    return Err(EquationError::VariableNotFound(unknown.to_string()));
                }
                Ok(simplifier.simplify(normalize(parse(expression, &ns)?)))
            })
            .collect::<Result<Vec<_>, EquationError>>()?;
        Self::from_trees(expressions, trees, variables, config)
    }

    /// Compiles simplified trees over a fixed input list, with their Jacobian.
    pub(crate) fn from_trees(
        equations: Vec<String>,
        trees: Vec<Node>,
        variables: Vec<Arc<VariableDef>>,
        config: EngineConfig,
    ) -> Result<Self, EquationError> {
        let evaluator = compile_trees(&trees, &variables, &config)?;
        let sorted_variables: Vec<String> = variables.iter().map(|v| v.name.clone()).collect();
        let variable_map = sorted_variables
            .iter()
            .enumerate()
            .map(|(i, v)| (v.clone(), i as u32))
            .collect();

        let mut jacobian = HashMap::with_capacity(variables.len());
        let mut derivative_error = None;
        let scope = Namespace::builtins();
        for var in &sorted_variables {
            let derivatives = trees
                .iter()
                .map(|tree| differentiate(tree, var, &scope, &config))
                .collect::<Result<Vec<_>, _>>();
            match derivatives {
                Ok(derivatives) => {
                    jacobian.insert(var.clone(), compile_trees(&derivatives, &variables, &config)?);
                }
                Err(e) => {
                    derivative_error = Some(e);
                    jacobian.clear();
                    break;
                }
            }
        }

        Ok(Self {
            equations,
            trees,
            variable_map,
            sorted_variables,
            variables,
            evaluator,
            jacobian,
            derivative_error,
            config,
        })
    }

    /// Evaluates all equations in the system into a pre-allocated buffer.
    ///
    /// # Arguments
    /// * `inputs` - Slice of input values, must match the number of variables
    /// * `results` - Pre-allocated buffer to store results
    ///
    /// # Errors
    /// Returns `EquationError::InvalidInputLength` if the number of inputs doesn't match
    /// the number of variables, and `EquationError::InvalidOutputLength` if the results
    /// buffer size doesn't match the number of equations.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::system::EquationSystem;
    /// # use num_complex::Complex64;
    /// let system = EquationSystem::new(vec![
    ///     "x + y".to_string(),
    ///     "x * y".to_string(),
    /// ]).unwrap();
    ///
    /// let mut results = vec![Complex64::new(0.0, 0.0); 2];
    /// system.eval_into(&[2.0, 3.0], &mut results).unwrap();
    /// assert_eq!(results[1].re, 6.0);
    /// ```
    pub fn eval_into<'a>(
        &self,
        inputs: &[f64],
        results: &'a mut [Complex64],
    ) -> Result<&'a [Complex64], EquationError> {
        if results.len() != self.equations.len() {
            return Err(EquationError::InvalidOutputLength {
                expected: self.equations.len(),
                got: results.len(),
            });
        }
        let mut context = self.evaluator.context();
        context.set_inputs(inputs)?;
        results.copy_from_slice(context.eval());
        Ok(results)
    }

    /// Evaluates all equations in the system with the given input values.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::system::EquationSystem;
    /// let system = EquationSystem::new(vec![
    ///     "x + y".to_string(),
    ///     "x * y".to_string(),
    /// ]).unwrap();
    ///
    /// let results = system.eval(&[2.0, 3.0]).unwrap();
    /// assert_eq!(results[0].re, 5.0);
    /// ```
    pub fn eval(&self, inputs: &[f64]) -> Result<Vec<Complex64>, EquationError> {
        let mut results = vec![Complex64::new(0.0, 0.0); self.equations.len()];
        self.eval_into(inputs, &mut results)?;
        Ok(results)
    }

    /// Evaluates the system for many input sets on the rayon thread pool.
    ///
    /// Input sets are split into chunks; each chunk is evaluated through its own
    /// context, so consecutive sets that share slow-changing inputs skip the
    /// shared prefix of the instruction stream.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::system::EquationSystem;
    /// let system = EquationSystem::new(vec![
    ///     "x + y".to_string(),
    ///     "x * y".to_string(),
    /// ]).unwrap();
    ///
    /// let input_sets = vec![
    ///     vec![1.0, 2.0],
    ///     vec![3.0, 4.0],
    ///     vec![5.0, 6.0],
    /// ];
    ///
    /// let results = system.eval_parallel(&input_sets).unwrap();
    /// assert_eq!(results[2][1].re, 30.0);
    /// ```
    pub fn eval_parallel(
        &self,
        input_sets: &[Vec<f64>],
    ) -> Result<Vec<Vec<Complex64>>, EquationError> {
        let expected = self.sorted_variables.len();
        if let Some(bad) = input_sets.iter().find(|inputs| inputs.len() != expected) {
            return Err(EquationError::InvalidInputLength {
                expected,
                got: bad.len(),
            });
        }

        let num_threads = rayon::current_num_threads();
        let chunk_size = (input_sets.len() / (num_threads * 4)).max(1);
        let evaluator = &self.evaluator;

        input_sets
            .par_chunks(chunk_size)
            .map(|chunk| {
                let mut context = evaluator.context();
                chunk
                    .iter()
                    .map(|inputs| {
                        context.set_inputs(inputs)?;
                        Ok(context.eval().to_vec())
                    })
                    .collect::<Result<Vec<_>, EquationError>>()
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|chunks| chunks.into_iter().flatten().collect())
    }

    fn jacobian_column(&self, variable: &str) -> Result<&Evaluator, EquationError> {
        if let Some(e) = &self.derivative_error {
            return Err(EquationError::Derive(e.clone()));
        }
        self.jacobian
            .get(variable)
            .ok_or(EquationError::VariableNotFound(variable.to_string()))
    }

    /// Returns the partial derivatives of all equations with respect to one
    /// variable, evaluated at the given inputs.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::system::EquationSystem;
    /// let system = EquationSystem::new(vec![
    ///     "x^2*y".to_string(),  // f1
    ///     "x*y^2".to_string(),  // f2
    /// ]).unwrap();
    ///
    /// let gradient = system.gradient(&[2.0, 3.0], "x").unwrap();
    /// assert_eq!(gradient[0].re, 12.0); // ∂f1/∂x
    /// assert_eq!(gradient[1].re, 9.0);  // ∂f2/∂x
    /// ```
    pub fn gradient(&self, inputs: &[f64], variable: &str) -> Result<Vec<Complex64>, EquationError> {
        let mut context = self.jacobian_column(variable)?.context();
        context.set_inputs(inputs)?;
        Ok(context.eval().to_vec())
    }

    /// Computes the Jacobian matrix of the equation system at the given input values.
    ///
    /// Each row corresponds to an equation, and each column to a variable.
    ///
    /// # Arguments
    /// * `inputs` - Slice of input values at which to evaluate the Jacobian
    /// * `variables` - Optional slice of variable names to include in the Jacobian.
    ///   If None, includes all variables in input order.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::system::EquationSystem;
    /// let system = EquationSystem::new(vec![
    ///     "x^2*y".to_string(),  // f1
    ///     "x*y^2".to_string(),  // f2
    /// ]).unwrap();
    ///
    /// let jacobian = system.jacobian(&[2.0, 3.0], None).unwrap();
    /// assert_eq!(jacobian[0][1].re, 4.0);  // ∂f1/∂y
    /// assert_eq!(jacobian[1][0].re, 9.0);  // ∂f2/∂x
    /// ```
    pub fn jacobian(
        &self,
        inputs: &[f64],
        variables: Option<&[String]>,
    ) -> Result<Vec<Vec<Complex64>>, EquationError> {
        let variables = variables.unwrap_or(&self.sorted_variables);
        let mut results = vec![Vec::with_capacity(variables.len()); self.equations.len()];
        for var in variables {
            let column = self.gradient(inputs, var)?;
            for (row, value) in results.iter_mut().zip(column) {
                row.push(value);
            }
        }
        Ok(results)
    }

    /// Compiles the Jacobian with respect to specific variables into one evaluator.
    ///
    /// Output `e * variables.len() + v` is the derivative of equation `e` with
    /// respect to `variables[v]`.
    ///
    /// # Errors
    /// Returns `EquationError::VariableNotFound` if any of the specified variables doesn't exist
    /// in the system.
    pub fn jacobian_wrt(&self, variables: &[&str]) -> Result<Evaluator, EquationError> {
        self.check_variables(variables)?;
        let scope = Namespace::builtins();
        let mut trees = Vec::with_capacity(self.trees.len() * variables.len());
        for tree in &self.trees {
            for var in variables {
                trees.push(differentiate(tree, var, &scope, &self.config)?);
            }
        }
        Ok(compile_trees(&trees, &self.variables, &self.config)?)
    }

    /// Compiles the higher-order derivatives of all equations with respect to
    /// `variables`, differentiated in order.
    ///
    /// # Example
    /// ```
    /// # use mathexpr_vm::system::EquationSystem;
    /// let system = EquationSystem::new(vec![
    ///     "x^2*y".to_string(),  // f1
    ///     "x*y^2".to_string(),  // f2
    /// ]).unwrap();
    ///
    /// let derivatives = system.derive_wrt(&["x", "y"]).unwrap();
    /// let mut context = derivatives.context();
    /// context.set_inputs(&[2.0, 3.0]).unwrap();
    /// let results = context.eval();
    /// assert_eq!(results[0].re, 4.0); // ∂²f1/∂x∂y = 2x
    /// assert_eq!(results[1].re, 6.0); // ∂²f2/∂x∂y = 2y
    /// ```
    pub fn derive_wrt(&self, variables: &[&str]) -> Result<Evaluator, EquationError> {
        self.check_variables(variables)?;
        let scope = Namespace::builtins();
        let mut trees = self.trees.clone();
        for var in variables {
            trees = trees
                .iter()
                .map(|tree| differentiate(tree, var, &scope, &self.config))
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(compile_trees(&trees, &self.variables, &self.config)?)
    }

    fn check_variables(&self, variables: &[&str]) -> Result<(), EquationError> {
        match variables.iter().find(|v| !self.variable_map.contains_key(**v)) {
            Some(v) => Err(EquationError::VariableNotFound(v.to_string())),
            None => Ok(()),
        }
    }

    /// Returns the sorted variables in the system.
    pub fn sorted_variables(&self) -> &[String] {
        &self.sorted_variables
    }

    /// Returns the map of variable names to their indices.
    pub fn variables(&self) -> &HashMap<String, u32> {
        &self.variable_map
    }

    /// Returns the original equation strings.
    pub fn equations(&self) -> &[String] {
        &self.equations
    }

    /// Returns the compiled evaluator of all equations.
    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    /// Returns the number of equations in the system.
    pub fn num_equations(&self) -> usize {
        self.equations.len()
    }

    /// Variable names of the Jacobian columns, in input order.
    pub fn jacobian_variables(&self) -> Vec<&str> {
        self.sorted_variables
            .iter()
            .filter(|v| self.jacobian.contains_key(*v))
            .map(String::as_str)
            .collect_vec()
    }
}
