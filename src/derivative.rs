//! Symbolic differentiation of normalized Working Trees.
//!
//! Sums and products are differentiated structurally. Every other call is
//! differentiated through the gradient its function declares, with the chain
//! rule applied per argument:
//!
//! - holomorphic gradients `g_k`: `d f(a_1..a_n) = Σ g_k(a) · d a_k`
//! - real gradients `(gx_k, gy_k)`: `d f(a) = Σ gx_k(a) · re(d a_k) + gy_k(a) · im(d a_k)`
//!
//! The result is not simplified; callers run the simplifier with the derivative
//! pass limit.

use std::collections::HashMap;

use log::trace;

use crate::config::EngineConfig;
use crate::errors::DeriveError;
use crate::expr::Node;
use crate::function::{Gradient, GRADIENT_PARAMETERS};
use crate::namespace::Scope;
use crate::operators::catalog::catalog;
use crate::simplify::Simplifier;

/// Replaces the gradient parameters `x, y, z, w` by the call arguments, all at once.
fn instantiate(gradient: &Node, args: &[Node]) -> Node {
    let replacements: HashMap<String, Node> = GRADIENT_PARAMETERS
        .iter()
        .zip(args)
        .map(|(name, arg)| (name.to_string(), arg.clone()))
        .collect();
    gradient.substitute(&replacements)
}

impl Node {
    /// Differentiates the tree with respect to a variable.
    ///
    /// # Arguments
    /// * `with_respect_to` - Name of the variable
    /// * `scope` - Scope used to parse gradient text on first use
    ///
    /// # Returns
    /// The unsimplified derivative tree.
    ///
    /// # Errors
    /// * `DeriveError::NonDeterministic` for a call to a non-deterministic function
    /// * `DeriveError::NotDifferentiable` for a call to a function without gradient
    ///   whose arguments depend on the variable
    pub fn derivative(&self, with_respect_to: &str, scope: &dyn Scope) -> Result<Node, DeriveError> {
        match self {
            Node::Number(_) | Node::Constant(_) | Node::Parameter(_) => Ok(Node::zero()),

            Node::Variable(v) => Ok(if v.name == with_respect_to {
                Node::one()
            } else {
                Node::zero()
            }),

            Node::Sum(terms) => {
                // d/dx(f + g) = df/dx + dg/dx
                let derivatives = terms
                    .iter()
                    .map(|t| t.derivative(with_respect_to, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::sum(derivatives))
            }

            Node::Product(factors) => {
                // d/dx(f * g * h) = f' * g * h + f * g' * h + f * g * h'
                let mut terms = Vec::with_capacity(factors.len());
                for (k, factor) in factors.iter().enumerate() {
                    let d = factor.derivative(with_respect_to, scope)?;
                    if d.is_zero() {
                        continue;
                    }
                    let mut product = factors.clone();
                    product[k] = d;
                    terms.push(Node::product(product));
                }
                Ok(Node::sum(terms))
            }

            Node::Call(..) | Node::Operator(..) => {
                let Some(function) = self.function() else {
                    return Ok(Node::zero());
                };
                if !function.is_deterministic() {
                    return Err(DeriveError::NonDeterministic(function.name().to_string()));
                }
                let args = self.children();
                let inner = args
                    .iter()
                    .map(|a| a.derivative(with_respect_to, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                if inner.iter().all(Node::is_zero) {
                    return Ok(Node::zero());
                }

                let c = catalog();
                let terms = match function.gradient(scope)? {
                    // d/dx f(a) = Σ f_k(a) * da_k/dx
                    Gradient::Complex(partials) => partials
                        .iter()
                        .zip(inner)
                        .filter(|(_, d)| !d.is_zero())
                        .map(|(g, d)| Node::product(vec![instantiate(g, args), d]))
                        .collect(),
                    // d/dx f(a) = Σ f_x(a) * re(da/dx) + f_y(a) * im(da/dx)
                    Gradient::Real(partials) => partials
                        .iter()
                        .zip(inner)
                        .filter(|(_, d)| !d.is_zero())
                        .flat_map(|((gx, gy), d)| {
                            [
                                Node::product(vec![
                                    instantiate(gx, args),
                                    Node::Call(c.re.clone(), vec![d.clone()]),
                                ]),
                                Node::product(vec![
                                    instantiate(gy, args),
                                    Node::Call(c.im.clone(), vec![d]),
                                ]),
                            ]
                        })
                        .collect(),
                };
                let result = Node::sum(terms);
                trace!("d/d{with_respect_to} {self} = {result}");
                Ok(result)
            }
        }
    }
}

/// Differentiates and simplifies with the derivative pass limit.
pub fn differentiate(
    node: &Node,
    with_respect_to: &str,
    scope: &dyn Scope,
    config: &EngineConfig,
) -> Result<Node, DeriveError> {
    let derivative = node.derivative(with_respect_to, scope)?;
    Ok(Simplifier::new(config)
        .with_passes(config.derivative_passes)
        .simplify(derivative))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::convert::normalize;
    use crate::namespace::Namespace;
    use crate::parser::parse;
    use num_complex::Complex64;

    fn namespace() -> Namespace {
        let mut ns = Namespace::builtins();
        ns.add_variable("x", true).unwrap();
        ns.add_variable("y", true).unwrap();
        ns.add_variable("z", false).unwrap();
        ns
    }

    fn derive(text: &str, variable: &str) -> Result<Node, DeriveError> {
        let ns = namespace();
        let node = normalize(parse(text, &ns).unwrap());
        differentiate(&node, variable, &ns, &EngineConfig::default())
    }

    fn at(node: &Node, x: f64, y: f64) -> Complex64 {
        let values = [
            ("x".to_string(), Complex64::new(x, 0.0)),
            ("y".to_string(), Complex64::new(y, 0.0)),
        ]
        .into_iter()
        .collect();
        node.evaluate(&values)
    }

    #[test]
    fn test_polynomial() {
        let d = derive("x^2 + 2*x + 1", "x").unwrap();
        assert_eq!(d.to_string(), "2*x + 2");
        assert_eq!(derive("x*y", "y").unwrap().to_string(), "x");
        assert_eq!(derive("y^3", "x").unwrap().to_string(), "0");
    }

    #[test]
    fn test_chain_rule() {
        assert_eq!(derive("sin(x)", "x").unwrap().to_string(), "cos(x)");

        let d = derive("sin(x^2)", "x").unwrap();
        let expected = 2.0 * 0.5 * (0.25f64).cos();
        assert!((at(&d, 0.5, 0.0).re - expected).abs() < 1e-12);

        let d = derive("exp(2x)", "x").unwrap();
        assert!((at(&d, 0.3, 0.0).re - 2.0 * (0.6f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_quotient() {
        let d = derive("x/y", "y").unwrap();
        assert!((at(&d, 3.0, 2.0).re + 0.75).abs() < 1e-12);
        let d = derive("1/x", "x").unwrap();
        assert!((at(&d, 2.0, 0.0).re + 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_variable_exponent() {
        let d = derive("2^x", "x").unwrap();
        let expected = 2f64.ln() * 2f64.powf(1.5);
        assert!((at(&d, 1.5, 0.0).re - expected).abs() < 1e-12);
    }

    #[test]
    fn test_real_gradient() {
        // d/dx |x*(1 + i)| = sqrt(2) for x > 0
        let d = derive("abs(x*(1 + i))", "x").unwrap();
        assert!((at(&d, 2.0, 0.0).re - 2f64.sqrt()).abs() < 1e-12);
        // d/dx conj(i*x) = -i
        let d = derive("conj(i*x)", "x").unwrap();
        assert!((at(&d, 1.0, 0.0) - Complex64::new(0.0, -1.0)).norm() < 1e-12);
    }

    #[test]
    fn test_constant_arguments_need_no_gradient() {
        assert_eq!(derive("abs(y) + x", "x").unwrap().to_string(), "1");
    }

    #[test]
    fn test_non_deterministic() {
        assert_eq!(
            derive("x*random()", "x"),
            Err(DeriveError::NonDeterministic("random".to_string()))
        );
    }

    #[test]
    fn test_substitution_is_simultaneous() {
        // the argument names collide with the gradient parameter names
        let d = derive("y^x", "x").unwrap();
        let expected = 3f64.ln() * 3f64.powf(2.0);
        assert!((at(&d, 2.0, 3.0).re - expected).abs() < 1e-12);
    }
}
