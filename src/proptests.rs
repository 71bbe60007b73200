//! Property-based tests for the compilation pipeline.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use evalexpr::{ContextWithMutableVariables, HashMapContext, Value};
    use num_complex::Complex64;
    use proptest::prelude::*;

    use crate::builder::compile_trees;
    use crate::config::EngineConfig;
    use crate::convert::{denormalize, normalize};
    use crate::element::VariableDef;
    use crate::evaluator::Evaluator;
    use crate::expr::Node;
    use crate::namespace::Namespace;
    use crate::parser::parse;
    use crate::simplify::Simplifier;

    /// A small arithmetic expression rendered both for this crate and for evalexpr.
    #[derive(Debug, Clone)]
    enum Expr {
        Number(u8),
        Variable(&'static str),
        Neg(Box<Expr>),
        Binary(char, Box<Expr>, Box<Expr>),
        Call(&'static str, Box<Expr>),
    }

    impl Expr {
        fn render(&self) -> String {
            match self {
                Expr::Number(n) => format!("{n}"),
                Expr::Variable(v) => v.to_string(),
                Expr::Neg(a) => format!("(-{})", a.render()),
                Expr::Binary(op, a, b) => format!("({} {op} {})", a.render(), b.render()),
                Expr::Call(f, a) => format!("{f}({})", a.render()),
            }
        }

        /// evalexpr divides integers, so numbers are written as floats.
        fn render_evalexpr(&self) -> String {
            match self {
                Expr::Number(n) => format!("{n}.0"),
                Expr::Variable(v) => v.to_string(),
                Expr::Neg(a) => format!("(-{})", a.render_evalexpr()),
                Expr::Binary(op, a, b) => {
                    format!("({} {op} {})", a.render_evalexpr(), b.render_evalexpr())
                }
                Expr::Call(f, a) => format!("math::{f}({})", a.render_evalexpr()),
            }
        }
    }

    fn leaf(with_variables: bool) -> BoxedStrategy<Expr> {
        if with_variables {
            prop_oneof![
                (1u8..6).prop_map(Expr::Number),
                Just(Expr::Variable("x")),
                Just(Expr::Variable("y")),
            ]
            .boxed()
        } else {
            (1u8..6).prop_map(Expr::Number).boxed()
        }
    }

    // Strategy for bounded expressions over +, -, *, sin and cos
    fn expression(with_variables: bool) -> impl Strategy<Value = Expr> {
        leaf(with_variables).prop_recursive(3, 24, 2, |inner| {
            prop_oneof![
                inner.clone().prop_map(|a| Expr::Neg(Box::new(a))),
                (prop_oneof![Just('+'), Just('-'), Just('*')], inner.clone(), inner.clone())
                    .prop_map(|(op, a, b)| Expr::Binary(op, Box::new(a), Box::new(b))),
                (prop_oneof![Just("sin"), Just("cos")], inner)
                    .prop_map(|(f, a)| Expr::Call(f, Box::new(a))),
            ]
        })
    }

    fn inputs() -> (Namespace, Vec<Arc<VariableDef>>) {
        let mut ns = Namespace::builtins();
        let variables = ["x", "y"]
            .iter()
            .map(|name| {
                ns.add_variable(name, true).unwrap();
                Arc::new(VariableDef {
                    name: name.to_string(),
                    real: true,
                })
            })
            .collect();
        (ns, variables)
    }

    fn tree(expr: &Expr, ns: &Namespace) -> Node {
        normalize(parse(&expr.render(), ns).unwrap())
    }

    fn compiled(expr: &Expr, config: &EngineConfig) -> Evaluator {
        let (ns, variables) = inputs();
        compile_trees(&[tree(expr, &ns)], &variables, config).unwrap()
    }

    fn same_value(a: Complex64, b: Complex64) -> bool {
        let same = |x: f64, y: f64| x == y || (x.is_nan() && y.is_nan());
        same(a.re, b.re) && same(a.im, b.im)
    }

    fn close(a: Complex64, b: Complex64) -> bool {
        (a - b).norm() <= 1e-9 * (1.0 + a.norm().max(b.norm()))
    }

    proptest! {
        // Simplification

        #[test]
        fn simplify_is_idempotent(expr in expression(true)) {
            let (ns, _) = inputs();
            let config = EngineConfig::default().with_simplify_passes(100);
            let simplifier = Simplifier::new(&config);
            let once = simplifier.simplify(tree(&expr, &ns));
            let twice = simplifier.simplify(once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn round_trip_through_text(expr in expression(true)) {
            let (ns, _) = inputs();
            let config = EngineConfig::default().with_simplify_passes(100);
            let simplifier = Simplifier::new(&config);
            let once = simplifier.simplify(tree(&expr, &ns));
            let printed = denormalize(&once).to_string();
            let reparsed = normalize(parse(&printed, &ns).unwrap());
            prop_assert_eq!(simplifier.simplify(reparsed), once, "printed as {}", printed);
        }

        #[test]
        fn simplify_preserves_value(expr in expression(true), x in -2.0f64..2.0, y in -2.0f64..2.0) {
            let (ns, _) = inputs();
            let raw = tree(&expr, &ns);
            let simplified = Simplifier::new(&EngineConfig::default()).simplify(raw.clone());
            let values: HashMap<String, Complex64> = [
                ("x".to_string(), Complex64::new(x, 0.0)),
                ("y".to_string(), Complex64::new(y, 0.0)),
            ]
            .into_iter()
            .collect();
            prop_assert!(close(raw.evaluate(&values), simplified.evaluate(&values)));
        }

        // Bytecode

        #[test]
        fn operands_precede_results(expr in expression(true)) {
            let e = compiled(&expr, &EngineConfig::default());
            let layout = e.layout();
            for (index, instruction) in e.instructions().iter().enumerate() {
                for &operand in &instruction.operands[..instruction.dispatch.arity()] {
                    let operand = operand as usize;
                    let computed = (layout.output_offset()..layout.constant_offset()).contains(&operand)
                        || operand >= layout.intermediate_offset();
                    if computed {
                        prop_assert!(e.instructions()[..index]
                            .iter()
                            .any(|i| i.result as usize == operand));
                    }
                }
            }
        }

        #[test]
        fn incremental_matches_full(
            expr in expression(true),
            updates in prop::collection::vec((0usize..2, -3.0f64..3.0), 1..12),
        ) {
            let e = compiled(&expr, &EngineConfig::default());
            let mut incremental = e.context();
            let mut full = e.context();
            incremental.set_inputs(&[0.5, -0.5]).unwrap();
            full.set_inputs(&[0.5, -0.5]).unwrap();
            incremental.eval();
            for (index, value) in updates {
                let value = Complex64::new(value, 0.0);
                incremental.set_input(index, value);
                full.set_input(index, value);
                let a = incremental.eval()[0];
                let b = full.eval_full()[0];
                prop_assert!(same_value(a, b), "{} vs {}", a, b);
            }
        }

        #[test]
        fn folding_matches_unfolded(expr in expression(false)) {
            let folded = compiled(&expr, &EngineConfig::default());
            let unfolded = compiled(&expr, &EngineConfig::default().with_fold_constants(false));
            let a = folded.context().eval_full()[0];
            let b = unfolded.context().eval_full()[0];
            prop_assert!(close(a, b), "{} vs {}", a, b);
        }

        // Cross-check against evalexpr

        #[test]
        fn matches_evalexpr(expr in expression(true), x in -2.0f64..2.0, y in -2.0f64..2.0) {
            let e = compiled(&expr, &EngineConfig::default());
            let mut ctx = e.context();
            ctx.set_inputs(&[x, y]).unwrap();
            let ours = ctx.eval()[0];

            let mut context: HashMapContext = HashMapContext::new();
            context.set_value("x".to_string(), Value::Float(x)).unwrap();
            context.set_value("y".to_string(), Value::Float(y)).unwrap();
            let expected = evalexpr::eval_float_with_context(&expr.render_evalexpr(), &context).unwrap();

            prop_assert!(close(ours, Complex64::new(expected, 0.0)), "{} vs {}", ours, expected);
        }
    }
}
