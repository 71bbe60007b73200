//! Compiled bytecode and its incremental evaluation.
//!
//! An [`Evaluator`] is an immutable instruction stream over one flat value stack
//! laid out as
//!
//! ```text
//! [ variables | parameters | outputs | constants | intermediates ]
//! ```
//!
//! Instructions are ordered so that everything depending on a fast-changing
//! variable sits in a suffix. `start[c]` is the first instruction to run when
//! the slowest input that changed since the last evaluation has change-order
//! position `c - 1`:
//!
//! - `start[0]`: nothing changed, only non-deterministic calls re-run
//! - `start[v + 1]`: inputs up to position `v` (fastest first) changed
//! - `start[n + 1]`: parameters changed, or first evaluation: everything runs
//!
//! The mutable part of an evaluation, the value stack plus the change cursor,
//! lives in a [`Context`]. One evaluator can be shared across threads as long
//! as each thread evaluates through its own context.

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;

use colored::Colorize;
use num_complex::Complex64;

use crate::element::{ParameterDef, VariableDef};
use crate::errors::EquationError;
use crate::function::{FunctionDef, FunctionId};
use crate::namespace::Namespace;
use crate::types::Dispatch;

/// One compiled call: `stack[result] = kernel(stack[operands[0]], ...)`.
#[derive(Debug, Clone, Copy)]
pub struct Instruction {
    pub result: u32,
    /// Operand slots; entries past the kernel's arity are unused.
    pub operands: [u32; 4],
    pub function: FunctionId,
    pub dispatch: Dispatch,
}

/// Slot counts per stack region.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout {
    pub variables: usize,
    pub parameters: usize,
    pub outputs: usize,
    pub constants: usize,
    pub intermediates: usize,
}

impl Layout {
    pub fn parameter_offset(&self) -> usize {
        self.variables
    }

    pub fn output_offset(&self) -> usize {
        self.variables + self.parameters
    }

    pub fn constant_offset(&self) -> usize {
        self.output_offset() + self.outputs
    }

    pub fn intermediate_offset(&self) -> usize {
        self.constant_offset() + self.constants
    }

    pub fn len(&self) -> usize {
        self.intermediate_offset() + self.intermediates
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A compiled multi-output formula.
#[derive(Debug, Clone)]
pub struct Evaluator {
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) start: Vec<usize>,
    pub(crate) layout: Layout,
    /// Initial stack: constants written, everything else zero.
    pub(crate) template: Vec<Complex64>,
    pub(crate) variables: Vec<Arc<VariableDef>>,
    pub(crate) parameters: Vec<Arc<ParameterDef>>,
    /// Change-order position of each input, fastest first.
    pub(crate) positions: Vec<usize>,
    pub(crate) functions: HashMap<FunctionId, Arc<FunctionDef>>,
}

impl Evaluator {
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn start(&self) -> &[usize] {
        &self.start
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn variables(&self) -> &[Arc<VariableDef>] {
        &self.variables
    }

    pub fn parameters(&self) -> &[Arc<ParameterDef>] {
        &self.parameters
    }

    pub fn num_inputs(&self) -> usize {
        self.layout.variables
    }

    pub fn num_outputs(&self) -> usize {
        self.layout.outputs
    }

    /// A fresh context with live parameter values loaded and everything dirty.
    pub fn context(&self) -> Context<'_> {
        let mut context = Context {
            evaluator: self,
            stack: self.template.clone(),
            cursor: 0,
        };
        context.sync_parameters();
        context
    }

    fn slot_name(&self, slot: u32) -> String {
        let slot = slot as usize;
        let layout = &self.layout;
        if slot < layout.parameter_offset() {
            self.variables[slot].name.clone()
        } else if slot < layout.output_offset() {
            format!("${}", self.parameters[slot - layout.parameter_offset()].name())
        } else if slot < layout.constant_offset() {
            format!("out{}", slot - layout.output_offset())
        } else if slot < layout.intermediate_offset() {
            let z = self.template[slot];
            if z.im == 0.0 {
                format!("{}", z.re)
            } else {
                format!("{z}")
            }
        } else {
            format!("t{}", slot - layout.intermediate_offset())
        }
    }

    /// Human-readable instruction listing with the `start[]` entry points.
    ///
    /// Function names come from `scope` when given, so operators print as
    /// their symbols' owners see them.
    pub fn listing(&self, scope: Option<&Namespace>) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "{} {} vars, {} params, {} outputs, {} constants, {} temps\n",
            "layout:".cyan(),
            self.layout.variables,
            self.layout.parameters,
            self.layout.outputs,
            self.layout.constants,
            self.layout.intermediates
        ));
        for (index, instruction) in self.instructions.iter().enumerate() {
            let entries: Vec<String> = self
                .start
                .iter()
                .enumerate()
                .filter(|(_, &s)| s == index)
                .map(|(c, _)| c.to_string())
                .collect();
            if !entries.is_empty() {
                out.push_str(&format!("{}\n", format!("start[{}]:", entries.join(",")).yellow()));
            }
            let name = self
                .functions
                .get(&instruction.function)
                .map(|f| {
                    scope
                        .and_then(|ns| ns.find_callee(f.id(), f.arity()))
                        .map(|e| e.name().to_string())
                        .unwrap_or_else(|| f.name().to_string())
                })
                .unwrap_or_else(|| instruction.function.to_string());
            let arity = instruction.dispatch.arity();
            let operands: Vec<String> = instruction.operands[..arity]
                .iter()
                .map(|&s| self.slot_name(s))
                .collect();
            out.push_str(&format!(
                "  {:>3}  {} = {}({})  {}\n",
                index,
                self.slot_name(instruction.result),
                name.green(),
                operands.join(", "),
                instruction.dispatch.shape().to_string().dimmed()
            ));
        }
        out
    }
}

impl std::fmt::Display for Evaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.listing(None))
    }
}

/// The mutable state of one evaluation stream: value stack and change cursor.
#[derive(Debug, Clone)]
pub struct Context<'e> {
    evaluator: &'e Evaluator,
    stack: Vec<Complex64>,
    cursor: usize,
}

impl<'e> Context<'e> {
    pub fn evaluator(&self) -> &'e Evaluator {
        self.evaluator
    }

    /// Index into `start[]` the next `eval` runs from.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Sets input `index`. Raises the change cursor if the value differs.
    ///
    /// # Panics
    /// If `index` is not below the number of inputs.
    pub fn set_input(&mut self, index: usize, value: Complex64) {
        let position = self.evaluator.positions[index];
        if self.stack[index] != value {
            self.stack[index] = value;
            self.cursor = self.cursor.max(position + 1);
        }
    }

    /// Sets all inputs from real values.
    ///
    /// # Errors
    /// `InvalidInputLength` if `values` does not have one entry per input.
    pub fn set_inputs(&mut self, values: &[f64]) -> Result<(), EquationError> {
        self.check_len(values.len())?;
        for (index, &value) in values.iter().enumerate() {
            self.set_input(index, Complex64::new(value, 0.0));
        }
        Ok(())
    }

    /// Sets all inputs from complex values.
    ///
    /// # Errors
    /// `InvalidInputLength` if `values` does not have one entry per input.
    pub fn set_complex_inputs(&mut self, values: &[Complex64]) -> Result<(), EquationError> {
        self.check_len(values.len())?;
        for (index, &value) in values.iter().enumerate() {
            self.set_input(index, value);
        }
        Ok(())
    }

    fn check_len(&self, got: usize) -> Result<(), EquationError> {
        let expected = self.evaluator.num_inputs();
        if got != expected {
            return Err(EquationError::InvalidInputLength { expected, got });
        }
        Ok(())
    }

    /// Reloads the live parameter values and marks the whole stream dirty.
    pub fn sync_parameters(&mut self) {
        let offset = self.evaluator.layout.parameter_offset();
        for (j, parameter) in self.evaluator.parameters.iter().enumerate() {
            self.stack[offset + j] = parameter.value();
        }
        self.cursor = self.evaluator.layout.variables + 1;
    }

    /// Runs every instruction affected by the changes since the last call.
    pub fn eval(&mut self) -> &[Complex64] {
        let evaluator = self.evaluator;
        let from = evaluator.start[self.cursor];
        let stack = &mut self.stack;
        for instruction in &evaluator.instructions[from..] {
            let value = instruction
                .dispatch
                .apply(|k| stack[instruction.operands[k] as usize]);
            stack[instruction.result as usize] = value;
        }
        self.cursor = 0;
        self.outputs()
    }

    /// Runs the whole instruction stream regardless of what changed.
    pub fn eval_full(&mut self) -> &[Complex64] {
        self.cursor = self.evaluator.layout.variables + 1;
        self.eval()
    }

    pub fn outputs(&self) -> &[Complex64] {
        let offset = self.evaluator.layout.output_offset();
        &self.stack[offset..offset + self.evaluator.layout.outputs]
    }

    pub fn output(&self, k: usize) -> Complex64 {
        self.outputs()[k]
    }

    /// Resolves every slot of the instruction stream against this context's stack.
    pub fn bind(&mut self) -> Bound<'_> {
        let evaluator: &Evaluator = self.evaluator;
        let cells = Cell::from_mut(self.stack.as_mut_slice()).as_slice_of_cells();
        let program = evaluator
            .instructions
            .iter()
            .map(|instruction| BoundInstruction {
                result: &cells[instruction.result as usize],
                operands: instruction.operands.map(|s| &cells[s as usize]),
                dispatch: instruction.dispatch,
            })
            .collect();
        Bound {
            cells,
            program,
            start: &evaluator.start,
            positions: &evaluator.positions,
            output_offset: evaluator.layout.output_offset(),
            cursor: &mut self.cursor,
        }
    }
}

struct BoundInstruction<'c> {
    result: &'c Cell<Complex64>,
    operands: [&'c Cell<Complex64>; 4],
    dispatch: Dispatch,
}

/// An instruction stream with every slot pre-resolved to its cell in one
/// context's stack.
pub struct Bound<'c> {
    cells: &'c [Cell<Complex64>],
    program: Vec<BoundInstruction<'c>>,
    start: &'c [usize],
    positions: &'c [usize],
    output_offset: usize,
    cursor: &'c mut usize,
}

impl Bound<'_> {
    /// # Panics
    /// If `index` is not below the number of inputs.
    pub fn set_input(&mut self, index: usize, value: Complex64) {
        let position = self.positions[index];
        let cell = &self.cells[index];
        if cell.get() != value {
            cell.set(value);
            *self.cursor = (*self.cursor).max(position + 1);
        }
    }

    pub fn eval(&mut self) {
        for op in &self.program[self.start[*self.cursor]..] {
            op.result.set(op.dispatch.apply(|k| op.operands[k].get()));
        }
        *self.cursor = 0;
    }

    pub fn output(&self, k: usize) -> Complex64 {
        self.cells[self.output_offset + k].get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::compile;
    use crate::config::EngineConfig;
    use crate::convert::normalize;
    use crate::opt::Graph;
    use crate::parser::parse;

    fn evaluator(texts: &[&str], inputs: &[&str], order: &[usize]) -> Evaluator {
        let mut ns = Namespace::builtins();
        let variables: Vec<Arc<VariableDef>> = inputs
            .iter()
            .map(|name| {
                ns.add_variable(name, true).unwrap();
                Arc::new(VariableDef {
                    name: name.to_string(),
                    real: true,
                })
            })
            .collect();
        let roots: Vec<_> = texts.iter().map(|t| normalize(parse(t, &ns).unwrap())).collect();
        let graph = Graph::compile(&roots, &variables, &EngineConfig::default()).unwrap();
        compile(&graph, order).unwrap()
    }

    fn re(z: Complex64) -> f64 {
        z.re
    }

    #[test]
    fn test_polynomial_at_three() {
        let e = evaluator(&["x^2 + 2*x + 1"], &["x"], &[0]);
        let mut ctx = e.context();
        ctx.set_inputs(&vec![3.0]).unwrap();
        assert_eq!(re(ctx.eval()[0]), 16.0);
    }

    #[test]
    fn test_division_by_zero_is_nan() {
        let e = evaluator(&["1/0"], &[], &[]);
        let mut ctx = e.context();
        assert!(ctx.eval()[0].re.is_nan());
    }

    #[test]
    fn test_invalid_input_length() {
        let e = evaluator(&["x + y"], &["x", "y"], &[0, 1]);
        let mut ctx = e.context();
        assert!(matches!(
            ctx.set_inputs(&vec![1.0]),
            Err(EquationError::InvalidInputLength { expected: 2, got: 1 })
        ));
    }

    #[test]
    #[should_panic]
    fn test_set_input_out_of_range() {
        let e = evaluator(&["x + 1"], &["x"], &[0]);
        // slot 1 is the output, not an input
        e.context().set_input(1, Complex64::new(2.0, 0.0));
    }

    #[test]
    #[should_panic]
    fn test_bound_set_input_out_of_range() {
        let e = evaluator(&["x + 1"], &["x"], &[0]);
        let mut ctx = e.context();
        ctx.bind().set_input(1, Complex64::new(2.0, 0.0));
    }

    #[test]
    fn test_start_table_shape() {
        let e = evaluator(&["sin(x)*cos(y) + y^2"], &["x", "y"], &[0, 1]);
        let start = e.start();
        assert_eq!(start.len(), 4);
        assert_eq!(start[3], 0);
        // starting points move towards the end as fewer inputs change
        assert!(start.windows(2).all(|w| w[0] >= w[1]));
        // nothing is non-deterministic
        assert_eq!(start[0], e.instructions().len());
        // changing only x skips the y-only prefix
        assert!(start[1] > 0);
    }

    #[test]
    fn test_incremental_matches_full() {
        let e = evaluator(&["sin(x)*cos(y) + y^2", "x*y"], &["x", "y"], &[0, 1]);
        let mut incremental = e.context();
        let mut full = e.context();
        for (x, y) in [(0.1, 0.2), (0.3, 0.2), (0.3, 0.9), (0.5, 0.9), (0.5, 0.9)] {
            incremental.set_inputs(&vec![x, y]).unwrap();
            full.set_inputs(&vec![x, y]).unwrap();
            let a = incremental.eval().to_vec();
            let b = full.eval_full().to_vec();
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_cursor() {
        let e = evaluator(&["x + y"], &["x", "y"], &[1, 0]);
        let mut ctx = e.context();
        assert_eq!(ctx.cursor(), 3);
        ctx.eval();
        assert_eq!(ctx.cursor(), 0);
        // y is fastest
        ctx.set_input(1, Complex64::new(2.0, 0.0));
        assert_eq!(ctx.cursor(), 1);
        ctx.set_input(0, Complex64::new(2.0, 0.0));
        assert_eq!(ctx.cursor(), 2);
        ctx.eval();
        ctx.set_input(0, Complex64::new(2.0, 0.0));
        assert_eq!(ctx.cursor(), 0);
    }

    #[test]
    fn test_non_deterministic_always_runs() {
        let e = evaluator(&["x + random()"], &["x"], &[0]);
        assert!(e.start()[0] < e.instructions().len());
        let mut ctx = e.context();
        ctx.set_inputs(&vec![10.0]).unwrap();
        let first = ctx.eval()[0];
        let second = ctx.eval()[0];
        assert!(first.re >= 10.0 && first.re < 11.0);
        assert!(second.re >= 10.0 && second.re < 11.0);
    }

    #[test]
    fn test_parameters() {
        let mut ns = Namespace::builtins();
        ns.add_variable("x", true).unwrap();
        let a = ns.add_parameter(ParameterDef::new("a", 2.0, 0.0, 10.0)).unwrap();
        let variables = vec![Arc::new(VariableDef {
            name: "x".to_string(),
            real: true,
        })];
        let root = normalize(parse("a*x", &ns).unwrap());
        let graph = Graph::compile(&[root], &variables, &EngineConfig::default()).unwrap();
        let e = compile(&graph, &[0]).unwrap();
        let mut ctx = e.context();
        ctx.set_inputs(&vec![3.0]).unwrap();
        assert_eq!(ctx.eval()[0].re, 6.0);

        a.set(Complex64::new(4.0, 0.0));
        // stale until synced
        ctx.set_inputs(&vec![3.0]).unwrap();
        assert_eq!(ctx.eval()[0].re, 6.0);
        ctx.sync_parameters();
        assert_eq!(ctx.eval()[0].re, 12.0);
    }

    #[test]
    fn test_bound_matches_context() {
        let e = evaluator(&["sin(x)*y + exp(y/2)"], &["x", "y"], &[0, 1]);
        let mut reference = e.context();
        let mut ctx = e.context();
        let mut bound = ctx.bind();
        for (x, y) in [(0.5, 1.0), (0.7, 1.0), (0.7, -2.0)] {
            bound.set_input(0, Complex64::new(x, 0.0));
            bound.set_input(1, Complex64::new(y, 0.0));
            bound.eval();
            reference.set_inputs(&vec![x, y]).unwrap();
            assert_eq!(bound.output(0), reference.eval()[0]);
        }
    }

    #[test]
    fn test_evaluator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Evaluator>();
    }

    #[test]
    fn test_listing() {
        let e = evaluator(&["x*y + 1"], &["x", "y"], &[0, 1]);
        colored::control::set_override(false);
        let listing = e.listing(None);
        assert!(listing.contains("out0 = add("), "{listing}");
        // both calls depend on x, the fastest input
        assert!(listing.contains("start[1,2,3]:"), "{listing}");
    }
}
