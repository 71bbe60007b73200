//! Bytecode compilation of an optimized [`Graph`] into an [`Evaluator`].
//!
//! The main entry point is [`compile`]. It
//! - assigns every live node one stack slot,
//! - inserts a `copy` call for every output that is not the sole owner of a
//!   call node (leaves, constants and outputs merged with an earlier output),
//! - schedules the calls from a pool of ready nodes, preferring deterministic
//!   calls and, among those, calls whose fastest-changing input changes latest,
//! - and derives the `start[]` table from the resulting order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use log::debug;
use num_complex::Complex64;

use crate::config::EngineConfig;
use crate::element::VariableDef;
use crate::errors::CompileError;
use crate::evaluator::{Evaluator, Instruction, Layout};
use crate::expr::Node;
use crate::function::FunctionDef;
use crate::opt::{Graph, IrKind, NodeId, Source};
use crate::operators::catalog::catalog;

/// A unit of scheduling: a call node, or a copy into an output slot.
#[derive(Debug, Clone, Copy)]
enum Task {
    Node(NodeId),
    Copy { output: usize, source: NodeId },
}

/// Change-order positions of the inputs, fastest first.
///
/// `order` lists input indices from fastest- to slowest-changing. Inputs it
/// leaves out are appended in input order; repeated or out-of-range entries
/// are ignored.
fn positions(order: &[usize], inputs: usize) -> Vec<usize> {
    let mut positions = vec![usize::MAX; inputs];
    let mut next = 0;
    for index in order.iter().copied().chain(0..inputs) {
        if index < inputs && positions[index] == usize::MAX {
            positions[index] = next;
            next += 1;
        }
    }
    positions
}

/// Compiles a typed graph into bytecode.
///
/// # Arguments
/// * `graph` - An optimized graph with inferred ranges
/// * `order` - Input indices from fastest- to slowest-changing
///
/// # Returns
/// The evaluator, with one output slot per graph output.
///
/// # Errors
/// `CompileError::NoVariant` if a call has no kernel for its selected shape.
pub fn compile(graph: &Graph, order: &[usize]) -> Result<Evaluator, CompileError> {
    let c = catalog();
    let n = graph.variables().len();
    let m = graph.parameters().len();
    let k = graph.outputs().len();
    let positions = positions(order, n);
    // level: instructions of level <= c run when the cursor is c
    let everything = n + 1;

    let mut levels = vec![everything; graph.len()];
    for (id, node) in graph.nodes().iter().enumerate() {
        let level = match &node.kind {
            IrKind::Constant(_) | IrKind::Variable(Source::Param(_)) => everything,
            IrKind::Variable(Source::Free(i)) => positions[*i] + 1,
            IrKind::Call { function, args } => {
                if function.is_deterministic() {
                    args.iter().map(|&a| levels[a]).min().unwrap_or(everything)
                } else {
                    0
                }
            }
        };
        levels[id] = level;
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Slots
    // ────────────────────────────────────────────────────────────────────────
    let mut layout = Layout {
        variables: n,
        parameters: m,
        outputs: k,
        ..Default::default()
    };
    let mut slots: Vec<Option<u32>> = vec![None; graph.len()];
    let mut tasks = Vec::new();

    for (output, &id) in graph.outputs().iter().enumerate() {
        if graph.node(id).is_call() && slots[id].is_none() {
            slots[id] = Some((layout.output_offset() + output) as u32);
        } else {
            tasks.push(Task::Copy { output, source: id });
        }
    }

    let mut template = Vec::new();
    let mut constants = Vec::new();
    for (id, node) in graph.nodes().iter().enumerate() {
        match node.kind {
            IrKind::Variable(Source::Free(i)) => slots[id] = Some(i as u32),
            IrKind::Variable(Source::Param(j)) => slots[id] = Some((n + j) as u32),
            IrKind::Constant(z) => {
                slots[id] = Some((layout.constant_offset() + constants.len()) as u32);
                constants.push(z);
            }
            IrKind::Call { .. } => {}
        }
    }
    layout.constants = constants.len();
    for id in 0..graph.len() {
        if graph.node(id).is_call() && slots[id].is_none() {
            slots[id] = Some((layout.intermediate_offset() + layout.intermediates) as u32);
            layout.intermediates += 1;
        }
    }
    template.resize(layout.len(), Complex64::new(0.0, 0.0));
    template[layout.constant_offset()..layout.intermediate_offset()].copy_from_slice(&constants);
    let slot = |id: NodeId| slots[id].unwrap_or(0);

    // ────────────────────────────────────────────────────────────────────────
    //  Scheduling
    // ────────────────────────────────────────────────────────────────────────
    let copies = std::mem::take(&mut tasks);
    tasks.extend((0..graph.len()).filter(|&id| graph.node(id).is_call()).map(Task::Node));
    tasks.extend(copies);

    let mut task_of_node: HashMap<NodeId, usize> = HashMap::new();
    for (t, task) in tasks.iter().enumerate() {
        if let Task::Node(id) = task {
            task_of_node.insert(*id, t);
        }
    }
    let mut waiting = vec![0usize; tasks.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];
    let mut task_level = vec![everything; tasks.len()];
    for (t, task) in tasks.iter().enumerate() {
        let (level, deps): (usize, Vec<NodeId>) = match *task {
            Task::Node(id) => (levels[id], graph.node(id).args().to_vec()),
            Task::Copy { source, .. } => (levels[source], vec![source]),
        };
        task_level[t] = level;
        for dep in deps {
            if let Some(&d) = task_of_node.get(&dep) {
                waiting[t] += 1;
                dependents[d].push(t);
            }
        }
    }

    let mut ready: BinaryHeap<(bool, usize, Reverse<usize>)> = BinaryHeap::new();
    let key = |t: usize| (task_level[t] > 0, task_level[t], Reverse(t));
    for t in 0..tasks.len() {
        if waiting[t] == 0 {
            ready.push(key(t));
        }
    }

    let mut instructions = Vec::with_capacity(tasks.len());
    let mut emitted_levels = Vec::with_capacity(tasks.len());
    let mut functions: HashMap<_, Arc<FunctionDef>> = HashMap::new();
    while let Some((_, level, Reverse(t))) = ready.pop() {
        let (function, result, args, shape) = match tasks[t] {
            Task::Node(id) => {
                let node = graph.node(id);
                let IrKind::Call { function, args } = &node.kind else {
                    continue;
                };
                (function.clone(), slot(id), args.clone(), node.shape)
            }
            Task::Copy { output, source } => {
                let shape = c.copy.select_shape(&[graph.node(source).range]);
                (c.copy.clone(), (layout.output_offset() + output) as u32, vec![source], shape)
            }
        };
        let dispatch = shape
            .and_then(|s| function.kernels().dispatch(s))
            .ok_or_else(|| CompileError::NoVariant {
                function: function.name().to_string(),
            })?;
        let mut operands = [0u32; 4];
        for (operand, &arg) in operands.iter_mut().zip(&args) {
            *operand = slot(arg);
        }
        instructions.push(Instruction {
            result,
            operands,
            function: function.id(),
            dispatch,
        });
        emitted_levels.push(level);
        functions.entry(function.id()).or_insert(function);

        for &d in &dependents[t] {
            waiting[d] -= 1;
            if waiting[d] == 0 {
                ready.push(key(d));
            }
        }
    }
    debug_assert!(emitted_levels.windows(2).all(|w| w[0] >= w[1]));

    let start: Vec<usize> = (0..=everything)
        .map(|cursor| {
            emitted_levels
                .iter()
                .position(|&level| level <= cursor)
                .unwrap_or(instructions.len())
        })
        .collect();

    debug!(
        "bytecode: {} instructions, layout {:?}, start {:?}",
        instructions.len(),
        layout,
        start
    );

    Ok(Evaluator {
        instructions,
        start,
        layout,
        template,
        variables: graph.variables().to_vec(),
        parameters: graph.parameters().to_vec(),
        positions,
        functions,
    })
}

/// Lowers, optimizes and compiles Working Trees into one evaluator, with the
/// first input changing fastest.
pub fn compile_trees(
    roots: &[Node],
    variables: &[Arc<VariableDef>],
    config: &EngineConfig,
) -> Result<Evaluator, CompileError> {
    let graph = Graph::compile(roots, variables, config)?;
    let order: Vec<usize> = (0..variables.len()).collect();
    compile(&graph, &order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::normalize;
    use crate::namespace::Namespace;
    use crate::parser::parse;

    fn build(texts: &[&str], inputs: &[&str], order: &[usize]) -> Evaluator {
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

    #[test]
    fn test_positions() {
        assert_eq!(positions(&[1, 0], 2), vec![1, 0]);
        assert_eq!(positions(&[2], 3), vec![1, 2, 0]);
        assert_eq!(positions(&[5, 0, 0], 2), vec![0, 1]);
    }

    #[test]
    fn test_copy_for_leaf_and_shared_outputs() {
        let e = build(&["x", "sin(x)", "sin(x)", "2"], &["x"], &[0]);
        let copy = catalog().copy.id();
        let copies = e.instructions().iter().filter(|i| i.function == copy).count();
        // x, the second sin(x) and the constant
        assert_eq!(copies, 3);

        let mut ctx = e.context();
        ctx.set_inputs(&vec![0.5]).unwrap();
        let out = ctx.eval().to_vec();
        assert_eq!(out[0], Complex64::new(0.5, 0.0));
        assert_eq!(out[1], out[2]);
        assert_eq!(out[3], Complex64::new(2.0, 0.0));
    }

    #[test]
    fn test_operands_written_before_use() {
        let e = build(&["sin(x)*cos(y) - x/(y + 2)", "exp(x*y)"], &["x", "y"], &[1, 0]);
        let layout = e.layout();
        for (index, instruction) in e.instructions().iter().enumerate() {
            for &operand in &instruction.operands[..instruction.dispatch.arity()] {
                if (operand as usize) < layout.output_offset()
                    || (layout.constant_offset()..layout.intermediate_offset()).contains(&(operand as usize))
                {
                    continue;
                }
                assert!(e.instructions()[..index].iter().any(|i| i.result == operand));
            }
        }
    }

    #[test]
    fn test_slow_variable_first() {
        // y changes slowest, so y-only work comes first
        let e = build(&["sin(y) + x"], &["x", "y"], &[0, 1]);
        let sin = catalog().sin.id();
        assert_eq!(e.instructions()[0].function, sin);
        assert_eq!(e.start()[1], 1);
        assert_eq!(e.start()[2], 0);
    }

    #[test]
    fn test_layout() {
        let e = build(&["x*y + 3"], &["x", "y"], &[0, 1]);
        let layout = e.layout();
        assert_eq!(layout.variables, 2);
        assert_eq!(layout.outputs, 1);
        assert_eq!(layout.constants, 1);
        assert_eq!(layout.intermediates, 1);
        assert_eq!(layout.len(), 5);
    }
}
