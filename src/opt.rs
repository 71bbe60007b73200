//! Optimizing Tree: the DAG every formula is lowered to before compilation.
//!
//! Pass pipeline
//! -------------
//!  1. **build**       – structural translation of Working Trees; `Sum` and
//!                       `Product` expand into nested binary `+ - * /` calls.
//!  2. **determinism** – bottom-up: a call is deterministic when its function
//!                       and all of its operands are.
//!  3. **fold**        – post-order constant folding of deterministic calls
//!                       whose operands are all constants.
//!  4. **merge**       – hash-consing: equal constants, equal variables and
//!                       deterministic calls with the same callee and the same
//!                       (already merged) operands become one node.
//!  5. **compact**     – drop nodes no output reaches.
//!  6. **realness**    – infer a range per node and pick each call's kernel
//!                       variant.
//!
//! Nodes live in an arena and refer to each other by index. Operands always
//! have lower indices than the node using them, so a forward walk is a valid
//! post-order.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use num_complex::Complex64;

use crate::config::EngineConfig;
use crate::element::{ParameterDef, VariableDef};
use crate::errors::CompileError;
use crate::expr::Node;
use crate::function::{FunctionDef, FunctionId};
use crate::namespace::Namespace;
use crate::operators::catalog::catalog;
use crate::range::Range;
use crate::types::CallShape;

/// Index of a node in a [`Graph`].
pub type NodeId = usize;

/// Where a variable leaf reads its value from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    /// Input `i` of the evaluator
    Free(usize),
    /// Parameter `j` of the graph
    Param(usize),
}

#[derive(Debug, Clone)]
pub enum IrKind {
    Constant(Complex64),
    Variable(Source),
    Call {
        function: Arc<FunctionDef>,
        args: Vec<NodeId>,
    },
}

/// A node of the Optimizing Tree.
#[derive(Debug, Clone)]
pub struct IrNode {
    pub kind: IrKind,
    pub deterministic: bool,
    pub range: Range,
    /// Kernel variant of a call, decided by realness inference.
    pub shape: Option<CallShape>,
}

impl IrNode {
    fn new(kind: IrKind) -> Self {
        Self {
            kind,
            deterministic: true,
            range: Range::COMPLEX,
            shape: None,
        }
    }

    pub fn args(&self) -> &[NodeId] {
        match &self.kind {
            IrKind::Call { args, .. } => args,
            _ => &[],
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self.kind, IrKind::Call { .. })
    }
}

/// Node counts after each pass, for the debug log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub built: usize,
    pub folded: usize,
    pub merged: usize,
    pub live: usize,
}

/// Key under which structurally equal nodes are merged.
#[derive(Debug, PartialEq, Eq, Hash)]
enum MergeKey {
    Constant(u64, u64),
    Variable(Source),
    Call(FunctionId, Vec<NodeId>),
}

/// An optimized multi-output DAG.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<IrNode>,
    outputs: Vec<NodeId>,
    variables: Vec<Arc<VariableDef>>,
    parameters: Vec<Arc<ParameterDef>>,
    stats: Stats,
}

impl Graph {
    /// Lowers Working Trees into one graph, without optimizing it.
    ///
    /// # Arguments
    /// * `roots` - One tree per output, normalized or raw
    /// * `variables` - The evaluator's inputs, in input order
    ///
    /// # Errors
    /// * `CompileError::UnknownVariable` if a tree uses a variable not in `variables`
    /// * `CompileError::Arity` if a call's argument count differs from its function's arity
    pub fn build(roots: &[Node], variables: &[Arc<VariableDef>]) -> Result<Graph, CompileError> {
        let mut graph = Graph {
            nodes: Vec::new(),
            outputs: Vec::with_capacity(roots.len()),
            variables: variables.to_vec(),
            parameters: Vec::new(),
            stats: Stats::default(),
        };
        for root in roots {
            let id = graph.lower(root)?;
            graph.outputs.push(id);
        }
        graph.stats.built = graph.nodes.len();
        Ok(graph)
    }

    /// Builds, optimizes and types a graph in one go.
    pub fn compile(
        roots: &[Node],
        variables: &[Arc<VariableDef>],
        config: &EngineConfig,
    ) -> Result<Graph, CompileError> {
        let mut graph = Graph::build(roots, variables)?;
        graph.optimize(config);
        graph.infer_ranges()?;
        Ok(graph)
    }

    fn push(&mut self, kind: IrKind) -> NodeId {
        self.nodes.push(IrNode::new(kind));
        self.nodes.len() - 1
    }

    fn call(&mut self, function: &Arc<FunctionDef>, args: Vec<NodeId>) -> NodeId {
        self.push(IrKind::Call {
            function: function.clone(),
            args,
        })
    }

    fn lower(&mut self, node: &Node) -> Result<NodeId, CompileError> {
        let c = catalog();
        match node {
            Node::Number(z) => Ok(self.push(IrKind::Constant(*z))),
            Node::Constant(def) => Ok(self.push(IrKind::Constant(def.value))),
            Node::Variable(v) => {
                let index = self
                    .variables
                    .iter()
                    .position(|known| known.name == v.name)
                    .ok_or_else(|| CompileError::UnknownVariable(v.name.clone()))?;
                Ok(self.push(IrKind::Variable(Source::Free(index))))
            }
            Node::Parameter(p) => {
                let index = match self.parameters.iter().position(|known| Arc::ptr_eq(known, p)) {
                    Some(index) => index,
                    None => {
                        self.parameters.push(p.clone());
                        self.parameters.len() - 1
                    }
                };
                Ok(self.push(IrKind::Variable(Source::Param(index))))
            }
            Node::Sum(terms) => {
                // a + b - c  →  sub(add(a, b), c)
                let mut acc: Option<NodeId> = None;
                for term in terms {
                    acc = Some(match (acc, term.as_neg()) {
                        (None, Some(x)) => {
                            let x = self.lower(x)?;
                            self.call(&c.neg, vec![x])
                        }
                        (None, None) => self.lower(term)?,
                        (Some(a), Some(x)) => {
                            let x = self.lower(x)?;
                            self.call(&c.sub, vec![a, x])
                        }
                        (Some(a), None) => {
                            let t = self.lower(term)?;
                            self.call(&c.add, vec![a, t])
                        }
                    });
                }
                Ok(match acc {
                    Some(id) => id,
                    None => self.push(IrKind::Constant(Complex64::new(0.0, 0.0))),
                })
            }
            Node::Product(factors) => {
                // a * b / c  →  div(mul(a, b), c)
                let mut acc: Option<NodeId> = None;
                for factor in factors.iter().filter(|f| f.as_inv().is_none()) {
                    let f = self.lower(factor)?;
                    acc = Some(match acc {
                        None => f,
                        Some(a) => self.call(&c.mul, vec![a, f]),
                    });
                }
                for x in factors.iter().filter_map(Node::as_inv) {
                    let x = self.lower(x)?;
                    acc = Some(match acc {
                        None => self.call(&c.inv, vec![x]),
                        Some(a) => self.call(&c.div, vec![a, x]),
                    });
                }
                Ok(match acc {
                    Some(id) => id,
                    None => self.push(IrKind::Constant(Complex64::new(1.0, 0.0))),
                })
            }
            Node::Call(..) | Node::Operator(..) => {
                let function = node.function().ok_or_else(|| CompileError::NoVariant {
                    function: node.to_string(),
                })?;
                let children = node.children();
                if children.len() != function.arity() {
                    return Err(CompileError::Arity {
                        function: function.name().to_string(),
                        expected: function.arity(),
                        got: children.len(),
                    });
                }
                let args = children
                    .iter()
                    .map(|child| self.lower(child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.call(function, args))
            }
        }
    }

    /// Runs the determinism, folding, merging and compaction passes.
    pub fn optimize(&mut self, config: &EngineConfig) {
        self.propagate_determinism();
        if config.fold_constants {
            self.fold();
        }
        self.stats.folded = self.count_calls();
        if config.merge_nodes {
            self.merge();
        }
        self.compact();
        self.stats.merged = self.nodes.len();
        self.stats.live = self.nodes.len();
        debug!(
            "ir: {} nodes built, {} calls after folding, {} nodes after merging, {} outputs",
            self.stats.built,
            self.stats.folded,
            self.stats.merged,
            self.outputs.len()
        );
    }

    fn count_calls(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_call()).count()
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Determinism
    // ────────────────────────────────────────────────────────────────────────
    fn propagate_determinism(&mut self) {
        for id in 0..self.nodes.len() {
            let deterministic = match &self.nodes[id].kind {
                IrKind::Call { function, args } => {
                    function.is_deterministic() && args.iter().all(|&a| self.nodes[a].deterministic)
                }
                _ => true,
            };
            self.nodes[id].deterministic = deterministic;
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Constant folding
    // ────────────────────────────────────────────────────────────────────────
    fn fold(&mut self) {
        for id in 0..self.nodes.len() {
            if !self.nodes[id].deterministic {
                continue;
            }
            let IrKind::Call { function, args } = &self.nodes[id].kind else {
                continue;
            };
            let values: Option<Vec<Complex64>> = args
                .iter()
                .map(|&a| match self.nodes[a].kind {
                    IrKind::Constant(z) => Some(z),
                    _ => None,
                })
                .collect();
            if let Some(values) = values {
                let value = function.evaluate(&values);
                self.nodes[id].kind = IrKind::Constant(value);
            }
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Merging
    // ────────────────────────────────────────────────────────────────────────
    fn merge(&mut self) {
        let mut canonical: Vec<NodeId> = (0..self.nodes.len()).collect();
        let mut seen: HashMap<MergeKey, NodeId> = HashMap::new();
        for id in 0..self.nodes.len() {
            if let IrKind::Call { args, .. } = &mut self.nodes[id].kind {
                for arg in args.iter_mut() {
                    *arg = canonical[*arg];
                }
            }
            let node = &self.nodes[id];
            let key = match &node.kind {
                IrKind::Constant(z) => MergeKey::Constant(z.re.to_bits(), z.im.to_bits()),
                IrKind::Variable(source) => MergeKey::Variable(*source),
                // non-deterministic calls stay distinct
                IrKind::Call { .. } if !node.deterministic => continue,
                IrKind::Call { function, args } => MergeKey::Call(function.id(), args.clone()),
            };
            canonical[id] = *seen.entry(key).or_insert(id);
        }
        for output in &mut self.outputs {
            *output = canonical[*output];
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Compaction
    // ────────────────────────────────────────────────────────────────────────
    fn compact(&mut self) {
        let mut live = vec![false; self.nodes.len()];
        for &output in &self.outputs {
            live[output] = true;
        }
        for id in (0..self.nodes.len()).rev() {
            if live[id] {
                for &arg in self.nodes[id].args() {
                    live[arg] = true;
                }
            }
        }

        let mut renumbered = vec![usize::MAX; self.nodes.len()];
        let mut nodes = Vec::with_capacity(live.iter().filter(|l| **l).count());
        for (id, node) in std::mem::take(&mut self.nodes).into_iter().enumerate() {
            if !live[id] {
                continue;
            }
            let mut node = node;
            if let IrKind::Call { args, .. } = &mut node.kind {
                for arg in args.iter_mut() {
                    *arg = renumbered[*arg];
                }
            }
            renumbered[id] = nodes.len();
            nodes.push(node);
        }
        self.nodes = nodes;
        for output in &mut self.outputs {
            *output = renumbered[*output];
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    //  Realness
    // ────────────────────────────────────────────────────────────────────────

    /// Infers a range per node and picks the kernel variant of every call.
    ///
    /// # Errors
    /// `CompileError::NoVariant` if no kernel of a function accepts the
    /// inferred argument ranges.
    pub fn infer_ranges(&mut self) -> Result<(), CompileError> {
        for id in 0..self.nodes.len() {
            let (range, shape) = match &self.nodes[id].kind {
                IrKind::Constant(z) => (Range::of_value(*z), None),
                IrKind::Variable(Source::Free(i)) => (self.variables[*i].range(), None),
                IrKind::Variable(Source::Param(j)) => (self.parameters[*j].range(), None),
                IrKind::Call { function, args } => {
                    let ranges: Vec<Range> = args.iter().map(|&a| self.nodes[a].range).collect();
                    let shape = function.select_shape(&ranges).ok_or_else(|| CompileError::NoVariant {
                        function: function.name().to_string(),
                    })?;
                    (function.range(&ranges), Some(shape))
                }
            };
            self.nodes[id].range = range;
            self.nodes[id].shape = shape;
        }
        Ok(())
    }

    pub fn nodes(&self) -> &[IrNode] {
        &self.nodes
    }

    pub fn node(&self, id: NodeId) -> &IrNode {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    pub fn variables(&self) -> &[Arc<VariableDef>] {
        &self.variables
    }

    pub fn parameters(&self) -> &[Arc<ParameterDef>] {
        &self.parameters
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Number of calls to the function with the given id.
    pub fn count_calls_to(&self, id: FunctionId) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(&n.kind, IrKind::Call { function, .. } if function.id() == id))
            .count()
    }

    fn name_of(&self, function: &FunctionDef, scope: Option<&Namespace>) -> String {
        scope
            .and_then(|ns| ns.find_callee(function.id(), function.arity()))
            .map(|e| e.name().to_string())
            .unwrap_or_else(|| function.name().to_string())
    }

    /// One line per node: `%3 = sin(%1)  [real]`.
    pub fn listing(&self, scope: Option<&Namespace>) -> String {
        let mut out = String::new();
        for (id, node) in self.nodes.iter().enumerate() {
            let body = match &node.kind {
                IrKind::Constant(z) if z.im == 0.0 => format!("{}", z.re),
                IrKind::Constant(z) => format!("{z}"),
                IrKind::Variable(Source::Free(i)) => self.variables[*i].name.clone(),
                IrKind::Variable(Source::Param(j)) => format!("${}", self.parameters[*j].name()),
                IrKind::Call { function, args } => {
                    let args: Vec<String> = args.iter().map(|a| format!("%{a}")).collect();
                    format!("{}({})", self.name_of(function, scope), args.join(", "))
                }
            };
            let shape = node.shape.map(|s| format!(" {s}")).unwrap_or_default();
            out.push_str(&format!("%{id} = {body}  [{}{shape}]\n", node.range));
        }
        let outputs: Vec<String> = self.outputs.iter().map(|o| format!("%{o}")).collect();
        out.push_str(&format!("out: {}\n", outputs.join(", ")));
        out
    }
}

impl std::fmt::Display for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.listing(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::normalize;
    use crate::parser::parse;

    fn namespace() -> Namespace {
        let mut ns = Namespace::builtins();
        ns.add_variable("x", true).unwrap();
        ns.add_variable("y", true).unwrap();
        ns.add_variable("z", false).unwrap();
        ns
    }

    fn inputs(names: &[(&str, bool)]) -> Vec<Arc<VariableDef>> {
        names
            .iter()
            .map(|(name, real)| {
                Arc::new(VariableDef {
                    name: name.to_string(),
                    real: *real,
                })
            })
            .collect()
    }

    fn graph(texts: &[&str], config: &EngineConfig) -> Graph {
        let ns = namespace();
        let roots: Vec<Node> = texts.iter().map(|t| normalize(parse(t, &ns).unwrap())).collect();
        Graph::compile(&roots, &inputs(&[("x", true), ("y", true), ("z", false)]), config).unwrap()
    }

    #[test]
    fn test_shared_sin() {
        let g = graph(&["sin(x)*sin(x)", "sin(x)^2"], &EngineConfig::default());
        assert_eq!(g.count_calls_to(catalog().sin.id()), 1);
        assert_eq!(g.outputs().len(), 2);
    }

    #[test]
    fn test_merge_disabled_keeps_copies() {
        let config = EngineConfig::default().with_merge_nodes(false);
        let g = graph(&["sin(x)*sin(x)"], &config);
        assert_eq!(g.count_calls_to(catalog().sin.id()), 2);
    }

    #[test]
    fn test_constant_folding() {
        let ns = namespace();
        let root = parse("2*3 + x", &ns).unwrap();
        let vars = inputs(&[("x", true)]);
        let g = Graph::compile(&[root.clone()], &vars, &EngineConfig::default()).unwrap();
        assert_eq!(g.count_calls_to(catalog().mul.id()), 0);
        assert!(g
            .nodes()
            .iter()
            .any(|n| matches!(n.kind, IrKind::Constant(z) if z == Complex64::new(6.0, 0.0))));

        let config = EngineConfig::default().with_fold_constants(false);
        let g = Graph::compile(&[root], &vars, &config).unwrap();
        assert_eq!(g.count_calls_to(catalog().mul.id()), 1);
    }

    #[test]
    fn test_whole_output_folds() {
        let g = graph(&["1/0"], &EngineConfig::default());
        assert_eq!(g.len(), 1);
        let IrKind::Constant(z) = g.node(g.outputs()[0]).kind else {
            panic!("expected a constant");
        };
        assert!(z.re.is_nan());
    }

    #[test]
    fn test_non_deterministic_not_folded_or_merged() {
        let g = graph(&["random() + random()"], &EngineConfig::default());
        assert_eq!(g.count_calls_to(catalog().random.id()), 2);
        assert!(!g.node(g.outputs()[0]).deterministic);
    }

    #[test]
    fn test_operands_precede_users() {
        let g = graph(&["sin(x + y)*cos(x + y) - x/y"], &EngineConfig::default());
        for (id, node) in g.nodes().iter().enumerate() {
            assert!(node.args().iter().all(|&a| a < id));
        }
    }

    #[test]
    fn test_realness() {
        let g = graph(&["sin(x)", "sin(z)", "sqrt(x)"], &EngineConfig::default());
        let shapes: Vec<Option<CallShape>> = g.outputs().iter().map(|&o| g.node(o).shape).collect();
        assert_eq!(shapes[0], Some(CallShape::Real));
        assert_eq!(shapes[1], Some(CallShape::Complex));
        // sqrt of a possibly negative real needs the complex kernel
        assert_ne!(shapes[2], Some(CallShape::Real));
    }

    #[test]
    fn test_unknown_variable() {
        let ns = namespace();
        let root = normalize(parse("x + y", &ns).unwrap());
        let err = Graph::build(&[root], &inputs(&[("x", true)])).unwrap_err();
        assert_eq!(err, CompileError::UnknownVariable("y".to_string()));
    }

    #[test]
    fn test_listing_uses_namespace_names() {
        let ns = namespace();
        let g = graph(&["x*y"], &EngineConfig::default());
        let listing = g.listing(Some(&ns));
        assert!(listing.contains("*(%0, %1)") || listing.contains("mul(%0, %1)"), "{listing}");
        assert!(listing.ends_with("out: %2\n"));
    }
}
