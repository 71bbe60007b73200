//! Engine configuration.

/// Tuning knobs for the simplifier and the IR optimizer.
///
/// # Example
/// ```
/// # use mathexpr_vm::config::EngineConfig;
/// let config = EngineConfig::default().with_merge_nodes(false).with_simplify_passes(4);
/// assert_eq!(config.simplify_passes, 4);
/// assert!(config.fold_constants);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Upper bound on simplifier passes for ordinary formulas.
    pub simplify_passes: usize,
    /// Upper bound on simplifier passes applied to derivative trees.
    pub derivative_passes: usize,
    /// Largest Sum/Product for which commutative rule matching tries permutations.
    pub max_commutative_terms: usize,
    /// Fold deterministic calls over constants in the IR.
    pub fold_constants: bool,
    /// Unify structurally equal IR nodes.
    pub merge_nodes: bool,
    /// Load the built-in rewrite rules.
    pub builtin_rules: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            simplify_passes: 10,
            derivative_passes: 100,
            max_commutative_terms: 6,
            fold_constants: true,
            merge_nodes: true,
            builtin_rules: true,
        }
    }
}

impl EngineConfig {
    pub fn with_simplify_passes(mut self, passes: usize) -> Self {
        self.simplify_passes = passes;
        self
    }

    pub fn with_derivative_passes(mut self, passes: usize) -> Self {
        self.derivative_passes = passes;
        self
    }

    pub fn with_max_commutative_terms(mut self, terms: usize) -> Self {
        self.max_commutative_terms = terms;
        self
    }

    pub fn with_fold_constants(mut self, fold: bool) -> Self {
        self.fold_constants = fold;
        self
    }

    pub fn with_merge_nodes(mut self, merge: bool) -> Self {
        self.merge_nodes = merge;
        self
    }

    pub fn with_builtin_rules(mut self, enabled: bool) -> Self {
        self.builtin_rules = enabled;
        self
    }
}
