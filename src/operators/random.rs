//! `random()`: a uniformly distributed real in [0, 1).
//!
//! The only non-deterministic built-in. Calls to it are never folded or merged,
//! always re-run on evaluation, and cannot be differentiated.

use std::sync::Arc;

use crate::function::FunctionDef;
use crate::range;
use crate::types::Kernel;

pub fn random_real() -> f64 {
    rand::random::<f64>()
}

pub fn random() -> Arc<FunctionDef> {
    FunctionDef::new("random", 0)
        .with_real(Kernel::Nullary(random_real), range::all_real)
        .with_range(range::unit_interval)
        .non_deterministic()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_in_unit_interval() {
        for _ in 0..100 {
            let x = random_real();
            assert!((0.0..1.0).contains(&x));
        }
        assert!(!random().is_deterministic());
    }
}
