//! The square root.
//!
//! Normalization rewrites `sqrt(x)` and `√x` to `x^(1/2)`, so this definition is
//! mostly reached through direct evaluation and constant folding.

use std::sync::Arc;

use num_complex::Complex64;

use crate::function::FunctionDef;
use crate::range;
use crate::types::Kernel;

pub fn sqrt_complex(z: Complex64) -> Complex64 {
    z.sqrt()
}

pub fn sqrt_real(x: f64) -> f64 {
    x.sqrt()
}

pub fn sqrt() -> Arc<FunctionDef> {
    FunctionDef::new("sqrt", 1)
        .with_complex(Kernel::Unary(sqrt_complex))
        .with_real(Kernel::Unary(sqrt_real), range::nonnegative_real)
        .with_range(range::sqrt)
        .with_complex_gradient(&["1/(2*sqrt(x))"])
        .build()
}
