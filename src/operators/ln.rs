//! The natural logarithm.
//!
//! The real kernel is only selected for non-negative real arguments; everything
//! else takes the principal branch of the complex logarithm. `ln(0)` is `-inf`.

use std::sync::Arc;

use num_complex::Complex64;

use crate::function::FunctionDef;
use crate::range;
use crate::types::Kernel;

pub fn ln_complex(z: Complex64) -> Complex64 {
    z.ln()
}

pub fn ln_real(x: f64) -> f64 {
    x.ln()
}

pub fn ln() -> Arc<FunctionDef> {
    FunctionDef::new("ln", 1)
        .with_complex(Kernel::Unary(ln_complex))
        .with_real(Kernel::Unary(ln_real), range::nonnegative_real)
        .with_range(range::ln)
        .with_complex_gradient(&["1/x"])
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::Range;
    use crate::types::CallShape;

    #[test]
    fn test_ln_negative_takes_complex_branch() {
        let f = ln();
        assert_eq!(f.select_shape(&[Range::REAL]), Some(CallShape::Complex));
        let z = f.evaluate(&[Complex64::new(-1.0, 0.0)]);
        assert!((z.im - std::f64::consts::PI).abs() < 1e-12);
    }

    #[test]
    fn test_ln_zero() {
        assert_eq!(ln_real(0.0), f64::NEG_INFINITY);
    }
}
