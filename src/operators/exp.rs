//! The exponential function.
//!
//! Provides the complex and real kernels of `exp` and its definition. `exp` is
//! declared the inverse of `ln` when applied on the outside, so `exp(ln(z))`
//! simplifies to `z`.

use std::sync::Arc;

use num_complex::Complex64;

use crate::combination::Combination;
use crate::function::FunctionDef;
use crate::range;
use crate::types::Kernel;

pub fn exp_complex(z: Complex64) -> Complex64 {
    z.exp()
}

pub fn exp_real(x: f64) -> f64 {
    x.exp()
}

/// Builds the definition of `exp`.
///
/// # Returns
/// The shared definition with complex and real kernels and gradient `exp(x)`.
pub fn exp() -> Arc<FunctionDef> {
    FunctionDef::new("exp", 1)
        .with_complex(Kernel::Unary(exp_complex))
        .with_real(Kernel::Unary(exp_real), range::all_real)
        .with_range(range::exp)
        .with_complex_gradient(&["exp(x)"])
        .with_pair("ln", Combination::Inverse)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::Range;
    use crate::types::CallShape;

    #[test]
    fn test_exp_kernels_agree_on_reals() {
        for x in [-2.0, 0.0, 0.5, 3.0] {
            assert!((exp_complex(Complex64::new(x, 0.0)).re - exp_real(x)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_exp_of_imaginary_is_on_unit_circle() {
        let z = exp_complex(Complex64::new(0.0, 1.3));
        assert!((z.norm() - 1.0).abs() < 1e-12);
        assert_eq!(range::exp(&[Range::IMAGINARY]), Range::UNIT);
    }

    #[test]
    fn test_exp_shape() {
        let f = exp();
        assert_eq!(f.select_shape(&[Range::REAL]), Some(CallShape::Real));
        assert_eq!(f.select_shape(&[Range::COMPLEX]), Some(CallShape::Complex));
    }
}
