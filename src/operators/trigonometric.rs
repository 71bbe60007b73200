//! Trigonometric functions (`sin`, `cos`, `tan`), arguments in radians.

use std::sync::Arc;

use num_complex::Complex64;

use crate::function::FunctionDef;
use crate::range;
use crate::types::Kernel;

pub fn sin_complex(z: Complex64) -> Complex64 {
    z.sin()
}

pub fn sin_real(x: f64) -> f64 {
    x.sin()
}

pub fn cos_complex(z: Complex64) -> Complex64 {
    z.cos()
}

pub fn cos_real(x: f64) -> f64 {
    x.cos()
}

pub fn tan_complex(z: Complex64) -> Complex64 {
    z.tan()
}

pub fn tan_real(x: f64) -> f64 {
    x.tan()
}

pub fn sin() -> Arc<FunctionDef> {
    FunctionDef::new("sin", 1)
        .with_complex(Kernel::Unary(sin_complex))
        .with_real(Kernel::Unary(sin_real), range::all_real)
        .with_range(range::bounded_trig)
        .with_complex_gradient(&["cos(x)"])
        .build()
}

pub fn cos() -> Arc<FunctionDef> {
    FunctionDef::new("cos", 1)
        .with_complex(Kernel::Unary(cos_complex))
        .with_real(Kernel::Unary(cos_real), range::all_real)
        .with_range(range::bounded_trig)
        .with_complex_gradient(&["-sin(x)"])
        .build()
}

pub fn tan() -> Arc<FunctionDef> {
    FunctionDef::new("tan", 1)
        .with_complex(Kernel::Unary(tan_complex))
        .with_real(Kernel::Unary(tan_real), range::all_real)
        .with_range(range::real_if_real)
        .with_complex_gradient(&["1/cos(x)^2"])
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn test_real_and_complex_kernels_agree() {
        for x in [-1.0, 0.0, PI / 3.0, 2.5] {
            let z = Complex64::new(x, 0.0);
            assert!((sin_complex(z).re - sin_real(x)).abs() < 1e-12);
            assert!((cos_complex(z).re - cos_real(x)).abs() < 1e-12);
            assert!((tan_complex(z).re - tan_real(x)).abs() < 1e-12);
        }
    }

    #[test]
    fn test_pythagorean_identity_complex() {
        let z = Complex64::new(0.3, -1.2);
        let one = sin_complex(z) * sin_complex(z) + cos_complex(z) * cos_complex(z);
        assert!((one - Complex64::new(1.0, 0.0)).norm() < 1e-12);
    }
}
