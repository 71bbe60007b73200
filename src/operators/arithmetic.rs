//! Arithmetic kernels: the binary operators, the negation and inversion flips and
//! the identity `copy` used by the bytecode compiler.
//!
//! Division and inversion by an exact zero return NaN instead of an infinity, so
//! that undefined results stay undefined through later arithmetic.

use std::sync::Arc;

use num_complex::Complex64;

use crate::function::{Algebra, FunctionDef};
use crate::range;
use crate::types::Kernel;

const NAN: Complex64 = Complex64::new(f64::NAN, f64::NAN);

fn is_zero(z: Complex64) -> bool {
    z.re == 0.0 && z.im == 0.0
}

pub fn add_complex(a: Complex64, b: Complex64) -> Complex64 {
    a + b
}

pub fn add_real(a: f64, b: f64) -> f64 {
    a + b
}

pub fn sub_complex(a: Complex64, b: Complex64) -> Complex64 {
    a - b
}

pub fn sub_real(a: f64, b: f64) -> f64 {
    a - b
}

pub fn mul_complex(a: Complex64, b: Complex64) -> Complex64 {
    a * b
}

pub fn mul_real(a: f64, b: f64) -> f64 {
    a * b
}

pub fn div_complex(a: Complex64, b: Complex64) -> Complex64 {
    if is_zero(b) {
        return NAN;
    }
    a / b
}

pub fn div_real(a: f64, b: f64) -> f64 {
    if b == 0.0 {
        return f64::NAN;
    }
    a / b
}

pub fn neg_complex(a: Complex64) -> Complex64 {
    -a
}

pub fn neg_real(a: f64) -> f64 {
    -a
}

pub fn inv_complex(a: Complex64) -> Complex64 {
    if is_zero(a) {
        return NAN;
    }
    a.inv()
}

pub fn inv_real(a: f64) -> f64 {
    if a == 0.0 {
        return f64::NAN;
    }
    1.0 / a
}

pub fn copy_complex(a: Complex64) -> Complex64 {
    a
}

pub fn copy_real(a: f64) -> f64 {
    a
}

pub fn add() -> Arc<FunctionDef> {
    FunctionDef::new("add", 2)
        .with_complex(Kernel::Binary(add_complex))
        .with_real(Kernel::Binary(add_real), range::all_real)
        .with_range(range::add)
        .with_complex_gradient(&["1", "1"])
        .build()
}

pub fn sub() -> Arc<FunctionDef> {
    FunctionDef::new("sub", 2)
        .with_complex(Kernel::Binary(sub_complex))
        .with_real(Kernel::Binary(sub_real), range::all_real)
        .with_range(range::sub)
        .with_complex_gradient(&["1", "-1"])
        .build()
}

pub fn mul() -> Arc<FunctionDef> {
    FunctionDef::new("mul", 2)
        .with_complex(Kernel::Binary(mul_complex))
        .with_real(Kernel::Binary(mul_real), range::all_real)
        .with_range(range::mul)
        .with_complex_gradient(&["y", "x"])
        .build()
}

pub fn div() -> Arc<FunctionDef> {
    FunctionDef::new("div", 2)
        .with_complex(Kernel::Binary(div_complex))
        .with_real(Kernel::Binary(div_real), range::all_real)
        .with_range(range::div)
        .with_complex_gradient(&["1/y", "-x/y^2"])
        .build()
}

pub fn neg() -> Arc<FunctionDef> {
    FunctionDef::new("neg", 1)
        .with_complex(Kernel::Unary(neg_complex))
        .with_real(Kernel::Unary(neg_real), range::all_real)
        .with_range(range::neg)
        .with_complex_gradient(&["-1"])
        .with_algebra(Algebra {
            involution: true,
            additive: true,
            linear: true,
            ..Default::default()
        })
        .build()
}

pub fn inv() -> Arc<FunctionDef> {
    FunctionDef::new("inv", 1)
        .with_complex(Kernel::Unary(inv_complex))
        .with_real(Kernel::Unary(inv_real), range::all_real)
        .with_range(range::inv)
        .with_complex_gradient(&["-1/x^2"])
        .with_algebra(Algebra {
            involution: true,
            multiplicative: true,
            ..Default::default()
        })
        .build()
}

pub fn copy() -> Arc<FunctionDef> {
    FunctionDef::new("copy", 1)
        .with_complex(Kernel::Unary(copy_complex))
        .with_real(Kernel::Unary(copy_real), range::all_real)
        .with_range(range::identity)
        .with_complex_gradient(&["1"])
        .with_algebra(Algebra {
            idempotent: true,
            additive: true,
            multiplicative: true,
            linear: true,
            ..Default::default()
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_division_by_zero_is_nan() {
        assert!(div_real(1.0, 0.0).is_nan());
        let z = div_complex(Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0));
        assert!(z.re.is_nan() && z.im.is_nan());
        assert!(inv_real(0.0).is_nan());
        assert!(inv_complex(Complex64::new(0.0, 0.0)).re.is_nan());
    }

    #[test]
    fn test_inversion() {
        let z = inv_complex(Complex64::new(0.0, 2.0));
        assert!((z - Complex64::new(0.0, -0.5)).norm() < 1e-15);
        assert_eq!(inv_real(4.0), 0.25);
    }

    #[test]
    fn test_basic_kernels() {
        assert_eq!(add_real(2.0, 3.0), 5.0);
        assert_eq!(sub_real(2.0, 3.0), -1.0);
        assert_eq!(mul_complex(Complex64::new(0.0, 1.0), Complex64::new(0.0, 1.0)), Complex64::new(-1.0, 0.0));
        assert_eq!(neg_real(2.0), -2.0);
    }
}
