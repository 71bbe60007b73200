//! Exponentiation.
//!
//! Zero bases are handled before any branch computation:
//! - `0^0` is `1`
//! - `0^p` with positive real `p` is `0`
//! - any other exponent of zero is undefined (NaN)
//!
//! Integer exponents use repeated multiplication so that `(-2)^3` stays exactly
//! `-8` in the complex kernel too.

use std::sync::Arc;

use num_complex::Complex64;

use crate::function::FunctionDef;
use crate::range;
use crate::types::Kernel;

const NAN: Complex64 = Complex64::new(f64::NAN, f64::NAN);

pub fn pow_complex(base: Complex64, exponent: Complex64) -> Complex64 {
    if base.re == 0.0 && base.im == 0.0 {
        if exponent.re == 0.0 && exponent.im == 0.0 {
            return Complex64::new(1.0, 0.0);
        }
        if exponent.im == 0.0 && exponent.re > 0.0 {
            return Complex64::new(0.0, 0.0);
        }
        return NAN;
    }
    if exponent.im == 0.0 && exponent.re.fract() == 0.0 && exponent.re.abs() <= 1024.0 {
        return base.powi(exponent.re as i32);
    }
    base.powc(exponent)
}

pub fn pow_real(base: f64, exponent: f64) -> f64 {
    if base == 0.0 && exponent < 0.0 {
        return f64::NAN;
    }
    base.powf(exponent)
}

pub fn pow() -> Arc<FunctionDef> {
    FunctionDef::new("pow", 2)
        .with_complex(Kernel::Binary(pow_complex))
        .with_real(Kernel::Binary(pow_real), range::real_power)
        .with_range(range::pow)
        .with_complex_gradient(&["y*x^(y-1)", "ln(x)*x^y"])
        .build()
}
