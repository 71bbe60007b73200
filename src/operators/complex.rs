//! Complex-plane projections: `abs`, `re`, `im`, `conj` and `arg`.
//!
//! These are the functions whose algebraic flags and pair declarations feed most
//! of the combination table, e.g. `re(im(z)) = im(z)` and `im(re(z)) = 0`.

use std::f64::consts::PI;
use std::sync::Arc;

use num_complex::Complex64;

use crate::combination::Combination;
use crate::function::{Algebra, FunctionDef};
use crate::range;
use crate::types::Kernel;

pub fn abs_complex(z: Complex64) -> f64 {
    z.norm()
}

pub fn abs_real(x: f64) -> f64 {
    x.abs()
}

pub fn re_complex(z: Complex64) -> f64 {
    z.re
}

pub fn im_complex(z: Complex64) -> f64 {
    z.im
}

pub fn re_real(x: f64) -> f64 {
    x
}

pub fn im_real(_: f64) -> f64 {
    0.0
}

pub fn conj_complex(z: Complex64) -> Complex64 {
    z.conj()
}

pub fn conj_real(x: f64) -> f64 {
    x
}

pub fn arg_complex(z: Complex64) -> f64 {
    z.arg()
}

pub fn arg_real(x: f64) -> f64 {
    if x.is_nan() {
        f64::NAN
    } else if x < 0.0 {
        PI
    } else {
        0.0
    }
}

pub fn abs() -> Arc<FunctionDef> {
    FunctionDef::new("abs", 1)
        .with_complex_to_real(Kernel::Unary(abs_complex))
        .with_real(Kernel::Unary(abs_real), range::all_real)
        .with_range(range::abs)
        .with_real_gradient(&[("re(x)/abs(x)", "im(x)/abs(x)")])
        .with_algebra(Algebra {
            idempotent: true,
            multiplicative: true,
            ..Default::default()
        })
        .build()
}

pub fn re() -> Arc<FunctionDef> {
    FunctionDef::new("re", 1)
        .with_complex_to_real(Kernel::Unary(re_complex))
        .with_real(Kernel::Unary(re_real), range::all_real)
        .with_range(range::always_real)
        .with_real_gradient(&[("1", "0")])
        .with_algebra(Algebra {
            idempotent: true,
            additive: true,
            linear: true,
            ..Default::default()
        })
        .with_pair("im", Combination::AbsorbedByInner)
        .with_pair("abs", Combination::AbsorbedByInner)
        .with_pair("arg", Combination::AbsorbedByInner)
        .build()
}

pub fn im() -> Arc<FunctionDef> {
    FunctionDef::new("im", 1)
        .with_complex_to_real(Kernel::Unary(im_complex))
        .with_real(Kernel::Unary(im_real), range::all_real)
        .with_range(range::always_real)
        .with_real_gradient(&[("0", "1")])
        .with_algebra(Algebra {
            annihilating: true,
            additive: true,
            linear: true,
            ..Default::default()
        })
        .with_pair("re", Combination::Zero)
        .with_pair("abs", Combination::Zero)
        .with_pair("arg", Combination::Zero)
        .build()
}

pub fn conj() -> Arc<FunctionDef> {
    FunctionDef::new("conj", 1)
        .with_complex(Kernel::Unary(conj_complex))
        .with_real(Kernel::Unary(conj_real), range::all_real)
        .with_range(range::conj)
        .with_real_gradient(&[("1", "-i")])
        .with_algebra(Algebra {
            involution: true,
            additive: true,
            multiplicative: true,
            ..Default::default()
        })
        .with_pair("re", Combination::AbsorbedByInner)
        .with_pair("im", Combination::AbsorbedByInner)
        .with_pair("abs", Combination::AbsorbedByInner)
        .build()
}

pub fn arg() -> Arc<FunctionDef> {
    FunctionDef::new("arg", 1)
        .with_complex_to_real(Kernel::Unary(arg_complex))
        .with_real(Kernel::Unary(arg_real), range::all_real)
        .with_range(range::always_real)
        .with_real_gradient(&[("-im(x)/abs(x)^2", "re(x)/abs(x)^2")])
        .with_pair("abs", Combination::Zero)
        .build()
}
