//! Calling-contract types shared by the function catalog, the IR and the evaluator.
//!
//! A math function exposes up to four kernel variants, one per call shape:
//! - complex → complex
//! - real → real
//! - real → complex
//! - complex → real
//!
//! Which variant a compiled instruction uses is decided once, at compile time, by
//! realness inference over the optimizing IR. Kernels are plain function pointers
//! so compiled evaluators stay `Send + Sync` and dispatch without indirection
//! through trait objects.

use num_complex::Complex64;

/// A kernel of arity 0 to 4 with input type `I` and output type `O`.
#[derive(Debug, Clone, Copy)]
pub enum Kernel<I, O> {
    Nullary(fn() -> O),
    Unary(fn(I) -> O),
    Binary(fn(I, I) -> O),
    Ternary(fn(I, I, I) -> O),
    Quaternary(fn(I, I, I, I) -> O),
}

impl<I: Copy, O> Kernel<I, O> {
    /// Number of arguments the kernel consumes.
    pub fn arity(&self) -> usize {
        match self {
            Kernel::Nullary(_) => 0,
            Kernel::Unary(_) => 1,
            Kernel::Binary(_) => 2,
            Kernel::Ternary(_) => 3,
            Kernel::Quaternary(_) => 4,
        }
    }

    /// Invokes the kernel, fetching argument `k` through `arg(k)`.
    ///
    /// `arg` is only called for indices below the kernel's arity.
    #[inline(always)]
    pub fn apply(&self, arg: impl Fn(usize) -> I) -> O {
        match self {
            Kernel::Nullary(f) => f(),
            Kernel::Unary(f) => f(arg(0)),
            Kernel::Binary(f) => f(arg(0), arg(1)),
            Kernel::Ternary(f) => f(arg(0), arg(1), arg(2)),
            Kernel::Quaternary(f) => f(arg(0), arg(1), arg(2), arg(3)),
        }
    }

    /// Invokes the kernel on a slice of arguments.
    pub fn call(&self, args: &[I]) -> O {
        self.apply(|k| args[k])
    }
}

pub type ComplexKernel = Kernel<Complex64, Complex64>;
pub type RealKernel = Kernel<f64, f64>;
pub type RealToComplexKernel = Kernel<f64, Complex64>;
pub type ComplexToRealKernel = Kernel<Complex64, f64>;

/// The call shape selected for one compiled call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    Complex,
    Real,
    RealToComplex,
    ComplexToReal,
}

impl std::fmt::Display for CallShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            CallShape::Complex => "c→c",
            CallShape::Real => "r→r",
            CallShape::RealToComplex => "r→c",
            CallShape::ComplexToReal => "c→r",
        };
        write!(f, "{tag}")
    }
}

/// The set of kernels a function provides. At least one must be present.
#[derive(Debug, Clone, Copy, Default)]
pub struct Kernels {
    pub complex: Option<ComplexKernel>,
    pub real: Option<RealKernel>,
    pub real_to_complex: Option<RealToComplexKernel>,
    pub complex_to_real: Option<ComplexToRealKernel>,
}

impl Kernels {
    /// Returns true if no kernel variant is present.
    pub fn is_empty(&self) -> bool {
        self.complex.is_none()
            && self.real.is_none()
            && self.real_to_complex.is_none()
            && self.complex_to_real.is_none()
    }

    /// Resolves the kernel for `shape` into a dispatchable form.
    pub fn dispatch(&self, shape: CallShape) -> Option<Dispatch> {
        match shape {
            CallShape::Complex => self.complex.map(Dispatch::Complex),
            CallShape::Real => self.real.map(Dispatch::Real),
            CallShape::RealToComplex => self.real_to_complex.map(Dispatch::RealToComplex),
            CallShape::ComplexToReal => self.complex_to_real.map(Dispatch::ComplexToReal),
        }
    }
}

/// A kernel bound to its call shape. Every value on the evaluation stack is a
/// `Complex64`; real-shaped kernels read the real part and write `re + 0i`.
#[derive(Debug, Clone, Copy)]
pub enum Dispatch {
    Complex(ComplexKernel),
    Real(RealKernel),
    RealToComplex(RealToComplexKernel),
    ComplexToReal(ComplexToRealKernel),
}

impl Dispatch {
    pub fn shape(&self) -> CallShape {
        match self {
            Dispatch::Complex(_) => CallShape::Complex,
            Dispatch::Real(_) => CallShape::Real,
            Dispatch::RealToComplex(_) => CallShape::RealToComplex,
            Dispatch::ComplexToReal(_) => CallShape::ComplexToReal,
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Dispatch::Complex(k) => k.arity(),
            Dispatch::Real(k) => k.arity(),
            Dispatch::RealToComplex(k) => k.arity(),
            Dispatch::ComplexToReal(k) => k.arity(),
        }
    }

    /// Runs the kernel, reading argument `k` through `arg(k)`.
    #[inline(always)]
    pub fn apply(&self, arg: impl Fn(usize) -> Complex64) -> Complex64 {
        match self {
            Dispatch::Complex(k) => k.apply(arg),
            Dispatch::Real(k) => Complex64::new(k.apply(|i| arg(i).re), 0.0),
            Dispatch::RealToComplex(k) => k.apply(|i| arg(i).re),
            Dispatch::ComplexToReal(k) => Complex64::new(k.apply(arg), 0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(a: f64, b: f64) -> f64 {
        a + b
    }

    fn norm(z: Complex64) -> f64 {
        z.norm()
    }

    #[test]
    fn test_kernel_arity_and_call() {
        let k: RealKernel = Kernel::Binary(add);
        assert_eq!(k.arity(), 2);
        assert_eq!(k.call(&[1.5, 2.0]), 3.5);
    }

    #[test]
    fn test_real_dispatch_reads_real_part() {
        let d = Dispatch::Real(Kernel::Binary(add));
        let args = [Complex64::new(1.0, 7.0), Complex64::new(2.0, -3.0)];
        assert_eq!(d.apply(|k| args[k]), Complex64::new(3.0, 0.0));
        assert_eq!(d.shape(), CallShape::Real);
    }

    #[test]
    fn test_complex_to_real_dispatch() {
        let d = Dispatch::ComplexToReal(Kernel::Unary(norm));
        let args = [Complex64::new(3.0, 4.0)];
        assert_eq!(d.apply(|k| args[k]), Complex64::new(5.0, 0.0));
    }

    #[test]
    fn test_kernels_dispatch_missing_variant() {
        let kernels = Kernels {
            real: Some(Kernel::Binary(add)),
            ..Default::default()
        };
        assert!(kernels.dispatch(CallShape::Complex).is_none());
        assert!(kernels.dispatch(CallShape::Real).is_some());
        assert!(!kernels.is_empty());
    }
}
