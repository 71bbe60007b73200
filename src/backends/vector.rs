/// A trait for vector-like containers of real values used as evaluator inputs.
///
/// Compiled evaluators read their inputs from plain `f64` slices. Implement this
/// trait to pass other vector types directly.
///
/// # Examples
///
/// ```rust
/// use mathexpr_vm::prelude::Vector;
///
/// let vec = vec![1.0, 2.0, 3.0];
/// assert_eq!(Vector::as_slice(&vec)[0], 1.0);
/// assert_eq!(Vector::len(&vec), 3);
/// ```
pub trait Vector {
    /// Returns a reference to the vector's data as a slice.
    fn as_slice(&self) -> &[f64];

    /// Returns the length of the vector.
    fn len(&self) -> usize;

    /// Checks if the vector is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Vector for Vec<f64> {
    fn as_slice(&self) -> &[f64] {
        self
    }

    fn len(&self) -> usize {
        self.len()
    }
}

/// `Array1` in standard layout. A non-contiguous view presents as empty and is
/// rejected by the length checks of the evaluating call.
#[cfg(feature = "ndarray")]
impl Vector for ndarray::Array1<f64> {
    fn as_slice(&self) -> &[f64] {
        self.as_slice().unwrap_or(&[])
    }

    fn len(&self) -> usize {
        self.len()
    }
}

#[cfg(feature = "nalgebra")]
impl Vector for nalgebra::DVector<f64> {
    fn as_slice(&self) -> &[f64] {
        self.as_slice()
    }

    fn len(&self) -> usize {
        self.len()
    }
}

/// Fixed-size arrays, for inputs known at compile time.
impl<const N: usize> Vector for [f64; N] {
    fn as_slice(&self) -> &[f64] {
        self
    }

    fn len(&self) -> usize {
        N
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_backend() {
        let v = vec![0.0, 2.0, 0.0];
        assert_eq!(Vector::as_slice(&v), &[0.0, 2.0, 0.0]);
        assert!(!Vector::is_empty(&v));
        assert!(Vector::is_empty(&Vec::<f64>::new()));
    }

    #[test]
    fn test_array_backend() {
        let a = [1.0, 2.0];
        assert_eq!(Vector::len(&a), 2);
        assert_eq!(Vector::as_slice(&a), &[1.0, 2.0]);
    }
}
