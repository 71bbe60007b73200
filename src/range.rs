//! Coarse value ranges used for realness inference and rule domains.
//!
//! A [`Range`] is a set of properties known to hold for every value a subtree can
//! take. More bits means a narrower set of values: `Range::COMPLEX` has no bits
//! and describes any complex number, `Range::POSITIVE` describes positive reals.
//! A domain `d` accepts a subtree with inferred range `r` when every property
//! demanded by `d` is present in `r` (`d.contains(r)`).

use num_complex::Complex64;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Range(u8);

const REAL: u8 = 1;
const IMAG: u8 = 1 << 1;
const INT: u8 = 1 << 2;
const NONNEG: u8 = 1 << 3;
const POS: u8 = 1 << 4;
const DISC: u8 = 1 << 5;
const UNIT: u8 = 1 << 6;

impl Range {
    pub const COMPLEX: Range = Range(0);
    pub const REAL: Range = Range(REAL);
    pub const IMAGINARY: Range = Range(IMAG);
    pub const INTEGER: Range = Range(REAL | INT);
    pub const NATURAL: Range = Range(REAL | INT | NONNEG);
    pub const NONNEGATIVE: Range = Range(REAL | NONNEG);
    pub const POSITIVE: Range = Range(REAL | NONNEG | POS);
    pub const DISC: Range = Range(DISC);
    pub const UNIT: Range = Range(DISC | UNIT);

    /// True if every property required by `self` holds for `other`.
    pub fn contains(self, other: Range) -> bool {
        self.0 & other.0 == self.0
    }

    /// The properties shared by both ranges (least upper bound of the value sets).
    pub fn join(self, other: Range) -> Range {
        Range(self.0 & other.0)
    }

    /// Adds the properties of `other`.
    pub fn with(self, other: Range) -> Range {
        Range(self.0 | other.0)
    }

    /// Removes the properties of `other`.
    pub fn without(self, other: Range) -> Range {
        Range(self.0 & !other.0)
    }

    pub fn is_real(self) -> bool {
        Range::REAL.contains(self)
    }

    fn has(self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    /// The narrowest range describing a single value.
    pub fn of_value(z: Complex64) -> Range {
        if !z.re.is_finite() || !z.im.is_finite() {
            return Range::COMPLEX;
        }
        let mut bits = 0;
        if z.im == 0.0 {
            bits |= REAL;
            if z.re.fract() == 0.0 {
                bits |= INT;
            }
            if z.re >= 0.0 {
                bits |= NONNEG;
            }
            if z.re > 0.0 {
                bits |= POS;
            }
        }
        if z.re == 0.0 {
            bits |= IMAG;
        }
        let norm = z.norm();
        if norm <= 1.0 {
            bits |= DISC;
        }
        if norm == 1.0 {
            bits |= UNIT;
        }
        Range(bits)
    }

    /// Parses a rule-file domain word.
    pub fn from_domain_name(name: &str) -> Option<Range> {
        match name {
            "real" => Some(Range::REAL),
            "complex" => Some(Range::COMPLEX),
            "imaginary" => Some(Range::IMAGINARY),
            "disc" => Some(Range::DISC),
            "unit" => Some(Range::UNIT),
            "integer" | "int" => Some(Range::INTEGER),
            "natural" => Some(Range::NATURAL),
            "nonnegative" => Some(Range::NONNEGATIVE),
            "positive" => Some(Range::POSITIVE),
            _ => None,
        }
    }
}

impl std::fmt::Debug for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Range({self})")
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let named = [
            (Range::POSITIVE, "positive"),
            (Range::NATURAL, "natural"),
            (Range::NONNEGATIVE, "nonnegative"),
            (Range::INTEGER, "integer"),
            (Range::REAL, "real"),
            (Range::IMAGINARY, "imaginary"),
        ];
        let base = named
            .iter()
            .find(|(range, _)| range.contains(*self))
            .map(|(_, name)| *name)
            .unwrap_or("complex");
        if self.has(UNIT) {
            write!(f, "{base} unit")
        } else if self.has(DISC) {
            write!(f, "{base} disc")
        } else {
            write!(f, "{base}")
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
//  Range inference for the built-in functions
// ────────────────────────────────────────────────────────────────────────────

/// Any complex value.
pub fn anything(_: &[Range]) -> Range {
    Range::COMPLEX
}

/// Real when all arguments are real.
pub fn real_if_real(args: &[Range]) -> Range {
    if args.iter().all(|r| r.is_real()) {
        Range::REAL
    } else {
        Range::COMPLEX
    }
}

/// Always real (projections such as `re`, `im`, `arg`).
pub fn always_real(_: &[Range]) -> Range {
    Range::REAL
}

pub fn identity(args: &[Range]) -> Range {
    args.first().copied().unwrap_or(Range::COMPLEX)
}

pub fn add(args: &[Range]) -> Range {
    let (a, b) = (args[0], args[1]);
    let mut bits = 0;
    if a.has(REAL) && b.has(REAL) {
        bits |= REAL;
    }
    if a.has(REAL | INT) && b.has(REAL | INT) {
        bits |= INT;
    }
    if a.has(IMAG) && b.has(IMAG) {
        bits |= IMAG;
    }
    if a.has(REAL | NONNEG) && b.has(REAL | NONNEG) {
        bits |= NONNEG;
        if a.has(POS) || b.has(POS) {
            bits |= POS;
        }
    }
    Range(bits)
}

pub fn sub(args: &[Range]) -> Range {
    add(&[args[0], neg(&args[1..])])
}

pub fn mul(args: &[Range]) -> Range {
    let (a, b) = (args[0], args[1]);
    let mut bits = 0;
    if a.has(REAL) && b.has(REAL) {
        bits |= REAL;
        if a.has(INT) && b.has(INT) {
            bits |= INT;
        }
        if a.has(NONNEG) && b.has(NONNEG) {
            bits |= NONNEG;
        }
        if a.has(POS) && b.has(POS) {
            bits |= POS;
        }
    }
    if (a.has(REAL) && b.has(IMAG)) || (a.has(IMAG) && b.has(REAL)) {
        bits |= IMAG;
    }
    if a.has(IMAG) && b.has(IMAG) {
        bits |= REAL;
    }
    if a.has(DISC) && b.has(DISC) {
        bits |= DISC;
    }
    if a.has(UNIT) && b.has(UNIT) {
        bits |= UNIT;
    }
    Range(bits)
}

pub fn div(args: &[Range]) -> Range {
    mul(&[args[0], inv(&args[1..])]).without(Range(INT))
}

pub fn neg(args: &[Range]) -> Range {
    args[0].without(Range(NONNEG | POS))
}

pub fn inv(args: &[Range]) -> Range {
    let a = args[0];
    let mut bits = a.0 & (REAL | IMAG | UNIT);
    if a.has(POS) {
        bits |= NONNEG | POS;
    }
    if a.has(UNIT) {
        bits |= DISC;
    }
    Range(bits)
}

pub fn pow(args: &[Range]) -> Range {
    let (base, exp) = (args[0], args[1]);
    if base.has(REAL | POS) && exp.has(REAL) {
        return Range::POSITIVE;
    }
    if base.has(REAL) && exp.has(REAL | INT) {
        let mut bits = REAL;
        if base.has(INT) && exp.has(NONNEG) {
            bits |= INT;
        }
        if base.has(NONNEG) {
            bits |= NONNEG;
        }
        return Range(bits);
    }
    if base.has(REAL | NONNEG) && exp.has(REAL) {
        return Range::NONNEGATIVE;
    }
    if base.has(UNIT) && exp.has(REAL | INT) {
        return Range::UNIT;
    }
    Range::COMPLEX
}

pub fn sqrt(args: &[Range]) -> Range {
    if args[0].has(REAL | NONNEG) {
        Range::NONNEGATIVE
    } else {
        Range::COMPLEX
    }
}

pub fn exp(args: &[Range]) -> Range {
    let a = args[0];
    if a.has(REAL) {
        Range::POSITIVE
    } else if a.has(IMAG) {
        Range::UNIT
    } else {
        Range::COMPLEX
    }
}

pub fn ln(args: &[Range]) -> Range {
    if args[0].has(REAL | POS) {
        Range::REAL
    } else {
        Range::COMPLEX
    }
}

/// `sin` and `cos` map the reals into [-1, 1].
pub fn bounded_trig(args: &[Range]) -> Range {
    if args[0].has(REAL) {
        Range::REAL.with(Range::DISC)
    } else {
        Range::COMPLEX
    }
}

pub fn abs(args: &[Range]) -> Range {
    let a = args[0];
    let mut range = Range::NONNEGATIVE;
    if a.has(REAL | INT) {
        range = range.with(Range::NATURAL);
    }
    if a.has(DISC) {
        range = range.with(Range::DISC);
    }
    if a.has(UNIT) {
        range = range.with(Range::UNIT).with(Range::POSITIVE);
    }
    range
}

pub fn conj(args: &[Range]) -> Range {
    args[0]
}

pub fn unit_interval(_: &[Range]) -> Range {
    Range::NONNEGATIVE.with(Range::DISC)
}

// ────────────────────────────────────────────────────────────────────────────
//  Real-kernel preconditions
// ────────────────────────────────────────────────────────────────────────────

/// All arguments real.
pub fn all_real(args: &[Range]) -> bool {
    args.iter().all(|r| r.is_real())
}

pub fn nonnegative_real(args: &[Range]) -> bool {
    Range::NONNEGATIVE.contains(args[0])
}

/// Real power is safe for a non-negative base, or a real base with integer exponent.
pub fn real_power(args: &[Range]) -> bool {
    let (base, exp) = (args[0], args[1]);
    (Range::NONNEGATIVE.contains(base) && exp.is_real())
        || (base.is_real() && Range::INTEGER.contains(exp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_is_property_subset() {
        assert!(Range::REAL.contains(Range::POSITIVE));
        assert!(Range::COMPLEX.contains(Range::REAL));
        assert!(!Range::POSITIVE.contains(Range::REAL));
        assert!(Range::NONNEGATIVE.contains(Range::NATURAL));
    }

    #[test]
    fn test_of_value() {
        assert_eq!(Range::of_value(Complex64::new(5.0, 0.0)), Range(REAL | INT | NONNEG | POS));
        assert!(Range::REAL.contains(Range::of_value(Complex64::new(-0.5, 0.0))));
        assert!(Range::UNIT.contains(Range::of_value(Complex64::new(0.0, 1.0))));
        assert!(!Range::NONNEGATIVE.contains(Range::of_value(Complex64::new(-1.0, 0.0))));
        assert_eq!(Range::of_value(Complex64::new(f64::NAN, 0.0)), Range::COMPLEX);
    }

    #[test]
    fn test_domain_names() {
        assert_eq!(Range::from_domain_name("int"), Some(Range::INTEGER));
        assert_eq!(Range::from_domain_name("natural"), Some(Range::NATURAL));
        assert_eq!(Range::from_domain_name("blue"), None);
    }

    #[test]
    fn test_arithmetic_inference() {
        assert_eq!(add(&[Range::POSITIVE, Range::NATURAL]), Range::POSITIVE);
        assert_eq!(add(&[Range::NATURAL, Range::NATURAL]), Range::NATURAL);
        assert!(Range::REAL.contains(mul(&[Range::IMAGINARY, Range::IMAGINARY])));
        assert!(!Range::NONNEGATIVE.contains(neg(&[Range::POSITIVE])));
        assert_eq!(pow(&[Range::POSITIVE, Range::REAL]), Range::POSITIVE);
        assert_eq!(pow(&[Range::REAL, Range::REAL]), Range::COMPLEX);
        assert!(Range::REAL.contains(pow(&[Range::REAL, Range::NATURAL])));
    }

    #[test]
    fn test_real_power_precondition() {
        assert!(real_power(&[Range::NONNEGATIVE, Range::REAL]));
        assert!(real_power(&[Range::REAL, Range::INTEGER]));
        assert!(!real_power(&[Range::REAL, Range::REAL]));
    }

    #[test]
    fn test_display() {
        assert_eq!(Range::REAL.to_string(), "real");
        assert_eq!(Range::COMPLEX.to_string(), "complex");
        assert_eq!(Range::UNIT.to_string(), "complex unit");
    }
}
