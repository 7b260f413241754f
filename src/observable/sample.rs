//! Value comparison for change suppression.

use std::fmt::Debug;

use crate::hardware::SyringeParameters;

/// How two samples are compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tolerance {
    /// Values must be equal
    Exact,
    /// `|a - b| <= r * max(|a|, |b|)`; discrete values compare exactly
    Relative(f64),
}

/// A value that can be published by a `SampledObservable`.
pub trait Sample: Clone + Debug + Send + Sync + 'static {
    /// Whether `self` and `other` count as the same value.
    fn is_close(&self, other: &Self, tolerance: Tolerance) -> bool;
}

fn isclose(a: f64, b: f64, rel_tol: f64) -> bool {
    if a == b {
        return true;
    }
    if !a.is_finite() || !b.is_finite() {
        return false;
    }
    (a - b).abs() <= rel_tol * a.abs().max(b.abs())
}

impl Sample for f64 {
    fn is_close(&self, other: &Self, tolerance: Tolerance) -> bool {
        match tolerance {
            Tolerance::Exact => self == other,
            Tolerance::Relative(r) => isclose(*self, *other, r),
        }
    }
}

impl Sample for SyringeParameters {
    fn is_close(&self, other: &Self, tolerance: Tolerance) -> bool {
        self.inner_diameter_mm
            .is_close(&other.inner_diameter_mm, tolerance)
            && self
                .max_piston_stroke_mm
                .is_close(&other.max_piston_stroke_mm, tolerance)
    }
}

macro_rules! exact_sample {
    ($($t:ty),*) => {
        $(
            impl Sample for $t {
                fn is_close(&self, other: &Self, _tolerance: Tolerance) -> bool {
                    self == other
                }
            }
        )*
    };
}

exact_sample!(bool, u32, i64, String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_tolerance_matches_isclose() {
        assert!(1.0005_f64.is_close(&1.0012, Tolerance::Relative(1e-3)));
        assert!(!1.000_f64.is_close(&1.01, Tolerance::Relative(1e-3)));
        assert!(0.0_f64.is_close(&0.0, Tolerance::Relative(0.0)));
        assert!(!0.0_f64.is_close(&1e-12, Tolerance::Relative(1e-9)));
    }

    #[test]
    fn test_nan_is_never_close() {
        assert!(!f64::NAN.is_close(&f64::NAN, Tolerance::Relative(1.0)));
    }
}
