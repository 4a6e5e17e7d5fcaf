//! Floating point spacing helpers.

use crate::{Float, lit};

/// Spacing between `x` and the next representable value of larger magnitude.
///
/// Returns NaN for NaN and infinity for infinite input. The result is never smaller than the
/// smallest positive subnormal value.
pub fn ulp<F: Float>(x: F) -> F {
    if x.is_nan() {
        return x;
    }
    if x.is_infinite() {
        return F::infinity();
    }
    let (_, exponent, _) = x.integer_decode();
    let exponent = i32::from(exponent);
    // Split the power so that neither factor overflows for subnormal spacings.
    let half = exponent / 2;
    let two: F = lit(2.);
    let spacing = two.powi(half) * two.powi(exponent - half);
    spacing.max(F::min_positive_value() * F::epsilon())
}

/// Whether `x` and `y` are at most `max_ulps` spacings apart.
pub fn equals_within_ulps<F: Float>(x: F, y: F, max_ulps: u32) -> bool {
    if x == y {
        return true;
    }
    if !x.is_finite() || !y.is_finite() {
        return false;
    }
    (x - y).abs() <= ulp(x.abs().max(y.abs())) * lit(f64::from(max_ulps))
}
