//! Bracketing root solvers used to locate events.

use crate::error::RootSolverError;
use crate::{Float, lit, to_f64};

/// Which side of the root a bracketing solver may return.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllowedSolution {
    /// Either bracket end, whichever has the smaller residual.
    AnySide,
    /// The bracket end with the smaller abscissa.
    LeftSide,
    /// The bracket end with the larger abscissa.
    RightSide,
    /// The bracket end where the function is non-positive.
    BelowSide,
    /// The bracket end where the function is non-negative.
    AboveSide,
}

/// Solver for a root of `f` inside a bracket `[min, max]` with a sign change.
pub trait BracketedSolver<F: Float> {
    fn absolute_accuracy(&self) -> F;
    fn relative_accuracy(&self) -> F;

    /// Locate a root using at most `max_evaluations` calls of `f`.
    fn solve(
        &self,
        max_evaluations: usize,
        f: &mut dyn FnMut(F) -> F,
        min: F,
        max: F,
        allowed: AllowedSolution,
    ) -> Result<F, RootSolverError>;
}

/// Brent's method: inverse quadratic interpolation and secant steps safeguarded by bisection.
#[derive(Clone, Debug)]
pub struct BrentSolver<F> {
    absolute_accuracy: F,
    relative_accuracy: F,
}

impl<F: Float> BrentSolver<F> {
    pub fn new(absolute_accuracy: F) -> Self {
        Self {
            absolute_accuracy,
            relative_accuracy: lit(1e-14),
        }
    }

    pub fn with_relative_accuracy(self, relative_accuracy: F) -> Self {
        Self {
            relative_accuracy,
            ..self
        }
    }
}

impl<F: Float> BracketedSolver<F> for BrentSolver<F> {
    fn absolute_accuracy(&self) -> F {
        self.absolute_accuracy
    }

    fn relative_accuracy(&self) -> F {
        self.relative_accuracy
    }

    fn solve(
        &self,
        max_evaluations: usize,
        f: &mut dyn FnMut(F) -> F,
        min: F,
        max: F,
        allowed: AllowedSolution,
    ) -> Result<F, RootSolverError> {
        let mut evaluations = 0;
        let mut evaluate = |x: F| {
            evaluations += 1;
            if evaluations > max_evaluations {
                Err(RootSolverError::TooManyEvaluations {
                    max: max_evaluations,
                })
            } else {
                Ok(f(x))
            }
        };

        let zero = F::zero();
        let (mut a, mut b) = (min, max);
        let mut fa = evaluate(a)?;
        if fa == zero {
            return Ok(a);
        }
        let mut fb = evaluate(b)?;
        if fb == zero {
            return Ok(b);
        }
        if (fa < zero) == (fb < zero) {
            return Err(RootSolverError::NotBracketed {
                min: to_f64(min),
                max: to_f64(max),
                f_min: to_f64(fa),
                f_max: to_f64(fb),
            });
        }

        let two: F = lit(2.);
        let three: F = lit(3.);
        let four: F = lit(4.);

        if fa.abs() < fb.abs() {
            core::mem::swap(&mut a, &mut b);
            core::mem::swap(&mut fa, &mut fb);
        }
        let mut c = a;
        let mut fc = fa;
        let mut d = b - a;
        let mut bisected = true;

        loop {
            // Keep `b` as the best estimate.
            if fa.abs() < fb.abs() {
                core::mem::swap(&mut a, &mut b);
                core::mem::swap(&mut fa, &mut fb);
            }

            let tolerance = self
                .absolute_accuracy
                .max(self.relative_accuracy * b.abs());
            if (b - a).abs() <= tolerance {
                return Ok(select(a, fa, b, fb, allowed));
            }

            let mut s = if fa != fc && fb != fc {
                // Inverse quadratic interpolation.
                a * fb * fc / ((fa - fb) * (fa - fc))
                    + b * fa * fc / ((fb - fa) * (fb - fc))
                    + c * fa * fb / ((fc - fa) * (fc - fb))
            } else {
                // Secant.
                b - fb * (b - a) / (fb - fa)
            };

            let outside = (s - (three * a + b) / four) * (s - b) >= zero;
            let slow_after_bisection = bisected && (s - b).abs() >= (b - c).abs() / two;
            let slow_after_interpolation = !bisected && (s - b).abs() >= (c - d).abs() / two;
            let stalled_after_bisection = bisected && (b - c).abs() < tolerance;
            let stalled_after_interpolation = !bisected && (c - d).abs() < tolerance;
            if outside
                || !s.is_finite()
                || slow_after_bisection
                || slow_after_interpolation
                || stalled_after_bisection
                || stalled_after_interpolation
            {
                s = (a + b) / two;
                bisected = true;
            } else {
                bisected = false;
            }

            let fs = evaluate(s)?;
            if fs == zero {
                return Ok(s);
            }

            d = c;
            c = b;
            fc = fb;

            if (fa < zero) != (fs < zero) {
                b = s;
                fb = fs;
            } else {
                a = s;
                fa = fs;
            }
        }
    }
}

fn select<F: Float>(a: F, fa: F, b: F, fb: F, allowed: AllowedSolution) -> F {
    let zero = F::zero();
    match allowed {
        AllowedSolution::AnySide => {
            if fa.abs() < fb.abs() {
                a
            } else {
                b
            }
        }
        AllowedSolution::LeftSide => a.min(b),
        AllowedSolution::RightSide => a.max(b),
        AllowedSolution::BelowSide => {
            if fa <= zero {
                a
            } else {
                b
            }
        }
        AllowedSolution::AboveSide => {
            if fa >= zero {
                a
            } else {
                b
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solve(
        f: impl Fn(f64) -> f64,
        min: f64,
        max: f64,
        allowed: AllowedSolution,
    ) -> Result<f64, RootSolverError> {
        let mut f = f;
        BrentSolver::new(1e-12).solve(100, &mut f, min, max, allowed)
    }

    #[test]
    fn finds_square_root() {
        let root = solve(|x| x * x - 2., 0., 2., AllowedSolution::AnySide).unwrap();
        approx::assert_abs_diff_eq!(root, 2f64.sqrt(), epsilon = 1e-11);
    }

    #[test]
    fn respects_allowed_side() {
        let f = |x: f64| x * x - 2.;
        let right = solve(f, 0., 2., AllowedSolution::RightSide).unwrap();
        let left = solve(f, 0., 2., AllowedSolution::LeftSide).unwrap();
        assert!(f(right) >= 0.);
        assert!(f(left) <= 0.);
        assert!(left <= right);
        approx::assert_abs_diff_eq!(right, 2f64.sqrt(), epsilon = 1e-11);

        let above = solve(|x| 1. - x * x, 0., 2., AllowedSolution::AboveSide).unwrap();
        assert!(1. - above * above >= 0.);
        let below = solve(|x| 1. - x * x, 0., 2., AllowedSolution::BelowSide).unwrap();
        assert!(1. - below * below <= 0.);
    }

    #[test]
    fn exact_endpoints_and_exact_roots() {
        assert_eq!(solve(|x| x, 0., 1., AllowedSolution::AnySide), Ok(0.));
        assert_eq!(solve(|x| x - 0.5, 0., 1., AllowedSolution::AnySide), Ok(0.5));
    }

    #[test]
    fn reports_failures() {
        assert!(matches!(
            solve(|x| x * x + 1., -1., 1., AllowedSolution::AnySide),
            Err(RootSolverError::NotBracketed { .. })
        ));

        let mut f = |x: f64| x.powi(3) - 0.3;
        assert_eq!(
            BrentSolver::new(1e-15).solve(3, &mut f, 0., 1., AllowedSolution::AnySide),
            Err(RootSolverError::TooManyEvaluations { max: 3 })
        );
    }
}
