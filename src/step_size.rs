//! Step-size bounds, tolerances and the initial step heuristic.

use ndarray as nd;

use crate::error::{ConfigError, IntegrationError};
use crate::evaluator::Evaluator;
use crate::ode::System;
use crate::{Float, lit, to_f64};

/// Absolute and relative error tolerances, either shared or per primary component.
#[derive(Clone, Debug, PartialEq)]
pub enum Tolerance<F: Float> {
    Scalar {
        absolute: F,
        relative: F,
    },
    Vector {
        absolute: nd::Array1<F>,
        relative: nd::Array1<F>,
    },
}

impl<F: Float> Tolerance<F> {
    /// Error scale `absolute + relative * magnitude` for component `i`.
    pub fn scale(&self, i: usize, magnitude: F) -> F {
        match self {
            Self::Scalar { absolute, relative } => *absolute + *relative * magnitude,
            Self::Vector { absolute, relative } => absolute[i] + relative[i] * magnitude,
        }
    }

    fn check_dimension(&self, dimension: usize) -> Result<(), ConfigError> {
        if let Self::Vector { absolute, relative } = self {
            for found in [absolute.len(), relative.len()] {
                if found != dimension {
                    return Err(ConfigError::DimensionMismatch {
                        expected: dimension,
                        found,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Step-size bounds, tolerances and an optional user-provided initial step.
#[derive(Clone, Debug)]
pub struct StepSizeControl<F: Float> {
    min_step: F,
    max_step: F,
    tolerance: Tolerance<F>,
    initial_step: Option<F>,
}

impl<F: Float> StepSizeControl<F> {
    /// Step sizes are bounded by `|min_step|` and `|max_step|`.
    pub fn new(min_step: F, max_step: F, absolute_tolerance: F, relative_tolerance: F) -> Self {
        Self {
            min_step: min_step.abs(),
            max_step: max_step.abs(),
            tolerance: Tolerance::Scalar {
                absolute: absolute_tolerance,
                relative: relative_tolerance,
            },
            initial_step: None,
        }
    }

    /// Like [`StepSizeControl::new`] with one tolerance pair per primary component.
    pub fn with_vector_tolerances(
        min_step: F,
        max_step: F,
        absolute_tolerance: nd::Array1<F>,
        relative_tolerance: nd::Array1<F>,
    ) -> Self {
        Self {
            min_step: min_step.abs(),
            max_step: max_step.abs(),
            tolerance: Tolerance::Vector {
                absolute: absolute_tolerance,
                relative: relative_tolerance,
            },
            initial_step: None,
        }
    }

    /// Set the initial step size; see [`StepSizeControl::set_initial_step_size`].
    pub fn with_initial_step_size(mut self, initial_step: F) -> Self {
        self.set_initial_step_size(initial_step);
        self
    }

    /// Replace bounds and tolerances. Any initial step size is cleared.
    pub fn set_step_size_control(
        &mut self,
        min_step: F,
        max_step: F,
        absolute_tolerance: F,
        relative_tolerance: F,
    ) {
        *self = Self::new(min_step, max_step, absolute_tolerance, relative_tolerance);
    }

    /// Replace bounds and per-component tolerances. Any initial step size is cleared.
    pub fn set_step_size_control_vector(
        &mut self,
        min_step: F,
        max_step: F,
        absolute_tolerance: nd::Array1<F>,
        relative_tolerance: nd::Array1<F>,
    ) {
        *self = Self::with_vector_tolerances(
            min_step,
            max_step,
            absolute_tolerance,
            relative_tolerance,
        );
    }

    /// Use `initial_step` as the first step instead of the heuristic. A value outside
    /// `[min_step, max_step]` selects the heuristic.
    pub fn set_initial_step_size(&mut self, initial_step: F) {
        self.initial_step = if initial_step < self.min_step || initial_step > self.max_step {
            None
        } else {
            Some(initial_step)
        };
    }

    pub fn initial_step_size(&self) -> Option<F> {
        self.initial_step
    }

    pub fn min_step(&self) -> F {
        self.min_step
    }

    pub fn max_step(&self) -> F {
        self.max_step
    }

    pub fn tolerance(&self) -> &Tolerance<F> {
        &self.tolerance
    }

    /// Check that vector tolerances match the primary dimension.
    pub fn sanity_checks(&self, primary_dimension: usize) -> Result<(), ConfigError> {
        self.tolerance.check_dimension(primary_dimension)
    }

    /// Error scale of each primary component for state `y`.
    pub fn scale(&self, y: nd::ArrayView1<F>, primary_dimension: usize) -> nd::Array1<F> {
        (0..primary_dimension)
            .map(|i| self.tolerance.scale(i, y[i].abs()))
            .collect()
    }

    /// Estimate the size of the first step.
    ///
    /// Unless an initial step was set, this takes one trial Euler step of `y_0` into `y_1` and
    /// evaluates `y_dot_1` there to estimate the second derivative. The step is then sized so
    /// that the local error of a method of the given `order` stays near the tolerances.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize_step<S: System<Float = F>>(
        &self,
        evaluator: &mut Evaluator<'_, '_, S>,
        forward: bool,
        order: usize,
        scale: nd::ArrayView1<F>,
        t_0: F,
        y_0: nd::ArrayView1<F>,
        y_dot_0: nd::ArrayView1<F>,
        mut y_1: nd::ArrayViewMut1<F>,
        mut y_dot_1: nd::ArrayViewMut1<F>,
    ) -> Result<F, IntegrationError> {
        let signed = |h: F| if forward { h } else { -h };
        if let Some(initial_step) = self.initial_step {
            return Ok(signed(initial_step));
        }

        let weighted_norm = |v: nd::ArrayView1<F>| {
            scale
                .iter()
                .zip(v.iter())
                .map(|(&s, &vi)| (vi / s).powi(2))
                .sum::<F>()
                .sqrt()
        };
        let y_on_scale = weighted_norm(y_0);
        let y_dot_on_scale = weighted_norm(y_dot_0);

        let threshold: F = lit(1e-10);
        let mut h = if y_on_scale < threshold || y_dot_on_scale < threshold {
            lit(1e-6)
        } else {
            lit::<F>(0.01) * y_on_scale / y_dot_on_scale
        };
        h = signed(h);

        // Trial Euler step over the complete state.
        nd::Zip::from(&mut y_1)
            .and(&y_0)
            .and(&y_dot_0)
            .for_each(|y1, &y0, &yd0| *y1 = y0 + h * yd0);
        evaluator.compute_derivatives(t_0 + h, y_1.view(), y_dot_1.view_mut())?;

        let y_ddot_on_scale = scale
            .iter()
            .enumerate()
            .map(|(i, &s)| ((y_dot_1[i] - y_dot_0[i]) / s).powi(2))
            .sum::<F>()
            .sqrt()
            / h.abs();

        let max_inv2 = y_dot_on_scale.max(y_ddot_on_scale);
        let h_1 = if max_inv2 < lit(1e-15) {
            lit::<F>(1e-6).max(lit::<F>(0.001) * h.abs())
        } else {
            (lit::<F>(0.01) / max_inv2).powf(F::one() / lit(order as f64))
        };

        let h = (lit::<F>(100.) * h.abs())
            .min(h_1)
            .max(lit::<F>(1e-12) * t_0.abs())
            .max(self.min_step)
            .min(self.max_step);
        Ok(signed(h))
    }

    /// Clamp a proposed step to the allowed bounds.
    ///
    /// A step below the minimum is raised to the minimum when `accept_small` is set, which is used
    /// for the final step of an integration; otherwise it is an error.
    pub fn filter_step(
        &self,
        h: F,
        forward: bool,
        accept_small: bool,
    ) -> Result<F, IntegrationError> {
        let mut filtered = h;
        if filtered.abs() < self.min_step {
            if accept_small {
                filtered = if forward { self.min_step } else { -self.min_step };
            } else {
                return Err(IntegrationError::StepSizeTooSmall {
                    step: to_f64(filtered.abs()),
                    min: to_f64(self.min_step),
                });
            }
        }
        if filtered > self.max_step {
            filtered = self.max_step;
        } else if filtered < -self.max_step {
            filtered = -self.max_step;
        }
        Ok(filtered)
    }
}
