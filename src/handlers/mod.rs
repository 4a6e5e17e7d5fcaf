//! Observers of accepted steps.

mod continuous_output;
mod logger;
mod normalizer;

use ndarray as nd;

pub use continuous_output::ContinuousOutputModel;
pub use logger::StepLogger;
pub use normalizer::{StepNormalizer, StepNormalizerBounds, StepNormalizerMode};

use crate::Float;
use crate::error::HandlerError;
use crate::interpolator::StepInterpolator;

/// Receives every accepted step, or every part of a step delimited by events.
pub trait StepHandler<F: Float> {
    fn init(&mut self, _t0: F, _y0: nd::ArrayView1<F>, _t: F) {}

    /// Handle the step covered by `interpolator`. `is_last` is set for the final step.
    fn handle_step(
        &mut self,
        interpolator: &mut dyn StepInterpolator<F>,
        is_last: bool,
    ) -> Result<(), HandlerError>;
}

impl<F: Float, H: StepHandler<F> + ?Sized> StepHandler<F> for &mut H {
    fn init(&mut self, t0: F, y0: nd::ArrayView1<F>, t: F) {
        (**self).init(t0, y0, t)
    }

    fn handle_step(
        &mut self,
        interpolator: &mut dyn StepInterpolator<F>,
        is_last: bool,
    ) -> Result<(), HandlerError> {
        (**self).handle_step(interpolator, is_last)
    }
}

/// Receives the solution at regularly spaced times, see [`StepNormalizer`].
pub trait FixedStepHandler<F: Float> {
    fn init(&mut self, _t0: F, _y0: nd::ArrayView1<F>, _t: F) {}

    fn handle_step(
        &mut self,
        t: F,
        y: nd::ArrayView1<F>,
        y_dot: nd::ArrayView1<F>,
        is_last: bool,
    ) -> Result<(), HandlerError>;
}

impl<F: Float, H: FixedStepHandler<F> + ?Sized> FixedStepHandler<F> for &mut H {
    fn init(&mut self, t0: F, y0: nd::ArrayView1<F>, t: F) {
        (**self).init(t0, y0, t)
    }

    fn handle_step(
        &mut self,
        t: F,
        y: nd::ArrayView1<F>,
        y_dot: nd::ArrayView1<F>,
        is_last: bool,
    ) -> Result<(), HandlerError> {
        (**self).handle_step(t, y, y_dot, is_last)
    }
}
