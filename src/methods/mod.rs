//! Embedded step algorithms driven by [`Integrator`](crate::Integrator).

mod bulirsch_stoer;
mod dormand_prince;

use ndarray as nd;

pub use bulirsch_stoer::BulirschStoer;
pub use dormand_prince::DormandPrince54;

use crate::Float;
use crate::error::IntegrationError;
use crate::evaluator::Evaluator;
use crate::interpolator::InterpolationKernel;
use crate::ode::System;
use crate::step_size::StepSizeControl;

/// Outcome of one trial step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepEstimate<F> {
    /// Whether the step met the tolerances.
    pub accepted: bool,
    /// Scaled error estimate, at most one for an accepted step.
    pub error: F,
    /// Factor to apply to the step size for the next attempt.
    pub factor: F,
}

/// A single-step method with an embedded error estimate.
pub trait StepAlgorithm {
    type Float: Float;
    /// Dense output kernel filled by [`StepAlgorithm::propose_step`].
    type Kernel: InterpolationKernel<Self::Float> + 'static;

    fn order(&self) -> usize;

    /// Whether the derivative at the end of an accepted step is returned in `y_dot_new`, so
    /// the next step can skip its first evaluation.
    fn is_fsal(&self) -> bool;

    fn new_kernel(&self, dimension: usize) -> Self::Kernel;

    /// Attempt a step of size `h` from `(t, y)`, where `y_dot` is the derivative at `t`.
    ///
    /// The candidate state is written to `y_new`. For accepted steps of FSAL methods the
    /// derivative at the candidate is written to `y_dot_new`. The kernel is loaded with whatever
    /// the method needs for dense output over the step.
    #[allow(clippy::too_many_arguments)]
    fn propose_step<S: System<Float = Self::Float>>(
        &mut self,
        evaluator: &mut Evaluator<'_, '_, S>,
        control: &StepSizeControl<Self::Float>,
        t: Self::Float,
        h: Self::Float,
        y: nd::ArrayView1<Self::Float>,
        y_dot: nd::ArrayView1<Self::Float>,
        y_new: nd::ArrayViewMut1<Self::Float>,
        y_dot_new: nd::ArrayViewMut1<Self::Float>,
        kernel: &mut Self::Kernel,
    ) -> Result<StepEstimate<Self::Float>, IntegrationError>;
}
