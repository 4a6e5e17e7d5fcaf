use ndarray as nd;

use super::StepHandler;
use crate::Float;
use crate::error::HandlerError;
use crate::interpolator::StepInterpolator;

/// Keeps a copy of every step so the solution can be evaluated anywhere in the integration range
/// once it is over.
pub struct ContinuousOutputModel<F: Float> {
    steps: Vec<Box<dyn StepInterpolator<F>>>,
    initial_time: F,
    final_time: F,
    forward: bool,
}

impl<F: Float> Default for ContinuousOutputModel<F> {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            initial_time: F::nan(),
            final_time: F::nan(),
            forward: true,
        }
    }
}

impl<F: Float> ContinuousOutputModel<F> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initial_time(&self) -> F {
        self.initial_time
    }

    pub fn final_time(&self) -> F {
        self.final_time
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// State at `t`, or `None` if no step was recorded. Times outside the covered range are
    /// extrapolated from the nearest step.
    pub fn state_at(&mut self, t: F) -> Option<nd::Array1<F>> {
        let step = self.locate(t)?;
        step.set_interpolated_time(t);
        Some(step.interpolated_state())
    }

    /// Derivatives at `t`, or `None` if no step was recorded.
    pub fn derivatives_at(&mut self, t: F) -> Option<nd::Array1<F>> {
        let step = self.locate(t)?;
        step.set_interpolated_time(t);
        Some(step.interpolated_derivatives())
    }

    fn locate(&mut self, t: F) -> Option<&mut Box<dyn StepInterpolator<F>>> {
        let forward = self.forward;
        let index = self.steps.partition_point(|step| {
            if forward {
                step.current_time() < t
            } else {
                step.current_time() > t
            }
        });
        let last = self.steps.len().checked_sub(1)?;
        self.steps.get_mut(index.min(last))
    }
}

impl<F: Float> StepHandler<F> for ContinuousOutputModel<F> {
    fn init(&mut self, _t0: F, _y0: nd::ArrayView1<F>, _t: F) {
        self.steps.clear();
        self.initial_time = F::nan();
        self.final_time = F::nan();
        self.forward = true;
    }

    fn handle_step(
        &mut self,
        interpolator: &mut dyn StepInterpolator<F>,
        _is_last: bool,
    ) -> Result<(), HandlerError> {
        if self.steps.is_empty() {
            self.initial_time = interpolator.previous_time();
            self.forward = interpolator.is_forward();
        }
        self.final_time = interpolator.current_time();
        self.steps.push(interpolator.copy());
        Ok(())
    }
}
