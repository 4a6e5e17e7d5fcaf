use ndarray as nd;

use super::{FixedStepHandler, StepHandler};
use crate::Float;
use crate::error::HandlerError;
use crate::interpolator::StepInterpolator;
use crate::precision::equals_within_ulps;

/// How normalized times are chosen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepNormalizerMode {
    /// Times are the start time plus multiples of the step.
    Increment,
    /// Times are multiples of the step.
    Multiples,
}

/// Whether the integration bounds are reported when they do not fall on a normalized time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepNormalizerBounds {
    Neither,
    First,
    Last,
    Both,
}

impl StepNormalizerBounds {
    fn first_included(self) -> bool {
        matches!(self, Self::First | Self::Both)
    }

    fn last_included(self) -> bool {
        matches!(self, Self::Last | Self::Both)
    }
}

/// Adapts a [`FixedStepHandler`] to the variable steps of an integrator.
pub struct StepNormalizer<F: Float, H> {
    h: F,
    handler: H,
    mode: StepNormalizerMode,
    bounds: StepNormalizerBounds,
    first_time: Option<F>,
    last_time: F,
    last_state: Option<nd::Array1<F>>,
    last_derivatives: Option<nd::Array1<F>>,
    forward: bool,
}

impl<F: Float, H: FixedStepHandler<F>> StepNormalizer<F, H> {
    /// Report the solution every `|h|` from the start time, including the first point.
    pub fn new(h: F, handler: H) -> Self {
        Self {
            h: h.abs(),
            handler,
            mode: StepNormalizerMode::Increment,
            bounds: StepNormalizerBounds::First,
            first_time: None,
            last_time: F::nan(),
            last_state: None,
            last_derivatives: None,
            forward: true,
        }
    }

    pub fn with_mode(self, mode: StepNormalizerMode) -> Self {
        Self { mode, ..self }
    }

    pub fn with_bounds(self, bounds: StepNormalizerBounds) -> Self {
        Self { bounds, ..self }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn into_inner(self) -> H {
        self.handler
    }

    fn next_time(&self) -> F {
        match self.mode {
            StepNormalizerMode::Increment => self.last_time + self.h,
            StepNormalizerMode::Multiples => {
                let next = ((self.last_time / self.h).floor() + F::one()) * self.h;
                if equals_within_ulps(next, self.last_time, 1) {
                    next + self.h
                } else {
                    next
                }
            }
        }
    }

    fn is_next_in_step(&self, next_time: F, interpolator: &dyn StepInterpolator<F>) -> bool {
        if self.forward {
            next_time <= interpolator.current_time()
        } else {
            next_time >= interpolator.current_time()
        }
    }

    fn store_point(&mut self, t: F, interpolator: &mut dyn StepInterpolator<F>) {
        self.last_time = t;
        interpolator.set_interpolated_time(t);
        self.last_state = Some(interpolator.interpolated_state());
        self.last_derivatives = Some(interpolator.interpolated_derivatives());
    }

    fn report(&mut self, is_last: bool) -> Result<(), HandlerError> {
        if !self.bounds.first_included() && self.first_time == Some(self.last_time) {
            return Ok(());
        }
        if let (Some(state), Some(derivatives)) = (&self.last_state, &self.last_derivatives) {
            self.handler
                .handle_step(self.last_time, state.view(), derivatives.view(), is_last)?;
        }
        Ok(())
    }
}

impl<F: Float, H: FixedStepHandler<F>> StepHandler<F> for StepNormalizer<F, H> {
    fn init(&mut self, t0: F, y0: nd::ArrayView1<F>, t: F) {
        self.h = self.h.abs();
        self.first_time = None;
        self.last_time = F::nan();
        self.last_state = None;
        self.last_derivatives = None;
        self.forward = true;
        self.handler.init(t0, y0, t);
    }

    fn handle_step(
        &mut self,
        interpolator: &mut dyn StepInterpolator<F>,
        is_last: bool,
    ) -> Result<(), HandlerError> {
        if self.last_state.is_none() {
            let first_time = interpolator.previous_time();
            self.first_time = Some(first_time);
            self.forward = interpolator.current_time() >= first_time;
            if !self.forward {
                self.h = -self.h.abs();
            }
            self.store_point(first_time, interpolator);
        }

        let mut next_time = self.next_time();
        while self.is_next_in_step(next_time, interpolator) {
            self.report(false)?;
            self.store_point(next_time, interpolator);
            next_time = self.next_time();
        }

        if is_last {
            let current_time = interpolator.current_time();
            let add_last = self.bounds.last_included() && self.last_time != current_time;
            self.report(!add_last)?;
            if add_last {
                self.store_point(current_time, interpolator);
                self.report(true)?;
            }
        }
        Ok(())
    }
}
