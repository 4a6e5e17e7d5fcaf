//! Discrete events defined by sign changes of switching functions.
//!
//! Each registered [`EventHandler`] is wrapped in an [`EventState`] that tracks the sign of its
//! switching function across steps, locates roots with a [`BracketedSolver`] and remembers what
//! the handler asked the integrator to do.

mod solver;

use ndarray as nd;

pub use solver::{AllowedSolution, BracketedSolver, BrentSolver};

use crate::error::RootSolverError;
use crate::interpolator::StepInterpolator;
use crate::{Float, lit};

/// What the integrator should do after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Stop the integration at the event.
    Stop,
    /// Let the handler modify the state, then restart from the event.
    ResetState,
    /// Restart from the event with recomputed derivatives.
    ResetDerivatives,
    Continue,
}

/// User-defined event: the zeros of the switching function `g`.
pub trait EventHandler<F: Float> {
    fn init(&mut self, _t0: F, _y0: nd::ArrayView1<F>, _t: F) {}

    /// Switching function. Events occur where it changes sign.
    fn g(&mut self, t: F, y: nd::ArrayView1<F>) -> F;

    /// Called once per event. `increasing` tells whether `g` goes from negative to positive when
    /// time increases.
    fn event_occurred(&mut self, t: F, y: nd::ArrayView1<F>, increasing: bool) -> Action;

    /// Modify the state after an event that returned [`Action::ResetState`].
    fn reset_state(&mut self, _t: F, _y: nd::ArrayViewMut1<F>) {}
}

impl<F: Float, H: EventHandler<F> + ?Sized> EventHandler<F> for &mut H {
    fn init(&mut self, t0: F, y0: nd::ArrayView1<F>, t: F) {
        (**self).init(t0, y0, t)
    }

    fn g(&mut self, t: F, y: nd::ArrayView1<F>) -> F {
        (**self).g(t, y)
    }

    fn event_occurred(&mut self, t: F, y: nd::ArrayView1<F>, increasing: bool) -> Action {
        (**self).event_occurred(t, y, increasing)
    }

    fn reset_state(&mut self, t: F, y: nd::ArrayViewMut1<F>) {
        (**self).reset_state(t, y)
    }
}

fn evaluate_g<F, H, I>(handler: &mut H, interpolator: &mut I, t: F) -> F
where
    F: Float,
    H: EventHandler<F> + ?Sized,
    I: StepInterpolator<F> + ?Sized,
{
    interpolator.set_interpolated_time(t);
    let y = interpolator.interpolated_state();
    handler.g(t, y.view())
}

/// Tracking state of one registered event handler.
pub struct EventState<'h, F: Float> {
    handler: Box<dyn EventHandler<F> + 'h>,
    solver: Box<dyn BracketedSolver<F> + 'h>,
    max_check_interval: F,
    convergence: F,
    max_iteration_count: usize,

    /// Time and value of `g` at the start of the current step.
    t0: F,
    g0: F,
    /// Sign of `g` just after `t0`.
    g0_positive: bool,

    pending_event: bool,
    pending_event_time: F,
    previous_event_time: Option<F>,

    forward: bool,
    /// Whether `g` increases along the integration direction at the pending event.
    increasing: bool,
    next_action: Action,
}

impl<'h, F: Float> EventState<'h, F> {
    /// Wrap `handler`.
    ///
    /// `g` is sampled at least every `max_check_interval` inside a step, roots are located to
    /// within `convergence`, and the solver may evaluate `g` at most `max_iteration_count` times
    /// per root.
    pub fn new(
        handler: Box<dyn EventHandler<F> + 'h>,
        max_check_interval: F,
        convergence: F,
        max_iteration_count: usize,
        solver: Box<dyn BracketedSolver<F> + 'h>,
    ) -> Self {
        Self {
            handler,
            solver,
            max_check_interval: max_check_interval.abs(),
            convergence: convergence.abs(),
            max_iteration_count,
            t0: F::nan(),
            g0: F::nan(),
            g0_positive: true,
            pending_event: false,
            pending_event_time: F::nan(),
            previous_event_time: None,
            forward: true,
            increasing: true,
            next_action: Action::Continue,
        }
    }

    /// Largest time between two samples of `g` inside a step.
    pub fn max_check_interval(&self) -> F {
        self.max_check_interval
    }

    pub fn convergence(&self) -> F {
        self.convergence
    }

    /// Evaluation budget of the root solver per event.
    pub fn max_iteration_count(&self) -> usize {
        self.max_iteration_count
    }

    /// Prepare for a new integration and initialize the handler.
    pub fn init(&mut self, t0: F, y0: nd::ArrayView1<F>, t: F) {
        self.t0 = F::nan();
        self.g0 = F::nan();
        self.g0_positive = true;
        self.pending_event = false;
        self.pending_event_time = F::nan();
        self.previous_event_time = None;
        self.increasing = true;
        self.next_action = Action::Continue;
        self.handler.init(t0, y0, t);
    }

    /// Sample `g` at the start of the first step.
    ///
    /// When `g` is exactly zero there, the sign is taken a little later so that a root sitting on
    /// the initial time is not reported.
    pub fn reinitialize_begin<I: StepInterpolator<F> + ?Sized>(&mut self, interpolator: &mut I) {
        self.forward = interpolator.is_forward();
        let t0 = interpolator.previous_time();
        self.t0 = t0;
        self.g0 = evaluate_g(&mut *self.handler, &mut *interpolator, t0);
        if self.g0 == F::zero() {
            let epsilon = self
                .solver
                .absolute_accuracy()
                .max((self.solver.relative_accuracy() * t0).abs());
            let offset = lit::<F>(0.5) * epsilon;
            let t_start = if self.forward { t0 + offset } else { t0 - offset };
            self.g0 = evaluate_g(&mut *self.handler, &mut *interpolator, t_start);
        }
        self.g0_positive = self.g0 >= F::zero();
    }

    /// Look for a sign change of `g` between `t0` and the end of the interpolator window.
    ///
    /// Returns `true` and records a pending event if one was found.
    pub fn evaluate_step<I: StepInterpolator<F> + ?Sized>(
        &mut self,
        interpolator: &mut I,
    ) -> Result<bool, RootSolverError> {
        self.forward = interpolator.is_forward();
        let t1 = interpolator.current_time();
        let dt = t1 - self.t0;
        if dt.abs() < self.convergence {
            // Too small to hold a distinguishable event.
            return Ok(false);
        }

        let n = (dt.abs() / self.max_check_interval)
            .ceil()
            .to_usize()
            .unwrap_or(1)
            .max(1);
        let h = dt / lit(n as f64);

        let mut ta = self.t0;
        let mut ga = self.g0;
        let mut i = 0;
        while i < n {
            let tb = if i == n - 1 {
                t1
            } else {
                self.t0 + lit::<F>((i + 1) as f64) * h
            };
            let gb = evaluate_g(&mut *self.handler, &mut *interpolator, tb);

            if self.g0_positive ^ (gb >= F::zero()) {
                self.increasing = gb >= ga;

                let root = {
                    let handler = &mut self.handler;
                    let mut g = |t: F| evaluate_g(&mut **handler, &mut *interpolator, t);
                    if self.forward {
                        self.solver.solve(
                            self.max_iteration_count,
                            &mut g,
                            ta,
                            tb,
                            AllowedSolution::RightSide,
                        )?
                    } else {
                        self.solver.solve(
                            self.max_iteration_count,
                            &mut g,
                            tb,
                            ta,
                            AllowedSolution::LeftSide,
                        )?
                    }
                };

                let near_previous = self
                    .previous_event_time
                    .is_some_and(|previous| (root - previous).abs() <= self.convergence);
                if near_previous && (root - ta).abs() <= self.convergence {
                    // The root is the event just handled. Take the sign a little after it as the
                    // reference and scan the rest of the sub-interval again.
                    ta = if self.forward {
                        ta + self.convergence
                    } else {
                        ta - self.convergence
                    };
                    ga = evaluate_g(&mut *self.handler, &mut *interpolator, ta);
                    self.g0_positive = ga >= F::zero();
                    if self.forward ^ (ta >= tb) {
                        continue;
                    }
                    ta = tb;
                    ga = gb;
                    self.g0_positive = gb >= F::zero();
                } else if !near_previous {
                    self.pending_event = true;
                    self.pending_event_time = root;
                    return Ok(true);
                } else {
                    ta = tb;
                    ga = gb;
                }
            } else {
                ta = tb;
                ga = gb;
            }
            i += 1;
        }

        self.pending_event = false;
        self.pending_event_time = F::nan();
        Ok(false)
    }

    /// Inform the state that the step was accepted up to `t`, notifying the handler when `t` is
    /// the pending event.
    pub fn step_accepted(&mut self, t: F, y: nd::ArrayView1<F>) {
        self.t0 = t;
        self.g0 = self.handler.g(t, y);
        if self.is_pending_at(t) {
            self.previous_event_time = Some(t);
            self.g0_positive = self.increasing;
            self.next_action = self
                .handler
                .event_occurred(t, y, !(self.increasing ^ self.forward));
        } else {
            self.g0_positive = self.g0 >= F::zero();
            self.next_action = Action::Continue;
        }
    }

    /// Whether the handler asked to stop at the last accepted event.
    pub fn stop(&self) -> bool {
        self.next_action == Action::Stop
    }

    /// Apply a pending reset at `t`.
    ///
    /// Lets the handler modify `y` for [`Action::ResetState`] and clears the pending event.
    /// Returns whether derivatives must be recomputed.
    pub fn reset(&mut self, t: F, y: nd::ArrayViewMut1<F>) -> bool {
        if !self.is_pending_at(t) {
            return false;
        }
        if self.next_action == Action::ResetState {
            self.handler.reset_state(t, y);
        }
        self.pending_event = false;
        self.pending_event_time = F::nan();
        matches!(
            self.next_action,
            Action::ResetState | Action::ResetDerivatives
        )
    }

    /// Time of the pending event, or infinity along the integration direction.
    pub fn event_time(&self) -> F {
        if self.pending_event {
            self.pending_event_time
        } else if self.forward {
            F::infinity()
        } else {
            F::neg_infinity()
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending_event
    }

    fn is_pending_at(&self, t: F) -> bool {
        self.pending_event && (self.pending_event_time - t).abs() <= self.convergence
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolator::{HermiteKernel, Interpolator};

    /// Switching function `g(t) = t - at` that records every call to `event_occurred`.
    struct Crossing {
        at: f64,
        action: Action,
        events: Vec<(f64, bool)>,
    }

    impl EventHandler<f64> for Crossing {
        fn g(&mut self, t: f64, _y: nd::ArrayView1<f64>) -> f64 {
            t - self.at
        }

        fn event_occurred(&mut self, t: f64, _y: nd::ArrayView1<f64>, increasing: bool) -> Action {
            self.events.push((t, increasing));
            self.action
        }

        fn reset_state(&mut self, _t: f64, mut y: nd::ArrayViewMut1<f64>) {
            y.fill(-1.);
        }
    }

    fn state(handler: &mut Crossing) -> EventState<'_, f64> {
        EventState::new(
            Box::new(handler),
            0.25,
            1e-10,
            100,
            Box::new(BrentSolver::new(1e-10)),
        )
    }

    /// Linear step from `(t0, t0)` to `(t1, t1)`.
    fn step(t0: f64, t1: f64) -> Interpolator<f64, HermiteKernel<f64>> {
        let mut interpolator =
            Interpolator::new(HermiteKernel::new(1), nd::array![t0].view(), t1 >= t0);
        interpolator.store_time(t0);
        interpolator.shift();
        interpolator.set_current_state(nd::array![t1].view());
        interpolator
            .kernel_mut()
            .load(nd::array![1.].view(), nd::array![1.].view());
        interpolator.store_time(t1);
        interpolator
    }

    #[test]
    fn locates_and_reports_event() {
        let mut handler = Crossing {
            at: 0.6,
            action: Action::ResetState,
            events: Vec::new(),
        };
        {
            let mut event = state(&mut handler);
            let mut interpolator = step(0., 1.);
            event.init(0., nd::array![0.].view(), 1.);
            event.reinitialize_begin(&mut interpolator);
            assert!(event.evaluate_step(&mut interpolator).unwrap());
            assert!(event.is_pending());
            let t = event.event_time();
            approx::assert_abs_diff_eq!(t, 0.6, epsilon = 1e-10);

            event.step_accepted(t, nd::array![t].view());
            assert!(!event.stop());
            let mut y = nd::array![t];
            assert!(event.reset(t, y.view_mut()));
            assert_eq!(y[0], -1.);
            assert!(!event.is_pending());
            assert_eq!(event.event_time(), f64::INFINITY);
        }
        assert_eq!(handler.events.len(), 1);
        assert!(handler.events[0].1);
    }

    #[test]
    fn backward_integration_reports_direction() {
        let mut handler = Crossing {
            at: 0.3,
            action: Action::Stop,
            events: Vec::new(),
        };
        {
            let mut event = state(&mut handler);
            let mut interpolator = step(1., 0.);
            event.init(1., nd::array![1.].view(), 0.);
            event.reinitialize_begin(&mut interpolator);
            assert!(event.evaluate_step(&mut interpolator).unwrap());
            let t = event.event_time();
            approx::assert_abs_diff_eq!(t, 0.3, epsilon = 1e-10);
            assert!(t <= 0.3);
            event.step_accepted(t, nd::array![t].view());
            assert!(event.stop());
        }
        // g = t - 0.3 increases with time even though integration runs backward.
        assert_eq!(handler.events.len(), 1);
        assert!(handler.events[0].1);
    }

    #[test]
    fn root_at_start_is_ignored() {
        let mut handler = Crossing {
            at: 0.,
            action: Action::Continue,
            events: Vec::new(),
        };
        let mut event = state(&mut handler);
        let mut interpolator = step(0., 1.);
        event.init(0., nd::array![0.].view(), 1.);
        event.reinitialize_begin(&mut interpolator);
        assert!(!event.evaluate_step(&mut interpolator).unwrap());
        assert_eq!(event.event_time(), f64::INFINITY);
    }

    #[test]
    fn handled_event_is_not_reported_twice() {
        let mut handler = Crossing {
            at: 0.5,
            action: Action::Continue,
            events: Vec::new(),
        };
        {
            let mut event = state(&mut handler);
            let mut interpolator = step(0., 1.);
            event.init(0., nd::array![0.].view(), 1.);
            event.reinitialize_begin(&mut interpolator);
            assert!(event.evaluate_step(&mut interpolator).unwrap());
            let t = event.event_time();
            event.step_accepted(t, nd::array![t].view());
            assert!(!event.reset(t, nd::array![t].view_mut()));

            interpolator.set_soft_previous_time(t);
            assert!(!event.evaluate_step(&mut interpolator).unwrap());
        }
        assert_eq!(handler.events.len(), 1);
    }
}
