//! The adaptive step-size control loop and the step acceptance protocol.

use core::cmp::Ordering;

use ndarray as nd;

use crate::error::{ConfigError, IntegrationError};
use crate::evaluator::Evaluator;
use crate::events::{BracketedSolver, BrentSolver, EventHandler, EventState};
use crate::handlers::StepHandler;
use crate::interpolator::{InterpolationKernel, Interpolator, StepInterpolator};
use crate::methods::StepAlgorithm;
use crate::ode::{ExpandableSystem, System};
use crate::precision::{equals_within_ulps, ulp};
use crate::step_size::StepSizeControl;
use crate::{Float, lit, to_f64};

/// Statistics of an integration run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Number of system function evaluations.
    pub num_system_evals: usize,
    /// Steps passed to the step handlers. A step split by events counts once.
    pub num_accepted_steps: usize,
    /// Steps retried with a smaller size because the error estimate was too large.
    pub num_rejected_steps: usize,
}

/// State of one integration run.
#[derive(Clone, Debug)]
pub struct Session<F> {
    step_start: F,
    step_size: F,
    is_last_step: bool,
    reset_occurred: bool,
    states_initialized: bool,
    max_evaluations: usize,
    stats: Stats,
}

impl<F: Float> Session<F> {
    fn new(t0: F, max_evaluations: usize) -> Self {
        Self {
            step_start: t0,
            step_size: F::zero(),
            is_last_step: false,
            reset_occurred: false,
            states_initialized: false,
            max_evaluations,
            stats: Stats::default(),
        }
    }

    /// Start of the current step, or the final time once the integration is over.
    pub fn current_step_start(&self) -> F {
        self.step_start
    }

    /// Size of the step being attempted, negative for backward integration.
    pub fn current_signed_step_size(&self) -> F {
        self.step_size
    }

    /// Whether the last accepted step reached the target or a stop event.
    pub fn is_last_step(&self) -> bool {
        self.is_last_step
    }

    /// Whether the last accepted step ended with a state or derivative reset.
    pub fn reset_occurred(&self) -> bool {
        self.reset_occurred
    }

    /// Derivative evaluations so far.
    pub fn evaluations(&self) -> usize {
        self.stats.num_system_evals
    }

    pub fn max_evaluations(&self) -> usize {
        self.max_evaluations
    }

    /// Counters of the run.
    pub fn stats(&self) -> &Stats {
        &self.stats
    }
}

/// Where an accepted step ended.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StepOutcome<F> {
    /// The full step was accepted.
    Continue(F),
    /// The integration ends here, at the target or at a stop event.
    Stopped(F),
    /// An event reset the state or derivatives; integration restarts from here.
    Reset(F),
}

impl<F: Float> StepOutcome<F> {
    /// Time the step ended at.
    pub fn time(&self) -> F {
        match *self {
            Self::Continue(t) | Self::Stopped(t) | Self::Reset(t) => t,
        }
    }
}

/// Adaptive step-size integrator driving a [`StepAlgorithm`].
///
/// Step handlers and event handlers may borrow from the caller for `'h`.
pub struct Integrator<'h, M: StepAlgorithm> {
    method: M,
    control: StepSizeControl<M::Float>,
    max_evaluations: usize,
    step_handlers: Vec<Box<dyn StepHandler<M::Float> + 'h>>,
    event_states: Vec<EventState<'h, M::Float>>,
}

impl<'h, F: Float, M: StepAlgorithm<Float = F>> Integrator<'h, M> {
    /// Integrator without handlers and with an unlimited evaluation budget.
    pub fn new(method: M, control: StepSizeControl<F>) -> Self {
        Self {
            method,
            control,
            max_evaluations: usize::MAX,
            step_handlers: Vec::new(),
            event_states: Vec::new(),
        }
    }

    /// Set the maximum number of derivative evaluations per integration.
    pub fn with_max_evaluations(self, max_evaluations: usize) -> Self {
        Self {
            max_evaluations,
            ..self
        }
    }

    /// Set the maximum number of derivative evaluations per integration. `None` removes the limit.
    pub fn set_max_evaluations(&mut self, max_evaluations: Option<usize>) {
        self.max_evaluations = max_evaluations.unwrap_or(usize::MAX);
    }

    /// Evaluation budget, `usize::MAX` when unlimited.
    pub fn max_evaluations(&self) -> usize {
        self.max_evaluations
    }

    pub fn method(&self) -> &M {
        &self.method
    }

    pub fn method_mut(&mut self) -> &mut M {
        &mut self.method
    }

    pub fn control(&self) -> &StepSizeControl<F> {
        &self.control
    }

    /// Step-size bounds and tolerances, checked again when an integration starts.
    pub fn control_mut(&mut self) -> &mut StepSizeControl<F> {
        &mut self.control
    }

    /// Register a handler called after every accepted step, in registration order.
    pub fn add_step_handler<H: StepHandler<F> + 'h>(&mut self, handler: H) {
        self.step_handlers.push(Box::new(handler));
    }

    pub fn clear_step_handlers(&mut self) {
        self.step_handlers.clear();
    }

    /// Register an event handler located with a [`BrentSolver`] of accuracy `convergence`.
    pub fn add_event_handler<H: EventHandler<F> + 'h>(
        &mut self,
        handler: H,
        max_check_interval: F,
        convergence: F,
        max_iteration_count: usize,
    ) {
        self.add_event_handler_with_solver(
            handler,
            max_check_interval,
            convergence,
            max_iteration_count,
            BrentSolver::new(convergence),
        );
    }

    /// Register an event handler located with `solver`.
    ///
    /// `g` is sampled at least every `max_check_interval` within a step. An event is considered
    /// handled once located to within `convergence`, using at most `max_iteration_count`
    /// evaluations of `g`.
    pub fn add_event_handler_with_solver<H, R>(
        &mut self,
        handler: H,
        max_check_interval: F,
        convergence: F,
        max_iteration_count: usize,
        solver: R,
    ) where
        H: EventHandler<F> + 'h,
        R: BracketedSolver<F> + 'h,
    {
        self.event_states.push(EventState::new(
            Box::new(handler),
            max_check_interval,
            convergence,
            max_iteration_count,
            Box::new(solver),
        ));
    }

    /// Registered event handlers with their tracking state, in registration order.
    pub fn event_states(&self) -> &[EventState<'h, F>] {
        &self.event_states
    }

    pub fn clear_event_handlers(&mut self) {
        self.event_states.clear();
    }

    /// Integrate `y' = f(t, y)` from `(t0, y0)` to `t`, storing the final state in `y`.
    ///
    /// # Examples
    ///
    /// ```
    /// use odestep::{DormandPrince54, Integrator, StepSizeControl, System};
    ///
    /// struct Decay;
    ///
    /// impl System for Decay {
    ///     type Float = f64;
    ///
    ///     fn dimension(&self) -> usize {
    ///         1
    ///     }
    ///
    ///     fn system(
    ///         &self,
    ///         _t: f64,
    ///         y: odestep::ArrayView1<f64>,
    ///         mut dydt: odestep::ArrayViewMut1<f64>,
    ///     ) {
    ///         dydt[0] = -y[0];
    ///     }
    /// }
    ///
    /// let mut integrator = Integrator::new(
    ///     DormandPrince54::default(),
    ///     StepSizeControl::new(1e-8, 1., 1e-10, 1e-10),
    /// );
    /// let mut y = ndarray::array![0.];
    /// let session = integrator
    ///     .integrate_system(&Decay, 0., ndarray::array![1.].view(), 1., y.view_mut())
    ///     .unwrap();
    /// approx::assert_relative_eq!(y[0], (-1f64).exp(), max_relative = 1e-8);
    /// assert!(session.evaluations() < 200);
    /// ```
    pub fn integrate_system<S: System<Float = F>>(
        &mut self,
        system: &S,
        t0: F,
        y0: nd::ArrayView1<F>,
        t: F,
        mut y: nd::ArrayViewMut1<F>,
    ) -> Result<Session<F>, IntegrationError> {
        if y.len() != system.dimension() {
            return Err(ConfigError::DimensionMismatch {
                expected: system.dimension(),
                found: y.len(),
            }
            .into());
        }
        let mut equations = ExpandableSystem::new(system);
        equations.set_time(t0);
        equations.set_primary_state(y0)?;
        let session = self.integrate(&mut equations, t)?;
        y.assign(&equations.primary_state());
        Ok(session)
    }

    /// Integrate `equations` from their current time and state up to `target`.
    ///
    /// On success the final time and complete state are written back to `equations`. This is
    /// `target` unless an event stopped the integration earlier.
    pub fn integrate<S: System<Float = F>>(
        &mut self,
        equations: &mut ExpandableSystem<'_, S>,
        target: F,
    ) -> Result<Session<F>, IntegrationError> {
        self.sanity_checks(equations, target)?;

        let t0 = equations.time();
        let forward = target > t0;
        let dimension = equations.total_dimension();
        let primary_dimension = equations.primary_dimension();

        let mut y = equations.complete_state().to_owned();
        let mut y_dot = nd::Array1::zeros(dimension);
        let mut y_new = nd::Array1::zeros(dimension);
        let mut y_dot_new = nd::Array1::zeros(dimension);
        let mut y_tmp = nd::Array1::zeros(dimension);
        let mut y_dot_tmp = nd::Array1::zeros(dimension);

        let mut interpolator =
            Interpolator::new(self.method.new_kernel(dimension), y.view(), forward);
        interpolator.store_time(t0);

        let mut session = Session::new(t0, self.max_evaluations);
        self.init_integration(t0, y.view(), target);

        let mut evaluator = Evaluator::new(&*equations, self.max_evaluations);
        let fsal = self.method.is_fsal();
        let mut first_time = true;
        let mut h_new = F::zero();

        loop {
            interpolator.shift();

            let estimate = loop {
                if first_time || !fsal {
                    evaluator.compute_derivatives(
                        session.step_start,
                        y.view(),
                        y_dot.view_mut(),
                    )?;
                }

                if first_time {
                    let scale = self.control.scale(y.view(), primary_dimension);
                    h_new = self.control.initialize_step(
                        &mut evaluator,
                        forward,
                        self.method.order(),
                        scale.view(),
                        session.step_start,
                        y.view(),
                        y_dot.view(),
                        y_tmp.view_mut(),
                        y_dot_tmp.view_mut(),
                    )?;
                    first_time = false;
                }

                session.step_size = h_new;
                let next_t = session.step_start + session.step_size;
                if (forward && next_t >= target) || (!forward && next_t <= target) {
                    session.step_size = target - session.step_start;
                }

                let estimate = self.method.propose_step(
                    &mut evaluator,
                    &self.control,
                    session.step_start,
                    session.step_size,
                    y.view(),
                    y_dot.view(),
                    y_new.view_mut(),
                    y_dot_new.view_mut(),
                    interpolator.kernel_mut(),
                )?;
                if estimate.accepted {
                    break estimate;
                }

                session.stats.num_rejected_steps += 1;
                h_new = self.control.filter_step(
                    session.step_size * estimate.factor,
                    forward,
                    false,
                )?;
            };

            interpolator.set_current_state(y_new.view());
            interpolator.store_time(session.step_start + session.step_size);
            y.assign(&y_new);
            let outcome = self.accept_step(
                &mut session,
                &mut evaluator,
                &mut interpolator,
                y.view_mut(),
                y_dot_new.view_mut(),
                target,
            )?;
            session.stats.num_accepted_steps += 1;
            session.step_start = outcome.time();
            if session.is_last_step {
                break;
            }

            interpolator.set_current_state(y.view());
            interpolator.store_time(session.step_start);
            if fsal {
                y_dot.assign(&y_dot_new);
            }

            let scaled_h = session.step_size * estimate.factor;
            let reaches_target = |h: F| {
                let next_t = session.step_start + h;
                if forward {
                    next_t >= target
                } else {
                    next_t <= target
                }
            };
            let next_is_last = reaches_target(scaled_h);
            h_new = self.control.filter_step(scaled_h, forward, next_is_last)?;
            if reaches_target(h_new) {
                h_new = target - session.step_start;
            }
        }

        session.stats.num_system_evals = evaluator.num_system_evals();
        equations.set_time(session.step_start);
        equations.set_complete_state(y.view())?;
        Ok(session)
    }

    fn sanity_checks<S: System<Float = F>>(
        &self,
        equations: &ExpandableSystem<'_, S>,
        target: F,
    ) -> Result<(), ConfigError> {
        let t0 = equations.time();
        let threshold = lit::<F>(1000.) * ulp(t0.abs().max(target.abs()));
        let span = (t0 - target).abs();
        if !(span > threshold) {
            return Err(ConfigError::IntervalTooSmall {
                span: to_f64(span),
                threshold: to_f64(threshold),
            });
        }
        self.control.sanity_checks(equations.primary_dimension())
    }

    fn init_integration(&mut self, t0: F, y0: nd::ArrayView1<F>, t: F) {
        for state in &mut self.event_states {
            state.init(t0, y0, t);
        }
        for handler in &mut self.step_handlers {
            handler.init(t0, y0, t);
        }
    }

    /// Process events inside the step held by `interpolator` and notify step handlers.
    ///
    /// Events are handled in chronological order along the integration direction, ties going to
    /// the handler registered first. Step handlers see the step split at every event. On return
    /// `y` holds the state at the returned time. After a reset `y_dot` holds the recomputed
    /// derivatives there.
    pub(crate) fn accept_step<S, K>(
        &mut self,
        session: &mut Session<F>,
        evaluator: &mut Evaluator<'_, '_, S>,
        interpolator: &mut Interpolator<F, K>,
        mut y: nd::ArrayViewMut1<F>,
        mut y_dot: nd::ArrayViewMut1<F>,
        target: F,
    ) -> Result<StepOutcome<F>, IntegrationError>
    where
        S: System<Float = F>,
        K: InterpolationKernel<F> + 'static,
    {
        let mut previous_t = interpolator.global_previous_time();
        let current_t = interpolator.global_current_time();
        let forward = interpolator.is_forward();
        session.reset_occurred = false;

        if !session.states_initialized {
            for state in &mut self.event_states {
                state.reinitialize_begin(&mut *interpolator);
            }
            session.states_initialized = true;
        }

        let mut occurring = Vec::new();
        for (index, state) in self.event_states.iter_mut().enumerate() {
            if state.evaluate_step(&mut *interpolator)? {
                occurring.push(index);
            }
        }

        loop {
            // An event may have been handled together with an earlier one at the same time.
            occurring.retain(|&index| self.event_states[index].is_pending());
            let Some(position) = self.earliest_event(&occurring, forward) else {
                break;
            };
            let index = occurring.remove(position);
            let event_t = self.event_states[index].event_time();

            // Handlers only see the part of the step before the event.
            interpolator.set_soft_previous_time(previous_t);
            interpolator.set_soft_current_time(event_t);
            interpolator.set_interpolated_time(event_t);
            let event_y = interpolator.interpolated_state();

            for state in &mut self.event_states {
                state.step_accepted(event_t, event_y.view());
            }
            session.is_last_step = self.event_states.iter().any(|state| state.stop());

            for handler in &mut self.step_handlers {
                handler
                    .handle_step(&mut *interpolator, session.is_last_step)
                    .map_err(IntegrationError::Handler)?;
            }

            if session.is_last_step {
                y.assign(&event_y);
                return Ok(StepOutcome::Stopped(event_t));
            }

            let mut reset_y = event_y;
            let mut need_reset = false;
            for state in &mut self.event_states {
                need_reset |= state.reset(event_t, reset_y.view_mut());
            }
            if need_reset {
                y.assign(&reset_y);
                evaluator.compute_derivatives(event_t, y.view(), y_dot.view_mut())?;
                session.reset_occurred = true;
                return Ok(StepOutcome::Reset(event_t));
            }

            // The rest of the step may hold further occurrences of the same event.
            previous_t = event_t;
            interpolator.set_soft_previous_time(event_t);
            interpolator.set_soft_current_time(current_t);
            if self.event_states[index].evaluate_step(&mut *interpolator)? {
                occurring.push(index);
            }
        }

        interpolator.set_interpolated_time(current_t);
        let current_y = interpolator.interpolated_state();
        for state in &mut self.event_states {
            state.step_accepted(current_t, current_y.view());
        }
        let stopped = self.event_states.iter().any(|state| state.stop());
        session.is_last_step = stopped || equals_within_ulps(current_t, target, 1);

        for handler in &mut self.step_handlers {
            handler
                .handle_step(&mut *interpolator, session.is_last_step)
                .map_err(IntegrationError::Handler)?;
        }

        Ok(if session.is_last_step {
            StepOutcome::Stopped(current_t)
        } else {
            StepOutcome::Continue(current_t)
        })
    }

    /// Position in `occurring` of the first pending event along the integration direction.
    fn earliest_event(&self, occurring: &[usize], forward: bool) -> Option<usize> {
        occurring
            .iter()
            .enumerate()
            .min_by(|&(_, &a), &(_, &b)| {
                let ta = self.event_states[a].event_time();
                let tb = self.event_states[b].event_time();
                let order = if forward {
                    ta.partial_cmp(&tb)
                } else {
                    tb.partial_cmp(&ta)
                };
                order.unwrap_or(Ordering::Equal).then(a.cmp(&b))
            })
            .map(|(position, _)| position)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::events::Action;
    use crate::interpolator::HermiteKernel;
    use crate::methods::{BulirschStoer, DormandPrince54};
    use crate::ode::SecondaryEquations;

    struct Decay;

    impl System for Decay {
        type Float = f64;

        fn dimension(&self) -> usize {
            1
        }

        fn system(&self, _t: f64, y: nd::ArrayView1<f64>, mut dydt: nd::ArrayViewMut1<f64>) {
            dydt[0] = -y[0];
        }
    }

    /// Event at a fixed time that logs `(id, t)` when it occurs.
    struct Threshold {
        id: usize,
        at: f64,
        action: Action,
        log: Rc<RefCell<Vec<(usize, f64)>>>,
    }

    impl EventHandler<f64> for Threshold {
        fn g(&mut self, t: f64, _y: nd::ArrayView1<f64>) -> f64 {
            t - self.at
        }

        fn event_occurred(&mut self, t: f64, _y: nd::ArrayView1<f64>, _increasing: bool) -> Action {
            self.log.borrow_mut().push((self.id, t));
            self.action
        }

        fn reset_state(&mut self, _t: f64, mut y: nd::ArrayViewMut1<f64>) {
            y.fill(42.);
        }
    }

    /// Records the window and last flag of every handled step.
    struct Windows(Rc<RefCell<Vec<(f64, f64, bool)>>>);

    impl StepHandler<f64> for Windows {
        fn handle_step(
            &mut self,
            interpolator: &mut dyn StepInterpolator<f64>,
            is_last: bool,
        ) -> Result<(), crate::error::HandlerError> {
            self.0.borrow_mut().push((
                interpolator.previous_time(),
                interpolator.current_time(),
                is_last,
            ));
            Ok(())
        }
    }

    fn control() -> StepSizeControl<f64> {
        StepSizeControl::new(1e-8, 1., 1e-10, 1e-10)
    }

    /// Step of `y = t` over `[0, 1]`.
    fn unit_step() -> Interpolator<f64, HermiteKernel<f64>> {
        let mut interpolator =
            Interpolator::new(HermiteKernel::new(1), nd::array![0.].view(), true);
        interpolator.store_time(0.);
        interpolator.shift();
        interpolator.set_current_state(nd::array![1.].view());
        interpolator
            .kernel_mut()
            .load(nd::array![1.].view(), nd::array![1.].view());
        interpolator.store_time(1.);
        interpolator
    }

    #[test]
    fn exponential_decay() {
        let mut integrator = Integrator::new(DormandPrince54::default(), control())
            .with_max_evaluations(10_000);
        let mut y = nd::array![0.];
        let session = integrator
            .integrate_system(&Decay, 0., nd::array![1.].view(), 1., y.view_mut())
            .unwrap();
        approx::assert_relative_eq!(y[0], (-1f64).exp(), max_relative = 1e-8);
        approx::assert_relative_eq!(session.current_step_start(), 1., epsilon = 1e-15);
        assert!(session.is_last_step());
        assert!(session.evaluations() < session.max_evaluations());
        assert!(session.stats().num_accepted_steps > 1);
    }

    #[test]
    fn budget_exhaustion_stops_before_output() {
        let windows = Rc::new(RefCell::new(Vec::new()));
        let mut integrator =
            Integrator::new(DormandPrince54::default(), control()).with_max_evaluations(1);
        integrator.add_step_handler(Windows(windows.clone()));
        let mut y = nd::array![0.];
        let result =
            integrator.integrate_system(&Decay, 0., nd::array![1.].view(), 1., y.view_mut());
        assert!(matches!(
            result,
            Err(IntegrationError::MaxEvaluationsExceeded { max: 1 })
        ));
        assert!(windows.borrow().is_empty());
    }

    #[test]
    fn reset_event_returns_exact_time() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let equations = ExpandableSystem::new(&Decay);
        let mut evaluator = Evaluator::new(&equations, 100);
        let mut integrator = Integrator::new(DormandPrince54::default(), control());
        integrator.add_event_handler(
            Threshold {
                id: 0,
                at: 0.5,
                action: Action::ResetState,
                log: log.clone(),
            },
            1.,
            1e-10,
            100,
        );

        let mut session = Session::new(0., 100);
        let mut interpolator = unit_step();
        let mut y = nd::array![1.];
        let mut y_dot = nd::array![0.];
        let outcome = integrator
            .accept_step(
                &mut session,
                &mut evaluator,
                &mut interpolator,
                y.view_mut(),
                y_dot.view_mut(),
                2.,
            )
            .unwrap();

        assert_eq!(outcome, StepOutcome::Reset(0.5));
        assert!(session.reset_occurred());
        assert!(!session.is_last_step());
        assert_eq!(y, nd::array![42.]);
        assert_eq!(y_dot, nd::array![-42.]);
        assert_eq!(evaluator.num_system_evals(), 1);
        assert_eq!(*log.borrow(), vec![(0, 0.5)]);
    }

    #[test]
    fn events_are_processed_in_time_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let windows = Rc::new(RefCell::new(Vec::new()));
        let equations = ExpandableSystem::new(&Decay);
        let mut evaluator = Evaluator::new(&equations, 100);
        let mut integrator = Integrator::new(DormandPrince54::default(), control());
        for (id, at) in [(0, 0.7), (1, 0.3)] {
            integrator.add_event_handler(
                Threshold {
                    id,
                    at,
                    action: Action::Continue,
                    log: log.clone(),
                },
                1.,
                1e-10,
                100,
            );
        }
        integrator.add_step_handler(Windows(windows.clone()));

        let mut session = Session::new(0., 100);
        let mut interpolator = unit_step();
        let mut y = nd::array![1.];
        let mut y_dot = nd::array![0.];
        let outcome = integrator
            .accept_step(
                &mut session,
                &mut evaluator,
                &mut interpolator,
                y.view_mut(),
                y_dot.view_mut(),
                2.,
            )
            .unwrap();
        assert_eq!(outcome, StepOutcome::Continue(1.));

        let log = log.borrow();
        assert_eq!(log.iter().map(|e| e.0).collect::<Vec<_>>(), vec![1, 0]);
        approx::assert_abs_diff_eq!(log[0].1, 0.3, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(log[1].1, 0.7, epsilon = 1e-9);

        let windows = windows.borrow();
        assert_eq!(windows.len(), 3);
        let bounds = [(0., 0.3), (0.3, 0.7), (0.7, 1.)];
        for (&(start, end, is_last), &(expected_start, expected_end)) in
            windows.iter().zip(bounds.iter())
        {
            approx::assert_abs_diff_eq!(start, expected_start, epsilon = 1e-9);
            approx::assert_abs_diff_eq!(end, expected_end, epsilon = 1e-9);
            assert!(!is_last);
        }
    }

    #[test]
    fn simultaneous_events_fire_once_in_registration_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let windows = Rc::new(RefCell::new(Vec::new()));
        let equations = ExpandableSystem::new(&Decay);
        let mut evaluator = Evaluator::new(&equations, 100);
        let mut integrator = Integrator::new(DormandPrince54::default(), control());
        for id in 0..2 {
            integrator.add_event_handler(
                Threshold {
                    id,
                    at: 0.5,
                    action: Action::Continue,
                    log: log.clone(),
                },
                1.,
                1e-10,
                100,
            );
        }
        integrator.add_step_handler(Windows(windows.clone()));

        let mut session = Session::new(0., 100);
        let mut interpolator = unit_step();
        let mut y = nd::array![1.];
        let mut y_dot = nd::array![0.];
        integrator
            .accept_step(
                &mut session,
                &mut evaluator,
                &mut interpolator,
                y.view_mut(),
                y_dot.view_mut(),
                2.,
            )
            .unwrap();

        assert_eq!(*log.borrow(), vec![(0, 0.5), (1, 0.5)]);
        assert_eq!(windows.borrow().len(), 2);
    }

    /// Event whenever `sin(5 pi t)` changes sign.
    struct Oscillating(Rc<RefCell<Vec<f64>>>);

    impl EventHandler<f64> for Oscillating {
        fn g(&mut self, t: f64, _y: nd::ArrayView1<f64>) -> f64 {
            (5. * std::f64::consts::PI * t).sin()
        }

        fn event_occurred(&mut self, t: f64, _y: nd::ArrayView1<f64>, _increasing: bool) -> Action {
            self.0.borrow_mut().push(t);
            Action::Continue
        }
    }

    #[test]
    fn recurring_event_fires_at_every_root_in_one_step() {
        let times = Rc::new(RefCell::new(Vec::new()));
        let windows = Rc::new(RefCell::new(Vec::new()));
        let equations = ExpandableSystem::new(&Decay);
        let mut evaluator = Evaluator::new(&equations, 100);
        let mut integrator = Integrator::new(DormandPrince54::default(), control());
        integrator.add_event_handler(Oscillating(times.clone()), 0.05, 1e-10, 100);
        integrator.add_step_handler(Windows(windows.clone()));

        // Step of `y = t` over `[0.05, 1]`.
        let mut interpolator =
            Interpolator::new(HermiteKernel::new(1), nd::array![0.05].view(), true);
        interpolator.store_time(0.05);
        interpolator.shift();
        interpolator.set_current_state(nd::array![1.].view());
        interpolator
            .kernel_mut()
            .load(nd::array![1.].view(), nd::array![1.].view());
        interpolator.store_time(1.);

        let mut session = Session::new(0.05, 100);
        let mut y = nd::array![1.];
        let mut y_dot = nd::array![0.];
        let outcome = integrator
            .accept_step(
                &mut session,
                &mut evaluator,
                &mut interpolator,
                y.view_mut(),
                y_dot.view_mut(),
                2.,
            )
            .unwrap();
        assert_eq!(outcome, StepOutcome::Continue(1.));

        let times = times.borrow();
        assert_eq!(times.len(), 4);
        for (&t, expected) in times.iter().zip([0.2, 0.4, 0.6, 0.8]) {
            approx::assert_abs_diff_eq!(t, expected, epsilon = 1e-9);
        }
        let windows = windows.borrow();
        assert_eq!(windows.len(), 5);
        approx::assert_abs_diff_eq!(windows[4].0, 0.8, epsilon = 1e-9);
        assert_eq!(windows[4].1, 1.);
    }

    #[test]
    fn backward_events_are_processed_in_decreasing_time() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let windows = Rc::new(RefCell::new(Vec::new()));
        let equations = ExpandableSystem::new(&Decay);
        let mut evaluator = Evaluator::new(&equations, 100);
        let mut integrator = Integrator::new(DormandPrince54::default(), control());
        for (id, at) in [(0, 0.3), (1, 0.7)] {
            integrator.add_event_handler(
                Threshold {
                    id,
                    at,
                    action: Action::Continue,
                    log: log.clone(),
                },
                1.,
                1e-10,
                100,
            );
        }
        integrator.add_step_handler(Windows(windows.clone()));

        // Step of `y = t` from 1 back to 0.
        let mut interpolator =
            Interpolator::new(HermiteKernel::new(1), nd::array![1.].view(), false);
        interpolator.store_time(1.);
        interpolator.shift();
        interpolator.set_current_state(nd::array![0.].view());
        interpolator
            .kernel_mut()
            .load(nd::array![1.].view(), nd::array![1.].view());
        interpolator.store_time(0.);

        let mut session = Session::new(1., 100);
        let mut y = nd::array![0.];
        let mut y_dot = nd::array![0.];
        let outcome = integrator
            .accept_step(
                &mut session,
                &mut evaluator,
                &mut interpolator,
                y.view_mut(),
                y_dot.view_mut(),
                -1.,
            )
            .unwrap();
        assert_eq!(outcome, StepOutcome::Continue(0.));

        let log = log.borrow();
        assert_eq!(log.iter().map(|e| e.0).collect::<Vec<_>>(), vec![1, 0]);
        approx::assert_abs_diff_eq!(log[0].1, 0.7, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(log[1].1, 0.3, epsilon = 1e-9);

        let windows = windows.borrow();
        let bounds = [(1., 0.7), (0.7, 0.3), (0.3, 0.)];
        assert_eq!(windows.len(), bounds.len());
        for (&(start, end, is_last), &(expected_start, expected_end)) in
            windows.iter().zip(bounds.iter())
        {
            approx::assert_abs_diff_eq!(start, expected_start, epsilon = 1e-9);
            approx::assert_abs_diff_eq!(end, expected_end, epsilon = 1e-9);
            assert!(!is_last);
        }
    }

    #[test]
    fn stop_event_ends_integration() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let windows = Rc::new(RefCell::new(Vec::new()));
        let mut integrator = Integrator::new(DormandPrince54::default(), control());
        integrator.add_event_handler(
            Threshold {
                id: 0,
                at: 0.25,
                action: Action::Stop,
                log: log.clone(),
            },
            0.1,
            1e-12,
            100,
        );
        integrator.add_step_handler(Windows(windows.clone()));

        let system = Decay;
        let mut equations = ExpandableSystem::new(&system);
        equations.set_primary_state(nd::array![1.].view()).unwrap();
        let session = integrator.integrate(&mut equations, 1.).unwrap();

        approx::assert_abs_diff_eq!(session.current_step_start(), 0.25, epsilon = 1e-11);
        approx::assert_abs_diff_eq!(equations.time(), 0.25, epsilon = 1e-11);
        approx::assert_relative_eq!(
            equations.primary_state()[0],
            (-0.25f64).exp(),
            max_relative = 1e-8
        );
        assert_eq!(log.borrow().len(), 1);
        let windows = windows.borrow();
        let last = windows[windows.len() - 1];
        assert!(last.2);
        approx::assert_abs_diff_eq!(last.1, 0.25, epsilon = 1e-11);
    }

    #[test]
    fn backward_integration_progresses_monotonically() {
        let windows = Rc::new(RefCell::new(Vec::new()));
        let mut integrator = Integrator::new(BulirschStoer::default(), control());
        integrator.add_step_handler(Windows(windows.clone()));
        let mut y = nd::array![0.];
        integrator
            .integrate_system(
                &Decay,
                1.,
                nd::array![(-1f64).exp()].view(),
                0.,
                y.view_mut(),
            )
            .unwrap();
        approx::assert_relative_eq!(y[0], 1., max_relative = 1e-8);

        let windows = windows.borrow();
        assert!(windows.iter().all(|&(start, end, _)| end < start));
        assert!(windows.windows(2).all(|pair| pair[1].0 == pair[0].1));
        assert!(windows.iter().rev().skip(1).all(|w| !w.2));
        assert!(windows[windows.len() - 1].2);
    }

    #[test]
    fn rejects_degenerate_setup() {
        let mut integrator = Integrator::new(DormandPrince54::default(), control());
        let mut y = nd::array![0.];
        assert!(matches!(
            integrator.integrate_system(&Decay, 1., nd::array![1.].view(), 1., y.view_mut()),
            Err(IntegrationError::Config(ConfigError::IntervalTooSmall { .. }))
        ));

        let mut y = nd::array![0., 0.];
        assert!(matches!(
            integrator.integrate_system(&Decay, 0., nd::array![1.].view(), 1., y.view_mut()),
            Err(IntegrationError::Config(ConfigError::DimensionMismatch { .. }))
        ));

        integrator.control_mut().set_step_size_control_vector(
            1e-8,
            1.,
            nd::array![1e-6, 1e-6],
            nd::array![1e-6, 1e-6],
        );
        let mut y = nd::array![0.];
        assert!(matches!(
            integrator.integrate_system(&Decay, 0., nd::array![1.].view(), 1., y.view_mut()),
            Err(IntegrationError::Config(ConfigError::DimensionMismatch {
                expected: 1,
                found: 2
            }))
        ));
    }

    #[test]
    fn secondary_equations_follow_primary() {
        /// Integral of the primary state.
        struct Quadrature;

        impl SecondaryEquations<f64> for Quadrature {
            fn dimension(&self) -> usize {
                1
            }

            fn system(
                &self,
                _t: f64,
                primary: nd::ArrayView1<f64>,
                _primary_dot: nd::ArrayView1<f64>,
                _secondary: nd::ArrayView1<f64>,
                mut secondary_dot: nd::ArrayViewMut1<f64>,
            ) {
                secondary_dot[0] = primary[0];
            }
        }

        let system = Decay;
        let quadrature = Quadrature;
        let mut equations = ExpandableSystem::new(&system);
        let index = equations.add_secondary_equations(&quadrature);
        equations.set_primary_state(nd::array![1.].view()).unwrap();

        let mut integrator = Integrator::new(DormandPrince54::default(), control());
        integrator.integrate(&mut equations, 1.).unwrap();
        approx::assert_relative_eq!(
            equations.secondary_state(index)[0],
            1. - (-1f64).exp(),
            max_relative = 1e-7
        );
    }
}
