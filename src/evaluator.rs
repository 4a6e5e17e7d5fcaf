use ndarray as nd;

use crate::error::IntegrationError;
use crate::ode::{ExpandableSystem, System};

/// Counts derivative evaluations of an [`ExpandableSystem`] against a budget.
pub struct Evaluator<'e, 'a, S: System> {
    equations: &'e ExpandableSystem<'a, S>,
    num_system_evals: usize,
    max_evaluations: usize,
}

impl<'e, 'a, S: System> Evaluator<'e, 'a, S> {
    pub fn new(equations: &'e ExpandableSystem<'a, S>, max_evaluations: usize) -> Self {
        Self {
            equations,
            num_system_evals: 0,
            max_evaluations,
        }
    }

    /// Evaluate the complete derivative, failing once the budget is exhausted.
    pub fn compute_derivatives(
        &mut self,
        t: S::Float,
        y: nd::ArrayView1<S::Float>,
        y_dot: nd::ArrayViewMut1<S::Float>,
    ) -> Result<(), IntegrationError> {
        self.num_system_evals += 1;
        if self.num_system_evals > self.max_evaluations {
            return Err(IntegrationError::MaxEvaluationsExceeded {
                max: self.max_evaluations,
            });
        }
        self.equations.compute_derivatives(t, y, y_dot);
        Ok(())
    }

    pub fn num_system_evals(&self) -> usize {
        self.num_system_evals
    }

    pub fn max_evaluations(&self) -> usize {
        self.max_evaluations
    }

    /// Number of state components that take part in error control.
    pub fn primary_dimension(&self) -> usize {
        self.equations.primary_dimension()
    }

    pub fn total_dimension(&self) -> usize {
        self.equations.total_dimension()
    }
}
