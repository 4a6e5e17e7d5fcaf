//! Ordinary differential equation systems.

use core::ops::Range;

use ndarray as nd;

use crate::Float;
use crate::error::ConfigError;

/// Trait for defining an ordinary differential equation system `y' = f(t, y)`.
pub trait System {
    /// The floating point type.
    type Float: Float;

    /// Number of components in the state vector.
    fn dimension(&self) -> usize;

    /// Evaluate the ordinary differential equation at time `t` and store the derivative in `dydt`.
    fn system(
        &self,
        t: Self::Float,
        y: nd::ArrayView1<Self::Float>,
        dydt: nd::ArrayViewMut1<Self::Float>,
    );
}

/// Additional equations integrated alongside a primary [`System`].
///
/// Secondary equations may read the primary state and its derivative but never feed back into the
/// primary system. Their components do not take part in step-size control.
pub trait SecondaryEquations<F: Float> {
    fn dimension(&self) -> usize;

    /// Compute the derivative of the secondary state into `secondary_dot`.
    fn system(
        &self,
        t: F,
        primary: nd::ArrayView1<F>,
        primary_dot: nd::ArrayView1<F>,
        secondary: nd::ArrayView1<F>,
        secondary_dot: nd::ArrayViewMut1<F>,
    );
}

/// A primary system extended with any number of secondary equation sets.
///
/// The complete state is the primary state followed by each secondary state in registration
/// order. The wrapper also carries the time and complete state that an integration starts from
/// and writes its result back to.
pub struct ExpandableSystem<'a, S: System> {
    primary: &'a S,
    secondary: Vec<&'a dyn SecondaryEquations<S::Float>>,
    time: S::Float,
    state: nd::Array1<S::Float>,
}

impl<'a, S: System> ExpandableSystem<'a, S> {
    pub fn new(primary: &'a S) -> Self {
        Self {
            primary,
            secondary: Vec::new(),
            time: <S::Float as num_traits::Zero>::zero(),
            state: nd::Array1::zeros(primary.dimension()),
        }
    }

    /// Register a secondary equation set and return its index. Its state starts at zero.
    pub fn add_secondary_equations(
        &mut self,
        equations: &'a dyn SecondaryEquations<S::Float>,
    ) -> usize {
        let mut state = nd::Array1::zeros(self.state.len() + equations.dimension());
        state
            .slice_mut(nd::s![..self.state.len()])
            .assign(&self.state);
        self.state = state;
        self.secondary.push(equations);
        self.secondary.len() - 1
    }

    pub fn primary(&self) -> &S {
        self.primary
    }

    pub fn primary_dimension(&self) -> usize {
        self.primary.dimension()
    }

    pub fn total_dimension(&self) -> usize {
        self.state.len()
    }

    pub fn num_secondary_equations(&self) -> usize {
        self.secondary.len()
    }

    pub fn time(&self) -> S::Float {
        self.time
    }

    pub fn set_time(&mut self, time: S::Float) {
        self.time = time;
    }

    pub fn primary_state(&self) -> nd::ArrayView1<S::Float> {
        self.state.slice(nd::s![..self.primary_dimension()])
    }

    pub fn set_primary_state(
        &mut self,
        state: nd::ArrayView1<S::Float>,
    ) -> Result<(), ConfigError> {
        let range = 0..self.primary_dimension();
        self.assign_range(range, state)
    }

    /// State of the secondary equation set registered under `index`.
    ///
    /// # Panics
    ///
    /// Panics if no secondary equation set was registered under `index`.
    pub fn secondary_state(&self, index: usize) -> nd::ArrayView1<S::Float> {
        self.state.slice(nd::s![self.secondary_range(index)])
    }

    pub fn set_secondary_state(
        &mut self,
        index: usize,
        state: nd::ArrayView1<S::Float>,
    ) -> Result<(), ConfigError> {
        let range = self.secondary_range(index);
        self.assign_range(range, state)
    }

    pub fn complete_state(&self) -> nd::ArrayView1<S::Float> {
        self.state.view()
    }

    pub fn set_complete_state(
        &mut self,
        state: nd::ArrayView1<S::Float>,
    ) -> Result<(), ConfigError> {
        let range = 0..self.state.len();
        self.assign_range(range, state)
    }

    /// Evaluate the complete derivative: first the primary system, then every secondary set with
    /// access to the freshly computed primary derivative.
    pub fn compute_derivatives(
        &self,
        t: S::Float,
        y: nd::ArrayView1<S::Float>,
        mut y_dot: nd::ArrayViewMut1<S::Float>,
    ) {
        debug_assert_eq!(y.len(), self.total_dimension());
        debug_assert_eq!(y_dot.len(), self.total_dimension());

        let n = self.primary_dimension();
        let primary = y.slice(nd::s![..n]);
        let (mut primary_dot, mut rest) = y_dot.view_mut().split_at(nd::Axis(0), n);
        self.primary.system(t, primary, primary_dot.view_mut());

        let primary_dot = primary_dot.view();
        let mut offset = 0;
        for equations in &self.secondary {
            let size = equations.dimension();
            equations.system(
                t,
                primary,
                primary_dot.view(),
                y.slice(nd::s![n + offset..n + offset + size]),
                rest.slice_mut(nd::s![offset..offset + size]),
            );
            offset += size;
        }
    }

    fn secondary_range(&self, index: usize) -> Range<usize> {
        let start = self.primary_dimension()
            + self.secondary[..index]
                .iter()
                .map(|equations| equations.dimension())
                .sum::<usize>();
        start..start + self.secondary[index].dimension()
    }

    fn assign_range(
        &mut self,
        range: Range<usize>,
        state: nd::ArrayView1<S::Float>,
    ) -> Result<(), ConfigError> {
        if state.len() != range.len() {
            return Err(ConfigError::DimensionMismatch {
                expected: range.len(),
                found: state.len(),
            });
        }
        self.state.slice_mut(nd::s![range]).assign(&state);
        Ok(())
    }
}
