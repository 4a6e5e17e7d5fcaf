//! Adaptive step-size integration of ordinary differential equations.
//!
//! An [`Integrator`] advances an [`ExpandableSystem`] (a primary [`System`] optionally extended
//! with [`SecondaryEquations`]) from its current time to a target time. Each step is proposed by a
//! [`StepAlgorithm`](methods::StepAlgorithm): the Dormand-Prince 5(4) embedded Runge-Kutta pair
//! ([`DormandPrince54`]) or the Gragg-Bulirsch-Stoer extrapolation method ([`BulirschStoer`]).
//! Step sizes are chosen by [`StepSizeControl`] from absolute and relative tolerances.
//!
//! Accepted steps are offered to [`StepHandler`]s through a dense-output
//! [`StepInterpolator`](interpolator::StepInterpolator). Discrete events, defined as the sign
//! changes of user switching functions, are located inside each step with a bracketing root
//! solver and may stop the integration or reset the state.
//!
//! The step-size control follows:
//! * Hairer, Ernst, Syvert P. Nørsett, and Gerhard Wanner. Solving Ordinary Differential Equations
//!   I: Nonstiff Problems. Springer, 1993. Ch. II.4 and II.6.
//! * Press, William H. Numerical Recipes 3rd Edition: The Art of Scientific Computing. Cambridge
//!   University Press, 2007. Ch. 17.2 and 17.3.
//!
//! As an example, consider a harmonic oscillator whose position is sampled every quarter time
//! unit:
//!
//! ```
//! use odestep::{
//!     DormandPrince54, FixedStepHandler, HandlerError, Integrator, StepNormalizer,
//!     StepSizeControl,
//! };
//!
//! // Define ODE.
//! struct Oscillator {
//!     omega: f64,
//! }
//!
//! impl odestep::System for Oscillator {
//!     type Float = f64;
//!
//!     fn dimension(&self) -> usize {
//!         2
//!     }
//!
//!     fn system(
//!         &self,
//!         _t: f64,
//!         y: odestep::ArrayView1<Self::Float>,
//!         mut dydt: odestep::ArrayViewMut1<Self::Float>,
//!     ) {
//!         dydt[0] = y[1];
//!         dydt[1] = -self.omega.powi(2) * y[0];
//!     }
//! }
//!
//! // Collect samples.
//! #[derive(Default)]
//! struct Samples(Vec<(f64, f64)>);
//!
//! impl FixedStepHandler<f64> for Samples {
//!     fn handle_step(
//!         &mut self,
//!         t: f64,
//!         y: odestep::ArrayView1<f64>,
//!         _y_dot: odestep::ArrayView1<f64>,
//!         _is_last: bool,
//!     ) -> Result<(), HandlerError> {
//!         self.0.push((t, y[0]));
//!         Ok(())
//!     }
//! }
//!
//! let system = Oscillator { omega: 1.2 };
//! let mut samples = Samples::default();
//! let mut integrator = Integrator::new(
//!     DormandPrince54::default(),
//!     StepSizeControl::new(1e-8, 1., 1e-10, 1e-10),
//! );
//! integrator.add_step_handler(StepNormalizer::new(0.25, &mut samples));
//!
//! let mut y = ndarray::array![0., 0.];
//! let session = integrator
//!     .integrate_system(&system, 0., ndarray::array![1., 0.].view(), 10., y.view_mut())
//!     .unwrap();
//! drop(integrator);
//!
//! // Ensure results match the analytic solution.
//! approx::assert_relative_eq!(y[0], (1.2f64 * 10.).cos(), epsilon = 1e-7);
//! assert_eq!(samples.0.len(), 41);
//! for &(t, x) in &samples.0 {
//!     approx::assert_relative_eq!(x, (1.2 * t).cos(), epsilon = 1e-6);
//! }
//! assert!(session.stats().num_accepted_steps > 10);
//! ```
//!
//! If the ODE is written with e.g. [`nalgebra`](https://nalgebra.org), bridge to [`ndarray`]
//! views through slices, as long as dynamically sized vectors are used:
//!
//! ```
//! fn compute_dydt(
//!     omega: f32,
//!     y: nalgebra::DVectorView<f32>,
//!     mut dydt: nalgebra::DVectorViewMut<f32>,
//! ) {
//!     dydt[0] = y[1];
//!     dydt[1] = -omega.powi(2) * y[0];
//! }
//!
//! struct TrigSystem {
//!     omega: f32,
//! }
//!
//! impl odestep::System for TrigSystem {
//!     type Float = f32;
//!
//!     fn dimension(&self) -> usize {
//!         2
//!     }
//!
//!     fn system(
//!         &self,
//!         _t: f32,
//!         y: odestep::ArrayView1<Self::Float>,
//!         mut dydt: odestep::ArrayViewMut1<Self::Float>,
//!     ) {
//!         let y_nalgebra = nalgebra::DVectorView::from_slice(y.as_slice().unwrap(), y.len());
//!         let dydt_nalgebra =
//!             nalgebra::DVectorViewMut::from_slice(dydt.as_slice_mut().unwrap(), y.len());
//!         compute_dydt(self.omega, y_nalgebra, dydt_nalgebra);
//!     }
//! }
//!
//! let system = TrigSystem { omega: 1.2 };
//! let mut integrator = odestep::Integrator::new(
//!     odestep::BulirschStoer::default(),
//!     odestep::StepSizeControl::new(1e-4, 2., 1e-5, 1e-5),
//! );
//! let mut y = ndarray::array![0., 0.];
//! integrator
//!     .integrate_system(&system, 0., ndarray::array![1., 0.].view(), 5., y.view_mut())
//!     .unwrap();
//! approx::assert_relative_eq!(y[0], (1.2f32 * 5.).cos(), epsilon = 1e-3);
//! ```

pub mod error;
pub mod events;
pub mod handlers;
pub mod interpolator;
pub mod methods;
pub mod precision;

mod evaluator;
mod integrator;
mod ode;
mod step_size;

pub use nd::ArrayView1;
pub use nd::ArrayViewMut1;
use ndarray as nd;
use num_traits::cast;

pub use error::{ConfigError, HandlerError, IntegrationError, RootSolverError};
pub use evaluator::Evaluator;
pub use events::{Action, EventHandler};
pub use handlers::{
    ContinuousOutputModel, FixedStepHandler, StepHandler, StepLogger, StepNormalizer,
    StepNormalizerBounds, StepNormalizerMode,
};
pub use integrator::{Integrator, Session, Stats, StepOutcome};
pub use methods::{BulirschStoer, DormandPrince54};
pub use ode::{ExpandableSystem, SecondaryEquations, System};
pub use step_size::{StepSizeControl, Tolerance};

/// Floating point type usable for integration.
pub trait Float:
    num_traits::Float
    + core::iter::Sum
    + core::ops::AddAssign
    + core::ops::MulAssign
    + core::fmt::Debug
    + nd::ScalarOperand
{
}

impl Float for f32 {}
impl Float for f64 {}

/// Convert a numeric literal to `F`.
pub(crate) fn lit<F: Float>(v: f64) -> F {
    cast(v).unwrap()
}

/// Convert a value to `f64` for error and log reporting.
pub(crate) fn to_f64<F: Float>(x: F) -> f64 {
    x.to_f64().unwrap_or(f64::NAN)
}
