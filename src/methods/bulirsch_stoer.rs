//! The [(Gragg-)Bulirsch-Stoer](https://en.wikipedia.org/wiki/Bulirsch%E2%80%93Stoer_algorithm)
//! method.
//!
//! It combines the (modified) midpoint method with Richardson extrapolation to accelerate
//! convergence. It is an explicit method that does not require Jacobians. Step sizes are adapted
//! without order estimation: the number of extrapolation iterations to aim for is a parameter.
//!
//! The implementation follows:
//! * Press, William H. Numerical Recipes 3rd Edition: The Art of Scientific Computing. Cambridge
//!   University Press, 2007. Ch. 17.3.2.
//! * Deuflhard, Peter. "Order and stepsize control in extrapolation methods." Numerische Mathematik
//!   41 (1983): 399-422.

#![expect(
    non_snake_case,
    reason = "Used for math symbols to match notation in Numerical Recipes"
)]

use core::marker::PhantomData;

use ndarray as nd;
use num_traits::cast;

use super::{StepAlgorithm, StepEstimate};
use crate::Float;
use crate::error::IntegrationError;
use crate::evaluator::Evaluator;
use crate::interpolator::HermiteKernel;
use crate::ode::System;
use crate::step_size::StepSizeControl;

/// Bulirsch-Stoer extrapolation with a cubic Hermite dense output.
///
/// Step ends are as accurate as the extrapolation, but interior points carry the Hermite error of
/// order `h^4`. Bound the step size through [`StepSizeControl`] when sampling inside long steps.
#[derive(Clone, Debug)]
pub struct BulirschStoer<F: Float> {
    /// The minimum number of iterations to use.
    min_iterations: usize,
    /// The maximum number of iterations to use.
    max_iterations: usize,
    /// The target number of iterations to use. Ideally this would be estimated using order control,
    /// but is instead an input parameter for simplicity.
    target_num_iterations: usize,
    _float: PhantomData<F>,
}

impl<F: Float> Default for BulirschStoer<F> {
    fn default() -> Self {
        let target_num_iterations = 3;
        Self {
            min_iterations: target_num_iterations,
            max_iterations: 10,
            target_num_iterations,
            _float: PhantomData,
        }
    }
}

impl<F: Float> BulirschStoer<F> {
    /// Set the maximum allowed number of iterations per step.
    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Set the target number of iterations.
    ///
    /// A step size will be continuously attempted to be produced so that convergence is achieved at
    /// this number of iterations. Ideally this would be estimated automatically to minimize
    /// computational cost, but it is instead currently an input parameter for simplicity.
    pub fn with_target_num_iterations(self, target_num_iterations: usize) -> Self {
        assert!(target_num_iterations < self.max_iterations);
        Self {
            target_num_iterations,
            min_iterations: target_num_iterations,
            ..self
        }
    }

    fn compute_step_size_adjustment_factor(&self, scaled_truncation_error: F) -> F {
        let safety_factor: F = cast(0.95).unwrap();
        let min_step_size_decrease_factor: F = cast(0.01).unwrap();
        let max_step_size_increase_factor = min_step_size_decrease_factor.recip();

        if scaled_truncation_error > F::zero() {
            // Eq. 2.14, Deuflhard, Peter. "Order and stepsize control in
            // extrapolation methods." Numerische Mathematik 41 (1983): 399-422.
            (safety_factor
                / scaled_truncation_error
                    .powf(F::one() / cast(2 * self.target_num_iterations + 1).unwrap()))
            .max(min_step_size_decrease_factor)
            .min(max_step_size_increase_factor)
        } else if scaled_truncation_error.is_finite() {
            F::one()
        } else {
            cast(0.5).unwrap()
        }
    }

    /// Take a single extrapolating step, iteratively subdividing in order to extrapolate.
    ///
    /// On convergence the extrapolated state is written to `y_final`.
    #[allow(clippy::too_many_arguments)]
    fn step<S: System<Float = F>>(
        &self,
        evaluator: &mut Evaluator<'_, '_, S>,
        control: &StepSizeControl<F>,
        t: F,
        step_size: F,
        y_init: nd::ArrayView1<F>,
        f_init: nd::ArrayView1<F>,
        mut y_final: nd::ArrayViewMut1<F>,
    ) -> Result<ExtrapolationStats<F>, IntegrationError> {
        let primary_dimension = evaluator.primary_dimension();

        // Step size policy.
        let compute_n = |k: usize| -> usize { 2 * (k + 1) };

        // Build up an extrapolation tableau.
        let mut tableau = ExtrapolationTableau(Vec::<ExtrapolationTableauRow<_>>::new());
        for k in 0..self.max_iterations {
            let nk = compute_n(k);
            let tableau_row = {
                let mut Tk = Vec::with_capacity(k + 1);
                Tk.push(self.midpoint_step(evaluator, t, step_size, nk, f_init, y_init)?);
                for j in 0..k {
                    // There is a mistake in eq. 17.3.8. See
                    // https://www.numerical.recipes/forumarchive/index.php/t-2256.html.
                    let denominator = <F as num_traits::Float>::powi(
                        cast::<_, F>(nk).unwrap() / cast(compute_n(k - j - 1)).unwrap(),
                        2,
                    ) - <F as num_traits::One>::one();
                    Tk.push(&Tk[j] + &((&Tk[j] - &tableau.0[k - 1].0[j]) / denominator));
                }
                ExtrapolationTableauRow(Tk)
            };

            let converged = k > self.min_iterations
                && tableau_row.compute_scaled_truncation_error(control, primary_dimension)
                    <= <F as num_traits::One>::one();
            if converged {
                y_final.assign(tableau_row.estimate());
            }
            tableau.0.push(tableau_row);
            if converged {
                return Ok(ExtrapolationStats {
                    converged,
                    scaled_truncation_errors: tableau
                        .compute_scaled_truncation_errors(control, primary_dimension),
                });
            }
        }

        // Failed to converge.
        Ok(ExtrapolationStats {
            converged: false,
            scaled_truncation_errors: tableau
                .compute_scaled_truncation_errors(control, primary_dimension),
        })
    }

    fn midpoint_step<S: System<Float = F>>(
        &self,
        evaluator: &mut Evaluator<'_, '_, S>,
        t: F,
        step_size: F,
        n: usize,
        f_init: nd::ArrayView1<F>,
        y_init: nd::ArrayView1<F>,
    ) -> Result<nd::Array1<F>, IntegrationError> {
        let substep_size = step_size / cast(n).unwrap();
        let two_substep_size = cast::<_, F>(2).unwrap() * substep_size;

        // 0    1    2    3    4    5    6    n
        //                  ..
        //           zi  zip1
        //           zip1 zi
        //                zi zip1
        //                  ..
        //                               zi  zip1
        let mut zi = y_init.to_owned();
        let mut zip1 = &zi + &(&f_init * substep_size);
        let mut fi = f_init.to_owned();

        for i in 1..n {
            core::mem::swap(&mut zi, &mut zip1);
            let ti = t + cast::<_, F>(i).unwrap() * substep_size;
            evaluator.compute_derivatives(ti, zi.view(), fi.view_mut())?;
            fi *= two_substep_size;
            zip1 += &fi;
        }

        evaluator.compute_derivatives(t + step_size, zip1.view(), fi.view_mut())?;
        fi *= substep_size;
        let mut result = zi;
        result += &zip1;
        result += &fi;
        result *= cast::<_, F>(0.5).unwrap();
        Ok(result)
    }
}

impl<F: Float> StepAlgorithm for BulirschStoer<F> {
    type Float = F;
    type Kernel = HermiteKernel<F>;

    fn order(&self) -> usize {
        2 * self.target_num_iterations + 1
    }

    fn is_fsal(&self) -> bool {
        true
    }

    fn new_kernel(&self, dimension: usize) -> Self::Kernel {
        HermiteKernel::new(dimension)
    }

    fn propose_step<S: System<Float = F>>(
        &mut self,
        evaluator: &mut Evaluator<'_, '_, S>,
        control: &StepSizeControl<F>,
        t: F,
        h: F,
        y: nd::ArrayView1<F>,
        y_dot: nd::ArrayView1<F>,
        mut y_new: nd::ArrayViewMut1<F>,
        mut y_dot_new: nd::ArrayViewMut1<F>,
        kernel: &mut Self::Kernel,
    ) -> Result<StepEstimate<F>, IntegrationError> {
        let stats = self.step(evaluator, control, t, h, y, y_dot, y_new.view_mut())?;

        let scaled_truncation_error = stats
            .scaled_truncation_errors
            .get(self.target_num_iterations)
            .copied()
            .unwrap_or(F::infinity());
        let factor = self.compute_step_size_adjustment_factor(scaled_truncation_error);

        if stats.converged {
            evaluator.compute_derivatives(t + h, y_new.view(), y_dot_new.view_mut())?;
            kernel.load(y_dot, y_dot_new.view());
        }
        Ok(StepEstimate {
            accepted: stats.converged,
            error: stats
                .scaled_truncation_errors
                .last()
                .copied()
                .unwrap_or(F::infinity()),
            factor,
        })
    }
}

/// Statistics from taking an integration step.
#[derive(Debug)]
struct ExtrapolationStats<F: Float> {
    converged: bool,
    /// The scaled (including absolute and relative tolerances) truncation errors for each
    /// iteration.
    ///
    /// Each will be <= 1 if convergence was achieved or > 1 if convergence was not achieved.
    scaled_truncation_errors: Vec<F>,
}

struct ExtrapolationTableau<F: Float>(Vec<ExtrapolationTableauRow<F>>);

impl<F: Float> ExtrapolationTableau<F> {
    fn compute_scaled_truncation_errors(
        &self,
        control: &StepSizeControl<F>,
        primary_dimension: usize,
    ) -> Vec<F> {
        self.0
            .iter()
            .skip(1)
            .map(|row| row.compute_scaled_truncation_error(control, primary_dimension))
            .collect()
    }
}

struct ExtrapolationTableauRow<F: Float>(Vec<nd::Array1<F>>);

impl<F: Float> ExtrapolationTableauRow<F> {
    /// RMS over the primary components of the difference between the two most extrapolated
    /// estimates.
    fn compute_scaled_truncation_error(
        &self,
        control: &StepSizeControl<F>,
        primary_dimension: usize,
    ) -> F {
        let Some([y, y_alt]) = self.0.last_chunk::<2>() else {
            return F::infinity();
        };
        ((0..primary_dimension)
            .map(|i| {
                let scale = control
                    .tolerance()
                    .scale(i, y_alt[i].abs().max(y[i].abs()));
                (y[i] - y_alt[i]).powi(2) / scale.powi(2)
            })
            .sum::<F>()
            / cast(primary_dimension).unwrap())
        .sqrt()
    }

    fn estimate(&self) -> &nd::Array1<F> {
        &self.0[self.0.len() - 1]
    }
}
