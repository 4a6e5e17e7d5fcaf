use ndarray as nd;

use super::{StepAlgorithm, StepEstimate};
use crate::error::IntegrationError;
use crate::evaluator::Evaluator;
use crate::interpolator::DormandPrinceKernel;
use crate::ode::System;
use crate::step_size::StepSizeControl;
use crate::{Float, lit};

/// Stage times.
const C: [f64; 6] = [1. / 5., 3. / 10., 4. / 5., 8. / 9., 1., 1.];

/// Butcher tableau rows. The last row holds the fifth-order weights, so the seventh stage is the
/// derivative at the new state.
const A: [&[f64]; 6] = [
    &[1. / 5.],
    &[3. / 40., 9. / 40.],
    &[44. / 45., -56. / 15., 32. / 9.],
    &[
        19372. / 6561.,
        -25360. / 2187.,
        64448. / 6561.,
        -212. / 729.,
    ],
    &[
        9017. / 3168.,
        -355. / 33.,
        46732. / 5247.,
        49. / 176.,
        -5103. / 18656.,
    ],
    &[
        35. / 384.,
        0.,
        500. / 1113.,
        125. / 192.,
        -2187. / 6784.,
        11. / 84.,
    ],
];

/// Difference between the fifth and fourth order weights.
const E: [f64; 7] = [
    71. / 57600.,
    0.,
    -71. / 16695.,
    71. / 1920.,
    -17253. / 339200.,
    22. / 525.,
    -1. / 40.,
];

/// Dormand-Prince 5(4) embedded Runge-Kutta pair with FSAL and a fourth-order dense output.
#[derive(Clone, Debug)]
pub struct DormandPrince54<F: Float> {
    safety: F,
    min_reduction: F,
    max_growth: F,
}

impl<F: Float> Default for DormandPrince54<F> {
    fn default() -> Self {
        Self {
            safety: lit(0.9),
            min_reduction: lit(0.2),
            max_growth: lit(10.),
        }
    }
}

impl<F: Float> DormandPrince54<F> {
    /// Set the safety factor applied to the optimal step size.
    pub fn with_safety(self, safety: F) -> Self {
        Self { safety, ..self }
    }

    /// Set the smallest factor by which the step may shrink.
    pub fn with_min_reduction(self, min_reduction: F) -> Self {
        Self {
            min_reduction,
            ..self
        }
    }

    /// Set the largest factor by which the step may grow.
    pub fn with_max_growth(self, max_growth: F) -> Self {
        Self { max_growth, ..self }
    }

    fn estimate_error(
        &self,
        control: &StepSizeControl<F>,
        primary_dimension: usize,
        h: F,
        stages: nd::ArrayView2<F>,
        y: nd::ArrayView1<F>,
        y_new: nd::ArrayView1<F>,
    ) -> F {
        let e: nd::Array1<F> = E.iter().map(|&x| lit(x)).collect();
        let error_terms = stages.t().dot(&e);
        let mut error = F::zero();
        for j in 0..primary_dimension {
            let magnitude = y[j].abs().max(y_new[j].abs());
            let ratio = h * error_terms[j] / control.tolerance().scale(j, magnitude);
            error += ratio * ratio;
        }
        (error / lit(primary_dimension as f64)).sqrt()
    }
}

impl<F: Float> StepAlgorithm for DormandPrince54<F> {
    type Float = F;
    type Kernel = DormandPrinceKernel<F>;

    fn order(&self) -> usize {
        5
    }

    fn is_fsal(&self) -> bool {
        true
    }

    fn new_kernel(&self, dimension: usize) -> Self::Kernel {
        DormandPrinceKernel::new(dimension)
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
        let stages = kernel.stages_mut();
        stages.row_mut(0).assign(&y_dot);

        let mut y_tmp: nd::Array1<F> = nd::Array1::zeros(y.raw_dim());
        for (k, (a_row, &c)) in A.iter().zip(C.iter()).enumerate() {
            let a: nd::Array1<F> = a_row.iter().map(|&x| lit(x)).collect();
            let increment = stages.slice(nd::s![..k + 1, ..]).t().dot(&a);
            nd::Zip::from(&mut y_tmp)
                .and(&y)
                .and(&increment)
                .for_each(|y_tmp, &y, &increment| *y_tmp = y + h * increment);
            evaluator.compute_derivatives(
                t + lit::<F>(c) * h,
                y_tmp.view(),
                stages.row_mut(k + 1),
            )?;
        }
        y_new.assign(&y_tmp);
        y_dot_new.assign(&stages.row(A.len()));

        let error = self.estimate_error(
            control,
            evaluator.primary_dimension(),
            h,
            stages.view(),
            y,
            y_new.view(),
        );
        let factor = (self.safety * error.powf(lit(-0.2)))
            .max(self.min_reduction)
            .min(self.max_growth);
        Ok(StepEstimate {
            accepted: error < F::one(),
            error,
            factor,
        })
    }
}
