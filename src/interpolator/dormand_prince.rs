use std::io::{self, Read, Write};

use ndarray as nd;

use super::{InterpolationKernel, InterpolatorCore, read_array, write_array};
use crate::{Float, lit};

/// Dense output weights of the Dormand-Prince 5(4) pair (Hairer, Norsett, Wanner, II.6).
const D: [f64; 7] = [
    -12715105075.0 / 11282082432.0,
    0.0,
    87487479700.0 / 32700410799.0,
    -10690763975.0 / 1880347072.0,
    701980252875.0 / 199316789632.0,
    -1453857185.0 / 822651844.0,
    69997945.0 / 29380423.0,
];

/// Number of stages stored per step.
pub(crate) const STAGES: usize = 7;

/// Fourth-order continuous extension of the Dormand-Prince 5(4) pair.
#[derive(Clone, Debug)]
pub struct DormandPrinceKernel<F> {
    /// Stage derivatives, one row per stage.
    y_dot_k: nd::Array2<F>,
    /// Rows `c1` to `c4` of the dense polynomial, computed lazily.
    dense: Option<nd::Array2<F>>,
}

impl<F: Float> DormandPrinceKernel<F> {
    pub fn new(dimension: usize) -> Self {
        Self {
            y_dot_k: nd::Array2::zeros((STAGES, dimension)),
            dense: None,
        }
    }

    pub fn stages(&self) -> nd::ArrayView2<F> {
        self.y_dot_k.view()
    }

    /// Stage storage for a new step.
    pub fn stages_mut(&mut self) -> &mut nd::Array2<F> {
        self.dense = None;
        &mut self.y_dot_k
    }
}

fn compute_dense<F: Float>(core: &InterpolatorCore<F>, y_dot_k: &nd::Array2<F>) -> nd::Array2<F> {
    let h = core.h();
    let d: nd::Array1<F> = D.iter().map(|&x| lit(x)).collect();
    let weighted = y_dot_k.t().dot(&d);

    let mut dense = nd::Array2::zeros((4, core.dimension()));
    nd::Zip::from(dense.columns_mut())
        .and(&core.previous_state())
        .and(&core.current_state())
        .and(y_dot_k.columns())
        .and(&weighted)
        .for_each(|mut c, &y0, &y1, k, &w| {
            c[0] = y1 - y0;
            c[1] = h * k[0] - c[0];
            c[2] = c[0] - h * k[STAGES - 1] - c[1];
            c[3] = h * w;
        });
    dense
}

impl<F: Float> InterpolationKernel<F> for DormandPrinceKernel<F> {
    fn interpolate(
        &mut self,
        core: &InterpolatorCore<F>,
        theta: F,
        one_minus_theta_h: F,
        mut state: nd::ArrayViewMut1<F>,
        mut derivatives: nd::ArrayViewMut1<F>,
    ) {
        let h = core.h();
        if h == F::zero() {
            state.assign(&core.current_state());
            derivatives.assign(&self.y_dot_k.row(0));
            return;
        }

        let dense = self
            .dense
            .get_or_insert_with(|| compute_dense(core, &self.y_dot_k));
        let one = F::one();
        let two: F = lit(2.);
        let three: F = lit(3.);
        let eta = one - theta;
        let d_c2 = one - two * theta;
        let d_c3 = theta * (two - three * theta);
        let d_c4 = two * theta * eta * d_c2;

        if theta <= lit(0.5) {
            nd::Zip::from(&mut state)
                .and(&core.previous_state())
                .and(dense.columns())
                .for_each(|y, &y0, c| {
                    *y = y0 + theta * (c[0] + eta * (c[1] + theta * (c[2] + eta * c[3])));
                });
        } else {
            let eta = one_minus_theta_h / h;
            nd::Zip::from(&mut state)
                .and(&core.current_state())
                .and(dense.columns())
                .for_each(|y, &y1, c| {
                    *y = y1 + eta * (theta * (c[1] + theta * (c[2] + eta * c[3])) - c[0]);
                });
        }
        nd::Zip::from(&mut derivatives)
            .and(dense.columns())
            .for_each(|y_dot, c| {
                *y_dot = (c[0] + d_c2 * c[1] + d_c3 * c[2] + d_c4 * c[3]) / h;
            });
    }

    fn finalize(&mut self, core: &InterpolatorCore<F>) {
        if self.dense.is_none() {
            self.dense = Some(compute_dense(core, &self.y_dot_k));
        }
    }

    fn write_to(&self, output: &mut dyn Write) -> io::Result<()> {
        for row in self.y_dot_k.rows() {
            write_array(output, row)?;
        }
        Ok(())
    }

    fn read_from(input: &mut dyn Read, dimension: usize) -> io::Result<Self> {
        let mut values = Vec::new();
        for _ in 0..STAGES {
            values.extend(read_array::<F>(input, dimension)?);
        }
        let y_dot_k = nd::Array2::from_shape_vec((STAGES, dimension), values)
            .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
        Ok(Self {
            y_dot_k,
            dense: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpolator::{Interpolator, StepInterpolator};

    /// Step of `y' = 1` over `[0, 0.5]`, where every stage equals one.
    fn linear_step() -> Interpolator<f64, DormandPrinceKernel<f64>> {
        let mut interpolator =
            Interpolator::new(DormandPrinceKernel::new(1), nd::array![0.].view(), true);
        interpolator.shift();
        interpolator.set_current_state(nd::array![0.5].view());
        interpolator.kernel_mut().stages_mut().fill(1.);
        interpolator.store_time(0.5);
        interpolator
    }

    #[test]
    fn reproduces_linear_solution() {
        let mut interpolator = linear_step();
        for t in [0., 0.1, 0.25, 0.4, 0.5] {
            interpolator.set_interpolated_time(t);
            approx::assert_relative_eq!(
                interpolator.interpolated_state()[0],
                t,
                epsilon = 1e-15
            );
            approx::assert_relative_eq!(
                interpolator.interpolated_derivatives()[0],
                1.,
                epsilon = 1e-12
            );
        }
        interpolator.set_interpolated_time(0.5);
        assert_eq!(interpolator.interpolated_state()[0], 0.5);
    }

    #[test]
    fn dense_weights_sum_to_zero() {
        approx::assert_abs_diff_eq!(D.iter().sum::<f64>(), 0., epsilon = 1e-12);
    }

    #[test]
    fn persistence_round_trip() {
        let mut interpolator = linear_step();
        let mut bytes = Vec::new();
        interpolator.write_to(&mut bytes).unwrap();
        let mut restored =
            Interpolator::<f64, DormandPrinceKernel<f64>>::read_from(&mut bytes.as_slice())
                .unwrap();
        assert_eq!(restored.kernel().stages(), interpolator.kernel().stages());
        restored.set_interpolated_time(0.2);
        approx::assert_relative_eq!(restored.interpolated_state()[0], 0.2, epsilon = 1e-15);
    }

    #[test]
    fn huge_stage_count_fails_without_allocating() {
        let mut bytes: &[u8] = &[0u8; 64];
        let error = DormandPrinceKernel::<f64>::read_from(&mut bytes, usize::MAX / 8).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::UnexpectedEof);
    }
}
