use std::io::{self, Read, Write};

use ndarray as nd;

use super::{InterpolationKernel, InterpolatorCore, read_array, write_array};
use crate::{Float, lit};

/// Cubic Hermite interpolation from the states and derivatives at both step ends.
///
/// Evaluation switches between a form anchored at the start of the step and one anchored at its
/// end, so both bounds are reproduced exactly. Interior error is bounded by `h^4 / 384` times the
/// largest fourth derivative over the step.
#[derive(Clone, Debug)]
pub struct HermiteKernel<F> {
    y_dot_start: nd::Array1<F>,
    y_dot_end: nd::Array1<F>,
    /// Rows `a2`, `a3` and `b2`, computed lazily.
    coefficients: Option<nd::Array2<F>>,
}

impl<F: Float> HermiteKernel<F> {
    pub fn new(dimension: usize) -> Self {
        Self {
            y_dot_start: nd::Array1::zeros(dimension),
            y_dot_end: nd::Array1::zeros(dimension),
            coefficients: None,
        }
    }

    /// Store the derivatives at both ends of a new step.
    pub fn load(&mut self, y_dot_start: nd::ArrayView1<F>, y_dot_end: nd::ArrayView1<F>) {
        self.y_dot_start.assign(&y_dot_start);
        self.y_dot_end.assign(&y_dot_end);
        self.coefficients = None;
    }
}

fn compute_coefficients<F: Float>(
    core: &InterpolatorCore<F>,
    f0: &nd::Array1<F>,
    f1: &nd::Array1<F>,
) -> nd::Array2<F> {
    let h = core.h();
    let three: F = lit(3.);
    let two: F = lit(2.);
    let mut coefficients = nd::Array2::zeros((3, core.dimension()));
    nd::Zip::from(coefficients.columns_mut())
        .and(&core.previous_state())
        .and(&core.current_state())
        .and(f0)
        .and(f1)
        .for_each(|mut c, &y0, &y1, &f0, &f1| {
            let delta = y1 - y0;
            c[0] = three * delta - h * (two * f0 + f1);
            c[1] = h * (f0 + f1) - two * delta;
            c[2] = h * (f0 + two * f1) - three * delta;
        });
    coefficients
}

impl<F: Float> InterpolationKernel<F> for HermiteKernel<F> {
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
            derivatives.assign(&self.y_dot_start);
            return;
        }

        let coefficients = self
            .coefficients
            .get_or_insert_with(|| compute_coefficients(core, &self.y_dot_start, &self.y_dot_end));
        let (a2, a3, b2) = (
            coefficients.row(0),
            coefficients.row(1),
            coefficients.row(2),
        );
        let two: F = lit(2.);
        let three: F = lit(3.);

        if theta <= lit(0.5) {
            nd::Zip::from(&mut state)
                .and(&mut derivatives)
                .and(&core.previous_state())
                .and(&self.y_dot_start)
                .and(&a2)
                .and(&a3)
                .for_each(|y, y_dot, &y0, &f0, &a2, &a3| {
                    *y = y0 + theta * (h * f0 + theta * (a2 + theta * a3));
                    *y_dot = (h * f0 + theta * (two * a2 + three * theta * a3)) / h;
                });
        } else {
            let eta = one_minus_theta_h / h;
            nd::Zip::from(&mut state)
                .and(&mut derivatives)
                .and(&core.current_state())
                .and(&self.y_dot_end)
                .and(&b2)
                .and(&a3)
                .for_each(|y, y_dot, &y1, &f1, &b2, &a3| {
                    let b3 = -a3;
                    *y = y1 + eta * (-h * f1 + eta * (b2 + eta * b3));
                    *y_dot = (h * f1 - eta * (two * b2 + three * eta * b3)) / h;
                });
        }
    }

    fn finalize(&mut self, core: &InterpolatorCore<F>) {
        if self.coefficients.is_none() {
            self.coefficients =
                Some(compute_coefficients(core, &self.y_dot_start, &self.y_dot_end));
        }
    }

    fn write_to(&self, output: &mut dyn Write) -> io::Result<()> {
        write_array(output, self.y_dot_start.view())?;
        write_array(output, self.y_dot_end.view())
    }

    fn read_from(input: &mut dyn Read, dimension: usize) -> io::Result<Self> {
        let y_dot_start = read_array(input, dimension)?;
        let y_dot_end = read_array(input, dimension)?;
        Ok(Self {
            y_dot_start,
            y_dot_end,
            coefficients: None,
        })
    }
}
