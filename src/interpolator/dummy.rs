use std::io::{self, Read, Write};

use ndarray as nd;

use super::{InterpolationKernel, InterpolatorCore, read_array, write_array};
use crate::Float;

/// Kernel without dense output: every time maps to the end of the step.
#[derive(Clone, Debug)]
pub struct DummyKernel<F> {
    current_derivatives: nd::Array1<F>,
}

impl<F: Float> DummyKernel<F> {
    pub fn new(current_derivatives: nd::Array1<F>) -> Self {
        Self {
            current_derivatives,
        }
    }

    pub fn set_current_derivatives(&mut self, derivatives: nd::ArrayView1<F>) {
        self.current_derivatives.assign(&derivatives);
    }
}

impl<F: Float> InterpolationKernel<F> for DummyKernel<F> {
    fn interpolate(
        &mut self,
        core: &InterpolatorCore<F>,
        _theta: F,
        _one_minus_theta_h: F,
        mut state: nd::ArrayViewMut1<F>,
        mut derivatives: nd::ArrayViewMut1<F>,
    ) {
        state.assign(&core.current_state());
        derivatives.assign(&self.current_derivatives);
    }

    fn write_to(&self, output: &mut dyn Write) -> io::Result<()> {
        write_array(output, self.current_derivatives.view())
    }

    fn read_from(input: &mut dyn Read, dimension: usize) -> io::Result<Self> {
        Ok(Self::new(read_array(input, dimension)?))
    }
}
