//! Dense output over the last accepted step.
//!
//! An [`Interpolator`] keeps the state at both ends of the current step together with a
//! method-specific [`InterpolationKernel`]. Step handlers see it through the object-safe
//! [`StepInterpolator`] trait and may restrict themselves to a narrower "soft" window inside the
//! raw step while events are being processed.

mod dormand_prince;
mod dummy;
mod hermite;

use std::io::{self, Read, Write};

use ndarray as nd;

pub use dormand_prince::DormandPrinceKernel;
pub use dummy::DummyKernel;
pub use hermite::HermiteKernel;

use crate::{Float, lit, to_f64};

/// View of one integration step offered to step handlers.
pub trait StepInterpolator<F: Float> {
    /// Start of the window the handler should consider.
    fn previous_time(&self) -> F;
    /// End of the window the handler should consider.
    fn current_time(&self) -> F;
    /// Start of the raw step taken by the integrator.
    fn global_previous_time(&self) -> F;
    /// End of the raw step taken by the integrator.
    fn global_current_time(&self) -> F;
    fn interpolated_time(&self) -> F;
    fn set_interpolated_time(&mut self, time: F);
    fn is_forward(&self) -> bool;
    /// State at the interpolated time.
    fn interpolated_state(&mut self) -> nd::Array1<F>;
    /// Derivatives at the interpolated time.
    fn interpolated_derivatives(&mut self) -> nd::Array1<F>;
    /// Complete any deferred computation so the interpolator no longer depends on the integrator.
    fn finalize_step(&mut self);
    /// Independent, finalized snapshot of this interpolator.
    fn copy(&mut self) -> Box<dyn StepInterpolator<F>>;
}

/// Method-specific part of an [`Interpolator`].
pub trait InterpolationKernel<F: Float>: Clone {
    /// Write state and derivatives at `theta` into the output views.
    ///
    /// `theta` is the normalized position in the raw step and `one_minus_theta_h` is the time
    /// remaining until its end. Both are exact at the step bounds.
    fn interpolate(
        &mut self,
        core: &InterpolatorCore<F>,
        theta: F,
        one_minus_theta_h: F,
        state: nd::ArrayViewMut1<F>,
        derivatives: nd::ArrayViewMut1<F>,
    );

    /// Deferred work run at most once per step.
    fn finalize(&mut self, _core: &InterpolatorCore<F>) {}

    fn write_to(&self, output: &mut dyn Write) -> io::Result<()>;

    fn read_from(input: &mut dyn Read, dimension: usize) -> io::Result<Self>;
}

/// State and derivatives cached for the current interpolated time.
#[derive(Clone, Debug)]
struct ComputedState<F> {
    state: nd::Array1<F>,
    derivatives: nd::Array1<F>,
}

/// Bookkeeping shared by every interpolator.
#[derive(Clone, Debug)]
pub struct InterpolatorCore<F: Float> {
    global_previous_time: F,
    global_current_time: F,
    soft_previous_time: F,
    soft_current_time: F,
    h: F,
    interpolated_time: F,
    previous_state: nd::Array1<F>,
    current_state: nd::Array1<F>,
    forward: bool,
    cache: Option<ComputedState<F>>,
    finalized: bool,
}

impl<F: Float> InterpolatorCore<F> {
    /// Signed size of the raw step.
    pub fn h(&self) -> F {
        self.h
    }

    /// State at the start of the raw step.
    pub fn previous_state(&self) -> nd::ArrayView1<F> {
        self.previous_state.view()
    }

    /// State at the end of the raw step.
    pub fn current_state(&self) -> nd::ArrayView1<F> {
        self.current_state.view()
    }

    pub fn dimension(&self) -> usize {
        self.current_state.len()
    }
}

/// Concrete step interpolator combining the shared bookkeeping with a kernel.
#[derive(Clone, Debug)]
pub struct Interpolator<F: Float, K> {
    core: InterpolatorCore<F>,
    kernel: K,
}

impl<F: Float, K: InterpolationKernel<F>> Interpolator<F, K> {
    /// Interpolator positioned at time zero with `state` at both ends of an empty step.
    pub fn new(kernel: K, state: nd::ArrayView1<F>, forward: bool) -> Self {
        Self {
            core: InterpolatorCore {
                global_previous_time: F::zero(),
                global_current_time: F::zero(),
                soft_previous_time: F::zero(),
                soft_current_time: F::zero(),
                h: F::zero(),
                interpolated_time: F::zero(),
                previous_state: state.to_owned(),
                current_state: state.to_owned(),
                forward,
                cache: None,
                finalized: true,
            },
            kernel,
        }
    }

    pub fn core(&self) -> &InterpolatorCore<F> {
        &self.core
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Mutable access to the kernel. Cached interpolation results are dropped.
    pub fn kernel_mut(&mut self) -> &mut K {
        self.core.cache = None;
        &mut self.kernel
    }

    /// Start a new step at the end of the current one.
    pub fn shift(&mut self) {
        self.core.global_previous_time = self.core.global_current_time;
        self.core.soft_previous_time = self.core.global_previous_time;
        self.core.soft_current_time = self.core.global_current_time;
        self.core.previous_state.assign(&self.core.current_state);
        self.core.cache = None;
    }

    /// Set the end of the raw step and move the interpolated time there.
    pub fn store_time(&mut self, t: F) {
        self.core.global_current_time = t;
        self.core.soft_current_time = t;
        self.core.h = self.core.global_current_time - self.core.global_previous_time;
        self.core.finalized = false;
        self.move_interpolated_time(t);
    }

    fn move_interpolated_time(&mut self, time: F) {
        if time != self.core.interpolated_time {
            self.core.cache = None;
        }
        self.core.interpolated_time = time;
    }

    fn finalize(&mut self) {
        if !self.core.finalized {
            self.kernel.finalize(&self.core);
            self.core.finalized = true;
        }
    }

    /// Set the state at the end of the raw step.
    pub fn set_current_state(&mut self, state: nd::ArrayView1<F>) {
        self.core.current_state.assign(&state);
        self.core.cache = None;
    }

    /// Restrict the start of the window handlers should consider.
    pub fn set_soft_previous_time(&mut self, t: F) {
        self.core.soft_previous_time = t;
    }

    /// Restrict the end of the window handlers should consider.
    pub fn set_soft_current_time(&mut self, t: F) {
        self.core.soft_current_time = t;
    }

    fn computed(&mut self) -> &ComputedState<F> {
        let computed = match self.core.cache.take() {
            Some(computed) => computed,
            None => {
                let core = &self.core;
                let one_minus_theta_h = core.global_current_time - core.interpolated_time;
                let theta = if core.h == F::zero() {
                    F::zero()
                } else {
                    (core.h - one_minus_theta_h) / core.h
                };
                let mut state = nd::Array1::zeros(core.dimension());
                let mut derivatives = nd::Array1::zeros(core.dimension());
                self.kernel.interpolate(
                    core,
                    theta,
                    one_minus_theta_h,
                    state.view_mut(),
                    derivatives.view_mut(),
                );
                ComputedState { state, derivatives }
            }
        };
        self.core.cache.insert(computed)
    }

    /// Serialize the interpolator, finalizing it first.
    ///
    /// Values are written as little-endian `f64` so data round-trips between float types.
    pub fn write_to<W: Write>(&mut self, output: &mut W) -> io::Result<()> {
        self.finalize();
        let core = &self.core;
        write_usize(output, core.dimension())?;
        for value in [
            core.global_previous_time,
            core.global_current_time,
            core.soft_previous_time,
            core.soft_current_time,
            core.h,
            core.interpolated_time,
        ] {
            write_float(output, value)?;
        }
        output.write_all(&[u8::from(core.forward)])?;
        write_array(output, core.previous_state.view())?;
        write_array(output, core.current_state.view())?;
        self.kernel.write_to(output)
    }

    /// Restore an interpolator written by [`Interpolator::write_to`].
    pub fn read_from<R: Read>(input: &mut R) -> io::Result<Self> {
        let dimension = read_usize(input)?;
        let mut times = [F::zero(); 6];
        for time in &mut times {
            *time = read_float(input)?;
        }
        let [
            global_previous_time,
            global_current_time,
            soft_previous_time,
            soft_current_time,
            h,
            interpolated_time,
        ] = times;
        let mut forward = [0u8];
        input.read_exact(&mut forward)?;
        let previous_state = read_array(input, dimension)?;
        let current_state = read_array(input, dimension)?;
        let kernel = K::read_from(input, dimension)?;
        Ok(Self {
            core: InterpolatorCore {
                global_previous_time,
                global_current_time,
                soft_previous_time,
                soft_current_time,
                h,
                interpolated_time,
                previous_state,
                current_state,
                forward: forward[0] != 0,
                cache: None,
                finalized: true,
            },
            kernel,
        })
    }
}

impl<F: Float, K: InterpolationKernel<F> + 'static> StepInterpolator<F> for Interpolator<F, K> {
    fn previous_time(&self) -> F {
        self.core.soft_previous_time
    }

    fn current_time(&self) -> F {
        self.core.soft_current_time
    }

    fn global_previous_time(&self) -> F {
        self.core.global_previous_time
    }

    fn global_current_time(&self) -> F {
        self.core.global_current_time
    }

    fn interpolated_time(&self) -> F {
        self.core.interpolated_time
    }

    fn set_interpolated_time(&mut self, time: F) {
        self.move_interpolated_time(time);
    }

    fn is_forward(&self) -> bool {
        self.core.forward
    }

    fn interpolated_state(&mut self) -> nd::Array1<F> {
        self.computed().state.clone()
    }

    fn interpolated_derivatives(&mut self) -> nd::Array1<F> {
        self.computed().derivatives.clone()
    }

    fn finalize_step(&mut self) {
        self.finalize();
    }

    fn copy(&mut self) -> Box<dyn StepInterpolator<F>> {
        self.finalize_step();
        Box::new(self.clone())
    }
}

fn write_usize(output: &mut dyn Write, value: usize) -> io::Result<()> {
    output.write_all(&(value as u64).to_le_bytes())
}

fn read_usize(input: &mut dyn Read) -> io::Result<usize> {
    let mut bytes = [0u8; 8];
    input.read_exact(&mut bytes)?;
    usize::try_from(u64::from_le_bytes(bytes))
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))
}

pub(crate) fn write_float<F: Float>(output: &mut dyn Write, value: F) -> io::Result<()> {
    output.write_all(&to_f64(value).to_le_bytes())
}

pub(crate) fn read_float<F: Float>(input: &mut dyn Read) -> io::Result<F> {
    let mut bytes = [0u8; 8];
    input.read_exact(&mut bytes)?;
    Ok(lit(f64::from_le_bytes(bytes)))
}

pub(crate) fn write_array<F: Float>(
    output: &mut dyn Write,
    values: nd::ArrayView1<F>,
) -> io::Result<()> {
    values
        .iter()
        .try_for_each(|&value| write_float(output, value))
}

/// Read `dimension` values.
///
/// Storage grows with the bytes actually read, so a corrupted length fails on end of input
/// instead of allocating up front.
pub(crate) fn read_array<F: Float>(
    input: &mut dyn Read,
    dimension: usize,
) -> io::Result<nd::Array1<F>> {
    let mut values = Vec::new();
    for _ in 0..dimension {
        values.push(read_float(input)?);
    }
    Ok(nd::Array1::from_vec(values))
}
