use std::fmt;
use std::io::{self, Write};

use ndarray as nd;

use super::StepHandler;
use crate::error::HandlerError;
use crate::interpolator::StepInterpolator;
use crate::{Float, to_f64};

/// Writes one table row per handled step to `out`.
pub struct StepLogger<W: Write> {
    out: W,
    num_steps: usize,
    first_time: f64,
    last_time: f64,
    /// Failure while writing the header, reported by the next step.
    pending_error: Option<io::Error>,
}

impl<W: Write> StepLogger<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            num_steps: 0,
            first_time: f64::NAN,
            last_time: f64::NAN,
            pending_error: None,
        }
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_separator(&mut self) -> io::Result<()> {
        writeln!(self.out, "{}", "-".repeat(70))
    }

    fn write_header(&mut self, t0: f64, t: f64) -> io::Result<()> {
        writeln!(self.out, "Integrating from {t0:.6e} to {t:.6e}")?;
        writeln!(
            self.out,
            "{:<8} | {:<14} | {:<14} | {:<14} | {:<5}",
            "Step", "Start", "End", "Size", "Last"
        )?;
        self.write_separator()
    }
}

impl<F: Float, W: Write> StepHandler<F> for StepLogger<W> {
    fn init(&mut self, t0: F, _y0: nd::ArrayView1<F>, t: F) {
        self.num_steps = 0;
        self.first_time = to_f64(t0);
        self.last_time = to_f64(t0);
        self.pending_error = self.write_header(to_f64(t0), to_f64(t)).err();
    }

    fn handle_step(
        &mut self,
        interpolator: &mut dyn StepInterpolator<F>,
        is_last: bool,
    ) -> Result<(), HandlerError> {
        if let Some(error) = self.pending_error.take() {
            return Err(error.into());
        }
        self.num_steps += 1;
        let start = to_f64(interpolator.previous_time());
        let end = to_f64(interpolator.current_time());
        self.last_time = end;
        writeln!(
            self.out,
            "{:<8} | {:<14.6e} | {:<14.6e} | {:<14.6e} | {:<5}",
            self.num_steps,
            start,
            end,
            end - start,
            is_last
        )?;
        if is_last {
            self.write_separator()?;
            let summary = self.to_string();
            writeln!(self.out, "{summary}")?;
        }
        Ok(())
    }
}

impl<W: Write> fmt::Display for StepLogger<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps from {:.6e} to {:.6e}",
            self.num_steps, self.first_time, self.last_time
        )
    }
}
