//! Training Progress Logging
//!
//! Console output for watching a run, plus an optional CSV file for
//! plotting afterwards. One CSV row per training step; validation loss is
//! filled in on the steps that measured it and left empty otherwise.

use crate::error::Result;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

/// Logs training progress to the console and optionally to a CSV file.
pub struct TrainingLogger {
    csv: Option<BufWriter<File>>,
    started: Instant,
}

impl TrainingLogger {
    /// Console-only logger.
    pub fn new() -> Self {
        Self {
            csv: None,
            started: Instant::now(),
        }
    }

    /// Logger that also appends rows to a CSV file at `path`.
    pub fn with_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut csv = BufWriter::new(File::create(path)?);
        writeln!(csv, "step,elapsed_seconds,learning_rate,train_loss,val_loss")?;
        Ok(Self {
            csv: Some(csv),
            started: Instant::now(),
        })
    }

    /// Record one training step.
    pub fn log_step(
        &mut self,
        step: usize,
        learning_rate: f32,
        train_loss: f32,
        val_loss: Option<f32>,
        step_ms: f64,
    ) -> Result<()> {
        println!(
            "step {:>4} | loss {:.6} | {:.2} ms/step",
            step, train_loss, step_ms
        );
        if let Some(csv) = self.csv.as_mut() {
            let val = val_loss.map_or(String::new(), |v| format!("{:.6}", v));
            writeln!(
                csv,
                "{},{:.3},{:e},{:.6},{}",
                step,
                self.started.elapsed().as_secs_f64(),
                learning_rate,
                train_loss,
                val
            )?;
        }
        Ok(())
    }

    /// Record a validation measurement.
    pub fn log_val(&mut self, step: usize, val_loss: f32) {
        println!("step {:>4} | val loss {:.6}", step, val_loss);
    }

    /// Flush the CSV and report total wall time.
    pub fn finish(&mut self) -> Result<()> {
        let elapsed = self.started.elapsed().as_secs_f64();
        println!("total time: {:.1}s", elapsed);
        if let Some(csv) = self.csv.as_mut() {
            csv.flush()?;
        }
        Ok(())
    }
}

impl Default for TrainingLogger {
    fn default() -> Self {
        Self::new()
    }
}
