use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use log::info;

use super::apply::{apply, ApplyRequest};
use super::resolver::{aligned, resolve, Criteria, RepeatPolicy};
use super::transform::Transform;
use super::versioner::OperationFolder;
use crate::confirm::Confirm;
use crate::error::Result;
use crate::store::Store;

/// Progress of a sweep after one call completed.
#[derive(Debug, Clone)]
pub struct Progress<'a> {
    pub function: &'a str,
    pub completed: usize,
    pub total: usize,
    pub elapsed: Duration,
    /// Input paths of the call that just finished.
    pub identifier: &'a [String],
}

impl Progress<'_> {
    /// Estimated time left, extrapolated from the average call so far.
    pub fn remaining(&self) -> Option<Duration> {
        if self.completed == 0 {
            return None;
        }
        let left = self.total.saturating_sub(self.completed) as f64;
        Some(self.elapsed.mul_f64(left / self.completed as f64))
    }

    pub fn is_done(&self) -> bool {
        self.completed >= self.total
    }
}

impl fmt::Display for Progress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_done() {
            return write!(
                f,
                "{} complete! {} processes performed in {}s.",
                self.function,
                self.completed,
                self.elapsed.as_secs()
            );
        }
        write!(
            f,
            "{}: {} of {} complete. ",
            self.function, self.completed, self.total
        )?;
        match self.remaining() {
            Some(left) => write!(f, "{}s remaining. ", left.as_secs())?,
            None => write!(f, "Unknown time remaining. ")?,
        }
        write!(f, "{:?}", self.identifier)
    }
}

/// What a finished sweep did.
#[derive(Debug, Clone)]
pub struct SweepSummary {
    /// Folder of the last call that wrote output, if any did.
    pub operation: Option<OperationFolder>,
    pub calls: usize,
    /// Calls that returned outputs.
    pub produced: usize,
    pub elapsed: Duration,
}

/// Apply `transform` to every aligned input set matched by `criteria`.
///
/// The first call that produces outputs allocates a new operation folder and
/// every later call reuses it, so one sweep lands under one folder and never
/// in an earlier run's. The template's `inputs` and `increment` are replaced
/// per call. Errors are not caught: the first
/// failing call stops the sweep.
pub fn run(
    store_path: &Path,
    transform: &dyn Transform,
    criteria: &Criteria,
    repeat: Option<RepeatPolicy>,
    template: &ApplyRequest,
    confirm: &dyn Confirm,
    on_progress: &mut dyn FnMut(&Progress<'_>),
) -> Result<SweepSummary> {
    let input_sets = {
        let store = Store::open(store_path)?;
        aligned(&resolve(&store, criteria, repeat)?)
    };

    let total = input_sets.len();
    let start = Instant::now();
    let mut summary = SweepSummary {
        operation: None,
        calls: 0,
        produced: 0,
        elapsed: Duration::ZERO,
    };

    for (index, inputs) in input_sets.iter().enumerate() {
        let request = ApplyRequest {
            inputs: inputs.clone(),
            // Allocate until a call has produced its folder, then reuse it.
            increment: summary.operation.is_none(),
            ..template.clone()
        };
        if let Some(applied) = apply(store_path, transform, &request, confirm)? {
            summary.operation = Some(applied.operation);
            summary.produced += 1;
        }
        summary.calls += 1;

        let progress = Progress {
            function: transform.name(),
            completed: index + 1,
            total,
            elapsed: start.elapsed(),
            identifier: inputs,
        };
        info!("{progress}");
        on_progress(&progress);
    }

    summary.elapsed = start.elapsed();
    Ok(summary)
}
