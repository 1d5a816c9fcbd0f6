//! Console progress for a run. Every step outcome is also kept in memory so
//! the caller can print a summary or assert on it.

use std::sync::{Mutex, MutexGuard};

use crate::errors::HarnessError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: String,
    pub outcome: Outcome,
    pub detail: String,
}

#[derive(Debug, Default)]
struct State {
    current: Option<String>,
    records: Vec<StepRecord>,
}

#[derive(Debug)]
pub struct Reporter {
    echo: bool,
    state: Mutex<State>,
}

impl Reporter {
    /// Prints to stdout as it goes.
    pub fn console() -> Self {
        Self {
            echo: true,
            state: Mutex::new(State::default()),
        }
    }

    /// Records only.
    pub fn silent() -> Self {
        Self {
            echo: false,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a named step; the next `pass` or `fail` is attributed to it.
    pub fn begin(&self, step: impl Into<String>) {
        let step = step.into();
        if self.echo {
            println!("\n--- {step} ---");
        }
        tracing::info!(step = %step, "step started");
        self.state().current = Some(step);
    }

    pub fn progress(&self, message: impl AsRef<str>) {
        if self.echo {
            println!("{}", message.as_ref());
        }
    }

    pub fn pass(&self, detail: impl Into<String>) {
        let detail = detail.into();
        if self.echo {
            println!("{detail}");
        }
        let mut state = self.state();
        let step = state.current.take().unwrap_or_default();
        state.records.push(StepRecord {
            step,
            outcome: Outcome::Passed,
            detail,
        });
    }

    /// Records the failure against the open step and prints the error verbatim.
    pub fn fail(&self, err: &HarnessError) {
        let mut state = self.state();
        let step = state.current.take().unwrap_or_else(|| "run".to_string());
        if self.echo {
            eprintln!("\n{step} FAILED: {err}");
        }
        tracing::error!(step = %step, status = ?err.status(), error = %err, "step failed");
        state.records.push(StepRecord {
            step,
            outcome: Outcome::Failed,
            detail: err.to_string(),
        });
    }

    pub fn records(&self) -> Vec<StepRecord> {
        self.state().records.clone()
    }

    pub fn failed_step(&self) -> Option<StepRecord> {
        self.state()
            .records
            .iter()
            .find(|r| r.outcome == Outcome::Failed)
            .cloned()
    }

    pub fn summary(&self) -> String {
        let state = self.state();
        let passed = state
            .records
            .iter()
            .filter(|r| r.outcome == Outcome::Passed)
            .count();
        match state.records.iter().find(|r| r.outcome == Outcome::Failed) {
            Some(failed) => format!("{passed} step(s) passed, stopped at `{}`", failed.step),
            None => format!("{passed} step(s) passed"),
        }
    }
}
