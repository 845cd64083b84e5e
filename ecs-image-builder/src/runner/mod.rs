//! The state-machine driver.
//!
//! The [`Runner`] executes steps strictly in order. The first `Halt`,
//! `Cancelled` or panic stops forward progress; then every step whose `run`
//! was invoked is cleaned up in reverse order, one at a time. A panic in a
//! cleanup is reported and the pass moves on to the previous step.

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::Instrument;

use crate::context::RunContext;
use crate::core::{StepAction, StepStatus};
use crate::errors::BuildError;
use crate::observability::StepTimer;
use crate::steps::Step;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every step returned `Continue`.
    Completed,
    /// A step halted or panicked.
    Halted,
    /// The operator cancelled the run.
    Cancelled,
}

/// What happened to one step during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step name.
    pub name: String,
    /// Final status of `run`.
    pub status: StepStatus,
    /// Whether `cleanup` was invoked.
    pub cleaned_up: bool,
}

/// The result of [`Runner::run`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    /// How the run ended.
    pub status: RunStatus,
    /// Per-step records, in sequence order.
    pub steps: Vec<StepRecord>,
}

impl RunOutcome {
    /// Returns the record of `name`.
    #[must_use]
    pub fn step(&self, name: &str) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Returns true if every step completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }
}

/// Drives an ordered sequence of steps with reverse-order cleanup.
#[derive(Debug, Default)]
pub struct Runner {
    steps: Vec<Box<dyn Step>>,
}

impl Runner {
    /// Creates a runner for `steps`.
    #[must_use]
    pub fn new(steps: Vec<Box<dyn Step>>) -> Self {
        Self { steps }
    }

    /// Returns the step names in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Runs the sequence against `ctx`, then cleans up.
    ///
    /// Cancellation is honoured before each step starts. On return the
    /// context carries the halting error, if any.
    pub async fn run(&mut self, ctx: &mut RunContext) -> RunOutcome {
        let run_id = ctx.run_id();
        let mut records: Vec<StepRecord> = self
            .steps
            .iter()
            .map(|s| StepRecord {
                name: s.name().to_string(),
                status: StepStatus::NotStarted,
                cleaned_up: false,
            })
            .collect();

        let mut status = RunStatus::Completed;
        let mut executed = 0;

        for (index, step) in self.steps.iter_mut().enumerate() {
            if ctx.cancellation.is_cancelled() {
                tracing::info!(%run_id, next_step = step.name(), "Run cancelled between steps");
                ctx.mark_cancelled();
                status = RunStatus::Cancelled;
                break;
            }

            let name = step.name().to_string();
            records[index].status = StepStatus::Running;
            executed = index + 1;

            let span = tracing::info_span!("step", step = %name, %run_id);
            let timer = StepTimer::start(&name);
            let outcome = AssertUnwindSafe(step.run(ctx))
                .catch_unwind()
                .instrument(span)
                .await;
            timer.finish("run");

            let action = match outcome {
                Ok(action) => action,
                Err(payload) => {
                    let err = BuildError::Panic {
                        step: name.clone(),
                        message: panic_message(payload.as_ref()),
                    };
                    tracing::error!(step = %name, %run_id, error = %err, "Step panicked");
                    ctx.ui.error(&err.to_string());
                    ctx.mark_halted(err);
                    StepAction::Halt
                }
            };
            records[index].status = StepStatus::from_action(action);

            match action {
                StepAction::Continue => {}
                StepAction::Halt => {
                    if !ctx.halted() {
                        ctx.mark_halted(BuildError::Halted {
                            step: name.clone(),
                            message: "step halted without reporting an error".into(),
                            source: None,
                        });
                    }
                    status = RunStatus::Halted;
                    break;
                }
                StepAction::Cancelled => {
                    ctx.mark_cancelled();
                    status = RunStatus::Cancelled;
                    break;
                }
            }
        }

        for index in (0..executed).rev() {
            let step = &mut self.steps[index];
            let name = records[index].name.clone();

            let span = tracing::info_span!("cleanup", step = %name, %run_id);
            let timer = StepTimer::start(&name);
            let outcome = AssertUnwindSafe(step.cleanup(ctx))
                .catch_unwind()
                .instrument(span)
                .await;
            timer.finish("cleanup");

            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                tracing::error!(step = %name, %run_id, message = %message, "Cleanup panicked");
                ctx.ui
                    .error(&format!("Cleanup of step '{name}' panicked: {message}"));
            }
            records[index].cleaned_up = true;
        }

        tracing::info!(%run_id, ?status, steps_run = executed, "Run finished");
        RunOutcome {
            status,
            steps: records,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
