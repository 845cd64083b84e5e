//! Mock steps for runner tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::context::RunContext;
use crate::core::StepAction;
use crate::errors::BuildError;
use crate::steps::Step;

/// Shared, ordered log of `run:<name>` and `cleanup:<name>` entries.
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Creates an empty journal.
#[must_use]
pub fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

/// What a [`MockStep`] does when run.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Returns `Continue`.
    Continue,
    /// Records a precondition error and returns `Halt`.
    Halt(String),
    /// Returns `Halt` without recording an error.
    HaltSilently,
    /// Cancels the run token, then returns `Continue`.
    Cancel(String),
    /// Panics with the message.
    Panic(String),
}

/// A step that journals its calls and behaves as configured.
#[derive(Debug)]
pub struct MockStep {
    name: String,
    behavior: MockBehavior,
    panic_on_cleanup: bool,
    journal: Journal,
}

impl MockStep {
    /// Creates a step with the given behavior.
    #[must_use]
    pub fn new(name: impl Into<String>, behavior: MockBehavior, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            behavior,
            panic_on_cleanup: false,
            journal: Arc::clone(journal),
        }
    }

    /// A step that succeeds.
    #[must_use]
    pub fn continuing(name: impl Into<String>, journal: &Journal) -> Self {
        Self::new(name, MockBehavior::Continue, journal)
    }

    /// A step that halts with `reason`.
    #[must_use]
    pub fn halting(name: impl Into<String>, reason: impl Into<String>, journal: &Journal) -> Self {
        Self::new(name, MockBehavior::Halt(reason.into()), journal)
    }

    /// A step that cancels the run and then succeeds.
    #[must_use]
    pub fn cancelling(name: impl Into<String>, journal: &Journal) -> Self {
        Self::new(
            name,
            MockBehavior::Cancel("operator interrupt".into()),
            journal,
        )
    }

    /// A step that panics while running.
    #[must_use]
    pub fn panicking(name: impl Into<String>, journal: &Journal) -> Self {
        Self::new(name, MockBehavior::Panic("step exploded".into()), journal)
    }

    /// Makes cleanup panic as well.
    #[must_use]
    pub fn panic_on_cleanup(mut self) -> Self {
        self.panic_on_cleanup = true;
        self
    }

    /// Boxes the step for a runner sequence.
    #[must_use]
    pub fn boxed(self) -> Box<dyn Step> {
        Box::new(self)
    }
}

#[async_trait]
impl Step for MockStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&mut self, ctx: &mut RunContext) -> StepAction {
        self.journal.lock().push(format!("run:{}", self.name));
        match &self.behavior {
            MockBehavior::Continue => StepAction::Continue,
            MockBehavior::Halt(reason) => {
                ctx.mark_halted(BuildError::precondition(reason.clone()));
                StepAction::Halt
            }
            MockBehavior::HaltSilently => StepAction::Halt,
            MockBehavior::Cancel(reason) => {
                ctx.cancellation.cancel(reason.clone());
                StepAction::Continue
            }
            MockBehavior::Panic(message) => panic!("{message}"),
        }
    }

    async fn cleanup(&mut self, _ctx: &mut RunContext) {
        self.journal.lock().push(format!("cleanup:{}", self.name));
        if self.panic_on_cleanup {
            panic!("cleanup of {} exploded", self.name);
        }
    }
}
