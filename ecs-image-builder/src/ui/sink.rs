//! Ui trait and implementations.

use parking_lot::RwLock;
use tracing::{error, info};

/// Operator-facing progress sink.
///
/// Steps announce what they are about to do with [`say`](Ui::say), report
/// details with [`message`](Ui::message) and surface failures with
/// [`error`](Ui::error). Implementations must never fail.
pub trait Ui: Send + Sync {
    /// Announces a step's start or a key action.
    fn say(&self, line: &str);

    /// Reports a detail of the current action.
    fn message(&self, line: &str);

    /// Reports an error.
    fn error(&self, line: &str);
}

/// A Ui that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpUi;

impl Ui for NoOpUi {
    fn say(&self, _line: &str) {}

    fn message(&self, _line: &str) {}

    fn error(&self, _line: &str) {}
}

/// A Ui that writes through the tracing framework.
#[derive(Debug, Clone, Default)]
pub struct TracingUi {
    prefix: Option<String>,
}

impl TracingUi {
    /// Creates a new tracing Ui.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags every line with a builder name.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    fn prefix(&self) -> &str {
        self.prefix.as_deref().unwrap_or("")
    }
}

impl Ui for TracingUi {
    fn say(&self, line: &str) {
        info!(builder = %self.prefix(), "==> {}", line);
    }

    fn message(&self, line: &str) {
        info!(builder = %self.prefix(), "    {}", line);
    }

    fn error(&self, line: &str) {
        error!(builder = %self.prefix(), "{}", line);
    }
}

/// Severity of a collected line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UiLevel {
    /// From `say`.
    Say,
    /// From `message`.
    Message,
    /// From `error`.
    Error,
}

/// A Ui that records every line, for tests.
#[derive(Debug, Default)]
pub struct CollectingUi {
    lines: RwLock<Vec<(UiLevel, String)>>,
}

impl CollectingUi {
    /// Creates a new collecting Ui.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected lines in order.
    #[must_use]
    pub fn lines(&self) -> Vec<(UiLevel, String)> {
        self.lines.read().clone()
    }

    /// Returns the lines recorded at the given level.
    #[must_use]
    pub fn lines_at(&self, level: UiLevel) -> Vec<String> {
        self.lines
            .read()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// Returns true if any line contains `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.lines.read().iter().any(|(_, line)| line.contains(needle))
    }

    /// Returns the number of collected lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.read().is_empty()
    }

    fn push(&self, level: UiLevel, line: &str) {
        self.lines.write().push((level, line.to_string()));
    }
}

impl Ui for CollectingUi {
    fn say(&self, line: &str) {
        self.push(UiLevel::Say, line);
    }

    fn message(&self, line: &str) {
        self.push(UiLevel::Message, line);
    }

    fn error(&self, line: &str) {
        self.push(UiLevel::Error, line);
    }
}
