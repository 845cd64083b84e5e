//! Progress reporting for operators.

mod sink;

pub use sink::{CollectingUi, NoOpUi, TracingUi, Ui, UiLevel};
