//! Run state threaded through the steps of a build.
//!
//! Data flows forward: each step publishes the resources it owns and later
//! steps read them through typed accessors.

mod run;

pub use run::RunContext;
