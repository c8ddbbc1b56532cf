//! Self-diagnostic suite

pub mod checks;
pub mod environment;
pub mod logger;
pub mod runner;
pub mod suite;
pub mod task;

pub use environment::DiagnosticEnvironment;
pub use logger::{DiagnosticEvent, DiagnosticLogger, DiagnosticSummary};
pub use runner::DiagnosticRunner;
pub use task::{Task, TaskFn, TaskFuture, TaskOutcome, TaskStatus};
