//! Sequential diagnostic runner

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{error, warn};

use crate::diagnostics::environment::DiagnosticEnvironment;
use crate::diagnostics::logger::{DiagnosticEvent, DiagnosticLogger, DiagnosticSummary};
use crate::diagnostics::suite::default_tasks;
use crate::diagnostics::task::{Task, TaskOutcome, TaskStatus};
use crate::errors::ControllerError;

/// Runs tasks one after another against a shared environment
pub struct DiagnosticRunner {
    tasks: Vec<Task>,
    environment: DiagnosticEnvironment,
    logger: DiagnosticLogger,
}

impl DiagnosticRunner {
    /// Runner with the built-in task table
    pub fn new(environment: DiagnosticEnvironment) -> Self {
        Self::with_tasks(default_tasks(), environment)
    }

    pub fn with_tasks(tasks: Vec<Task>, environment: DiagnosticEnvironment) -> Self {
        Self {
            tasks,
            environment,
            logger: DiagnosticLogger::new(),
        }
    }

    /// Stream status changes and log lines from now on.
    pub fn subscribe(&mut self) -> UnboundedReceiver<DiagnosticEvent> {
        let (tx, rx) = unbounded_channel();
        self.logger = self.logger.clone().with_events(tx);
        rx
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn logs(&self) -> Vec<String> {
        self.logger.lines()
    }

    pub fn environment(&self) -> &DiagnosticEnvironment {
        &self.environment
    }

    pub fn environment_mut(&mut self) -> &mut DiagnosticEnvironment {
        &mut self.environment
    }

    pub fn summary(&self) -> DiagnosticSummary {
        let mut summary = DiagnosticSummary::default();
        for task in &self.tasks {
            match task.status() {
                TaskStatus::Success => summary.success += 1,
                TaskStatus::Warning => summary.warning += 1,
                TaskStatus::Failure => summary.failure += 1,
                TaskStatus::Waiting | TaskStatus::Running => {}
            }
        }
        summary
    }

    /// Reset every task and run the whole table in order.
    pub async fn run(&mut self) -> DiagnosticSummary {
        self.logger.clear();
        for index in 0..self.tasks.len() {
            self.transition(index, TaskStatus::Waiting);
        }
        for index in 0..self.tasks.len() {
            self.execute(index).await;
        }

        let summary = self.summary();
        self.logger.log(format!(
            "Diagnostics finished: {} passed, {} warnings, {} failed",
            summary.success, summary.warning, summary.failure
        ));
        self.logger.emit(DiagnosticEvent::Finished(summary));
        summary
    }

    /// Run a single task, resetting it first if it already ran.
    pub async fn run_task(&mut self, index: usize) -> Result<TaskStatus, ControllerError> {
        if index >= self.tasks.len() {
            return Err(ControllerError::ValidationError(format!(
                "No diagnostic task at index {}",
                index
            )));
        }
        if self.tasks[index].status() != TaskStatus::Waiting {
            self.transition(index, TaskStatus::Waiting);
        }
        Ok(self.execute(index).await)
    }

    async fn execute(&mut self, index: usize) -> TaskStatus {
        let name = self.tasks[index].name().to_string();
        let function = self.tasks[index].function();

        self.transition(index, TaskStatus::Running);
        self.logger.log(format!("Starting task: {}", name));

        let logger = &self.logger;
        let environment = &mut self.environment;
        let result = AssertUnwindSafe(async move { function(logger, environment).await })
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                self.logger.log(format!("Error in task '{}': {}", name, e));
                TaskOutcome::Failure
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string());
                error!("Task '{}' panicked: {}", name, message);
                self.logger.log(format!("Error in task '{}': {}", name, message));
                TaskOutcome::Failure
            }
        };

        let status = outcome.status();
        self.transition(index, status);
        match status {
            TaskStatus::Success => self.logger.log(format!("Task succeeded: {}", name)),
            TaskStatus::Warning => self.logger.log(format!("Task finished with warnings: {}", name)),
            _ => self.logger.log(format!("Task failed: {}", name)),
        }
        status
    }

    fn transition(&mut self, index: usize, status: TaskStatus) {
        let task = &mut self.tasks[index];
        if let Err(e) = task.set_status(status) {
            warn!("{}", e);
            return;
        }
        self.logger.emit(DiagnosticEvent::StatusChanged {
            index,
            name: task.name().to_string(),
            status,
        });
    }
}
