//! Diagnostic task and its status machine

use std::fmt;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::diagnostics::environment::DiagnosticEnvironment;
use crate::diagnostics::logger::DiagnosticLogger;
use crate::errors::ControllerError;

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Waiting,
    Running,
    Success,
    Failure,
    Warning,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failure | TaskStatus::Warning
        )
    }

    /// `Waiting -> Running -> terminal`, and back to `Waiting` on reset.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (_, TaskStatus::Waiting) => true,
            (TaskStatus::Waiting, TaskStatus::Running) => true,
            (TaskStatus::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failure => "failure",
            TaskStatus::Warning => "warning",
        };
        f.write_str(label)
    }
}

/// What a task function reports. Codes: 0 fail, 1 success, 2 warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Failure = 0,
    Success = 1,
    Warning = 2,
}

impl TaskOutcome {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn status(self) -> TaskStatus {
        match self {
            TaskOutcome::Failure => TaskStatus::Failure,
            TaskOutcome::Success => TaskStatus::Success,
            TaskOutcome::Warning => TaskStatus::Warning,
        }
    }
}

impl TryFrom<i32> for TaskOutcome {
    type Error = ControllerError;

    fn try_from(code: i32) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(TaskOutcome::Failure),
            1 => Ok(TaskOutcome::Success),
            2 => Ok(TaskOutcome::Warning),
            _ => Err(ControllerError::TaskError(format!(
                "Unknown task outcome code: {}",
                code
            ))),
        }
    }
}

impl From<bool> for TaskOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            TaskOutcome::Success
        } else {
            TaskOutcome::Failure
        }
    }
}

pub type TaskFuture<'a> = BoxFuture<'a, Result<TaskOutcome, ControllerError>>;

/// Task body. Tasks run one at a time, so the environment is handed out
/// mutably.
pub type TaskFn = for<'a> fn(&'a DiagnosticLogger, &'a mut DiagnosticEnvironment) -> TaskFuture<'a>;

/// A named diagnostic check
#[derive(Clone)]
pub struct Task {
    name: String,
    running_message: String,
    success_message: String,
    failure_message: String,
    warning_message: Option<String>,
    status: TaskStatus,
    function: TaskFn,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("status", &self.status)
            .finish()
    }
}

impl Task {
    pub fn new(
        name: &str,
        running_message: &str,
        success_message: &str,
        failure_message: &str,
        function: TaskFn,
    ) -> Self {
        Self {
            name: name.to_string(),
            running_message: running_message.to_string(),
            success_message: success_message.to_string(),
            failure_message: failure_message.to_string(),
            warning_message: None,
            status: TaskStatus::Waiting,
            function,
        }
    }

    pub fn with_warning(mut self, message: &str) -> Self {
        self.warning_message = Some(message.to_string());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn function(&self) -> TaskFn {
        self.function
    }

    pub fn set_status(&mut self, next: TaskStatus) -> Result<(), ControllerError> {
        if !self.status.can_transition_to(next) {
            return Err(ControllerError::TaskError(format!(
                "Task '{}' cannot go from {} to {}",
                self.name, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Text describing the task in its current status
    pub fn display_text(&self) -> &str {
        match self.status {
            TaskStatus::Waiting => &self.name,
            TaskStatus::Running => &self.running_message,
            TaskStatus::Success => &self.success_message,
            TaskStatus::Failure => &self.failure_message,
            TaskStatus::Warning => self.warning_message.as_deref().unwrap_or(&self.success_message),
        }
    }
}
