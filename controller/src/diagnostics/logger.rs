//! Timestamped diagnostic log with optional event stream

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::diagnostics::task::TaskStatus;

/// Progress events for a front end
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    StatusChanged {
        index: usize,
        name: String,
        status: TaskStatus,
    },
    Log(String),
    Finished(DiagnosticSummary),
}

/// Status counts after a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticSummary {
    pub success: usize,
    pub warning: usize,
    pub failure: usize,
}

impl DiagnosticSummary {
    pub fn passed(&self) -> bool {
        self.failure == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct DiagnosticLogger {
    lines: Arc<Mutex<Vec<String>>>,
    events: Option<UnboundedSender<DiagnosticEvent>>,
}

impl DiagnosticLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(mut self, sender: UnboundedSender<DiagnosticEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Append `[HH:MM:SS] message` to the log.
    pub fn log(&self, message: impl AsRef<str>) {
        let line = format!(
            "[{}] {}",
            chrono::Local::now().format("%H:%M:%S"),
            message.as_ref()
        );
        info!("{}", line);
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(line.clone());
        self.emit(DiagnosticEvent::Log(line));
    }

    pub fn emit(&self, event: DiagnosticEvent) {
        if let Some(sender) = &self.events {
            // Receiver gone: nobody is watching
            let _ = sender.send(event);
        }
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_are_timestamped() {
        let logger = DiagnosticLogger::new();
        logger.log("Starting task: Check Network");
        let lines = logger.lines();
        assert_eq!(lines.len(), 1);
        // [HH:MM:SS] prefix
        assert_eq!(&lines[0][0..1], "[");
        assert_eq!(&lines[0][9..11], "] ");
        assert!(lines[0].ends_with("Starting task: Check Network"));
    }

    #[tokio::test]
    async fn test_events_are_forwarded() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let logger = DiagnosticLogger::new().with_events(tx);
        logger.log("hello");
        match rx.recv().await {
            Some(DiagnosticEvent::Log(line)) => assert!(line.ends_with("hello")),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
