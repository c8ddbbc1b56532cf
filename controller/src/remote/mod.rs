//! Remote shell transport to a single device.
//!
//! `RemoteShell` is the seam between device logic and the wire. The SSH
//! backend lives in [`ssh`]; [`crate::mock`] provides an in-memory one.

pub mod retry;
pub mod ssh;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::ControllerError;

/// Output of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// True when the command printed anything at all on stdout.
    pub fn has_output(&self) -> bool {
        !self.stdout.trim().is_empty()
    }

    /// Stdout and stderr joined, for substring checks on error text.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Watches interactive output and decides what to type back.
pub trait PromptResponder: Send {
    /// Called with every chunk of output. A returned string is written to the
    /// remote stdin and flushed.
    fn respond(&mut self, output: &str) -> Option<String>;
}

/// Result of an interactive command
#[derive(Debug, Clone, Default)]
pub struct InteractiveOutcome {
    pub exit_status: i32,
    pub output: String,
    /// Number of replies written to the remote stdin
    pub replies_sent: usize,
}

/// One authenticated shell session to one device.
///
/// Implementations serialize access internally: a session is never driven by
/// two callers at once.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Host this session is connected to
    fn host(&self) -> &str;

    /// Whether the session is still usable
    fn is_connected(&self) -> bool;

    /// Run a command under a pseudo-terminal and wait for it to finish.
    async fn exec(&self, command: &str) -> Result<CommandOutput, ControllerError>;

    /// Start a command without a terminal and return without waiting for it.
    async fn spawn(&self, command: &str) -> Result<(), ControllerError>;

    /// Run a command under a pseudo-terminal, feeding its output to `responder`.
    async fn exec_interactive(
        &self,
        command: &str,
        responder: Box<dyn PromptResponder>,
    ) -> Result<InteractiveOutcome, ControllerError>;

    /// Upload `local` into `remote_dir` (created if absent) and return the remote path.
    async fn put_file(&self, local: &Path, remote_dir: &str) -> Result<String, ControllerError>;

    /// Download a remote file. A missing file is `RemoteFileNotFound`.
    async fn get_file(&self, remote_path: &str) -> Result<Vec<u8>, ControllerError>;

    /// Create a remote directory and its parents, ignoring ones that exist.
    async fn ensure_dir(&self, remote_dir: &str) -> Result<(), ControllerError>;

    /// Release the session.
    async fn close(&self);
}

/// Opens sessions to devices.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &str, user: &str) -> Result<Arc<dyn RemoteShell>, ControllerError>;
}
