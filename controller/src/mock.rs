//! In-memory doubles for the transport seams.
//!
//! `MockShell` simulates just enough of a device to exercise the device and
//! fleet logic without a network: a process table driven by `nohup`,
//! `pgrep` and `pkill`, a file map served over get/put, and explicit
//! substring rules for everything else.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ControllerError;
use crate::fleet::reachability::ReachabilityCheck;
use crate::remote::retry::KeyBootstrap;
use crate::remote::{CommandOutput, Connector, InteractiveOutcome, PromptResponder, RemoteShell};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    output: CommandOutput,
}

#[derive(Debug, Default)]
struct ShellState {
    rules: Vec<Rule>,
    processes: HashSet<String>,
    files: HashMap<String, Vec<u8>>,
    executables: HashSet<String>,
    dirs: HashSet<String>,
    calls: Vec<String>,
    closed: bool,
    connection_lost: bool,
    delay: Duration,
    interactive_chunks: Vec<String>,
    interactive_exit: i32,
    replies: Vec<String>,
}

/// Scripted in-memory device shell
#[derive(Debug)]
pub struct MockShell {
    host: String,
    state: Mutex<ShellState>,
}

impl MockShell {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            state: Mutex::new(ShellState::default()),
        }
    }

    /// Answer commands containing `pattern`. The latest matching rule wins
    /// and rules take precedence over the built-in simulation.
    pub fn on(&self, pattern: &str, stdout: &str, exit_status: i32) -> &Self {
        lock(&self.state).rules.push(Rule {
            pattern: pattern.to_string(),
            output: CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_status,
            },
        });
        self
    }

    /// Same as [`MockShell::on`] but the text goes to stderr.
    pub fn on_error(&self, pattern: &str, stderr: &str, exit_status: i32) -> &Self {
        lock(&self.state).rules.push(Rule {
            pattern: pattern.to_string(),
            output: CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_status,
            },
        });
        self
    }

    pub fn with_file(&self, path: &str, contents: impl Into<Vec<u8>>) -> &Self {
        lock(&self.state)
            .files
            .insert(path.to_string(), contents.into());
        self
    }

    pub fn with_executable(&self, path: &str) -> &Self {
        lock(&self.state).executables.insert(path.to_string());
        self
    }

    pub fn remove_file(&self, path: &str) {
        lock(&self.state).files.remove(path);
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        lock(&self.state).files.get(path).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        lock(&self.state).dirs.contains(path)
    }

    pub fn start_process(&self, name: &str) {
        lock(&self.state).processes.insert(name.to_string());
    }

    pub fn is_process_running(&self, name: &str) -> bool {
        lock(&self.state).processes.contains(name)
    }

    /// Delay every remote call, to shuffle completion order across devices.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.state).delay = delay;
    }

    /// Make every later call fail with `ConnectionLost`.
    pub fn set_connection_lost(&self, lost: bool) {
        lock(&self.state).connection_lost = lost;
    }

    /// Output chunks produced by the next interactive command, and its exit status.
    pub fn script_interactive(&self, chunks: &[&str], exit_status: i32) {
        let mut state = lock(&self.state);
        state.interactive_chunks = chunks.iter().map(|c| c.to_string()).collect();
        state.interactive_exit = exit_status;
    }

    /// Every command, spawn and transfer seen so far, in order
    pub fn calls(&self) -> Vec<String> {
        lock(&self.state).calls.clone()
    }

    pub fn calls_matching(&self, pattern: &str) -> Vec<String> {
        lock(&self.state)
            .calls
            .iter()
            .filter(|c| c.contains(pattern))
            .cloned()
            .collect()
    }

    /// Replies the prompt responder wrote to stdin
    pub fn replies(&self) -> Vec<String> {
        lock(&self.state).replies.clone()
    }

    /// Record the call and apply the configured delay and failure mode.
    async fn enter(&self, call: String) -> Result<(), ControllerError> {
        let (delay, lost) = {
            let mut state = lock(&self.state);
            state.calls.push(call);
            (state.delay, state.connection_lost || state.closed)
        };
        if lost {
            return Err(ControllerError::ConnectionLost(self.host.clone()));
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    fn simulate(&self, command: &str) -> CommandOutput {
        let mut state = lock(&self.state);
        if let Some(rule) = state
            .rules
            .iter()
            .rev()
            .find(|rule| command.contains(&rule.pattern))
        {
            return rule.output.clone();
        }

        // Drop a leading `cd <dir> &&`
        let command = match command.split_once("&&") {
            Some((head, tail)) if head.trim_start().starts_with("cd ") => tail.trim(),
            _ => command.trim(),
        };
        let words: Vec<String> = command
            .split_whitespace()
            .map(|w| w.trim_matches('\'').to_string())
            .collect();
        let arg = |i: usize| words.get(i).cloned().unwrap_or_default();

        let status = |ok: bool| CommandOutput {
            exit_status: if ok { 0 } else { 1 },
            ..Default::default()
        };

        match words.first().map(String::as_str) {
            Some("pgrep") => {
                if state.processes.contains(&arg(1)) {
                    CommandOutput {
                        stdout: "1234\r\n".to_string(),
                        ..Default::default()
                    }
                } else {
                    status(false)
                }
            }
            Some("pkill") if arg(1).starts_with('-') => status(state.processes.contains(&arg(2))),
            Some("pkill") => status(state.processes.remove(&arg(1))),
            Some("nohup") => {
                state.processes.insert(arg(1));
                status(true)
            }
            Some("test") => {
                let path = arg(2);
                match arg(1).as_str() {
                    "-x" => status(state.executables.contains(&path)),
                    _ => status(state.files.contains_key(&path) || state.dirs.contains(&path)),
                }
            }
            Some("chmod") => {
                state.executables.insert(arg(2));
                status(true)
            }
            Some("mkdir") => {
                let dir = words.iter().skip(1).find(|w| !w.starts_with('-')).cloned();
                if let Some(dir) = dir {
                    state.dirs.insert(dir);
                }
                status(true)
            }
            Some("rm") => {
                for target in words.iter().skip(1).filter(|w| !w.starts_with('-')) {
                    match target.strip_suffix("/*") {
                        Some(prefix) => {
                            let prefix = format!("{}/", prefix);
                            state.files.retain(|path, _| !path.starts_with(&prefix));
                        }
                        None => {
                            state.files.remove(target);
                        }
                    }
                }
                status(true)
            }
            _ => status(true),
        }
    }
}

#[async_trait]
impl RemoteShell for MockShell {
    fn host(&self) -> &str {
        &self.host
    }

    fn is_connected(&self) -> bool {
        let state = lock(&self.state);
        !state.closed && !state.connection_lost
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, ControllerError> {
        self.enter(command.to_string()).await?;
        let output = self.simulate(command);
        debug!("[mock {}] {} -> {}", self.host, command, output.exit_status);
        Ok(output)
    }

    async fn spawn(&self, command: &str) -> Result<(), ControllerError> {
        self.enter(command.to_string()).await?;
        self.simulate(command);
        Ok(())
    }

    async fn exec_interactive(
        &self,
        command: &str,
        mut responder: Box<dyn PromptResponder>,
    ) -> Result<InteractiveOutcome, ControllerError> {
        self.enter(command.to_string()).await?;
        let (chunks, exit_status) = {
            let state = lock(&self.state);
            (state.interactive_chunks.clone(), state.interactive_exit)
        };

        let mut outcome = InteractiveOutcome {
            exit_status,
            ..Default::default()
        };
        for chunk in chunks {
            outcome.output.push_str(&chunk);
            if let Some(reply) = responder.respond(&chunk) {
                lock(&self.state).replies.push(reply);
                outcome.replies_sent += 1;
            }
        }
        Ok(outcome)
    }

    async fn put_file(&self, local: &Path, remote_dir: &str) -> Result<String, ControllerError> {
        self.enter(format!("put {} {}", local.display(), remote_dir))
            .await?;
        let name = local
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ControllerError::ValidationError(format!("Not a file path: {:?}", local)))?;
        let contents = tokio::fs::read(local).await?;
        let remote_path = format!("{}/{}", remote_dir.trim_end_matches('/'), name);

        let mut state = lock(&self.state);
        state.dirs.insert(remote_dir.to_string());
        state.files.insert(remote_path.clone(), contents);
        Ok(remote_path)
    }

    async fn get_file(&self, remote_path: &str) -> Result<Vec<u8>, ControllerError> {
        self.enter(format!("get {}", remote_path)).await?;
        lock(&self.state)
            .files
            .get(remote_path)
            .cloned()
            .ok_or_else(|| ControllerError::RemoteFileNotFound(remote_path.to_string()))
    }

    async fn ensure_dir(&self, remote_dir: &str) -> Result<(), ControllerError> {
        self.enter(format!("mkdir {}", remote_dir)).await?;
        lock(&self.state).dirs.insert(remote_dir.to_string());
        Ok(())
    }

    async fn close(&self) {
        lock(&self.state).closed = true;
    }
}

/// Connector handing out pre-registered [`MockShell`]s
#[derive(Default)]
pub struct MockConnector {
    shells: Mutex<HashMap<String, Arc<MockShell>>>,
    connects: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shell; connecting to any other host fails as unreachable.
    pub fn with_shell(self, shell: Arc<MockShell>) -> Self {
        lock(&self.shells).insert(shell.host().to_string(), shell);
        self
    }

    /// Hosts connected to so far, as `user@host`
    pub fn connects(&self) -> Vec<String> {
        lock(&self.connects).clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &str, user: &str) -> Result<Arc<dyn RemoteShell>, ControllerError> {
        lock(&self.connects).push(format!("{}@{}", user, host));
        let shell = lock(&self.shells).get(host).cloned();
        match shell {
            Some(shell) => Ok(shell as Arc<dyn RemoteShell>),
            None => Err(ControllerError::Unreachable(host.to_string())),
        }
    }
}

/// Reachability answering from a fixed set of reachable hosts
#[derive(Debug, Default)]
pub struct MockReachability {
    reachable: HashSet<String>,
    checked_hosts: Mutex<Vec<String>>,
}

impl MockReachability {
    pub fn reachable<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            reachable: hosts.into_iter().map(Into::into).collect(),
            checked_hosts: Mutex::new(Vec::new()),
        }
    }

    pub fn checked_hosts(&self) -> Vec<String> {
        lock(&self.checked_hosts).clone()
    }
}

#[async_trait]
impl ReachabilityCheck for MockReachability {
    async fn is_reachable(&self, host: &str) -> bool {
        lock(&self.checked_hosts).push(host.to_string());
        self.reachable.contains(host)
    }
}

/// Key bootstrap that only records what it was asked to do
#[derive(Debug, Default)]
pub struct MockBootstrap {
    calls: Mutex<Vec<String>>,
}

impl MockBootstrap {
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl KeyBootstrap for MockBootstrap {
    async fn install_key(&self, host: &str, user: &str) -> Result<(), ControllerError> {
        lock(&self.calls).push(format!("{}@{}", user, host));
        Ok(())
    }
}
