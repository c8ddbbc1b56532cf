//! SSH backend for [`RemoteShell`] built on `ssh2`.
//!
//! libssh2 is blocking, so every operation runs inside
//! `tokio::task::spawn_blocking` while holding the session mutex.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::{ErrorCode, Session};
use tracing::{debug, info, warn};

use crate::errors::ControllerError;
use crate::remote::retry::{ConnectFailure, KeyBootstrap, RetryPolicy, SshCopyId};
use crate::remote::{CommandOutput, Connector, InteractiveOutcome, PromptResponder, RemoteShell};
use crate::storage::layout::home_dir;
use crate::storage::settings::SshSettings;

/// libssh2 session error codes that mean the socket is gone
const LOST_SESSION_CODES: &[i32] = &[
    -1,  // LIBSSH2_ERROR_SOCKET_NONE
    -7,  // LIBSSH2_ERROR_SOCKET_SEND
    -13, // LIBSSH2_ERROR_SOCKET_DISCONNECT
    -43, // LIBSSH2_ERROR_SOCKET_RECV
];

/// SFTP status for a missing file (LIBSSH2_FX_NO_SUCH_FILE)
const SFTP_NO_SUCH_FILE: i32 = 2;

/// Poll interval for non-blocking interactive reads
const INTERACTIVE_POLL: Duration = Duration::from_millis(20);

/// One authenticated SSH session
pub struct SshConnection {
    host: String,
    session: Arc<Mutex<Option<Session>>>,
    command_timeout: Option<Duration>,
}

impl SshConnection {
    fn new(host: &str, session: Session, command_timeout: Option<Duration>) -> Self {
        Self {
            host: host.to_string(),
            session: Arc::new(Mutex::new(Some(session))),
            command_timeout,
        }
    }

    /// Run `op` against the live session on the blocking pool.
    ///
    /// A transport failure drops the session so later calls fail fast with
    /// `ConnectionLost`.
    async fn with_session<T, F>(&self, op: F) -> Result<T, ControllerError>
    where
        F: FnOnce(&Session, &str) -> Result<T, ControllerError> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        let host = self.host.clone();
        let timeout_ms = self
            .command_timeout
            .map(|t| t.as_millis().min(u32::MAX as u128) as u32)
            .unwrap_or(0);

        tokio::task::spawn_blocking(move || {
            let mut guard = session
                .lock()
                .map_err(|_| ControllerError::Internal("SSH session lock poisoned".to_string()))?;
            let result = match guard.as_ref() {
                Some(sess) => {
                    sess.set_timeout(timeout_ms);
                    op(sess, &host)
                }
                None => Err(ControllerError::ConnectionLost(host.clone())),
            };
            if matches!(&result, Err(e) if e.is_connection_lost()) && guard.is_some() {
                warn!("Session to {} dropped", host);
                *guard = None;
            }
            result
        })
        .await?
    }
}

#[async_trait]
impl RemoteShell for SshConnection {
    fn host(&self) -> &str {
        &self.host
    }

    fn is_connected(&self) -> bool {
        self.session
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    async fn exec(&self, command: &str) -> Result<CommandOutput, ControllerError> {
        let command = command.to_string();
        self.with_session(move |session, host| exec_blocking(session, host, &command))
            .await
    }

    async fn spawn(&self, command: &str) -> Result<(), ControllerError> {
        let command = command.to_string();
        self.with_session(move |session, host| {
            // No pty: closing the channel must not hang up the started process
            let mut channel = session
                .channel_session()
                .map_err(|e| map_ssh_error(e, host))?;
            channel.exec(&command).map_err(|e| map_ssh_error(e, host))?;
            debug!("Spawned on {}: {}", host, command);
            Ok(())
        })
        .await
    }

    async fn exec_interactive(
        &self,
        command: &str,
        responder: Box<dyn PromptResponder>,
    ) -> Result<InteractiveOutcome, ControllerError> {
        let command = command.to_string();
        self.with_session(move |session, host| {
            exec_interactive_blocking(session, host, &command, responder)
        })
        .await
    }

    async fn put_file(&self, local: &Path, remote_dir: &str) -> Result<String, ControllerError> {
        let local = local.to_path_buf();
        let remote_dir = remote_dir.to_string();
        self.with_session(move |session, host| {
            let file_name = local
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| {
                    ControllerError::ValidationError(format!("Not a file path: {:?}", local))
                })?
                .to_string();
            let contents = std::fs::read(&local)?;

            let sftp = session.sftp().map_err(|e| map_ssh_error(e, host))?;
            ensure_remote_dir(&sftp, host, &remote_dir)?;

            let remote_path = format!("{}/{}", remote_dir.trim_end_matches('/'), file_name);
            let mut remote_file = sftp
                .create(Path::new(&remote_path))
                .map_err(|e| map_ssh_error(e, host))?;
            remote_file
                .write_all(&contents)
                .map_err(|e| map_io_error(e, host))?;
            debug!("Uploaded {:?} to {}:{}", local, host, remote_path);
            Ok(remote_path)
        })
        .await
    }

    async fn get_file(&self, remote_path: &str) -> Result<Vec<u8>, ControllerError> {
        let remote_path = remote_path.to_string();
        self.with_session(move |session, host| {
            let sftp = session.sftp().map_err(|e| map_ssh_error(e, host))?;
            let mut remote_file = sftp.open(Path::new(&remote_path)).map_err(|e| {
                if e.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) {
                    ControllerError::RemoteFileNotFound(remote_path.clone())
                } else {
                    map_ssh_error(e, host)
                }
            })?;
            let mut contents = Vec::new();
            remote_file
                .read_to_end(&mut contents)
                .map_err(|e| map_io_error(e, host))?;
            Ok(contents)
        })
        .await
    }

    async fn ensure_dir(&self, remote_dir: &str) -> Result<(), ControllerError> {
        let remote_dir = remote_dir.to_string();
        self.with_session(move |session, host| {
            let sftp = session.sftp().map_err(|e| map_ssh_error(e, host))?;
            ensure_remote_dir(&sftp, host, &remote_dir)
        })
        .await
    }

    async fn close(&self) {
        let session = Arc::clone(&self.session);
        let host = self.host.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Ok(mut guard) = session.lock() {
                if let Some(sess) = guard.take() {
                    let _ = sess.disconnect(None, "closing", None);
                    debug!("Closed session to {}", host);
                }
            }
        })
        .await;
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.session.lock() {
            if let Some(sess) = guard.take() {
                let _ = sess.disconnect(None, "closing", None);
            }
        }
    }
}

/// Opens [`SshConnection`]s with the retry and key-bootstrap policy.
pub struct SshConnector {
    settings: SshSettings,
    policy: RetryPolicy,
    bootstrap: Arc<dyn KeyBootstrap>,
}

impl SshConnector {
    pub fn new(settings: SshSettings) -> Self {
        let policy = RetryPolicy::new(settings.connect_attempts);
        Self {
            settings,
            policy,
            bootstrap: Arc::new(SshCopyId),
        }
    }

    pub fn with_bootstrap(mut self, bootstrap: Arc<dyn KeyBootstrap>) -> Self {
        self.bootstrap = bootstrap;
        self
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        host: &str,
        user: &str,
    ) -> Result<Arc<dyn RemoteShell>, ControllerError> {
        let session = self
            .policy
            .connect(host, user, self.bootstrap.as_ref(), |_| {
                let host = host.to_string();
                let user = user.to_string();
                let settings = self.settings.clone();
                async move {
                    tokio::task::spawn_blocking(move || connect_blocking(&host, &user, &settings))
                        .await
                        .unwrap_or_else(|e| Err(ConnectFailure::Unreachable(e.to_string())))
                }
            })
            .await?;

        info!("Connected to {}@{}", user, host);
        Ok(Arc::new(SshConnection::new(
            host,
            session,
            self.settings.command_timeout(),
        )))
    }
}

fn connect_blocking(host: &str, user: &str, settings: &SshSettings) -> Result<Session, ConnectFailure> {
    let timeout = settings.connect_timeout();
    let addrs: Vec<_> = (host, settings.port)
        .to_socket_addrs()
        .map_err(|e| ConnectFailure::Unreachable(format!("cannot resolve {}: {}", host, e)))?
        .collect();

    let mut last_error = None;
    let mut tcp = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                tcp = Some(stream);
                break;
            }
            Err(e) => last_error = Some(e),
        }
    }
    let tcp = tcp.ok_or_else(|| {
        ConnectFailure::Unreachable(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| format!("no address for {}", host)),
        )
    })?;

    let mut session =
        Session::new().map_err(|e| ConnectFailure::Unreachable(format!("session init: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session
        .handshake()
        .map_err(|e| ConnectFailure::Unreachable(format!("handshake failed: {}", e)))?;

    if session.userauth_agent(user).is_err() {
        for key in identity_candidates(settings) {
            if !key.exists() {
                continue;
            }
            match session.userauth_pubkey_file(user, None, &key, None) {
                Ok(()) => break,
                Err(e) => debug!("Key {:?} rejected by {}: {}", key, host, e),
            }
        }
    }

    if !session.authenticated() {
        return Err(ConnectFailure::Auth(format!(
            "no accepted public key for {}@{}",
            user, host
        )));
    }

    session.set_keepalive(true, 10);
    Ok(session)
}

fn identity_candidates(settings: &SshSettings) -> Vec<PathBuf> {
    if let Some(path) = &settings.identity_file {
        return vec![path.clone()];
    }
    match home_dir() {
        Some(home) => ["id_ed25519", "id_rsa", "id_ecdsa"]
            .iter()
            .map(|name| home.join(".ssh").join(name))
            .collect(),
        None => Vec::new(),
    }
}

fn exec_blocking(session: &Session, host: &str, command: &str) -> Result<CommandOutput, ControllerError> {
    let mut channel = session
        .channel_session()
        .map_err(|e| map_ssh_error(e, host))?;
    channel
        .request_pty("xterm", None, None)
        .map_err(|e| map_ssh_error(e, host))?;
    channel.exec(command).map_err(|e| map_ssh_error(e, host))?;

    let mut stdout = Vec::new();
    channel
        .read_to_end(&mut stdout)
        .map_err(|e| map_io_error(e, host))?;
    let mut stderr = Vec::new();
    channel
        .stderr()
        .read_to_end(&mut stderr)
        .map_err(|e| map_io_error(e, host))?;

    channel.wait_close().map_err(|e| map_ssh_error(e, host))?;
    let exit_status = channel.exit_status().map_err(|e| map_ssh_error(e, host))?;

    debug!("{} `{}` exited with {}", host, command, exit_status);
    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        exit_status,
    })
}

fn exec_interactive_blocking(
    session: &Session,
    host: &str,
    command: &str,
    mut responder: Box<dyn PromptResponder>,
) -> Result<InteractiveOutcome, ControllerError> {
    let mut channel = session
        .channel_session()
        .map_err(|e| map_ssh_error(e, host))?;
    channel
        .request_pty("xterm", None, None)
        .map_err(|e| map_ssh_error(e, host))?;
    channel.exec(command).map_err(|e| map_ssh_error(e, host))?;

    let mut outcome = InteractiveOutcome::default();
    session.set_blocking(false);
    let pumped = (|| -> Result<(), ControllerError> {
        let mut buf = [0u8; 4096];
        loop {
            let mut progressed = false;
            match channel.read(&mut buf) {
                Ok(n) if n > 0 => {
                    let text = String::from_utf8_lossy(&buf[..n]).into_owned();
                    for line in text.lines().filter(|l| !l.trim().is_empty()) {
                        info!("[{}] {}", host, line.trim_end());
                    }
                    outcome.output.push_str(&text);
                    if let Some(reply) = responder.respond(&text) {
                        write_nonblocking(&mut channel, reply.as_bytes(), host)?;
                        outcome.replies_sent += 1;
                    }
                    progressed = true;
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(map_io_error(e, host)),
            }

            if channel.eof() {
                return Ok(());
            }
            if !progressed {
                std::thread::sleep(INTERACTIVE_POLL);
            }
        }
    })();
    session.set_blocking(true);
    pumped?;

    let mut rest = Vec::new();
    channel
        .read_to_end(&mut rest)
        .map_err(|e| map_io_error(e, host))?;
    outcome.output.push_str(&String::from_utf8_lossy(&rest));

    channel.wait_close().map_err(|e| map_ssh_error(e, host))?;
    outcome.exit_status = channel.exit_status().map_err(|e| map_ssh_error(e, host))?;
    Ok(outcome)
}

fn write_nonblocking<W: Write>(writer: &mut W, mut data: &[u8], host: &str) -> Result<(), ControllerError> {
    while !data.is_empty() {
        match writer.write(data) {
            Ok(n) => data = &data[n..],
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(INTERACTIVE_POLL)
            }
            Err(e) => return Err(map_io_error(e, host)),
        }
    }
    loop {
        match writer.flush() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(INTERACTIVE_POLL)
            }
            Err(e) => return Err(map_io_error(e, host)),
        }
    }
}

/// Create each missing component of `remote_dir`.
fn ensure_remote_dir(sftp: &ssh2::Sftp, host: &str, remote_dir: &str) -> Result<(), ControllerError> {
    let mut current = PathBuf::new();
    for part in Path::new(remote_dir).components() {
        current.push(part);
        if current.as_os_str().is_empty() || sftp.stat(&current).is_ok() {
            continue;
        }
        if let Err(e) = sftp.mkdir(&current, 0o755) {
            // Lost a race with another creator
            if sftp.stat(&current).is_err() {
                return Err(map_ssh_error(e, host));
            }
        }
    }
    Ok(())
}

fn map_ssh_error(err: ssh2::Error, host: &str) -> ControllerError {
    match err.code() {
        ErrorCode::Session(code) if LOST_SESSION_CODES.contains(&code) => {
            ControllerError::ConnectionLost(host.to_string())
        }
        _ => ControllerError::SshError(format!("{}: {}", host, err)),
    }
}

fn map_io_error(err: std::io::Error, host: &str) -> ControllerError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => ControllerError::ConnectionLost(host.to_string()),
        _ => ControllerError::SshError(format!("{}: {}", host, err)),
    }
}
