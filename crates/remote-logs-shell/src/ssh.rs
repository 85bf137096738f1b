//! SSH transport built on libssh2.
//!
//! libssh2 is blocking, so every call runs on the blocking thread pool.
//! Follow-mode channels are read in non-blocking mode by a dedicated
//! blocking task that polls for cancellation between reads.

use std::{
    io::{self, ErrorKind, Read},
    net::{TcpStream, ToSocketAddrs},
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use remote_logs_core::{
    Connector, ExecOutput, HostProfile, OutputStream, RemoteCommand, RemoteSession,
    TransportError,
};
use ssh2::{CheckResult, KnownHostFileKind, Session};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

/// Sleep between non-blocking reads that returned no data.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Grace period for a follower thread to wind down on close.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Keepalive interval sent on idle sessions, in seconds.
const KEEPALIVE_SECS: u32 = 30;

/// SSH connection options.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// Upper bound on TCP connect + handshake + authentication.
    pub connect_timeout: Duration,
    /// Upper bound on one request/response command.
    pub command_timeout: Duration,
    /// OpenSSH `known_hosts` file. When set, unknown or mismatching host keys
    /// are rejected; when unset, any host key is accepted.
    pub known_hosts: Option<PathBuf>,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(30),
            known_hosts: None,
        }
    }
}

/// Connector that opens SSH sessions.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    /// Create an SSH connector.
    #[must_use]
    pub const fn new(options: SshOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, host: &HostProfile) -> Result<Box<dyn RemoteSession>, TransportError> {
        let profile = host.clone();
        let options = self.options.clone();
        tracing::debug!(host = %host.key, address = %host.address, port = host.port, "Opening SSH session");

        let session = tokio::task::spawn_blocking(move || connect_blocking(&profile, &options))
            .await
            .map_err(|e| TransportError::Connect(format!("connect task failed: {e}")))??;

        Ok(Box::new(SshSession {
            host_key: host.key.clone(),
            session: Some(session),
            command_timeout: self.options.command_timeout,
            followers: Vec::new(),
        }))
    }
}

fn map_ssh_error(e: ssh2::Error) -> TransportError {
    TransportError::Channel(e.to_string())
}

fn timeout_millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}

fn connect_blocking(profile: &HostProfile, options: &SshOptions) -> Result<Session, TransportError> {
    let addr = (profile.address.as_str(), profile.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Connect(format!("cannot resolve {}: {e}", profile.address)))?
        .next()
        .ok_or_else(|| TransportError::Connect(format!("no address for {}", profile.address)))?;
    let tcp = TcpStream::connect_timeout(&addr, options.connect_timeout)
        .map_err(|e| TransportError::Connect(format!("{addr}: {e}")))?;

    let mut session = Session::new().map_err(|e| TransportError::Connect(e.to_string()))?;
    session.set_timeout(timeout_millis(options.connect_timeout));
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| TransportError::Connect(format!("handshake: {e}")))?;

    if let Some(ref path) = options.known_hosts {
        verify_host_key(&session, profile, path)?;
    }
    authenticate(&session, profile)?;

    session.set_timeout(timeout_millis(options.command_timeout));
    session.set_keepalive(true, KEEPALIVE_SECS);
    Ok(session)
}

fn verify_host_key(
    session: &Session,
    profile: &HostProfile,
    path: &std::path::Path,
) -> Result<(), TransportError> {
    let mut known = session.known_hosts().map_err(map_ssh_error)?;
    known
        .read_file(path, KnownHostFileKind::OpenSSH)
        .map_err(|e| TransportError::Connect(format!("{}: {e}", path.display())))?;
    let (key, _) = session
        .host_key()
        .ok_or_else(|| TransportError::Connect("server sent no host key".to_string()))?;
    match known.check_port(&profile.address, profile.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(TransportError::Connect(format!(
            "host key mismatch for {}",
            profile.address
        ))),
        CheckResult::NotFound | CheckResult::Failure => Err(TransportError::Connect(format!(
            "host key for {} not in {}",
            profile.address,
            path.display()
        ))),
    }
}

/// Key file first, then password.
fn authenticate(session: &Session, profile: &HostProfile) -> Result<(), TransportError> {
    let cred = &profile.credential;
    let mut last_error = None;

    if let Some(ref key_file) = cred.key_file {
        match session.userauth_pubkey_file(
            &profile.username,
            None,
            key_file,
            cred.passphrase.as_deref(),
        ) {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => last_error = Some("public key not accepted".to_string()),
            Err(e) => {
                tracing::debug!(host = %profile.key, "Key authentication failed: {e}");
                last_error = Some(e.to_string());
            }
        }
    }

    if let Some(ref password) = cred.password {
        match session.userauth_password(&profile.username, password) {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => last_error = Some("password not accepted".to_string()),
            Err(e) => last_error = Some(e.to_string()),
        }
    }

    Err(TransportError::Auth(
        last_error.unwrap_or_else(|| "no credential configured".to_string()),
    ))
}

fn exec_blocking(
    session: &Session,
    script: &str,
    timeout: Duration,
) -> Result<ExecOutput, TransportError> {
    let mut channel = session.channel_session().map_err(map_ssh_error)?;
    channel.exec(script).map_err(map_ssh_error)?;

    session.set_blocking(false);
    let drained = drain_channel(&mut channel, timeout);
    session.set_blocking(true);
    let (stdout, stderr) = drained?;

    channel.wait_close().map_err(map_ssh_error)?;
    let status = channel.exit_status().map_err(map_ssh_error)?;
    Ok(ExecOutput {
        status,
        stdout,
        stderr,
    })
}

/// Read stdout and stderr alternately until EOF, so a full stderr window
/// cannot stall the stdout reader. Expects a non-blocking session.
fn drain_channel(
    channel: &mut ssh2::Channel,
    timeout: Duration,
) -> Result<(Vec<u8>, Vec<u8>), TransportError> {
    let deadline = Instant::now() + timeout;
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        // data always precedes EOF on the channel
        let eof = channel.eof();
        let read = read_available(channel, &mut buf, &mut stdout)?
            + read_available(&mut channel.stderr(), &mut buf, &mut stderr)?;
        if read > 0 {
            continue;
        }
        if eof {
            return Ok((stdout, stderr));
        }
        if Instant::now() >= deadline {
            return Err(TransportError::Timeout(timeout));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

/// Append whatever `reader` has ready to `out`. Returns the bytes read.
fn read_available(reader: &mut impl Read, buf: &mut [u8], out: &mut Vec<u8>) -> io::Result<usize> {
    let mut total = 0;
    loop {
        match reader.read(buf) {
            Ok(0) => return Ok(total),
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                total += n;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(total),
            Err(e) => return Err(e),
        }
    }
}

/// Schedules `keepalive_send` from the follow loop. libssh2 only sends
/// keepalives when asked, and a failed send is how a silent network drop
/// surfaces on an otherwise idle channel.
#[derive(Debug)]
struct Keepalive {
    next: Instant,
}

impl Keepalive {
    fn new(now: Instant) -> Self {
        Self {
            next: now + Duration::from_secs(KEEPALIVE_SECS.into()),
        }
    }

    fn due(&self, now: Instant) -> bool {
        now >= self.next
    }

    /// Record a send; `wait_secs` is libssh2's delay until the next one.
    fn sent(&mut self, now: Instant, wait_secs: u32) {
        self.next = now + Duration::from_secs(wait_secs.max(1).into());
    }

    /// Send a keepalive if one is due.
    fn poll(&mut self, session: &Session) -> Result<(), TransportError> {
        let now = Instant::now();
        if !self.due(now) {
            return Ok(());
        }
        match session.keepalive_send() {
            Ok(wait_secs) => {
                self.sent(now, wait_secs);
                Ok(())
            }
            Err(e) => {
                let e = io::Error::from(e);
                // non-blocking session; retried on the next idle poll
                if e.kind() == ErrorKind::WouldBlock {
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
        }
    }
}

/// Copy channel output into `tx` until EOF, error, cancellation or consumer drop.
fn pump_channel(
    session: &Session,
    mut channel: ssh2::Channel,
    tx: &mpsc::Sender<Result<Bytes, TransportError>>,
    cancel: &CancellationToken,
) {
    session.set_blocking(false);
    let mut keepalive = Keepalive::new(Instant::now());
    let mut buf = [0u8; 8192];
    loop {
        if cancel.is_cancelled() || tx.is_closed() {
            break;
        }
        let idle = match channel.read(&mut buf) {
            Ok(0) => true,
            // blocks this thread while the consumer is full
            Ok(n) => {
                if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                    break;
                }
                false
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => true,
            Err(e) => {
                let _ = tx.blocking_send(Err(e.into()));
                break;
            }
        };
        if !idle {
            continue;
        }
        if channel.eof() {
            break;
        }
        if let Err(e) = keepalive.poll(session) {
            tracing::debug!("Keepalive failed: {e}");
            let _ = tx.blocking_send(Err(e));
            break;
        }
        thread::sleep(POLL_INTERVAL);
    }

    session.set_blocking(true);
    // Closing the channel hangs up its pty, which ends the remote command
    if let Err(e) = channel.close().and_then(|()| channel.wait_close()) {
        tracing::debug!("Closing follow channel: {e}");
    }
}

struct Follower {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// An authenticated SSH session.
pub struct SshSession {
    host_key: String,
    session: Option<Session>,
    command_timeout: Duration,
    followers: Vec<Follower>,
}

impl SshSession {
    fn live(&self) -> Result<Session, TransportError> {
        self.session.clone().ok_or(TransportError::Closed)
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn host_key(&self) -> &str {
        &self.host_key
    }

    async fn exec(&mut self, command: &RemoteCommand) -> Result<ExecOutput, TransportError> {
        let session = self.live()?;
        let script = command.to_shell_string()?;
        tracing::trace!(host = %self.host_key, %script, "exec");

        let timeout = self.command_timeout;
        let task = tokio::task::spawn_blocking(move || exec_blocking(&session, &script, timeout));
        match tokio::time::timeout(self.command_timeout, task).await {
            Ok(joined) => {
                joined.map_err(|e| TransportError::Channel(format!("exec task failed: {e}")))?
            }
            Err(_) => Err(TransportError::Timeout(self.command_timeout)),
        }
    }

    async fn stream(&mut self, command: &RemoteCommand) -> Result<OutputStream, TransportError> {
        let session = self.live()?;
        let script = command.to_shell_string()?;
        tracing::trace!(host = %self.host_key, %script, "stream");

        let opener = session.clone();
        let channel = tokio::task::spawn_blocking(move || {
            let mut channel = opener.channel_session().map_err(map_ssh_error)?;
            // a pty ties the remote command's lifetime to the channel
            channel
                .request_pty("dumb", None, None)
                .map_err(map_ssh_error)?;
            channel.exec(&script).map_err(map_ssh_error)?;
            Ok::<_, TransportError>(channel)
        })
        .await
        .map_err(|e| TransportError::Channel(format!("open task failed: {e}")))??;

        let (tx, rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let handle =
            tokio::task::spawn_blocking(move || pump_channel(&session, channel, &tx, &task_cancel));

        self.followers.push(Follower { cancel, handle });
        Ok(ReceiverStream::new(rx).boxed())
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    async fn close(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        for follower in self.followers.drain(..) {
            follower.cancel.cancel();
            if tokio::time::timeout(CLOSE_GRACE, follower.handle).await.is_err() {
                tracing::warn!(host = %self.host_key, "Follow channel did not stop in time");
            }
        }

        let host_key = self.host_key.clone();
        let _ = tokio::task::spawn_blocking(move || {
            if let Err(e) = session.disconnect(None, "session closed", None) {
                tracing::debug!(host = %host_key, "SSH disconnect: {e}");
            }
        })
        .await;
        tracing::debug!(host = %self.host_key, "SSH session closed");
    }
}
