//! # SSH Transport (CLI <-> Core)
//!
//! Bridges the transport abstraction in [`docdrop_core::contract`] to a real
//! SSH connection via the `ssh2` crate. `ssh2` is blocking, so every call runs
//! on `tokio::task::spawn_blocking` with the session moved in and back out.
//!
//! ## Host keys
//! The server key is checked against an OpenSSH known-hosts file (default
//! `~/.ssh/known_hosts`). Unknown hosts are trusted and appended to that file,
//! with a warning; a key that differs from the recorded one is rejected.
//!
//! ## Credentials
//! The credential is resolved on every connect, before any network traffic.
//! Key files are run through the core decoders first so an unusable key fails
//! with a clear [`CredentialError`](docdrop_core::error::CredentialError).

use async_trait::async_trait;
use docdrop_core::config::RemoteTarget;
use docdrop_core::contract::{ExecOutput, RemoteSession, RemoteTransport};
use docdrop_core::credential::{load_private_key, Credential};
use docdrop_core::error::SessionError;
use ssh2::{CheckResult, ErrorCode, KnownHostFileKind, RenameFlags, Session};
use std::fs::{self, File};
use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// SFTP status codes (draft-ietf-secsh-filexfer).
const SFTP_NO_SUCH_FILE: i32 = 2;
const SFTP_FAILURE: i32 = 4;
const SFTP_FILE_ALREADY_EXISTS: i32 = 11;

const EXEC_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Opens one fresh SSH session per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct SshTransport;

#[async_trait]
impl RemoteTransport for SshTransport {
    async fn connect(&self, target: &RemoteTarget) -> Result<Box<dyn RemoteSession>, SessionError> {
        let credential = Credential::resolve(target)?;
        if let Credential::PrivateKey(path) = &credential {
            let key = load_private_key(path)?;
            tracing::debug!(key_path = %key.path.display(), key_kind = %key.kind, "Using private key");
        }

        let target = target.clone();
        let command_timeout = target.command_timeout();
        let host = target.host.clone();
        let session = tokio::task::spawn_blocking(move || open_session(&target, &credential))
            .await
            .map_err(join_error)??;

        tracing::info!(%host, "SSH session established");
        Ok(Box::new(SshSession {
            session: Some(session),
            host,
            command_timeout,
        }))
    }
}

fn open_session(target: &RemoteTarget, credential: &Credential) -> Result<Session, SessionError> {
    let connect_error = |reason: String| SessionError::Connect {
        host: target.host.clone(),
        port: target.port,
        reason,
    };

    let addr = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| connect_error(e.to_string()))?
        .next()
        .ok_or_else(|| connect_error("host resolved to no addresses".to_string()))?;
    let tcp = TcpStream::connect_timeout(&addr, target.connect_timeout())
        .map_err(|e| connect_error(e.to_string()))?;

    let mut session = Session::new().map_err(|e| SessionError::Handshake(e.to_string()))?;
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|e| SessionError::Handshake(e.to_string()))?;

    verify_host_key(&session, target)?;
    authenticate(&session, target, credential)?;
    Ok(session)
}

/// Key used in known-hosts lookups: bare host on port 22, `[host]:port`
/// otherwise.
pub fn known_hosts_entry(host: &str, port: u16) -> String {
    if port == 22 {
        host.to_string()
    } else {
        format!("[{host}]:{port}")
    }
}

pub fn known_hosts_path(target: &RemoteTarget) -> Option<PathBuf> {
    target
        .known_hosts
        .clone()
        .or_else(|| dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")))
}

fn verify_host_key(session: &Session, target: &RemoteTarget) -> Result<(), SessionError> {
    let handshake = |e: ssh2::Error| SessionError::Handshake(e.to_string());

    let mut known = session.known_hosts().map_err(handshake)?;
    let store = known_hosts_path(target);
    if let Some(path) = store.as_deref().filter(|p| p.exists()) {
        known
            .read_file(path, KnownHostFileKind::OpenSSH)
            .map_err(handshake)?;
    }

    let (key, key_type) = session
        .host_key()
        .ok_or_else(|| SessionError::Handshake("server presented no host key".to_string()))?;

    match known.check_port(&target.host, target.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::NotFound => {
            tracing::warn!(
                host = %target.host,
                port = target.port,
                "Unknown host key; trusting and recording it"
            );
            let entry = known_hosts_entry(&target.host, target.port);
            known
                .add(&entry, key, "added by docdrop", key_type.into())
                .map_err(handshake)?;
            if let Some(path) = store.as_deref() {
                if let Err(e) = persist_known_hosts(&known, path) {
                    tracing::warn!(path = %path.display(), error = %e, "Could not save known hosts");
                }
            }
            Ok(())
        }
        CheckResult::Mismatch => {
            tracing::error!(host = %target.host, "Host key mismatch; refusing to connect");
            Err(SessionError::HostKeyMismatch {
                host: target.host.clone(),
            })
        }
        CheckResult::Failure => Err(SessionError::Handshake(
            "known hosts lookup failed".to_string(),
        )),
    }
}

fn persist_known_hosts(known: &ssh2::KnownHosts, path: &Path) -> Result<(), SessionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    known
        .write_file(path, KnownHostFileKind::OpenSSH)
        .map_err(|e| SessionError::Handshake(e.to_string()))
}

fn authenticate(
    session: &Session,
    target: &RemoteTarget,
    credential: &Credential,
) -> Result<(), SessionError> {
    let auth_error = |reason: String| SessionError::Auth {
        user: target.user.clone(),
        reason,
    };
    match credential {
        Credential::PrivateKey(path) => session.userauth_pubkey_file(&target.user, None, path, None),
        Credential::Password(password) => session.userauth_password(&target.user, password),
    }
    .map_err(|e| auth_error(e.to_string()))?;

    if !session.authenticated() {
        return Err(auth_error("server rejected the credential".to_string()));
    }
    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> SessionError {
    SessionError::Io(io::Error::new(io::ErrorKind::Other, e))
}

fn transfer_error(e: ssh2::Error) -> SessionError {
    SessionError::Transfer(e.to_string())
}

fn exec_error(e: ssh2::Error) -> SessionError {
    SessionError::Exec(e.to_string())
}

/// One authenticated libssh2 session.
pub struct SshSession {
    session: Option<Session>,
    host: String,
    command_timeout: Option<Duration>,
}

impl SshSession {
    /// Run `op` against the session on the blocking pool.
    async fn blocking<F, R>(&mut self, op: F) -> Result<R, SessionError>
    where
        F: FnOnce(&Session) -> Result<R, SessionError> + Send + 'static,
        R: Send + 'static,
    {
        let session = self.session.take().ok_or_else(|| {
            SessionError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "session already closed",
            ))
        })?;
        let (session, result) = tokio::task::spawn_blocking(move || {
            let result = op(&session);
            (session, result)
        })
        .await
        .map_err(join_error)?;
        self.session = Some(session);
        result
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn put(&mut self, local: &Path, remote: &str) -> Result<(), SessionError> {
        let local = local.to_path_buf();
        let remote = PathBuf::from(remote);
        self.blocking(move |session| {
            let sftp = session.sftp().map_err(transfer_error)?;
            let mut source = File::open(&local)?;
            let mut dest = sftp.create(&remote).map_err(transfer_error)?;
            io::copy(&mut source, &mut dest)?;
            dest.fsync().map_err(transfer_error)?;
            Ok(())
        })
        .await
    }

    async fn exists(&mut self, remote: &str) -> Result<bool, SessionError> {
        let remote = PathBuf::from(remote);
        self.blocking(move |session| {
            let sftp = session.sftp().map_err(transfer_error)?;
            match sftp.stat(&remote) {
                Ok(_) => Ok(true),
                Err(e) if e.code() == ErrorCode::SFTP(SFTP_NO_SUCH_FILE) => Ok(false),
                Err(e) => Err(transfer_error(e)),
            }
        })
        .await
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), SessionError> {
        let from = PathBuf::from(from);
        let to = PathBuf::from(to);
        self.blocking(move |session| {
            let sftp = session.sftp().map_err(transfer_error)?;
            let flags = Some(RenameFlags::OVERWRITE | RenameFlags::ATOMIC | RenameFlags::NATIVE);
            match sftp.rename(&from, &to, flags) {
                Ok(()) => Ok(()),
                // SFTPv3 servers refuse to rename onto an existing file.
                Err(first) => {
                    if !refused_for_existing_target(first.code()) || sftp.stat(&to).is_err() {
                        return Err(transfer_error(first));
                    }
                    sftp.unlink(&to).map_err(transfer_error)?;
                    sftp.rename(&from, &to, None).map_err(transfer_error)
                }
            }
        })
        .await
    }

    async fn remove(&mut self, remote: &str) -> Result<(), SessionError> {
        let remote = PathBuf::from(remote);
        self.blocking(move |session| {
            let sftp = session.sftp().map_err(transfer_error)?;
            sftp.unlink(&remote).map_err(transfer_error)
        })
        .await
    }

    async fn exec(&mut self, command: &str) -> Result<ExecOutput, SessionError> {
        let command = command.to_string();
        let timeout = self.command_timeout;
        tracing::debug!(host = %self.host, %command, "Executing remote command");
        self.blocking(move |session| {
            let mut channel = session.channel_session().map_err(exec_error)?;
            channel.exec(&command).map_err(exec_error)?;

            session.set_blocking(false);
            let drained = drain_output(&mut channel, timeout);
            session.set_blocking(true);
            let (stdout, stderr) = drained?;

            channel.wait_close().map_err(exec_error)?;
            let exit_code = channel.exit_status().map_err(exec_error)?;

            Ok(ExecOutput {
                exit_code,
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            })
        })
        .await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };
        let host = self.host.clone();
        tokio::task::spawn_blocking(move || {
            session
                .disconnect(None, "docdrop done", None)
                .map_err(|e| SessionError::Io(io::Error::new(io::ErrorKind::Other, e)))
        })
        .await
        .map_err(join_error)??;
        tracing::debug!(%host, "SSH session closed");
        Ok(())
    }
}

/// Whether a failed rename is the server refusing to replace `to`, as opposed
/// to a permission or path problem.
fn refused_for_existing_target(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::SFTP(SFTP_FAILURE) | ErrorCode::SFTP(SFTP_FILE_ALREADY_EXISTS)
    )
}

/// stdout and stderr of a running remote command.
trait CommandStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    fn at_eof(&self) -> bool;
}

impl CommandStreams for ssh2::Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stderr().read(buf)
    }

    fn at_eof(&self) -> bool {
        self.eof()
    }
}

/// Read both streams in turn until the remote side sends EOF. The session
/// must be non-blocking; a stream with nothing pending yields `WouldBlock`,
/// so neither stream can fill its window while the other is being read.
fn drain_output<S: CommandStreams>(
    streams: &mut S,
    timeout: Option<Duration>,
) -> Result<(Vec<u8>, Vec<u8>), SessionError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = [0u8; 16 * 1024];

    loop {
        let mut progressed = read_available(|b| streams.read_stdout(b), &mut stdout, &mut buf)?;
        progressed |= read_available(|b| streams.read_stderr(b), &mut stderr, &mut buf)?;

        if !progressed && streams.at_eof() {
            return Ok((stdout, stderr));
        }
        if let (Some(deadline), Some(timeout)) = (deadline, timeout) {
            if Instant::now() >= deadline {
                return Err(SessionError::Exec(format!(
                    "remote command timed out after {}s",
                    timeout.as_secs()
                )));
            }
        }
        if !progressed {
            std::thread::sleep(EXEC_POLL_INTERVAL);
        }
    }
}

fn read_available(
    mut read: impl FnMut(&mut [u8]) -> io::Result<usize>,
    out: &mut Vec<u8>,
    buf: &mut [u8],
) -> io::Result<bool> {
    let mut progressed = false;
    loop {
        match read(buf) {
            Ok(0) => return Ok(progressed),
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(progressed),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "docdrop dropped session", None);
        }
    }
}
