// ABOUTME: Session lifecycle management: connect, verify, retry, quit.
// ABOUTME: Owns the credential during authentication and the open channel.

mod error;
mod russh;
mod transport;

use std::env;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use zeroize::Zeroizing;

pub use self::russh::RusshTransport;
pub use error::{ConnectError, OpError, TransportError};
pub use transport::{RemoteEntry, SftpChannel, Transport};

use crate::trust::TrustStore;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Where to connect. Immutable once a session exists.
#[derive(Debug, Clone)]
pub struct ServerEndpoint {
    pub host: String,
    pub port: u16,
    pub timeout: Duration,
}

impl ServerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn is_valid(&self) -> bool {
        !self.host.trim().is_empty() && self.port != 0
    }
}

/// Login material. The password buffer is wiped on drop and dropped as soon
/// as a connect attempt reaches a terminal outcome. Wiping is best-effort
/// only: the SSH library may copy the bytes internally during
/// authentication, and those copies are outside our control.
pub struct Credential {
    pub username: String,
    password: Zeroizing<String>,
    /// Key-file passphrases are unused by password authentication; the
    /// field is retained for parity with the credential record.
    pub passphrase: Zeroizing<String>,
}

impl Credential {
    pub fn new(username: impl Into<String>, password: Zeroizing<String>) -> Self {
        Self {
            username: username.into(),
            password,
            passphrase: Zeroizing::new(String::new()),
        }
    }

    /// Exposed for the transport during authentication.
    pub fn password(&self) -> &str {
        &self.password
    }

    fn is_valid(&self) -> bool {
        !self.username.trim().is_empty() && !self.password.is_empty()
    }

    fn clear_password(&mut self) {
        // Replacing the Zeroizing wrapper wipes the old buffer on drop.
        self.password = Zeroizing::new(String::new());
    }
}

/// A host key offered by a server the trust store does not yet know.
#[derive(Debug, Clone)]
pub struct OfferedKey {
    pub host: String,
    pub key_type: String,
    pub key_material: String,
}

/// Result of a connect attempt that did not fail outright.
#[derive(Debug)]
pub enum Connect {
    Established,
    /// The server offered a key absent from the trust store. Call
    /// [`SessionManager::accept_host_key`] or
    /// [`SessionManager::decline_host_key`] to proceed.
    KeyDecision(OfferedKey),
}

/// One local directory-listing entry.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

struct PendingDecision {
    endpoint: ServerEndpoint,
    credential: Credential,
    key: OfferedKey,
    trust: TrustStore,
}

struct Active {
    channel: Box<dyn SftpChannel>,
    endpoint: ServerEndpoint,
    timeout: Duration,
    remote_cwd: String,
    local_cwd: PathBuf,
}

enum State {
    Disconnected,
    AwaitingKeyDecision(Box<PendingDecision>),
    Connected(Active),
}

/// Owns the network session and SFTP channel, drives the
/// connect/verify/retry state machine, and guards every operation against
/// a missing or dead connection.
pub struct SessionManager<T: Transport> {
    transport: T,
    state: State,
}

impl<T: Transport> SessionManager<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            state: State::Disconnected,
        }
    }

    /// Open a session against `endpoint`. On an unknown host key this
    /// parks the attempt in `AwaitingKeyDecision` and returns the offered
    /// key; every other failure is terminal and clears the credential.
    pub async fn connect(
        &mut self,
        endpoint: ServerEndpoint,
        mut credential: Credential,
        trust_path: &str,
    ) -> Result<Connect, ConnectError> {
        match std::mem::replace(&mut self.state, State::Disconnected) {
            State::Connected(active) => {
                self.state = State::Connected(active);
                return Err(ConnectError::AlreadyConnected);
            }
            State::AwaitingKeyDecision(mut pending) => {
                // A fresh connect abandons the undecided attempt.
                pending.credential.clear_password();
            }
            State::Disconnected => {}
        }

        if !endpoint.is_valid() || !credential.is_valid() {
            credential.clear_password();
            return Err(ConnectError::IncompleteInfo);
        }

        let trust = TrustStore::resolve(trust_path)?;
        trust.ensure_exists()?;

        match self.transport.open(&endpoint, &credential, &trust).await {
            Ok(channel) => {
                self.establish(channel, endpoint, credential).await;
                Ok(Connect::Established)
            }
            Err(TransportError::UnknownHostKey {
                key_type,
                key_material,
            }) => {
                let key = OfferedKey {
                    host: endpoint.host.clone(),
                    key_type,
                    key_material,
                };
                self.state = State::AwaitingKeyDecision(Box::new(PendingDecision {
                    endpoint,
                    credential,
                    key: key.clone(),
                    trust,
                }));
                Ok(Connect::KeyDecision(key))
            }
            Err(other) => {
                credential.clear_password();
                Err(classify(&endpoint.host, other))
            }
        }
    }

    /// Record the offered key in the trust store and retry the connect
    /// exactly once. A second unknown-key rejection is terminal, as is an
    /// append failure.
    pub async fn accept_host_key(&mut self) -> Result<(), ConnectError> {
        let pending = match std::mem::replace(&mut self.state, State::Disconnected) {
            State::AwaitingKeyDecision(pending) => *pending,
            other => {
                self.state = other;
                return Err(ConnectError::NoPendingDecision);
            }
        };
        let PendingDecision {
            endpoint,
            mut credential,
            key,
            trust,
        } = pending;

        if let Err(e) = trust.append(&key.host, &key.key_type, &key.key_material) {
            tracing::warn!(error = %e, "failed to record accepted host key");
            credential.clear_password();
            return Err(ConnectError::HostKeyRejected(key.host));
        }

        match self.transport.open(&endpoint, &credential, &trust).await {
            Ok(channel) => {
                self.establish(channel, endpoint, credential).await;
                Ok(())
            }
            Err(e) => {
                credential.clear_password();
                Err(classify(&endpoint.host, e))
            }
        }
    }

    /// Abandon a pending key decision, leaving the trust store untouched.
    /// Returns the declined key, or `None` when no decision was pending.
    pub fn decline_host_key(&mut self) -> Option<OfferedKey> {
        match std::mem::replace(&mut self.state, State::Disconnected) {
            State::AwaitingKeyDecision(pending) => {
                let PendingDecision {
                    mut credential,
                    key,
                    ..
                } = *pending;
                credential.clear_password();
                tracing::info!(host = %key.host, "host key declined");
                Some(key)
            }
            other => {
                self.state = other;
                None
            }
        }
    }

    async fn establish(
        &mut self,
        mut channel: Box<dyn SftpChannel>,
        endpoint: ServerEndpoint,
        mut credential: Credential,
    ) {
        credential.clear_password();
        let remote_cwd = match channel.canonicalize(".").await {
            Ok(path) => path,
            Err(e) => {
                tracing::debug!(error = %e, "could not resolve remote home, falling back to /");
                "/".to_string()
            }
        };
        let local_cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let timeout = endpoint.timeout;
        tracing::info!(host = %endpoint.host, port = endpoint.port, "connected");
        self.state = State::Connected(Active {
            channel,
            endpoint,
            timeout,
            remote_cwd,
            local_cwd,
        });
    }

    pub fn awaiting_key_decision(&self) -> bool {
        matches!(self.state, State::AwaitingKeyDecision(_))
    }

    /// Pure liveness query: a session exists and its transport handle still
    /// reports live. Performs no teardown; see [`Self::check_connected`].
    pub fn is_connected(&self) -> bool {
        match &self.state {
            State::Connected(active) => active.channel.is_live(),
            _ => false,
        }
    }

    /// Self-healing variant of [`Self::is_connected`]: when the state flag
    /// and the transport handle disagree, tears the session down as an
    /// implicit quit. The dispatcher calls this before every action.
    pub async fn check_connected(&mut self) -> bool {
        let stale = matches!(&self.state, State::Connected(active) if !active.channel.is_live());
        if stale {
            tracing::warn!("session handle reports dead; tearing down");
            self.quit().await;
        }
        self.is_connected()
    }

    /// Close channel and session. Idempotent; returns false when there was
    /// nothing to close.
    pub async fn quit(&mut self) -> bool {
        match std::mem::replace(&mut self.state, State::Disconnected) {
            State::Connected(mut active) => {
                active.channel.close().await;
                tracing::info!(host = %active.endpoint.host, "disconnected");
                true
            }
            State::AwaitingKeyDecision(mut pending) => {
                pending.credential.clear_password();
                false
            }
            State::Disconnected => false,
        }
    }

    fn active(&self) -> Result<&Active, OpError> {
        match &self.state {
            State::Connected(active) => Ok(active),
            _ => Err(OpError::NotConnected),
        }
    }

    fn active_mut(&mut self) -> Result<&mut Active, OpError> {
        match &mut self.state {
            State::Connected(active) => Ok(active),
            _ => Err(OpError::NotConnected),
        }
    }

    /// Reports `NotConnected` without touching the configured value when no
    /// session is live.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), OpError> {
        let active = self.active_mut()?;
        active.timeout = timeout;
        Ok(())
    }

    pub fn timeout(&self) -> Result<Duration, OpError> {
        Ok(self.active()?.timeout)
    }

    /// Current remote working directory.
    pub fn pwd(&self) -> Result<String, OpError> {
        Ok(self.active()?.remote_cwd.clone())
    }

    /// Change the remote working directory, validating that the target
    /// exists and is a directory.
    pub async fn cd(&mut self, path: &str) -> Result<String, OpError> {
        let active = self.active_mut()?;
        let target = join_remote(&active.remote_cwd, path);
        let t = active.timeout;
        let resolved = bounded(t, active.channel.canonicalize(&target)).await?;
        if !bounded(t, active.channel.is_dir(&resolved)).await? {
            return Err(OpError::NotADirectory(resolved));
        }
        active.remote_cwd = resolved.clone();
        Ok(resolved)
    }

    /// List the remote working directory.
    pub async fn list_remote(&mut self) -> Result<Vec<RemoteEntry>, OpError> {
        let active = self.active_mut()?;
        let path = active.remote_cwd.clone();
        let t = active.timeout;
        bounded(t, active.channel.list(&path)).await
    }

    pub async fn mkdir(&mut self, name: &str) -> Result<(), OpError> {
        let active = self.active_mut()?;
        let path = join_remote(&active.remote_cwd, name);
        let t = active.timeout;
        bounded(t, active.channel.mkdir(&path)).await
    }

    pub async fn remove_remote_file(&mut self, name: &str) -> Result<(), OpError> {
        let active = self.active_mut()?;
        let path = join_remote(&active.remote_cwd, name);
        let t = active.timeout;
        bounded(t, active.channel.remove(&path)).await
    }

    pub async fn rename_remote(&mut self, old: &str, new: &str) -> Result<(), OpError> {
        let active = self.active_mut()?;
        let from = join_remote(&active.remote_cwd, old);
        let to = join_remote(&active.remote_cwd, new);
        let t = active.timeout;
        bounded(t, active.channel.rename(&from, &to)).await
    }

    /// Delete a remote directory and everything under it. The underlying
    /// remove-directory primitive fails on non-empty directories, so
    /// children are removed depth-first and the directory itself last.
    pub async fn remove_remote_dir(&mut self, name: &str) -> Result<(), OpError> {
        let root = {
            let active = self.active()?;
            join_remote(&active.remote_cwd, name)
        };
        self.remove_dir_tree(root).await
    }

    async fn remove_dir_tree(&mut self, path: String) -> Result<(), OpError> {
        let entries = {
            let active = self.active_mut()?;
            let t = active.timeout;
            bounded(t, active.channel.list(&path)).await?
        };
        for entry in entries {
            if entry.name == "." || entry.name == ".." {
                continue;
            }
            let child = join_remote(&path, &entry.name);
            if entry.is_dir {
                Box::pin(self.remove_dir_tree(child)).await?;
            } else {
                let active = self.active_mut()?;
                let t = active.timeout;
                bounded(t, active.channel.remove(&child)).await?;
            }
        }
        let active = self.active_mut()?;
        let t = active.timeout;
        bounded(t, active.channel.rmdir(&path)).await
    }

    /// Fetch a remote file from the working directory into the local
    /// working directory under `local_name`.
    pub async fn download(&mut self, remote_name: &str, local_name: &str) -> Result<u64, OpError> {
        let active = self.active_mut()?;
        let remote = join_remote(&active.remote_cwd, remote_name);
        let local = active.local_cwd.join(local_name);
        let t = active.timeout;
        bounded(t, active.channel.download(&remote, &local)).await
    }

    /// Upload a file from the local working directory into the remote
    /// working directory, keeping its base name. A missing local file is
    /// reported without contacting the server.
    pub async fn upload(&mut self, local_name: &str) -> Result<u64, OpError> {
        let active = self.active_mut()?;
        let local = active.local_cwd.join(local_name);
        if !local.is_file() {
            return Err(OpError::LocalNotFound(local));
        }
        let base = Path::new(local_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| local_name.to_string());
        let remote = join_remote(&active.remote_cwd, &base);
        let t = active.timeout;
        bounded(t, active.channel.upload(&local, &remote)).await
    }

    /// Current local working directory.
    pub fn local_cwd(&self) -> Result<PathBuf, OpError> {
        Ok(self.active()?.local_cwd.clone())
    }

    /// Resolve a name against the local working directory (for existence
    /// checks before overwriting).
    pub fn local_path(&self, name: &str) -> Result<PathBuf, OpError> {
        Ok(self.active()?.local_cwd.join(name))
    }

    pub fn change_local_dir(&mut self, dir: &str) -> Result<PathBuf, OpError> {
        let active = self.active_mut()?;
        let target = if Path::new(dir).is_absolute() {
            PathBuf::from(dir)
        } else {
            active.local_cwd.join(dir)
        };
        let canonical = target.canonicalize()?;
        if !canonical.is_dir() {
            return Err(OpError::NotADirectory(canonical.display().to_string()));
        }
        active.local_cwd = canonical.clone();
        Ok(canonical)
    }

    pub fn list_local(&self) -> Result<Vec<LocalEntry>, OpError> {
        let active = self.active()?;
        let mut entries = Vec::new();
        for entry in std::fs::read_dir(&active.local_cwd)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            entries.push(LocalEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
                modified: metadata.modified().ok(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    /// Rename within the local working directory, refusing to overwrite an
    /// existing target.
    pub fn rename_local(&mut self, old: &str, new: &str) -> Result<(), OpError> {
        let active = self.active_mut()?;
        let from = active.local_cwd.join(old);
        let to = active.local_cwd.join(new);
        if to.exists() {
            return Err(OpError::AlreadyExists(to));
        }
        std::fs::rename(from, to)?;
        Ok(())
    }
}

fn classify(host: &str, e: TransportError) -> ConnectError {
    match e {
        TransportError::Unreachable(detail) => ConnectError::Unreachable(detail),
        TransportError::Refused(detail) => ConnectError::Refused(detail),
        TransportError::Timeout(d) => ConnectError::Timeout(d),
        TransportError::AuthFailed => ConnectError::AuthFailed,
        // A rejection after the key was already accepted once is terminal.
        TransportError::UnknownHostKey { .. } => ConnectError::HostKeyRejected(host.to_string()),
        TransportError::Protocol(detail) => ConnectError::Protocol(detail),
    }
}

async fn bounded<F, R>(limit: Duration, op: F) -> Result<R, OpError>
where
    F: Future<Output = Result<R, OpError>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(OpError::Timeout(limit)),
    }
}

fn join_remote(cwd: &str, name: &str) -> String {
    if name.starts_with('/') {
        name.to_string()
    } else if cwd.ends_with('/') {
        format!("{cwd}{name}")
    } else {
        format!("{cwd}/{name}")
    }
}
