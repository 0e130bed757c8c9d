// ABOUTME: Collaborator traits for the SSH/SFTP transport.
// ABOUTME: The session state machine is written against these, not russh.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::{OpError, TransportError};
use super::{Credential, ServerEndpoint};
use crate::trust::TrustStore;

/// One entry of a remote directory listing.
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
    pub permissions: Option<u32>,
}

/// An open SFTP subsystem binding. Exists only while the session lives and
/// is destroyed together with it.
#[async_trait]
pub trait SftpChannel: Send {
    async fn canonicalize(&mut self, path: &str) -> Result<String, OpError>;

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, OpError>;

    async fn is_dir(&mut self, path: &str) -> Result<bool, OpError>;

    async fn mkdir(&mut self, path: &str) -> Result<(), OpError>;

    /// Non-recursive; fails on non-empty directories. Recursive deletion is
    /// layered above this primitive.
    async fn rmdir(&mut self, path: &str) -> Result<(), OpError>;

    async fn remove(&mut self, path: &str) -> Result<(), OpError>;

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), OpError>;

    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, OpError>;

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, OpError>;

    /// Cheap liveness probe of the underlying session.
    fn is_live(&self) -> bool;

    /// Best-effort teardown of channel and session.
    async fn close(&mut self);
}

/// Opens authenticated sessions. Host keys are verified against the given
/// trust store; an unverified key aborts with
/// [`TransportError::UnknownHostKey`] so the caller can escalate it to a
/// user decision.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        endpoint: &ServerEndpoint,
        credential: &Credential,
        trust: &TrustStore,
    ) -> Result<Box<dyn SftpChannel>, TransportError>;
}
