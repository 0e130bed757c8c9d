// ABOUTME: Production transport bound to russh and russh-sftp.
// ABOUTME: Failures are classified structurally, never by matching error text.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use russh::Disconnect;
use russh::client::{self, AuthResult, Config, Handle};
use russh::keys::ssh_key;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::error::{OpError, TransportError};
use super::transport::{RemoteEntry, SftpChannel, Transport};
use super::{Credential, ServerEndpoint};
use crate::trust::TrustStore;

/// Verifies the server key against the trust store during the handshake.
/// An unverified key is recorded in `offered` and rejected, so the failed
/// connect can be escalated to a user decision instead of a plain error.
struct HostKeyVerifier {
    host: String,
    trust: TrustStore,
    offered: Arc<Mutex<Option<(String, String)>>>,
}

impl client::Handler for HostKeyVerifier {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let key_type = server_public_key.algorithm().as_str().to_string();
        let key_material = encode_key(server_public_key);

        match self.trust.contains(&self.host, &key_material) {
            Ok(true) => Ok(true),
            Ok(false) => {
                *self.offered.lock() = Some((key_type, key_material));
                Ok(false)
            }
            Err(e) => {
                // Unreadable store means the key cannot be verified.
                tracing::warn!(error = %e, "trust store unreadable; rejecting host key");
                *self.offered.lock() = Some((key_type, key_material));
                Ok(false)
            }
        }
    }
}

/// The base64 blob of the key's OpenSSH encoding, without the algorithm
/// prefix or comment.
fn encode_key(key: &ssh_key::PublicKey) -> String {
    key.to_openssh()
        .ok()
        .and_then(|s| s.split_whitespace().nth(1).map(str::to_string))
        .unwrap_or_default()
}

/// Production [`Transport`] backed by russh and russh-sftp.
pub struct RusshTransport;

#[async_trait]
impl Transport for RusshTransport {
    async fn open(
        &self,
        endpoint: &ServerEndpoint,
        credential: &Credential,
        trust: &TrustStore,
    ) -> Result<Box<dyn SftpChannel>, TransportError> {
        let addr = format!("{}:{}", endpoint.host, endpoint.port);

        let stream = timeout(endpoint.timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::Timeout(endpoint.timeout))?
            .map_err(|e| classify_io(&addr, endpoint.timeout, e))?;

        let config = Arc::new(Config {
            inactivity_timeout: Some(Duration::from_secs(30)),
            ..Default::default()
        });
        let offered = Arc::new(Mutex::new(None));
        let handler = HostKeyVerifier {
            host: endpoint.host.clone(),
            trust: trust.clone(),
            offered: Arc::clone(&offered),
        };

        let mut handle = match timeout(
            endpoint.timeout,
            client::connect_stream(config, stream, handler),
        )
        .await
        {
            Err(_) => return Err(TransportError::Timeout(endpoint.timeout)),
            Ok(Err(e)) => {
                if let Some((key_type, key_material)) = offered.lock().take() {
                    return Err(TransportError::UnknownHostKey {
                        key_type,
                        key_material,
                    });
                }
                return Err(TransportError::Protocol(e.to_string()));
            }
            Ok(Ok(handle)) => handle,
        };

        let auth = timeout(
            endpoint.timeout,
            handle.authenticate_password(&credential.username, credential.password()),
        )
        .await
        .map_err(|_| TransportError::Timeout(endpoint.timeout))?
        .map_err(|e| TransportError::Protocol(e.to_string()))?;

        match auth {
            AuthResult::Success => {}
            AuthResult::Failure { .. } => return Err(TransportError::AuthFailed),
        }

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        tracing::debug!(host = %endpoint.host, port = endpoint.port, "SFTP subsystem ready");
        Ok(Box::new(RusshChannel { handle, sftp }))
    }
}

fn classify_io(addr: &str, timeout: Duration, e: io::Error) -> TransportError {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => TransportError::Refused(addr.to_string()),
        io::ErrorKind::TimedOut => TransportError::Timeout(timeout),
        _ => TransportError::Unreachable(format!("{addr}: {e}")),
    }
}

struct RusshChannel {
    handle: Handle<HostKeyVerifier>,
    sftp: SftpSession,
}

#[async_trait]
impl SftpChannel for RusshChannel {
    async fn canonicalize(&mut self, path: &str) -> Result<String, OpError> {
        self.sftp.canonicalize(path).await.map_err(|e| OpError::Remote(e.to_string()))
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, OpError> {
        let read_dir = self.sftp.read_dir(path).await.map_err(|e| OpError::Remote(e.to_string()))?;
        let mut entries = Vec::new();
        for entry in read_dir {
            let metadata = entry.metadata();
            entries.push(RemoteEntry {
                name: entry.file_name(),
                is_dir: metadata.is_dir(),
                size: metadata.size.unwrap_or(0),
                modified: metadata
                    .mtime
                    .and_then(|t| Utc.timestamp_opt(i64::from(t), 0).single()),
                permissions: metadata.permissions,
            });
        }
        Ok(entries)
    }

    async fn is_dir(&mut self, path: &str) -> Result<bool, OpError> {
        let metadata = self.sftp.metadata(path).await.map_err(|e| OpError::Remote(e.to_string()))?;
        Ok(metadata.is_dir())
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), OpError> {
        self.sftp.create_dir(path).await.map_err(|e| OpError::Remote(e.to_string()))
    }

    async fn rmdir(&mut self, path: &str) -> Result<(), OpError> {
        self.sftp.remove_dir(path).await.map_err(|e| OpError::Remote(e.to_string()))
    }

    async fn remove(&mut self, path: &str) -> Result<(), OpError> {
        self.sftp.remove_file(path).await.map_err(|e| OpError::Remote(e.to_string()))
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), OpError> {
        self.sftp.rename(from, to).await.map_err(|e| OpError::Remote(e.to_string()))
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, OpError> {
        let mut src = self.sftp.open(remote).await.map_err(|e| OpError::Remote(e.to_string()))?;
        let mut dst = tokio::fs::File::create(local).await?;
        let bytes = tokio::io::copy(&mut src, &mut dst).await?;
        Ok(bytes)
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, OpError> {
        let mut src = tokio::fs::File::open(local).await?;
        let mut dst = self
            .sftp
            .open_with_flags(
                remote,
                OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            )
            .await
            .map_err(|e| OpError::Remote(e.to_string()))?;
        let bytes = tokio::io::copy(&mut src, &mut dst).await?;
        Ok(bytes)
    }

    fn is_live(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!(error = %e, "disconnect notification failed");
        }
    }
}
