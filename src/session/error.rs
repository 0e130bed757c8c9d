// ABOUTME: Error types for the session layer.
// ABOUTME: Structured failure kinds drive control flow; no message matching.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure kinds reported by the transport collaborator while opening a
/// session. `UnknownHostKey` is a decision point, not a terminal failure;
/// the session manager intercepts it before classification.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication failed")]
    AuthFailed,

    #[error("server offered an unverified {key_type} host key")]
    UnknownHostKey { key_type: String, key_material: String },

    #[error("transport error: {0}")]
    Protocol(String),
}

/// Terminal outcomes of a connect attempt.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("incomplete server or user information")]
    IncompleteInfo,

    #[error("a session is already active")]
    AlreadyConnected,

    #[error("no host key decision is pending")]
    NoPendingDecision,

    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication failed")]
    AuthFailed,

    #[error("host key for {0} was not accepted")]
    HostKeyRejected(String),

    #[error("trust store error: {0}")]
    TrustStore(#[from] crate::trust::Error),

    #[error("transport error: {0}")]
    Protocol(String),
}

/// Outcomes of file and directory operations. `NotConnected` is an expected
/// outcome, not a fault: every operation reports it instead of panicking
/// when no live session exists.
#[derive(Debug, Error)]
pub enum OpError {
    #[error("not connected")]
    NotConnected,

    #[error("remote operation failed: {0}")]
    Remote(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("target already exists: {0}")]
    AlreadyExists(PathBuf),

    #[error("no such local file: {0}")]
    LocalNotFound(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(String),
}
