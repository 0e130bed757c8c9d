// ABOUTME: Host-key trust store backed by a plain-text file.
// ABOUTME: One "<host> <keyType> <keyMaterial>" entry per line, append-only.

use std::env;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("HOME is not set; cannot resolve the default trust store path")]
    HomeNotSet,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// File name of the default store, under `<home>/.ssh/`.
pub const DEFAULT_FILE_NAME: &str = "sftp_hosts";

/// Handle onto the trust-store file. Single-process, single-threaded access
/// only; entries are appended, never rewritten or deduplicated.
#[derive(Debug, Clone)]
pub struct TrustStore {
    path: PathBuf,
}

impl TrustStore {
    /// Resolve a user-supplied path. Empty input selects
    /// `<home>/.ssh/sftp_hosts`, creating `<home>/.ssh` if missing; a `~/`
    /// prefix expands to the home directory; anything else is taken as-is.
    pub fn resolve(user_supplied: &str) -> Result<Self> {
        let trimmed = user_supplied.trim();
        let path = if trimmed.is_empty() {
            let ssh_dir = home_dir()?.join(".ssh");
            if !ssh_dir.is_dir() {
                fs::create_dir_all(&ssh_dir)?;
            }
            ssh_dir.join(DEFAULT_FILE_NAME)
        } else if let Some(rest) = trimmed.strip_prefix("~/") {
            home_dir()?.join(rest)
        } else {
            PathBuf::from(trimmed)
        };
        Ok(Self { path })
    }

    /// Handle onto an explicit path, skipping resolution. Useful for tests.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the file (and its parent directories) if absent.
    pub fn ensure_exists(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        tracing::debug!(path = %self.path.display(), "created trust store");
        Ok(())
    }

    /// Whether any line mentions both the host and the key material.
    /// Deliberately a substring match, so entries written by other tools
    /// with extra fields still count as trusted.
    pub fn contains(&self, host: &str, key_material: &str) -> Result<bool> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.contains(host) && line.contains(key_material) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Append one entry and flush it durably before returning.
    pub fn append(&self, host: &str, key_type: &str, key_material: &str) -> Result<()> {
        self.ensure_exists()?;
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        writeln!(file, "{host} {key_type} {key_material}")?;
        file.sync_all()?;
        tracing::info!(host, key_type, "recorded host key");
        Ok(())
    }
}

fn home_dir() -> Result<PathBuf> {
    env::var("HOME").map(PathBuf::from).map_err(|_| Error::HomeNotSet)
}
