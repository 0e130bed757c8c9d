// ABOUTME: In-memory SFTP server stand-in implementing the transport traits.
// ABOUTME: Records every channel call so tests can assert on operation order.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use skiff::session::{
    Credential, OpError, RemoteEntry, ServerEndpoint, SftpChannel, Transport, TransportError,
};
use skiff::trust::TrustStore;

pub const KEY_TYPE: &str = "ssh-ed25519";
pub const KEY_MATERIAL: &str = "AAAAC3NzaFAKEKEYBLOBtestserver";

#[derive(Clone)]
enum Node {
    File(Vec<u8>),
    Dir,
}

/// Shared state of one fake server: a path-keyed tree, a log of every
/// channel call, and the order in which nodes were deleted.
#[derive(Default)]
pub struct ServerState {
    nodes: BTreeMap<String, Node>,
    pub ops_log: Vec<String>,
    pub deletions: Vec<String>,
}

/// How the next `open` should fail, if at all.
#[derive(Clone, Copy)]
pub enum FailMode {
    Unreachable,
    Refused,
    Timeout,
}

pub struct FakeTransport {
    pub state: Arc<Mutex<ServerState>>,
    pub live: Arc<AtomicBool>,
    password: String,
    fail: Option<FailMode>,
    /// Pretend the key is never trusted, regardless of the store contents.
    always_unknown: bool,
    /// Kill the connection after this many further channel calls.
    kill_after: Arc<Mutex<Option<usize>>>,
}

impl FakeTransport {
    pub fn new(password: &str) -> Self {
        let mut state = ServerState::default();
        state.nodes.insert("/".to_string(), Node::Dir);
        Self {
            state: Arc::new(Mutex::new(state)),
            live: Arc::new(AtomicBool::new(false)),
            password: password.to_string(),
            fail: None,
            always_unknown: false,
            kill_after: Arc::new(Mutex::new(None)),
        }
    }

    pub fn failing(mut self, mode: FailMode) -> Self {
        self.fail = Some(mode);
        self
    }

    pub fn always_unknown_key(mut self) -> Self {
        self.always_unknown = true;
        self
    }

    /// The connection dies after `ops` further channel calls; the failing
    /// call reports a remote error and the handle goes dead.
    pub fn kill_after(self, ops: usize) -> Self {
        *self.kill_after.lock().unwrap() = Some(ops);
        self
    }

    pub fn add_dir(&self, path: &str) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(path.to_string(), Node::Dir);
    }

    pub fn add_file(&self, path: &str, contents: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(path.to_string(), Node::File(contents.to_vec()));
    }

    pub fn ops_log(&self) -> Vec<String> {
        self.state.lock().unwrap().ops_log.clone()
    }

    pub fn deletions(&self) -> Vec<String> {
        self.state.lock().unwrap().deletions.clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(
        &self,
        endpoint: &ServerEndpoint,
        credential: &Credential,
        trust: &TrustStore,
    ) -> Result<Box<dyn SftpChannel>, TransportError> {
        match self.fail {
            Some(FailMode::Unreachable) => {
                return Err(TransportError::Unreachable(endpoint.host.clone()));
            }
            Some(FailMode::Refused) => {
                return Err(TransportError::Refused(format!(
                    "{}:{}",
                    endpoint.host, endpoint.port
                )));
            }
            Some(FailMode::Timeout) => {
                return Err(TransportError::Timeout(endpoint.timeout));
            }
            None => {}
        }

        // Host-key verification against the trust store, like the real
        // transport's handshake handler.
        let known = !self.always_unknown
            && trust
                .contains(&endpoint.host, KEY_MATERIAL)
                .map_err(|e| TransportError::Protocol(e.to_string()))?;
        if !known {
            return Err(TransportError::UnknownHostKey {
                key_type: KEY_TYPE.to_string(),
                key_material: KEY_MATERIAL.to_string(),
            });
        }

        if credential.password() != self.password {
            return Err(TransportError::AuthFailed);
        }

        self.live.store(true, Ordering::SeqCst);
        Ok(Box::new(FakeChannel {
            state: Arc::clone(&self.state),
            live: Arc::clone(&self.live),
            kill_after: Arc::clone(&self.kill_after),
        }))
    }
}

pub struct FakeChannel {
    state: Arc<Mutex<ServerState>>,
    live: Arc<AtomicBool>,
    kill_after: Arc<Mutex<Option<usize>>>,
}

impl FakeChannel {
    /// Log the call and enforce the kill switch.
    fn tick(&self, op: &str, arg: &str) -> Result<(), OpError> {
        self.state
            .lock()
            .unwrap()
            .ops_log
            .push(format!("{op} {arg}"));
        let mut kill = self.kill_after.lock().unwrap();
        if let Some(remaining) = kill.as_mut() {
            if *remaining == 0 {
                self.live.store(false, Ordering::SeqCst);
                return Err(OpError::Remote("connection lost".to_string()));
            }
            *remaining -= 1;
        }
        Ok(())
    }
}

fn normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for comp in path.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

fn parent_of(path: &str) -> String {
    match path.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => path[..idx].to_string(),
        None => "/".to_string(),
    }
}

#[async_trait]
impl SftpChannel for FakeChannel {
    async fn canonicalize(&mut self, path: &str) -> Result<String, OpError> {
        self.tick("canonicalize", path)?;
        let normalized = normalize(path);
        let state = self.state.lock().unwrap();
        if state.nodes.contains_key(&normalized) {
            Ok(normalized)
        } else {
            Err(OpError::Remote(format!("no such path: {normalized}")))
        }
    }

    async fn list(&mut self, path: &str) -> Result<Vec<RemoteEntry>, OpError> {
        self.tick("list", path)?;
        let dir = normalize(path);
        let state = self.state.lock().unwrap();
        match state.nodes.get(&dir) {
            Some(Node::Dir) => {}
            _ => return Err(OpError::Remote(format!("not a directory: {dir}"))),
        }
        // Real servers report the dot entries; callers must skip them.
        let mut entries = vec![
            RemoteEntry {
                name: ".".to_string(),
                is_dir: true,
                size: 0,
                modified: None,
                permissions: Some(0o755),
            },
            RemoteEntry {
                name: "..".to_string(),
                is_dir: true,
                size: 0,
                modified: None,
                permissions: Some(0o755),
            },
        ];
        let prefix = if dir == "/" { String::new() } else { dir.clone() };
        for (path, node) in state.nodes.iter() {
            if path == &dir {
                continue;
            }
            if let Some(rest) = path.strip_prefix(&format!("{prefix}/")) {
                if !rest.contains('/') {
                    entries.push(RemoteEntry {
                        name: rest.to_string(),
                        is_dir: matches!(node, Node::Dir),
                        size: match node {
                            Node::File(data) => data.len() as u64,
                            Node::Dir => 0,
                        },
                        modified: None,
                        permissions: Some(0o755),
                    });
                }
            }
        }
        Ok(entries)
    }

    async fn is_dir(&mut self, path: &str) -> Result<bool, OpError> {
        self.tick("is_dir", path)?;
        let normalized = normalize(path);
        let state = self.state.lock().unwrap();
        match state.nodes.get(&normalized) {
            Some(Node::Dir) => Ok(true),
            Some(Node::File(_)) => Ok(false),
            None => Err(OpError::Remote(format!("no such path: {normalized}"))),
        }
    }

    async fn mkdir(&mut self, path: &str) -> Result<(), OpError> {
        self.tick("mkdir", path)?;
        let normalized = normalize(path);
        let mut state = self.state.lock().unwrap();
        if state.nodes.contains_key(&normalized) {
            return Err(OpError::Remote(format!("already exists: {normalized}")));
        }
        if !matches!(state.nodes.get(&parent_of(&normalized)), Some(Node::Dir)) {
            return Err(OpError::Remote(format!(
                "no such directory: {}",
                parent_of(&normalized)
            )));
        }
        state.nodes.insert(normalized, Node::Dir);
        Ok(())
    }

    async fn rmdir(&mut self, path: &str) -> Result<(), OpError> {
        self.tick("rmdir", path)?;
        let normalized = normalize(path);
        let mut state = self.state.lock().unwrap();
        match state.nodes.get(&normalized) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => {
                return Err(OpError::Remote(format!("not a directory: {normalized}")));
            }
            None => return Err(OpError::Remote(format!("no such path: {normalized}"))),
        }
        let child_prefix = format!("{normalized}/");
        if state.nodes.keys().any(|k| k.starts_with(&child_prefix)) {
            return Err(OpError::Remote(format!("directory not empty: {normalized}")));
        }
        state.nodes.remove(&normalized);
        state.deletions.push(normalized);
        Ok(())
    }

    async fn remove(&mut self, path: &str) -> Result<(), OpError> {
        self.tick("remove", path)?;
        let normalized = normalize(path);
        let mut state = self.state.lock().unwrap();
        match state.nodes.get(&normalized) {
            Some(Node::File(_)) => {}
            Some(Node::Dir) => {
                return Err(OpError::Remote(format!("is a directory: {normalized}")));
            }
            None => return Err(OpError::Remote(format!("no such file: {normalized}"))),
        }
        state.nodes.remove(&normalized);
        state.deletions.push(normalized);
        Ok(())
    }

    async fn rename(&mut self, from: &str, to: &str) -> Result<(), OpError> {
        self.tick("rename", &format!("{from} -> {to}"))?;
        let from = normalize(from);
        let to = normalize(to);
        let mut state = self.state.lock().unwrap();
        if state.nodes.contains_key(&to) {
            return Err(OpError::Remote(format!("already exists: {to}")));
        }
        let Some(node) = state.nodes.remove(&from) else {
            return Err(OpError::Remote(format!("no such path: {from}")));
        };
        // Re-key any children when renaming a directory.
        if matches!(node, Node::Dir) {
            let prefix = format!("{from}/");
            let moved: Vec<(String, Node)> = state
                .nodes
                .iter()
                .filter(|(k, _)| k.starts_with(&prefix))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (old_key, value) in moved {
                state.nodes.remove(&old_key);
                let new_key = format!("{to}/{}", &old_key[prefix.len()..]);
                state.nodes.insert(new_key, value);
            }
        }
        state.nodes.insert(to, node);
        Ok(())
    }

    async fn download(&mut self, remote: &str, local: &Path) -> Result<u64, OpError> {
        self.tick("download", remote)?;
        let normalized = normalize(remote);
        let data = {
            let state = self.state.lock().unwrap();
            match state.nodes.get(&normalized) {
                Some(Node::File(data)) => data.clone(),
                _ => return Err(OpError::Remote(format!("no such file: {normalized}"))),
            }
        };
        std::fs::write(local, &data)?;
        Ok(data.len() as u64)
    }

    async fn upload(&mut self, local: &Path, remote: &str) -> Result<u64, OpError> {
        self.tick("upload", remote)?;
        let data = std::fs::read(local)?;
        let normalized = normalize(remote);
        let mut state = self.state.lock().unwrap();
        if !matches!(state.nodes.get(&parent_of(&normalized)), Some(Node::Dir)) {
            return Err(OpError::Remote(format!(
                "no such directory: {}",
                parent_of(&normalized)
            )));
        }
        let len = data.len() as u64;
        state.nodes.insert(normalized, Node::File(data));
        Ok(len)
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.live.store(false, Ordering::SeqCst);
    }
}
