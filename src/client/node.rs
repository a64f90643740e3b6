//! Remote nodes and the registry that owns them

use super::handles::OpenHandle;
use crate::attributes::FileAttributes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Path separator on the wire
pub const SEPARATOR: char = '\\';

/// Share-relative root path
pub const ROOT: &str = "\\";

/// Registry key for a path: backslash separators, one leading root, no trailing separator
pub fn normalize(path: &str) -> String {
    let replaced = path.replace('/', "\\");
    format!("{}{}", SEPARATOR, replaced.trim_matches(SEPARATOR))
}

/// Join a directory path and a child name
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() || dir == ROOT {
        format!("{}{}", SEPARATOR, name)
    } else {
        format!("{}{}{}", dir.trim_end_matches(SEPARATOR), SEPARATOR, name)
    }
}

/// Parent directory of a path (the root is its own parent)
pub fn parent(path: &str) -> &str {
    match path.trim_end_matches(SEPARATOR).rfind(SEPARATOR) {
        Some(0) | None => ROOT,
        Some(i) => &path[..i],
    }
}

/// Final component of a path
pub fn file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches(SEPARATOR);
    match trimmed.rfind(SEPARATOR) {
        Some(i) => &trimmed[i + 1..],
        None => trimmed,
    }
}

/// Reconnect state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReopenState {
    Stable,
    /// The session was re-established; handles must be reopened before use
    NeedReopen,
    /// Reopen failed; every operation fails until the node is reclaimed
    NeedRevoke,
}

/// Size and modification time last seen from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Snapshot {
    pub size: u64,
    pub write_time: DateTime<Utc>,
}

impl Snapshot {
    pub fn of(attrs: &FileAttributes) -> Self {
        Self {
            size: attrs.size,
            write_time: attrs.write_time,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CachedTarget {
    pub target: String,
    pub captured_at: Instant,
}

/// Mutable per-node state, only touched under the node lock
#[derive(Debug)]
pub(crate) struct NodeState {
    pub path: String,
    pub attrs: Option<FileAttributes>,
    /// Shared handle for opens that do not deny anything
    pub common: Option<OpenHandle>,
    /// Every other handle, in open order
    pub deny_list: Vec<OpenHandle>,
    pub reopen: ReopenState,
    /// Outlives the attribute cache; cleared when a change of ours went unobserved
    pub observed: Option<Snapshot>,
    /// Taken from `observed` when the session drops
    pub snapshot: Option<Snapshot>,
    pub revoke_reason: Option<String>,
    pub symlink: Option<CachedTarget>,
    /// Streams recently found missing, keyed by stream name
    pub stream_misses: HashMap<String, Instant>,
    /// Delete the file when the last handle closes
    pub delete_on_close: bool,
}

impl NodeState {
    fn new(path: String) -> Self {
        Self {
            path,
            attrs: None,
            common: None,
            deny_list: Vec::new(),
            reopen: ReopenState::Stable,
            observed: None,
            snapshot: None,
            revoke_reason: None,
            symlink: None,
            stream_misses: HashMap::new(),
            delete_on_close: false,
        }
    }

    pub fn refcount(&self) -> u32 {
        self.common.as_ref().map(|h| h.refcount).unwrap_or(0)
            + self.deny_list.iter().map(|h| h.refcount).sum::<u32>()
    }

    pub fn handle_by_slot(&self, slot: u64) -> Option<&OpenHandle> {
        self.common
            .iter()
            .chain(self.deny_list.iter())
            .find(|h| h.slot == slot)
    }

    pub fn handle_by_slot_mut(&mut self, slot: u64) -> Option<&mut OpenHandle> {
        self.common
            .iter_mut()
            .chain(self.deny_list.iter_mut())
            .find(|h| h.slot == slot)
    }

    pub fn set_attrs(&mut self, attrs: FileAttributes) {
        self.observed = Some(Snapshot::of(&attrs));
        self.attrs = Some(attrs);
    }

    /// Cached attributes if younger than `ttl`
    pub fn fresh_attrs(&self, ttl: Duration) -> Option<FileAttributes> {
        self.attrs.as_ref().filter(|a| a.age() < ttl).cloned()
    }
}

/// One remote path and everything the client tracks about it
#[derive(Debug)]
pub struct RemoteNode {
    id: u64,
    state: Mutex<NodeState>,
    /// Serializes reopen attempts; held across the reopen round trips
    pub(crate) reopen_lock: tokio::sync::Mutex<()>,
}

impl RemoteNode {
    fn new(id: u64, path: String) -> Self {
        Self {
            id,
            state: Mutex::new(NodeState::new(path)),
            reopen_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn path(&self) -> String {
        self.lock().path.clone()
    }

    pub fn reopen_state(&self) -> ReopenState {
        self.lock().reopen
    }

    /// Outstanding opens across the common handle and the deny list
    pub fn refcount(&self) -> u32 {
        self.lock().refcount()
    }

    /// Number of distinct server handles held
    pub fn open_handle_count(&self) -> usize {
        let state = self.lock();
        state.common.iter().count() + state.deny_list.len()
    }

    pub fn cached_attrs(&self) -> Option<FileAttributes> {
        self.lock().attrs.clone()
    }

    pub fn delete_on_close(&self) -> bool {
        self.lock().delete_on_close
    }

    /// Replace the cached attributes with a fresh snapshot
    pub(crate) fn set_attrs(&self, attrs: FileAttributes) {
        self.lock().set_attrs(attrs);
    }

    pub(crate) fn invalidate_attrs(&self) {
        self.lock().attrs = None;
    }

    /// Lock the node state; a poisoned lock still yields the state
    pub(crate) fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Map from path to node, the single owner of every [`RemoteNode`]
#[derive(Debug, Default)]
pub struct NodeRegistry {
    nodes: Mutex<HashMap<String, Arc<RemoteNode>>>,
    next_id: AtomicU64,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<RemoteNode>>> {
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, path: &str) -> Option<Arc<RemoteNode>> {
        self.map().get(&normalize(path)).cloned()
    }

    pub fn get_or_insert(&self, path: &str) -> Arc<RemoteNode> {
        let key = normalize(path);
        let mut map = self.map();
        if let Some(node) = map.get(&key) {
            return node.clone();
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let node = Arc::new(RemoteNode::new(id, key.clone()));
        map.insert(key, node.clone());
        node
    }

    /// Drop the node from the registry if it is still registered under its path
    pub fn remove(&self, node: &RemoteNode) {
        let path = node.path();
        let mut map = self.map();
        if map.get(&path).map(|n| n.id == node.id).unwrap_or(false) {
            map.remove(&path);
        }
    }

    /// Move a node to a new path, displacing whatever was registered there
    ///
    /// Nodes below a renamed directory move with it.
    pub fn rename(&self, node: &Arc<RemoteNode>, new_path: &str) {
        let key = normalize(new_path);
        let mut map = self.map();
        let old_path = {
            let mut state = node.lock();
            std::mem::replace(&mut state.path, key.clone())
        };
        if map.get(&old_path).map(|n| n.id == node.id).unwrap_or(false) {
            map.remove(&old_path);
        }

        let prefix = format!("{}{}", old_path, SEPARATOR);
        let descendants: Vec<String> = map
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for old_key in descendants {
            if let Some(child) = map.remove(&old_key) {
                let moved = format!("{}{}", key, &old_key[old_path.len()..]);
                child.lock().path = moved.clone();
                map.insert(moved, child);
            }
        }
        map.insert(key, node.clone());
    }

    /// Forget a revoked node so the next lookup starts fresh
    pub fn reclaim(&self, node: &RemoteNode) {
        self.remove(node);
    }

    pub fn all(&self) -> Vec<Arc<RemoteNode>> {
        self.map().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map().is_empty()
    }
}
