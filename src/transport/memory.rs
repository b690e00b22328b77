use super::{entry_name, ArchiveTransport};
use crate::error::{IngestError, Result};
use crate::source::Mirror;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// In-memory archive for development and testing. Files are keyed by mirror
/// name and relative path; mirrors can be made unreachable or have their
/// directory listings disabled.
#[derive(Clone, Default)]
pub struct InMemoryArchive {
    files: Arc<Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>>,
    unreachable: Arc<Mutex<HashSet<String>>>,
    unlisted: Arc<Mutex<HashSet<String>>>,
    calls: Arc<AtomicUsize>,
}

impl InMemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, mirror: &str, path: &str, bytes: Vec<u8>) {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files
            .entry(mirror.to_string())
            .or_default()
            .insert(path.trim_start_matches('/').to_string(), bytes);
    }

    /// Every call against `mirror` fails as a refused connection.
    pub fn make_unreachable(&self, mirror: &str) {
        let mut set = self.unreachable.lock().unwrap_or_else(|e| e.into_inner());
        set.insert(mirror.to_string());
    }

    /// Listing `mirror` fails while direct reads keep working.
    pub fn disable_listing(&self, mirror: &str) {
        let mut set = self.unlisted.lock().unwrap_or_else(|e| e.into_inner());
        set.insert(mirror.to_string());
    }

    /// Number of transport calls served or refused so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self, mirror: &Mirror) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let set = self.unreachable.lock().unwrap_or_else(|e| e.into_inner());
        if set.contains(&mirror.name) {
            return Err(IngestError::transport(&mirror.name, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl ArchiveTransport for InMemoryArchive {
    async fn list(&self, mirror: &Mirror, path: &str) -> Result<Vec<String>> {
        self.check_reachable(mirror)?;
        if self
            .unlisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&mirror.name)
        {
            return Err(IngestError::transport(&mirror.name, "directory listing forbidden"));
        }
        let mut dir = path.trim_start_matches('/').to_string();
        if !dir.is_empty() && !dir.ends_with('/') {
            dir.push('/');
        }
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = Vec::new();
        if let Some(tree) = files.get(&mirror.name) {
            for key in tree.keys() {
                let Some(rest) = key.strip_prefix(&dir) else {
                    continue;
                };
                let child = rest.split('/').next().unwrap_or(rest);
                if let Some(name) = entry_name(child) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
        }
        debug!("Listed {} entries under {} on {}", names.len(), dir, mirror.name);
        Ok(names)
    }

    async fn exists(&self, mirror: &Mirror, path: &str) -> Result<bool> {
        self.check_reachable(mirror)?;
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        Ok(files
            .get(&mirror.name)
            .map(|tree| tree.contains_key(path.trim_start_matches('/')))
            .unwrap_or(false))
    }

    async fn fetch(&self, mirror: &Mirror, path: &str) -> Result<Vec<u8>> {
        self.check_reachable(mirror)?;
        let files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        files
            .get(&mirror.name)
            .and_then(|tree| tree.get(path.trim_start_matches('/')))
            .cloned()
            .ok_or_else(|| IngestError::transport(&mirror.name, format!("{path} not found")))
    }
}
