//! Inode number management.
//!
//! The kernel speaks inode numbers; the rest of tunefs speaks paths
//! within the mount. This table owns the bidirectional mapping. Inode
//! numbers are never reused while the filesystem is mounted.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

/// Inode of the mount root.
pub const ROOT_INO: u64 = 1;

/// Bidirectional path/inode mapping.
pub struct InodeTable {
    next_ino: AtomicU64,
    by_path: RwLock<HashMap<String, u64>>,
    by_ino: RwLock<HashMap<u64, String>>,
}

impl Default for InodeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InodeTable {
    pub fn new() -> Self {
        let table = InodeTable {
            next_ino: AtomicU64::new(ROOT_INO + 1),
            by_path: RwLock::new(HashMap::new()),
            by_ino: RwLock::new(HashMap::new()),
        };
        table.by_path.write().insert("/".to_string(), ROOT_INO);
        table.by_ino.write().insert(ROOT_INO, "/".to_string());
        table
    }

    /// Inode for a path, allocating one on first sight.
    pub fn get_or_create(&self, path: &str) -> u64 {
        if let Some(&ino) = self.by_path.read().get(path) {
            return ino;
        }
        let mut by_path = self.by_path.write();
        // Racing allocators settle on whoever inserted first.
        if let Some(&ino) = by_path.get(path) {
            return ino;
        }
        let ino = self.next_ino.fetch_add(1, Ordering::SeqCst);
        by_path.insert(path.to_string(), ino);
        self.by_ino.write().insert(ino, path.to_string());
        ino
    }

    pub fn get_path(&self, ino: u64) -> Option<String> {
        self.by_ino.read().get(&ino).cloned()
    }

    pub fn get_ino(&self, path: &str) -> Option<u64> {
        self.by_path.read().get(path).copied()
    }

    /// Forget one path. Its inode number is retired, not recycled.
    pub fn remove_path(&self, path: &str) {
        if let Some(ino) = self.by_path.write().remove(path) {
            self.by_ino.write().remove(&ino);
        }
    }

    /// Forget a directory and everything under it.
    pub fn remove_subtree(&self, path: &str) {
        let prefix = format!("{path}/");
        let mut by_path = self.by_path.write();
        let mut by_ino = self.by_ino.write();
        by_path.retain(|p, ino| {
            if p == path || p.starts_with(&prefix) {
                by_ino.remove(ino);
                false
            } else {
                true
            }
        });
    }

    /// Re-root a path (and any subtree) after a rename, keeping the
    /// inode numbers stable.
    pub fn rename_path(&self, from: &str, to: &str) {
        let prefix = format!("{from}/");
        let mut by_path = self.by_path.write();
        let mut by_ino = self.by_ino.write();

        let moved: Vec<(String, u64)> = by_path
            .iter()
            .filter(|(p, _)| p.as_str() == from || p.starts_with(&prefix))
            .map(|(p, ino)| (p.clone(), *ino))
            .collect();
        for (old, ino) in moved {
            by_path.remove(&old);
            let new = if old == from {
                to.to_string()
            } else {
                format!("{to}{}", &old[from.len()..])
            };
            by_ino.insert(ino, new.clone());
            by_path.insert(new, ino);
        }
    }
}
