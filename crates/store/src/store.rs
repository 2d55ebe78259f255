//! The bounded archive store.

use std::collections::HashMap;
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use cid::Cid;
use tracing::{debug, warn};

use crate::cache::{ExpiringLru, LruMap};
use crate::car::{self, BlockLocation};
use crate::{Result, StoreError};

/// Default bound on resident archive entries.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default maximum entry age before eviction.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);

/// Default slots in the per-block shortcut cache.
pub const DEFAULT_SHORTCUT_SLOTS: usize = 1024;

/// One resident archive: its file and block-offset index.
///
/// The lock covers the index and the file together: `get` copies block bytes
/// under the read lock, and `cleanup` takes the write lock before unlinking,
/// so readers never race a deletion.
struct CarEntry {
    file: PathBuf,
    index: RwLock<Option<HashMap<Cid, BlockLocation>>>,
}

impl CarEntry {
    fn has(&self, cid: &Cid) -> bool {
        let guard = self.index.read().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .map(|idx| idx.contains_key(cid))
            .unwrap_or(false)
    }

    fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        let guard = self.index.read().unwrap_or_else(|e| e.into_inner());
        let index = guard.as_ref().ok_or(StoreError::NotFound)?;
        let location = index.get(cid).ok_or(StoreError::NotFound)?;

        let mut file = fs::File::open(&self.file)?;
        file.seek(SeekFrom::Start(location.offset))?;
        let mut data = vec![0u8; location.len as usize];
        file.read_exact(&mut data)?;
        Ok(data)
    }

    fn cleanup(&self) {
        let mut guard = self.index.write().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = fs::remove_file(&self.file) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove archive {:?}: {}", self.file, e);
            }
        }
        *guard = None;
    }
}

/// A bounded collection of single-root archives, addressable by block CID.
pub struct CarStore {
    root: PathBuf,
    entries: Mutex<ExpiringLru<String, Arc<CarEntry>>>,
    shortcut: Mutex<LruMap<String, Arc<CarEntry>>>,
}

impl CarStore {
    /// Open (or create) a store rooted at `root` with default bounds.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_limits(root, DEFAULT_CAPACITY, DEFAULT_MAX_AGE)
    }

    /// Open a store with explicit capacity and age bounds.
    pub fn with_limits(
        root: impl AsRef<Path>,
        capacity: usize,
        max_age: Duration,
    ) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            entries: Mutex::new(ExpiringLru::new(capacity, max_age)),
            shortcut: Mutex::new(LruMap::new(DEFAULT_SHORTCUT_SLOTS)),
        })
    }

    /// Ingest an archive.
    ///
    /// The archive must carry exactly one root; the file is named after it.
    /// Adding an archive whose root is already resident is a no-op.
    pub fn add<R: Read>(&self, reader: &mut R) -> Result<Cid> {
        let mut archive = Vec::new();
        reader.read_to_end(&mut archive)?;

        let (header, blocks) = car::scan(&archive)?;
        if header.roots.len() != 1 {
            return Err(StoreError::MultipleRoots(header.roots.len()));
        }
        let root = header.roots[0];
        let key = root.to_string();

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.contains(&key) {
            return Ok(root);
        }

        let file = self.root.join(format!("{}.car", root));
        fs::write(&file, &archive)?;

        let index: HashMap<Cid, BlockLocation> = blocks.into_iter().collect();
        let entry = Arc::new(CarEntry {
            file,
            index: RwLock::new(Some(index)),
        });

        let evicted = entries.insert(key, entry);
        drop(entries);
        for (root, entry) in evicted {
            debug!("Evicting archive {}", root);
            entry.cleanup();
        }

        Ok(root)
    }

    /// Fetch raw block bytes by CID from any resident archive.
    pub fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        let key = cid.to_string();

        // Shortcut first; any failure falls through to the scan.
        let cached = self
            .shortcut
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key);
        if let Some(entry) = cached {
            if let Ok(data) = entry.get(cid) {
                return Ok(data);
            }
        }

        // Slow path: sweep expired entries, then scan whatever is live.
        let (expired, candidates) = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            (entries.sweep(), entries.values())
        };
        for (root, entry) in expired {
            debug!("Evicting expired archive {}", root);
            entry.cleanup();
        }

        for entry in candidates {
            if entry.has(cid) {
                let data = entry.get(cid)?;
                self.shortcut
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(key.clone(), entry);
                return Ok(data);
            }
        }

        Err(StoreError::NotFound)
    }

    /// Number of resident archive entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether the store holds no archives.
    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_empty()
    }

    /// Directory this store writes archives into.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
