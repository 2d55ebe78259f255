//! Growable single-file blockstore.
//!
//! One append-only CAR file holds every sealed blob; the offset index is
//! rebuilt by scanning the file on open. The repository derives every CID
//! itself (SHA2-256 multihash, https codec) and duplicate puts are no-ops.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cid::Cid;
use tracing::{debug, info};

use gemipfs_core::cid as cids;
use gemipfs_store::car::{self, BlockLocation};

use crate::Result;

struct Inner {
    file: File,
    end: u64,
    index: HashMap<Cid, BlockLocation>,
    /// request CID → response CID, fed by uploaders.
    bindings: HashMap<Cid, Cid>,
}

/// The repository's persistent blob store.
pub struct FileBlockstore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileBlockstore {
    /// Open `path`, creating an empty store when absent and reindexing an
    /// existing one.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let (index, end) = if contents.is_empty() {
            let header = car::encode_header(&[]);
            file.write_all(&header)?;
            file.flush()?;
            (HashMap::new(), header.len() as u64)
        } else {
            let (_, blocks) = car::scan(&contents)?;
            let index: HashMap<Cid, BlockLocation> = blocks.into_iter().collect();
            info!("Reindexed {} blocks from {:?}", index.len(), path);
            (index, contents.len() as u64)
        };

        Ok(Self {
            path,
            inner: Mutex::new(Inner {
                file,
                end,
                index,
                bindings: HashMap::new(),
            }),
        })
    }

    /// Store a blob, deriving and returning its CID. Duplicate content is a
    /// no-op.
    pub fn put(&self, data: &[u8]) -> Result<Cid> {
        let cid = cids::sum(data);

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.index.contains_key(&cid) {
            return Ok(cid);
        }

        let mut frame = Vec::with_capacity(data.len() + 48);
        let location = car::encode_block(&mut frame, inner.end, &cid, data);

        let end = inner.end;
        inner.file.seek(SeekFrom::Start(end))?;
        inner.file.write_all(&frame)?;
        inner.file.flush()?;
        inner.end += frame.len() as u64;
        inner.index.insert(cid, location);

        debug!("post {}", cid);
        Ok(cid)
    }

    /// Fetch a blob by CID.
    pub fn get(&self, cid: &Cid) -> Result<Option<Vec<u8>>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(location) = inner.index.get(cid).copied() else {
            return Ok(None);
        };

        inner.file.seek(SeekFrom::Start(location.offset))?;
        let mut data = vec![0u8; location.len as usize];
        inner.file.read_exact(&mut data)?;
        Ok(Some(data))
    }

    /// Record that `request` resolves to the stored blob `response`.
    pub fn bind(&self, request: Cid, response: Cid) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.bindings.insert(request, response);
    }

    /// Look up the response CID bound to a request CID.
    pub fn lookup(&self, request: &Cid) -> Option<Cid> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.bindings.get(request).copied()
    }

    /// Number of stored blobs.
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .index
            .len()
    }

    /// Whether the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
