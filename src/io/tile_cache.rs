//! On-disk tile cache
//!
//! Layout: `<cache_dir>/<zoom>/<x>_<y>_<zoom>.png`, one encoded image per key.
//! Reads and deletes are synchronous; stores go through a write-behind worker
//! so filesystem latency never lands on the session task.

use crate::domain::types::TileKey;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

/// Blob store for encoded tiles keyed by `TileKey`
pub trait TileCache: Send {
    /// Encoded bytes for `key`, `None` on a miss
    fn load(&self, key: TileKey) -> Option<Vec<u8>>;
    fn store(&self, key: TileKey, encoded: Vec<u8>);
    fn remove(&self, key: TileKey);
}

#[derive(Debug, Clone)]
pub struct DiskTileCache {
    dir: PathBuf,
}

impl DiskTileCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: TileKey) -> PathBuf {
        self.dir.join(key.zoom.to_string()).join(format!("{key}.png"))
    }

    fn write(&self, key: TileKey, encoded: &[u8]) -> std::io::Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("png.tmp");
        fs::write(&tmp, encoded)?;
        fs::rename(&tmp, &path)
    }
}

impl TileCache for DiskTileCache {
    fn load(&self, key: TileKey) -> Option<Vec<u8>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                warn!(key = %key, error = %e, "tile_cache_read_failed");
                None
            }
        }
    }

    fn store(&self, key: TileKey, encoded: Vec<u8>) {
        if let Err(e) = self.write(key, &encoded) {
            warn!(key = %key, error = %e, "tile_cache_write_failed");
        }
    }

    fn remove(&self, key: TileKey) {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => debug!(key = %key, "tile_cache_entry_removed"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, error = %e, "tile_cache_remove_failed"),
        }
    }
}

#[derive(Debug)]
pub struct CacheWrite {
    pub key: TileKey,
    pub encoded: Vec<u8>,
    pub enqueued_at: Instant,
}

/// Session-side cache handle: synchronous reads, queued writes
pub struct WriteBehindCache {
    disk: DiskTileCache,
    tx: mpsc::Sender<CacheWrite>,
}

impl TileCache for WriteBehindCache {
    fn load(&self, key: TileKey) -> Option<Vec<u8>> {
        self.disk.load(key)
    }

    fn store(&self, key: TileKey, encoded: Vec<u8>) {
        let write = CacheWrite { key, encoded, enqueued_at: Instant::now() };
        match self.tx.try_send(write) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(key = %key, "tile_cache_write_dropped: queue full"),
            Err(TrySendError::Closed(_)) => warn!(key = %key, "tile_cache_writer_closed"),
        }
    }

    fn remove(&self, key: TileKey) {
        self.disk.remove(key)
    }
}

/// Blocking worker that drains queued tile writes to disk
pub struct CacheWriter {
    disk: DiskTileCache,
    rx: mpsc::Receiver<CacheWrite>,
}

impl CacheWriter {
    /// Run on a dedicated thread until every handle is dropped
    pub fn run_blocking(mut self) {
        info!(dir = %self.disk.dir().display(), "tile_cache_writer_started");
        while let Some(write) = self.rx.blocking_recv() {
            let queue_delay_us = write.enqueued_at.elapsed().as_micros() as u64;
            let len = write.encoded.len();
            self.disk.store(write.key, write.encoded);
            debug!(key = %write.key, bytes = len, queue_delay_us, "tile_cache_written");
        }
        info!("tile_cache_writer_stopped");
    }
}

/// Create the write-behind handle and its worker
pub fn create_cache_writer(disk: DiskTileCache, buffer_size: usize) -> (WriteBehindCache, CacheWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (WriteBehindCache { disk: disk.clone(), tx }, CacheWriter { disk, rx })
}
