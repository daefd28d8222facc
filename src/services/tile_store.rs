//! Tile reassembly, decoding and cache lifecycle
//!
//! Tiles arrive as MAP_TILE_START followed by fixed-size chunks. At most one
//! tile is under construction; once its declared length is loaded it is
//! decoded, persisted to the disk cache and moved into the resident map.
//! All resident tiles share one zoom level; a tile at another zoom clears the
//! store first.

use crate::domain::types::TileKey;
use crate::io::decoder::{DecodeError, DecodedImage, TileDecoder};
use crate::io::protocol::TILE_CHUNK_SIZE;
use crate::io::tile_cache::TileCache;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Largest encoded tile accepted
pub const MAX_TILE_BYTES: u32 = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TileError {
    #[error("chunk received with no tile in flight")]
    NoTileInFlight,
    #[error("tile {key} declares {byte_length} bytes, limit is {MAX_TILE_BYTES}")]
    TooLarge { key: TileKey, byte_length: u32 },
    #[error("tile {key} declares zero bytes")]
    Empty { key: TileKey },
    #[error("tile {key} failed to decode: {source}")]
    Decode {
        key: TileKey,
        #[source]
        source: DecodeError,
    },
}

#[derive(Debug)]
pub struct Tile {
    key: TileKey,
    expected: usize,
    loaded: usize,
    encoded: Vec<u8>,
    image: Option<DecodedImage>,
}

impl Tile {
    fn new(key: TileKey, expected: usize) -> Self {
        Self { key, expected, loaded: 0, encoded: vec![0u8; expected], image: None }
    }

    pub fn key(&self) -> TileKey {
        self.key
    }

    pub fn expected_len(&self) -> usize {
        self.expected
    }

    pub fn loaded_len(&self) -> usize {
        self.loaded
    }

    pub fn is_finalized(&self) -> bool {
        self.image.is_some()
    }

    /// Decoded pixels, present once finalized
    pub fn image(&self) -> Option<&DecodedImage> {
        self.image.as_ref()
    }
}

/// Result of feeding one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOutcome {
    Pending { loaded: usize, expected: usize },
    Finalized(TileKey),
}

pub struct TileStore {
    tiles: FxHashMap<TileKey, Tile>,
    in_flight: Option<Tile>,
    requested: FxHashSet<TileKey>,
    zoom: Option<u8>,
    decoder: Box<dyn TileDecoder>,
    cache: Box<dyn TileCache>,
}

impl TileStore {
    pub fn new(decoder: Box<dyn TileDecoder>, cache: Box<dyn TileCache>) -> Self {
        Self {
            tiles: FxHashMap::default(),
            in_flight: None,
            requested: FxHashSet::default(),
            zoom: None,
            decoder,
            cache,
        }
    }

    pub fn zoom(&self) -> Option<u8> {
        self.zoom
    }

    /// Switch to `zoom`, clearing everything if it differs; returns whether it changed
    pub fn set_zoom(&mut self, zoom: u8) -> bool {
        if self.zoom == Some(zoom) {
            return false;
        }
        if self.zoom.is_some() {
            info!(from = ?self.zoom, to = zoom, evicted = self.tile_count(), "tile_store_zoom_changed");
        }
        self.clear();
        self.zoom = Some(zoom);
        true
    }

    /// Start receiving a tile; returns `Ok(true)` when this changed the store's zoom
    ///
    /// A tile still in flight is abandoned.
    pub fn register_tile(&mut self, key: TileKey, byte_length: u32) -> Result<bool, TileError> {
        let zoom_changed = self.set_zoom(key.zoom);
        self.abandon_in_flight();

        if byte_length == 0 {
            return Err(TileError::Empty { key });
        }
        if byte_length > MAX_TILE_BYTES {
            return Err(TileError::TooLarge { key, byte_length });
        }

        debug!(key = %key, byte_length, "tile_registered");
        self.in_flight = Some(Tile::new(key, byte_length as usize));
        Ok(zoom_changed)
    }

    /// Drop a partially received tile so its remaining chunks are refused
    pub fn abandon_in_flight(&mut self) {
        if let Some(old) = self.in_flight.take() {
            warn!(
                key = %old.key,
                loaded = old.loaded,
                expected = old.expected,
                "tile_abandoned"
            );
            self.requested.remove(&old.key);
        }
    }

    /// Copy chunk bytes into the in-flight tile, finalizing it when complete
    ///
    /// Data is clipped to `TILE_CHUNK_SIZE` and to the declared length; a
    /// chunk starting past the end is ignored.
    pub fn append_chunk(&mut self, chunk_index: u16, bytes: &[u8]) -> Result<ChunkOutcome, TileError> {
        let tile = self.in_flight.as_mut().ok_or(TileError::NoTileInFlight)?;

        let offset = chunk_index as usize * TILE_CHUNK_SIZE;
        if offset < tile.expected {
            let len = bytes.len().min(TILE_CHUNK_SIZE).min(tile.expected - offset);
            tile.encoded[offset..offset + len].copy_from_slice(&bytes[..len]);
            tile.loaded = (tile.loaded + len).min(tile.expected);
        } else {
            trace!(key = %tile.key, chunk_index, "tile_chunk_past_end");
        }

        if tile.loaded < tile.expected {
            return Ok(ChunkOutcome::Pending { loaded: tile.loaded, expected: tile.expected });
        }

        // loaded == expected: take ownership and finalize
        let Some(mut tile) = self.in_flight.take() else {
            return Err(TileError::NoTileInFlight);
        };
        let key = tile.key;
        match self.decoder.decode(&tile.encoded) {
            Ok(image) => {
                debug!(key = %key, width = image.width, height = image.height, "tile_finalized");
                tile.image = Some(image);
                self.cache.store(key, std::mem::take(&mut tile.encoded));
                self.requested.remove(&key);
                self.tiles.insert(key, tile);
                Ok(ChunkOutcome::Finalized(key))
            }
            Err(source) => {
                self.requested.remove(&key);
                Err(TileError::Decode { key, source })
            }
        }
    }

    /// Build a finalized tile from the disk cache
    ///
    /// A corrupt entry is deleted and reported as a miss.
    pub fn load_from_cache(&self, key: TileKey) -> Option<Tile> {
        let encoded = self.cache.load(key)?;
        match self.decoder.decode(&encoded) {
            Ok(image) => Some(Tile {
                key,
                expected: encoded.len(),
                loaded: encoded.len(),
                encoded: Vec::new(),
                image: Some(image),
            }),
            Err(e) => {
                warn!(key = %key, error = %e, "tile_cache_corrupt");
                self.cache.remove(key);
                None
            }
        }
    }

    /// Insert a finalized tile (cache hit); returns whether the zoom changed
    pub fn insert(&mut self, tile: Tile) -> bool {
        let zoom_changed = self.set_zoom(tile.key.zoom);
        self.requested.remove(&tile.key);
        self.tiles.insert(tile.key, tile);
        zoom_changed
    }

    /// Resident and finalized
    pub fn get(&self, key: &TileKey) -> Option<&Tile> {
        self.tiles.get(key)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        self.tiles.contains_key(key) || self.in_flight.as_ref().is_some_and(|t| t.key == *key)
    }

    pub fn is_requested(&self, key: &TileKey) -> bool {
        self.requested.contains(key)
    }

    /// Record that the peer has been asked for `key`
    pub fn mark_requested(&mut self, key: TileKey) {
        self.set_zoom(key.zoom);
        self.requested.insert(key);
    }

    pub fn in_flight(&self) -> Option<&Tile> {
        self.in_flight.as_ref()
    }

    /// Resident tiles plus the one in flight
    pub fn tile_count(&self) -> usize {
        self.tiles.len() + usize::from(self.in_flight.is_some())
    }

    pub fn requested_count(&self) -> usize {
        self.requested.len()
    }

    /// Drop every tile, the requested set and the in-flight tile
    pub fn clear(&mut self) {
        self.tiles.clear();
        self.requested.clear();
        self.in_flight = None;
    }

    /// Forget the zoom as well; used on disconnect
    pub fn reset(&mut self) {
        self.clear();
        self.zoom = None;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// Accepts any non-empty input whose first byte is not 0xFF; size from bytes 0..2
    pub(crate) struct FakeDecoder;

    impl TileDecoder for FakeDecoder {
        fn decode(&self, encoded: &[u8]) -> Result<DecodedImage, DecodeError> {
            if encoded.is_empty() || encoded[0] == 0xFF {
                return Err(DecodeError::Empty);
            }
            let width = encoded[0] as u32;
            let height = encoded.get(1).copied().unwrap_or(1).max(1) as u32;
            Ok(DecodedImage { width, height, rgb: vec![0x80; (width * height * 3) as usize] })
        }
    }

    #[derive(Default, Clone)]
    pub(crate) struct MemoryCache {
        pub entries: Arc<Mutex<HashMap<TileKey, Vec<u8>>>>,
        pub removed: Arc<Mutex<Vec<TileKey>>>,
    }

    impl TileCache for MemoryCache {
        fn load(&self, key: TileKey) -> Option<Vec<u8>> {
            self.entries.lock().get(&key).cloned()
        }

        fn store(&self, key: TileKey, encoded: Vec<u8>) {
            self.entries.lock().insert(key, encoded);
        }

        fn remove(&self, key: TileKey) {
            self.entries.lock().remove(&key);
            self.removed.lock().push(key);
        }
    }

    fn store_with(cache: &MemoryCache) -> TileStore {
        TileStore::new(Box::new(FakeDecoder), Box::new(cache.clone()))
    }

    /// Encoded blob the fake decoder reads as width x height
    fn blob(width: u8, height: u8, len: usize) -> Vec<u8> {
        let mut data = vec![7u8; len];
        data[0] = width;
        data[1] = height;
        data
    }

    fn feed(store: &mut TileStore, data: &[u8]) -> Vec<ChunkOutcome> {
        data.chunks(TILE_CHUNK_SIZE)
            .enumerate()
            .map(|(i, c)| store.append_chunk(i as u16, c).unwrap())
            .collect()
    }

    #[test]
    fn test_chunks_finalize_exactly_once() {
        let cache = MemoryCache::default();
        let mut store = store_with(&cache);
        let key = TileKey::new(5, 6, 14);
        let data = blob(16, 8, 500);

        assert!(store.register_tile(key, data.len() as u32).unwrap());
        let outcomes = feed(&mut store, &data);

        let finalized: Vec<_> =
            outcomes.iter().filter(|o| matches!(o, ChunkOutcome::Finalized(_))).collect();
        assert_eq!(finalized.len(), 1);
        assert_eq!(outcomes.last(), Some(&ChunkOutcome::Finalized(key)));
        assert_eq!(outcomes[0], ChunkOutcome::Pending { loaded: 224, expected: 500 });

        let tile = store.get(&key).unwrap();
        let image = tile.image().unwrap();
        assert_eq!(image.rgb.len(), (image.width * image.height * 3) as usize);
        assert_eq!((image.width, image.height), (16, 8));
        assert!(store.in_flight().is_none());
        assert_eq!(cache.entries.lock().get(&key), Some(&data));
    }

    #[test]
    fn test_last_chunk_is_clipped_to_declared_length() {
        let cache = MemoryCache::default();
        let mut store = store_with(&cache);
        let key = TileKey::new(1, 1, 10);
        store.register_tile(key, 230).unwrap();

        let first = blob(2, 2, TILE_CHUNK_SIZE);
        assert!(matches!(store.append_chunk(0, &first), Ok(ChunkOutcome::Pending { loaded: 224, .. })));
        // sender pads the tail chunk
        let tail = vec![9u8; TILE_CHUNK_SIZE];
        assert_eq!(store.append_chunk(1, &tail).unwrap(), ChunkOutcome::Finalized(key));
        assert_eq!(cache.entries.lock()[&key].len(), 230);
    }

    #[test]
    fn test_chunk_without_tile_is_an_error() {
        let mut store = store_with(&MemoryCache::default());
        assert!(matches!(store.append_chunk(0, &[1, 2, 3]), Err(TileError::NoTileInFlight)));
    }

    #[test]
    fn test_chunk_past_end_is_ignored() {
        let mut store = store_with(&MemoryCache::default());
        store.register_tile(TileKey::new(0, 0, 3), 300).unwrap();
        assert_eq!(
            store.append_chunk(9, &[1; 10]).unwrap(),
            ChunkOutcome::Pending { loaded: 0, expected: 300 }
        );
    }

    #[test]
    fn test_zoom_change_clears_store() {
        let mut store = store_with(&MemoryCache::default());
        for x in 0..3 {
            let key = TileKey::new(x, 0, 15);
            let data = blob(1, 1, 10);
            store.register_tile(key, 10).unwrap();
            feed(&mut store, &data);
        }
        store.mark_requested(TileKey::new(9, 9, 15));
        assert_eq!(store.tile_count(), 3);

        assert!(store.register_tile(TileKey::new(0, 0, 16), 10).unwrap());
        assert_eq!(store.tile_count(), 1);
        assert_eq!(store.requested_count(), 0);
        assert_eq!(store.zoom(), Some(16));
    }

    #[test]
    fn test_same_zoom_keeps_tiles() {
        let mut store = store_with(&MemoryCache::default());
        store.register_tile(TileKey::new(0, 0, 15), 10).unwrap();
        feed(&mut store, &blob(1, 1, 10));
        assert!(!store.register_tile(TileKey::new(1, 0, 15), 10).unwrap());
        assert_eq!(store.tile_count(), 2);
    }

    #[test]
    fn test_decode_failure_drops_tile_without_persisting() {
        let cache = MemoryCache::default();
        let mut store = store_with(&cache);
        let key = TileKey::new(3, 3, 12);
        store.mark_requested(key);
        store.register_tile(key, 4).unwrap();
        let err = store.append_chunk(0, &[0xFF, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, TileError::Decode { .. }));
        assert!(store.get(&key).is_none());
        assert!(!store.is_requested(&key));
        assert!(cache.entries.lock().is_empty());
    }

    #[test]
    fn test_load_from_cache_hit_and_corrupt() {
        let cache = MemoryCache::default();
        let good = TileKey::new(1, 2, 13);
        let bad = TileKey::new(2, 2, 13);
        cache.store(good, blob(4, 4, 20));
        cache.store(bad, vec![0xFF, 1, 2]);
        let store = store_with(&cache);

        let tile = store.load_from_cache(good).unwrap();
        assert!(tile.is_finalized());
        assert_eq!(tile.image().unwrap().width, 4);

        assert!(store.load_from_cache(bad).is_none());
        assert_eq!(cache.removed.lock().as_slice(), &[bad]);
        assert!(cache.load(bad).is_none());

        assert!(store.load_from_cache(TileKey::new(9, 9, 13)).is_none());
    }

    #[test]
    fn test_register_abandons_in_flight() {
        let mut store = store_with(&MemoryCache::default());
        let first = TileKey::new(1, 1, 15);
        store.mark_requested(first);
        store.register_tile(first, 1000).unwrap();
        store.append_chunk(0, &[1; 224]).unwrap();

        let second = TileKey::new(2, 1, 15);
        store.register_tile(second, 10).unwrap();
        assert_eq!(store.in_flight().map(|t| t.key()), Some(second));
        assert!(!store.is_requested(&first));
        assert_eq!(store.tile_count(), 1);
    }

    #[test]
    fn test_abandoned_tile_refuses_chunks() {
        let mut store = store_with(&MemoryCache::default());
        let key = TileKey::new(3, 3, 16);
        store.mark_requested(key);
        store.register_tile(key, 300).unwrap();
        store.abandon_in_flight();

        assert!(store.in_flight().is_none());
        assert!(!store.is_requested(&key));
        assert!(matches!(store.append_chunk(0, &[1; 224]), Err(TileError::NoTileInFlight)));
        assert!(!store.set_zoom(16));
        assert!(store.set_zoom(15));
    }

    #[test]
    fn test_oversized_and_empty_tiles_rejected() {
        let mut store = store_with(&MemoryCache::default());
        let key = TileKey::new(0, 0, 1);
        assert!(matches!(store.register_tile(key, 0), Err(TileError::Empty { .. })));
        assert!(matches!(
            store.register_tile(key, MAX_TILE_BYTES + 1),
            Err(TileError::TooLarge { .. })
        ));
        assert!(store.in_flight().is_none());
    }

    #[test]
    fn test_insert_cached_tile_and_clear() {
        let cache = MemoryCache::default();
        let key = TileKey::new(4, 4, 11);
        cache.store(key, blob(2, 2, 8));
        let mut store = store_with(&cache);
        store.mark_requested(key);

        let tile = store.load_from_cache(key).unwrap();
        store.insert(tile);
        assert!(store.contains(&key));
        assert!(!store.is_requested(&key));

        store.clear();
        assert_eq!(store.tile_count(), 0);
        assert_eq!(store.zoom(), Some(11));
        store.reset();
        assert_eq!(store.zoom(), None);
    }
}
