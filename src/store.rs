//! Collaborator boundary: catalog cache and provider lookup.
//!
//! The engine persists what it learns from the device through a
//! [`CatalogStore`] and asks a [`ProviderLookup`] for provider labels the
//! device does not supply. Both are implemented by the host application; the
//! adapters here cover in-process use, a JSON snapshot file, and migration
//! from a legacy store.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Result, StbError};
use crate::types::{Channel, FavoriteGroup};

/// Persisted catalog contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub channels: Vec<Channel>,
    pub favorite_groups: Vec<FavoriteGroup>,
}

impl CatalogSnapshot {
    /// Whether the snapshot holds no channels.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Cache of the last known catalog.
pub trait CatalogStore {
    /// Persist favorite groups on their own.
    fn save_favorite_groups(&mut self, groups: &[FavoriteGroup]) -> Result<()>;

    /// Persist the full catalog.
    fn save_catalog(&mut self, channels: &[Channel], groups: &[FavoriteGroup]) -> Result<()>;

    /// Load the last persisted catalog. Empty if nothing was saved.
    fn load_catalog(&mut self) -> Result<CatalogSnapshot>;
}

/// Provider label lookup by channel name.
pub trait ProviderLookup {
    /// Provider for `channel_name`, or an empty string when unknown.
    fn lookup_provider(&self, channel_name: &str) -> String;
}

impl<F> ProviderLookup for F
where
    F: Fn(&str) -> String,
{
    fn lookup_provider(&self, channel_name: &str) -> String {
        self(channel_name)
    }
}

/// Lookup that never knows a provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProviderLookup;

impl ProviderLookup for NoProviderLookup {
    fn lookup_provider(&self, _channel_name: &str) -> String {
        String::new()
    }
}

/// In-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    snapshot: CatalogSnapshot,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-filled with a snapshot.
    pub fn with_snapshot(snapshot: CatalogSnapshot) -> Self {
        Self { snapshot }
    }

    /// Current contents.
    pub fn snapshot(&self) -> &CatalogSnapshot {
        &self.snapshot
    }
}

impl CatalogStore for MemoryStore {
    fn save_favorite_groups(&mut self, groups: &[FavoriteGroup]) -> Result<()> {
        self.snapshot.favorite_groups = groups.to_vec();
        Ok(())
    }

    fn save_catalog(&mut self, channels: &[Channel], groups: &[FavoriteGroup]) -> Result<()> {
        self.snapshot.channels = channels.to_vec();
        self.snapshot.favorite_groups = groups.to_vec();
        Ok(())
    }

    fn load_catalog(&mut self) -> Result<CatalogSnapshot> {
        Ok(self.snapshot.clone())
    }
}

/// Store keeping the catalog as one JSON document.
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash never leaves a half-written snapshot.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    /// Create a store backed by `path`. The file is created on first save.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file path.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn write(&self, snapshot: &CatalogSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            path = %self.path.display(),
            channels = snapshot.channels.len(),
            "catalog snapshot written"
        );
        Ok(())
    }
}

impl CatalogStore for JsonFileStore {
    fn save_favorite_groups(&mut self, groups: &[FavoriteGroup]) -> Result<()> {
        let mut snapshot = self.load_catalog()?;
        snapshot.favorite_groups = groups.to_vec();
        self.write(&snapshot)
    }

    fn save_catalog(&mut self, channels: &[Channel], groups: &[FavoriteGroup]) -> Result<()> {
        self.write(&CatalogSnapshot {
            channels: channels.to_vec(),
            favorite_groups: groups.to_vec(),
        })
    }

    fn load_catalog(&mut self) -> Result<CatalogSnapshot> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CatalogSnapshot::default()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Store that falls back to a legacy store once and migrates its data.
///
/// Saves go to the primary only. A load that finds the primary empty reads
/// the legacy store and, if that yields channels, copies them into the
/// primary.
#[derive(Debug, Clone)]
pub struct MigratingStore<P, L> {
    primary: P,
    legacy: L,
}

impl<P, L> MigratingStore<P, L> {
    /// Wrap a primary store with a legacy fallback.
    pub fn new(primary: P, legacy: L) -> Self {
        Self { primary, legacy }
    }

    /// The primary store.
    pub fn primary(&self) -> &P {
        &self.primary
    }
}

impl<P, L> CatalogStore for MigratingStore<P, L>
where
    P: CatalogStore,
    L: CatalogStore,
{
    fn save_favorite_groups(&mut self, groups: &[FavoriteGroup]) -> Result<()> {
        self.primary.save_favorite_groups(groups)
    }

    fn save_catalog(&mut self, channels: &[Channel], groups: &[FavoriteGroup]) -> Result<()> {
        self.primary.save_catalog(channels, groups)
    }

    fn load_catalog(&mut self) -> Result<CatalogSnapshot> {
        let snapshot = self.primary.load_catalog()?;
        if !snapshot.is_empty() {
            return Ok(snapshot);
        }

        let legacy = match self.legacy.load_catalog() {
            Ok(legacy) => legacy,
            Err(e) => {
                warn!(error = %e, "legacy catalog unreadable");
                return Ok(snapshot);
            }
        };
        if legacy.is_empty() {
            return Ok(snapshot);
        }

        info!(channels = legacy.channels.len(), "migrating legacy catalog");
        self.primary
            .save_catalog(&legacy.channels, &legacy.favorite_groups)
            .map_err(|e| StbError::store(format!("legacy migration failed: {e}")))?;
        Ok(legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CatalogSnapshot {
        let mut news = Channel::new("00050029700001", "News 24");
        news.set_favorite_groups([1, 3]);
        CatalogSnapshot {
            channels: vec![news, Channel::new("00050029700002", "Movies")],
            favorite_groups: vec![FavoriteGroup::new(1, "Fav"), FavoriteGroup::new(3, "Kids")],
        }
    }

    fn temp_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("stb-gmscreen-{}", uuid::Uuid::new_v4()))
            .join("catalog.json")
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStore::new();
        assert!(store.load_catalog().unwrap().is_empty());

        let snapshot = sample();
        store.save_favorite_groups(&snapshot.favorite_groups).unwrap();
        assert_eq!(store.snapshot().favorite_groups.len(), 2);
        assert!(store.snapshot().channels.is_empty());

        store
            .save_catalog(&snapshot.channels, &snapshot.favorite_groups)
            .unwrap();
        assert_eq!(store.load_catalog().unwrap(), snapshot);
    }

    #[test]
    fn test_json_file_store_roundtrip() {
        let path = temp_path();
        let mut store = JsonFileStore::new(&path);
        assert!(store.load_catalog().unwrap().is_empty());

        let snapshot = sample();
        store
            .save_catalog(&snapshot.channels, &snapshot.favorite_groups)
            .unwrap();

        let mut reopened = JsonFileStore::new(&path);
        let loaded = reopened.load_catalog().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.channels[0].fav_mark(), 0b101);

        reopened.save_favorite_groups(&[FavoriteGroup::new(2, "Music")]).unwrap();
        let loaded = reopened.load_catalog().unwrap();
        assert_eq!(loaded.channels.len(), 2);
        assert_eq!(loaded.favorite_groups, vec![FavoriteGroup::new(2, "Music")]);

        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_json_file_store_corrupt_file() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"{not json").unwrap();

        let mut store = JsonFileStore::new(&path);
        assert!(matches!(store.load_catalog(), Err(StbError::Json(_))));

        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_json_file_store_drops_invalid_group_ids() {
        let path = temp_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let json = r#"{
            "channels": [{
                "program_id": "00050029700001", "name": "News 24", "index": 0,
                "program_type": "Tv", "is_hd": false, "is_locked": false,
                "channel_type": 0, "provider": "", "favorite_groups": [0, 40, 2, 300]
            }],
            "favorite_groups": []
        }"#;
        fs::write(&path, json).unwrap();

        let loaded = JsonFileStore::new(&path).load_catalog().unwrap();
        let channel = &loaded.channels[0];
        assert_eq!(channel.fav_mark(), 0b10);
        assert_eq!(channel.favor_group_id_string(), "2:");
        assert!(!channel.selected);

        fs::remove_dir_all(path.parent().unwrap()).ok();
    }

    #[test]
    fn test_migrating_store_moves_legacy_data() {
        let legacy = MemoryStore::with_snapshot(sample());
        let mut store = MigratingStore::new(MemoryStore::new(), legacy);

        let loaded = store.load_catalog().unwrap();
        assert_eq!(loaded, sample());
        assert_eq!(store.primary().snapshot(), &sample());
    }

    #[test]
    fn test_migrating_store_prefers_primary() {
        let primary = MemoryStore::with_snapshot(CatalogSnapshot {
            channels: vec![Channel::new("9", "Primary")],
            favorite_groups: vec![],
        });
        let mut store = MigratingStore::new(primary, MemoryStore::with_snapshot(sample()));

        let loaded = store.load_catalog().unwrap();
        assert_eq!(loaded.channels.len(), 1);
        assert_eq!(loaded.channels[0].name, "Primary");
    }

    #[test]
    fn test_provider_lookup_closure() {
        let lookup = |name: &str| format!("{name} Group");
        assert_eq!(lookup.lookup_provider("Canal"), "Canal Group");
        assert_eq!(NoProviderLookup.lookup_provider("Canal"), "");
    }
}
