//! The persistence facade: the only authorized path to the world file
//!
//! Services never touch the disk themselves; they hand a snapshot to
//! `save_world` and move on. A per-path debouncer coalesces bursts of
//! saves into one write; `flush_all_saves` drains everything pending at
//! shutdown and at critical moments (account creation, logout, purge).
//! Save failures are best-effort: counted and logged, never surfaced to
//! players.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::world::{migrate, World};

/// Counters exposed for observability (`/stats`)
#[derive(Debug, Default)]
pub struct SaveStats {
    immediate: AtomicU64,
    debounced: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// A point-in-time copy of the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SaveStatsSnapshot {
    pub immediate: u64,
    pub debounced: u64,
    pub writes: u64,
    pub errors: u64,
}

/// A serialized world waiting out its debounce window
struct PendingSave {
    payload: String,
    generation: u64,
}

pub struct Persister {
    debounce: Duration,
    stats: SaveStats,
    pending: Mutex<HashMap<PathBuf, PendingSave>>,
    generation: AtomicU64,
}

impl Persister {
    pub fn new(debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            debounce,
            stats: SaveStats::default(),
            pending: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        })
    }

    /// Request a save of the world to `path`
    ///
    /// Serialization happens right here, under whatever lock the caller
    /// holds; the disk write always happens later on a spawned task, so
    /// the world lock is never held across I/O. Debounced requests within
    /// the window coalesce; `debounced = false` skips the window.
    pub fn save_world(self: &Arc<Self>, world: &World, path: impl AsRef<Path>, debounced: bool) {
        let path = path.as_ref().to_path_buf();
        let payload = match serde_json::to_string_pretty(world) {
            Ok(payload) => payload,
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                error!("Failed to serialize world for {path:?}: {err}");
                return;
            }
        };

        if debounced {
            self.stats.debounced.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.immediate.fetch_add(1, Ordering::Relaxed);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let persister = Arc::clone(self);
        tokio::spawn(async move {
            if debounced {
                // Park the payload; the newest request owns the window
                {
                    let mut pending = persister.pending.lock().await;
                    pending.insert(
                        path.clone(),
                        PendingSave {
                            payload,
                            generation,
                        },
                    );
                }
                tokio::time::sleep(persister.debounce).await;

                // Only write if nobody superseded us while we slept
                let payload = {
                    let mut pending = persister.pending.lock().await;
                    match pending.get(&path) {
                        Some(entry) if entry.generation == generation => {
                            pending.remove(&path).map(|entry| entry.payload)
                        }
                        _ => None,
                    }
                };
                if let Some(payload) = payload {
                    persister.write_atomic(&path, &payload).await;
                }
            } else {
                // An immediate save supersedes anything pending
                persister.pending.lock().await.remove(&path);
                persister.write_atomic(&path, &payload).await;
            }
        });
    }

    /// Write out everything still waiting in a debounce window
    pub async fn flush_all_saves(&self) {
        let drained: Vec<(PathBuf, String)> = {
            let mut pending = self.pending.lock().await;
            pending
                .drain()
                .map(|(path, entry)| (path, entry.payload))
                .collect()
        };
        if drained.is_empty() {
            return;
        }
        info!("Flushing {} pending save(s)", drained.len());
        for (path, payload) in drained {
            self.write_atomic(&path, &payload).await;
        }
    }

    pub fn stats(&self) -> SaveStatsSnapshot {
        SaveStatsSnapshot {
            immediate: self.stats.immediate.load(Ordering::Relaxed),
            debounced: self.stats.debounced.load(Ordering::Relaxed),
            writes: self.stats.writes.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
        }
    }

    /// Temp-file-and-rename so a crash mid-write never corrupts the store
    async fn write_atomic(&self, path: &Path, payload: &str) {
        let tmp = path.with_extension("json.tmp");
        let result = async {
            tokio::fs::write(&tmp, payload).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        match result {
            Ok(()) => {
                self.stats.writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                error!("Failed to write world to {path:?}: {err}");
            }
        }
    }
}

/// Load the world document, applying pending migrations; a missing file
/// yields a fresh default world
pub async fn load_world(path: impl AsRef<Path>) -> anyhow::Result<World> {
    let path = path.as_ref();
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            warn!("No world file at {path:?}, starting a fresh world");
            return Ok(World::new_default());
        }
        Err(err) => return Err(err.into()),
    };

    let doc: serde_json::Value = serde_json::from_str(&raw)?;
    let world = migrate::world_from_document(doc)?;
    info!(
        "Loaded world '{}' at schema v{}",
        world.name, world.world_version
    );
    Ok(world)
}

#[cfg(test)]
mod test {
    use super::*;

    fn world_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("world.json")
    }

    #[tokio::test]
    async fn test_debounce_coalesces_to_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = world_path(&dir);
        let persister = Persister::new(Duration::from_millis(50));
        let world = World::new_default();

        // Two quick saves land inside one window
        persister.save_world(&world, &path, true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        persister.save_world(&world, &path, true);

        tokio::time::sleep(Duration::from_millis(150)).await;

        let stats = persister.stats();
        assert_eq!(stats.debounced, 2);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.errors, 0);

        // Nothing left for flush to do
        persister.flush_all_saves().await;
        assert_eq!(persister.stats().writes, 1);

        // And the file round-trips
        let loaded = load_world(&path).await.unwrap();
        assert_eq!(loaded.name, world.name);
    }

    #[tokio::test]
    async fn test_immediate_save_skips_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = world_path(&dir);
        let persister = Persister::new(Duration::from_secs(60));
        let world = World::new_default();

        persister.save_world(&world, &path, false);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let stats = persister.stats();
        assert_eq!(stats.immediate, 1);
        assert_eq!(stats.writes, 1);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_flush_writes_pending_saves() {
        let dir = tempfile::tempdir().unwrap();
        let path = world_path(&dir);
        let persister = Persister::new(Duration::from_secs(600));
        let world = World::new_default();

        persister.save_world(&world, &path, true);
        // Give the spawned task a beat to park the payload
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!path.exists());

        persister.flush_all_saves().await;
        assert!(path.exists());
        assert_eq!(persister.stats().writes, 1);
    }

    #[tokio::test]
    async fn test_load_missing_file_gives_default_world() {
        let dir = tempfile::tempdir().unwrap();
        let world = load_world(dir.path().join("nope.json")).await.unwrap();
        assert!(world.rooms.contains_key(crate::world::START_ROOM_ID));
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = world_path(&dir);
        tokio::fs::write(&path, "{ not json").await.unwrap();
        assert!(load_world(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_save_load_round_trip_preserves_world() {
        let dir = tempfile::tempdir().unwrap();
        let path = world_path(&dir);
        let persister = Persister::new(Duration::from_millis(1));

        let mut world = World::new_default();
        world.name = "Roundtrip".into();
        let mut sheet = crate::world::sheet::CharacterSheet::new("Gareth", "a guard");
        sheet.needs.hunger = 42.0;
        world.npc_sheets.insert("Gareth".into(), sheet);
        world
            .npc_ids
            .insert("Gareth".into(), uuid::Uuid::now_v7());

        persister.save_world(&world, &path, false);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let loaded = load_world(&path).await.unwrap();
        assert_eq!(loaded, world);
    }
}
