use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::catalog::{PhaseTimings, TestKind, DEFAULT_INTRO_MS};
use crate::error::PoolError;
use crate::runtime::DEFAULT_TICK_MS;
use crate::stimulus::{PoolSet, StimulusPool};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub tick_millis: u64,
    pub intro_millis: u64,
    /// Seed used when none is given on the command line
    pub seed: Option<u64>,
    pub database: Option<PathBuf>,
    /// Respond window per test kind, in milliseconds
    pub respond_millis: BTreeMap<TestKind, u64>,
    /// Pool files replacing the built-in pool of a test kind
    pub pools: BTreeMap<TestKind, PathBuf>,
    /// Catalog file used instead of the built-in catalog
    pub catalog: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_millis: DEFAULT_TICK_MS,
            intro_millis: DEFAULT_INTRO_MS,
            seed: None,
            database: None,
            respond_millis: BTreeMap::new(),
            pools: BTreeMap::new(),
            catalog: None,
        }
    }
}

impl Config {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    /// Apply the user's intro length and respond window to `timings`
    pub fn apply(&self, kind: TestKind, mut timings: PhaseTimings) -> PhaseTimings {
        timings.intro = Duration::from_millis(self.intro_millis);
        if let Some(ms) = self.respond_millis.get(&kind) {
            timings.respond = Duration::from_millis(*ms);
        }
        timings
    }

    /// Built-in pools with the configured pool files swapped in
    pub fn pool_set(&self) -> Result<PoolSet, PoolError> {
        let mut pools = PoolSet::builtin()?;
        for (kind, path) in &self.pools {
            let pool = StimulusPool::from_file(path)?;
            debug!(%kind, path = %path.display(), items = pool.len(), "pool replaced");
            pools.replace(*kind, pool);
        }
        Ok(pools)
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> std::io::Result<()>;
}

/// Settings kept as pretty printed JSON
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    /// `settings.json` under the platform config directory
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("", "", "cognit")
            .map(|dirs| dirs.config_dir().join("settings.json"))
            .unwrap_or_else(|| PathBuf::from("cognit_settings.json"))
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::with_path(Self::default_path())
    }
}

impl ConfigStore for FileConfigStore {
    fn load(&self) -> Config {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                debug!(path = %self.path.display(), %err, "no settings file, using defaults");
                return Config::default();
            }
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!(path = %self.path.display(), %err, "ignoring malformed settings");
            Config::default()
        })
    }

    fn save(&self, cfg: &Config) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_vec_pretty(cfg)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[test]
    fn settings_survive_a_save_load_cycle() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::with_path(dir.path().join("nested").join("settings.json"));
        let settings = Config {
            tick_millis: 10,
            intro_millis: 1_000,
            seed: Some(42),
            database: Some(PathBuf::from("/tmp/results.db")),
            respond_millis: BTreeMap::from([(TestKind::Stroop, 2_000)]),
            pools: BTreeMap::from([(TestKind::SymbolMemory, PathBuf::from("/tmp/glyphs.json"))]),
            catalog: Some(PathBuf::from("/tmp/catalog.json")),
        };
        store.save(&settings).unwrap();
        assert_eq!(store.load(), settings);

        let raw = fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"STROOP\": 2000"));
    }

    #[test]
    fn missing_or_malformed_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::with_path(dir.path().join("settings.json"));
        assert_eq!(store.load(), Config::default());

        fs::write(store.path(), b"{ not json").unwrap();
        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempdir().unwrap();
        let store = FileConfigStore::with_path(dir.path().join("settings.json"));
        fs::write(store.path(), br#"{"seed": 7}"#).unwrap();
        let settings = store.load();
        assert_eq!(settings.seed, Some(7));
        assert_eq!(settings.tick(), Duration::from_millis(DEFAULT_TICK_MS));
    }

    #[test]
    fn zero_tick_is_clamped() {
        let settings = Config {
            tick_millis: 0,
            ..Config::default()
        };
        assert_eq!(settings.tick(), Duration::from_millis(1));
    }

    #[test]
    fn apply_overrides_intro_and_respond() {
        let def = Catalog::builtin().by_kind(TestKind::Stroop).unwrap().clone();
        let settings = Config {
            intro_millis: 500,
            respond_millis: BTreeMap::from([(TestKind::Stroop, 2_000)]),
            ..Config::default()
        };
        let timings = settings.apply(TestKind::Stroop, def.timings());
        assert_eq!(timings.intro, Duration::from_millis(500));
        assert_eq!(timings.respond, Duration::from_millis(2_000));

        let untouched = settings.apply(TestKind::Arithmetic, def.timings());
        assert_eq!(untouched.respond, def.timings().respond);
    }

    #[test]
    fn configured_pool_replaces_the_builtin_one() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("glyphs.json");
        fs::write(
            &path,
            br#"{"name": "glyphs", "items": [{"value": "glyph-a"}, {"value": "glyph-b"}, {"value": "glyph-c"}, {"value": "glyph-d"}]}"#,
        )
        .unwrap();
        let settings = Config {
            pools: BTreeMap::from([(TestKind::SymbolMemory, path)]),
            ..Config::default()
        };

        let pools = settings.pool_set().unwrap();
        assert_eq!(pools.for_kind(TestKind::SymbolMemory).name, "glyphs");
        assert_eq!(pools.symbols.len(), 4);
        assert_eq!(pools.images, PoolSet::builtin().unwrap().images);
    }

    #[test]
    fn unreadable_pool_file_is_an_error() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.json");
        fs::write(&empty, br#"{"name": "empty", "items": []}"#).unwrap();

        let missing = Config {
            pools: BTreeMap::from([(TestKind::Stroop, dir.path().join("nope.json"))]),
            ..Config::default()
        };
        assert_matches!(missing.pool_set(), Err(PoolError::Io(_)));

        let no_items = Config {
            pools: BTreeMap::from([(TestKind::Stroop, empty)]),
            ..Config::default()
        };
        assert_matches!(no_items.pool_set(), Err(PoolError::Empty { .. }));
    }
}
