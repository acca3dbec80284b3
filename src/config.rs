//! Session settings.
//!
//! Settings are layered with the `config` crate: built-in defaults first, then
//! an optional configuration file (any format `config` understands, usually
//! TOML), then environment variables prefixed with `RESTREE_`
//! (`RESTREE_SERVER`, `RESTREE_CACHE_DIR`, ...).

use std::path::{Path, PathBuf};

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Base address of the remote service, e.g. `https://central.xnat.org`.
    pub server: String,
    /// Fixed root every URI is anchored at.
    pub entry_point: String,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Where learned-schema snapshots are kept between runs.
    pub cache_dir: PathBuf,
    /// Learning fires when the current wall-clock second is a multiple of this.
    pub learn_tick: u32,
    pub auto_learn: bool,
    /// Surface transport faults instead of degrading to empty results.
    pub debug: bool,
    pub timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: String::from("http://localhost:8080"),
            entry_point: String::from("/data"),
            user: None,
            password: None,
            cache_dir: default_cache_dir(),
            learn_tick: 30,
            auto_learn: true,
            debug: false,
            timeout_secs: None,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::temp_dir().join("restree")
}

impl Settings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let defaults = Settings::default();
        let mut builder = Config::builder()
            .set_default("server", defaults.server.as_str())?
            .set_default("entry_point", defaults.entry_point.as_str())?
            .set_default("cache_dir", defaults.cache_dir.to_string_lossy().as_ref())?
            .set_default("learn_tick", i64::from(defaults.learn_tick))?
            .set_default("auto_learn", defaults.auto_learn)?
            .set_default("debug", defaults.debug)?;
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }
        builder = builder.add_source(Environment::with_prefix("RESTREE"));
        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings.normalized())
    }

    /// Entry point with exactly one leading and no trailing separator.
    fn normalized(mut self) -> Self {
        let trimmed = self.entry_point.trim_matches('/');
        self.entry_point = format!("/{trimmed}");
        self.server = self.server.trim_end_matches('/').to_string();
        self
    }

    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }
    pub fn with_entry_point(mut self, entry_point: &str) -> Self {
        self.entry_point = entry_point.to_string();
        self.normalized()
    }
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
    pub fn with_learning(mut self, auto_learn: bool, learn_tick: u32) -> Self {
        self.auto_learn = auto_learn;
        self.learn_tick = learn_tick;
        self
    }
}
