//! Learned-schema cache.
//!
//! Maps URI shapes (`/projects/*/subjects/*/experiments/*`) to the most
//! specific subtype observed there. One snapshot file per request shape lives
//! in the cache directory; its name is the blake3 digest of the shape. All
//! snapshots are merged into memory when the session starts.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::error::Result;
use crate::schema::OtherHasher;
use crate::transport::Row;
use crate::uri;

const SNAPSHOT_EXTENSION: &str = "struct";

#[derive(Debug)]
pub struct LearnedSchema {
    cache_dir: PathBuf,
    kept: Mutex<HashMap<String, String, OtherHasher>>,
}

/// Learning fires on the seconds that are a multiple of `tick`.
pub fn tick_fires(now_secs: u32, tick: u32, auto_learn: bool) -> bool {
    auto_learn && tick > 0 && now_secs % tick == 0
}

impl LearnedSchema {
    /// Opens the cache directory, creating it if needed, and merges every
    /// snapshot found there. Unreadable snapshots are skipped.
    pub fn load(cache_dir: &Path) -> Result<Self> {
        fs::create_dir_all(cache_dir)?;
        let learned = Self {
            cache_dir: cache_dir.to_path_buf(),
            kept: Mutex::new(HashMap::default()),
        };
        let mut loaded = 0;
        for entry in fs::read_dir(cache_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXTENSION) {
                continue;
            }
            match read_snapshot(&path) {
                Ok(snapshot) => {
                    learned.keep().extend(snapshot);
                    loaded += 1;
                }
                Err(e) => warn!("skipping unreadable snapshot {}: {}", path.display(), e),
            }
        }
        debug!("loaded {} learned-schema snapshots from {}", loaded, cache_dir.display());
        Ok(learned)
    }

    fn keep(&self) -> MutexGuard<'_, HashMap<String, String, OtherHasher>> {
        // a poisoned map is still a valid map
        self.kept.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn lookup(&self, shape: &str) -> Option<String> {
        self.keep().get(shape).cloned()
    }

    /// Subtypes of every known shape that glob-matches `relative_uri`.
    pub fn matching(&self, relative_uri: &str) -> Vec<String> {
        let mut subtypes: Vec<String> = self
            .keep()
            .iter()
            .filter(|(shape, _)| uri::matches_glob(shape, relative_uri))
            .map(|(_, subtype)| subtype.clone())
            .collect();
        subtypes.sort();
        subtypes.dedup();
        subtypes
    }

    /// The first known shape matching `relative_uri`, in shape order.
    pub fn first_match(&self, relative_uri: &str) -> Option<String> {
        let kept = self.keep();
        let mut shapes: Vec<&String> = kept
            .keys()
            .filter(|shape| uri::matches_glob(shape, relative_uri))
            .collect();
        shapes.sort();
        shapes.first().and_then(|shape| kept.get(*shape)).cloned()
    }

    pub fn snapshot_path(&self, request_shape: &str) -> PathBuf {
        let digest = blake3::hash(request_shape.as_bytes());
        self.cache_dir
            .join(format!("{}.{}", digest.to_hex(), SNAPSHOT_EXTENSION))
    }

    pub fn has_snapshot(&self, request_shape: &str) -> bool {
        self.snapshot_path(request_shape).exists()
    }

    /// Records `shape -> xsiType` for every row that carries both a type and
    /// a URI, merges the observations over the snapshot of `request_shape`
    /// (new wins) and keeps the merged mapping both on disk and in memory.
    pub fn learn(
        &self,
        node: &str,
        rows: &[Row],
        request_shape: &str,
        entry_point: &str,
    ) -> Result<BTreeMap<String, String>> {
        let mut observed = BTreeMap::new();
        for row in rows {
            let (Some(subtype), Some(row_uri)) = (row.get("xsiType"), row.get("URI")) else {
                continue;
            };
            if subtype.is_empty() {
                continue;
            }
            let relative = uri::relative(row_uri, entry_point);
            let mut segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
            let n = segments.len();
            if n < 2 {
                continue;
            }
            segments[n - 2] = node;
            observed.insert(uri::shape(&segments.join("/")), subtype.clone());
        }

        let path = self.snapshot_path(request_shape);
        let mut merged = if path.exists() {
            read_snapshot(&path).unwrap_or_default()
        } else {
            BTreeMap::new()
        };
        merged.extend(observed);
        fs::write(&path, serde_json::to_vec_pretty(&merged)?)?;
        self.keep()
            .extend(merged.iter().map(|(k, v)| (k.clone(), v.clone())));
        debug!("learned {} shapes for {}", merged.len(), request_shape);
        Ok(merged)
    }

    pub fn len(&self) -> usize {
        self.keep().len()
    }
    pub fn is_empty(&self) -> bool {
        self.keep().is_empty()
    }
}

fn read_snapshot(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = fs::read(path)?;
    Ok(serde_json::from_slice(&content)?)
}
