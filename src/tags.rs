//! Tag manager collaborator.
//!
//! A tag is a named set of element URIs. Elements and collections only
//! reference and dereference; cleanup of tags left empty is done by the
//! callers (`untag`).

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use crate::error::{RestreeError, Result};
use crate::schema::OtherHasher;

pub trait TagManager: Send + Sync {
    fn exists(&self, name: &str) -> Result<bool>;
    fn create(&self, name: &str) -> Result<()>;
    fn reference_many(&self, name: &str, uris: &[String]) -> Result<()>;
    fn dereference_many(&self, name: &str, uris: &[String]) -> Result<()>;
    fn references(&self, name: &str) -> Result<Vec<String>>;
    fn delete(&self, name: &str) -> Result<()>;
}

/// Process-local tags.
#[derive(Debug, Default)]
pub struct LocalTags {
    tags: Mutex<HashMap<String, BTreeSet<String>, OtherHasher>>,
}

impl LocalTags {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_tags<T>(
        &self,
        f: impl FnOnce(&mut HashMap<String, BTreeSet<String>, OtherHasher>) -> Result<T>,
    ) -> Result<T> {
        let mut tags = self
            .tags
            .lock()
            .map_err(|e| RestreeError::Lock(e.to_string()))?;
        f(&mut tags)
    }
}

fn missing(name: &str) -> RestreeError {
    RestreeError::Data(format!("tag '{name}' does not exist"))
}

impl TagManager for LocalTags {
    fn exists(&self, name: &str) -> Result<bool> {
        self.with_tags(|tags| Ok(tags.contains_key(name)))
    }
    fn create(&self, name: &str) -> Result<()> {
        self.with_tags(|tags| {
            tags.entry(name.to_string()).or_default();
            Ok(())
        })
    }
    fn reference_many(&self, name: &str, uris: &[String]) -> Result<()> {
        self.with_tags(|tags| {
            let tag = tags.get_mut(name).ok_or_else(|| missing(name))?;
            tag.extend(uris.iter().cloned());
            Ok(())
        })
    }
    fn dereference_many(&self, name: &str, uris: &[String]) -> Result<()> {
        self.with_tags(|tags| {
            let tag = tags.get_mut(name).ok_or_else(|| missing(name))?;
            for uri in uris {
                tag.remove(uri);
            }
            Ok(())
        })
    }
    fn references(&self, name: &str) -> Result<Vec<String>> {
        self.with_tags(|tags| {
            Ok(tags
                .get(name)
                .map(|tag| tag.iter().cloned().collect())
                .unwrap_or_default())
        })
    }
    fn delete(&self, name: &str) -> Result<()> {
        self.with_tags(|tags| {
            tags.remove(name);
            Ok(())
        })
    }
}
