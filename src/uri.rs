//! URI algebra.
//!
//! Pure string transforms over resource-tree addresses. A URI alternates node
//! names and identifiers below the entry point:
//! `/data/projects/P1/subjects/S1/experiments/E1`. The last segment of an
//! element URI is its identifier and the one before it is its (plural) node
//! name. Reconstruction and assessor resources are addressed with an `in` or
//! `out` qualifier (`.../in/resources/R1`), which the algebra treats as part
//! of the node name (`in_resources`).
//!
//! Nothing here performs I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use glob::Pattern;
use lazy_static::lazy_static;

use crate::error::{RestreeError, Result};

/// The token a trailing identifier collapses to in a shape.
pub const WILDCARD: &str = "*";

const QUALIFIERS: [&str; 2] = ["in", "out"];
const QUALIFIED: [&str; 2] = ["resources", "files"];

fn segments(uri: &str) -> Vec<&str> {
    uri.split('/').filter(|s| !s.is_empty()).collect()
}

fn rebuild(segments: &[&str]) -> String {
    let mut uri = String::new();
    for segment in segments {
        uri.push('/');
        uri.push_str(segment);
    }
    uri
}

fn is_qualified(segments: &[&str]) -> bool {
    let n = segments.len();
    n >= 3 && QUALIFIERS.contains(&segments[n - 3]) && QUALIFIED.contains(&segments[n - 2])
}

/// Appends segments, dropping separators at the seams.
pub fn join(uri: &str, extra: &[&str]) -> String {
    let mut joined = uri.trim_end_matches('/').to_string();
    for segment in extra {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            continue;
        }
        joined.push('/');
        joined.push_str(segment);
    }
    joined
}

pub fn last(uri: &str) -> Result<&str> {
    segments(uri)
        .last()
        .copied()
        .ok_or_else(|| RestreeError::Addressing(format!("'{uri}' has no segments")))
}

/// The node name an element URI lives under, qualified when the URI uses
/// the in/out form.
pub fn next_to_last(uri: &str) -> Result<String> {
    let segments = segments(uri);
    let n = segments.len();
    if n < 2 {
        return Err(RestreeError::Addressing(format!(
            "'{uri}' is too short to have a node name"
        )));
    }
    if is_qualified(&segments) {
        Ok(format!("{}_{}", segments[n - 3], segments[n - 2]))
    } else {
        Ok(segments[n - 2].to_string())
    }
}

pub fn parent(uri: &str) -> Result<String> {
    let segments = segments(uri);
    if segments.len() < 2 {
        return Err(RestreeError::Addressing(format!("'{uri}' has no parent")));
    }
    Ok(rebuild(&segments[..segments.len() - 1]))
}

/// The owning element of an element URI, skipping an in/out qualifier.
pub fn grandparent(uri: &str) -> Result<String> {
    let segments = segments(uri);
    let drop = if is_qualified(&segments) { 3 } else { 2 };
    if segments.len() <= drop {
        return Err(RestreeError::Addressing(format!("'{uri}' has no grandparent")));
    }
    Ok(rebuild(&segments[..segments.len() - drop]))
}

/// Replaces the trailing identifier with [`WILDCARD`]. Idempotent.
pub fn shape(uri: &str) -> String {
    let mut segments = segments(uri);
    match segments.last_mut() {
        Some(last) => {
            *last = WILDCARD;
            rebuild(&segments)
        }
        None => uri.to_string(),
    }
}

/// Expands shorthand forms into the canonical rooted form.
pub fn translate(uri: &str, entry_point: &str) -> String {
    let entry = segments(entry_point);
    let mut segments = segments(uri);
    if !segments.starts_with(&entry) {
        let mut rooted = entry.clone();
        rooted.extend(segments);
        segments = rooted;
    }
    let mut translated = Vec::with_capacity(segments.len() + 2);
    for (position, segment) in segments.iter().enumerate() {
        let expanded = if position >= entry.len() {
            match *segment {
                "in_resources" => Some(["in", "resources"]),
                "out_resources" => Some(["out", "resources"]),
                "in_files" => Some(["in", "files"]),
                "out_files" => Some(["out", "files"]),
                _ => None,
            }
        } else {
            None
        };
        match expanded {
            Some(pair) => translated.extend(pair),
            None => translated.push(*segment),
        }
    }
    rebuild(&translated)
}

/// The part of `uri` below the entry point, always starting with a separator.
pub fn relative<'a>(uri: &'a str, entry_point: &str) -> &'a str {
    let entry = entry_point.trim_end_matches('/');
    match uri.strip_prefix(entry) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => uri,
    }
}

/// Percent-encodes each segment. Already encoded segments are decoded first
/// so that encoding twice is harmless.
pub fn encode(uri: &str) -> String {
    let encoded: Vec<String> = segments(uri)
        .into_iter()
        .map(|segment| {
            if segment == WILDCARD {
                segment.to_string()
            } else {
                urlencoding::encode(&decode(segment)).into_owned()
            }
        })
        .collect();
    let mut uri = String::new();
    for segment in encoded {
        uri.push('/');
        uri.push_str(&segment);
    }
    uri
}

pub fn decode(segment: &str) -> String {
    match urlencoding::decode(segment) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => segment.to_string(),
    }
}

// ------------- Glob matching -------------
lazy_static! {
    static ref GLOBS: Mutex<HashMap<String, Option<Pattern>>> = Mutex::new(HashMap::new());
}

/// Shell-style matching with `*`, `?`, `[...]` and `[!...]`. A pattern that
/// does not compile only matches itself.
pub fn matches_glob(pattern: &str, text: &str) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    let mut globs = GLOBS.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let compiled = globs.entry(pattern.to_string()).or_insert_with(|| {
        // runs of '*' mean the same as one, and glob reserves '**' for paths
        let mut collapsed = String::with_capacity(pattern.len());
        for c in pattern.chars() {
            if !(c == '*' && collapsed.ends_with('*')) {
                collapsed.push(c);
            }
        }
        Pattern::new(&collapsed).ok()
    });
    match compiled {
        Some(compiled) => compiled.matches(text),
        None => pattern == text,
    }
}
