use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::{ExprError, Result};

/// One step of a dotted path: a field name, or an array index (spec §4.2
/// step 3: "dot notation and integer indices").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

static CHUNK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_\-]+)((?:\[\d+\])*)$").unwrap());
static INDEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[(\d+)\]").unwrap());

/// Parses `results[0].url` into `[Key("results"), Index(0), Key("url")]`.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>> {
    let mut segments = Vec::new();
    for chunk in path.split('.') {
        if chunk.is_empty() {
            return Err(ExprError::MalformedPath(path.to_string()));
        }
        let caps = CHUNK_RE
            .captures(chunk)
            .ok_or_else(|| ExprError::MalformedPath(path.to_string()))?;
        segments.push(PathSegment::Key(caps[1].to_string()));
        for idx_caps in INDEX_RE.captures_iter(&caps[2]) {
            let idx: usize = idx_caps[1]
                .parse()
                .map_err(|_| ExprError::MalformedPath(path.to_string()))?;
            segments.push(PathSegment::Index(idx));
        }
    }
    Ok(segments)
}

/// Walks `value` following `segments`, returning `None` on any missing
/// field, out-of-range index, or type mismatch (treated the same as a
/// missing reference by the resolver).
pub fn walk<'a>(value: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Index(idx), Value::Array(arr)) => arr.get(*idx)?,
            _ => return None,
        };
    }
    Some(current)
}
