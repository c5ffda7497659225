//! Join and key-coverage diagnostics.
//!
//! Nothing here changes data. Every join reports what it dropped, and the
//! per-source key sets expose normalization gaps (a country spelled two ways
//! shows up as two keys each seen in only one source).

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    Left,
    /// Outer join that keeps every row of one side.
    Anchored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinReport {
    pub name: &'static str,
    pub kind: JoinKind,
    pub input_rows: usize,
    pub output_rows: usize,
    pub dropped_rows: usize,
    /// Input rows that duplicated an earlier key and were ignored.
    pub duplicate_rows: usize,
}

impl JoinReport {
    pub fn new(name: &'static str, kind: JoinKind) -> Self {
        Self {
            name,
            kind,
            input_rows: 0,
            output_rows: 0,
            dropped_rows: 0,
            duplicate_rows: 0,
        }
    }

    pub fn log(&self) {
        if self.dropped_rows > 0 || self.duplicate_rows > 0 {
            warn!(
                join = self.name,
                kind = ?self.kind,
                input = self.input_rows,
                output = self.output_rows,
                dropped = self.dropped_rows,
                duplicates = self.duplicate_rows,
                "join dropped rows"
            );
        } else {
            info!(
                join = self.name,
                kind = ?self.kind,
                input = self.input_rows,
                output = self.output_rows,
                "join complete"
            );
        }
    }
}

/// Distinct canonical keys per source.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KeyCoverage {
    pub sources: BTreeMap<&'static str, BTreeSet<String>>,
}

impl KeyCoverage {
    pub fn record<'a>(&mut self, source: &'static str, keys: impl IntoIterator<Item = &'a str>) {
        let set = self.sources.entry(source).or_default();
        set.extend(keys.into_iter().map(str::to_string));
    }

    pub fn union(&self) -> BTreeSet<&str> {
        self.sources
            .values()
            .flat_map(|keys| keys.iter().map(String::as_str))
            .collect()
    }

    /// Keys observed in exactly one source, with that source.
    pub fn single_source_keys(&self) -> BTreeMap<&str, &'static str> {
        let mut seen: BTreeMap<&str, Vec<&'static str>> = BTreeMap::new();
        for (source, keys) in &self.sources {
            for key in keys {
                seen.entry(key.as_str()).or_default().push(*source);
            }
        }
        seen.into_iter()
            .filter_map(|(key, sources)| match sources.as_slice() {
                [only] if self.sources.len() > 1 => Some((key, *only)),
                _ => None,
            })
            .collect()
    }

    pub fn log(&self) {
        for (source, keys) in &self.sources {
            info!(source, distinct_keys = keys.len(), "canonical keys per source");
        }
        let singles = self.single_source_keys();
        let mut by_source: BTreeMap<&'static str, Vec<&str>> = BTreeMap::new();
        for (key, source) in &singles {
            by_source.entry(*source).or_default().push(*key);
        }
        for (source, keys) in by_source {
            info!(source, count = keys.len(), keys = ?keys, "keys seen only in this source");
        }
    }
}
