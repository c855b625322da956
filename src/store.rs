//! Append-only storage for the entries of all sources.
//!
//! Entries are loaded through a [`RecordStoreBuilder`] and frozen into a
//! [`RecordStore`]. The store index of a record is its position in overall
//! ingestion order (source order, then order within the source), which is
//! the order every later stage uses for canonical choice and output.

use crate::error::StoreError;
use crate::{ALIAS_FIELD, ALIAS_SEPARATOR, Fields, ParsedEntry};
use std::collections::HashSet;
use tracing::debug;

/// One entry as read from a source, tagged with its provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key: String,
    pub entry_type: String,
    /// Fields in source order, without the alias field.
    pub fields: Fields,
    /// Keys listed in the entry's own alias field, if it had one.
    pub aliases: Vec<String>,
    /// Index of the source this record came from.
    pub source_index: usize,
    /// Position of the record within its source.
    pub position: usize,
}

impl RawRecord {
    /// The `(source_index, position)` pair ordering records by first appearance.
    pub fn order(&self) -> (usize, usize) {
        (self.source_index, self.position)
    }
}

/// Collects sources before the store is frozen.
#[derive(Debug, Default)]
pub struct RecordStoreBuilder {
    sources: Vec<String>,
    records: Vec<RawRecord>,
}

impl RecordStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends all entries of one source, in order.
    ///
    /// Returns the index assigned to the source.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DuplicateKey` if a key occurs twice within this
    /// source. The builder is left unchanged in that case.
    pub fn add_source<I>(&mut self, name: impl Into<String>, entries: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = ParsedEntry>,
    {
        let name = name.into();
        let source_index = self.sources.len();
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for (position, entry) in entries.into_iter().enumerate() {
            if !seen.insert(entry.key.clone()) {
                return Err(StoreError::DuplicateKey {
                    key: entry.key,
                    source_name: name,
                });
            }

            let mut fields = entry.fields;
            let aliases = fields
                .remove(ALIAS_FIELD)
                .map(|ids| split_aliases(&ids))
                .unwrap_or_default();

            records.push(RawRecord {
                key: entry.key,
                entry_type: entry.entry_type,
                fields,
                aliases,
                source_index,
                position,
            });
        }

        debug!(source = %name, entries = records.len(), "Added source");
        self.sources.push(name);
        self.records.extend(records);
        Ok(source_index)
    }

    /// Freezes the collected sources.
    #[must_use]
    pub fn build(self) -> RecordStore {
        RecordStore {
            sources: self.sources,
            records: self.records,
        }
    }
}

fn split_aliases(ids: &str) -> Vec<String> {
    let mut aliases: Vec<String> = Vec::new();
    for alias in ids.split(ALIAS_SEPARATOR).map(str::trim) {
        if !alias.is_empty() && !aliases.iter().any(|a| a == alias) {
            aliases.push(alias.to_string());
        }
    }
    aliases
}

/// Read-only, ordered collection of all loaded records.
#[derive(Debug, Clone, Default)]
pub struct RecordStore {
    sources: Vec<String>,
    records: Vec<RawRecord>,
}

impl RecordStore {
    pub fn builder() -> RecordStoreBuilder {
        RecordStoreBuilder::new()
    }

    pub fn get(&self, index: usize) -> Option<&RawRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, RawRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Source names in load order.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Number of entries loaded from each source, in load order.
    pub fn source_summary(&self) -> Vec<(&str, usize)> {
        let mut counts = vec![0; self.sources.len()];
        for record in &self.records {
            counts[record.source_index] += 1;
        }
        self.sources
            .iter()
            .map(String::as_str)
            .zip(counts)
            .collect()
    }
}

impl<'a> IntoIterator for &'a RecordStore {
    type Item = &'a RawRecord;
    type IntoIter = std::slice::Iter<'a, RawRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
