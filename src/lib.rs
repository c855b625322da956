//! Merge several BibTeX databases into one, collapsing duplicate entries.
//!
//! `bibmerge` takes entries from any number of sources, finds the ones that
//! describe the same work under different citation keys, and writes a single
//! database in which every original key still resolves: each group of
//! duplicates becomes one canonical entry whose `ids` field lists the keys it
//! superseded.
//!
//! # Pipeline
//!
//! - [`RecordStore`]: every entry of every source, in first-seen order
//! - [`matching`]: groups entries into equivalence classes
//! - [`resolve`]: builds one [`MergedRecord`] per class
//! - [`serialize`]: renders merged records as BibTeX
//!
//! # Matching Criteria
//!
//! Two entries denote the same work if any of the following hold:
//!
//! 1. Their keys are equal ignoring case (across different sources)
//! 2. Their normalized DOIs are equal
//! 3. Their normalized ISBNs are equal
//! 4. Their normalized author lists and titles are both equal
//!
//! Matches are transitive, so chains of partial matches collapse into one
//! entry. Absent or empty fields never match.
//!
//! # Basic Usage
//!
//! ```rust
//! use bibmerge::{BibTexParser, Merger, RecordParser, RecordStore, serialize};
//!
//! let first = "@article{doe2020, doi = {10.1/X}, title = {T}, author = {Doe, J.}}";
//! let second = "@article{doe20, doi = {10.1/x}, title = {T}, author = {Doe, J.}}";
//!
//! let parser = BibTexParser::new();
//! let mut builder = RecordStore::builder();
//! builder.add_source("paper1.bib", parser.parse(first)?)?;
//! builder.add_source("paper2.bib", parser.parse(second)?)?;
//! let store = builder.build();
//!
//! let outcome = Merger::new().merge(&store);
//! assert_eq!(outcome.records.len(), 1);
//! assert_eq!(outcome.records[0].canonical_key, "doe2020");
//! assert_eq!(outcome.records[0].alias_keys, vec!["doe20"]);
//!
//! let text = serialize::to_string(&outcome.records);
//! assert!(text.contains("ids = {doe20}"));
//! # Ok::<(), bibmerge::MergeError>(())
//! ```
//!
//! # Conflicts
//!
//! When duplicates disagree on a field value or on the entry type, the
//! canonical entry's data is kept and a [`Diagnostic`] is returned next to
//! the merged records. Conflicts never abort a merge.

use serde::ser::{Serialize, SerializeMap, Serializer};

#[cfg(feature = "bibtex")]
pub mod bibtex;
pub mod error;
pub mod matching;
pub mod merge;
pub mod normalize;
pub mod resolve;
pub mod serialize;
pub mod store;
pub mod union_find;

mod regex;

// Reexports
#[cfg(feature = "bibtex")]
pub use bibtex::BibTexParser;
pub use error::{MergeError, ParseError, Result, StoreError};
pub use matching::{EquivalenceClass, MatchCriterion, MatchStrategy, Partition};
pub use merge::{MergeOutcome, Merger, MergerConfig};
pub use resolve::{ConflictPolicy, Diagnostic, DiagnosticKind, MergedRecord};
pub use store::{RawRecord, RecordStore, RecordStoreBuilder};

/// Name of the field listing the keys a merged entry supersedes.
pub const ALIAS_FIELD: &str = "ids";

/// Separator between keys in the alias field.
pub const ALIAS_SEPARATOR: &str = ",";

/// Ordered field map of an entry.
///
/// Insertion order is kept so that untouched entries serialize with their
/// fields in the order they were read. Names are compared ASCII
/// case-insensitively; the first spelling seen is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    /// Creates an empty field map.
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Get a field value by name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.0[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Sets a field, replacing the value in place if the name already exists.
    ///
    /// Returns the previous value, if any.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => Some(std::mem::replace(&mut self.0[i].1, value)),
            None => {
                self.0.push((name, value));
                None
            }
        }
    }

    /// Removes a field, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.0.remove(i).1)
    }

    /// Iterates over `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (name, value) in iter {
            fields.insert(name, value);
        }
        fields
    }
}

impl Serialize for Fields {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// One entry as produced by a parser, before it is assigned to a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEntry {
    /// Citation key
    pub key: String,
    /// Entry type tag, e.g. `article`
    pub entry_type: String,
    pub fields: Fields,
}

impl ParsedEntry {
    pub fn new(key: impl Into<String>, entry_type: impl Into<String>, fields: Fields) -> Self {
        Self {
            key: key.into(),
            entry_type: entry_type.into(),
            fields,
        }
    }
}

/// Trait for implementing record-format parsers.
pub trait RecordParser {
    /// Parse a string containing one or more entries.
    ///
    /// # Arguments
    ///
    /// * `input` - The full text of one source
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the input is malformed
    fn parse(&self, input: &str) -> std::result::Result<Vec<ParsedEntry>, ParseError>;
}
