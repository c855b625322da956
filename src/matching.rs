//! Duplicate detection over a [`RecordStore`].
//!
//! Records are nodes of a graph with an edge between two records whenever
//! one of the [`MatchCriterion`]s holds. The connected components of that
//! graph form a [`Partition`] of the store into [`EquivalenceClass`]es.
//!
//! ## Strategies
//!
//! - [`MatchStrategy::Indexed`] buckets records by each normalized value and
//!   links every record to the first holder of the same value. Linear in the
//!   number of records.
//! - [`MatchStrategy::Pairwise`] compares every pair of records. Quadratic,
//!   kept as a reference implementation.
//!
//! Both produce the same partition: components do not depend on which edges
//! are discovered, only on which records end up connected.
//!
//! ```
//! use bibmerge::matching::{MatchEngine, MatchStrategy};
//! use bibmerge::{ParsedEntry, RecordStore};
//!
//! let entry = |key: &str, doi: &str| {
//!     ParsedEntry::new(key, "article", [("doi", doi)].into_iter().collect())
//! };
//!
//! let mut builder = RecordStore::builder();
//! builder.add_source("a.bib", vec![entry("a", "10.1/x"), entry("b", "10.1/y")])?;
//! builder.add_source("b.bib", vec![entry("c", "https://doi.org/10.1/X")])?;
//! let store = builder.build();
//!
//! let partition = MatchEngine::new().with_strategy(MatchStrategy::Pairwise).partition(&store);
//! assert_eq!(partition.len(), 2);
//! assert_eq!(partition.classes()[0].members(), &[0, 2]);
//! # Ok::<(), bibmerge::StoreError>(())
//! ```

use crate::normalize::{normalize_author_title, normalize_doi, normalize_isbn};
use crate::store::{RawRecord, RecordStore};
use crate::union_find::DisjointSet;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Reason two records were linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchCriterion {
    /// Same citation key, ignoring case. Keys listed in an entry's alias
    /// field count as its keys too.
    Key,
    Doi,
    Isbn,
    /// Same author list and same title.
    AuthorTitle,
}

impl MatchCriterion {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchCriterion::Key => "key",
            MatchCriterion::Doi => "doi",
            MatchCriterion::Isbn => "isbn",
            MatchCriterion::AuthorTitle => "author/title",
        }
    }
}

impl fmt::Display for MatchCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How match edges are discovered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchStrategy {
    #[default]
    Indexed,
    Pairwise,
}

/// Comparison forms of one record, recomputed for every matching run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedKeySet {
    /// Lowercased key followed by lowercased inherited aliases, without repeats.
    pub key_ids: Vec<String>,
    pub doi_norm: Option<String>,
    pub isbn_norm: Option<String>,
    pub author_title_norm: Option<(String, String)>,
}

impl NormalizedKeySet {
    pub fn from_record(record: &RawRecord) -> Self {
        let mut key_ids: Vec<String> = Vec::with_capacity(1 + record.aliases.len());
        for id in std::iter::once(&record.key).chain(&record.aliases) {
            let id = id.to_lowercase();
            if !key_ids.contains(&id) {
                key_ids.push(id);
            }
        }

        Self {
            key_ids,
            doi_norm: record.fields.get("doi").and_then(normalize_doi),
            isbn_norm: record.fields.get("isbn").and_then(normalize_isbn),
            author_title_norm: normalize_author_title(
                record.fields.get("author"),
                record.fields.get("title"),
            ),
        }
    }

    /// First criterion under which two key sets match, if any.
    ///
    /// `None` values never match, not even each other.
    pub fn matches(&self, other: &Self) -> Option<MatchCriterion> {
        fn both_some<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            a.as_ref().zip(b.as_ref()).is_some_and(|(a, b)| a == b)
        }

        if self.key_ids.iter().any(|id| other.key_ids.contains(id)) {
            Some(MatchCriterion::Key)
        } else if both_some(&self.doi_norm, &other.doi_norm) {
            Some(MatchCriterion::Doi)
        } else if both_some(&self.isbn_norm, &other.isbn_norm) {
            Some(MatchCriterion::Isbn)
        } else if both_some(&self.author_title_norm, &other.author_title_norm) {
            Some(MatchCriterion::AuthorTitle)
        } else {
            None
        }
    }
}

/// Store indices of records that denote the same work.
///
/// Members are ascending, so the first member is the earliest record in
/// ingestion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivalenceClass {
    members: Vec<usize>,
}

impl EquivalenceClass {
    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// Index of the earliest record in the class.
    pub fn first(&self) -> usize {
        self.members[0]
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_singleton(&self) -> bool {
        self.members.len() == 1
    }
}

/// Equivalence classes covering every record of a store exactly once,
/// ordered by their earliest record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    classes: Vec<EquivalenceClass>,
}

impl Partition {
    pub fn classes(&self) -> &[EquivalenceClass] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EquivalenceClass> {
        self.classes.iter()
    }
}

impl From<DisjointSet> for Partition {
    fn from(set: DisjointSet) -> Self {
        Partition {
            classes: set
                .into_sets()
                .into_iter()
                .map(|members| EquivalenceClass { members })
                .collect(),
        }
    }
}

/// Builds the partition of a store into equivalence classes.
#[derive(Debug, Clone, Default)]
pub struct MatchEngine {
    strategy: MatchStrategy,
    run_in_parallel: bool,
}

impl MatchEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: MatchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Normalizes records on the rayon pool. Has no effect without the
    /// `parallel` feature. Unions are always applied on the calling thread.
    #[must_use]
    pub fn in_parallel(mut self, run_in_parallel: bool) -> Self {
        self.run_in_parallel = run_in_parallel;
        self
    }

    /// Computes the equivalence classes of all records in `store`.
    pub fn partition(&self, store: &RecordStore) -> Partition {
        let key_sets = self.key_sets(store);
        let mut set = DisjointSet::new(key_sets.len());

        let mut link = |a: usize, b: usize, criterion: MatchCriterion| {
            if set.union(a, b) {
                debug!(
                    left = %store.records()[a].key,
                    right = %store.records()[b].key,
                    %criterion,
                    "Found match"
                );
            }
        };

        match self.strategy {
            MatchStrategy::Indexed => Self::indexed_edges(&key_sets, &mut link),
            MatchStrategy::Pairwise => Self::pairwise_edges(&key_sets, &mut link),
        }

        set.into()
    }

    fn key_sets(&self, store: &RecordStore) -> Vec<NormalizedKeySet> {
        #[cfg(feature = "parallel")]
        if self.run_in_parallel {
            use rayon::prelude::*;

            return store
                .records()
                .par_iter()
                .map(NormalizedKeySet::from_record)
                .collect();
        }

        store.iter().map(NormalizedKeySet::from_record).collect()
    }

    fn pairwise_edges(
        key_sets: &[NormalizedKeySet],
        link: &mut impl FnMut(usize, usize, MatchCriterion),
    ) {
        for (i, current) in key_sets.iter().enumerate() {
            for (j, other) in key_sets.iter().enumerate().skip(i + 1) {
                if let Some(criterion) = current.matches(other) {
                    link(i, j, criterion);
                }
            }
        }
    }

    fn indexed_edges(
        key_sets: &[NormalizedKeySet],
        link: &mut impl FnMut(usize, usize, MatchCriterion),
    ) {
        let mut by_key: HashMap<&str, usize> = HashMap::new();
        let mut by_doi: HashMap<&str, usize> = HashMap::new();
        let mut by_isbn: HashMap<&str, usize> = HashMap::new();
        let mut by_author_title: HashMap<(&str, &str), usize> = HashMap::new();

        for (index, keys) in key_sets.iter().enumerate() {
            for id in &keys.key_ids {
                bucket(&mut by_key, id.as_str(), index, MatchCriterion::Key, link);
            }
            if let Some(doi) = &keys.doi_norm {
                bucket(&mut by_doi, doi.as_str(), index, MatchCriterion::Doi, link);
            }
            if let Some(isbn) = &keys.isbn_norm {
                bucket(&mut by_isbn, isbn.as_str(), index, MatchCriterion::Isbn, link);
            }
            if let Some((author, title)) = &keys.author_title_norm {
                bucket(
                    &mut by_author_title,
                    (author.as_str(), title.as_str()),
                    index,
                    MatchCriterion::AuthorTitle,
                    link,
                );
            }
        }
    }
}

/// Links `index` to the first record holding `value`, or registers it as
/// that first holder.
fn bucket<K: std::hash::Hash + Eq>(
    buckets: &mut HashMap<K, usize>,
    value: K,
    index: usize,
    criterion: MatchCriterion,
    link: &mut impl FnMut(usize, usize, MatchCriterion),
) {
    let first = *buckets.entry(value).or_insert(index);
    if first != index {
        link(first, index, criterion);
    }
}
