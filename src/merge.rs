//! The merge pipeline: match, then resolve.
//!
//! ```rust
//! use bibmerge::{ConflictPolicy, MatchStrategy, Merger, MergerConfig, RecordStore};
//!
//! let config = MergerConfig {
//!     strategy: MatchStrategy::Indexed,
//!     run_in_parallel: true,
//!     conflict_policy: ConflictPolicy::FirstSeen,
//! };
//!
//! let outcome = Merger::new().with_config(config).merge(&RecordStore::default());
//! assert!(outcome.records.is_empty());
//! ```

use crate::matching::{MatchEngine, MatchStrategy};
use crate::resolve::{ConflictPolicy, Diagnostic, MergedRecord, Resolver};
use crate::store::RecordStore;
use serde::Serialize;
use tracing::debug;

/// Configuration options for a merge run.
///
/// # Notes
///
/// - `run_in_parallel` only affects normalization, and only when the
///   `parallel` feature is enabled. Results are identical either way.
/// - Both strategies produce the same partition; `Pairwise` is quadratic.
#[derive(Debug, Default, Clone)]
pub struct MergerConfig {
    pub strategy: MatchStrategy,
    pub run_in_parallel: bool,
    pub conflict_policy: ConflictPolicy,
}

/// Merged records in output order, plus the findings raised while merging.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub records: Vec<MergedRecord>,
    pub diagnostics: Vec<Diagnostic>,
}

impl MergeOutcome {
    /// Number of alias keys across all merged records.
    pub fn collapsed(&self) -> usize {
        self.records.iter().map(|r| r.alias_keys.len()).sum()
    }
}

/// Runs the match and resolve stages over a record store.
#[derive(Debug, Default, Clone)]
pub struct Merger {
    config: MergerConfig,
}

impl Merger {
    /// Creates a merger with indexed matching, sequential normalization and
    /// first-seen conflict resolution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: MergerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &MergerConfig {
        &self.config
    }

    /// Merges every record of `store`.
    ///
    /// Records come out ordered by their canonical entry's first appearance,
    /// so the result is a pure function of the store's contents and order.
    pub fn merge(&self, store: &RecordStore) -> MergeOutcome {
        let partition = MatchEngine::new()
            .with_strategy(self.config.strategy)
            .in_parallel(self.config.run_in_parallel)
            .partition(store);
        debug!(
            records = store.len(),
            classes = partition.len(),
            "Partitioned records"
        );

        let (records, diagnostics) =
            Resolver::new(self.config.conflict_policy).resolve(store, &partition);

        MergeOutcome {
            records,
            diagnostics,
        }
    }
}
