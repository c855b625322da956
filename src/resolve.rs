//! Turns each equivalence class into one merged record.
//!
//! # Resolution Rules
//!
//! - The earliest record of a class (lowest source index, then lowest
//!   position) is canonical. Its key and entry type are kept.
//! - Fields missing from the canonical record are taken from the first
//!   other member that has them.
//! - Fields present with different values are settled by the
//!   [`ConflictPolicy`] and reported as a [`Diagnostic`].
//! - `author` and `title` are resolved as a pair: once one of them is kept,
//!   the other only comes from members agreeing on it, otherwise it is
//!   dropped and reported. A merged record never holds an author/title
//!   combination that no member had.
//! - All other keys of the class become aliases, in first-seen order.

use crate::matching::{EquivalenceClass, Partition};
use crate::normalize::{collapse_whitespace, normalize_authors, normalize_text};
use crate::store::{RawRecord, RecordStore};
use crate::Fields;
use itertools::Itertools;
use serde::Serialize;
use std::fmt;
use tracing::info;

/// How a field value is chosen when members of a class disagree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// The value of the earliest member holding the field wins.
    #[default]
    FirstSeen,
    /// The longest value wins; ties go to the earliest member.
    Longest,
}

/// One output entry standing for a whole equivalence class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedRecord {
    pub canonical_key: String,
    pub entry_type: String,
    /// Resolved fields, without the alias field.
    pub fields: Fields,
    /// Superseded keys in first-seen order, followed by aliases inherited
    /// from the members' own alias fields. Never contains `canonical_key`.
    pub alias_keys: Vec<String>,
}

/// Kind of a non-fatal merge finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    EntryTypeMismatch,
    FieldConflict,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagnosticKind::EntryTypeMismatch => f.write_str("entry type mismatch"),
            DiagnosticKind::FieldConflict => f.write_str("field conflict"),
        }
    }
}

/// A disagreement found within a class and settled without failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    /// Index of the class, which is also the index of its merged record.
    pub class_id: usize,
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}: {}: {}", self.class_id, self.kind, self.detail)
    }
}

/// Fields that together form the author/title match key. Taken from
/// different members they could form a pair that no input record had, so
/// the second one is only taken from members agreeing on the first.
const PAIRED_FIELDS: [&str; 2] = ["author", "title"];

type Candidate<'a> = (&'a RawRecord, &'a str);

/// Kept value of the leading field of the author/title pair.
struct PairAnchor {
    lead: &'static str,
    follower: &'static str,
    normalized: String,
}

impl PairAnchor {
    fn agrees_with(&self, member: &RawRecord) -> bool {
        member
            .fields
            .get(self.lead)
            .and_then(|value| normalize_paired(self.lead, value))
            .is_some_and(|normalized| normalized == self.normalized)
    }
}

fn normalize_paired(name: &str, value: &str) -> Option<String> {
    if name == PAIRED_FIELDS[0] {
        normalize_authors(value)
    } else {
        normalize_text(value)
    }
}

/// Builds merged records from a partition.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    policy: ConflictPolicy,
}

impl Resolver {
    #[must_use]
    pub fn new(policy: ConflictPolicy) -> Self {
        Self { policy }
    }

    /// Resolves every class of `partition`, in partition order.
    ///
    /// Returns the merged records and all diagnostics raised along the way.
    pub fn resolve(
        &self,
        store: &RecordStore,
        partition: &Partition,
    ) -> (Vec<MergedRecord>, Vec<Diagnostic>) {
        let mut records = Vec::with_capacity(partition.len());
        let mut diagnostics = Vec::new();

        for (class_id, class) in partition.iter().enumerate() {
            let members = Self::members(store, class);
            let record = self.resolve_class(class_id, &members, &mut diagnostics);
            if !class.is_singleton() {
                info!(
                    canonical = %record.canonical_key,
                    aliases = record.alias_keys.len(),
                    "Merged duplicates"
                );
            }
            records.push(record);
        }

        (records, diagnostics)
    }

    fn members<'a>(store: &'a RecordStore, class: &EquivalenceClass) -> Vec<&'a RawRecord> {
        let records = store.records();
        let mut members: Vec<&RawRecord> = class.members().iter().map(|&i| &records[i]).collect();
        members.sort_by_key(|record| record.order());
        members
    }

    /// `members` must be non-empty and in first-seen order.
    fn resolve_class(
        &self,
        class_id: usize,
        members: &[&RawRecord],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> MergedRecord {
        let canonical = members[0];

        for other in &members[1..] {
            if !other.entry_type.eq_ignore_ascii_case(&canonical.entry_type) {
                diagnostics.push(Diagnostic {
                    class_id,
                    kind: DiagnosticKind::EntryTypeMismatch,
                    detail: format!(
                        "kept @{} of '{}', '{}' is @{}",
                        canonical.entry_type, canonical.key, other.key, other.entry_type
                    ),
                });
            }
        }

        MergedRecord {
            canonical_key: canonical.key.clone(),
            entry_type: canonical.entry_type.clone(),
            fields: self.union_fields(class_id, members, diagnostics),
            alias_keys: Self::alias_keys(members),
        }
    }

    fn union_fields(
        &self,
        class_id: usize,
        members: &[&RawRecord],
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Fields {
        let mut names: Vec<&str> = Vec::new();
        for (name, _) in members.iter().flat_map(|m| m.fields.iter()) {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(name)) {
                names.push(name);
            }
        }

        let anchor = self.pair_anchor(members);

        let mut fields = Fields::new();
        for name in names {
            let candidates = Self::candidates(members, name);
            let eligible: Vec<Candidate<'_>> = match &anchor {
                Some(anchor) if anchor.follower.eq_ignore_ascii_case(name) => candidates
                    .iter()
                    .copied()
                    .filter(|(member, _)| anchor.agrees_with(member))
                    .collect(),
                _ => candidates.clone(),
            };

            if eligible.is_empty() {
                // Only reachable for the follower of an anchored pair.
                let dropped: Vec<String> = candidates
                    .iter()
                    .map(|(member, value)| format!("{{{value}}} from '{}'", member.key))
                    .collect();
                diagnostics.push(Diagnostic {
                    class_id,
                    kind: DiagnosticKind::FieldConflict,
                    detail: format!(
                        "field '{name}': dropped {}, none pairs with the kept {}",
                        dropped.join(", "),
                        anchor.as_ref().map_or("value", |a| a.lead)
                    ),
                });
                continue;
            }

            let (kept_member, kept_value) = self.pick(&eligible);
            let kept = collapse_whitespace(kept_value);
            let discarded: Vec<String> = candidates
                .iter()
                .filter(|(_, value)| collapse_whitespace(value) != kept)
                .map(|(member, value)| format!("{{{value}}} from '{}'", member.key))
                .collect();

            if !discarded.is_empty() {
                diagnostics.push(Diagnostic {
                    class_id,
                    kind: DiagnosticKind::FieldConflict,
                    detail: format!(
                        "field '{name}': kept {{{kept_value}}} from '{}', discarded {}",
                        kept_member.key,
                        discarded.join(", ")
                    ),
                });
            }

            fields.insert(name, kept_value);
        }

        fields
    }

    /// Values of field `name` across `members`, in first-seen order.
    fn candidates<'a>(members: &[&'a RawRecord], name: &str) -> Vec<Candidate<'a>> {
        members
            .iter()
            .copied()
            .filter_map(|m| m.fields.get(name).map(|value| (m, value)))
            .collect()
    }

    /// Settles the lead field of the author/title pair.
    ///
    /// The lead is whichever of the two the earliest member holding either
    /// one has, author first. Returns `None` when the kept lead value has no
    /// normalized form, since no pair can then be formed.
    fn pair_anchor(&self, members: &[&RawRecord]) -> Option<PairAnchor> {
        let first = members
            .iter()
            .find(|m| PAIRED_FIELDS.iter().any(|name| m.fields.contains(name)))?;
        let (lead, follower) = if first.fields.contains(PAIRED_FIELDS[0]) {
            (PAIRED_FIELDS[0], PAIRED_FIELDS[1])
        } else {
            (PAIRED_FIELDS[1], PAIRED_FIELDS[0])
        };

        let (_, value) = self.pick(&Self::candidates(members, lead));
        let normalized = normalize_paired(lead, value)?;
        Some(PairAnchor {
            lead,
            follower,
            normalized,
        })
    }

    /// `candidates` are in first-seen order, never empty.
    fn pick<'a>(&self, candidates: &[Candidate<'a>]) -> Candidate<'a> {
        match self.policy {
            ConflictPolicy::FirstSeen => candidates[0],
            ConflictPolicy::Longest => candidates
                .iter()
                .copied()
                .rev()
                .max_by_key(|(_, value)| value.trim().chars().count())
                .unwrap_or(candidates[0]),
        }
    }

    fn alias_keys(members: &[&RawRecord]) -> Vec<String> {
        let canonical_key = members[0].key.as_str();
        let superseded = members[1..].iter().map(|m| m.key.as_str());
        let inherited = members.iter().flat_map(|m| m.aliases.iter().map(String::as_str));

        superseded
            .chain(inherited)
            .filter(|key| *key != canonical_key)
            .unique()
            .map(String::from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchEngine;
    use crate::ParsedEntry;
    use pretty_assertions::assert_eq;

    fn entry(key: &str, entry_type: &str, fields: &[(&str, &str)]) -> ParsedEntry {
        ParsedEntry::new(key, entry_type, fields.iter().copied().collect())
    }

    fn resolve(
        sources: Vec<Vec<ParsedEntry>>,
        policy: ConflictPolicy,
    ) -> (Vec<MergedRecord>, Vec<Diagnostic>) {
        let mut builder = RecordStore::builder();
        for (i, entries) in sources.into_iter().enumerate() {
            builder.add_source(format!("source{i}.bib"), entries).unwrap();
        }
        let store = builder.build();
        let partition = MatchEngine::new().partition(&store);
        Resolver::new(policy).resolve(&store, &partition)
    }

    #[test]
    fn test_canonical_is_first_seen() {
        let (records, diagnostics) = resolve(
            vec![
                vec![entry("doe2020", "article", &[("doi", "10.1/X"), ("title", "T")])],
                vec![entry("doe20", "article", &[("doi", "10.1/x"), ("title", "T")])],
            ],
            ConflictPolicy::FirstSeen,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].canonical_key, "doe2020");
        assert_eq!(records[0].alias_keys, vec!["doe20"]);
        // Raw DOIs differ only in case, which is a real textual conflict.
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].kind, DiagnosticKind::FieldConflict);
        assert_eq!(records[0].fields.get("doi"), Some("10.1/X"));
    }

    #[test]
    fn test_field_union_adds_missing_fields() {
        let (records, diagnostics) = resolve(
            vec![
                vec![entry("a", "article", &[("doi", "10.1/x"), ("title", "T")])],
                vec![entry(
                    "b",
                    "article",
                    &[("DOI", "10.1/x"), ("year", "2020"), ("Title", "T")],
                )],
            ],
            ConflictPolicy::FirstSeen,
        );

        assert!(diagnostics.is_empty());
        assert_eq!(
            records[0].fields.iter().collect::<Vec<_>>(),
            vec![("doi", "10.1/x"), ("title", "T"), ("year", "2020")]
        );
    }

    #[test]
    fn test_whitespace_differences_are_not_conflicts() {
        let (_, diagnostics) = resolve(
            vec![
                vec![entry("a", "article", &[("doi", "10.1/x"), ("title", "A  long\n title")])],
                vec![entry("b", "article", &[("doi", "10.1/x"), ("title", "A long title")])],
            ],
            ConflictPolicy::FirstSeen,
        );
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn test_conflict_keeps_canonical_and_reports() {
        let (records, diagnostics) = resolve(
            vec![
                vec![entry("smith2019", "article", &[("title", "First")])],
                vec![entry("smith2019", "inproceedings", &[("title", "Second, longer")])],
            ],
            ConflictPolicy::FirstSeen,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields.get("title"), Some("First"));
        assert_eq!(records[0].entry_type, "article");
        // Identical keys collapse to no alias at all.
        assert!(records[0].alias_keys.is_empty());
        assert_eq!(
            diagnostics,
            vec![
                Diagnostic {
                    class_id: 0,
                    kind: DiagnosticKind::EntryTypeMismatch,
                    detail: "kept @article of 'smith2019', 'smith2019' is @inproceedings"
                        .to_string(),
                },
                Diagnostic {
                    class_id: 0,
                    kind: DiagnosticKind::FieldConflict,
                    detail: "field 'title': kept {First} from 'smith2019', discarded {Second, longer} from 'smith2019'"
                        .to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_longest_policy() {
        let (records, diagnostics) = resolve(
            vec![
                vec![entry("a", "article", &[("doi", "10.1/x"), ("title", "Short")])],
                vec![entry("b", "article", &[("doi", "10.1/x"), ("title", "Much longer")])],
                vec![entry("c", "article", &[("doi", "10.1/x"), ("title", "Much better")])],
            ],
            ConflictPolicy::Longest,
        );

        assert_eq!(records[0].canonical_key, "a");
        assert_eq!(records[0].fields.get("title"), Some("Much longer"));
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].detail.contains("kept {Much longer} from 'b'"));
    }

    #[test]
    fn test_title_not_borrowed_across_authors() {
        let (records, diagnostics) = resolve(
            vec![vec![
                entry("a", "article", &[("author", "Doe, J."), ("isbn", "0306406152")]),
                entry(
                    "b",
                    "article",
                    &[("author", "Roe, A."), ("title", "Shared"), ("isbn", "0-306-40615-2")],
                ),
                entry("c", "article", &[("author", "Doe, J."), ("title", "Shared")]),
            ]],
            ConflictPolicy::FirstSeen,
        );

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].alias_keys, vec!["b"]);
        assert_eq!(
            records[0].fields.iter().collect::<Vec<_>>(),
            vec![("author", "Doe, J."), ("isbn", "0306406152")]
        );
        assert_eq!(
            diagnostics
                .iter()
                .map(|d| d.detail.as_str())
                .collect::<Vec<_>>(),
            vec![
                "field 'author': kept {Doe, J.} from 'a', discarded {Roe, A.} from 'b'",
                "field 'isbn': kept {0306406152} from 'a', discarded {0-306-40615-2} from 'b'",
                "field 'title': dropped {Shared} from 'b', none pairs with the kept author",
            ]
        );
    }

    #[test]
    fn test_author_follows_kept_title() {
        let (records, diagnostics) = resolve(
            vec![
                vec![entry("a", "article", &[("doi", "10.1/x"), ("title", "Shared")])],
                vec![entry(
                    "b",
                    "article",
                    &[("doi", "10.1/x"), ("author", "Doe, J."), ("title", "Other")],
                )],
                vec![entry(
                    "c",
                    "article",
                    &[("doi", "10.1/x"), ("author", "Roe, A."), ("title", "{Shared}")],
                )],
            ],
            ConflictPolicy::FirstSeen,
        );

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fields.get("title"), Some("Shared"));
        assert_eq!(records[0].fields.get("author"), Some("Roe, A."));
        assert!(
            diagnostics
                .iter()
                .any(|d| d.detail == "field 'author': kept {Roe, A.} from 'c', discarded {Doe, J.} from 'b'")
        );
    }

    #[test]
    fn test_case_distinct_keys_become_aliases() {
        let (records, _) = resolve(
            vec![
                vec![entry("Smith2019", "article", &[])],
                vec![entry("smith2019", "article", &[])],
                vec![entry("smith2019", "article", &[])],
            ],
            ConflictPolicy::FirstSeen,
        );
        assert_eq!(records[0].alias_keys, vec!["smith2019"]);
    }

    #[test]
    fn test_inherited_aliases_follow_superseded_keys() {
        let (records, _) = resolve(
            vec![
                vec![entry("k", "article", &[("doi", "10.1/x"), ("ids", "old1,k")])],
                vec![entry("m", "article", &[("doi", "10.1/x"), ("ids", "old2, old1")])],
            ],
            ConflictPolicy::FirstSeen,
        );
        assert_eq!(records[0].alias_keys, vec!["m", "old1", "old2"]);
        assert!(!records[0].fields.contains("ids"));
    }

    #[test]
    fn test_singletons_pass_through() {
        let (records, diagnostics) = resolve(
            vec![vec![
                entry("a", "article", &[("title", "A")]),
                entry("b", "book", &[("title", "B")]),
            ]],
            ConflictPolicy::FirstSeen,
        );
        assert!(diagnostics.is_empty());
        assert_eq!(
            records
                .iter()
                .map(|r| (r.canonical_key.as_str(), r.alias_keys.len()))
                .collect::<Vec<_>>(),
            vec![("a", 0), ("b", 0)]
        );
    }
}
