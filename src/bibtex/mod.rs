//! BibTeX parser implementation.
//!
//! Reads `.bib` text into [`ParsedEntry`] values, ready to be loaded into a
//! [`RecordStore`](crate::RecordStore).
//!
//! # Supported Syntax
//!
//! - Entries delimited by `{...}` or `(...)`
//! - Braced, quoted and numeric values, `#` concatenation
//! - `@string` macros, expanded where they are used
//! - `@comment` and `@preamble` blocks, which are skipped
//! - Lines starting with `%`, which are ignored
//!
//! # Example
//!
//! ```
//! use bibmerge::{BibTexParser, RecordParser};
//!
//! let input = r#"@article{doe2020,
//!   title = {Example Title},
//!   author = "Doe, J."
//! }"#;
//!
//! let parser = BibTexParser::new();
//! let entries = parser.parse(input).unwrap();
//! assert_eq!(entries[0].key, "doe2020");
//! assert_eq!(entries[0].fields.get("title"), Some("Example Title"));
//! ```

mod parse;

use crate::error::ParseError;
use crate::{ParsedEntry, RecordParser};
use parse::bibtex_parse;

/// Parser for BibTeX formatted databases.
#[derive(Debug, Clone, Default)]
pub struct BibTexParser;

impl BibTexParser {
    /// Creates a new BibTeX parser instance.
    ///
    /// # Examples
    ///
    /// ```
    /// use bibmerge::BibTexParser;
    /// let parser = BibTexParser::new();
    /// ```
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RecordParser for BibTexParser {
    /// Parses a string containing one or more BibTeX entries.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` with the offending line if the input is malformed.
    fn parse(&self, input: &str) -> Result<Vec<ParsedEntry>, ParseError> {
        bibtex_parse(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize;
    use crate::{MergedRecord, RecordStore};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_multiple_entries() {
        let input = r#"
@article{first, title = {One}}

@inproceedings{second,
  title = "Two",
  booktitle = {Proc.}
}
"#;
        let entries = BibTexParser::new().parse(input).unwrap();
        assert_eq!(
            entries.iter().map(|e| e.key.as_str()).collect::<Vec<_>>(),
            vec!["first", "second"]
        );
        assert_eq!(entries[1].entry_type, "inproceedings");
    }

    #[test]
    fn test_parse_error_reports_line() {
        let err = BibTexParser::new()
            .parse("@article{a, title = {ok}}\n\n@article{b, title = }")
            .unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn test_serialized_output_parses_back() {
        let record = MergedRecord {
            canonical_key: "k".to_string(),
            entry_type: "book".to_string(),
            fields: [
                ("title", "The {\\TeX}book"),
                ("note", "open { only"),
                ("abstract", "Line one,\n  line two"),
            ]
            .into_iter()
            .collect(),
            alias_keys: vec!["a".to_string(), "b".to_string()],
        };
        let text = serialize::to_string(std::slice::from_ref(&record));

        let mut builder = RecordStore::builder();
        builder
            .add_source("out.bib", BibTexParser::new().parse(&text).unwrap())
            .unwrap();
        let store = builder.build();
        let parsed = store.get(0).unwrap();

        assert_eq!(parsed.key, "k");
        assert_eq!(parsed.aliases, vec!["a", "b"]);
        assert_eq!(parsed.fields.get("title"), Some("The {\\TeX}book"));
        assert_eq!(parsed.fields.get("note"), Some("open \\{ only"));
        assert_eq!(parsed.fields.get("abstract"), Some("Line one,\n  line two"));
    }
}
