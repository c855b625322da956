//! Renders merged records as BibTeX.
//!
//! Every value is written brace-delimited, one field per line, with the
//! alias field last:
//!
//! ```text
//! @article{doe2020,
//!   doi = {10.1/X},
//!   title = {T},
//!   ids = {doe20},
//! }
//! ```
//!
//! Entries are separated by a blank line and the output ends with a newline.
//! The rendering is a pure function of the records, so equal inputs give
//! byte-identical output.

use crate::resolve::MergedRecord;
use crate::{ALIAS_FIELD, ALIAS_SEPARATOR};
use std::io::Write;

const INDENT: &str = "  ";

/// Format merged records to a single BibTeX string.
pub fn to_string(records: &[MergedRecord]) -> String {
    records
        .iter()
        .map(format_record)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Writes merged records as BibTeX to `writer`.
///
/// # Errors
///
/// Returns `MergeError::Io` if writing fails.
pub fn to_writer<W: Write>(records: &[MergedRecord], mut writer: W) -> crate::Result<()> {
    writer.write_all(to_string(records).as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Format a single merged record.
pub fn format_record(record: &MergedRecord) -> String {
    let mut result = String::new();

    result.push('@');
    result.push_str(&record.entry_type);
    result.push('{');
    result.push_str(&record.canonical_key);
    result.push_str(",\n");

    for (name, value) in record.fields.iter() {
        push_field(&mut result, name, value);
    }

    if !record.alias_keys.is_empty() {
        let ids = record.alias_keys.join(ALIAS_SEPARATOR);
        push_field(&mut result, ALIAS_FIELD, &ids);
    }

    result.push_str("}\n");
    result
}

fn push_field(result: &mut String, name: &str, value: &str) {
    result.push_str(INDENT);
    result.push_str(name);
    result.push_str(" = {");
    result.push_str(&escape_value(value));
    result.push_str("},\n");
}

/// Returns `value` unchanged if its braces are balanced, which holds for
/// everything read by the parser. Otherwise every unescaped brace is
/// backslash-escaped so the delimiting braces stay intact.
///
/// Balance follows this crate's parser, where `\{` and `\}` do not count
/// towards nesting. Classic BibTeX counts them, so a value escaped here can
/// still read as unbalanced to `bibtex` itself.
pub fn escape_value(value: &str) -> std::borrow::Cow<'_, str> {
    if is_balanced(value) {
        return value.into();
    }

    let mut result = String::with_capacity(value.len() + 4);
    let mut escaped = false;
    for c in value.chars() {
        if (c == '{' || c == '}') && !escaped {
            result.push('\\');
        }
        escaped = c == '\\' && !escaped;
        result.push(c);
    }
    result.into()
}

fn is_balanced(value: &str) -> bool {
    let mut depth = 0usize;
    let mut escaped = false;
    for c in value.chars() {
        match c {
            _ if escaped => {}
            '{' => depth += 1,
            '}' => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            _ => {}
        }
        escaped = c == '\\' && !escaped;
    }
    depth == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Fields;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn record(key: &str, fields: &[(&str, &str)], aliases: &[&str]) -> MergedRecord {
        MergedRecord {
            canonical_key: key.to_string(),
            entry_type: "article".to_string(),
            fields: fields.iter().copied().collect::<Fields>(),
            alias_keys: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }

    #[test]
    fn test_format_with_aliases_last() {
        let text = format_record(&record(
            "doe2020",
            &[("title", "T"), ("year", "2020")],
            &["doe20", "DoeJ"],
        ));
        assert_eq!(
            text,
            "@article{doe2020,\n  title = {T},\n  year = {2020},\n  ids = {doe20,DoeJ},\n}\n"
        );
    }

    #[test]
    fn test_singleton_has_no_alias_field() {
        let text = format_record(&record("a", &[("title", "T")], &[]));
        assert!(!text.contains(ALIAS_FIELD));
    }

    #[test]
    fn test_entries_separated_by_blank_line() {
        let text = to_string(&[record("a", &[], &[]), record("b", &[], &[])]);
        assert_eq!(text, "@article{a,\n}\n\n@article{b,\n}\n");
    }

    #[test]
    fn test_to_writer() {
        let mut buffer = Vec::new();
        to_writer(&[record("a", &[("note", "x")], &[])], &mut buffer).unwrap();
        assert_eq!(String::from_utf8(buffer).unwrap(), "@article{a,\n  note = {x},\n}\n");
    }

    #[rstest]
    #[case("plain", "plain")]
    #[case("{Nested {braces}}", "{Nested {braces}}")]
    #[case(r"a \} b", r"a \} b")]
    #[case("open { only", r"open \{ only")]
    #[case("} first {", r"\} first \{")]
    #[case(r"mixed \{ and }", r"mixed \{ and \}")]
    fn test_escape_value(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(escape_value(input), expected);
    }
}
