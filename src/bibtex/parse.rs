//! BibTeX parsing implementation.
//!
//! This module handles the low-level parsing of BibTeX text into entries.

use crate::error::ParseError;
use crate::{Fields, ParsedEntry};
use std::collections::HashMap;
use tracing::debug;

/// Parse the content of a BibTeX file, returning its entries in order.
pub(crate) fn bibtex_parse<S: AsRef<str>>(bibtex_text: S) -> Result<Vec<ParsedEntry>, ParseError> {
    let text = strip_comment_lines(bibtex_text.as_ref());
    let mut cursor = Cursor::new(&text);
    let mut macros: HashMap<String, String> = HashMap::new();
    let mut entries = Vec::new();

    while cursor.skip_to('@') {
        cursor.bump();
        let entry_type = cursor.identifier();
        if entry_type.is_empty() {
            return Err(cursor.error("Expected entry type after '@'"));
        }

        cursor.skip_whitespace();
        let close = match cursor.bump() {
            Some('{') => '}',
            Some('(') => ')',
            _ => return Err(cursor.error(format!("Expected '{{' or '(' after @{entry_type}"))),
        };

        match entry_type.to_lowercase().as_str() {
            "comment" => cursor.skip_block(close)?,
            "preamble" => {
                parse_value(&mut cursor, &macros)?;
                cursor.expect(close)?;
            }
            "string" => {
                cursor.skip_whitespace();
                let name = cursor.identifier();
                if name.is_empty() {
                    return Err(cursor.error("Expected @string name"));
                }
                cursor.skip_whitespace();
                cursor.expect('=')?;
                let value = parse_value(&mut cursor, &macros)?;
                cursor.skip_whitespace();
                cursor.expect(close)?;
                macros.insert(name.to_lowercase(), value);
            }
            _ => entries.push(parse_entry(&mut cursor, entry_type, close, &macros)?),
        }
    }

    Ok(entries)
}

/// Blanks lines whose first non-blank character is `%`, keeping line numbers intact.
fn strip_comment_lines(text: &str) -> String {
    text.lines()
        .map(|line| if line.trim_start().starts_with('%') { "" } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_entry(
    cursor: &mut Cursor,
    entry_type: String,
    close: char,
    macros: &HashMap<String, String>,
) -> Result<ParsedEntry, ParseError> {
    cursor.skip_whitespace();
    let key = cursor.take_while(|c| c != ',' && c != close && !c.is_whitespace() && c != '{' && c != '}');
    if key.is_empty() {
        return Err(cursor.error(format!("Missing citation key in @{entry_type}")));
    }

    let mut fields = Fields::new();
    loop {
        cursor.skip_whitespace();
        if cursor.eat(close) {
            break;
        }
        cursor.expect(',')?;
        cursor.skip_whitespace();
        if cursor.eat(close) {
            break;
        }

        let name = cursor.identifier();
        if name.is_empty() {
            return Err(cursor.error(format!("Expected field name in '{key}'")));
        }
        cursor.skip_whitespace();
        cursor.expect('=')?;
        let value = parse_value(cursor, macros)?;

        if fields.contains(&name) {
            debug!(key = %key, field = %name, "Ignoring repeated field");
        } else {
            fields.insert(name, value);
        }
    }

    Ok(ParsedEntry::new(key, entry_type, fields))
}

/// Parses a possibly `#`-concatenated value.
///
/// Braced and quoted parts are kept verbatim, numbers as written, and macro
/// names are expanded when defined and kept literally otherwise.
fn parse_value(cursor: &mut Cursor, macros: &HashMap<String, String>) -> Result<String, ParseError> {
    let mut value = String::new();
    loop {
        cursor.skip_whitespace();
        match cursor.peek() {
            Some('{') => {
                cursor.bump();
                value.push_str(&cursor.delimited('}')?);
            }
            Some('"') => {
                cursor.bump();
                value.push_str(&cursor.delimited('"')?);
            }
            Some(c) if c.is_ascii_digit() => {
                value.push_str(&cursor.take_while(|c| c.is_ascii_digit()));
            }
            Some(c) if is_identifier_char(c) => {
                let name = cursor.identifier();
                match macros.get(&name.to_lowercase()) {
                    Some(expansion) => value.push_str(expansion),
                    None => value.push_str(&name),
                }
            }
            Some(c) => return Err(cursor.error(format!("Unexpected '{c}' in field value"))),
            None => return Err(cursor.error("Unexpected end of input in field value")),
        }

        cursor.skip_whitespace();
        if !cursor.eat('#') {
            return Ok(value);
        }
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | ':' | '.' | '+' | '/' | '\'')
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: usize,
}

impl Cursor {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), ParseError> {
        match self.peek() {
            Some(c) if c == expected => {
                self.bump();
                Ok(())
            }
            Some(c) => Err(self.error(format!("Expected '{expected}', found '{c}'"))),
            None => Err(self.error(format!("Expected '{expected}', found end of input"))),
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::at_line(self.line, message)
    }

    /// Advances to the next `target`. Returns `false` at end of input.
    fn skip_to(&mut self, target: char) -> bool {
        while let Some(c) = self.peek() {
            if c == target {
                return true;
            }
            self.bump();
        }
        false
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn take_while(&mut self, predicate: impl Fn(char) -> bool) -> String {
        let mut taken = String::new();
        while let Some(c) = self.peek().filter(|c| predicate(*c)) {
            taken.push(c);
            self.bump();
        }
        taken
    }

    fn identifier(&mut self) -> String {
        self.take_while(is_identifier_char)
    }

    /// Reads up to the unescaped `close` at brace depth zero and consumes it.
    ///
    /// The opening delimiter must already be consumed. Backslash-escaped
    /// braces do not count towards nesting.
    fn delimited(&mut self, close: char) -> Result<String, ParseError> {
        let start_line = self.line;
        let mut content = String::new();
        let mut depth = 0usize;
        let mut escaped = false;

        loop {
            let Some(c) = self.bump() else {
                return Err(ParseError::at_line(
                    start_line,
                    format!("Unterminated value, expected '{close}'"),
                ));
            };

            if !escaped {
                if c == close && depth == 0 {
                    return Ok(content);
                }
                match c {
                    '{' => depth += 1,
                    '}' => match depth.checked_sub(1) {
                        Some(d) => depth = d,
                        None => return Err(self.error("Unbalanced '}' in value")),
                    },
                    _ => {}
                }
            }

            escaped = c == '\\' && !escaped;
            content.push(c);
        }
    }

    /// Skips the body of a block such as `@comment{...}`, including `close`.
    fn skip_block(&mut self, close: char) -> Result<(), ParseError> {
        self.delimited(close).map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn fields_of(entry: &ParsedEntry) -> Vec<(&str, &str)> {
        entry.fields.iter().collect()
    }

    #[test]
    fn test_parse_simple_entry() {
        let entries = bibtex_parse(
            "@Article{doe2020,\n  Title = {A {Nested} Title},\n  year = 2020,\n  doi = \"10.1/x\",\n}",
        )
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "doe2020");
        assert_eq!(entries[0].entry_type, "Article");
        assert_eq!(
            fields_of(&entries[0]),
            vec![
                ("Title", "A {Nested} Title"),
                ("year", "2020"),
                ("doi", "10.1/x")
            ]
        );
    }

    #[test]
    fn test_parenthesis_delimiters() {
        let entries = bibtex_parse("@misc(key, note = {a (b) c})").unwrap();
        assert_eq!(entries[0].key, "key");
        assert_eq!(entries[0].fields.get("note"), Some("a (b) c"));
    }

    #[test]
    fn test_entry_without_fields() {
        let entries = bibtex_parse("@misc{lonely}").unwrap();
        assert_eq!(entries[0].key, "lonely");
        assert!(entries[0].fields.is_empty());
    }

    #[test]
    fn test_string_macros_and_concatenation() {
        let input = r#"
@String{ acm = "ACM" }
@string(press = {Press})
@book{b, publisher = acm # " " # press, month = jan}
"#;
        let entries = bibtex_parse(input).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].fields.get("publisher"), Some("ACM Press"));
        assert_eq!(entries[0].fields.get("month"), Some("jan"));
    }

    #[test]
    fn test_comments_and_preamble_are_skipped() {
        let input = r#"
Free text between entries is ignored.
@comment{ @article{hidden, title = {no}} }
@preamble{ "\newcommand{\noop}[1]{}" }
% @article{commented, title = {no}}
  % indented comment line
@article{visible, title = {yes}}
"#;
        let entries = bibtex_parse(input).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "visible");
    }

    #[test]
    fn test_escaped_braces() {
        let entries = bibtex_parse(r"@misc{k, note = {open \{ only}}").unwrap();
        assert_eq!(entries[0].fields.get("note"), Some(r"open \{ only"));
    }

    #[test]
    fn test_quoted_value_with_braced_quote() {
        let entries = bibtex_parse(r#"@misc{k, title = "The {"}quoted{"} word"}"#).unwrap();
        assert_eq!(entries[0].fields.get("title"), Some(r#"The {"}quoted{"} word"#));
    }

    #[test]
    fn test_repeated_field_keeps_first() {
        let entries = bibtex_parse("@misc{k, note = {one}, NOTE = {two}}").unwrap();
        assert_eq!(entries[0].fields.get("note"), Some("one"));
        assert_eq!(entries[0].fields.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        assert!(bibtex_parse("").unwrap().is_empty());
        assert!(bibtex_parse("just some text").unwrap().is_empty());
    }

    #[rstest]
    #[case("@article{key, title = {unterminated}", 1)]
    #[case("@article{key,\n title = {a}\n year = 2020}", 3)]
    #[case("@article{, title = {a}}", 1)]
    #[case("@{key, title = {a}}", 1)]
    #[case("@article key", 1)]
    #[case("@article{key,\n\n title {a}}", 3)]
    #[case("@article{key, title = {a}}}@misc{k2, note = }", 1)]
    #[case("@article{key,\n title = {never closed\n\n", 2)]
    fn test_malformed_input(#[case] input: &str, #[case] line: usize) {
        let err = bibtex_parse(input).unwrap_err();
        assert_eq!(err.line, line, "{err}");
    }
}
