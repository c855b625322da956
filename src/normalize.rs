//! Canonical comparison forms for the fields used in duplicate matching.
//!
//! Every function here is pure and total: input that cannot be normalized
//! yields `None`, never an error. Normalized values are only ever compared,
//! they are never written back into a record.

use crate::regex::Regex;
use std::sync::LazyLock;

static DOI_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"10\.[^/\s]+/\S+").expect("valid DOI pattern"));

static AUTHOR_SEPARATOR_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+and\s+").expect("valid separator pattern"));

/// Delimiter placed between authors in a normalized author list.
const AUTHOR_DELIMITER: &str = ";";

/// Normalizes a DOI by removing resolver prefixes, whitespace and case.
///
/// # Arguments
///
/// * `raw` - The DOI field as written in the source
///
/// # Examples
///
/// ```
/// use bibmerge::normalize::normalize_doi;
///
/// assert_eq!(normalize_doi("https://doi.org/10.1000/ABC"), Some("10.1000/abc".to_string()));
/// assert_eq!(normalize_doi("  "), None);
/// ```
pub fn normalize_doi(raw: &str) -> Option<String> {
    let doi = raw
        .replace(|c: char| c.is_whitespace() || c == '{' || c == '}', "")
        .to_lowercase();
    if doi.is_empty() {
        return None;
    }

    // Anything before the "10." directory indicator is a prefix
    // (resolver URL, "doi:" label and the like).
    DOI_REGEX.find(&doi).map(|m| m.as_str().to_string())
}

/// Normalizes an ISBN to its bare digits, keeping ISBN-10 and ISBN-13 distinct.
///
/// Hyphens and spaces are stripped and a trailing check letter is uppercased.
/// Returns `None` unless the result is 13 digits, or 9 digits followed by a
/// digit or `X`.
pub fn normalize_isbn(raw: &str) -> Option<String> {
    let isbn: String = raw
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();

    if !isbn.is_ascii() {
        return None;
    }

    let valid = match isbn.len() {
        13 => isbn.chars().all(|c| c.is_ascii_digit()),
        10 => {
            let (body, check) = isbn.split_at(9);
            body.chars().all(|c| c.is_ascii_digit())
                && check.chars().all(|c| c.is_ascii_digit() || c == 'X')
        }
        _ => false,
    };

    valid.then_some(isbn)
}

/// Normalizes an author list and a title into a comparable pair.
///
/// Author order is preserved: `"Doe, J. and Roe, A."` and
/// `"Roe, A. and Doe, J."` normalize differently.
///
/// Returns `None` if either field is absent or empty once normalized.
pub fn normalize_author_title(
    author_raw: Option<&str>,
    title_raw: Option<&str>,
) -> Option<(String, String)> {
    let authors = normalize_authors(author_raw?)?;
    let title = normalize_text(title_raw?)?;
    Some((authors, title))
}

pub(crate) fn normalize_authors(raw: &str) -> Option<String> {
    let lowered = raw.to_lowercase();
    let authors: Vec<String> = AUTHOR_SEPARATOR_REGEX
        .split(&lowered)
        .filter_map(normalize_text)
        .collect();

    if authors.is_empty() {
        None
    } else {
        Some(authors.join(AUTHOR_DELIMITER))
    }
}

/// Lowercases, drops TeX grouping braces, turns punctuation into spaces and
/// collapses whitespace runs.
pub(crate) fn normalize_text(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| *c != '{' && *c != '}')
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .to_lowercase();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Collapses whitespace runs and trims, for deciding whether two raw field
/// values actually disagree.
pub(crate) fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
