//! Screen scraping helpers for device output.
//!
//! All helpers work line by line and return the first match. Regex
//! patterns are matched against the start of each line.

use indexmap::IndexMap;
use regex::Regex;

use crate::error::{ConfigError, Result};

/// Value of the first `key<delimiter>value` row whose key equals `key`.
///
/// ```
/// use netcommand::model::parsers::vertical_value;
///
/// let output = "  uptime: 3d\n  version: 7.13.2 (stable)\n";
/// assert_eq!(vertical_value(output, "version", ":").as_deref(), Some("7.13.2 (stable)"));
/// ```
pub fn vertical_value(data: &str, key: &str, delimiter: &str) -> Option<String> {
    data.lines()
        .filter_map(|row| row.split_once(delimiter))
        .find(|(name, _)| name.trim() == key)
        .map(|(_, value)| value.trim().to_string())
}

fn anchored(pattern: &str) -> Result<Regex> {
    let regex = Regex::new(&format!("^(?:{})", pattern)).map_err(ConfigError::InvalidPattern)?;
    Ok(regex)
}

/// First capture group of the first row matching `pattern`.
pub fn regex_value(data: &str, pattern: &str) -> Result<Option<String>> {
    let regex = anchored(pattern)?;
    Ok(data
        .lines()
        .find_map(|row| regex.captures(row))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string()))
}

/// All capture groups of the first row matching `pattern`.
///
/// Groups that did not participate in the match are empty strings.
pub fn match_pattern(data: &str, pattern: &str) -> Result<Option<Vec<String>>> {
    let regex = anchored(pattern)?;
    Ok(data.lines().find_map(|row| regex.captures(row)).map(|caps| {
        caps.iter()
            .skip(1)
            .map(|group| group.map(|m| m.as_str().to_string()).unwrap_or_default())
            .collect()
    }))
}

/// First row containing `text`.
pub fn match_text<'a>(data: &'a str, text: &str) -> Option<&'a str> {
    data.lines().find(|row| row.contains(text))
}

/// Parse a table whose columns are separated by `delimiter` plus any
/// surrounding whitespace.
///
/// Rows before the one whose cells equal `header` are ignored, as are the
/// `skip_after_header` rows right after it (usually a `----` ruler) and blank
/// rows. Each remaining row maps header names to cells; surplus cells are
/// dropped and missing cells are absent from the map.
pub fn tabular(
    data: &str,
    header: &[&str],
    delimiter: &str,
    mut skip_after_header: usize,
) -> Result<Vec<IndexMap<String, String>>> {
    let split = Regex::new(&format!(r"\s*{}\s*", regex::escape(delimiter)))
        .map_err(ConfigError::InvalidPattern)?;

    let mut header_found = false;
    let mut table = Vec::new();

    for row in data.lines() {
        let row = row.trim();
        let cells: Vec<&str> = split.split(row).collect();

        if !header_found {
            header_found = cells == header;
            continue;
        }
        if skip_after_header > 0 {
            skip_after_header -= 1;
            continue;
        }
        if row.is_empty() {
            continue;
        }

        table.push(
            header
                .iter()
                .zip(cells)
                .map(|(name, cell)| (name.to_string(), cell.to_string()))
                .collect(),
        );
    }

    Ok(table)
}
