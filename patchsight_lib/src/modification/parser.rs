//! Extraction of whole-file replacements from a free-text model answer.
//!
//! Two block shapes are accepted. The primary one names the file on the
//! opening fence:
//!
//! ````text
//! ```python src/app.py
//! ...full file...
//! ```
//! ````
//!
//! When no primary block names a file, a header line is tried instead:
//!
//! ````text
//! === FILE: src/app.py ===
//! ```python
//! ...full file...
//! ```
//! ````

use std::{collections::BTreeMap, sync::LazyLock};

use regex::Regex;
use tracing::debug;

use crate::{
    error::{PatchSightError, Result},
    file_walker::normalize_relative_path,
};

static FENCED_WITH_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ms)^[ \t]*```[ \t]*([^\s`]+)(?:[ \t]+([^\n`]+?))?[ \t]*\r?\n(.*?)^[ \t]*```[ \t]*\r?$",
    )
    .expect("valid regex literal")
});

static FILE_HEADER_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ms)^[ \t]*===[ \t]*FILE:[ \t]*([^\n]+?)[ \t]*===[ \t]*\r?\n(?:[^\n]*\n)*?[ \t]*```[^\n]*\n(.*?)^[ \t]*```[ \t]*\r?$",
    )
    .expect("valid regex literal")
});

/// Map of relative path to proposed full content, each body trimmed.
///
/// Fails with [`PatchSightError::ResponseParse`] carrying the raw text when
/// neither block shape yields a file.
pub fn parse_response(raw_response: &str) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();

    for caps in FENCED_WITH_PATH.captures_iter(raw_response) {
        let first = caps.get(1).map_or("", |m| m.as_str());
        let path = match caps.get(2) {
            Some(path) => path.as_str(),
            // A lone token is a path only if it looks like one, not a language tag.
            None if first.contains('.') || first.contains('/') => first,
            None => continue,
        };
        let body = caps.get(3).map_or("", |m| m.as_str());
        insert_block(&mut files, path, body);
    }

    if files.is_empty() {
        debug!("no path-bearing fenced blocks; trying file headers");
        for caps in FILE_HEADER_BLOCK.captures_iter(raw_response) {
            let path = caps.get(1).map_or("", |m| m.as_str());
            let body = caps.get(2).map_or("", |m| m.as_str());
            insert_block(&mut files, path, body);
        }
    }

    if files.is_empty() {
        return Err(PatchSightError::ResponseParse {
            reason: "no fenced code block named a file path".to_string(),
            raw_response: raw_response.to_string(),
        });
    }
    Ok(files)
}

fn insert_block(files: &mut BTreeMap<String, String>, path: &str, body: &str) {
    let path = normalize_relative_path(path);
    let path = path.trim_start_matches("./").to_string();
    if path.is_empty() {
        return;
    }
    files.insert(path, body.trim().to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn two_primary_blocks() {
        let raw = "Here are the changes.\n\n```python a.py\n\nprint('a')\n\n```\n\nAnd:\n```python b.py\ndef b():\n    return 1\n```\n";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(
            parsed,
            BTreeMap::from([
                ("a.py".to_string(), "print('a')".to_string()),
                ("b.py".to_string(), "def b():\n    return 1".to_string()),
            ])
        );
    }

    #[test]
    fn bare_path_token_without_language() {
        let parsed = parse_response("```src/App.js\nimport x;\n```").unwrap();
        assert_eq!(parsed["src/App.js"], "import x;");
    }

    #[test]
    fn language_only_blocks_are_ignored_in_favour_of_headers() {
        let raw = "=== FILE: lib/util.py ===\nINSTRUCTIONS: tweak\n```python\nx = 2\n```\n";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(
            parsed,
            BTreeMap::from([("lib/util.py".to_string(), "x = 2".to_string())])
        );
    }

    #[test]
    fn primary_blocks_win_over_headers() {
        let raw = "=== FILE: old.py ===\n```python\nold\n```\n```python new.py\nnew\n```\n";
        let parsed = parse_response(raw).unwrap();
        assert!(parsed.contains_key("new.py"));
        assert!(!parsed.contains_key("old.py"));
    }

    #[test]
    fn windows_paths_and_crlf_are_normalized() {
        let raw = "```rust src\\main.rs\r\nfn main() {}\r\n```\r\n";
        let parsed = parse_response(raw).unwrap();
        assert_eq!(parsed["src/main.rs"], "fn main() {}");
    }

    #[test]
    fn no_blocks_is_a_typed_failure_with_raw_text() {
        let err = parse_response("I could not do that.").unwrap_err();
        assert!(matches!(err, PatchSightError::ResponseParse { .. }));
        assert_eq!(err.raw_response(), Some("I could not do that."));
    }
}
