//! Service URL detection: scans output chunks for common dev-server
//! startup banners.

use std::sync::OnceLock;

use regex::{Regex, RegexSet};

const PATTERNS: &[&str] = &[
    r"(?i)https?://localhost:\d+",
    r"(?i)https?://127\.0\.0\.1:\d+",
    r"(?i)https?://\[::1\]:\d+",
    r"(?i)Local:\s+(https?://\S+)",
    r"(?i)ready on (https?://\S+)",
    r"(?i)listening on (https?://\S+)",
    r"(?i)Server running at (https?://\S+)",
    r"(?i)Started server on (https?://\S+)",
];

fn compiled() -> &'static (RegexSet, Vec<Regex>) {
    static CELL: OnceLock<(RegexSet, Vec<Regex>)> = OnceLock::new();
    CELL.get_or_init(|| {
        let set = RegexSet::new(PATTERNS).expect("service URL patterns are valid");
        let regexes = PATTERNS.iter().map(|p| Regex::new(p).expect("valid pattern")).collect();
        (set, regexes)
    })
}

/// Test a line against the fixed pattern set. A pattern whose capture group
/// actually matched wins regardless of pattern index — labeled banners like
/// `Local: http://localhost:4173/` are more complete than the bare
/// `https?://localhost:\d+` substring match nested inside them. Only when no
/// matched pattern has a capture group does the lowest-index full match win.
pub fn detect(line: &str) -> Option<String> {
    let (set, regexes) = compiled();
    let matched: Vec<usize> = set.matches(line).into_iter().collect();
    if matched.is_empty() {
        return None;
    }

    for &idx in &matched {
        if let Some(group) = regexes[idx].captures(line).and_then(|c| c.get(1)) {
            return Some(group.as_str().to_string());
        }
    }

    let first = matched[0];
    regexes[first].captures(line).and_then(|c| c.get(0)).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_plain_localhost_url() {
        assert_eq!(detect("server listening on http://localhost:4173/"), Some("http://localhost:4173/".to_string()));
    }

    #[test]
    fn prefers_captured_group_for_labeled_banner() {
        assert_eq!(detect("  Local:   http://localhost:5173/"), Some("http://localhost:5173/".to_string()));
    }

    #[test]
    fn captured_group_wins_even_when_bare_pattern_has_lower_index() {
        // Pattern 0 (bare `https?://localhost:\d+`, no capture group) matches
        // the substring nested inside this banner, but pattern 3's capture
        // includes the trailing slash the bare pattern can't reach — the
        // capture should win even though it's a higher-index pattern.
        assert_eq!(detect("Local: http://localhost:4173/"), Some("http://localhost:4173/".to_string()));
    }

    #[test]
    fn no_match_returns_none() {
        assert_eq!(detect("Compiling module graph..."), None);
    }
}
