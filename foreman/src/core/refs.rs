//! Free-text blocking-reference parsing.
//!
//! Items may declare prerequisites in prose (`Blocked by ENG-12 and ENG-13`)
//! or under a heading (`## Blocked by` followed by a list). References only
//! count when they follow blocking-indicator phrasing; a bare `#7` elsewhere
//! in a body is not a dependency. Parsing is pure and must not leak into
//! control flow anywhere else; the resolver owns the only call site that
//! feeds results back into scheduling.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::RefStyle;

static INDICATOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:blocked\s+(?:by|on)|depends\s+on|waiting\s+on)\b")
        .expect("indicator pattern should be valid")
});

static HASH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\d+)").expect("hash pattern should be valid"));

static TEAM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b([A-Za-z][A-Za-z0-9]*-\d+)\b").expect("team pattern should be valid")
});

/// Extract deduplicated blocking references from an item body.
///
/// For each blocking indicator, references are matched in the window from the
/// indicator to the next Markdown heading (so a `## Blocked by` section covers
/// its whole list, but an unrelated later section does not bleed in).
/// [`RefStyle::Hash`] references are returned as bare digits (`7` for `#7`);
/// [`RefStyle::TeamPrefixed`] references are uppercased (`ENG-12`).
pub fn blocking_refs(body: &str, style: RefStyle) -> Vec<String> {
    let mut refs = Vec::new();
    for indicator in INDICATOR_RE.find_iter(body) {
        let window = window_after(body, indicator.end());
        match style {
            RefStyle::Hash => {
                for caps in HASH_RE.captures_iter(window) {
                    push_unique(&mut refs, caps[1].to_string());
                }
            }
            RefStyle::TeamPrefixed => {
                for caps in TEAM_RE.captures_iter(window) {
                    push_unique(&mut refs, caps[1].to_ascii_uppercase());
                }
            }
        }
    }
    refs
}

/// Slice from `start` up to (excluding) the next Markdown heading line.
///
/// The remainder of the indicator's own line is always included, so inline
/// phrasing (`Blocked by #3`) and heading phrasing (`## Blocked by`) both
/// yield the references that follow them.
fn window_after(body: &str, start: usize) -> &str {
    let rest = &body[start..];
    let mut end = 0usize;
    for line in rest.split_inclusive('\n') {
        if end > 0 && is_heading(line) {
            break;
        }
        end += line.len();
    }
    &rest[..end]
}

fn is_heading(line: &str) -> bool {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ')
}

fn push_unique(refs: &mut Vec<String>, candidate: String) {
    if !refs.contains(&candidate) {
        refs.push(candidate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_list_yields_single_hash_ref() {
        let refs = blocking_refs("## Blocked by\n- #7\n", RefStyle::Hash);
        assert_eq!(refs, vec!["7"]);
    }

    #[test]
    fn inline_phrasing_yields_both_team_refs() {
        let refs = blocking_refs("Blocked by ENG-12 and ENG-13", RefStyle::TeamPrefixed);
        assert_eq!(refs, vec!["ENG-12", "ENG-13"]);
    }

    #[test]
    fn refs_without_indicator_are_ignored() {
        let refs = blocking_refs("See #7 and #8 for context.", RefStyle::Hash);
        assert!(refs.is_empty());
    }

    #[test]
    fn window_stops_at_next_heading() {
        let body = "## Blocked by\n- #7\n\n## Notes\nMention of #9 here.\n";
        let refs = blocking_refs(body, RefStyle::Hash);
        assert_eq!(refs, vec!["7"]);
    }

    #[test]
    fn duplicate_refs_are_collapsed() {
        let body = "Blocked by #3 and #3. Also depends on #3 and #5.";
        let refs = blocking_refs(body, RefStyle::Hash);
        assert_eq!(refs, vec!["3", "5"]);
    }

    #[test]
    fn team_refs_match_case_insensitively_and_normalize() {
        let refs = blocking_refs("blocked on eng-4", RefStyle::TeamPrefixed);
        assert_eq!(refs, vec!["ENG-4"]);
    }

    #[test]
    fn hash_marker_in_heading_is_not_a_ref() {
        let refs = blocking_refs("## Blocked by\nnothing listed\n", RefStyle::Hash);
        assert!(refs.is_empty());
    }
}
