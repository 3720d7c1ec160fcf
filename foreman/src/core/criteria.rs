//! Body-text extraction: acceptance criteria and verification targets.

use std::sync::LazyLock;

use regex::Regex;

static VERIFY_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^verify:\s*(https?://\S+)\s*$").expect("verify pattern should be valid")
});

static SELECTOR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?mi)^selector:\s*(\S.*?)\s*$").expect("selector pattern should be valid")
});

/// Pull the text between an `Acceptance Criteria` heading and the next heading
/// of equal or higher level. Returns an empty string when no such section
/// exists. Pure, no I/O.
pub fn acceptance_criteria(body: &str) -> String {
    let mut section_level: Option<usize> = None;
    let mut collected = Vec::new();

    for line in body.lines() {
        match section_level {
            None => {
                if let Some(level) = heading_level(line) {
                    let text = line.trim_start().trim_start_matches('#').trim();
                    if text.eq_ignore_ascii_case("acceptance criteria") {
                        section_level = Some(level);
                    }
                }
            }
            Some(level) => {
                if let Some(next) = heading_level(line) {
                    if next <= level {
                        break;
                    }
                }
                collected.push(line);
            }
        }
    }

    collected.join("\n").trim().to_string()
}

/// Verification target extracted from an item body via fixed text patterns:
/// a `Verify: <url>` line and zero or more `Selector: <css>` lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyTarget {
    pub url: String,
    pub selectors: Vec<String>,
}

/// Extract the verification target, if the body declares one.
pub fn verify_target(body: &str) -> Option<VerifyTarget> {
    let url = VERIFY_URL_RE.captures(body)?[1].to_string();
    let selectors = SELECTOR_RE
        .captures_iter(body)
        .map(|caps| caps[1].to_string())
        .collect();
    Some(VerifyTarget { url, selectors })
}

fn heading_level(line: &str) -> Option<usize> {
    let trimmed = line.trim_start();
    let hashes = trimmed.chars().take_while(|c| *c == '#').count();
    ((1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ')).then_some(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_section_until_equal_level_heading() {
        let body = "intro\n\n## Acceptance Criteria\n- builds\n- tests pass\n\n## Notes\nother\n";
        assert_eq!(acceptance_criteria(body), "- builds\n- tests pass");
    }

    #[test]
    fn deeper_headings_stay_inside_the_section() {
        let body = "## Acceptance Criteria\n### UI\n- renders\n## Done\n";
        assert_eq!(acceptance_criteria(body), "### UI\n- renders");
    }

    #[test]
    fn higher_level_heading_ends_the_section() {
        let body = "### Acceptance Criteria\n- one\n## Next\n- two\n";
        assert_eq!(acceptance_criteria(body), "- one");
    }

    #[test]
    fn missing_section_yields_empty_text() {
        assert_eq!(acceptance_criteria("no criteria here"), "");
    }

    #[test]
    fn heading_match_is_case_insensitive() {
        let body = "## ACCEPTANCE CRITERIA\n- shouts\n";
        assert_eq!(acceptance_criteria(body), "- shouts");
    }

    #[test]
    fn verify_target_needs_a_url_line() {
        assert_eq!(verify_target("Selector: .button\n"), None);

        let body = "Verify: https://app.example.com/login\nSelector: #email\nSelector: .submit\n";
        let target = verify_target(body).expect("target");
        assert_eq!(target.url, "https://app.example.com/login");
        assert_eq!(target.selectors, vec!["#email", ".submit"]);
    }
}
