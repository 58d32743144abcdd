//! Backport PR body generation.
//!
//! The body always references the original PR, then carries over exactly one
//! release-notes section: the first one-line `notes:` entry, else the first
//! multi-line `Notes:` bullet block, else `Notes: no-notes`.

use std::sync::OnceLock;

use regex::Regex;

use crate::platform::PullRequest;

const ONE_LINE_NOTES: &str = r"(?i)(?:\r?\n|^)notes: (.+?)(?:\r?\n|$)";
const MULTI_LINE_NOTES: &str = r"(?i)\r?\nNotes:\r?\n((?:\*.+(?:\r?\n|$))+)";

/// Marker used when the original PR has no notes.
pub const NO_NOTES: &str = "Notes: no-notes";

fn one_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(ONE_LINE_NOTES).ok()).as_ref()
}

fn multi_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(MULTI_LINE_NOTES).ok()).as_ref()
}

/// The notes section carried into the backport, if the body has one.
pub fn extract_notes(body: &str) -> Option<String> {
    let patterns = [one_line(), multi_line()];
    patterns.into_iter().flatten().find_map(|re| {
        re.find(body)
            .map(|m| m.as_str().trim_matches(|c| c == '\r' || c == '\n').to_string())
    })
}

/// Body of the backport PR for `pr`. Pure: same input, same bytes.
pub fn backport_body(pr: &PullRequest) -> String {
    let notes = extract_notes(&pr.body).unwrap_or_else(|| NO_NOTES.to_string());
    format!(
        "Backport of #{}\n\nSee that PR for details.\n\n{notes}",
        pr.number
    )
}
