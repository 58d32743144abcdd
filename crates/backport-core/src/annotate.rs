//! Conflict annotation from the pending diff of a failed apply.
//!
//! The parser here is deliberately narrow: it splits unified (and combined
//! `diff --cc`) output into files and hunks and records each hunk's
//! target-side start line. Its only consumer is [`annotate_conflicts`], which
//! locates the three conflict-marker lines per hunk.

use serde::{Deserialize, Serialize};

pub const START_MARKER: &str = "<<<<<<<";
pub const SEPARATOR_MARKER: &str = "=======";
pub const END_MARKER: &str = ">>>>>>>";

/// Message attached to every conflict annotation.
pub const CONFLICT_MESSAGE: &str = "Patch Conflict";

/// Annotation severity, serialized the way check-run APIs expect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnnotationLevel {
    Notice,
    Warning,
    Failure,
}

/// A file/line scoped conflict report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConflictAnnotation {
    pub path: String,
    pub start_line: u64,
    pub end_line: u64,
    pub annotation_level: AnnotationLevel,
    pub message: String,
    pub raw_details: String,
}

/// One file section of a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffFile {
    pub path: String,
    pub binary: bool,
    pub hunks: Vec<DiffHunk>,
}

/// One hunk: its target-side start line and raw body lines (prefixes kept).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub target_start: u64,
    pub lines: Vec<String>,
}

/// Split diff text into files and hunks.
pub fn parse_unified_diff(text: &str) -> Vec<DiffFile> {
    let mut files: Vec<DiffFile> = Vec::new();

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("diff --git ") {
            files.push(DiffFile {
                path: git_header_path(rest),
                binary: false,
                hunks: Vec::new(),
            });
            continue;
        }
        if let Some(rest) = line
            .strip_prefix("diff --cc ")
            .or_else(|| line.strip_prefix("diff --combined "))
        {
            files.push(DiffFile {
                path: rest.trim().to_string(),
                binary: false,
                hunks: Vec::new(),
            });
            continue;
        }

        let Some(file) = files.last_mut() else {
            continue;
        };

        if line.starts_with("@@") {
            file.hunks.push(DiffHunk {
                target_start: hunk_target_start(line).unwrap_or(0),
                lines: Vec::new(),
            });
            continue;
        }

        match file.hunks.last_mut() {
            // Extended header lines before the first hunk.
            None => {
                if line.starts_with("Binary files ") || line.starts_with("GIT binary patch") {
                    file.binary = true;
                } else if let Some(path) = line.strip_prefix("+++ ") {
                    if path != "/dev/null" {
                        file.path = path.strip_prefix("b/").unwrap_or(path).to_string();
                    }
                }
            }
            Some(hunk) => {
                if !line.starts_with('\\') {
                    hunk.lines.push(line.to_string());
                }
            }
        }
    }

    files
}

/// Produce one failure annotation per hunk of every non-binary file.
///
/// A hunk without markers degrades to a range clamped at the hunk start.
pub fn annotate_conflicts(diff_text: &str) -> Vec<ConflictAnnotation> {
    let mut annotations = Vec::new();

    for file in parse_unified_diff(diff_text) {
        if file.binary {
            continue;
        }
        for hunk in &file.hunks {
            annotations.push(annotate_hunk(&file.path, hunk));
        }
    }

    annotations
}

fn annotate_hunk(path: &str, hunk: &DiffHunk) -> ConflictAnnotation {
    let find = |marker: &str| hunk.lines.iter().position(|l| l.contains(marker));
    let start = find(START_MARKER);
    let separator = find(SEPARATOR_MARKER);
    let end = find(END_MARKER);

    let start_offset = start.unwrap_or(0) as u64;
    let end_offset = separator.map_or(0, |s| s.saturating_sub(2)) as u64;

    let raw_details = match end {
        Some(last) => {
            let first = start.unwrap_or(0);
            hunk.lines
                .iter()
                .enumerate()
                .filter(|(i, _)| *i >= first && *i <= last)
                .map(|(_, l)| l.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        }
        None => String::new(),
    };

    ConflictAnnotation {
        path: path.to_string(),
        start_line: hunk.target_start + start_offset,
        end_line: hunk.target_start + end_offset,
        annotation_level: AnnotationLevel::Failure,
        message: CONFLICT_MESSAGE.to_string(),
        raw_details,
    }
}

/// `a/foo b/foo` -> `foo`.
fn git_header_path(rest: &str) -> String {
    match rest.rfind(" b/") {
        Some(idx) => rest[idx + 3..].to_string(),
        None => rest.trim().to_string(),
    }
}

/// Start line of the `+` range in `@@ -a,b +c,d @@` or `@@@ -a,b -c,d +e,f @@@`.
fn hunk_target_start(header: &str) -> Option<u64> {
    header
        .split_whitespace()
        .skip(1)
        .take_while(|tok| !tok.starts_with("@@"))
        .find_map(|tok| tok.strip_prefix('+'))
        .and_then(|range| range.split(',').next())
        .and_then(|start| start.parse().ok())
}
