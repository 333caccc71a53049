//! Commit message analysis.
//!
//! Computes the ranges the editor highlights and records in breadcrumbs.
//! Offsets are computed on byte indices and reported as UTF-16 ranges.

use serde::Serialize;
use std::path::Path;

use crate::breadcrumbs::{Breadcrumbs, TextRange};
use crate::preferences::Preferences;

/// Which version control tool wrote the commit template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionControl {
    Git,
    Hg,
    Svn,
    Jj,
}

impl VersionControl {
    /// Guess the tool from the path of the file being edited.
    pub fn detect(path: &Path) -> Self {
        let in_git_dir = path
            .parent()
            .and_then(|p| p.file_name())
            .map(|name| name == ".git")
            .unwrap_or(false);
        if in_git_dir {
            return VersionControl::Git;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.starts_with("hg-") {
            VersionControl::Hg
        } else if name.starts_with("svn-") {
            VersionControl::Svn
        } else if name.ends_with(".jjdescription") {
            VersionControl::Jj
        } else {
            VersionControl::Git
        }
    }

    /// Svn only marks where the comments begin; everything after is ignored.
    #[must_use]
    pub fn has_single_comment_marker(self) -> bool {
        matches!(self, VersionControl::Svn)
    }

    #[must_use]
    pub fn is_comment_line(self, line: &str) -> bool {
        match self {
            VersionControl::Git => line.starts_with('#'),
            VersionControl::Hg => line.starts_with("HG:"),
            VersionControl::Jj => line.starts_with("JJ:"),
            // "--" alone is both prefix and suffix; require "--...--".
            VersionControl::Svn => {
                line.starts_with("--") && line.ends_with("--") && line.chars().count() >= 4
            }
        }
    }

    /// Lines after a scissor line belong to the comment section even when
    /// they are not comments (e.g. the diff of `git commit -v`).
    #[must_use]
    pub fn is_scissor_line(self, line: &str) -> bool {
        match self {
            VersionControl::Git => {
                line.starts_with("# --") && line.ends_with("--") && line.contains(">8")
            }
            VersionControl::Jj => line == "JJ: ignore-rest",
            VersionControl::Hg | VersionControl::Svn => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Line {
    start: usize,
    content_end: usize,
    end: usize,
}

fn lines(text: &str) -> impl Iterator<Item = Line> + '_ {
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= text.len() {
            return None;
        }
        let rest = &text[start..];
        let line = match rest.find('\n') {
            Some(newline) => {
                let content_end = if rest[..newline].ends_with('\r') {
                    start + newline - 1
                } else {
                    start + newline
                };
                Line {
                    start,
                    content_end,
                    end: start + newline + 1,
                }
            }
            None => Line {
                start,
                content_end: text.len(),
                end: text.len(),
            },
        };
        start = line.end;
        Some(line)
    })
}

/// Byte offset where the trailing comment section begins, or `text.len()`.
///
/// The section starts at a comment line and runs to the end of the text
/// without any content line in between. A blank last line does not count as
/// content, and everything after a scissor line is part of the section.
pub fn comment_section_start(text: &str, style: VersionControl) -> usize {
    let mut found: Option<usize> = None;
    for line in lines(text) {
        let content = &text[line.start..line.content_end];
        let is_comment = style.is_comment_line(content);
        let at_end = line.end == text.len();
        if !is_comment && found.is_some() && (!at_end || !content.trim().is_empty()) {
            found = None;
        } else if is_comment {
            if found.is_none() {
                found = Some(line.start);
                if style.has_single_comment_marker() {
                    break;
                }
            } else if style.is_scissor_line(content) {
                break;
            }
        }
    }
    found.unwrap_or(text.len())
}

/// Byte offset where the commit text ends: before the comment section,
/// allowing one blank line between the two. `\r\n` counts as one newline.
pub fn commit_text_end(text: &str, comment_start: usize) -> usize {
    let bytes = text.as_bytes();
    let mut end = comment_start.min(bytes.len());
    let mut passed_newline = false;
    while end > 0 && bytes[end - 1] == b'\n' {
        end -= 1;
        if end > 0 && bytes[end - 1] == b'\r' {
            end -= 1;
        }
        if passed_newline {
            break;
        }
        passed_newline = true;
    }
    end
}

/// The commit message proper, without the comment section.
pub fn commit_text(text: &str, style: VersionControl) -> &str {
    let comment_start = comment_section_start(text, style);
    &text[..commit_text_end(text, comment_start)]
}

/// Heuristic for squash/rebase/histedit messages.
pub fn is_squash_message(file_name: &str, text: &str) -> bool {
    file_name.contains("rebase") || text.contains("= use commit")
}

fn utf16_len(s: &str) -> usize {
    s.encode_utf16().count()
}

fn utf16_range(text: &str, start: usize, end: usize) -> TextRange {
    TextRange::new(utf16_len(&text[..start]), utf16_len(&text[start..end]))
}

/// Parts of content lines that run past the recommended length.
///
/// The first line is held to `subject_limit`, every other content line to
/// `body_limit`. Limits count characters; ranges are UTF-16.
pub fn overflow_ranges(
    text: &str,
    comment_start: usize,
    style: VersionControl,
    subject_limit: Option<usize>,
    body_limit: Option<usize>,
) -> Vec<TextRange> {
    let mut ranges = Vec::new();
    if subject_limit.is_none() && body_limit.is_none() {
        return ranges;
    }

    for line in lines(text).take_while(|l| l.start < comment_start) {
        let content = &text[line.start..line.content_end];
        let limit = if line.start == 0 {
            subject_limit
        } else {
            body_limit
        };
        if let Some(limit) = limit {
            if !style.is_comment_line(content) {
                if let Some((cut, _)) = content.char_indices().nth(limit) {
                    ranges.push(utf16_range(text, line.start + cut, line.content_end));
                }
            }
        }
        if line.start == 0 && body_limit.is_none() {
            break;
        }
    }
    ranges
}

/// Comment lines mixed into the commit text (not the trailing section).
pub fn comment_line_ranges(text: &str, comment_start: usize, style: VersionControl) -> Vec<TextRange> {
    if style.has_single_comment_marker() {
        return Vec::new();
    }
    lines(text)
        .take_while(|l| l.start < comment_start)
        .filter(|l| l.content_end > l.start)
        .filter(|l| style.is_comment_line(&text[l.start..l.content_end]))
        .map(|l| utf16_range(text, l.start, l.content_end))
        .collect()
}

const DIFF_HEADER_PREFIXES: &[&str] = &[
    "@@",
    "+++",
    "---",
    "diff ",
    "deleted file mode",
    "new file mode",
    "copy from",
    "copy to",
    "rename from",
    "rename to",
    "similarity index",
    "dissimilarity index",
    "old mode",
    "new mode",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffLine {
    Header,
    Add,
    Remove,
}

fn classify_diff_line(line: &str) -> Option<DiffLine> {
    let is_header = DIFF_HEADER_PREFIXES.iter().any(|p| line.starts_with(p))
        || (line.starts_with("index ") && line.contains(".."));
    if is_header {
        Some(DiffLine::Header)
    } else if line.starts_with('+') {
        Some(DiffLine::Add)
    } else if line.starts_with('-') {
        Some(DiffLine::Remove)
    } else {
        None
    }
}

/// Diff lines inside the comment section of a verbose (`commit -v`) template.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffRanges {
    pub header: Vec<TextRange>,
    pub add: Vec<TextRange>,
    pub remove: Vec<TextRange>,
}

/// Only git and jj scissor a diff below their comments; other tools yield nothing.
pub fn diff_ranges(text: &str, comment_start: usize, style: VersionControl) -> DiffRanges {
    let mut ranges = DiffRanges::default();
    if !matches!(style, VersionControl::Git | VersionControl::Jj) {
        return ranges;
    }
    for line in lines(text).filter(|l| l.start >= comment_start) {
        let content = &text[line.start..line.content_end];
        if style.is_comment_line(content) {
            continue;
        }
        let range = utf16_range(text, line.start, line.content_end);
        match classify_diff_line(content) {
            Some(DiffLine::Header) => ranges.header.push(range),
            Some(DiffLine::Add) => ranges.add.push(range),
            Some(DiffLine::Remove) => ranges.remove.push(range),
            None => {}
        }
    }
    ranges
}

/// Everything the editor derives from a commit template on load and save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitTextReport {
    pub version_control: VersionControl,
    pub comment_style: VersionControl,
    pub squash: bool,
    pub commit_text: TextRange,
    pub comment_section: TextRange,
    pub text_overflow_ranges: Vec<TextRange>,
    pub comment_line_ranges: Vec<TextRange>,
    pub diff: DiffRanges,
}

impl CommitTextReport {
    /// Copy the computed ranges into `crumbs`, replacing what was there.
    pub fn apply_to(&self, crumbs: &mut Breadcrumbs) {
        crumbs.text_overflow_ranges = self.text_overflow_ranges.clone();
        crumbs.comment_line_ranges = self.comment_line_ranges.clone();
        crumbs.diff_header_line_ranges = self.diff.header.clone();
        crumbs.diff_add_line_ranges = self.diff.add.clone();
        crumbs.diff_remove_line_ranges = self.diff.remove.clone();
    }
}

/// Analyze `text`, the contents of the commit file at `path`.
pub fn analyze(path: &Path, text: &str, preferences: &Preferences) -> CommitTextReport {
    let version_control = VersionControl::detect(path);
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let squash = is_squash_message(&file_name, text);
    let comment_style = if squash
        && version_control == VersionControl::Hg
        && preferences.detect_hg_comment_style_for_squashes
    {
        VersionControl::Git
    } else {
        version_control
    };

    let comment_start = comment_section_start(text, comment_style);
    let commit_end = commit_text_end(text, comment_start);

    // Squash templates are lists of old messages; line limits do not apply.
    let text_overflow_ranges = if squash {
        Vec::new()
    } else {
        overflow_ranges(
            text,
            comment_start,
            comment_style,
            preferences.subject_length_limit(),
            preferences.body_line_length_limit(),
        )
    };

    CommitTextReport {
        version_control,
        comment_style,
        squash,
        commit_text: utf16_range(text, 0, commit_end),
        comment_section: utf16_range(text, comment_start, text.len()),
        text_overflow_ranges,
        comment_line_ranges: comment_line_ranges(text, comment_start, comment_style),
        diff: diff_ranges(text, comment_start, comment_style),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIT_TEMPLATE: &str = "\n# Please enter the commit message for your changes. Lines starting\n# with '#' will be ignored.\n#\n# On branch main\n";

    #[test]
    fn detect_version_control_from_path() {
        assert_eq!(
            VersionControl::detect(Path::new("/repo/.git/COMMIT_EDITMSG")),
            VersionControl::Git
        );
        assert_eq!(
            VersionControl::detect(Path::new("/tmp/hg-editor-abc.commit.hg.txt")),
            VersionControl::Hg
        );
        assert_eq!(
            VersionControl::detect(Path::new("/tmp/svn-commit.tmp")),
            VersionControl::Svn
        );
        assert_eq!(
            VersionControl::detect(Path::new("/tmp/message.txt")),
            VersionControl::Git
        );
    }

    #[test]
    fn comment_lines_per_tool() {
        assert!(VersionControl::Git.is_comment_line("# comment"));
        assert!(!VersionControl::Git.is_comment_line(" # indented"));
        assert!(VersionControl::Hg.is_comment_line("HG: user: me"));
        assert!(VersionControl::Svn.is_comment_line("--This line, and those below, will be ignored--"));
        assert!(!VersionControl::Svn.is_comment_line("--"));
        assert!(!VersionControl::Svn.is_comment_line("---"));
        assert!(VersionControl::Svn.is_comment_line("----"));
    }

    #[test]
    fn comment_section_of_git_template() {
        let text = format!("Subject{}", GIT_TEMPLATE);
        let start = comment_section_start(&text, VersionControl::Git);
        assert_eq!(&text[start..start + 8], "# Please");
        assert_eq!(commit_text(&text, VersionControl::Git), "Subject");
    }

    #[test]
    fn comment_section_restarts_after_content() {
        let text = "# not yet\nbody line\n# trailing\n";
        let start = comment_section_start(text, VersionControl::Git);
        assert_eq!(&text[start..], "# trailing\n");
    }

    #[test]
    fn blank_line_restarts_comment_section() {
        let text = "Subject\n\n# one\n\n# two\n";
        let start = comment_section_start(text, VersionControl::Git);
        assert_eq!(&text[start..], "# two\n");
    }

    #[test]
    fn trailing_blank_line_stays_in_comment_section() {
        let text = "Subject\n# one\n  ";
        assert_eq!(comment_section_start(text, VersionControl::Git), 8);
    }

    #[test]
    fn jj_description() {
        let path = Path::new("/tmp/editor-1a2b.jjdescription");
        assert_eq!(VersionControl::detect(path), VersionControl::Jj);
        let text = "Fix\n\nJJ: This commit contains the following changes:\nJJ: ignore-rest\ndiff --git a/f b/f\n";
        let start = comment_section_start(text, VersionControl::Jj);
        assert_eq!(&text[start..start + 3], "JJ:");
        assert_eq!(commit_text(text, VersionControl::Jj), "Fix");
    }

    #[test]
    fn svn_comment_section_stops_at_marker() {
        let text = "Fix\n--This line, and those below, will be ignored--\n\nM    file.c\n";
        let start = comment_section_start(text, VersionControl::Svn);
        assert_eq!(start, 4);
    }

    #[test]
    fn no_comments_means_no_section() {
        let text = "Just a message\n";
        assert_eq!(comment_section_start(text, VersionControl::Git), text.len());
    }

    #[test]
    fn commit_text_end_strips_at_most_two_newlines() {
        let text = "Subject\n\n\n# c\n";
        let comment_start = text.find('#').unwrap();
        assert_eq!(commit_text_end(text, comment_start), "Subject\n".len());
        assert_eq!(commit_text_end("Subject", 7), 7);
        assert_eq!(commit_text_end("\n\n", 2), 0);
    }

    #[test]
    fn commit_text_end_strips_crlf() {
        let text = "Subject\r\n\r\n# c\r\n";
        let comment_start = comment_section_start(text, VersionControl::Git);
        assert_eq!(comment_start, "Subject\r\n\r\n".len());
        assert_eq!(commit_text(text, VersionControl::Git), "Subject");
        assert_eq!(commit_text_end("Body\r\n", 6), 4);
    }

    #[test]
    fn squash_detection() {
        assert!(is_squash_message("git-rebase-todo", ""));
        assert!(is_squash_message("COMMIT_EDITMSG", "# This is a combination of 2 commits.\n# = use commit\n"));
        assert!(!is_squash_message("COMMIT_EDITMSG", "Subject\n"));
    }

    #[test]
    fn overflow_on_subject_and_body() {
        let subject = "a".repeat(72);
        let body = "b".repeat(80);
        let text = format!("{}\n\n{}\n# comment\n", subject, body);
        let comment_start = comment_section_start(&text, VersionControl::Git);
        let ranges = overflow_ranges(&text, comment_start, VersionControl::Git, Some(69), Some(72));
        assert_eq!(
            ranges,
            vec![TextRange::new(69, 3), TextRange::new(74 + 72, 8)]
        );
    }

    #[test]
    fn overflow_subject_only() {
        let text = format!("{}\n{}\n", "a".repeat(70), "b".repeat(100));
        let ranges = overflow_ranges(&text, text.len(), VersionControl::Git, Some(69), None);
        assert_eq!(ranges, vec![TextRange::new(69, 1)]);
    }

    #[test]
    fn overflow_body_only_skips_subject() {
        let text = format!("{}\n{}\n", "a".repeat(100), "b".repeat(73));
        let ranges = overflow_ranges(&text, text.len(), VersionControl::Git, None, Some(72));
        assert_eq!(ranges, vec![TextRange::new(101 + 72, 1)]);
    }

    #[test]
    fn overflow_counts_utf16_units() {
        // Each emoji is one char but two UTF-16 units.
        let text = format!("{}\n", "😀".repeat(5));
        let ranges = overflow_ranges(&text, text.len(), VersionControl::Git, Some(3), None);
        assert_eq!(ranges, vec![TextRange::new(6, 4)]);
    }

    #[test]
    fn overflow_ignores_comment_lines() {
        let text = format!("Subject\n#{}\nbody\n", "x".repeat(100));
        let ranges = overflow_ranges(&text, text.len(), VersionControl::Git, Some(69), Some(72));
        assert!(ranges.is_empty());
    }

    #[test]
    fn comment_lines_inside_content() {
        let text = "Subject\n# note\nbody\n#\nmore\n# trailing\n";
        let comment_start = comment_section_start(text, VersionControl::Git);
        let ranges = comment_line_ranges(text, comment_start, VersionControl::Git);
        assert_eq!(ranges, vec![TextRange::new(8, 6), TextRange::new(20, 1)]);
        assert!(comment_line_ranges(text, comment_start, VersionControl::Svn).is_empty());
    }

    #[test]
    fn crlf_lines_exclude_carriage_return() {
        let text = "Subject\r\n# note\r\nbody\r\n";
        let ranges = comment_line_ranges(text, text.len(), VersionControl::Git);
        assert_eq!(ranges, vec![TextRange::new(9, 6)]);
    }

    #[test]
    fn diff_ranges_in_verbose_template() {
        let text = "Subject\n\n# Please enter the commit message.\n# ------------------------ >8 ------------------------\n# Do not modify or remove the line above.\ndiff --git a/f b/f\nindex 1234..5678 100644\n--- a/f\n+++ b/f\n@@ -1 +1 @@\n-old\n+new\n context\n";
        let comment_start = comment_section_start(text, VersionControl::Git);
        let diff = diff_ranges(text, comment_start, VersionControl::Git);
        assert_eq!(diff.header.len(), 5);
        assert_eq!(diff.add.len(), 1);
        assert_eq!(diff.remove.len(), 1);
        let add = diff.add[0];
        assert_eq!(&text[add.offset..add.end()], "+new");
        assert!(diff_ranges(text, comment_start, VersionControl::Hg).header.is_empty());
    }

    #[test]
    fn analyze_git_commit() {
        let text = format!("{}\n\nBody\n{}", "s".repeat(75), GIT_TEMPLATE);
        let report = analyze(
            Path::new("/repo/.git/COMMIT_EDITMSG"),
            &text,
            &Preferences::default(),
        );
        assert_eq!(report.version_control, VersionControl::Git);
        assert!(!report.squash);
        assert_eq!(report.commit_text, TextRange::new(0, 81));
        assert_eq!(report.text_overflow_ranges, vec![TextRange::new(69, 6)]);
        assert!(report.comment_line_ranges.is_empty());
        assert_eq!(report.comment_section.end(), text.len());

        let mut crumbs = Breadcrumbs::default();
        report.apply_to(&mut crumbs);
        assert_eq!(crumbs.text_overflow_ranges, report.text_overflow_ranges);
        assert!(crumbs.validate().is_ok());
    }

    #[test]
    fn analyze_hg_squash_uses_git_comments() {
        let text = "# This is a combination of 2 commits.\n# = use commit\nfirst\n";
        let report = analyze(
            Path::new("/tmp/hg-histedit-1.txt"),
            text,
            &Preferences::default(),
        );
        assert_eq!(report.version_control, VersionControl::Hg);
        assert_eq!(report.comment_style, VersionControl::Git);
        assert!(report.squash);
        assert!(report.text_overflow_ranges.is_empty());
        assert_eq!(report.comment_line_ranges.len(), 2);
    }
}
