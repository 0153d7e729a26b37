//! Line-level content comparison for version history.
//!
//! [ContentDiffer] walks the old and new line arrays with two pointers. On a mismatch it looks
//! up to [LOOKAHEAD] lines ahead, first in the new text (skipped lines become `add`) and then in
//! the old text (skipped lines become `delete`). If neither window finds a match, the pair becomes
//! one `modify` line. The walk is linear and allocation-light; distant reorderings are reported as
//! modifications rather than moves.
use serde::{Deserialize, Serialize};

/// How far ahead either side is searched for a resynchronizing line.
pub const LOOKAHEAD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffType {
    Add,
    Delete,
    Modify,
    Equal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffLine {
    #[serde(rename = "type")]
    pub diff_type: DiffType,
    /// 1-based position in the rendered diff.
    pub line_num: usize,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_line: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    pub added: usize,
    pub deleted: usize,
    pub modified: usize,
    pub total: usize,
}

impl DiffSummary {
    pub fn is_unchanged(&self) -> bool {
        self.total == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub from_version: u64,
    pub to_version: u64,
    pub lines: Vec<DiffLine>,
    pub summary: DiffSummary,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentDiffer;

impl ContentDiffer {
    pub fn new() -> Self {
        ContentDiffer
    }

    pub fn compare_content(
        &self,
        old_content: &str,
        new_content: &str,
        from_version: u64,
        to_version: u64,
    ) -> DiffResult {
        let old_lines = old_content.split('\n').collect::<Vec<_>>();
        let new_lines = new_content.split('\n').collect::<Vec<_>>();
        let lines = compute_diff(&old_lines, &new_lines);
        let summary = summarize(&lines);
        DiffResult {
            from_version,
            to_version,
            lines,
            summary,
        }
    }
}

struct DiffWriter {
    lines: Vec<DiffLine>,
}

impl DiffWriter {
    fn push(
        &mut self,
        diff_type: DiffType,
        content: String,
        old_line: Option<usize>,
        new_line: Option<usize>,
    ) {
        let line_num = self.lines.len() + 1;
        self.lines.push(DiffLine {
            diff_type,
            line_num,
            content,
            old_line,
            new_line,
        });
    }
}

fn compute_diff(old_lines: &[&str], new_lines: &[&str]) -> Vec<DiffLine> {
    let mut out = DiffWriter {
        lines: Vec::with_capacity(old_lines.len().max(new_lines.len())),
    };
    let (mut old_idx, mut new_idx) = (0, 0);

    while old_idx < old_lines.len() || new_idx < new_lines.len() {
        if old_idx >= old_lines.len() {
            out.push(
                DiffType::Add,
                new_lines[new_idx].to_string(),
                None,
                Some(new_idx + 1),
            );
            new_idx += 1;
            continue;
        }
        if new_idx >= new_lines.len() {
            out.push(
                DiffType::Delete,
                old_lines[old_idx].to_string(),
                Some(old_idx + 1),
                None,
            );
            old_idx += 1;
            continue;
        }

        let old = old_lines[old_idx];
        let new = new_lines[new_idx];
        if old == new {
            out.push(
                DiffType::Equal,
                old.to_string(),
                Some(old_idx + 1),
                Some(new_idx + 1),
            );
            old_idx += 1;
            new_idx += 1;
            continue;
        }

        // Old line reappears a little further on: the new lines before it were inserted.
        if let Some(skip) = (1..=LOOKAHEAD)
            .take_while(|i| new_idx + i < new_lines.len())
            .find(|i| new_lines[new_idx + i] == old)
        {
            for j in 0..skip {
                out.push(
                    DiffType::Add,
                    new_lines[new_idx + j].to_string(),
                    None,
                    Some(new_idx + j + 1),
                );
            }
            new_idx += skip;
            continue;
        }

        // New line appears a little further on in the old text: the old lines before it were
        // removed.
        if let Some(skip) = (1..=LOOKAHEAD)
            .take_while(|i| old_idx + i < old_lines.len())
            .find(|i| old_lines[old_idx + i] == new)
        {
            for j in 0..skip {
                out.push(
                    DiffType::Delete,
                    old_lines[old_idx + j].to_string(),
                    Some(old_idx + j + 1),
                    None,
                );
            }
            old_idx += skip;
            continue;
        }

        out.push(
            DiffType::Modify,
            format!("- {old}\n+ {new}"),
            Some(old_idx + 1),
            Some(new_idx + 1),
        );
        old_idx += 1;
        new_idx += 1;
    }

    out.lines
}

fn summarize(lines: &[DiffLine]) -> DiffSummary {
    let mut summary = DiffSummary::default();
    for line in lines {
        match line.diff_type {
            DiffType::Add => summary.added += 1,
            DiffType::Delete => summary.deleted += 1,
            DiffType::Modify => summary.modified += 1,
            DiffType::Equal => {}
        }
    }
    summary.total = summary.added + summary.deleted + summary.modified;
    summary
}
