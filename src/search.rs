//! Full-text search and query suggestions over a project's titles and content bodies.
//!
//! A [SearchManager] is cheap to build and holds no state of its own; callers create one per
//! request. The index guard is held only while the candidate documents are collected. Content
//! files are read afterwards without the guard, so a result may pair metadata with a body that was
//! replaced a moment later. Callers that need a consistent pair use
//! [crate::tree::DocumentTreeManager::get_content].
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io, sync::Arc};

use crate::{
    config::SearchConfig,
    error::DocTreeError,
    fsutil::{ceil_char_boundary, floor_char_boundary, read_or_empty},
    index::IndexManager,
    properties::{DocMetaEntry, DocumentType},
};

static WORD_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\w{3,}\b").expect("word pattern is valid"));

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOptions {
    pub query: String,
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub whole_word: bool,
    #[serde(default)]
    pub use_regex: bool,
    /// `0` falls back to the configured default.
    #[serde(default)]
    pub max_results: usize,
    /// Empty means every type.
    #[serde(default)]
    pub document_types: Vec<DocumentType>,
    /// `0` falls back to the configured default.
    #[serde(default)]
    pub context_chars: usize,
}

impl SearchOptions {
    pub fn new<S: Into<String>>(query: S) -> Self {
        SearchOptions {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// One match with surrounding context. Offsets are byte offsets into the searched text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchHighlight {
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub before: String,
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub document_id: String,
    pub title: String,
    pub document_type: DocumentType,
    /// Leading portion of the body, see [truncate_content].
    pub content: String,
    pub score: usize,
    pub title_matches: Vec<MatchHighlight>,
    pub content_matches: Vec<MatchHighlight>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SearchManager {
    index: Arc<IndexManager>,
    config: SearchConfig,
}

impl SearchManager {
    pub fn new(index: Arc<IndexManager>, config: SearchConfig) -> Self {
        SearchManager { index, config }
    }

    pub fn search_documents(&self, options: &SearchOptions) -> Result<Vec<SearchResult>, DocTreeError> {
        if options.query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let max_results = match options.max_results {
            0 => self.config.max_results,
            n => n,
        };
        let context_chars = match options.context_chars {
            0 => self.config.context_chars,
            n => n,
        };
        let pattern = build_pattern(options)?;

        let candidates = self
            .index
            .read()
            .documents()
            .values()
            .filter(|meta| {
                options.document_types.is_empty() || options.document_types.contains(&meta.doc_type)
            })
            .cloned()
            .collect::<Vec<_>>();

        let mut results = Vec::new();
        for meta in candidates {
            let content = match self.read_body(&meta.id) {
                Ok(content) => content,
                Err(e) => {
                    tracing::warn!("[SearchManager] skipping {}: {e}", meta.id);
                    continue;
                }
            };
            if let Some(result) = self.score_document(meta, &content, &pattern, context_chars) {
                results.push(result);
            }
        }

        // Stable: equal scores keep discovery order.
        results.sort_by(|a, b| b.score.cmp(&a.score));
        results.truncate(max_results);
        tracing::debug!(
            "[SearchManager] '{}' matched {} documents",
            options.query,
            results.len()
        );
        Ok(results)
    }

    fn read_body(&self, node_id: &str) -> io::Result<String> {
        read_or_empty(self.index.content_path(node_id))
    }

    fn score_document(
        &self,
        meta: DocMetaEntry,
        content: &str,
        pattern: &Regex,
        context_chars: usize,
    ) -> Option<SearchResult> {
        let title_matches = find_matches(&meta.title, pattern, context_chars);
        let content_matches = find_matches(content, pattern, context_chars);
        if title_matches.is_empty() && content_matches.is_empty() {
            return None;
        }
        let score = calculate_score(
            title_matches.len(),
            content_matches.len(),
            meta.title.len(),
            content.len(),
        );
        Some(SearchResult {
            document_id: meta.id,
            title: meta.title,
            document_type: meta.doc_type,
            content: truncate_content(content, self.config.summary_chars),
            score,
            title_matches,
            content_matches,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
        })
    }

    /// Words of three or more characters containing `query` (case-insensitive, exact match
    /// excluded), most frequent first.
    pub fn get_search_suggestions(&self, query: &str, limit: usize) -> Result<Vec<String>, DocTreeError> {
        let query = query.trim().to_lowercase();
        if query.chars().count() < 2 {
            return Ok(Vec::new());
        }
        let limit = match limit {
            0 => self.config.suggestion_limit,
            n => n,
        };

        let documents = self
            .index
            .read()
            .documents()
            .values()
            .map(|meta| (meta.id.clone(), meta.title.clone()))
            .collect::<Vec<_>>();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for (id, title) in documents {
            extract_suggestions(&title, &query, &mut counts);
            match self.read_body(&id) {
                Ok(content) => {
                    let cut = floor_char_boundary(&content, self.config.suggestion_scan_chars);
                    extract_suggestions(&content[..cut], &query, &mut counts);
                }
                Err(e) => tracing::warn!("[SearchManager] skipping body of {id}: {e}"),
            }
        }

        let mut ranked = counts.into_iter().collect::<Vec<_>>();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(ranked
            .into_iter()
            .take(limit)
            .map(|(word, _)| word)
            .collect())
    }
}

fn build_pattern(options: &SearchOptions) -> Result<Regex, DocTreeError> {
    let mut pattern = if options.use_regex {
        options.query.clone()
    } else {
        regex::escape(&options.query)
    };
    if options.whole_word {
        pattern = format!(r"\b(?:{pattern})\b");
    }
    Ok(RegexBuilder::new(&pattern)
        .case_insensitive(!options.case_sensitive)
        .build()?)
}

fn find_matches(text: &str, pattern: &Regex, context_chars: usize) -> Vec<MatchHighlight> {
    pattern
        .find_iter(text)
        .filter(|m| !m.is_empty())
        .map(|m| {
            let before_start = ceil_char_boundary(text, m.start().saturating_sub(context_chars));
            let after_end = floor_char_boundary(text, m.end().saturating_add(context_chars));
            MatchHighlight {
                start: m.start(),
                end: m.end(),
                text: m.as_str().to_string(),
                before: text[before_start..m.start()].to_string(),
                after: text[m.end()..after_end].to_string(),
            }
        })
        .collect()
}

/// `10 * title + 2 * content`, plus a bonus for short matching titles and for match density in
/// the body. Lengths are in bytes.
pub fn calculate_score(
    title_matches: usize,
    content_matches: usize,
    title_len: usize,
    content_len: usize,
) -> usize {
    let mut score = title_matches * 10 + content_matches * 2;
    if title_len > 0 && title_matches > 0 {
        score += (100 / title_len).max(1);
    }
    if content_len > 0 && content_matches > 0 {
        score += content_matches * 1000 / content_len;
    }
    score
}

/// Cut `content` to at most `max_len` bytes plus `...`, backing up to the last space when that
/// space sits in the final third.
pub fn truncate_content(content: &str, max_len: usize) -> String {
    if content.len() <= max_len {
        return content.to_string();
    }
    let mut truncated = &content[..floor_char_boundary(content, max_len)];
    if let Some(last_space) = truncated.rfind(' ') {
        if last_space > max_len * 2 / 3 {
            truncated = &truncated[..last_space];
        }
    }
    format!("{truncated}...")
}

fn extract_suggestions(text: &str, query: &str, counts: &mut HashMap<String, usize>) {
    let lowered = text.to_lowercase();
    for word in WORD_REGEX.find_iter(&lowered).map(|m| m.as_str()) {
        if word != query && word.contains(query) {
            *counts.entry(word.to_string()).or_default() += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn test_score_formula() {
        // 2 title matches in a 20 byte title, 4 content matches in 400 bytes
        assert_eq!(calculate_score(2, 4, 20, 400), 20 + 8 + 5 + 10);
        // Long titles still earn the minimum bonus
        assert_eq!(calculate_score(1, 0, 500, 0), 11);
        assert_eq!(calculate_score(0, 1, 10, 1000), 2 + 1);
    }

    #[test]
    fn test_pattern_options() {
        let literal = build_pattern(&SearchOptions::new("a.b")).unwrap();
        assert!(literal.is_match("A.B"));
        assert!(!literal.is_match("axb"));

        let regex = build_pattern(&SearchOptions {
            use_regex: true,
            case_sensitive: true,
            ..SearchOptions::new("a.b")
        })
        .unwrap();
        assert!(regex.is_match("axb"));
        assert!(!regex.is_match("AXB"));

        let word = build_pattern(&SearchOptions {
            whole_word: true,
            ..SearchOptions::new("tree")
        })
        .unwrap();
        assert!(word.is_match("a Tree here"));
        assert!(!word.is_match("subtrees"));

        assert!(matches!(
            build_pattern(&SearchOptions {
                use_regex: true,
                ..SearchOptions::new("(unclosed")
            }),
            Err(DocTreeError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_match_context_respects_char_boundaries() {
        let pattern = build_pattern(&SearchOptions::new("needle")).unwrap();
        let text = "héllo wörld needle ünïcode";
        let matches = find_matches(text, &pattern, 3);
        assert_eq!(matches.len(), 1);
        let m = &matches[0];
        assert_eq!(&text[m.start..m.end], "needle");
        assert!(m.before.ends_with(' '));
        assert!(m.after.starts_with(' '));
        assert!(m.before.len() <= 3 && m.after.len() <= 3);
    }

    #[test]
    fn test_oversized_context_takes_whole_text() {
        let pattern = build_pattern(&SearchOptions::new("needle")).unwrap();
        let text = "before needle after";
        let matches = find_matches(text, &pattern, usize::MAX);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].before, "before ");
        assert_eq!(matches[0].after, " after");
    }

    #[test]
    fn test_truncate_content() {
        assert_eq!(truncate_content("short", 500), "short");

        let words = "word ".repeat(200);
        let summary = truncate_content(&words, 500);
        assert!(summary.ends_with("..."));
        assert!(summary.len() <= 503);
        assert!(!summary.trim_end_matches("...").ends_with(' '));

        let no_spaces = "x".repeat(600);
        assert_eq!(truncate_content(&no_spaces, 500).len(), 503);

        let multibyte = "文".repeat(300);
        let cut = truncate_content(&multibyte, 500);
        assert!(cut.ends_with("..."));
    }

    #[test]
    fn test_extract_suggestions() {
        let mut counts = HashMap::new();
        extract_suggestions("Search searching SEARCHES se searchable", "search", &mut counts);
        assert_eq!(counts.get("searching"), Some(&1));
        assert_eq!(counts.get("searches"), Some(&1));
        assert_eq!(counts.get("searchable"), Some(&1));
        assert!(!counts.contains_key("search"));
    }
}
