//! Hybrid pattern search: trigram narrowing + regex confirmation.
//!
//! The store's trigram index only does substring matching, while callers (a
//! language model) write full regex patterns. Running the regex over every
//! file is too slow; running only the index is too weak. So search runs in
//! two stages:
//!
//! 1. Extract the pattern's mandatory literal substrings and ask the trigram
//!    index for files containing all of them (a lossy pre-filter).
//! 2. Run the real regex line-by-line over the candidates (the sole source
//!    of truth).
//!
//! A pattern with no extractable literal falls back to scanning every
//! eligible file in the repository.

use regex::Regex;
use sqlx::{Row, SqlitePool};

use crate::error::ToolError;

/// Hard cap on returned matches.
pub const MAX_SEARCH_MATCHES: usize = 50;

/// Cap on files surviving narrowing, in lexicographic path order. Keeps the
/// confirmation stage inside a response budget; overflow is surfaced via the
/// outcome's `truncated` flag.
pub const MAX_SEARCH_CANDIDATES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchMatch {
    pub path: String,
    pub line_number: usize,
    pub line: String,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub matches: Vec<SearchMatch>,
    pub truncated: bool,
}

/// Run the full two-stage search for one repository.
pub async fn search_pattern(
    pool: &SqlitePool,
    repo_id: &str,
    pattern: &str,
    glob: Option<&str>,
) -> Result<SearchOutcome, ToolError> {
    // Validate the regex before touching the store
    let compiled = Regex::new(pattern).map_err(|e| ToolError::InvalidPattern(e.to_string()))?;

    let literals = extract_literals(pattern);
    let (candidates, candidates_truncated) =
        narrow_candidates(pool, repo_id, &literals, glob).await?;

    let mut outcome = confirm(&compiled, &candidates);
    outcome.truncated = outcome.truncated || candidates_truncated;
    Ok(outcome)
}

/// Pull the mandatory literal substrings out of a regex pattern.
///
/// A literal is a run of `[A-Za-z0-9_]` of length >= 3 (the trigram minimum)
/// that any match must contain verbatim. Extraction is conservative: a
/// construct that makes a run optional (quantifiers, alternation, character
/// classes, optional groups) drops the affected run or gives up entirely,
/// because requiring a non-mandatory literal would hide true matches.
///
/// `"def\s+authenticate"` → `["def", "authenticate"]`
/// `"import\s+(\w+)"`     → `["import"]`
/// `"TODO|FIXME"`         → `[]` (alternation: neither side is mandatory)
/// `"\d+\.\d+"`           → `[]` (full scan)
pub fn extract_literals(pattern: &str) -> Vec<String> {
    // Alternation and character classes make conjunction unsound; scan
    // everything instead.
    if pattern.contains('|') || pattern.contains('[') {
        return Vec::new();
    }

    let chars: Vec<char> = pattern.chars().collect();
    let mut literals = Vec::new();
    let mut run = String::new();
    let mut i = 0;

    let mut flush = |run: &mut String| {
        if run.len() >= 3 {
            literals.push(std::mem::take(run));
        } else {
            run.clear();
        }
    };

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                // Escape sequence: the escaped char is a metaclass or a
                // single literal; either way it breaks the run.
                flush(&mut run);
                i += 2;
                continue;
            }
            '?' | '*' => {
                // Preceding char is optional; drop it from the run.
                run.pop();
                flush(&mut run);
            }
            '{' => {
                // Counted repetition: drop the repeated char, skip the bounds.
                run.pop();
                flush(&mut run);
                while i < chars.len() && chars[i] != '}' {
                    i += 1;
                }
            }
            '+' | '.' | '^' | '$' => {
                flush(&mut run);
            }
            '(' => {
                flush(&mut run);
            }
            ')' => {
                // An optional group would invalidate everything gathered
                // inside it; give up rather than track group extents.
                if matches!(chars.get(i + 1), Some('?') | Some('*') | Some('{')) {
                    return Vec::new();
                }
                flush(&mut run);
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                run.push(c);
            }
            _ => {
                flush(&mut run);
            }
        }
        i += 1;
    }
    flush(&mut run);

    literals
}

/// Narrowing: fetch candidate files via the trigram index.
///
/// Returns `(candidates, truncated)` where candidates are `(path, content)`
/// pairs in path order, capped at [`MAX_SEARCH_CANDIDATES`].
async fn narrow_candidates(
    pool: &SqlitePool,
    repo_id: &str,
    literals: &[String],
    glob: Option<&str>,
) -> Result<(Vec<(String, String)>, bool), ToolError> {
    let mut sql = String::new();
    let match_expr;

    if literals.is_empty() {
        sql.push_str(
            "SELECT path, content FROM files WHERE repo_id = ? AND is_directory = 0",
        );
        match_expr = None;
    } else {
        sql.push_str(
            "SELECT f.path, f.content FROM files f \
             JOIN files_fts ON files_fts.rowid = f.id \
             WHERE f.repo_id = ? AND f.is_directory = 0 AND files_fts MATCH ?",
        );
        match_expr = Some(
            literals
                .iter()
                .map(|lit| format!("content:\"{}\"", lit.replace('"', "\"\"")))
                .collect::<Vec<_>>()
                .join(" AND "),
        );
    }

    // Optional file filter: "*.py" hits the extension index, anything else
    // becomes a LIKE over the file name.
    let glob_filter = glob.map(classify_glob);
    match &glob_filter {
        Some(GlobFilter::Extension(_)) => sql.push_str(" AND extension = ?"),
        Some(GlobFilter::NameLike(_)) => sql.push_str(" AND name LIKE ?"),
        None => {}
    }

    if literals.is_empty() {
        sql.push_str(" ORDER BY path LIMIT ?");
    } else {
        sql.push_str(" ORDER BY f.path LIMIT ?");
    }

    let mut query = sqlx::query(&sql).bind(repo_id);
    if let Some(expr) = &match_expr {
        query = query.bind(expr);
    }
    match &glob_filter {
        Some(GlobFilter::Extension(ext)) => query = query.bind(ext),
        Some(GlobFilter::NameLike(like)) => query = query.bind(like),
        None => {}
    }
    query = query.bind((MAX_SEARCH_CANDIDATES + 1) as i64);

    let rows = query.fetch_all(pool).await?;

    let truncated = rows.len() > MAX_SEARCH_CANDIDATES;
    let candidates = rows
        .into_iter()
        .take(MAX_SEARCH_CANDIDATES)
        .map(|row| {
            let path: String = row.get("path");
            let content: Option<String> = row.get("content");
            (path, content.unwrap_or_default())
        })
        .collect();

    Ok((candidates, truncated))
}

enum GlobFilter {
    Extension(String),
    NameLike(String),
}

fn classify_glob(glob: &str) -> GlobFilter {
    // "*.py" → extension equality; everything else → name LIKE pattern
    if let Some(ext) = glob.strip_prefix('*') {
        if ext.starts_with('.') && !ext[1..].is_empty() && ext[1..].chars().all(|c| c.is_ascii_alphanumeric()) {
            return GlobFilter::Extension(ext.to_ascii_lowercase());
        }
    }
    GlobFilter::NameLike(glob.replace('*', "%").replace('?', "_"))
}

/// Confirmation: run the regex line-by-line over candidates, in file order
/// then line order. Matching is case-sensitive and single-line.
fn confirm(compiled: &Regex, candidates: &[(String, String)]) -> SearchOutcome {
    let mut matches = Vec::new();

    for (path, content) in candidates {
        for (idx, line) in content.lines().enumerate() {
            if compiled.is_match(line) {
                matches.push(SearchMatch {
                    path: path.clone(),
                    line_number: idx + 1,
                    line: line.to_string(),
                });
                if matches.len() >= MAX_SEARCH_MATCHES {
                    return SearchOutcome {
                        matches,
                        truncated: true,
                    };
                }
            }
        }
    }

    SearchOutcome {
        matches,
        truncated: false,
    }
}
