//! Virtual shell operations backed by SQLite.
//!
//! Three operations that stand in for eight shell commands:
//!
//!   list_files   →  ls, find, rg --files     ("What files exist?")
//!   read_file    →  cat, head, tail, sed -n  ("Show me file content")
//!   search_code  →  rg                       ("Where is this pattern?")
//!
//! The agent calls these as if running shell commands; every call is a
//! read-only query against ingested rows. All three render plain text the
//! model can consume directly.

use globset::GlobBuilder;
use sqlx::{Row, SqlitePool};

use crate::error::ToolError;
use crate::search::{self, MAX_SEARCH_MATCHES};

/// Output caps keep tool results inside the model's context budget.
pub const MAX_LIST_RESULTS: usize = 200;
pub const MAX_FILE_LINES: usize = 500;

/// List a directory (one level) or expand a glob across the repository.
///
/// `list_files("")` lists the repo root; `list_files("src/auth")` lists one
/// directory; a `path` containing `*`/`?` switches to glob mode, where `*`
/// and `?` never cross `/` and `**` spans directories. Glob mode with no
/// matches is an empty result, not an error.
pub async fn list_files(
    pool: &SqlitePool,
    repo_id: &str,
    path: &str,
) -> Result<String, ToolError> {
    let mut path = path.trim_matches('/').to_string();
    if path == "." {
        path.clear();
    }

    if path.contains('*') || path.contains('?') {
        return list_glob(pool, repo_id, &path).await;
    }

    let rows = sqlx::query(
        "SELECT name, is_directory FROM files \
         WHERE repo_id = ? AND parent_path = ? \
         ORDER BY is_directory DESC, name",
    )
    .bind(repo_id)
    .bind(&path)
    .fetch_all(pool)
    .await?;

    if rows.is_empty() {
        // Distinguish a missing directory from an existing empty one
        if path.is_empty() {
            return Ok(String::new());
        }
        let exists: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM files WHERE repo_id = ? AND path = ? AND is_directory = 1",
        )
        .bind(repo_id)
        .bind(&path)
        .fetch_optional(pool)
        .await?;
        if exists.is_none() {
            return Err(ToolError::NotFound(path));
        }
        return Ok(String::new());
    }

    let lines: Vec<String> = rows
        .iter()
        .map(|row| {
            let name: String = row.get("name");
            let is_dir: bool = row.get("is_directory");
            if is_dir {
                format!("{}/", name)
            } else {
                name
            }
        })
        .collect();

    Ok(lines.join("\n"))
}

async fn list_glob(pool: &SqlitePool, repo_id: &str, pattern: &str) -> Result<String, ToolError> {
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| ToolError::InvalidGlob(e.to_string()))?
        .compile_matcher();

    // Without `**` a match must have exactly as many segments as the
    // pattern, so the depth index bounds the candidate fetch.
    let rows = if pattern.contains("**") {
        sqlx::query("SELECT path, is_directory FROM files WHERE repo_id = ? ORDER BY path")
            .bind(repo_id)
            .fetch_all(pool)
            .await?
    } else {
        let depth = pattern.split('/').count() as i64;
        sqlx::query(
            "SELECT path, is_directory FROM files WHERE repo_id = ? AND depth = ? ORDER BY path",
        )
        .bind(repo_id)
        .bind(depth)
        .fetch_all(pool)
        .await?
    };

    let matched: Vec<(String, bool)> = rows
        .iter()
        .filter_map(|row| {
            let path: String = row.get("path");
            let is_dir: bool = row.get("is_directory");
            matcher.is_match(&path).then_some((path, is_dir))
        })
        .collect();

    if matched.is_empty() {
        return Ok(format!("No files matching: {}", pattern));
    }

    let mut lines: Vec<String> = matched
        .iter()
        .take(MAX_LIST_RESULTS)
        .map(|(path, is_dir)| {
            if *is_dir {
                format!("{}/", path)
            } else {
                path.clone()
            }
        })
        .collect();

    if matched.len() > MAX_LIST_RESULTS {
        lines.push(format!(
            "\n... {} more results. Narrow your glob.",
            matched.len() - MAX_LIST_RESULTS
        ));
    }

    Ok(lines.join("\n"))
}

/// Read one file, optionally a line range, with 1-based line numbers.
///
/// `start_line`/`end_line` select the slice: no bounds reads the whole file,
/// `end_line` alone is head, a negative `start_line` is tail (ignoring
/// `end_line`), and two positive bounds are an inclusive range clamped to the
/// file. A `start_line` past the end yields an empty result, not an error.
pub async fn read_file(
    pool: &SqlitePool,
    repo_id: &str,
    path: &str,
    start_line: Option<i64>,
    end_line: Option<i64>,
) -> Result<String, ToolError> {
    let path = path.trim_matches('/').trim_start_matches("./").to_string();

    let row = sqlx::query(
        "SELECT content, is_directory FROM files WHERE repo_id = ? AND path = ?",
    )
    .bind(repo_id)
    .bind(&path)
    .fetch_optional(pool)
    .await?;

    let row = row.ok_or_else(|| ToolError::NotFound(path.clone()))?;
    let is_dir: bool = row.get("is_directory");
    if is_dir {
        return Err(ToolError::IsDirectory(path));
    }

    let content: Option<String> = row.get("content");
    let content = content.unwrap_or_default();
    let lines: Vec<&str> = content.split('\n').collect();
    let total = lines.len();

    let (selected, first_num): (&[&str], usize) = match start_line {
        Some(s) if s < 0 => {
            // tail mode: start_line=-10 → last 10 lines
            let n = s.unsigned_abs() as usize;
            let from = total.saturating_sub(n);
            (&lines[from..], from + 1)
        }
        _ => {
            let s = (start_line.unwrap_or(1).max(1) as usize) - 1;
            let e = end_line
                .map(|e| e.max(0) as usize)
                .unwrap_or(total)
                .min(total);
            if s >= total || s >= e {
                (&lines[0..0], s + 1)
            } else {
                (&lines[s..e], s + 1)
            }
        }
    };

    let mut truncated = false;
    let selected = if selected.len() > MAX_FILE_LINES {
        truncated = true;
        &selected[..MAX_FILE_LINES]
    } else {
        selected
    };

    let last_num = first_num + selected.len().saturating_sub(1);
    let width = last_num.to_string().len();
    let mut output: Vec<String> = Vec::with_capacity(selected.len());
    for (i, line) in selected.iter().enumerate() {
        output.push(format!("{:>width$} | {}", first_num + i, line, width = width));
    }

    let mut result = output.join("\n");
    if truncated {
        result.push_str(&format!(
            "\n\n... truncated ({} total lines). Use start_line/end_line to read specific sections.",
            total
        ));
    }

    Ok(result)
}

/// Search a regex across the repository, ripgrep-style.
///
/// Output is `path:line:text` per match, in file order then line order,
/// truncated at [`MAX_SEARCH_MATCHES`]. `glob` optionally restricts files
/// (`*.py`, `test_*`).
pub async fn search_code(
    pool: &SqlitePool,
    repo_id: &str,
    pattern: &str,
    glob: Option<&str>,
) -> Result<String, ToolError> {
    let outcome = search::search_pattern(pool, repo_id, pattern, glob).await?;

    if outcome.matches.is_empty() {
        return Ok(format!("No matches found for pattern: {}", pattern));
    }

    let mut output: Vec<String> = outcome
        .matches
        .iter()
        .map(|m| format!("{}:{}:{}", m.path, m.line_number, m.line))
        .collect();

    if outcome.truncated {
        output.push(format!(
            "\n... truncated at {} matches. Narrow with glob or a more specific pattern.",
            MAX_SEARCH_MATCHES
        ));
    }

    Ok(output.join("\n"))
}
