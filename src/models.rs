//! Core data models.
//!
//! A [`Repo`] row tracks one ingested repository; [`FileNode`] rows hold its
//! virtual filesystem tree — one row per file or directory, with hierarchy
//! expressed as derived `parent_path`/`depth` columns rather than pointers.

use serde::Serialize;

/// Repository lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoStatus {
    Pending,
    Ingesting,
    Ready,
    Error,
}

impl RepoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoStatus::Pending => "pending",
            RepoStatus::Ingesting => "ingesting",
            RepoStatus::Ready => "ready",
            RepoStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ingesting" => RepoStatus::Ingesting,
            "ready" => RepoStatus::Ready,
            "error" => RepoStatus::Error,
            _ => RepoStatus::Pending,
        }
    }
}

/// One ingested repository.
#[derive(Debug, Clone, Serialize)]
pub struct Repo {
    pub id: String,
    pub url: String,
    pub name: String,
    /// Unix timestamp of ingestion start.
    pub ingested_at: i64,
    pub status: String,
    pub last_error: Option<String>,
}

/// One file or directory row in a repository's virtual tree.
///
/// Invariants: `(repo_id, path)` unique; `depth` equals the segment count of
/// `path`; `parent_path` is the immediate ancestor (`""` at depth 1);
/// directories carry no content.
#[derive(Debug, Clone)]
pub struct FileNode {
    pub repo_id: String,
    pub path: String,
    pub name: String,
    pub extension: Option<String>,
    pub parent_path: String,
    pub depth: i64,
    pub is_directory: bool,
    pub content: Option<String>,
}

impl FileNode {
    /// Derive `name`, `extension`, `parent_path`, and `depth` from a
    /// slash-separated relative path.
    pub fn from_path(repo_id: &str, path: &str, is_directory: bool, content: Option<String>) -> Self {
        let segments: Vec<&str> = path.split('/').collect();
        let depth = segments.len() as i64;
        let name = segments.last().copied().unwrap_or("").to_string();
        let parent_path = if segments.len() > 1 {
            segments[..segments.len() - 1].join("/")
        } else {
            String::new()
        };
        let extension = if is_directory {
            None
        } else {
            file_extension(&name)
        };

        Self {
            repo_id: repo_id.to_string(),
            path: path.to_string(),
            name,
            extension,
            parent_path,
            depth,
            is_directory,
            content,
        }
    }
}

/// Lower-cased extension including the leading dot.
///
/// `"login.py"` → `Some(".py")`, `"Dockerfile"` → `None`,
/// `".gitignore"` → `Some(".gitignore")`, `"a.spec.TS"` → `Some(".ts")`.
pub fn file_extension(name: &str) -> Option<String> {
    if let Some(rest) = name.strip_prefix('.') {
        if !rest.contains('.') {
            // Dotfile with no further dots: the whole name is the suffix
            return Some(name.to_ascii_lowercase());
        }
    }
    name.rfind('.').and_then(|idx| {
        if idx == 0 {
            None
        } else {
            Some(name[idx..].to_ascii_lowercase())
        }
    })
}
