//! Repository ingestion pipeline.
//!
//! Clone a git repo, walk its tree, bulk-insert the surviving files into
//! SQLite, drop the clone. After ingestion only the database holds the
//! repository — no checkout remains on disk.
//!
//! URL → git clone --depth 1 → walk + filter → batch INSERT → cleanup
//!
//! Row insertion and the status flip to `ready` commit in one transaction, so
//! readers never observe a half-ingested `ready` repository.

use std::path::Path;

use chrono::Utc;
use sqlx::{QueryBuilder, SqlitePool};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::error::IngestError;
use crate::models::{file_extension, FileNode, RepoStatus};

/// Directories never descended into. Pruned before recursion, so a huge
/// `node_modules` costs nothing.
const SKIP_DIRS: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    ".env",
    "vendor",
    "dist",
    "build",
    ".next",
    ".nuxt",
    "target",
    "bin",
    "obj",
    ".idea",
    ".vscode",
    ".svn",
    ".hg",
    "coverage",
    ".cache",
    ".parcel-cache",
    ".turbo",
];

/// Extensions of known non-text content.
const SKIP_EXTENSIONS: &[&str] = &[
    // Images
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".bmp", ".webp",
    // Fonts
    ".woff", ".woff2", ".ttf", ".eot", ".otf",
    // Media
    ".mp3", ".mp4", ".wav", ".avi", ".mov", ".webm",
    // Archives
    ".zip", ".tar", ".gz", ".rar", ".7z", ".bz2",
    // Documents
    ".pdf", ".doc", ".docx", ".xls", ".xlsx",
    // Binaries
    ".exe", ".dll", ".so", ".dylib", ".bin",
    // Compiled
    ".pyc", ".pyo", ".class", ".o", ".a", ".obj", ".wasm",
    // Data
    ".sqlite", ".db", ".pickle", ".pkl",
    // Maps
    ".map",
];

/// Generated lock files: large, noisy, and useless to an agent.
const SKIP_FILENAMES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "poetry.lock",
    "Cargo.lock",
    "composer.lock",
    "Gemfile.lock",
    "go.sum",
    ".DS_Store",
    "Thumbs.db",
];

/// SQLite bind-variable budget: 8 columns per row, stay under the historical
/// 999-variable limit.
const INSERT_BATCH_ROWS: usize = 100;

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub repo_id: String,
    pub status: String,
    pub file_count: usize,
}

/// Ingest a git repository by URL.
///
/// Dedup: a URL that is already in the store short-circuits with
/// `already_exists` and the existing repository's id; no duplicate rows.
pub async fn ingest_repo(
    pool: &SqlitePool,
    config: &IngestConfig,
    url: &str,
) -> Result<IngestReport, IngestError> {
    let url = url.trim();

    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM repos WHERE url = ?")
        .bind(url)
        .fetch_optional(pool)
        .await?;
    if let Some((id,)) = existing {
        return Ok(IngestReport {
            repo_id: id,
            status: "already_exists".to_string(),
            file_count: 0,
        });
    }

    let repo_id = Uuid::new_v4().to_string();
    let name = extract_repo_name(url);

    sqlx::query("INSERT INTO repos (id, url, name, ingested_at, status) VALUES (?, ?, ?, ?, ?)")
        .bind(&repo_id)
        .bind(url)
        .bind(&name)
        .bind(Utc::now().timestamp())
        .bind(RepoStatus::Ingesting.as_str())
        .execute(pool)
        .await?;

    match clone_and_load(pool, config, &repo_id, url).await {
        Ok(file_count) => {
            tracing::info!("ingested {} ({} entries)", name, file_count);
            Ok(IngestReport {
                repo_id,
                status: RepoStatus::Ready.as_str().to_string(),
                file_count,
            })
        }
        Err(e) => {
            tracing::warn!("ingestion of {} failed: {}", url, e);
            mark_error(pool, &repo_id, &e.to_string()).await;
            Err(e)
        }
    }
}

async fn clone_and_load(
    pool: &SqlitePool,
    config: &IngestConfig,
    repo_id: &str,
    url: &str,
) -> Result<usize, IngestError> {
    // The TempDir guard deletes the clone on every exit path, including
    // errors and cancellation.
    let workdir = tempfile::tempdir()?;
    let clone_path = workdir.path().join("repo");

    git_clone(url, &clone_path).await?;

    let nodes = collect_file_nodes(&clone_path, repo_id, config.max_file_bytes)?;
    if nodes.iter().filter(|n| !n.is_directory).count() == 0 {
        return Err(IngestError::EmptyTree);
    }

    let count = nodes.len();
    insert_tree(pool, repo_id, &nodes).await?;
    Ok(count)
}

async fn mark_error(pool: &SqlitePool, repo_id: &str, cause: &str) {
    let result = sqlx::query("UPDATE repos SET status = ?, last_error = ? WHERE id = ?")
        .bind(RepoStatus::Error.as_str())
        .bind(cause)
        .bind(repo_id)
        .execute(pool)
        .await;
    if let Err(e) = result {
        tracing::warn!("failed to record ingestion error for {}: {}", repo_id, e);
    }
}

async fn git_clone(url: &str, dest: &Path) -> Result<(), IngestError> {
    let output = tokio::process::Command::new("git")
        .args(["clone", "--depth", "1", "--single-branch"])
        .arg(url)
        .arg(dest)
        .output()
        .await
        .map_err(|e| IngestError::CloneFailed(format!("could not run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(IngestError::CloneFailed(stderr.trim().to_string()));
    }
    Ok(())
}

/// Walk a checked-out tree and produce the rows to insert.
///
/// Exposed for tests and for ingesting an already-present local tree.
pub fn collect_file_nodes(
    root: &Path,
    repo_id: &str,
    max_file_bytes: u64,
) -> Result<Vec<FileNode>, IngestError> {
    let mut nodes = Vec::new();

    let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
        // Prune before descending; depth 0 is the root itself.
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        entry
            .file_name()
            .to_str()
            .map(|n| !SKIP_DIRS.contains(&n))
            .unwrap_or(false)
    });

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!("skipping unreadable entry: {}", e);
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let rel = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let rel_str = rel.to_string_lossy().replace('\\', "/");

        if entry.file_type().is_dir() {
            nodes.push(FileNode::from_path(repo_id, &rel_str, true, None));
            continue;
        }
        if !entry.file_type().is_file() {
            continue;
        }

        let file_name = entry.file_name().to_string_lossy();
        if SKIP_FILENAMES.contains(&file_name.as_ref()) {
            continue;
        }
        if let Some(ext) = file_extension(&file_name) {
            if SKIP_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }
        }

        let size = match entry.metadata() {
            Ok(m) => m.len(),
            Err(_) => continue,
        };
        if size > max_file_bytes {
            continue;
        }

        // Binary and non-UTF-8 files are excluded entirely
        let bytes = match std::fs::read(entry.path()) {
            Ok(b) => b,
            Err(_) => continue,
        };
        let content = match String::from_utf8(bytes) {
            Ok(c) => c,
            Err(_) => continue,
        };

        nodes.push(FileNode::from_path(repo_id, &rel_str, false, Some(content)));
    }

    Ok(nodes)
}

/// Bulk-insert a repository's tree and flip it to `ready` in one transaction.
pub async fn insert_tree(
    pool: &SqlitePool,
    repo_id: &str,
    nodes: &[FileNode],
) -> Result<(), IngestError> {
    let mut tx = pool.begin().await?;

    for batch in nodes.chunks(INSERT_BATCH_ROWS) {
        let mut builder = QueryBuilder::new(
            "INSERT INTO files (repo_id, path, name, extension, parent_path, depth, is_directory, content) ",
        );
        builder.push_values(batch, |mut b, node| {
            b.push_bind(&node.repo_id)
                .push_bind(&node.path)
                .push_bind(&node.name)
                .push_bind(&node.extension)
                .push_bind(&node.parent_path)
                .push_bind(node.depth)
                .push_bind(node.is_directory)
                .push_bind(&node.content);
        });
        builder.build().execute(&mut *tx).await?;
    }

    // Mirror into the trigram index, rowid shared with files.id.
    sqlx::query(
        "INSERT INTO files_fts (rowid, path, content)
         SELECT id, path, COALESCE(content, '') FROM files WHERE repo_id = ?",
    )
    .bind(repo_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE repos SET status = ? WHERE id = ?")
        .bind(RepoStatus::Ready.as_str())
        .bind(repo_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

/// Derive a display name from a clone URL.
///
/// `"https://github.com/expressjs/express.git"` → `"expressjs/express"`,
/// `"git@bitbucket.org:team/repo.git"` → `"team/repo"`.
pub fn extract_repo_name(url: &str) -> String {
    let clean = url.trim_end_matches('/');
    let clean = clean.strip_suffix(".git").unwrap_or(clean);

    if let Some((_, rest)) = clean.split_once("://") {
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.len() >= 3 {
            return parts[parts.len() - 2..].join("/");
        }
        return parts.last().copied().unwrap_or(clean).to_string();
    }

    if let Some((_, rest)) = clean.split_once(':') {
        return rest.to_string();
    }

    clean.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_repo_name_https() {
        assert_eq!(
            extract_repo_name("https://github.com/expressjs/express.git"),
            "expressjs/express"
        );
        assert_eq!(
            extract_repo_name("https://github.com/expressjs/express/"),
            "expressjs/express"
        );
    }

    #[test]
    fn test_extract_repo_name_ssh() {
        assert_eq!(
            extract_repo_name("git@bitbucket.org:team/repo.git"),
            "team/repo"
        );
    }

    #[test]
    fn test_collect_prunes_skip_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("src")).unwrap();
        std::fs::create_dir_all(tmp.path().join("node_modules/dep")).unwrap();
        std::fs::write(tmp.path().join("src/main.py"), "print('hi')\n").unwrap();
        std::fs::write(tmp.path().join("node_modules/dep/index.js"), "x").unwrap();

        let nodes = collect_file_nodes(tmp.path(), "r1", 500 * 1024).unwrap();
        let paths: Vec<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert!(paths.contains(&"src"));
        assert!(paths.contains(&"src/main.py"));
        assert!(!paths.iter().any(|p| p.starts_with("node_modules")));
    }

    #[test]
    fn test_collect_skips_binary_and_lockfiles() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("logo.png"), [0x89, 0x50, 0x4e, 0x47]).unwrap();
        std::fs::write(tmp.path().join("Cargo.lock"), "[[package]]\n").unwrap();
        std::fs::write(tmp.path().join("notes.txt"), [0xff, 0xfe, 0x00]).unwrap();
        std::fs::write(tmp.path().join("kept.rs"), "fn main() {}\n").unwrap();

        let nodes = collect_file_nodes(tmp.path(), "r1", 500 * 1024).unwrap();
        let paths: Vec<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["kept.rs"]);
    }

    #[test]
    fn test_collect_skips_oversized() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("big.txt"), "a".repeat(2048)).unwrap();
        std::fs::write(tmp.path().join("small.txt"), "a").unwrap();

        let nodes = collect_file_nodes(tmp.path(), "r1", 1024).unwrap();
        let paths: Vec<&str> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["small.txt"]);
    }
}
