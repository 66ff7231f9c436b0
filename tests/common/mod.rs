//! Shared test setup: a temporary SQLite database seeded with a small
//! repository tree through the same bulk-insert path ingestion uses.

use std::collections::BTreeSet;

use sqlx::SqlitePool;
use tempfile::TempDir;

use repo_lens::ingest;
use repo_lens::migrate;
use repo_lens::models::{FileNode, RepoStatus};

pub async fn test_pool() -> (TempDir, SqlitePool) {
    let tmp = TempDir::new().unwrap();
    let pool = repo_lens::db::connect_path(&tmp.path().join("test.sqlite"))
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();
    (tmp, pool)
}

/// Insert a repo row plus a tree built from `(path, content)` pairs.
/// Directory rows for every ancestor are derived automatically.
pub async fn seed_repo(pool: &SqlitePool, repo_id: &str, url: &str, files: &[(&str, &str)]) {
    sqlx::query("INSERT INTO repos (id, url, name, ingested_at, status) VALUES (?, ?, ?, 0, ?)")
        .bind(repo_id)
        .bind(url)
        .bind("test/repo")
        .bind(RepoStatus::Ingesting.as_str())
        .execute(pool)
        .await
        .unwrap();

    let nodes = nodes_from_files(repo_id, files);
    ingest::insert_tree(pool, repo_id, &nodes).await.unwrap();
}

pub fn nodes_from_files(repo_id: &str, files: &[(&str, &str)]) -> Vec<FileNode> {
    let mut dirs = BTreeSet::new();
    for (path, _) in files {
        let segments: Vec<&str> = path.split('/').collect();
        for i in 1..segments.len() {
            dirs.insert(segments[..i].join("/"));
        }
    }

    let mut nodes: Vec<FileNode> = dirs
        .iter()
        .map(|dir| FileNode::from_path(repo_id, dir, true, None))
        .collect();
    nodes.extend(
        files
            .iter()
            .map(|(path, content)| {
                FileNode::from_path(repo_id, path, false, Some((*content).to_string()))
            }),
    );
    nodes
}
