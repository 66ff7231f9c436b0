use anyhow::Result;
use sqlx::SqlitePool;

/// Create all tables and indexes. Idempotent; safe to run repeatedly.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repos (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            ingested_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            repo_id TEXT NOT NULL REFERENCES repos(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            extension TEXT,
            parent_path TEXT NOT NULL,
            depth INTEGER NOT NULL,
            is_directory INTEGER NOT NULL DEFAULT 0,
            content TEXT,
            UNIQUE(repo_id, path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Each index backs one shell-tool query shape.
    //
    // list_files (ls mode):    WHERE repo_id = ? AND parent_path = ?
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_dir ON files(repo_id, parent_path)")
        .execute(pool)
        .await?;
    // search_code (--glob by name): WHERE repo_id = ? AND name LIKE ?
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_name ON files(repo_id, name)")
        .execute(pool)
        .await?;
    // search_code (--glob by extension): WHERE repo_id = ? AND extension = ?
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_ext ON files(repo_id, extension)")
        .execute(pool)
        .await?;
    // list_files (glob mode, no **): WHERE repo_id = ? AND depth = ?
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_depth ON files(repo_id, depth)")
        .execute(pool)
        .await?;

    // Trigram FTS5 table over path + content, rowid shared with files.id.
    // The trigram tokenizer gives indexed substring matching for needles of
    // three or more characters; search_code narrows on it.
    // FTS5 CREATE is not idempotent natively, so we check first.
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='files_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE files_fts USING fts5(
                path,
                content,
                tokenize = 'trigram'
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    Ok(())
}
