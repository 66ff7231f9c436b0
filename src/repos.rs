//! Repository management: listing, detail, cascading deletion.

use sqlx::{Row, SqlitePool};

use crate::models::Repo;

fn repo_from_row(row: &sqlx::sqlite::SqliteRow) -> Repo {
    Repo {
        id: row.get("id"),
        url: row.get("url"),
        name: row.get("name"),
        ingested_at: row.get("ingested_at"),
        status: row.get("status"),
        last_error: row.get("last_error"),
    }
}

/// All repositories, newest first.
pub async fn list_repos(pool: &SqlitePool) -> sqlx::Result<Vec<Repo>> {
    let rows = sqlx::query(
        "SELECT id, url, name, ingested_at, status, last_error FROM repos \
         ORDER BY ingested_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(repo_from_row).collect())
}

pub async fn get_repo(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<Repo>> {
    let row = sqlx::query(
        "SELECT id, url, name, ingested_at, status, last_error FROM repos WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(repo_from_row))
}

/// Count of file rows (directories excluded).
pub async fn repo_file_count(pool: &SqlitePool, id: &str) -> sqlx::Result<i64> {
    sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE repo_id = ? AND is_directory = 0")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// Delete a repository and everything under it. Returns `false` when the id
/// is unknown.
///
/// `files` rows go via `ON DELETE CASCADE`; the FTS mirror carries no
/// foreign key, so its rows are removed explicitly in the same transaction.
pub async fn delete_repo(pool: &SqlitePool, id: &str) -> sqlx::Result<bool> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM files_fts WHERE rowid IN (SELECT id FROM files WHERE repo_id = ?)",
    )
    .bind(id)
    .execute(&mut *tx)
    .await?;

    let result = sqlx::query("DELETE FROM repos WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(result.rows_affected() > 0)
}
