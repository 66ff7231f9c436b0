//! Integration tests for the store, ingestion invariants, and the three
//! virtual shell operations.

mod common;

use common::{seed_repo, test_pool};
use sqlx::Row;

use repo_lens::error::ToolError;
use repo_lens::ingest;
use repo_lens::repos;
use repo_lens::shell;

const REPO: &str = "repo-1";

async fn seed_default(pool: &sqlx::SqlitePool) {
    seed_repo(
        pool,
        REPO,
        "https://github.com/test/repo",
        &[
            ("a.py", "print('a')\n"),
            ("README.md", "# Test repo\n"),
            (
                "auth/login.py",
                "import hashlib\n\n\ndef authenticate(user, password):\n    return check(user, password)\n",
            ),
            (
                "auth/tokens.py",
                "def issue_token(user):\n    return sign(user)\n",
            ),
            (
                "src/app.py",
                "def\nauth\nclass App:\n    pass\n",
            ),
            ("src/util/helpers.txt", "def helper notes\n"),
            ("docs/guide.md", "Released in 2021.\nSee auth/login.py.\n"),
        ],
    )
    .await;
}

// ---- ingestion invariants ----

#[tokio::test]
async fn depth_matches_segment_count_and_parents_exist() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    let rows = sqlx::query("SELECT path, parent_path, depth, is_directory FROM files WHERE repo_id = ?")
        .bind(REPO)
        .fetch_all(&pool)
        .await
        .unwrap();
    assert!(!rows.is_empty());

    for row in &rows {
        let path: String = row.get("path");
        let parent_path: String = row.get("parent_path");
        let depth: i64 = row.get("depth");

        assert_eq!(depth, path.split('/').count() as i64, "depth of {}", path);

        if depth == 1 {
            assert_eq!(parent_path, "");
        } else {
            let parent = sqlx::query(
                "SELECT depth, is_directory FROM files WHERE repo_id = ? AND path = ?",
            )
            .bind(REPO)
            .bind(&parent_path)
            .fetch_one(&pool)
            .await
            .unwrap();
            let parent_depth: i64 = parent.get("depth");
            let parent_is_dir: bool = parent.get("is_directory");
            assert_eq!(parent_depth, depth - 1, "parent depth of {}", path);
            assert!(parent_is_dir, "parent of {} must be a directory", path);
        }
    }
}

#[tokio::test]
async fn reingesting_known_url_is_a_noop() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    let config = repo_lens::config::IngestConfig::default();
    let report = ingest::ingest_repo(&pool, &config, "https://github.com/test/repo")
        .await
        .unwrap();
    assert_eq!(report.status, "already_exists");
    assert_eq!(report.repo_id, REPO);

    let repo_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repos")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(repo_count, 1);
}

#[tokio::test]
async fn delete_repo_cascades_to_zero_rows() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    assert!(repos::delete_repo(&pool, REPO).await.unwrap());

    let file_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE repo_id = ?")
        .bind(REPO)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(file_count, 0);

    let fts_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files_fts")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(fts_count, 0);

    assert!(repos::get_repo(&pool, REPO).await.unwrap().is_none());
    assert!(!repos::delete_repo(&pool, REPO).await.unwrap());
}

// ---- list_files ----

#[tokio::test]
async fn list_root_orders_directories_first() {
    let (_tmp, pool) = test_pool().await;
    seed_repo(
        &pool,
        REPO,
        "https://github.com/test/tiny",
        &[("a.py", "x\n"), ("b/inner.py", "y\n")],
    )
    .await;

    let listing = shell::list_files(&pool, REPO, "").await.unwrap();
    assert_eq!(listing, "b/\na.py");
}

#[tokio::test]
async fn list_one_directory_level() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    let listing = shell::list_files(&pool, REPO, "src").await.unwrap();
    assert_eq!(listing, "util/\napp.py");
}

#[tokio::test]
async fn list_missing_directory_is_not_found() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    let err = shell::list_files(&pool, REPO, "no/such/dir").await.unwrap_err();
    assert!(matches!(err, ToolError::NotFound(_)));
}

#[tokio::test]
async fn glob_star_does_not_cross_separators() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    // "*.py" only matches root-level python files
    let listing = shell::list_files(&pool, REPO, "*.py").await.unwrap();
    assert_eq!(listing, "a.py");

    // "**/*.py" spans directories
    let listing = shell::list_files(&pool, REPO, "**/*.py").await.unwrap();
    assert!(listing.contains("auth/login.py"));
    assert!(listing.contains("auth/tokens.py"));
    assert!(listing.contains("src/app.py"));
    assert!(!listing.contains("helpers.txt"));
}

#[tokio::test]
async fn glob_without_matches_is_not_an_error() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    let listing = shell::list_files(&pool, REPO, "**/*.rs").await.unwrap();
    assert!(listing.contains("No files matching"));
}

// ---- read_file ----

#[tokio::test]
async fn read_whole_file_numbers_lines() {
    let (_tmp, pool) = test_pool().await;
    seed_repo(&pool, REPO, "u", &[("x.py", "alpha\nbeta\ngamma")]).await;

    let output = shell::read_file(&pool, REPO, "x.py", None, None).await.unwrap();
    assert_eq!(output, "1 | alpha\n2 | beta\n3 | gamma");
}

#[tokio::test]
async fn read_tail_ignores_end_line() {
    let (_tmp, pool) = test_pool().await;
    seed_repo(&pool, REPO, "u", &[("x.py", "a\nb\nc\nd\ne")]).await;

    let output = shell::read_file(&pool, REPO, "x.py", Some(-2), Some(1))
        .await
        .unwrap();
    assert_eq!(output, "4 | d\n5 | e");
}

#[tokio::test]
async fn read_head_with_end_line_only() {
    let (_tmp, pool) = test_pool().await;
    seed_repo(&pool, REPO, "u", &[("x.py", "a\nb\nc\nd\ne")]).await;

    let output = shell::read_file(&pool, REPO, "x.py", None, Some(2))
        .await
        .unwrap();
    assert_eq!(output, "1 | a\n2 | b");
}

#[tokio::test]
async fn read_range_clamps_to_file_length() {
    let (_tmp, pool) = test_pool().await;
    seed_repo(&pool, REPO, "u", &[("x.py", "a\nb\nc\nd\ne")]).await;

    let output = shell::read_file(&pool, REPO, "x.py", Some(4), Some(100))
        .await
        .unwrap();
    assert_eq!(output, "4 | d\n5 | e");
}

#[tokio::test]
async fn read_start_past_eof_is_empty_not_error() {
    let (_tmp, pool) = test_pool().await;
    seed_repo(&pool, REPO, "u", &[("x.py", "a\nb")]).await;

    let output = shell::read_file(&pool, REPO, "x.py", Some(10), None)
        .await
        .unwrap();
    assert_eq!(output, "");
}

#[tokio::test]
async fn read_missing_file_and_directory_errors() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    let err = shell::read_file(&pool, REPO, "nope.py", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::NotFound(_)));

    let err = shell::read_file(&pool, REPO, "auth", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::IsDirectory(_)));
}

#[tokio::test]
async fn read_line_number_width_is_padded() {
    let (_tmp, pool) = test_pool().await;
    let content: String = (1..=12).map(|i| format!("line{}\n", i)).collect();
    seed_repo(&pool, REPO, "u", &[("x.py", content.trim_end())]).await;

    let output = shell::read_file(&pool, REPO, "x.py", Some(9), Some(11))
        .await
        .unwrap();
    assert_eq!(output, " 9 | line9\n10 | line10\n11 | line11");
}

// ---- search_code ----

#[tokio::test]
async fn search_confirms_only_single_line_matches() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    // "src/app.py" has "def" and "auth" on different lines; only
    // auth/login.py has a line matching the full pattern.
    let output = shell::search_code(&pool, REPO, r"def\s+auth", None)
        .await
        .unwrap();
    assert_eq!(
        output,
        "auth/login.py:4:def authenticate(user, password):"
    );
}

#[tokio::test]
async fn search_respects_glob_filter() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    let output = shell::search_code(&pool, REPO, "def", Some("*.py"))
        .await
        .unwrap();
    assert!(output.contains("auth/login.py"));
    assert!(!output.contains("helpers.txt"));

    let output = shell::search_code(&pool, REPO, "def", Some("*.txt"))
        .await
        .unwrap();
    assert!(output.contains("src/util/helpers.txt:1:def helper notes"));
}

#[tokio::test]
async fn search_pure_meta_pattern_scans_everything() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    let output = shell::search_code(&pool, REPO, r"\d{4}", None).await.unwrap();
    assert_eq!(output, "docs/guide.md:1:Released in 2021.");
}

#[tokio::test]
async fn search_alternation_finds_either_branch() {
    let (_tmp, pool) = test_pool().await;
    seed_repo(
        &pool,
        REPO,
        "u",
        &[
            ("only_todo.py", "# TODO clean up\n"),
            ("only_fixme.py", "# FIXME later\n"),
        ],
    )
    .await;

    let output = shell::search_code(&pool, REPO, "TODO|FIXME", None)
        .await
        .unwrap();
    assert!(output.contains("only_todo.py:1"));
    assert!(output.contains("only_fixme.py:1"));
}

#[tokio::test]
async fn search_invalid_pattern_is_reported() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    let err = shell::search_code(&pool, REPO, "def (unclosed", None)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::InvalidPattern(_)));
}

#[tokio::test]
async fn search_no_matches_is_friendly_message() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;

    let output = shell::search_code(&pool, REPO, "quetzalcoatl", None)
        .await
        .unwrap();
    assert!(output.contains("No matches found"));
}

#[tokio::test]
async fn search_is_scoped_to_one_repo() {
    let (_tmp, pool) = test_pool().await;
    seed_default(&pool).await;
    seed_repo(
        &pool,
        "repo-2",
        "https://github.com/test/other",
        &[("other.py", "def authenticate_elsewhere():\n    pass\n")],
    )
    .await;

    let output = shell::search_code(&pool, REPO, r"def\s+auth", None)
        .await
        .unwrap();
    assert!(!output.contains("other.py"));
}
