use crate::db::*;
use tempfile::NamedTempFile;

#[tokio::test]
async fn test_database_creation() {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();

    let tables: Vec<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .fetch_all(db.pool())
            .await
            .unwrap();

    assert!(tables.contains(&"content_records".to_string()));
    assert!(tables.contains(&"schema_version".to_string()));

    db.close().await;
}

#[tokio::test]
async fn test_migrations_are_idempotent() {
    let temp_file = NamedTempFile::new().unwrap();

    let db = Database::new(temp_file.path()).await.unwrap();
    db.close().await;

    // Reopening must not re-apply v1
    let db = Database::new(temp_file.path()).await.unwrap();
    let versions: Vec<i64> = sqlx::query_scalar("SELECT version FROM schema_version")
        .fetch_all(db.pool())
        .await
        .unwrap();
    assert_eq!(versions, vec![1]);
}

#[tokio::test]
async fn test_creates_missing_parent_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("content.db");

    let db = Database::new(&path).await.unwrap();
    assert!(path.exists());
    db.close().await;
}
