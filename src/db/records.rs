//! Content record persistence.

use crate::error::DatabaseError;
use crate::types::ContentRecord;
use crate::{Error, Result};

use super::{ContentRow, Database};

const SELECT_COLUMNS: &str = r#"
    SELECT slug, title, description, body, cover_image, tags, extra,
           created_at, updated_at
    FROM content_records
"#;

impl Database {
    /// Insert the record, or overwrite the stored record with the same slug
    ///
    /// The original `created_at` is kept on overwrite.
    pub async fn upsert_record(&self, record: &ContentRecord) -> Result<()> {
        let row = ContentRow::from_record(record)?;
        sqlx::query(
            r#"
            INSERT INTO content_records (
                slug, title, description, body, cover_image, tags, extra,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(slug) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                body = excluded.body,
                cover_image = excluded.cover_image,
                tags = excluded.tags,
                extra = excluded.extra,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&row.slug)
        .bind(&row.title)
        .bind(&row.description)
        .bind(&row.body)
        .bind(&row.cover_image)
        .bind(&row.tags)
        .bind(&row.extra)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert record {}: {}",
                row.slug, e
            )))
        })?;

        Ok(())
    }

    /// Delete any record with the same slug, then insert, in one transaction
    ///
    /// Nothing from the previous version survives, including `created_at`.
    pub async fn replace_record(&self, record: &ContentRecord) -> Result<()> {
        let row = ContentRow::from_record(record)?;
        let mut tx = self.pool.begin().await.map_err(Error::Sqlx)?;

        let existed = Self::delete_row(&mut tx, &row.slug).await?;
        Self::insert_row(&mut tx, &row).await?;

        tx.commit().await.map_err(Error::Sqlx)?;
        tracing::debug!(slug = %row.slug, existed, "Replaced record");
        Ok(())
    }

    async fn delete_row(conn: &mut sqlx::SqliteConnection, slug: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM content_records WHERE slug = ?")
            .bind(slug)
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete record {}: {}",
                    slug, e
                )))
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert_row(conn: &mut sqlx::SqliteConnection, row: &ContentRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO content_records (
                slug, title, description, body, cover_image, tags, extra,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.slug)
        .bind(&row.title)
        .bind(&row.description)
        .bind(&row.body)
        .bind(&row.cover_image)
        .bind(&row.tags)
        .bind(&row.extra)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::Database(
                DatabaseError::ConstraintViolation(format!("slug {} already exists", row.slug)),
            ),
            _ => Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert record {}: {}",
                row.slug, e
            ))),
        })?;

        Ok(())
    }

    /// Get the record with `slug`
    pub async fn get_record(&self, slug: &str) -> Result<Option<ContentRecord>> {
        let row = sqlx::query_as::<_, ContentRow>(&format!("{SELECT_COLUMNS} WHERE slug = ?"))
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Sqlx)?;

        row.map(ContentRow::into_record).transpose()
    }

    /// Number of stored records
    pub async fn count_records(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_records")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Sqlx)?;
        Ok(count)
    }
}
