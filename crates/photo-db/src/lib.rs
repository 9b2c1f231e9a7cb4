//! Photo metadata persistence layer.
//!
//! This crate owns the `photos_upload_service` table: one row per uploaded
//! photo holding the original file name, the URL handed back by the blob
//! store, and the soft-delete bookkeeping columns. It offers an async API
//! around SQLite (sqlx) with two operations, append and list, exposed to the
//! rest of the workspace through the [`PhotoRepository`] capability trait.

use std::{path::Path, str::FromStr, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Row, SqlitePool,
};
use thiserror::Error;
use tracing::{error, info};

/// Default SQLite busy timeout in milliseconds when the DB is under load.
const SQLITE_BUSY_TIMEOUT_MS: u64 = 5_000;

const INSERT_PHOTO_SQL: &str = r#"
    INSERT INTO photos_upload_service (photo_name, photo_url, is_deleted)
    VALUES (?, ?, ?)
"#;

const LIST_PHOTOS_SQL: &str = r#"
    SELECT id, photo_name, photo_url, is_deleted, created_at, deleted_at
    FROM photos_upload_service
    ORDER BY id DESC
"#;

pub type Result<T, E = RepositoryError> = std::result::Result<T, E>;

/// Errors returned by the metadata layer. Every variant is terminal for the
/// request that hit it; nothing here is retried.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("malformed photo row: {0}")]
    MalformedRow(String),
}

/// Capability the upload flow needs from relational storage.
#[async_trait]
pub trait PhotoRepository: Send + Sync {
    /// Appends a record with `is_deleted = false`. Id and `created_at` are
    /// assigned by the storage layer.
    async fn insert(&self, name: &str, url: &str) -> Result<()>;

    /// Every record, deleted or not, newest id first.
    async fn list_all(&self) -> Result<Vec<PhotoRecord>>;
}

/// Primary entry point to the persistence layer.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes (or creates) a connection pool to the SQLite database located at
    /// the given URL (e.g. `sqlite:///var/lib/photos/photos.db`) and applies the
    /// embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS));

        // Each in-memory connection is its own database, so pin exactly one
        // and never recycle it.
        let pool_options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options
            .min_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    /// Connects to a file path via `sqlite://` scheme.
    pub async fn connect_file(path: &Path) -> Result<Self> {
        let url = format!("sqlite://{}", path.display());
        Self::connect(&url).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Inserts a single photo row inside its own transaction. The transaction
    /// (and the connection it holds) is returned to the pool on every exit
    /// path; an uncommitted transaction rolls back when dropped.
    pub async fn insert_photo(&self, photo: NewPhoto<'_>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(INSERT_PHOTO_SQL)
            .bind(photo.name)
            .bind(photo.url)
            .bind(false)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Lists all photos ordered by id descending.
    pub async fn list_photos(&self) -> Result<Vec<PhotoRecord>> {
        let mut conn = self.pool.acquire().await?;
        let mut rows = sqlx::query(LIST_PHOTOS_SQL).fetch(&mut *conn);

        let mut out = Vec::new();
        while let Some(row) = rows.try_next().await? {
            out.push(map_photo(row)?);
        }
        Ok(out)
    }
}

#[async_trait]
impl PhotoRepository for Database {
    async fn insert(&self, name: &str, url: &str) -> Result<()> {
        info!(photo_name = name, "adding photo metadata to database");
        match self.insert_photo(NewPhoto { name, url }).await {
            Ok(()) => {
                info!(photo_name = name, "added photo metadata to database");
                Ok(())
            }
            Err(err) => {
                error!(photo_name = name, error = %err, "failed to add photo metadata");
                Err(err)
            }
        }
    }

    async fn list_all(&self) -> Result<Vec<PhotoRecord>> {
        info!("listing photo metadata");
        match self.list_photos().await {
            Ok(photos) => {
                info!(count = photos.len(), "retrieved photo metadata");
                Ok(photos)
            }
            Err(err) => {
                error!(error = %err, "failed to list photo metadata");
                Err(err)
            }
        }
    }
}

/// SQLite's `CURRENT_TIMESTAMP` default yields `YYYY-MM-DD HH:MM:SS` in UTC;
/// RFC 3339 is accepted too for rows written by other tools.
fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|err| RepositoryError::MalformedRow(format!("invalid timestamp '{value}': {err}")))
}

fn map_photo(row: SqliteRow) -> Result<PhotoRecord> {
    let created_at: String = row.try_get("created_at")?;

    Ok(PhotoRecord {
        id: row.try_get("id")?,
        photo_name: row.try_get("photo_name")?,
        photo_url: row.try_get("photo_url")?,
        is_deleted: row.try_get("is_deleted")?,
        created_at: parse_timestamp(&created_at)?,
        deleted_at: row
            .try_get::<Option<String>, _>("deleted_at")?
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
    })
}

/// Input payload for the insert operation.
#[derive(Debug, Clone, Copy)]
pub struct NewPhoto<'a> {
    pub name: &'a str,
    pub url: &'a str,
}

/// Persisted photo metadata row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PhotoRecord {
    pub id: i64,
    pub photo_name: String,
    pub photo_url: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DB_URL: &str = "sqlite::memory:";

    async fn setup_db() -> Database {
        Database::connect(TEST_DB_URL).await.unwrap()
    }

    #[tokio::test]
    async fn list_on_empty_table_returns_empty_vec() {
        let db = setup_db().await;
        let photos = db.list_all().await.unwrap();
        assert!(photos.is_empty());
    }

    #[tokio::test]
    async fn insert_creates_live_row_with_storage_defaults() {
        let db = setup_db().await;
        let before = Utc::now() - chrono::Duration::seconds(5);

        db.insert("cat.jpg", "https://blobs.example/photos/cat.jpg")
            .await
            .unwrap();

        let photos = db.list_all().await.unwrap();
        assert_eq!(photos.len(), 1);
        let photo = &photos[0];
        assert_eq!(photo.photo_name, "cat.jpg");
        assert_eq!(photo.photo_url, "https://blobs.example/photos/cat.jpg");
        assert!(!photo.is_deleted);
        assert!(photo.deleted_at.is_none());
        assert!(photo.created_at >= before);
    }

    #[tokio::test]
    async fn list_orders_by_id_descending() {
        let db = setup_db().await;
        for name in ["a.png", "b.png", "c.png"] {
            db.insert(name, &format!("memory://{name}")).await.unwrap();
        }

        let photos = db.list_all().await.unwrap();
        let names: Vec<_> = photos.iter().map(|p| p.photo_name.as_str()).collect();
        assert_eq!(names, vec!["c.png", "b.png", "a.png"]);
        assert!(photos.windows(2).all(|pair| pair[0].id > pair[1].id));
    }

    #[tokio::test]
    async fn duplicate_names_produce_distinct_rows() {
        let db = setup_db().await;
        db.insert("same.jpg", "memory://same.jpg").await.unwrap();
        db.insert("same.jpg", "memory://same.jpg").await.unwrap();

        let photos = db.list_all().await.unwrap();
        assert_eq!(photos.len(), 2);
        assert_ne!(photos[0].id, photos[1].id);
    }

    #[tokio::test]
    async fn soft_deleted_rows_are_still_listed() {
        let db = setup_db().await;
        db.insert("gone.jpg", "memory://gone.jpg").await.unwrap();
        sqlx::query(
            "UPDATE photos_upload_service SET is_deleted = 1, deleted_at = '2024-03-01 10:00:00'",
        )
        .execute(db.pool())
        .await
        .unwrap();

        let photos = db.list_all().await.unwrap();
        assert_eq!(photos.len(), 1);
        assert!(photos[0].is_deleted);
        assert_eq!(
            photos[0].deleted_at.unwrap().to_rfc3339(),
            "2024-03-01T10:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn failed_insert_releases_connection() {
        let db = setup_db().await;
        sqlx::query("DROP TABLE photos_upload_service")
            .execute(db.pool())
            .await
            .unwrap();

        let err = db.insert("x.jpg", "memory://x.jpg").await.unwrap_err();
        assert!(matches!(err, RepositoryError::Database(_)));
        assert!(err.to_string().starts_with("Database connection error"));

        // The single pooled connection must be usable again; a leaked one
        // would surface as a pool timeout instead of the missing table.
        let err = db.list_all().await.unwrap_err();
        assert!(err.to_string().contains("no such table"));
    }

    #[test]
    fn parse_timestamp_accepts_sqlite_and_rfc3339() {
        let sqlite = parse_timestamp("2024-01-02 03:04:05").unwrap();
        let rfc = parse_timestamp("2024-01-02T03:04:05Z").unwrap();
        assert_eq!(sqlite, rfc);
        assert!(matches!(
            parse_timestamp("yesterday"),
            Err(RepositoryError::MalformedRow(_))
        ));
    }
}
