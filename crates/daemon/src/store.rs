//! Durable per-video state, backed by SQLite.

use crate::record::{Page, StatusCounts, VideoRecord, VideoStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors from the state store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to create data directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row for {video_id}: {reason}")]
    CorruptRow { video_id: String, reason: String },
}

const UPSERT_SQL: &str = r#"
    INSERT INTO videos (video_id, title, channel, published, symlink_path, status, last_updated)
    VALUES (?, ?, ?, ?, ?, ?, ?)
    ON CONFLICT(video_id) DO UPDATE SET
        title = excluded.title,
        channel = excluded.channel,
        published = excluded.published,
        symlink_path = excluded.symlink_path,
        status = excluded.status,
        last_updated = excluded.last_updated
"#;

/// Table of video rows; one row per `video_id`.
#[derive(Debug, Clone)]
pub struct StateStore {
    pool: SqlitePool,
}

impl StateStore {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private in-memory database, used by tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        // Each connection to :memory: is its own database, so keep exactly one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS videos (
                video_id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                channel TEXT NOT NULL,
                published TEXT NOT NULL,
                symlink_path TEXT NOT NULL,
                status TEXT NOT NULL,
                last_updated TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_videos_status ON videos(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert_in(tx: &mut Transaction<'_, Sqlite>, record: &VideoRecord) -> Result<(), StoreError> {
        sqlx::query(UPSERT_SQL)
            .bind(&record.video_id)
            .bind(&record.title)
            .bind(&record.channel)
            .bind(&record.published)
            .bind(&record.symlink_path)
            .bind(record.status.as_str())
            .bind(&record.last_updated)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Replace the whole `linked` set with the rows of one reconciliation pass.
    ///
    /// Runs as one transaction: either every row of the pass lands or none do.
    /// `missing` rows for ids not seen in this pass are left alone.
    pub async fn replace_linked(&self, records: &[VideoRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM videos WHERE status = ?")
            .bind(VideoStatus::Linked.as_str())
            .execute(&mut *tx)
            .await?;

        for record in records {
            Self::upsert_in(&mut tx, record).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Insert or update a batch of rows atomically.
    pub async fn upsert_many(&self, records: &[VideoRecord]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for record in records {
            Self::upsert_in(&mut tx, record).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn upsert(&self, record: &VideoRecord) -> Result<(), StoreError> {
        self.upsert_many(std::slice::from_ref(record)).await
    }

    pub async fn get(&self, video_id: &str) -> Result<Option<VideoRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM videos WHERE video_id = ?")
            .bind(video_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Every row, newest publish date first within each channel.
    pub async fn all(&self) -> Result<Vec<VideoRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM videos ORDER BY channel ASC, published DESC, video_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn counts(&self) -> Result<StatusCounts, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(CASE WHEN status = 'linked' THEN 1 ELSE 0 END), 0) AS linked,
                COALESCE(SUM(CASE WHEN status = 'missing' THEN 1 ELSE 0 END), 0) AS missing
            FROM videos
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total: i64 = row.get("total");
        let linked: i64 = row.get("linked");
        let missing: i64 = row.get("missing");
        Ok(StatusCounts {
            total: total as u64,
            linked: linked as u64,
            missing: missing as u64,
        })
    }

    /// One page (1-based) of `missing` rows.
    pub async fn missing_page(&self, page: u32, per_page: u32) -> Result<Page<VideoRecord>, StoreError> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 500);
        let offset = (page as i64 - 1) * per_page as i64;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM videos WHERE status = ?")
            .bind(VideoStatus::Missing.as_str())
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT * FROM videos WHERE status = ? ORDER BY channel ASC, published DESC, video_id ASC LIMIT ? OFFSET ?",
        )
        .bind(VideoStatus::Missing.as_str())
        .bind(per_page as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let items = rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?;
        Ok(Page {
            items,
            page,
            per_page,
            total: total as u64,
        })
    }
}

fn record_from_row(row: &SqliteRow) -> Result<VideoRecord, StoreError> {
    let video_id: String = row.get("video_id");
    let status_raw: String = row.get("status");
    let status = VideoStatus::from_str(&status_raw).map_err(|reason| StoreError::CorruptRow {
        video_id: video_id.clone(),
        reason,
    })?;

    Ok(VideoRecord {
        video_id,
        title: row.get("title"),
        channel: row.get("channel"),
        published: row.get("published"),
        symlink_path: row.get("symlink_path"),
        status,
        last_updated: row.get("last_updated"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str, status: VideoStatus) -> VideoRecord {
        VideoRecord {
            video_id: id.to_string(),
            title: format!("Title {}", id),
            channel: "Chan".to_string(),
            published: "2020-01-02".to_string(),
            symlink_path: format!("/target/Chan/2020-01-02 - Title {}/video.mp4", id),
            status,
            last_updated: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_per_id() {
        let store = StateStore::in_memory().await.unwrap();
        store.upsert(&record("a", VideoStatus::Linked)).await.unwrap();
        store.upsert(&record("a", VideoStatus::Missing)).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, VideoStatus::Missing);
    }

    #[tokio::test]
    async fn test_replace_linked_drops_unseen_linked_rows_only() {
        let store = StateStore::in_memory().await.unwrap();
        store
            .upsert_many(&[
                record("gone", VideoStatus::Linked),
                record("orphan", VideoStatus::Missing),
            ])
            .await
            .unwrap();

        store
            .replace_linked(&[record("fresh", VideoStatus::Linked)])
            .await
            .unwrap();

        assert!(store.get("gone").await.unwrap().is_none());
        assert_eq!(
            store.get("orphan").await.unwrap().map(|r| r.status),
            Some(VideoStatus::Missing)
        );
        assert!(store.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_replace_linked_resolves_missing_row() {
        let store = StateStore::in_memory().await.unwrap();
        store.upsert(&record("x", VideoStatus::Missing)).await.unwrap();
        store
            .replace_linked(&[record("x", VideoStatus::Linked)])
            .await
            .unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(
            counts,
            StatusCounts {
                total: 1,
                linked: 1,
                missing: 0
            }
        );
    }

    #[tokio::test]
    async fn test_counts_on_empty_table() {
        let store = StateStore::in_memory().await.unwrap();
        assert_eq!(store.counts().await.unwrap(), StatusCounts::default());
    }

    #[tokio::test]
    async fn test_missing_page() {
        let store = StateStore::in_memory().await.unwrap();
        let rows: Vec<_> = (0..5)
            .map(|i| record(&format!("m{}", i), VideoStatus::Missing))
            .chain(std::iter::once(record("l", VideoStatus::Linked)))
            .collect();
        store.upsert_many(&rows).await.unwrap();

        let first = store.missing_page(1, 2).await.unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.items.len(), 2);
        assert_eq!(first.total_pages(), 3);
        assert!(first.items.iter().all(|r| r.status == VideoStatus::Missing));

        let last = store.missing_page(3, 2).await.unwrap();
        assert_eq!(last.items.len(), 1);

        let beyond = store.missing_page(9, 2).await.unwrap();
        assert!(beyond.items.is_empty());
    }

    #[tokio::test]
    async fn test_open_persists_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("videos.db");

        {
            let store = StateStore::open(&path).await.unwrap();
            store.upsert(&record("keep", VideoStatus::Linked)).await.unwrap();
        }

        let reopened = StateStore::open(&path).await.unwrap();
        assert!(reopened.get("keep").await.unwrap().is_some());
    }
}
