//! Local persisted store
//!
//! Two append-only tables:
//! - `map(wd, wof)` - links already made or discovered
//! - `negative(id)` - foreign ids with no remote counterpart
//!
//! Every insert is its own autocommitted statement, so a link is durable
//! before the driver moves on to the next candidate.

use crate::types::{EntityId, LinkRecord};
use gazlink_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Handle to the link/negative-cache database
#[derive(Clone)]
pub struct LinkStore {
    pool: SqlitePool,
}

impl LinkStore {
    /// Open or create the store at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        let pool = gazlink_common::db::init_database(db_path).await?;
        Self::from_pool(pool).await
    }

    /// Wrap an existing pool, creating tables if needed
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        init_tables(&pool).await?;
        Ok(Self { pool })
    }

    /// Record a link; re-recording an existing pair is a no-op
    pub async fn insert_link(&self, link: &LinkRecord) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO map (wd, wof) VALUES (?, ?)")
            .bind(link.entity.as_str())
            .bind(link.local_id)
            .execute(&self.pool)
            .await?;

        let inserted = result.rows_affected() > 0;
        debug!(entity = %link.entity, local_id = link.local_id, inserted, "Persisted link");
        Ok(inserted)
    }

    /// Record a foreign id as having no remote entity
    pub async fn insert_negative(&self, foreign_id: i64) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO negative (id) VALUES (?)")
            .bind(foreign_id)
            .execute(&self.pool)
            .await?;

        let inserted = result.rows_affected() > 0;
        debug!(foreign_id, inserted, "Persisted negative cache entry");
        Ok(inserted)
    }

    /// All persisted links
    ///
    /// Rows whose entity column is not a valid item id are skipped with a warning.
    pub async fn links(&self) -> Result<Vec<LinkRecord>> {
        let rows = sqlx::query("SELECT wd, wof FROM map ORDER BY wof, wd")
            .fetch_all(&self.pool)
            .await?;

        let mut links = Vec::with_capacity(rows.len());
        for row in rows {
            let wd: String = row.try_get("wd")?;
            let wof: i64 = row.try_get("wof")?;
            match EntityId::parse(&wd) {
                Some(entity) => links.push(LinkRecord {
                    entity,
                    local_id: wof,
                }),
                None => warn!(wd = %wd, wof, "Ignoring malformed link row"),
            }
        }
        Ok(links)
    }

    /// Local ids that have at least one persisted link
    pub async fn linked_local_ids(&self) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT DISTINCT wof FROM map")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().collect())
    }

    /// All negative-cache entries
    pub async fn negative_ids(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM negative ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    /// (links, negatives) row counts
    pub async fn counts(&self) -> Result<(i64, i64)> {
        let links: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM map")
            .fetch_one(&self.pool)
            .await?;
        let negatives: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM negative")
            .fetch_one(&self.pool)
            .await?;
        Ok((links, negatives))
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS map (
            wd TEXT NOT NULL,
            wof INTEGER NOT NULL,
            PRIMARY KEY (wd, wof)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS negative (
            id INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await?;

    info!("Store tables initialized (map, negative)");
    Ok(())
}
