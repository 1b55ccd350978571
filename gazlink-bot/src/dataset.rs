//! Gazetteer dataset collaborator
//!
//! Read-only access to the bulk gazetteer: the remote file inventory, and the
//! concordance rows of a locally materialized SQLite distribution.

use crate::transport::{ApiRequest, Transport};
use crate::types::{CorrespondenceRecord, ForeignSource};
use async_trait::async_trait;
use gazlink_common::Result;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{info, warn};

/// One file listed in the distribution inventory
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct InventoryEntry {
    pub name: String,
    pub name_compressed: String,
    #[serde(alias = "sha1_compressed", alias = "sha256_compressed")]
    pub checksum: String,
    pub repo: String,
    #[serde(alias = "lastmodified")]
    pub last_modified: String,
}

/// Fetch the distribution inventory
pub async fn list_files(transport: &Transport, inventory_url: &str) -> Result<Vec<InventoryEntry>> {
    let request = ApiRequest::get(inventory_url);
    let entries: Vec<InventoryEntry> = transport.request(&request).await?.decode()?;
    info!(files = entries.len(), "Fetched dataset inventory");
    Ok(entries)
}

/// Source of correspondence records
#[async_trait]
pub trait Dataset: Send + Sync {
    async fn correspondences(&self, source: ForeignSource) -> Result<Vec<CorrespondenceRecord>>;
}

/// Gazetteer SQLite distribution opened read-only
pub struct SqliteDataset {
    pool: SqlitePool,
}

impl SqliteDataset {
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = gazlink_common::db::open_readonly(path).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Dataset for SqliteDataset {
    /// Rows come back oldest first so later rows win when folded by local id
    async fn correspondences(&self, source: ForeignSource) -> Result<Vec<CorrespondenceRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id AS id, CAST(c.other_id AS TEXT) AS other_id, s.placetype AS placetype
            FROM concordances c
            LEFT JOIN spr s ON s.id = c.id
            WHERE c.other_source = ?
            ORDER BY c.lastmodified, c.rowid
            "#,
        )
        .bind(source.concordance_key())
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        let mut skipped = 0usize;
        for row in rows {
            let local_id: i64 = row.try_get("id")?;
            let other_id: Option<String> = row.try_get("other_id")?;
            let place_type: Option<String> = row.try_get("placetype")?;

            match other_id.as_deref().and_then(|raw| source.parse_id(raw)) {
                Some(foreign_id) => records.push(CorrespondenceRecord {
                    local_id,
                    local_place_type: place_type,
                    foreign_id,
                    foreign_source: source,
                }),
                None => skipped += 1,
            }
        }

        if skipped > 0 {
            warn!(source = %source, skipped, "Skipped concordances with unparseable ids");
        }
        info!(source = %source, records = records.len(), "Read correspondences");
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::{ok, ScriptedBackend};
    use crate::transport::RetryPolicy;
    use crate::types::{EntityId, ForeignId};
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn fixture() -> SqliteDataset {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query("CREATE TABLE spr (id INTEGER PRIMARY KEY, placetype TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE concordances (id INTEGER, other_id TEXT, other_source TEXT, lastmodified INTEGER)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query("INSERT INTO spr VALUES (101748953, 'locality'), (85633111, 'country')")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            r#"INSERT INTO concordances VALUES
                (101748953, '2950159', 'gn:id', 20),
                (101748953, 'Q64', 'wd:id', 20),
                (85633111, '2921044', 'gn:id', 10),
                (85633111, 'n/a', 'gn:id', 30),
                (999, 'Q1', 'wd:id', 5)"#,
        )
        .execute(&pool)
        .await
        .unwrap();
        SqliteDataset::from_pool(pool)
    }

    #[tokio::test]
    async fn test_geonames_correspondences_in_modification_order() {
        let dataset = fixture().await;

        let records = dataset.correspondences(ForeignSource::GeoNames).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].local_id, 85633111);
        assert_eq!(records[0].local_place_type.as_deref(), Some("country"));
        assert_eq!(records[1].foreign_id, ForeignId::Numeric(2950159));
    }

    #[tokio::test]
    async fn test_wikidata_correspondences_without_spr_row() {
        let dataset = fixture().await;

        let records = dataset.correspondences(ForeignSource::Wikidata).await.unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].local_id, 999);
        assert_eq!(records[0].local_place_type, None);
        assert_eq!(
            records[1].foreign_id,
            ForeignId::Entity(EntityId::parse("Q64").unwrap())
        );
    }

    #[tokio::test]
    async fn test_list_files_decodes_inventory() {
        let backend = ScriptedBackend::new(vec![ok(json!([
            {
                "name": "whosonfirst-data-admin-latest.db",
                "name_compressed": "whosonfirst-data-admin-latest.db.bz2",
                "sha256_compressed": "ab12",
                "repo": "whosonfirst-data-admin",
                "last_modified": "2024-01-01T00:00:00Z"
            }
        ]))]);
        let transport = Transport::new(backend, RetryPolicy::default());

        let files = list_files(&transport, "https://dist.test/inventory.json")
            .await
            .unwrap();

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].checksum, "ab12");
        assert_eq!(files[0].repo, "whosonfirst-data-admin");
    }
}
