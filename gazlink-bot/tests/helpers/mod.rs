//! Test helper utilities
//!
//! Shared fixtures for the reconciliation integration tests: a fake remote,
//! an in-memory dataset, and temporary link stores.

#![allow(dead_code)]

pub mod fake_wiki;

use async_trait::async_trait;
use gazlink_bot::dataset::Dataset;
use gazlink_bot::{
    BotConfig, CorrespondenceRecord, Credentials, EntityId, ForeignId, ForeignSource, LinkStore,
    RetryPolicy, Transport,
};
use gazlink_common::Result;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub use fake_wiki::{FakeWiki, API_URL, SPARQL_URL};

/// Short waits so retry paths finish in milliseconds of real time
pub const TEST_THROTTLE_WAIT: Duration = Duration::from_millis(50);

/// Dataset serving a fixed list of records
pub struct VecDataset {
    records: Vec<CorrespondenceRecord>,
}

impl VecDataset {
    pub fn new(records: Vec<CorrespondenceRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl Dataset for VecDataset {
    async fn correspondences(&self, source: ForeignSource) -> Result<Vec<CorrespondenceRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.foreign_source == source)
            .cloned()
            .collect())
    }
}

/// Create a link store in a temporary directory
///
/// Returns (TempDir, LinkStore) - TempDir must be kept alive for duration of test
pub async fn create_test_store() -> (TempDir, LinkStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = LinkStore::open(&temp_dir.path().join("gazlink.db"))
        .await
        .unwrap();
    (temp_dir, store)
}

pub fn transport_for(wiki: &Arc<FakeWiki>) -> Transport {
    Transport::new(
        wiki.clone(),
        RetryPolicy {
            base_backoff: Duration::from_millis(1),
            throttle_wait: TEST_THROTTLE_WAIT,
        },
    )
}

pub fn test_config(source: ForeignSource) -> BotConfig {
    BotConfig {
        api_url: API_URL.to_string(),
        sparql_url: SPARQL_URL.to_string(),
        username: FakeWiki::username().to_string(),
        source,
        ..BotConfig::default()
    }
}

pub fn credentials() -> Credentials {
    Credentials {
        username: FakeWiki::username().to_string(),
        password: FakeWiki::password().to_string(),
    }
}

pub fn wrong_credentials() -> Credentials {
    Credentials {
        username: FakeWiki::username().to_string(),
        password: "wrong".to_string(),
    }
}

pub fn q(id: &str) -> EntityId {
    EntityId::parse(id).unwrap()
}

/// `wd:id` record
pub fn direct(local_id: i64, entity: &str) -> CorrespondenceRecord {
    CorrespondenceRecord {
        local_id,
        local_place_type: Some("locality".to_string()),
        foreign_id: ForeignId::Entity(q(entity)),
        foreign_source: ForeignSource::Wikidata,
    }
}

/// `gn:id` record
pub fn geonames(local_id: i64, geonames_id: i64) -> CorrespondenceRecord {
    CorrespondenceRecord {
        local_id,
        local_place_type: Some("locality".to_string()),
        foreign_id: ForeignId::Numeric(geonames_id),
        foreign_source: ForeignSource::GeoNames,
    }
}
