//! Candidate resolution
//!
//! Finds the remote entity a gazetteer record should be linked to:
//! - direct: the foreign id is already a remote item id
//! - search: full-text search for the entity holding the foreign id in a
//!   secondary property, excluding entities that already carry the target
//!   property
//!
//! Search takes the first hit only. The secondary identifier is assumed to be
//! unique remotely; additional hits are ignored.

use crate::claims::get_claims;
use crate::placetypes::{PlaceTypeAcceptanceIndex, TypeCheck};
use crate::transport::{ApiRequest, Method, Transport};
use crate::types::{CorrespondenceRecord, EntityId, ForeignId};
use gazlink_common::{Error, Result};
use serde::Deserialize;
use tracing::debug;

/// Property holding an entity's type membership
pub const INSTANCE_OF: &str = "P31";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    query: Option<SearchQuery>,
}

#[derive(Debug, Deserialize)]
struct SearchQuery {
    #[serde(default)]
    search: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    title: String,
}

/// Where a record led
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(EntityId),
    /// Search found no holder of the foreign id
    NoMatch,
}

/// Resolves records to remote entities and validates them
pub struct CandidateResolver<'a> {
    transport: &'a Transport,
    api_url: String,
    target_property: String,
}

impl<'a> CandidateResolver<'a> {
    pub fn new(
        transport: &'a Transport,
        api_url: impl Into<String>,
        target_property: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            api_url: api_url.into(),
            target_property: target_property.into(),
        }
    }

    pub async fn resolve(&self, record: &CorrespondenceRecord) -> Result<Resolution> {
        match &record.foreign_id {
            ForeignId::Entity(id) => Ok(Resolution::Found(id.clone())),
            ForeignId::Numeric(value) => {
                let property = record.foreign_source.secondary_property().ok_or_else(|| {
                    Error::InvalidInput(format!(
                        "{} ids cannot be resolved by search",
                        record.foreign_source
                    ))
                })?;
                self.search(property, &value.to_string()).await
            }
        }
    }

    /// Search for the entity whose `property` equals `value`
    pub async fn search(&self, property: &str, value: &str) -> Result<Resolution> {
        let query = search_expression(property, value, &self.target_property);
        let request = ApiRequest::action(Method::Get, &self.api_url, "query")
            .param("list", "search")
            .param("srsearch", &query)
            .param("srlimit", "1")
            .param("srinfo", "")
            .param("srprop", "");

        let response: SearchResponse = self.transport.request(&request).await?.decode()?;
        let first = response
            .query
            .and_then(|q| q.search.into_iter().next());

        match first {
            Some(hit) => {
                let entity = EntityId::parse(&hit.title).ok_or_else(|| {
                    Error::Decode(format!("search hit is not an item: {}", hit.title))
                })?;
                debug!(query = %query, entity = %entity, "Search resolved entity");
                Ok(Resolution::Found(entity))
            }
            None => {
                debug!(query = %query, "Search found nothing");
                Ok(Resolution::NoMatch)
            }
        }
    }

    /// Compare the entity's existing type claims with the record's place type
    pub async fn check_types(
        &self,
        record: &CorrespondenceRecord,
        entity: &EntityId,
        index: &PlaceTypeAcceptanceIndex,
    ) -> Result<TypeCheck> {
        let claims = get_claims(self.transport, &self.api_url, entity, INSTANCE_OF).await?;
        Ok(index.check(
            record.local_place_type.as_deref(),
            &claims.entity_values(),
        ))
    }
}

/// CirrusSearch expression: holds `property=value`, lacks `exclude`
pub fn search_expression(property: &str, value: &str, exclude: &str) -> String {
    format!(
        "haswbstatement:{}={} -haswbstatement:{}",
        property, value, exclude
    )
}
