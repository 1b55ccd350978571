//! Edited-set tracking
//!
//! Builds the dedup universe from two sources of evidence: the agent's own
//! contribution history on the remote system and the local link table. The
//! negative cache is loaded alongside it.

use crate::session::Session;
use crate::store::LinkStore;
use crate::transport::{ApiRequest, Method, Transport};
use crate::types::{DedupUniverse, EntityId, NegativeCache};
use gazlink_common::Result;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct ContribsPage {
    #[serde(default)]
    query: Option<ContribsQuery>,
    #[serde(default, rename = "continue")]
    continuation: Option<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct ContribsQuery {
    #[serde(default)]
    usercontribs: Vec<Contrib>,
}

#[derive(Debug, Deserialize)]
struct Contrib {
    title: String,
}

/// Everything known before the first candidate is touched
#[derive(Debug, Clone, Default)]
pub struct KnownState {
    pub universe: DedupUniverse,
    pub negative: NegativeCache,
    /// Local ids that already have a persisted link
    pub linked_local_ids: HashSet<i64>,
}

/// Page through the agent's main-namespace contributions
///
/// Terminates when the remote stops returning a continuation cursor. An
/// empty first page yields an empty set.
pub async fn load_edited_set(
    transport: &Transport,
    api_url: &str,
    session: &Session,
) -> Result<HashSet<EntityId>> {
    let mut edited = HashSet::new();
    let mut cursor: Option<Map<String, Value>> = None;
    let mut pages = 0usize;

    loop {
        let mut request = ApiRequest::action(Method::Get, api_url, "query")
            .param("list", "usercontribs")
            .param("uclimit", "max")
            .param("ucnamespace", "0")
            .param("ucuser", &session.username)
            .param("ucprop", "title");
        if let Some(cursor) = &cursor {
            for (key, value) in cursor {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.param(key.as_str(), value);
            }
        }

        let page: ContribsPage = transport.request(&request).await?.decode()?;
        pages += 1;

        let contribs = page.query.map(|q| q.usercontribs).unwrap_or_default();
        edited.extend(contribs.iter().filter_map(|c| EntityId::parse(&c.title)));
        debug!(page = pages, total = edited.len(), "Loaded contribution page");

        match page.continuation {
            Some(next) if !next.is_empty() => cursor = Some(next),
            _ => break,
        }
    }

    info!(
        pages,
        entities = edited.len(),
        username = %session.username,
        "Loaded edited set from contribution history"
    );
    Ok(edited)
}

/// Foreign ids previously confirmed to have no remote entity
pub async fn load_negative_cache(store: &LinkStore) -> Result<NegativeCache> {
    let ids = store.negative_ids().await?;
    Ok(ids.into_iter().collect())
}

/// Entities with a persisted link
pub async fn load_link_records(store: &LinkStore) -> Result<HashSet<EntityId>> {
    let links = store.links().await?;
    Ok(links.into_iter().map(|link| link.entity).collect())
}

/// Union remote history and local links into the dedup universe
pub async fn load_known_state(
    transport: &Transport,
    api_url: &str,
    session: &Session,
    store: &LinkStore,
) -> Result<KnownState> {
    let edited = load_edited_set(transport, api_url, session).await?;
    let linked = load_link_records(store).await?;
    let linked_local_ids = store.linked_local_ids().await?;
    let negative = load_negative_cache(store).await?;

    let mut universe = DedupUniverse::new();
    universe.extend(edited);
    universe.extend(linked);

    info!(
        universe = universe.len(),
        negative = negative.len(),
        "Dedup universe ready"
    );

    Ok(KnownState {
        universe,
        negative,
        linked_local_ids,
    })
}
