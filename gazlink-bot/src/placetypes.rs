//! Place-type acceptance index
//!
//! Maps each gazetteer place type to the set of remote classes an entity may
//! be an instance of. Built once per run from a transitive-subclass query
//! per configured root class, then held as an immutable snapshot.

use crate::transport::{ApiRequest, Transport};
use crate::types::EntityId;
use gazlink_common::{Error, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    results: SparqlResults,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<HashMap<String, SparqlTerm>>,
}

#[derive(Debug, Deserialize)]
struct SparqlTerm {
    value: String,
}

/// Verdict of a type-membership check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeCheck {
    Accepted,
    /// Existing type claims outside the acceptance set
    Conflict(Vec<EntityId>),
    /// Place type missing or not in the index
    Unmapped,
}

/// Snapshot of acceptable classes per place type
#[derive(Debug, Clone, Default)]
pub struct PlaceTypeAcceptanceIndex {
    classes: HashMap<String, HashSet<EntityId>>,
}

impl PlaceTypeAcceptanceIndex {
    /// Build directly from known class sets
    pub fn from_classes(classes: HashMap<String, HashSet<EntityId>>) -> Self {
        Self { classes }
    }

    /// Query every subclass (transitively, roots included) of each place
    /// type's root classes
    pub async fn build(
        transport: &Transport,
        sparql_url: &str,
        roots: &BTreeMap<String, Vec<EntityId>>,
    ) -> Result<Self> {
        let mut classes = HashMap::with_capacity(roots.len());

        for (place_type, root_ids) in roots {
            if root_ids.is_empty() {
                continue;
            }
            let query = subclass_query(root_ids);
            let request = ApiRequest::get(sparql_url)
                .param("query", query)
                .param("format", "json");
            let response: SparqlResponse = transport
                .request(&request)
                .await?
                .decode()
                .map_err(|e| Error::Remote(format!("subclass query for {}: {}", place_type, e)))?;

            let accepted: HashSet<EntityId> = response
                .results
                .bindings
                .iter()
                .filter_map(|row| row.get("class"))
                .filter_map(|term| EntityId::parse(&term.value))
                .collect();

            info!(place_type = %place_type, classes = accepted.len(), "Loaded acceptable classes");
            classes.insert(place_type.clone(), accepted);
        }

        Ok(Self { classes })
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn accepts(&self, place_type: &str, class: &EntityId) -> bool {
        self.classes
            .get(place_type)
            .map(|set| set.contains(class))
            .unwrap_or(false)
    }

    /// Reject if any existing type claim falls outside the acceptance set
    ///
    /// An entity with no type claims at all is accepted.
    pub fn check(&self, place_type: Option<&str>, existing: &[EntityId]) -> TypeCheck {
        let accepted = match place_type.and_then(|pt| self.classes.get(pt)) {
            Some(accepted) => accepted,
            None => return TypeCheck::Unmapped,
        };

        let conflicts: Vec<EntityId> = existing
            .iter()
            .filter(|class| !accepted.contains(*class))
            .cloned()
            .collect();

        if conflicts.is_empty() {
            TypeCheck::Accepted
        } else {
            TypeCheck::Conflict(conflicts)
        }
    }
}

fn subclass_query(roots: &[EntityId]) -> String {
    let values = roots
        .iter()
        .map(|id| format!("wd:{}", id))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "SELECT DISTINCT ?class WHERE {{ VALUES ?root {{ {} }} ?class wdt:P279* ?root . }}",
        values
    )
}
