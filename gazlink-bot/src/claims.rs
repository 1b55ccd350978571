//! Claim reading and writing
//!
//! Reads go through `wbgetclaims`; writes through `wbcreateclaim` with a
//! freshly minted write token. A failed write is reported as a
//! [`WriteResult`] for logging, never escalated, so one bad candidate cannot
//! abort the batch. The only `Err` a write surfaces is a lost session.

use crate::session::{Session, SessionManager};
use crate::transport::{ApiRequest, ApiResponse, ErrorEnvelope, Method, Transport};
use crate::types::EntityId;
use gazlink_common::{Error, Result};
use serde_json::Value;
use tracing::{error, info, warn};

/// Statements found for one property of one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExistingClaims {
    /// Number of statements, including `somevalue`/`novalue` snaks
    pub count: usize,
    /// Plain values: strings as-is, entity values by id
    pub values: Vec<String>,
}

impl ExistingClaims {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Values that parse as item ids
    pub fn entity_values(&self) -> Vec<EntityId> {
        self.values.iter().filter_map(|v| EntityId::parse(v)).collect()
    }
}

/// Read the statements of `property` on `entity`
///
/// A response without a `claims` map is treated as "no claim" but logged
/// at error level: for an entity that exists it signals remote inconsistency.
pub async fn get_claims(
    transport: &Transport,
    api_url: &str,
    entity: &EntityId,
    property: &str,
) -> Result<ExistingClaims> {
    let request = ApiRequest::action(Method::Get, api_url, "wbgetclaims")
        .param("entity", entity.as_str())
        .param("property", property);
    let payload = transport.request(&request).await?.into_payload()?;

    let claims = match payload.get("claims") {
        Some(Value::Object(map)) => map,
        // formatversion=2 renders an empty map as []
        Some(Value::Array(list)) if list.is_empty() => return Ok(ExistingClaims::default()),
        _ => {
            error!(
                entity = %entity,
                property,
                "Claims map missing from wbgetclaims response, treating as no claim"
            );
            return Ok(ExistingClaims::default());
        }
    };

    let statements = match claims.get(property).and_then(Value::as_array) {
        Some(statements) => statements,
        None => return Ok(ExistingClaims::default()),
    };

    let values = statements
        .iter()
        .filter_map(|statement| statement.pointer("/mainsnak/datavalue/value"))
        .filter_map(|value| match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("id").and_then(Value::as_str).map(str::to_string),
            _ => None,
        })
        .collect();

    Ok(ExistingClaims {
        count: statements.len(),
        values,
    })
}

/// Outcome of a create-claim write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteResult {
    Created { claim_id: Option<String> },
    PermissionDenied(ErrorEnvelope),
    Rejected(ErrorEnvelope),
    Failed(String),
}

impl WriteResult {
    pub fn is_success(&self) -> bool {
        matches!(self, WriteResult::Created { .. })
    }
}

/// Checks for and creates claims on remote entities
pub struct ClaimWriter<'a> {
    transport: &'a Transport,
    sessions: &'a SessionManager<'a>,
    api_url: String,
    edit_summary: Option<String>,
}

impl<'a> ClaimWriter<'a> {
    pub fn new(
        transport: &'a Transport,
        sessions: &'a SessionManager<'a>,
        api_url: impl Into<String>,
        edit_summary: Option<String>,
    ) -> Self {
        Self {
            transport,
            sessions,
            api_url: api_url.into(),
            edit_summary,
        }
    }

    pub async fn existing_claims(&self, entity: &EntityId, property: &str) -> Result<ExistingClaims> {
        get_claims(self.transport, &self.api_url, entity, property).await
    }

    pub async fn has_claim(&self, entity: &EntityId, property: &str) -> Result<bool> {
        Ok(!self.existing_claims(entity, property).await?.is_empty())
    }

    /// Create a string-valued claim
    ///
    /// Returns `Err(Error::Auth)` only when the session is gone; every other
    /// failure comes back as a non-success [`WriteResult`].
    pub async fn create_claim(
        &self,
        entity: &EntityId,
        property: &str,
        value: &str,
        session: &Session,
    ) -> Result<WriteResult> {
        let token = match self.sessions.fresh_write_token(session).await {
            Ok(token) => token,
            Err(Error::Auth(reason)) => return Err(Error::Auth(reason)),
            Err(e) => return Ok(WriteResult::Failed(format!("write token: {}", e))),
        };

        // String datavalues are sent as JSON string literals
        let quoted = Value::String(value.to_string()).to_string();

        let mut request = ApiRequest::action(Method::Post, &self.api_url, "wbcreateclaim")
            .param("entity", entity.as_str())
            .param("snaktype", "value")
            .param("property", property)
            .param("value", quoted)
            .param("bot", "1");
        if let Some(summary) = &self.edit_summary {
            request = request.param("summary", summary);
        }
        request = request.param("token", token);

        info!(entity = %entity, property, value, "Creating claim");

        let response = match self.transport.request(&request).await {
            Ok(response) => response,
            Err(e) => return Ok(WriteResult::Failed(e.to_string())),
        };

        let result = match response {
            ApiResponse::Ok(payload) => {
                if payload.get("success").and_then(Value::as_i64) == Some(1)
                    || payload.get("success").and_then(Value::as_bool) == Some(true)
                {
                    let claim_id = payload
                        .pointer("/claim/id")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    WriteResult::Created { claim_id }
                } else {
                    WriteResult::Failed(format!("unexpected response: {}", payload))
                }
            }
            ApiResponse::Error(envelope) if envelope.is_permission_denied() => {
                WriteResult::PermissionDenied(envelope)
            }
            ApiResponse::Error(envelope) => WriteResult::Rejected(envelope),
        };

        match &result {
            WriteResult::Created { claim_id } => {
                info!(entity = %entity, property, claim_id = ?claim_id, "Claim created")
            }
            other => warn!(entity = %entity, property, result = ?other, "Claim not created"),
        }

        Ok(result)
    }
}
