//! In-memory stand-in for the remote knowledge base
//!
//! Serves the handful of API actions the bot uses (tokens, login,
//! usercontribs, search, wbgetclaims, wbcreateclaim) plus the SPARQL
//! endpoint, over a map of entities and their claims. Every request is
//! recorded so tests can assert on what the bot actually sent.

use async_trait::async_trait;
use gazlink_bot::transport::{ApiRequest, ConnectionError, HttpBackend, RawResponse};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

pub const API_URL: &str = "https://kb.test/w/api.php";
pub const SPARQL_URL: &str = "https://query.kb.test/sparql";

const BOT_USER: &str = "GazlinkBot";
const BOT_PASSWORD: &str = "correct horse";

#[derive(Default)]
struct State {
    /// entity -> property -> values (strings, or item ids for entity values)
    entities: BTreeMap<String, HashMap<String, Vec<String>>>,
    contribs: Vec<String>,
    protected: HashSet<String>,
    /// root class -> every class that is a subclass of it (root included)
    subclasses: HashMap<String, Vec<String>>,
    pending_write_throttles: usize,
    logged_in: bool,
    session_expired: bool,
    /// Cookies never stick: every session is anonymous
    cookies_rejected: bool,
    /// Successful writes left before the session cookie is dropped
    writes_before_expiry: Option<usize>,
    claim_seq: usize,
    requests: Vec<ApiRequest>,
    searches: Vec<String>,
    writes: HashMap<String, usize>,
}

/// Fake remote; share it with `Arc` between the test and the transport
pub struct FakeWiki {
    state: Mutex<State>,
    contribs_page_size: usize,
}

impl FakeWiki {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            contribs_page_size: 2,
        }
    }

    pub fn username() -> &'static str {
        BOT_USER
    }

    pub fn password() -> &'static str {
        BOT_PASSWORD
    }

    /// Add an entity holding `property = value`
    pub fn with_claim(self, entity: &str, property: &str, value: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .entities
            .entry(entity.to_string())
            .or_default()
            .entry(property.to_string())
            .or_default()
            .push(value.to_string());
        self
    }

    /// Add an entity with no claims
    pub fn with_entity(self, entity: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .entities
            .entry(entity.to_string())
            .or_default();
        self
    }

    /// Record a past edit by the bot
    pub fn with_contrib(self, title: &str) -> Self {
        self.state.lock().unwrap().contribs.push(title.to_string());
        self
    }

    pub fn with_protected(self, entity: &str) -> Self {
        self.state.lock().unwrap().protected.insert(entity.to_string());
        self
    }

    pub fn with_subclasses(self, root: &str, classes: &[&str]) -> Self {
        self.state.lock().unwrap().subclasses.insert(
            root.to_string(),
            classes.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Answer the next `n` write attempts with a rate-limit error
    pub fn throttle_next_writes(&self, n: usize) {
        self.state.lock().unwrap().pending_write_throttles = n;
    }

    /// Login still succeeds, but every write token comes back anonymous
    pub fn reject_cookies(&self) {
        self.state.lock().unwrap().cookies_rejected = true;
    }

    /// Drop the session cookie once `n` more writes have succeeded; a new
    /// login restores it
    pub fn expire_session_after_writes(&self, n: usize) {
        self.state.lock().unwrap().writes_before_expiry = Some(n);
    }

    pub fn values(&self, entity: &str, property: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .entities
            .get(entity)
            .and_then(|claims| claims.get(property))
            .cloned()
            .unwrap_or_default()
    }

    /// Successful claim writes per entity
    pub fn writes(&self, entity: &str) -> usize {
        self.state.lock().unwrap().writes.get(entity).copied().unwrap_or(0)
    }

    pub fn total_writes(&self) -> usize {
        self.state.lock().unwrap().writes.values().sum()
    }

    /// Write attempts, including throttled and denied ones
    pub fn write_attempts(&self) -> usize {
        self.count_action("wbcreateclaim")
    }

    pub fn searches(&self) -> Vec<String> {
        self.state.lock().unwrap().searches.clone()
    }

    pub fn count_action(&self, action: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.param_value("action") == Some(action))
            .count()
    }

    fn handle(&self, request: &ApiRequest) -> Value {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        if request.url == SPARQL_URL {
            return sparql(&state, request.param_value("query").unwrap_or_default());
        }

        let param = |key: &str| request.param_value(key).unwrap_or_default().to_string();
        match param("action").as_str() {
            "query" if request.param_value("meta") == Some("tokens") => {
                if request.param_value("type") == Some("login") {
                    json!({"query": {"tokens": {"logintoken": "login+\\"}}})
                } else if state.logged_in && !state.session_expired && !state.cookies_rejected {
                    json!({"query": {"tokens": {"csrftoken": "csrf+\\"}}})
                } else {
                    json!({"query": {"tokens": {"csrftoken": "+\\"}}})
                }
            }
            "login" => {
                if param("lgname") == BOT_USER && param("lgpassword") == BOT_PASSWORD {
                    state.logged_in = true;
                    state.session_expired = false;
                    json!({"login": {"result": "Success", "lgusername": BOT_USER}})
                } else {
                    json!({"login": {"result": "Failed", "reason": "Incorrect username or password entered."}})
                }
            }
            "query" if request.param_value("list") == Some("usercontribs") => {
                let start: usize = param("uccontinue").parse().unwrap_or(0);
                let end = (start + self.contribs_page_size).min(state.contribs.len());
                let page: Vec<Value> = state.contribs[start..end]
                    .iter()
                    .map(|title| json!({"ns": 0, "title": title}))
                    .collect();
                if end < state.contribs.len() {
                    json!({
                        "continue": {"uccontinue": end.to_string(), "continue": "-||"},
                        "query": {"usercontribs": page}
                    })
                } else {
                    json!({"batchcomplete": true, "query": {"usercontribs": page}})
                }
            }
            "query" if request.param_value("list") == Some("search") => {
                let expression = param("srsearch");
                state.searches.push(expression.clone());
                let hits: Vec<Value> = search(&state, &expression)
                    .into_iter()
                    .map(|title| json!({"ns": 0, "title": title}))
                    .collect();
                json!({"batchcomplete": true, "query": {"search": hits}})
            }
            "wbgetclaims" => {
                let entity = param("entity");
                let property = param("property");
                match state.entities.get(&entity) {
                    None => json!({"error": {"code": "no-such-entity", "info": "Could not find an entity"}}),
                    Some(claims) => match claims.get(&property) {
                        Some(values) if !values.is_empty() => {
                            let statements: Vec<Value> =
                                values.iter().map(|v| statement(&property, v)).collect();
                            json!({"claims": {property: statements}})
                        }
                        _ => json!({"claims": []}),
                    },
                }
            }
            "wbcreateclaim" => create_claim(&mut state, request),
            other => json!({"error": {"code": "badvalue", "info": format!("unknown action {}", other)}}),
        }
    }
}

#[async_trait]
impl HttpBackend for FakeWiki {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, ConnectionError> {
        Ok(RawResponse::json(200, &self.handle(request)))
    }
}

fn create_claim(state: &mut State, request: &ApiRequest) -> Value {
    let param = |key: &str| request.param_value(key).unwrap_or_default().to_string();

    if param("token") != "csrf+\\" || state.session_expired || state.cookies_rejected {
        return json!({"error": {"code": "badtoken", "info": "Invalid CSRF token."}});
    }
    if state.pending_write_throttles > 0 {
        state.pending_write_throttles -= 1;
        return json!({"error": {
            "code": "failed-save",
            "info": "As an anti-abuse measure, you are limited from performing this action too many times",
            "messages": [{"name": "actionthrottledtext", "parameters": []}]
        }});
    }

    let entity = param("entity");
    if state.protected.contains(&entity) {
        return json!({"error": {
            "code": "permissiondenied",
            "info": "You do not have the permissions needed to carry out this action.",
            "messages": [{"name": "protectedpagetext", "parameters": []}]
        }});
    }
    if !state.entities.contains_key(&entity) {
        return json!({"error": {"code": "no-such-entity", "info": "Could not find an entity"}});
    }

    let value: String = match serde_json::from_str(&param("value")) {
        Ok(value) => value,
        Err(_) => return json!({"error": {"code": "invalid-snak", "info": "Invalid snak data."}}),
    };
    let property = param("property");
    state
        .entities
        .entry(entity.clone())
        .or_default()
        .entry(property.clone())
        .or_default()
        .push(value.clone());
    state.contribs.push(entity.clone());
    *state.writes.entry(entity.clone()).or_default() += 1;
    match state.writes_before_expiry {
        Some(left) if left <= 1 => {
            state.writes_before_expiry = None;
            state.session_expired = true;
        }
        Some(left) => state.writes_before_expiry = Some(left - 1),
        None => {}
    }
    state.claim_seq += 1;

    json!({
        "success": 1,
        "pageinfo": {"lastrevid": 1000 + state.claim_seq},
        "claim": {
            "id": format!("{}${}", entity, state.claim_seq),
            "mainsnak": statement(&property, &value)["mainsnak"].clone()
        }
    })
}

fn statement(property: &str, value: &str) -> Value {
    let datavalue = if value.starts_with('Q') {
        json!({"value": {"entity-type": "item", "id": value}, "type": "wikibase-entityid"})
    } else {
        json!({"value": value, "type": "string"})
    };
    json!({
        "mainsnak": {"snaktype": "value", "property": property, "datavalue": datavalue},
        "type": "statement",
        "rank": "normal"
    })
}

/// Evaluate `haswbstatement:P=V -haswbstatement:X`
fn search(state: &State, expression: &str) -> Vec<String> {
    let mut required: Option<(String, String)> = None;
    let mut excluded: Vec<String> = Vec::new();

    for term in expression.split_whitespace() {
        if let Some(property) = term.strip_prefix("-haswbstatement:") {
            excluded.push(property.to_string());
        } else if let Some(pair) = term.strip_prefix("haswbstatement:") {
            if let Some((property, value)) = pair.split_once('=') {
                required = Some((property.to_string(), value.to_string()));
            }
        }
    }

    let Some((property, value)) = required else {
        return Vec::new();
    };
    state
        .entities
        .iter()
        .filter(|(_, claims)| {
            claims
                .get(&property)
                .map(|values| values.contains(&value))
                .unwrap_or(false)
        })
        .filter(|(_, claims)| {
            excluded
                .iter()
                .all(|p| claims.get(p).map(|v| v.is_empty()).unwrap_or(true))
        })
        .map(|(entity, _)| entity.clone())
        .collect()
}

fn sparql(state: &State, query: &str) -> Value {
    let mut classes: Vec<&String> = state
        .subclasses
        .iter()
        .filter(|(root, _)| query.contains(&format!("wd:{} ", root)))
        .flat_map(|(_, classes)| classes.iter())
        .collect();
    classes.sort();
    classes.dedup();

    let bindings: Vec<Value> = classes
        .into_iter()
        .map(|class| {
            json!({"class": {"type": "uri", "value": format!("http://www.wikidata.org/entity/{}", class)}})
        })
        .collect();
    json!({"head": {"vars": ["class"]}, "results": {"bindings": bindings}})
}
