//! Authenticated session management
//!
//! Login is a two-step exchange: fetch a login token, then post credentials
//! with it. The session cookie returned by the remote lives in the HTTP
//! backend's cookie store; the [`Session`] value is threaded explicitly to
//! every writer so no credential state is ambient.
//!
//! Write (CSRF) tokens are single-use and fetched fresh before every write.

use crate::transport::{ApiRequest, Method, Transport};
use chrono::{DateTime, Utc};
use gazlink_common::{Error, Result};
use serde::Deserialize;
use tracing::{debug, error, info};

/// Logged-in agent session
#[derive(Debug, Clone)]
pub struct Session {
    pub username: String,
    pub login_token: String,
    pub logged_in_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct TokensResponse {
    query: TokensQuery,
}

#[derive(Debug, Deserialize)]
struct TokensQuery {
    tokens: Tokens,
}

#[derive(Debug, Deserialize)]
struct Tokens {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    login: LoginResult,
}

#[derive(Debug, Deserialize)]
struct LoginResult {
    result: String,
    reason: Option<String>,
    lgusername: Option<String>,
}

/// Acquires sessions and write tokens against one API endpoint
pub struct SessionManager<'a> {
    transport: &'a Transport,
    api_url: String,
}

impl<'a> SessionManager<'a> {
    pub fn new(transport: &'a Transport, api_url: impl Into<String>) -> Self {
        Self {
            transport,
            api_url: api_url.into(),
        }
    }

    /// Log in, failing with `Error::Auth` unless the remote reports success
    ///
    /// There is no retry for rejected credentials.
    pub async fn login(&self, username: &str, password: &str) -> Result<Session> {
        info!(username, "Logging in");

        let request = ApiRequest::action(Method::Get, &self.api_url, "query")
            .param("meta", "tokens")
            .param("type", "login");
        let tokens: TokensResponse = self.transport.request(&request).await?.decode()?;
        let login_token = tokens
            .query
            .tokens
            .logintoken
            .ok_or_else(|| Error::Auth("no login token in response".to_string()))?;

        let request = ApiRequest::action(Method::Post, &self.api_url, "login")
            .param("lgname", username)
            .param("lgpassword", password)
            .param("lgtoken", &login_token);
        let response: LoginResponse = self
            .transport
            .request(&request)
            .await?
            .decode()
            .map_err(|e| Error::Auth(format!("login response unusable: {}", e)))?;

        if response.login.result != "Success" {
            let reason = response.login.reason.unwrap_or_default();
            error!(username, result = %response.login.result, reason = %reason, "Login rejected");
            return Err(Error::Auth(format!(
                "{}: {}",
                response.login.result, reason
            )));
        }

        let username = response
            .login
            .lgusername
            .unwrap_or_else(|| username.to_string());
        info!(username = %username, "Logged in");

        Ok(Session {
            username,
            login_token,
            logged_in_at: Utc::now(),
        })
    }

    /// Fetch a new single-use write token
    pub async fn fresh_write_token(&self, session: &Session) -> Result<String> {
        let request =
            ApiRequest::action(Method::Get, &self.api_url, "query").param("meta", "tokens");
        let tokens: TokensResponse = self.transport.request(&request).await?.decode()?;
        let token = tokens
            .query
            .tokens
            .csrftoken
            .ok_or_else(|| Error::Decode("no csrf token in response".to_string()))?;

        // "+\\" is the anonymous token: the session cookie is gone
        if token == "+\\" {
            return Err(Error::Auth(format!(
                "session for {} is no longer logged in",
                session.username
            )));
        }

        debug!(username = %session.username, "Acquired write token");
        Ok(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::tests::{ok, ScriptedBackend};
    use crate::transport::RetryPolicy;
    use serde_json::json;

    const API: &str = "https://kb.test/w/api.php";

    fn login_token() -> serde_json::Value {
        json!({"query": {"tokens": {"logintoken": "abc+\\"}}})
    }

    #[tokio::test]
    async fn test_login_success() {
        let backend = ScriptedBackend::new(vec![
            ok(login_token()),
            ok(json!({"login": {"result": "Success", "lgusername": "GazlinkBot"}})),
        ]);
        let transport = Transport::new(backend.clone(), RetryPolicy::default());

        let session = SessionManager::new(&transport, API)
            .login("GazlinkBot@linker", "secret")
            .await
            .unwrap();

        assert_eq!(session.username, "GazlinkBot");
        assert_eq!(session.login_token, "abc+\\");

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests[0].param_value("type"), Some("login"));
        assert_eq!(requests[1].method, Method::Post);
        assert_eq!(requests[1].param_value("lgtoken"), Some("abc+\\"));
        assert_eq!(requests[1].param_value("lgpassword"), Some("secret"));
    }

    #[tokio::test]
    async fn test_login_failure_is_fatal() {
        let backend = ScriptedBackend::new(vec![
            ok(login_token()),
            ok(json!({"login": {"result": "Failed", "reason": "Incorrect password"}})),
        ]);
        let transport = Transport::new(backend.clone(), RetryPolicy::default());

        let result = SessionManager::new(&transport, API)
            .login("GazlinkBot", "wrong")
            .await;

        assert!(matches!(result, Err(Error::Auth(_))));
        // No retry for credential failure
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_fresh_write_token_is_fetched_every_time() {
        let backend = ScriptedBackend::new(vec![
            ok(json!({"query": {"tokens": {"csrftoken": "t1+\\"}}})),
            ok(json!({"query": {"tokens": {"csrftoken": "t2+\\"}}})),
        ]);
        let transport = Transport::new(backend.clone(), RetryPolicy::default());
        let manager = SessionManager::new(&transport, API);
        let session = Session {
            username: "GazlinkBot".to_string(),
            login_token: "x".to_string(),
            logged_in_at: Utc::now(),
        };

        assert_eq!(manager.fresh_write_token(&session).await.unwrap(), "t1+\\");
        assert_eq!(manager.fresh_write_token(&session).await.unwrap(), "t2+\\");
        assert_eq!(backend.calls(), 2);
    }

    #[tokio::test]
    async fn test_anonymous_token_means_session_lost() {
        let backend =
            ScriptedBackend::new(vec![ok(json!({"query": {"tokens": {"csrftoken": "+\\"}}}))]);
        let transport = Transport::new(backend, RetryPolicy::default());
        let session = Session {
            username: "GazlinkBot".to_string(),
            login_token: "x".to_string(),
            logged_in_at: Utc::now(),
        };

        let result = SessionManager::new(&transport, API)
            .fresh_write_token(&session)
            .await;
        assert!(matches!(result, Err(Error::Auth(_))));
    }
}
