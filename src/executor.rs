//! Authenticated block/unblock calls
//!
//! [`ActionExecutor`] performs exactly one POST to the relation endpoint per
//! invocation. It must only be driven by the holder of the session cookies
//! (the session worker in [`crate::relay`]); every failure comes back as an
//! [`ActionOutcome`], never as an error.

use crate::action::{ActionKind, ActionOutcome};
use crate::config::Config;
use crate::cookies::CookieJar;
use crate::error::{BilimodError, Result};
use crate::uid::UserId;
use async_trait::async_trait;
use reqwest::header::{COOKIE, ORIGIN, REFERER, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use serde_json::{json, Value};
use url::Url;

const RELATION_MODIFY_PATH: &str = "x/relation/modify";
const STATISTICS: &str = r#"{"appId":100,"platform":5}"#;

/// Returned when the session has no CSRF token.
pub const NOT_AUTHENTICATED: &str =
    "not authenticated: CSRF token (bili_jct) not found, sign in to Bilibili first";

/// HTTP client bound to the relation endpoint
pub struct ActionExecutor {
    client: Client,
    endpoint: Url,
    origin: String,
    user_agent: Option<String>,
}

impl ActionExecutor {
    /// Create a new executor with the given configuration
    pub fn new(config: &Config) -> Result<Self> {
        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout);

        if let Some(proxy_config) = &config.proxy {
            let proxy = reqwest::Proxy::all(&proxy_config.url)
                .map_err(|e| BilimodError::Proxy(format!("Invalid proxy: {}", e)))?;

            let proxy = if let (Some(username), Some(password)) =
                (&proxy_config.username, &proxy_config.password)
            {
                proxy.basic_auth(username, password)
            } else {
                proxy
            };

            builder = builder.proxy(proxy);
        }

        let client = builder.build().map_err(BilimodError::Http)?;

        Ok(Self {
            client,
            endpoint: relation_endpoint(&config.api_base)?,
            origin: site_origin(&config.site_url)?,
            user_agent: config.user_agent.clone(),
        })
    }

    /// Block or unblock `id` using the session in `cookies`.
    ///
    /// The CSRF token is read from `cookies` on every call, so a refreshed
    /// jar takes effect immediately.
    pub async fn execute(&self, cookies: &CookieJar, id: &UserId, action: ActionKind) -> ActionOutcome {
        let Some(token) = cookies.csrf_token() else {
            log::warn!("Cannot {} {}: no {} cookie", action, id, crate::cookies::CSRF_COOKIE);
            return ActionOutcome::failed(NOT_AUTHENTICATED);
        };

        log::info!("{} user {}", action.progressive(), id);
        match self.send(token, cookies, id, action).await {
            Ok(body) => interpret_response(action, body),
            Err(err) => {
                log::warn!("{} {} failed: {}", action, id, err);
                ActionOutcome::failed(err.to_string())
            }
        }
    }

    async fn send(&self, token: &str, cookies: &CookieJar, id: &UserId, action: ActionKind) -> Result<Value> {
        let form = relation_form(id, action, token);
        let mut request = self
            .client
            .post(self.endpoint.clone())
            .form(&form)
            .header(COOKIE, cookies.to_header())
            .header(ORIGIN, &self.origin)
            .header(REFERER, format!("{}/", self.origin));

        if let Some(user_agent) = &self.user_agent {
            request = request.header(USER_AGENT, user_agent);
        }

        let response = request.send().await.map_err(BilimodError::Http)?;
        let status = response.status();
        let body = response.text().await.map_err(BilimodError::Http)?;
        log::debug!("relation/modify answered HTTP {}: {}", status, body);

        serde_json::from_str(&body).map_err(|e| {
            BilimodError::UnexpectedResponse(format!("malformed JSON (HTTP {}): {}", status, e))
        })
    }
}

/// Anything able to perform an authenticated moderation call with a
/// session jar. The session worker is generic over this so tests can stub
/// the remote service.
#[async_trait]
pub trait ExecuteAction: Send + Sync {
    async fn execute(&self, cookies: &CookieJar, id: &UserId, action: ActionKind) -> ActionOutcome;
}

#[async_trait]
impl ExecuteAction for ActionExecutor {
    async fn execute(&self, cookies: &CookieJar, id: &UserId, action: ActionKind) -> ActionOutcome {
        ActionExecutor::execute(self, cookies, id, action).await
    }
}

/// Form fields the web player sends for a relation change.
fn relation_form(id: &UserId, action: ActionKind, token: &str) -> Vec<(&'static str, String)> {
    let entity_id = id
        .as_u64()
        .map(Value::from)
        .unwrap_or_else(|| Value::from(id.as_str()));
    let extend_content = json!({ "entity": "user", "entity_id": entity_id });

    vec![
        ("fid", id.to_string()),
        ("act", action.action_code().to_string()),
        ("re_src", "11".to_string()),
        ("gaia_source", "web_main".to_string()),
        ("spmid", "333.1387".to_string()),
        ("extend_content", extend_content.to_string()),
        ("is_from_frontend_component", "true".to_string()),
        ("csrf", token.to_string()),
    ]
}

fn interpret_response(action: ActionKind, body: Value) -> ActionOutcome {
    let code = body.get("code").and_then(Value::as_i64);
    let message = body
        .get("message")
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    match code {
        Some(0) => ActionOutcome::succeeded(format!("{} succeeded", action), Some(body)),
        _ => {
            let message = message.unwrap_or_else(|| format!("{} failed", action));
            ActionOutcome::rejected(message, body)
        }
    }
}

/// The API base may carry a path prefix; the relation path is joined below it.
fn relation_endpoint(api_base: &str) -> Result<Url> {
    let mut base = Url::parse(api_base)
        .map_err(|e| BilimodError::InvalidUrl(format!("Invalid API base '{}': {}", api_base, e)))?;
    if !base.path().ends_with('/') {
        let dir = format!("{}/", base.path());
        base.set_path(&dir);
    }
    let mut endpoint = base
        .join(RELATION_MODIFY_PATH)
        .map_err(|e| BilimodError::InvalidUrl(format!("Invalid API base '{}': {}", api_base, e)))?;
    endpoint
        .query_pairs_mut()
        .append_pair("statistics", STATISTICS);
    Ok(endpoint)
}

fn site_origin(site_url: &str) -> Result<String> {
    let url = Url::parse(site_url)
        .map_err(|e| BilimodError::InvalidUrl(format!("Invalid site URL '{}': {}", site_url, e)))?;
    Ok(url.origin().ascii_serialization())
}
