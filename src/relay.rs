//! Request/reply relay between the batch side and the session holder
//!
//! The session cookies live only inside a *session context*: a worker task
//! spawned by [`SessionHost`] that loads the jar and then serves typed
//! [`RelayRequest`]s one at a time. [`ExecutionRelay`] picks (or opens) a
//! context on the target site, sends the request and hands back the reply.
//! Every failure on this path is returned as an [`ActionOutcome`].

use crate::action::{ActionKind, ActionOutcome};
use crate::config::{Config, CookieSource};
use crate::cookies::CookieJar;
use crate::error::{BilimodError, Result};
use crate::executor::ExecuteAction;
use crate::uid::UserId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use url::Url;

/// Reply when no live session context answered.
pub const UNREACHABLE_MESSAGE: &str =
    "Could not establish connection to the page; reload the page and retry";

const CONTEXT_QUEUE_SIZE: usize = 16;

/// Message sent to a session context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayRequest {
    pub action: ActionKind,
    pub user_id: UserId,
}

struct Envelope {
    request: RelayRequest,
    reply: oneshot::Sender<ActionOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Complete,
}

/// How a bounded wait for a context to load ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadWait {
    Loaded,
    TimedOut,
    /// The worker stopped before it finished loading.
    Failed,
}

/// Loads the session a context works with.
#[async_trait]
pub trait SessionLoader: Send + Sync {
    async fn load(&self) -> Result<CookieJar>;
}

/// Loads the jar from a configured [`CookieSource`].
pub struct CookieSourceLoader {
    source: CookieSource,
    site_domain: String,
}

impl CookieSourceLoader {
    pub fn new(source: CookieSource, site_domain: impl Into<String>) -> Self {
        Self {
            source,
            site_domain: site_domain.into(),
        }
    }
}

#[async_trait]
impl SessionLoader for CookieSourceLoader {
    async fn load(&self) -> Result<CookieJar> {
        CookieJar::load(&self.source, &self.site_domain).await
    }
}

/// Handle to one session context.
#[derive(Clone)]
pub struct ContextHandle {
    id: u32,
    url: Url,
    sender: mpsc::Sender<Envelope>,
    state: watch::Receiver<LoadState>,
}

impl ContextHandle {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn load_state(&self) -> LoadState {
        *self.state.borrow()
    }

    /// False once the worker behind this handle has stopped listening.
    pub fn is_alive(&self) -> bool {
        !self.sender.is_closed()
    }

    /// True when the context address is `domain` or one of its subdomains.
    pub fn is_on_site(&self, domain: &str) -> bool {
        self.url
            .host_str()
            .map(|host| {
                let host = host.to_ascii_lowercase();
                host == domain || host.ends_with(&format!(".{}", domain))
            })
            .unwrap_or(false)
    }

    /// Wait for the context to finish loading, at most `limit`.
    pub async fn wait_until_loaded(&self, limit: Duration) -> LoadWait {
        let mut state = self.state.clone();
        let ready = async move {
            match state.wait_for(|s| *s == LoadState::Complete).await {
                Ok(_) => LoadWait::Loaded,
                Err(_) => LoadWait::Failed,
            }
        };
        tokio::time::timeout(limit, ready)
            .await
            .unwrap_or(LoadWait::TimedOut)
    }

    /// Send one request and wait for its reply. `None` means nobody is
    /// listening on the other side.
    pub async fn request(&self, request: RelayRequest) -> Option<ActionOutcome> {
        let (reply, response) = oneshot::channel();
        self.sender.send(Envelope { request, reply }).await.ok()?;
        response.await.ok()
    }
}

/// Owns the set of session contexts, like a browser owns its tabs.
pub struct SessionHost {
    loader: Arc<dyn SessionLoader>,
    executor: Arc<dyn ExecuteAction>,
    contexts: Mutex<Vec<ContextHandle>>,
    active: Mutex<Option<u32>>,
    next_id: AtomicU32,
}

impl SessionHost {
    pub fn new(loader: Arc<dyn SessionLoader>, executor: Arc<dyn ExecuteAction>) -> Self {
        Self {
            loader,
            executor,
            contexts: Mutex::new(Vec::new()),
            active: Mutex::new(None),
            next_id: AtomicU32::new(1),
        }
    }

    /// The context marked active, if any.
    pub fn active(&self) -> Option<ContextHandle> {
        let active = (*self.active.lock().unwrap_or_else(PoisonError::into_inner))?;
        self.get(active)
    }

    pub fn get(&self, id: u32) -> Option<ContextHandle> {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// First open context on `domain`.
    pub fn find_on_site(&self, domain: &str) -> Option<ContextHandle> {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.is_on_site(domain))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Open a new context at `url` and start loading its session in the
    /// background. Must be called within a tokio runtime.
    pub fn open(&self, url: Url) -> ContextHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = self.spawn(id, url);
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle.clone());
        log::info!("Opened session context {} at {}", id, handle.url);
        handle
    }

    pub fn activate(&self, id: u32) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        *self.active.lock().unwrap_or_else(PoisonError::into_inner) = Some(id);
        true
    }

    /// Restart the worker of context `id`, reading the session again.
    pub fn reload(&self, id: u32) -> Option<ContextHandle> {
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = contexts.iter_mut().find(|c| c.id == id)?;
        let handle = self.spawn(id, slot.url.clone());
        *slot = handle.clone();
        log::info!("Reloaded session context {}", id);
        Some(handle)
    }

    fn spawn(&self, id: u32, url: Url) -> ContextHandle {
        let (sender, receiver) = mpsc::channel(CONTEXT_QUEUE_SIZE);
        let (state_tx, state) = watch::channel(LoadState::Loading);
        tokio::spawn(run_context(
            id,
            Arc::clone(&self.loader),
            Arc::clone(&self.executor),
            state_tx,
            receiver,
        ));
        ContextHandle {
            id,
            url,
            sender,
            state,
        }
    }
}

async fn run_context(
    id: u32,
    loader: Arc<dyn SessionLoader>,
    executor: Arc<dyn ExecuteAction>,
    state: watch::Sender<LoadState>,
    mut requests: mpsc::Receiver<Envelope>,
) {
    let cookies = match loader.load().await {
        Ok(cookies) => cookies,
        Err(err) => {
            // Dropping the receiver makes every pending and future request
            // observe a dead channel.
            log::error!("Session context {} failed to load: {}", id, err);
            return;
        }
    };
    state.send_replace(LoadState::Complete);
    log::debug!("Session context {} ready with {} cookies", id, cookies.len());

    while let Some(Envelope { request, reply }) = requests.recv().await {
        log::debug!("Context {} received {:?}", id, request);
        let outcome = executor
            .execute(&cookies, &request.user_id, request.action)
            .await;
        if reply.send(outcome).is_err() {
            log::debug!("Context {}: requester went away before the reply", id);
        }
    }
}

/// One moderation call, wherever it ends up running.
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, id: &UserId, action: ActionKind) -> ActionOutcome;
}

/// Routes moderation calls to a session context on the target site.
pub struct ExecutionRelay {
    host: Arc<SessionHost>,
    site_url: Url,
    site_domain: String,
    load_timeout: Duration,
}

impl ExecutionRelay {
    pub fn new(host: Arc<SessionHost>, config: &Config) -> Result<Self> {
        let site_url = Url::parse(&config.site_url).map_err(|e| {
            BilimodError::InvalidUrl(format!("Invalid site URL '{}': {}", config.site_url, e))
        })?;
        Ok(Self {
            host,
            site_url,
            site_domain: config.site_domain.trim_start_matches('.').to_ascii_lowercase(),
            load_timeout: config.context_load_timeout,
        })
    }

    pub fn host(&self) -> &Arc<SessionHost> {
        &self.host
    }

    /// Active context if it is on the site, else any context on the site,
    /// else a freshly opened one. A new context gets `load_timeout` to
    /// finish loading; after that it is used as is and requests queue until
    /// its worker starts serving.
    pub async fn resolve_context(&self) -> ContextHandle {
        if let Some(active) = self.host.active() {
            if active.is_on_site(&self.site_domain) {
                return active;
            }
        }
        if let Some(existing) = self.host.find_on_site(&self.site_domain) {
            return existing;
        }

        let context = self.host.open(self.site_url.clone());
        match context.wait_until_loaded(self.load_timeout).await {
            LoadWait::Loaded => {}
            LoadWait::TimedOut => log::warn!(
                "Session context {} not ready after {:?}, continuing anyway",
                context.id(),
                self.load_timeout
            ),
            LoadWait::Failed => log::warn!(
                "Session context {} stopped before loading; requests will ask for a reload",
                context.id()
            ),
        }
        context
    }
}

#[async_trait]
impl Dispatch for ExecutionRelay {
    async fn dispatch(&self, id: &UserId, action: ActionKind) -> ActionOutcome {
        let context = self.resolve_context().await;
        log::debug!("Using session context {} ({})", context.id(), context.url());

        if !context.is_on_site(&self.site_domain) {
            return ActionOutcome::failed(format!(
                "current context is not on {}",
                self.site_domain
            ));
        }

        let request = RelayRequest {
            action,
            user_id: id.clone(),
        };
        match context.request(request).await {
            Some(outcome) => outcome,
            None => {
                log::warn!("Session context {} is unreachable", context.id());
                ActionOutcome::failed(UNREACHABLE_MESSAGE)
            }
        }
    }
}

#[cfg(test)]
mod tests;
