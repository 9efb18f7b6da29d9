use super::{
    ContextHandle, Dispatch, ExecutionRelay, LoadState, LoadWait, RelayRequest, SessionHost,
    SessionLoader, UNREACHABLE_MESSAGE,
};
use crate::action::{ActionKind, ActionOutcome};
use crate::config::Config;
use crate::cookies::CookieJar;
use crate::error::{BilimodError, Result};
use crate::executor::{ActionExecutor, ExecuteAction, NOT_AUTHENTICATED};
use crate::uid::UserId;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

struct JarLoader {
    header: &'static str,
    delay: Duration,
    failures_left: AtomicUsize,
}

impl JarLoader {
    fn signed_in() -> Self {
        Self::with("SESSDATA=s; bili_jct=tok")
    }

    fn with(header: &'static str) -> Self {
        Self {
            header,
            delay: Duration::ZERO,
            failures_left: AtomicUsize::new(0),
        }
    }

    fn failing(times: usize) -> Self {
        let loader = Self::signed_in();
        loader.failures_left.store(times, Ordering::SeqCst);
        loader
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::signed_in()
        }
    }
}

#[async_trait]
impl SessionLoader for JarLoader {
    async fn load(&self) -> Result<CookieJar> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BilimodError::BrowserCookie("profile locked".to_string()));
        }
        CookieJar::from_header(self.header, "bilibili.com")
    }
}

#[derive(Default)]
struct RecordingExecutor {
    calls: Mutex<Vec<(String, ActionKind, Option<String>)>>,
}

#[async_trait]
impl ExecuteAction for RecordingExecutor {
    async fn execute(&self, cookies: &CookieJar, id: &UserId, action: ActionKind) -> ActionOutcome {
        self.calls.lock().unwrap().push((
            id.to_string(),
            action,
            cookies.csrf_token().map(str::to_string),
        ));
        ActionOutcome::succeeded(format!("{} succeeded", action), Some(json!({"code": 0})))
    }
}

fn relay_with(loader: JarLoader, executor: Arc<dyn ExecuteAction>, config: &Config) -> ExecutionRelay {
    let host = Arc::new(SessionHost::new(Arc::new(loader), executor));
    ExecutionRelay::new(host, config).expect("relay")
}

fn uid(raw: &str) -> UserId {
    UserId::parse(raw).expect("uid")
}

#[tokio::test]
async fn dispatch_opens_one_context_and_reuses_it() {
    let executor = Arc::new(RecordingExecutor::default());
    let relay = relay_with(JarLoader::signed_in(), executor.clone(), &Config::default());

    let first = relay.dispatch(&uid("11111"), ActionKind::Block).await;
    let second = relay.dispatch(&uid("22222"), ActionKind::Unblock).await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(relay.host().len(), 1);
    let calls = executor.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("11111".to_string(), ActionKind::Block, Some("tok".to_string())),
            ("22222".to_string(), ActionKind::Unblock, Some("tok".to_string())),
        ]
    );
}

#[tokio::test]
async fn unreachable_context_asks_for_reload_for_every_action() {
    let executor = Arc::new(RecordingExecutor::default());
    let relay = relay_with(JarLoader::failing(usize::MAX), executor.clone(), &Config::default());

    for action in [ActionKind::Block, ActionKind::Unblock] {
        let outcome = relay.dispatch(&uid("11111"), action).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, UNREACHABLE_MESSAGE);
        assert!(outcome.message.contains("reload"));
    }
    assert!(executor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn reload_restores_a_dead_context() {
    let executor = Arc::new(RecordingExecutor::default());
    let relay = relay_with(JarLoader::failing(1), executor.clone(), &Config::default());

    let outcome = relay.dispatch(&uid("11111"), ActionKind::Block).await;
    assert!(!outcome.success);

    let dead = relay.resolve_context().await;
    assert!(!dead.is_alive());
    let reloaded = relay.host().reload(dead.id()).expect("context exists");
    assert_eq!(
        reloaded.wait_until_loaded(Duration::from_secs(1)).await,
        LoadWait::Loaded
    );

    let outcome = relay.dispatch(&uid("11111"), ActionKind::Block).await;
    assert!(outcome.success);
    assert_eq!(relay.host().len(), 1);
}

#[tokio::test]
async fn off_site_context_is_refused() {
    let config = Config {
        site_url: "https://example.com/".to_string(),
        ..Config::default()
    };
    let executor = Arc::new(RecordingExecutor::default());
    let relay = relay_with(JarLoader::signed_in(), executor.clone(), &config);

    let outcome = relay.dispatch(&uid("11111"), ActionKind::Block).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, "current context is not on bilibili.com");
    assert!(executor.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn active_context_on_site_is_preferred() {
    let relay = relay_with(
        JarLoader::signed_in(),
        Arc::new(RecordingExecutor::default()),
        &Config::default(),
    );
    let host = relay.host();
    let first = host.open(Url::parse("https://www.bilibili.com/").unwrap());
    let second = host.open(Url::parse("https://space.bilibili.com/1").unwrap());

    assert_eq!(relay.resolve_context().await.id(), first.id());
    assert!(host.activate(second.id()));
    assert_eq!(relay.resolve_context().await.id(), second.id());
}

#[tokio::test]
async fn active_context_off_site_is_skipped() {
    let relay = relay_with(
        JarLoader::signed_in(),
        Arc::new(RecordingExecutor::default()),
        &Config::default(),
    );
    let host = relay.host();
    let elsewhere = host.open(Url::parse("https://example.com/").unwrap());
    host.activate(elsewhere.id());

    let resolved = relay.resolve_context().await;
    assert_ne!(resolved.id(), elsewhere.id());
    assert_eq!(resolved.url().host_str(), Some("www.bilibili.com"));
    assert_eq!(host.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn slow_context_is_used_after_load_timeout() {
    let executor = Arc::new(RecordingExecutor::default());
    let relay = relay_with(
        JarLoader::slow(Duration::from_secs(30)),
        executor.clone(),
        &Config::default(),
    );

    let started = tokio::time::Instant::now();
    let context: ContextHandle = relay.resolve_context().await;
    let waited = started.elapsed();
    assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(30));
    assert_eq!(context.load_state(), LoadState::Loading);

    // The request waits in the context queue until the session is loaded.
    let outcome = relay.dispatch(&uid("11111"), ActionKind::Block).await;
    assert!(outcome.success);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(context.load_state(), LoadState::Complete);
}

#[tokio::test(start_paused = true)]
async fn failed_load_is_reported_without_waiting_for_timeout() {
    let relay = relay_with(
        JarLoader::failing(1),
        Arc::new(RecordingExecutor::default()),
        &Config::default(),
    );
    let context = relay
        .host()
        .open(Url::parse("https://www.bilibili.com/").unwrap());

    let started = tokio::time::Instant::now();
    let result = context.wait_until_loaded(Duration::from_secs(10)).await;
    assert_eq!(result, LoadWait::Failed);
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!context.is_alive());
}

#[tokio::test(start_paused = true)]
async fn slow_load_reports_timeout() {
    let relay = relay_with(
        JarLoader::slow(Duration::from_secs(30)),
        Arc::new(RecordingExecutor::default()),
        &Config::default(),
    );
    let context = relay
        .host()
        .open(Url::parse("https://www.bilibili.com/").unwrap());

    let result = context.wait_until_loaded(Duration::from_secs(10)).await;
    assert_eq!(result, LoadWait::TimedOut);
    assert!(context.is_alive());
}

#[tokio::test]
async fn missing_token_fails_without_network() {
    let config = Config {
        api_base: "http://127.0.0.1:9".to_string(),
        ..Config::default()
    };
    let executor = Arc::new(ActionExecutor::new(&config).expect("executor"));
    let relay = relay_with(JarLoader::with("SESSDATA=s"), executor, &config);

    let outcome = relay.dispatch(&uid("11111"), ActionKind::Unblock).await;
    assert!(!outcome.success);
    assert_eq!(outcome.message, NOT_AUTHENTICATED);
}

#[test]
fn relay_request_matches_message_contract() {
    let request = RelayRequest {
        action: ActionKind::Block,
        user_id: uid("12345"),
    };
    assert_eq!(
        serde_json::to_value(&request).unwrap(),
        json!({"action": "blockUser", "userId": "12345"})
    );

    let parsed: RelayRequest =
        serde_json::from_value(json!({"action": "unblockUser", "userId": "9"})).unwrap();
    assert_eq!(parsed.action, ActionKind::Unblock);
    assert!(serde_json::from_value::<RelayRequest>(json!({"action": "ping", "userId": "9"})).is_err());
}
