//! Sequential, paced batch runs
//!
//! A [`BatchOrchestrator`] walks an ordered list of user ids, dispatching one
//! call at a time and sleeping a fixed interval between calls. Item failures
//! never stop a run. There is no cancellation: once started, a run goes to
//! the end.

use crate::action::{ActionKind, ActionOutcome};
use crate::error::{BilimodError, Result};
use crate::relay::Dispatch;
use crate::uid::UserId;
use futures_util::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Message recorded for an item whose dispatch panicked.
pub const UNEXPECTED_ERROR: &str = "unexpected error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ItemStatus::Succeeded | ItemStatus::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem {
    pub id: UserId,
    pub status: ItemStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ActionOutcome>,
}

/// Snapshot emitted right before an item is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub percentage: u8,
    pub success_count: usize,
    pub fail_count: usize,
    pub current: UserId,
    /// Status of `current` as it is handed to the dispatcher.
    pub status: ItemStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub action: ActionKind,
    pub success_count: usize,
    pub fail_count: usize,
    pub items: Vec<BatchItem>,
}

impl BatchSummary {
    pub fn empty(action: ActionKind) -> Self {
        Self {
            action,
            success_count: 0,
            fail_count: 0,
            items: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.items.len()
    }
}

/// Everything a run reports while it goes.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    Warning(String),
    Started {
        action: ActionKind,
        total: usize,
    },
    Progress(Progress),
    ItemFinished {
        index: usize,
        item: BatchItem,
        success_count: usize,
        fail_count: usize,
    },
    Finished(BatchSummary),
}

pub trait BatchObserver {
    fn on_event(&mut self, event: &BatchEvent);
}

impl<F> BatchObserver for F
where
    F: FnMut(&BatchEvent),
{
    fn on_event(&mut self, event: &BatchEvent) {
        self(event)
    }
}

/// Observer that ignores everything.
pub struct Silent;

impl BatchObserver for Silent {
    fn on_event(&mut self, _event: &BatchEvent) {}
}

/// State of the run in flight. Only [`BatchOrchestrator::run`] touches it.
struct BatchRun {
    items: Vec<BatchItem>,
    success_count: usize,
    fail_count: usize,
    cursor: usize,
}

impl BatchRun {
    fn new(ids: Vec<UserId>) -> Self {
        let items = ids
            .into_iter()
            .map(|id| BatchItem {
                id,
                status: ItemStatus::Pending,
                outcome: None,
            })
            .collect();
        Self {
            items,
            success_count: 0,
            fail_count: 0,
            cursor: 0,
        }
    }

    fn begin(&mut self, index: usize) -> Progress {
        debug_assert!(index >= self.cursor);
        self.cursor = index;
        let total = self.items.len();
        let processed = index + 1;
        let item = &mut self.items[index];
        item.status = ItemStatus::InProgress;

        Progress {
            processed,
            total,
            percentage: percentage(processed, total),
            success_count: self.success_count,
            fail_count: self.fail_count,
            current: item.id.clone(),
            status: item.status,
        }
    }

    fn finish(&mut self, index: usize, outcome: ActionOutcome) -> &BatchItem {
        let item = &mut self.items[index];
        if outcome.success {
            item.status = ItemStatus::Succeeded;
            self.success_count += 1;
        } else {
            item.status = ItemStatus::Failed;
            self.fail_count += 1;
        }
        item.outcome = Some(outcome);
        &self.items[index]
    }

    fn into_summary(self, action: ActionKind) -> BatchSummary {
        BatchSummary {
            action,
            success_count: self.success_count,
            fail_count: self.fail_count,
            items: self.items,
        }
    }
}

fn percentage(processed: usize, total: usize) -> u8 {
    ((processed as f64 / total as f64) * 100.0).round() as u8
}

/// Clears the running flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct BatchOrchestrator {
    dispatcher: Arc<dyn Dispatch>,
    pacing: Duration,
    running: AtomicBool,
}

impl BatchOrchestrator {
    pub fn new(dispatcher: Arc<dyn Dispatch>, pacing: Duration) -> Self {
        Self {
            dispatcher,
            pacing,
            running: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Apply `action` to every id in order.
    ///
    /// Fails only with [`BilimodError::BatchInProgress`] when another run on
    /// this orchestrator has not finished yet.
    pub async fn run<O>(&self, ids: Vec<UserId>, action: ActionKind, observer: &mut O) -> Result<BatchSummary>
    where
        O: BatchObserver + ?Sized,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BilimodError::BatchInProgress);
        }
        let _guard = RunGuard(&self.running);

        if ids.is_empty() {
            log::warn!("No user ids to {}", action);
            observer.on_event(&BatchEvent::Warning(format!(
                "no user ids to {}; paste profile links like https://space.bilibili.com/<uid>",
                action
            )));
            return Ok(BatchSummary::empty(action));
        }

        let total = ids.len();
        let mut run = BatchRun::new(ids);
        log::info!("Starting batch {} of {} users", action, total);
        observer.on_event(&BatchEvent::Started { action, total });

        for index in 0..total {
            let progress = run.begin(index);
            let id = progress.current.clone();
            observer.on_event(&BatchEvent::Progress(progress));

            let outcome = match AssertUnwindSafe(self.dispatcher.dispatch(&id, action))
                .catch_unwind()
                .await
            {
                Ok(outcome) => outcome,
                Err(_) => {
                    log::error!("Dispatch for {} panicked", id);
                    ActionOutcome::failed(UNEXPECTED_ERROR)
                }
            };

            let item = run.finish(index, outcome).clone();
            observer.on_event(&BatchEvent::ItemFinished {
                index,
                item,
                success_count: run.success_count,
                fail_count: run.fail_count,
            });

            if index + 1 < total {
                tokio::time::sleep(self.pacing).await;
            }
        }

        let summary = run.into_summary(action);
        log::info!(
            "Batch {} finished: {} succeeded, {} failed",
            action,
            summary.success_count,
            summary.fail_count
        );
        observer.on_event(&BatchEvent::Finished(summary.clone()));
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        percentage, BatchEvent, BatchOrchestrator, ItemStatus, Silent, UNEXPECTED_ERROR,
    };
    use crate::action::{ActionKind, ActionOutcome};
    use crate::error::BilimodError;
    use crate::relay::Dispatch;
    use crate::uid::UserId;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::time::Instant;

    const PACING: Duration = Duration::from_millis(500);

    /// Answers `code: 0` unless a reply is scripted for the id.
    #[derive(Default)]
    struct ScriptedDispatch {
        replies: HashMap<String, ActionOutcome>,
        panic_on: Option<String>,
        latency: Duration,
        calls: Mutex<Vec<(String, ActionKind, Instant)>>,
    }

    impl ScriptedDispatch {
        fn reply(mut self, id: &str, outcome: ActionOutcome) -> Self {
            self.replies.insert(id.to_string(), outcome);
            self
        }

        fn calls(&self) -> Vec<(String, ActionKind, Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Dispatch for ScriptedDispatch {
        async fn dispatch(&self, id: &UserId, action: ActionKind) -> ActionOutcome {
            self.calls
                .lock()
                .unwrap()
                .push((id.to_string(), action, Instant::now()));
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if self.panic_on.as_deref() == Some(id.as_str()) {
                panic!("stub failure");
            }
            self.replies.get(id.as_str()).cloned().unwrap_or_else(|| {
                ActionOutcome::succeeded(format!("{} succeeded", action), Some(json!({"code": 0})))
            })
        }
    }

    fn ids(values: &[&str]) -> Vec<UserId> {
        values.iter().map(|v| UserId::parse(v).expect("uid")).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn all_successful_batch_paces_between_items() {
        let stub = Arc::new(ScriptedDispatch::default());
        let orchestrator = BatchOrchestrator::new(stub.clone(), PACING);
        let mut events = Vec::new();

        let started = Instant::now();
        let summary = orchestrator
            .run(ids(&["1", "2", "3"]), ActionKind::Block, &mut |e: &BatchEvent| {
                events.push(e.clone())
            })
            .await
            .expect("run");

        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.fail_count, 0);
        // Two pacing delays for three items.
        assert_eq!(started.elapsed(), PACING * 2);

        let calls = stub.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[1].2 - calls[0].2, PACING);
        assert_eq!(calls[2].2 - calls[1].2, PACING);

        let percentages: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Progress(p) => Some(p.percentage),
                _ => None,
            })
            .collect();
        assert_eq!(percentages, vec![33, 67, 100]);
        assert!(matches!(events.first(), Some(BatchEvent::Started { total: 3, .. })));
        assert!(matches!(events.last(), Some(BatchEvent::Finished(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn item_is_in_progress_when_dispatched() {
        let stub = Arc::new(ScriptedDispatch::default());
        let orchestrator = BatchOrchestrator::new(stub.clone(), PACING);
        let mut seen = Vec::new();

        orchestrator
            .run(ids(&["1", "2"]), ActionKind::Unblock, &mut |e: &BatchEvent| match e {
                BatchEvent::Progress(p) => seen.push((p.current.to_string(), p.status)),
                BatchEvent::ItemFinished { item, .. } => {
                    seen.push((item.id.to_string(), item.status))
                }
                _ => {}
            })
            .await
            .expect("run");

        assert_eq!(
            seen,
            vec![
                ("1".to_string(), ItemStatus::InProgress),
                ("1".to_string(), ItemStatus::Succeeded),
                ("2".to_string(), ItemStatus::InProgress),
                ("2".to_string(), ItemStatus::Succeeded),
            ]
        );
        let dispatched: Vec<String> = stub.calls().into_iter().map(|c| c.0).collect();
        assert_eq!(dispatched, vec!["1", "2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_recorded_per_item() {
        let stub = Arc::new(
            ScriptedDispatch::default().reply(
                "22222",
                ActionOutcome::rejected("already blocked", json!({"code": -1, "message": "already blocked"})),
            ),
        );
        let orchestrator = BatchOrchestrator::new(stub, PACING);

        let summary = orchestrator
            .run(ids(&["11111", "22222"]), ActionKind::Block, &mut Silent)
            .await
            .expect("run");

        assert_eq!(summary.success_count, 1);
        assert_eq!(summary.fail_count, 1);
        assert_eq!(summary.items[0].id.as_str(), "11111");
        assert_eq!(summary.items[0].status, ItemStatus::Succeeded);
        assert_eq!(summary.items[1].status, ItemStatus::Failed);
        assert_eq!(
            summary.items[1].outcome.as_ref().map(|o| o.message.as_str()),
            Some("already blocked")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn every_item_reaches_a_terminal_state() {
        let stub = Arc::new(
            ScriptedDispatch::default()
                .reply("2", ActionOutcome::failed("not authenticated"))
                .reply("4", ActionOutcome::failed("reload the page")),
        );
        let orchestrator = BatchOrchestrator::new(stub, PACING);
        let input = ids(&["1", "2", "3", "4", "5"]);

        let summary = orchestrator
            .run(input.clone(), ActionKind::Unblock, &mut Silent)
            .await
            .expect("run");

        assert_eq!(summary.success_count + summary.fail_count, input.len());
        assert_eq!(summary.total(), input.len());
        assert!(summary.items.iter().all(|item| item.status.is_terminal()));
        let order: Vec<UserId> = summary.items.iter().map(|i| i.id.clone()).collect();
        assert_eq!(order, input);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_warns_without_calls() {
        let stub = Arc::new(ScriptedDispatch::default());
        let orchestrator = BatchOrchestrator::new(stub.clone(), PACING);
        let mut events = Vec::new();

        let summary = orchestrator
            .run(Vec::new(), ActionKind::Block, &mut |e: &BatchEvent| events.push(e.clone()))
            .await
            .expect("run");

        assert_eq!(summary.total(), 0);
        assert!(stub.calls().is_empty());
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], BatchEvent::Warning(_)));
        assert!(!orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn single_item_has_no_pacing_delay() {
        let orchestrator = BatchOrchestrator::new(Arc::new(ScriptedDispatch::default()), PACING);
        let started = Instant::now();
        let summary = orchestrator
            .run(ids(&["7"]), ActionKind::Block, &mut Silent)
            .await
            .expect("run");
        assert_eq!(summary.success_count, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_dispatch_fails_the_item_only() {
        let stub = Arc::new(ScriptedDispatch {
            panic_on: Some("2".to_string()),
            ..ScriptedDispatch::default()
        });
        let orchestrator = BatchOrchestrator::new(stub.clone(), PACING);

        let summary = orchestrator
            .run(ids(&["1", "2", "3"]), ActionKind::Block, &mut Silent)
            .await
            .expect("run");

        assert_eq!(summary.success_count, 2);
        assert_eq!(summary.fail_count, 1);
        assert_eq!(
            summary.items[1].outcome.as_ref().map(|o| o.message.as_str()),
            Some(UNEXPECTED_ERROR)
        );
        assert_eq!(stub.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn second_run_is_rejected_while_one_is_active() {
        let stub = Arc::new(ScriptedDispatch {
            latency: Duration::from_secs(1),
            ..ScriptedDispatch::default()
        });
        let orchestrator = Arc::new(BatchOrchestrator::new(stub, PACING));

        let background = Arc::clone(&orchestrator);
        let first = tokio::spawn(async move {
            background
                .run(ids(&["1", "2"]), ActionKind::Block, &mut Silent)
                .await
        });
        tokio::task::yield_now().await;
        assert!(orchestrator.is_running());

        let err = orchestrator
            .run(ids(&["3"]), ActionKind::Unblock, &mut Silent)
            .await
            .expect_err("busy");
        assert!(matches!(err, BilimodError::BatchInProgress));

        let summary = first.await.expect("join").expect("first run");
        assert_eq!(summary.success_count, 2);
        assert!(!orchestrator.is_running());

        let summary = orchestrator
            .run(ids(&["3"]), ActionKind::Unblock, &mut Silent)
            .await
            .expect("run after release");
        assert_eq!(summary.success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn block_then_unblock_are_independent() {
        let stub = Arc::new(ScriptedDispatch::default());
        let orchestrator = BatchOrchestrator::new(stub.clone(), PACING);

        let blocked = orchestrator
            .run(ids(&["42"]), ActionKind::Block, &mut Silent)
            .await
            .expect("block");
        let unblocked = orchestrator
            .run(ids(&["42"]), ActionKind::Unblock, &mut Silent)
            .await
            .expect("unblock");

        assert_eq!(blocked.items[0].outcome.as_ref().unwrap().message, "block succeeded");
        assert_eq!(unblocked.items[0].outcome.as_ref().unwrap().message, "unblock succeeded");
        let actions: Vec<ActionKind> = stub.calls().into_iter().map(|c| c.1).collect();
        assert_eq!(actions, vec![ActionKind::Block, ActionKind::Unblock]);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_reported_before_each_dispatch() {
        let stub = Arc::new(ScriptedDispatch::default().reply("2", ActionOutcome::failed("nope")));
        let orchestrator = BatchOrchestrator::new(stub, PACING);
        let mut log = Vec::new();

        orchestrator
            .run(ids(&["1", "2"]), ActionKind::Block, &mut |e: &BatchEvent| match e {
                BatchEvent::Progress(p) => log.push(format!(
                    "progress {}/{} {} ok={} fail={}",
                    p.processed, p.total, p.current, p.success_count, p.fail_count
                )),
                BatchEvent::ItemFinished { index, item, .. } => {
                    log.push(format!("finished {} {:?}", index, item.status))
                }
                _ => {}
            })
            .await
            .expect("run");

        assert_eq!(
            log,
            vec![
                "progress 1/2 1 ok=0 fail=0",
                "finished 0 Succeeded",
                "progress 2/2 2 ok=1 fail=0",
                "finished 1 Failed",
            ]
        );
    }

    #[test]
    fn percentage_rounds_half_up() {
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 8), 13);
        assert_eq!(percentage(5, 5), 100);
    }
}
