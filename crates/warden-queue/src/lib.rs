//! SQLite-backed priority task queue with a background worker pool.
//!
//! Enqueue and execution are decoupled: [`TaskQueue::enqueue`] only writes a
//! row, and a pool of workers spawned by [`TaskQueue::start`] pulls the
//! highest-priority `PENDING` row (oldest first within a priority tier),
//! runs it through the host-provided [`Executor`], retries with exponential
//! backoff on failure, and fires a webhook callback when one is attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::Level;
use warden_config::QueueConfig;
use warden_observability::{emit_event, Component, GovernanceEvent};
use warden_providers::{Executor, Notifier};
use warden_storage::TaskStore;
use warden_types::{Priority, QueuedTask, QueueStats, TaskStatus, WardenResult};

pub struct TaskQueue {
    store: Arc<TaskStore>,
    executor: Arc<dyn Executor>,
    notifier: Arc<dyn Notifier>,
    num_workers: usize,
    default_max_retries: u32,
    stale_running_reclaim: Duration,
    running: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskQueue {
    pub fn open(config: &QueueConfig, executor: Arc<dyn Executor>, notifier: Arc<dyn Notifier>) -> WardenResult<Self> {
        let store = Arc::new(TaskStore::open(std::path::Path::new(&config.db_path))?);
        Ok(Self {
            store,
            executor,
            notifier,
            num_workers: config.num_workers.max(1),
            default_max_retries: config.default_max_retries,
            stale_running_reclaim: config.stale_running_reclaim,
            running: Arc::new(AtomicBool::new(false)),
            workers: Mutex::new(Vec::new()),
        })
    }

    pub async fn enqueue(
        &self,
        agent_name: impl Into<String>,
        instruction: impl Into<String>,
        priority: Priority,
        callback_url: Option<String>,
        metadata: std::collections::HashMap<String, Value>,
    ) -> WardenResult<String> {
        let task_id = uuid::Uuid::new_v4().to_string();
        let mut task = QueuedTask::new(task_id.clone(), agent_name, instruction, priority);
        task.max_retries = self.default_max_retries;
        task.callback_url = callback_url;
        task.metadata = metadata;
        self.store.insert(&task).await?;
        tracing::info!(task_id, agent_name = %task.agent_name, priority = ?task.priority, "task enqueued");
        emit_event(
            Level::INFO,
            GovernanceEvent::new("task.enqueued", Component::Queue).with_task(&task_id).with_agent(&task.agent_name).with_status("pending"),
        );
        Ok(task_id)
    }

    pub async fn cancel(&self, task_id: &str) -> WardenResult<bool> {
        self.store.cancel(task_id).await
    }

    pub async fn status(&self, task_id: &str) -> WardenResult<Option<QueuedTask>> {
        self.store.get(task_id).await
    }

    pub async fn pending(&self) -> WardenResult<Vec<QueuedTask>> {
        self.store.pending().await
    }

    pub async fn stats(&self) -> WardenResult<QueueStats> {
        self.store.stats().await
    }

    /// Spawns `num_workers` background tasks plus one stale-`RUNNING`
    /// reclaimer. Idempotent: a second call while already running is a
    /// no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut workers = self.workers.lock().await;
        for worker_id in 0..self.num_workers {
            let queue = Arc::clone(self);
            workers.push(tokio::spawn(async move { queue.worker_loop(worker_id).await }));
        }
        let queue = Arc::clone(self);
        workers.push(tokio::spawn(async move { queue.reclaim_loop().await }));
        tracing::info!(workers = self.num_workers, "task queue started");
    }

    /// Signals workers to stop after their current task and, when
    /// `graceful`, awaits their shutdown.
    pub async fn stop(&self, graceful: bool) {
        self.running.store(false, Ordering::SeqCst);
        let mut workers = self.workers.lock().await;
        if graceful {
            for handle in workers.drain(..) {
                let _ = handle.await;
            }
        } else {
            for handle in workers.drain(..) {
                handle.abort();
            }
        }
        tracing::info!(graceful, "task queue stopped");
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize) {
        tracing::debug!(worker_id, "queue worker started");
        while self.running.load(Ordering::SeqCst) {
            match self.store.claim_next().await {
                Ok(Some(task)) => self.execute_task(task).await,
                Ok(None) => tokio::time::sleep(Duration::from_millis(500)).await,
                Err(err) => {
                    tracing::warn!(worker_id, %err, "failed to claim next task");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
        tracing::debug!(worker_id, "queue worker stopped");
    }

    async fn reclaim_loop(self: Arc<Self>) {
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(self.stale_running_reclaim).await;
            if !self.running.load(Ordering::SeqCst) {
                return;
            }
            let cutoff = Utc::now() - chrono::Duration::from_std(self.stale_running_reclaim).unwrap_or(chrono::Duration::seconds(600));
            match self.store.reclaim_stale_running(cutoff).await {
                Ok(reclaimed) if !reclaimed.is_empty() => {
                    tracing::warn!(count = reclaimed.len(), "reclaimed stale running tasks");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(%err, "stale task reclaim failed"),
            }
        }
    }

    async fn execute_task(&self, task: QueuedTask) {
        tracing::info!(task_id = %task.task_id, agent = %task.agent_name, "executing task");
        match self.executor.execute(&task.agent_name, &task.instruction).await {
            Ok(outcome) => {
                if let Err(err) = self.store.complete(&task.task_id, &outcome.output).await {
                    tracing::error!(task_id = %task.task_id, %err, "failed to persist task completion");
                    return;
                }
                tracing::info!(task_id = %task.task_id, "task completed");
                if task.callback_url.is_some() {
                    let mut completed = task;
                    completed.status = TaskStatus::Completed;
                    completed.result = Some(outcome.output);
                    completed.completed_at = Some(Utc::now());
                    self.notifier.notify_task_complete(&completed).await;
                }
            }
            Err(err) => self.handle_failure(task, err.to_string()).await,
        }
    }

    async fn handle_failure(&self, mut task: QueuedTask, error: String) {
        task.retry_count += 1;
        tracing::warn!(task_id = %task.task_id, error = %error, retry_count = task.retry_count, "task execution failed");

        if task.can_retry() {
            let delay = Duration::from_secs(2u64.saturating_pow(task.retry_count.saturating_sub(1)));
            tracing::info!(task_id = %task.task_id, delay_secs = delay.as_secs(), "retrying task after backoff");
            tokio::time::sleep(delay).await;
            if let Err(err) = self.store.record_retry(&task.task_id, task.retry_count, &error).await {
                tracing::error!(task_id = %task.task_id, %err, "failed to persist retry");
            }
            return;
        }

        if let Err(err) = self.store.update_status(&task.task_id, TaskStatus::Failed, Some(&error)).await {
            tracing::error!(task_id = %task.task_id, %err, "failed to persist permanent failure");
            return;
        }
        tracing::error!(task_id = %task.task_id, retries = task.retry_count, "task permanently failed");

        if task.callback_url.is_some() {
            task.status = TaskStatus::Failed;
            task.error = Some(error);
            task.completed_at = Some(Utc::now());
            self.notifier.notify_task_complete(&task).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use warden_providers::AgentOutcome;
    use warden_types::ApprovalRequest;

    struct FlakyExecutor {
        fail_times: usize,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Executor for FlakyExecutor {
        async fn execute(&self, _agent_name: &str, _instruction: &str) -> anyhow::Result<AgentOutcome> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_times {
                anyhow::bail!("simulated failure");
            }
            Ok(AgentOutcome { output: serde_json::json!({"ok": true}), tokens_used: 10, cost_usd: 0.01 })
        }

        fn known_agents(&self) -> Vec<String> {
            vec!["KM_AGENT".to_string()]
        }
    }

    struct NoopNotifier;

    #[async_trait]
    impl Notifier for NoopNotifier {
        async fn notify_approval_required(&self, _request: &ApprovalRequest) -> bool {
            false
        }
        async fn notify_resolved(&self, _request: &ApprovalRequest) -> bool {
            false
        }
        async fn notify_task_complete(&self, _task: &QueuedTask) -> bool {
            false
        }
    }

    fn config() -> QueueConfig {
        let dir = tempfile::tempdir().unwrap();
        QueueConfig {
            db_path: dir.path().join("queue.db").to_string_lossy().to_string(),
            num_workers: 1,
            default_max_retries: 3,
            webhook_timeout: Duration::from_secs(5),
            stale_running_reclaim: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn enqueue_and_claim_succeeds_on_first_try() {
        let executor = Arc::new(FlakyExecutor { fail_times: 0, attempts: AtomicUsize::new(0) });
        let queue = Arc::new(TaskQueue::open(&config(), executor, Arc::new(NoopNotifier)).unwrap());
        let task_id = queue.enqueue("KM_AGENT", "do the thing", Priority::Normal, None, Default::default()).await.unwrap();

        let claimed = queue.store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.task_id, task_id);
        queue.execute_task(claimed).await;

        let after = queue.status(&task_id).await.unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn failed_task_retries_until_exhausted() {
        let executor = Arc::new(FlakyExecutor { fail_times: 99, attempts: AtomicUsize::new(0) });
        let queue = Arc::new(TaskQueue::open(&config(), executor, Arc::new(NoopNotifier)).unwrap());
        let task_id = queue.enqueue("KM_AGENT", "do the thing", Priority::Normal, None, Default::default()).await.unwrap();
        let mut task = queue.store.get(&task_id).await.unwrap().unwrap();
        task.max_retries = 1;

        let claimed = queue.store.claim_next().await.unwrap().unwrap();
        queue.handle_failure(claimed, "boom".to_string()).await;
        let after = queue.status(&task_id).await.unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Pending);
        assert_eq!(after.retry_count, 1);
    }

    #[tokio::test]
    async fn enqueue_applies_configured_max_retries() {
        let executor = Arc::new(FlakyExecutor { fail_times: 0, attempts: AtomicUsize::new(0) });
        let mut cfg = config();
        cfg.default_max_retries = 7;
        let queue = Arc::new(TaskQueue::open(&cfg, executor, Arc::new(NoopNotifier)).unwrap());
        let task_id = queue.enqueue("KM_AGENT", "do the thing", Priority::Normal, None, Default::default()).await.unwrap();
        let task = queue.status(&task_id).await.unwrap().unwrap();
        assert_eq!(task.max_retries, 7);
    }

    #[tokio::test]
    async fn cancel_prevents_future_claim() {
        let executor = Arc::new(FlakyExecutor { fail_times: 0, attempts: AtomicUsize::new(0) });
        let queue = Arc::new(TaskQueue::open(&config(), executor, Arc::new(NoopNotifier)).unwrap());
        let task_id = queue.enqueue("KM_AGENT", "x", Priority::Low, None, Default::default()).await.unwrap();
        assert!(queue.cancel(&task_id).await.unwrap());
        assert!(queue.store.claim_next().await.unwrap().is_none());
    }
}
