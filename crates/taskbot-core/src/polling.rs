//! Long-poll loops, one per bot credential.
//!
//! The registry (credential -> running loop) is the only shared mutable state and is guarded by a
//! single async mutex. Starting a credential that already runs is a no-op. Stopping joins the
//! loop's in-flight tick before the lock is released; `restart_polling` tears everything down and
//! rebuilds from the store, which picks up newly configured bots.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    audit::{AuditEvent, AuditLogger, FailureKind},
    dispatcher::UpdateDispatcher,
    domain::BotCredential,
    messaging::port::BotGateway,
    store::TaskStore,
    utils::{start_interval_loop, IntervalController},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct PollingConfig {
    pub interval: Duration,
    /// Max updates per fetch.
    pub limit: u8,
    /// Server-side long-poll timeout.
    pub timeout: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            limit: 10,
            timeout: Duration::from_secs(1),
        }
    }
}

/// Fetch/dispatch/advance for one credential.
pub struct PollWorker {
    cred: BotCredential,
    cfg: PollingConfig,
    offset: AtomicI64,
    gateway: Arc<dyn BotGateway>,
    dispatcher: Arc<UpdateDispatcher>,
}

impl PollWorker {
    pub fn new(
        cred: BotCredential,
        cfg: PollingConfig,
        gateway: Arc<dyn BotGateway>,
        dispatcher: Arc<UpdateDispatcher>,
    ) -> Self {
        Self::resume(cred, cfg, gateway, dispatcher, 0)
    }

    /// Worker that continues from `offset` (a previous loop's position).
    pub fn resume(
        cred: BotCredential,
        cfg: PollingConfig,
        gateway: Arc<dyn BotGateway>,
        dispatcher: Arc<UpdateDispatcher>,
        offset: i64,
    ) -> Self {
        Self {
            cred,
            cfg,
            offset: AtomicI64::new(offset),
            gateway,
            dispatcher,
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset.load(Ordering::SeqCst)
    }

    /// One poll tick. Returns how many updates were handed to the dispatcher.
    ///
    /// Cancellation is checked before every dispatch: the rest of the batch is dropped and the
    /// offset stays put, so a successor loop fetches those updates again. Otherwise the offset
    /// moves past each update whatever the dispatch outcome, so a poisoned update is never
    /// fetched again.
    pub async fn tick(&self, cancel: &CancellationToken) -> usize {
        let batch = self
            .gateway
            .poll(&self.cred, self.offset(), self.cfg.limit, self.cfg.timeout)
            .await;

        let total = batch.len();
        let mut handled = 0usize;
        for raw in batch {
            if cancel.is_cancelled() {
                tracing::debug!(
                    credential = %self.cred,
                    discarded = total - handled,
                    "polling stopped, discarding rest of batch"
                );
                break;
            }
            let outcome = self.dispatcher.dispatch_raw(&raw).await;
            self.offset.fetch_max(raw.id.saturating_add(1), Ordering::SeqCst);
            tracing::debug!(credential = %self.cred, update_id = raw.id, ?outcome, "update handled");
            handled += 1;
        }
        handled
    }
}

struct PollEntry {
    worker: Arc<PollWorker>,
    ticker: IntervalController,
}

#[derive(Clone)]
pub struct PollingManager {
    inner: Arc<PollingInner>,
}

struct PollingInner {
    cfg: PollingConfig,
    store: Arc<dyn TaskStore>,
    gateway: Arc<dyn BotGateway>,
    dispatcher: Arc<UpdateDispatcher>,
    audit: Arc<AuditLogger>,
    loops: Mutex<HashMap<BotCredential, PollEntry>>,
}

impl PollingManager {
    pub fn new(
        cfg: PollingConfig,
        store: Arc<dyn TaskStore>,
        gateway: Arc<dyn BotGateway>,
        dispatcher: Arc<UpdateDispatcher>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            inner: Arc::new(PollingInner {
                cfg,
                store,
                gateway,
                dispatcher,
                audit,
                loops: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start one loop per configured credential. Returns how many loops were newly started.
    pub async fn start_polling(&self) -> Result<usize> {
        let creds = self.polling_credentials("start_polling").await?;

        let mut loops = self.inner.loops.lock().await;
        let mut started = 0usize;
        for cred in creds {
            if self.spawn_locked(&mut loops, cred, 0) {
                started += 1;
            }
        }
        tracing::info!(started, active = loops.len(), "polling started");
        Ok(started)
    }

    /// `false` when the credential is empty or already has a running loop.
    pub async fn start_user_polling(&self, cred: BotCredential) -> bool {
        let mut loops = self.inner.loops.lock().await;
        self.spawn_locked(&mut loops, cred, 0)
    }

    /// Stop the loop for `cred` and wait for its in-flight tick. An unfinished batch is dropped.
    pub async fn stop_user_polling(&self, cred: &BotCredential) -> bool {
        let mut loops = self.inner.loops.lock().await;
        match loops.remove(cred) {
            Some(entry) => {
                entry.ticker.stop().await;
                tracing::info!(credential = %cred, "polling loop stopped");
                true
            }
            None => false,
        }
    }

    pub async fn stop_all_polling(&self) -> usize {
        let mut loops = self.inner.loops.lock().await;
        let stopped = Self::drain_locked(&mut loops).await.len();
        if stopped > 0 {
            tracing::info!(stopped, "all polling loops stopped");
        }
        stopped
    }

    /// Stop every loop, then start one per credential now in the store.
    ///
    /// The registry lock is held throughout, so no loop for a credential can start before its
    /// predecessor has finished. Credentials that survive the restart keep their offset.
    pub async fn restart_polling(&self) -> Result<usize> {
        let mut loops = self.inner.loops.lock().await;
        let offsets = Self::drain_locked(&mut loops).await;
        let creds = self.polling_credentials("restart_polling").await?;

        let mut started = 0usize;
        for cred in creds {
            let offset = offsets.get(&cred).copied().unwrap_or(0);
            if self.spawn_locked(&mut loops, cred, offset) {
                started += 1;
            }
        }
        tracing::info!(started, "polling restarted");
        Ok(started)
    }

    /// Stop everything and wait for in-flight ticks to finish.
    pub async fn shutdown(&self) {
        let mut loops = self.inner.loops.lock().await;
        Self::drain_locked(&mut loops).await;
    }

    async fn polling_credentials(&self, op: &str) -> Result<Vec<BotCredential>> {
        match self.inner.store.find_polling_credentials().await {
            Ok(creds) => Ok(creds),
            Err(e) => {
                self.inner.audit.record(AuditEvent::new(
                    FailureKind::Store,
                    op,
                    format!("credential lookup failed: {e}"),
                ));
                Err(e)
            }
        }
    }

    fn spawn_locked(
        &self,
        loops: &mut HashMap<BotCredential, PollEntry>,
        cred: BotCredential,
        offset: i64,
    ) -> bool {
        if cred.expose().is_empty() {
            return false;
        }
        if loops.contains_key(&cred) {
            tracing::debug!(credential = %cred, "polling already running");
            return false;
        }

        let worker = Arc::new(PollWorker::resume(
            cred.clone(),
            self.inner.cfg,
            self.inner.gateway.clone(),
            self.inner.dispatcher.clone(),
            offset,
        ));
        let w = worker.clone();
        let ticker = start_interval_loop(self.inner.cfg.interval, move |token| {
            let w = w.clone();
            async move {
                w.tick(&token).await;
            }
        });

        tracing::info!(credential = %cred, offset, "polling loop started");
        loops.insert(cred, PollEntry { worker, ticker });
        true
    }

    /// Stop and join every loop. Returns each stopped credential's next offset.
    async fn drain_locked(
        loops: &mut HashMap<BotCredential, PollEntry>,
    ) -> HashMap<BotCredential, i64> {
        let mut offsets = HashMap::with_capacity(loops.len());
        for (cred, entry) in loops.drain() {
            entry.ticker.stop().await;
            offsets.insert(cred, entry.worker.offset());
        }
        offsets
    }

    pub async fn is_polling(&self, cred: &BotCredential) -> bool {
        self.inner.loops.lock().await.contains_key(cred)
    }

    pub async fn active_count(&self) -> usize {
        self.inner.loops.lock().await.len()
    }

    /// Next offset the loop for `cred` will fetch from.
    pub async fn offset(&self, cred: &BotCredential) -> Option<i64> {
        self.inner
            .loops
            .lock()
            .await
            .get(cred)
            .map(|e| e.worker.offset())
    }
}
