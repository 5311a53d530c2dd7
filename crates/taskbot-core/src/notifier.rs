//! Reminder sweeps.
//!
//! Every sweep queries due, unsent, incomplete tasks, sends a reminder for each and marks it sent
//! right after a successful send. A failed send leaves the flag alone so the next sweep retries.
//! A crash between send and mark yields a duplicate reminder (at-least-once).

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{
    audit::{AuditEvent, AuditLogger, FailureKind},
    domain::ReminderCandidate,
    menu::{Destination, MenuService},
    store::TaskStore,
    utils::{start_interval_loop, IntervalController},
};

#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    pub interval: Duration,
    /// Pause between two sends within one sweep.
    pub send_delay: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            send_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub found: usize,
    pub sent: usize,
    pub failed: usize,
    /// Owner has no delivery target.
    pub skipped: usize,
}

#[derive(Clone)]
pub struct NotificationScheduler {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    cfg: SchedulerConfig,
    store: Arc<dyn TaskStore>,
    menus: Arc<MenuService>,
    audit: Arc<AuditLogger>,
    // Serializes timer sweeps and manual sweeps.
    sweep_lock: Mutex<()>,
    ticker: Mutex<Option<IntervalController>>,
}

impl NotificationScheduler {
    pub fn new(
        cfg: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        menus: Arc<MenuService>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                cfg,
                store,
                menus,
                audit,
                sweep_lock: Mutex::new(()),
                ticker: Mutex::new(None),
            }),
        }
    }

    /// Start the periodic sweep (first sweep runs immediately). `false` if already running.
    pub async fn start(&self) -> bool {
        let mut ticker = self.inner.ticker.lock().await;
        if ticker.is_some() {
            return false;
        }

        let me = self.clone();
        *ticker = Some(start_interval_loop(self.inner.cfg.interval, move |token| {
            let me = me.clone();
            async move {
                me.sweep_with(Some(&token)).await;
            }
        }));
        tracing::info!(
            interval_secs = self.inner.cfg.interval.as_secs(),
            "notification scheduler started"
        );
        true
    }

    /// Stop the timer and wait for a running sweep to wind down.
    pub async fn stop(&self) -> bool {
        let ctl = self.inner.ticker.lock().await.take();
        match ctl {
            Some(ctl) => {
                ctl.stop().await;
                tracing::info!("notification scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.inner.ticker.lock().await.is_some()
    }

    /// Run one sweep now.
    pub async fn sweep(&self) -> SweepReport {
        self.sweep_with(None).await
    }

    async fn sweep_with(&self, cancel: Option<&CancellationToken>) -> SweepReport {
        let _guard = self.inner.sweep_lock.lock().await;
        let mut report = SweepReport::default();

        let candidates = match self
            .inner
            .store
            .find_due_unsent_incomplete_tasks(Utc::now())
            .await
        {
            Ok(v) => v,
            Err(e) => {
                self.inner.audit.record(AuditEvent::new(
                    FailureKind::Store,
                    "sweep",
                    format!("due task query failed: {e}"),
                ));
                return report;
            }
        };
        report.found = candidates.len();

        let mut attempted = false;
        for candidate in candidates {
            if cancel.is_some_and(CancellationToken::is_cancelled) {
                break;
            }
            let Some((cred, chat_id)) = candidate.owner.delivery_target() else {
                tracing::debug!(task_id = %candidate.task.id, "owner has no telegram target");
                report.skipped += 1;
                continue;
            };

            if attempted && !self.inner.cfg.send_delay.is_zero() {
                tokio::time::sleep(self.inner.cfg.send_delay).await;
            }
            attempted = true;

            let dest = Destination::new(cred, chat_id);
            if self.notify(&dest, &candidate).await {
                report.sent += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.found > 0 {
            tracing::info!(
                found = report.found,
                sent = report.sent,
                failed = report.failed,
                skipped = report.skipped,
                "reminder sweep finished"
            );
        }
        report
    }

    async fn notify(&self, dest: &Destination, candidate: &ReminderCandidate) -> bool {
        let task = &candidate.task;
        match self.inner.menus.send_reminder(dest, task).await {
            Ok(true) => {}
            // Delivery failures are audited by the gateway.
            Ok(false) => return false,
            Err(e) => {
                self.inner.audit.record(
                    AuditEvent::new(FailureKind::Render, "reminder", e.to_string())
                        .credential(&dest.cred)
                        .chat(dest.chat_id)
                        .task(&task.id),
                );
                return false;
            }
        }

        if let Err(e) = self.inner.store.mark_notification_sent(&task.id).await {
            self.inner.audit.record(
                AuditEvent::new(
                    FailureKind::Store,
                    "mark_notification_sent",
                    format!("reminder delivered but not marked: {e}"),
                )
                .chat(dest.chat_id)
                .task(&task.id),
            );
        } else {
            tracing::info!(task_id = %task.id, chat_id = %dest.chat_id, "reminder sent");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        menu::MenuConfig,
        store::TaskStore,
        testing::{task, user, FakeGateway, RecordingStore},
    };
    use chrono::Duration as ChronoDuration;

    struct Harness {
        store: Arc<RecordingStore>,
        gw: Arc<FakeGateway>,
        audit: Arc<AuditLogger>,
        scheduler: NotificationScheduler,
    }

    async fn harness(interval: Duration) -> Harness {
        let store = Arc::new(RecordingStore::default());
        store.inner.insert_user(user("u1", Some(7))).await.unwrap();
        let gw = Arc::new(FakeGateway::default());
        let audit = Arc::new(AuditLogger::in_memory());
        let menus = Arc::new(MenuService::new(
            store.clone(),
            gw.clone(),
            MenuConfig::default(),
        ));
        let scheduler = NotificationScheduler::new(
            SchedulerConfig {
                interval,
                send_delay: Duration::from_millis(1),
            },
            store.clone(),
            menus,
            audit.clone(),
        );
        Harness {
            store,
            gw,
            audit,
            scheduler,
        }
    }

    async fn due_task(h: &Harness, id: &str, owner: &str) {
        let mut t = task(id, owner);
        t.title = format!("Pay rent {id}");
        t.notify_at = Some(Utc::now() - ChronoDuration::minutes(1));
        h.store.inner.insert_task(t).await.unwrap();
    }

    #[tokio::test]
    async fn one_sweep_sends_and_marks_once() {
        let h = harness(Duration::from_secs(3600)).await;
        due_task(&h, "t1", "u1").await;

        let report = h.scheduler.sweep().await;

        assert_eq!(report.sent, 1);
        let sent = h.gw.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].text.contains("Pay rent t1"));
        assert_eq!(
            sent[0]
                .markup
                .as_ref()
                .and_then(|m| m.as_inline())
                .map(|k| k.callback_data()),
            Some(vec!["complete_task_t1"])
        );
        assert_eq!(h.store.calls(), vec!["mark_notification_sent:t1".to_string()]);
        assert!(h.store.find_task("t1").await.unwrap().unwrap().notification_sent);

        let second = h.scheduler.sweep().await;
        assert_eq!(second, SweepReport::default());
        assert_eq!(h.gw.sent().len(), 1);
    }

    #[tokio::test]
    async fn failed_send_leaves_flag_for_next_sweep() {
        let h = harness(Duration::from_secs(3600)).await;
        due_task(&h, "t1", "u1").await;
        h.gw.fail_sends(true);

        let report = h.scheduler.sweep().await;
        assert_eq!((report.found, report.failed), (1, 1));
        assert!(h.store.calls().is_empty());
        assert!(!h.store.find_task("t1").await.unwrap().unwrap().notification_sent);

        h.gw.fail_sends(false);
        assert_eq!(h.scheduler.sweep().await.sent, 1);
    }

    #[tokio::test]
    async fn mark_failure_is_audited() {
        let h = harness(Duration::from_secs(3600)).await;
        due_task(&h, "t1", "u1").await;
        h.store.fail_mark_sent(true);

        let report = h.scheduler.sweep().await;
        assert_eq!(report.sent, 1);
        assert_eq!(h.audit.count(FailureKind::Store), 1);
    }

    #[tokio::test]
    async fn rescheduling_rearms_the_reminder() {
        let h = harness(Duration::from_secs(3600)).await;
        due_task(&h, "t1", "u1").await;
        h.scheduler.sweep().await;

        h.store
            .reschedule_task("t1", Some(Utc::now() - ChronoDuration::seconds(1)))
            .await
            .unwrap();
        assert!(!h.store.find_task("t1").await.unwrap().unwrap().notification_sent);

        assert_eq!(h.scheduler.sweep().await.sent, 1);
        assert_eq!(h.gw.sent().len(), 2);
    }

    #[tokio::test]
    async fn owners_without_target_are_skipped() {
        let h = harness(Duration::from_secs(3600)).await;
        h.store.inner.insert_user(user("u2", None)).await.unwrap();
        due_task(&h, "t2", "u2").await;

        let report = h.scheduler.sweep().await;
        assert_eq!((report.found, report.skipped, report.sent), (1, 1, 0));
        assert!(h.gw.sent().is_empty());
    }

    #[tokio::test]
    async fn start_runs_an_immediate_sweep_and_is_single_instance() {
        let h = harness(Duration::from_secs(3600)).await;
        due_task(&h, "t1", "u1").await;

        assert!(h.scheduler.start().await);
        assert!(!h.scheduler.start().await);
        assert!(h.scheduler.is_running().await);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.gw.sent().len(), 1);

        assert!(h.scheduler.stop().await);
        assert!(!h.scheduler.is_running().await);
        assert!(!h.scheduler.stop().await);
    }
}
