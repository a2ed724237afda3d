//! Timer trigger scheduling.
//!
//! Every enabled timer trigger gets its own tokio task that sleeps until the
//! next fire time and then invokes the scheduler's callback. Jobs are keyed
//! by workflow so a workflow's timers can be replaced or removed together.
//! There is no coordination between processes: two instances scheduling the
//! same workflow both fire.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use capflow_types::workflow::{TriggerConfig, Workflow};
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::schedule::{ScheduleError, TimerSchedule};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("scheduler is not running")]
    NotStarted,

    #[error("timer trigger '{trigger_id}': {source}")]
    InvalidSchedule {
        trigger_id: String,
        #[source]
        source: ScheduleError,
    },

    #[error("workflow {0} has no scheduled timers")]
    WorkflowNotFound(Uuid),
}

// ---------------------------------------------------------------------------
// TimerScheduler
// ---------------------------------------------------------------------------

/// One timer firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
    pub workflow_id: Uuid,
    pub trigger_id: String,
    /// Scheduled fire time (not the wall-clock time of the wake-up).
    pub fired_at: DateTime<Utc>,
}

/// Invoked for every fire; usually dispatches a timer `TriggerEvent`.
pub type TimerCallback = Arc<dyn Fn(TimerFire) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wake-ups later than this after the scheduled time are reported.
const LATE_FIRE_TOLERANCE_SECS: i64 = 5;

struct TimerJob {
    trigger_id: String,
    schedule: TimerSchedule,
    handle: JoinHandle<()>,
}

pub struct TimerScheduler {
    callback: TimerCallback,
    /// `None` while stopped. Cancelling it stops every job.
    root: RwLock<Option<CancellationToken>>,
    jobs: RwLock<HashMap<Uuid, Vec<TimerJob>>>,
}

impl TimerScheduler {
    pub fn new(callback: TimerCallback) -> Self {
        Self {
            callback,
            root: RwLock::new(None),
            jobs: RwLock::new(HashMap::new()),
        }
    }

    pub async fn start(&self) {
        let mut root = self.root.write().await;
        if root.is_none() {
            *root = Some(CancellationToken::new());
            tracing::info!("timer scheduler started");
        }
    }

    /// Stop every job and forget all registrations.
    pub async fn stop(&self) {
        if let Some(root) = self.root.write().await.take() {
            root.cancel();
            tracing::info!("timer scheduler stopped");
        }
        self.jobs.write().await.clear();
    }

    /// Schedule every enabled timer trigger of `workflow`, replacing any
    /// timers it had before. Returns the number of jobs started.
    ///
    /// All schedules are parsed before anything is replaced, so an invalid
    /// one leaves the previous registration in place.
    pub async fn schedule_workflow(&self, workflow: &Workflow) -> Result<usize, SchedulerError> {
        let root = self
            .root
            .read()
            .await
            .clone()
            .ok_or(SchedulerError::NotStarted)?;

        let mut parsed = Vec::new();
        for trigger in workflow.triggers.iter().filter(|t| t.enabled) {
            if let TriggerConfig::Timer { cron, timezone } = &trigger.config {
                let schedule = TimerSchedule::parse(cron, timezone).map_err(|source| {
                    SchedulerError::InvalidSchedule {
                        trigger_id: trigger.trigger_id.clone(),
                        source,
                    }
                })?;
                parsed.push((trigger.trigger_id.clone(), schedule));
            }
        }

        let mut jobs = self.jobs.write().await;
        if let Some(old) = jobs.remove(&workflow.id) {
            old.iter().for_each(|job| job.handle.abort());
        }
        if parsed.is_empty() {
            return Ok(0);
        }

        let started: Vec<TimerJob> = parsed
            .into_iter()
            .map(|(trigger_id, schedule)| {
                let handle = tokio::spawn(run_timer(
                    workflow.id,
                    trigger_id.clone(),
                    schedule.clone(),
                    Arc::clone(&self.callback),
                    root.child_token(),
                ));
                tracing::info!(
                    workflow_id = %workflow.id,
                    %trigger_id,
                    cron = schedule.expression(),
                    "timer scheduled"
                );
                TimerJob {
                    trigger_id,
                    schedule,
                    handle,
                }
            })
            .collect();
        let count = started.len();
        jobs.insert(workflow.id, started);
        Ok(count)
    }

    pub async fn unschedule_workflow(&self, workflow_id: &Uuid) -> Result<(), SchedulerError> {
        let jobs = self
            .jobs
            .write()
            .await
            .remove(workflow_id)
            .ok_or(SchedulerError::WorkflowNotFound(*workflow_id))?;
        jobs.iter().for_each(|job| job.handle.abort());
        tracing::info!(%workflow_id, "timers unscheduled");
        Ok(())
    }

    /// Next fire time of each scheduled timer of a workflow.
    pub async fn next_fires(&self, workflow_id: &Uuid) -> Vec<(String, Option<DateTime<Utc>>)> {
        let now = Utc::now();
        self.jobs
            .read()
            .await
            .get(workflow_id)
            .map(|jobs| {
                jobs.iter()
                    .map(|job| (job.trigger_id.clone(), job.schedule.next_after(now)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn workflow_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.values().map(Vec::len).sum()
    }
}

async fn run_timer(
    workflow_id: Uuid,
    trigger_id: String,
    schedule: TimerSchedule,
    callback: TimerCallback,
    cancel: CancellationToken,
) {
    let mut last_fire: Option<DateTime<Utc>> = None;
    loop {
        // Never fire the same slot twice, even if the clock lags the sleep.
        let now = Utc::now();
        let after = last_fire.map_or(now, |last| last.max(now));
        let Some(next) = schedule.next_after(after) else {
            tracing::warn!(%workflow_id, %trigger_id, "timer has no future fire times");
            return;
        };

        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let woke = Utc::now();
        if (woke - next).num_seconds() > LATE_FIRE_TOLERANCE_SECS {
            let skipped = schedule.missed_between(next, woke);
            if !skipped.is_empty() {
                tracing::warn!(
                    %workflow_id,
                    %trigger_id,
                    skipped = skipped.len(),
                    "timer woke late; skipped fires are not replayed"
                );
            }
        }

        tracing::debug!(%workflow_id, %trigger_id, fired_at = %next, "timer fired");
        callback(TimerFire {
            workflow_id,
            trigger_id: trigger_id.clone(),
            fired_at: next,
        })
        .await;
        last_fire = Some(next);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn workflow(cron: &str) -> Workflow {
        serde_json::from_value(json!({
            "name": "ticker",
            "nodes": [{"node_id": "start", "name": "Start", "type": "manual-trigger"}],
            "triggers": [
                {"trigger_id": "tick", "type": "timer", "cron": cron},
                {"trigger_id": "paused", "type": "timer", "cron": cron, "enabled": false},
                {"trigger_id": "hook", "type": "webhook", "path": "ticker"}
            ]
        }))
        .unwrap()
    }

    fn recording() -> (TimerCallback, mpsc::UnboundedReceiver<TimerFire>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: TimerCallback = Arc::new(move |fire| {
            let tx = tx.clone();
            Box::pin(async move {
                let _ = tx.send(fire);
            })
        });
        (callback, rx)
    }

    #[tokio::test]
    async fn schedule_before_start_fails() {
        let (callback, _rx) = recording();
        let scheduler = TimerScheduler::new(callback);
        assert!(matches!(
            scheduler.schedule_workflow(&workflow("daily")).await,
            Err(SchedulerError::NotStarted)
        ));
    }

    #[tokio::test]
    async fn only_enabled_timers_are_scheduled() {
        let (callback, _rx) = recording();
        let scheduler = TimerScheduler::new(callback);
        scheduler.start().await;
        let wf = workflow("every day at 09:30");

        assert_eq!(scheduler.schedule_workflow(&wf).await.unwrap(), 1);
        // Re-scheduling replaces rather than duplicates.
        assert_eq!(scheduler.schedule_workflow(&wf).await.unwrap(), 1);
        assert_eq!(scheduler.job_count().await, 1);

        let next = scheduler.next_fires(&wf.id).await;
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].0, "tick");
        assert!(next[0].1.unwrap() > Utc::now());

        scheduler.unschedule_workflow(&wf.id).await.unwrap();
        assert_eq!(scheduler.workflow_count().await, 0);
        assert!(scheduler.unschedule_workflow(&wf.id).await.is_err());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn invalid_schedule_keeps_previous_registration() {
        let (callback, _rx) = recording();
        let scheduler = TimerScheduler::new(callback);
        scheduler.start().await;
        let mut wf = workflow("hourly");
        scheduler.schedule_workflow(&wf).await.unwrap();

        wf.triggers[0].config = TriggerConfig::Timer {
            cron: "whenever".to_string(),
            timezone: "UTC".to_string(),
        };
        assert!(matches!(
            scheduler.schedule_workflow(&wf).await,
            Err(SchedulerError::InvalidSchedule { .. })
        ));
        assert_eq!(scheduler.job_count().await, 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn fires_with_distinct_scheduled_times() {
        let (callback, mut rx) = recording();
        let scheduler = TimerScheduler::new(callback);
        scheduler.start().await;
        let wf = workflow("every 1 seconds");
        scheduler.schedule_workflow(&wf).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let second = tokio::time::timeout(Duration::from_secs(3), rx.recv())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(first.workflow_id, wf.id);
        assert_eq!(first.trigger_id, "tick");
        assert!(second.fired_at > first.fired_at);

        scheduler.stop().await;
        assert_eq!(scheduler.workflow_count().await, 0);
    }
}
