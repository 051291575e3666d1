use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveDate};
use log::{error, info, warn};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    commit::CommitEngine,
    config::ConfigStore,
    guard::StoreGuard,
    limits::{LimitEvaluator, NotificationSink},
    models::{TrackedSession, SESSION_KEY},
    normalize::{normalize_domain, normalize_path},
    retention::RetentionCollector,
    store::{decode_entry, KeyValueStore},
    tracker::events::{ActivityEvent, IdleState, TabContext},
};

/// A checkpoint older than this multiple of the heartbeat period means the
/// heartbeat alarm failed to fire; handlers reconcile before proceeding.
const MISSED_HEARTBEAT_NUM: u64 = 3;
const MISSED_HEARTBEAT_DEN: u64 = 2;

/// Drives the session lifecycle: start, refresh, and end of the tracked
/// browsing context, with commits serialized through the store guard.
///
/// Tracking state lives entirely in the ephemeral store; every handler
/// re-reads the session inside the guard, so a delta is always computed
/// against the last successfully committed checkpoint and never against a
/// stale in-memory copy.
#[derive(Clone)]
pub struct TrackerController {
    durable: Arc<dyn KeyValueStore>,
    ephemeral: Arc<dyn KeyValueStore>,
    guard: Arc<StoreGuard>,
    commit: CommitEngine,
    limits: LimitEvaluator,
    retention: Arc<RetentionCollector>,
    config: Arc<ConfigStore>,
    tickers: Arc<Mutex<Vec<JoinHandle<()>>>>,
    cancel: CancellationToken,
}

impl TrackerController {
    pub fn new(
        durable: Arc<dyn KeyValueStore>,
        ephemeral: Arc<dyn KeyValueStore>,
        config: Arc<ConfigStore>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let guard = Arc::new(StoreGuard::new());
        let commit = CommitEngine::new(durable.clone());
        let limits = LimitEvaluator::new(durable.clone(), config.clone(), notifier);
        let retention = Arc::new(RetentionCollector::new(
            durable.clone(),
            guard.clone(),
            config.clone(),
        ));

        Self {
            durable,
            ephemeral,
            guard,
            commit,
            limits,
            retention,
            config,
            tickers: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
        }
    }

    /// The durable store, shared with read-only consumers (dashboards).
    pub fn durable_store(&self) -> Arc<dyn KeyValueStore> {
        self.durable.clone()
    }

    pub async fn handle_event(&self, event: ActivityEvent) -> Result<()> {
        self.handle_event_at(event, Local::now()).await
    }

    /// Variant taking an explicit timestamp; the tickers stamp their own
    /// and tests drive time directly.
    pub async fn handle_event_at(
        &self,
        event: ActivityEvent,
        now: DateTime<Local>,
    ) -> Result<()> {
        match event {
            ActivityEvent::TabActivated(ctx) | ActivityEvent::Navigated(ctx) => {
                self.switch_to(ctx, now).await
            }
            ActivityEvent::TabClosed { tab_id } => self.close_tab(tab_id, now).await,
            ActivityEvent::FocusChanged(Some(ctx)) => self.switch_to(ctx, now).await,
            ActivityEvent::FocusChanged(None) => self.end_tracking(now).await,
            ActivityEvent::IdleStateChanged {
                state: IdleState::Active,
                context: Some(ctx),
            } => self.switch_to(ctx, now).await,
            ActivityEvent::IdleStateChanged { .. } => self.end_tracking(now).await,
            ActivityEvent::ContextVanished => self.discard_session().await,
            ActivityEvent::HeartbeatTick => self.heartbeat(now).await,
            ActivityEvent::CleanupTick => {
                self.retention.run(now.date_naive()).await?;
                Ok(())
            }
        }
    }

    /// Peek at the live session, if any.
    pub async fn current_session(&self) -> Result<Option<TrackedSession>> {
        self.read_session().await
    }

    async fn switch_to(&self, ctx: TabContext, now: DateTime<Local>) -> Result<()> {
        let _permit = self.guard.acquire().await;
        let session = self.read_session().await?;

        if ctx.incognito {
            // A context that went private mid-session drops its dangling
            // remainder uncommitted; privacy over completeness.
            if session.is_some() {
                self.clear_session().await?;
                info!("dropped tracked session for a private context");
            }
            return Ok(());
        }

        let Some(domain) = normalize_domain(&ctx.url) else {
            if let Some(session) = session {
                self.terminal_commit(&session, now).await?;
            }
            return Ok(());
        };
        let path = normalize_path(&ctx.url);

        if let Some(session) = session {
            if session.matches(&domain, &path, ctx.tab_id) {
                // Duplicate activation of the attributed context.
                return self.maybe_reconcile(&session, now).await;
            }
            // A domain or path change is a full end+start cycle, never an
            // in-place update of the running session.
            self.terminal_commit(&session, now).await?;
        }

        let fresh = TrackedSession::new(domain, path, ctx.tab_id, ctx.window_id, now);
        self.write_session(&fresh).await?;
        Ok(())
    }

    async fn close_tab(&self, tab_id: i64, now: DateTime<Local>) -> Result<()> {
        let _permit = self.guard.acquire().await;
        let Some(session) = self.read_session().await? else {
            return Ok(());
        };
        if session.tab_id != tab_id {
            return Ok(());
        }
        self.terminal_commit(&session, now).await
    }

    async fn end_tracking(&self, now: DateTime<Local>) -> Result<()> {
        let _permit = self.guard.acquire().await;
        if let Some(session) = self.read_session().await? {
            self.terminal_commit(&session, now).await?;
        }
        Ok(())
    }

    async fn discard_session(&self) -> Result<()> {
        let _permit = self.guard.acquire().await;
        if self.read_session().await?.is_some() {
            self.clear_session().await?;
            warn!("attributed context vanished; discarding session without commit");
        }
        Ok(())
    }

    async fn heartbeat(&self, now: DateTime<Local>) -> Result<()> {
        let _permit = self.guard.acquire().await;
        let Some(session) = self.read_session().await? else {
            return Ok(());
        };
        self.incremental_commit(session, now).await
    }

    /// Commit the elapsed delta, keep the session alive with its
    /// checkpoint advanced. Caller holds the guard.
    async fn incremental_commit(
        &self,
        mut session: TrackedSession,
        now: DateTime<Local>,
    ) -> Result<()> {
        let outcome = self.commit.apply(&session, now).await?;
        if outcome.advanced {
            session.last_checkpoint = now;
            self.write_session(&session).await?;
        }
        self.limits.check_domain(&session.domain, now.date_naive()).await
    }

    /// Commit the elapsed delta and discard the session. Caller holds the
    /// guard.
    async fn terminal_commit(
        &self,
        session: &TrackedSession,
        now: DateTime<Local>,
    ) -> Result<()> {
        self.commit.apply(session, now).await?;
        self.clear_session().await?;
        self.limits.check_domain(&session.domain, now.date_naive()).await
    }

    /// Detects a heartbeat the host failed to deliver and commits the
    /// overdue interval before the caller proceeds. Caller holds the guard.
    async fn maybe_reconcile(
        &self,
        session: &TrackedSession,
        now: DateTime<Local>,
    ) -> Result<()> {
        let heartbeat_secs = self.config.config().heartbeat_secs;
        let stale_ms = (heartbeat_secs * 1000 * MISSED_HEARTBEAT_NUM / MISSED_HEARTBEAT_DEN) as i64;
        let elapsed_ms = (now - session.last_checkpoint).num_milliseconds();
        if elapsed_ms > stale_ms {
            warn!(
                "checkpoint for {} is {}ms stale; reconciling missed heartbeat",
                session.domain, elapsed_ms
            );
            return self.incremental_commit(session.clone(), now).await;
        }
        Ok(())
    }

    async fn read_session(&self) -> Result<Option<TrackedSession>> {
        let fetched = self.ephemeral.get(&[SESSION_KEY.to_string()]).await?;
        decode_entry(&fetched, SESSION_KEY)
    }

    async fn write_session(&self, session: &TrackedSession) -> Result<()> {
        let mut entries = HashMap::new();
        entries.insert(SESSION_KEY.to_string(), serde_json::to_value(session)?);
        self.ephemeral.set(entries).await
    }

    async fn clear_session(&self) -> Result<()> {
        self.ephemeral.remove(&[SESSION_KEY.to_string()]).await
    }

    /// Spawns the periodic heartbeat driving incremental commits. At most
    /// one heartbeat period of data is ever unflushed.
    pub async fn spawn_heartbeat(&self) {
        let controller = self.clone();
        let cancel = self.cancel.clone();
        let period = Duration::from_secs(self.config.config().heartbeat_secs);

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = controller.handle_event(ActivityEvent::HeartbeatTick).await {
                            error!("heartbeat commit failed: {err:?}");
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("heartbeat ticker shutting down");
                        break;
                    }
                }
            }
        });

        self.tickers.lock().await.push(handle);
    }

    /// Spawns the daily retention tick at the configured local hour.
    pub async fn spawn_cleanup(&self) {
        let controller = self.clone();
        let cancel = self.cancel.clone();
        let hour = self.config.config().cleanup_hour;

        let handle = tokio::spawn(async move {
            loop {
                let wait = match duration_until_hour(Local::now(), hour) {
                    Ok(wait) => wait,
                    Err(err) => {
                        error!("cannot schedule retention pass: {err:?}");
                        break;
                    }
                };

                tokio::select! {
                    _ = time::sleep(wait) => {
                        if let Err(err) = controller.handle_event(ActivityEvent::CleanupTick).await {
                            error!("retention pass failed: {err:?}");
                        }
                    }
                    _ = cancel.cancelled() => {
                        info!("cleanup ticker shutting down");
                        break;
                    }
                }
            }
        });

        self.tickers.lock().await.push(handle);
    }

    /// Stops the background tickers. Does not commit; the checkpoint-based
    /// design recovers the open interval on the next start.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        for handle in self.tickers.lock().await.drain(..) {
            if let Err(err) = handle.await {
                error!("ticker task failed to join: {err}");
            }
        }
    }
}

/// Time until the next occurrence of `hour:00:00` local, strictly in the
/// future.
fn duration_until_hour(now: DateTime<Local>, hour: u32) -> Result<Duration> {
    let today = now
        .date_naive()
        .and_hms_opt(hour, 0, 0)
        .ok_or_else(|| anyhow!("invalid cleanup hour {hour}"))?
        .and_local_timezone(Local)
        .earliest();

    let target = match today {
        Some(target) if target > now => target,
        _ => now
            .date_naive()
            .succ_opt()
            .ok_or_else(|| anyhow!("calendar overflow"))?
            .and_hms_opt(hour, 0, 0)
            .ok_or_else(|| anyhow!("invalid cleanup hour {hour}"))?
            .and_local_timezone(Local)
            .earliest()
            .ok_or_else(|| anyhow!("no local representation for cleanup hour {hour}"))?,
    };

    Ok((target - now).to_std().unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_duration_until_hour_rolls_to_tomorrow() {
        let now = Local
            .with_ymd_and_hms(2026, 6, 1, 4, 0, 0)
            .single()
            .unwrap();
        let wait = duration_until_hour(now, 3).unwrap();
        assert_eq!(wait, Duration::from_secs(23 * 3600));
    }

    #[test]
    fn test_duration_until_hour_later_today() {
        let now = Local
            .with_ymd_and_hms(2026, 6, 1, 1, 30, 0)
            .single()
            .unwrap();
        let wait = duration_until_hour(now, 3).unwrap();
        assert_eq!(wait, Duration::from_secs(90 * 60));
    }
}
