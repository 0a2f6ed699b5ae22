//! Collection loop controller.
//!
//! Runs the open-ended recommendation-feed scraping loop for one browser
//! profile: classify each presented item, skip with a counted reason or
//! collect it (with a bounded, interruptible dwell for tracked-group
//! channels), and terminate safely on an explicit stop, a duration or
//! count bound, or an unrecoverable driver failure. Partial results
//! already persisted stay in the store; there is no rollback.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;

use skein_contract::{
    BrowserDriver, CollectedItem, CollectionStats, ContentStore, FeedItem, OrchestrationError,
    SkipReason, StopReason,
};
use skein_core::{
    current_unix_timestamp_ms, elapsed_seconds_since, sleep_unless_cancelled, CancelToken,
};
use skein_events::{BusEvent, CollectionEvent, CollectionEventKind, ProgressBus};
use skein_locks::{ProfileLockRegistry, ProfileLockToken};

#[cfg(test)]
mod tests;

const SESSION_ID_PREFIX: &str = "collect";
const DEFAULT_MAX_ITEM_AGE_DAYS: u32 = 120;
const DEFAULT_DWELL_CAP_MS: u64 = 30_000;
const DEFAULT_ADVANCE_DELAY_MS: u64 = 3_000;
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Options for one collection session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionOptions {
    pub profile_id: String,
    /// Wall-clock bound in seconds; 0 = unbounded.
    pub duration_seconds: u64,
    /// Collected-item bound; 0 = unbounded.
    pub max_count: u64,
    /// Every channel handle registered in the system.
    pub known_channels: HashSet<String>,
    /// Subset of known channels whose items are dwelled on before
    /// collecting; known channels outside it are skipped.
    pub tracked_group: HashSet<String>,
    /// Items older than this are skipped; 0 disables the age check.
    pub max_item_age_days: u32,
    /// Upper bound on the simulated viewing dwell.
    pub dwell_cap_ms: u64,
    /// Delay between items after advancing the feed.
    pub advance_delay_ms: u64,
    /// Deadline for one feed fetch; exceeding it stops the loop as an
    /// unrecoverable driver failure rather than hanging.
    pub fetch_timeout_ms: u64,
}

impl CollectionOptions {
    pub fn for_profile(profile_id: impl Into<String>) -> Self {
        Self {
            profile_id: profile_id.into(),
            duration_seconds: 0,
            max_count: 0,
            known_channels: HashSet::new(),
            tracked_group: HashSet::new(),
            max_item_age_days: DEFAULT_MAX_ITEM_AGE_DAYS,
            dwell_cap_ms: DEFAULT_DWELL_CAP_MS,
            advance_delay_ms: DEFAULT_ADVANCE_DELAY_MS,
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
        }
    }
}

/// Snapshot returned by `status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CollectionStatusReport {
    pub is_collecting: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub stats: CollectionStats,
}

struct ActiveSession {
    session_id: String,
    token: CancelToken,
    stats: Arc<Mutex<CollectionStats>>,
}

struct CollectInner {
    driver: Arc<dyn BrowserDriver>,
    store: Arc<dyn ContentStore>,
    bus: ProgressBus,
    locks: ProfileLockRegistry,
    active: Mutex<Option<ActiveSession>>,
    last_stats: Mutex<CollectionStats>,
}

/// Owns at most one collection session at a time.
#[derive(Clone)]
pub struct CollectionController {
    inner: Arc<CollectInner>,
}

impl CollectionController {
    pub fn new(
        driver: Arc<dyn BrowserDriver>,
        store: Arc<dyn ContentStore>,
        bus: ProgressBus,
        locks: ProfileLockRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(CollectInner {
                driver,
                store,
                bus,
                locks,
                active: Mutex::new(None),
                last_stats: Mutex::new(CollectionStats::default()),
            }),
        }
    }

    /// Starts a collection session and returns its id.
    ///
    /// Rejects a second concurrent session, acquires the profile's session
    /// lock, seeds the dedup set from the store so cross-run duplicates are
    /// detected, launches the browser, and spawns the loop.
    pub async fn start(&self, options: CollectionOptions) -> Result<String, OrchestrationError> {
        if options.profile_id.trim().is_empty() {
            return Err(OrchestrationError::fatal_configuration(
                "browser profile id must be non-empty",
            ));
        }
        let session_id = next_session_id();
        let token = CancelToken::new();
        let stats = Arc::new(Mutex::new(CollectionStats::default()));
        // Claim the single session slot atomically with the busy check.
        {
            let mut active = lock_unpoisoned(&self.inner.active);
            if active.is_some() {
                return Err(OrchestrationError::resource_busy("collection"));
            }
            *active = Some(ActiveSession {
                session_id: session_id.clone(),
                token: token.clone(),
                stats: stats.clone(),
            });
        }

        let lock_token = match self.inner.locks.acquire(options.profile_id.as_str()) {
            Ok(token) => token,
            Err(error) => {
                self.clear_active();
                return Err(error);
            }
        };

        let dedup_seed = match self.inner.store.list_collected_items() {
            Ok(items) => items
                .into_iter()
                .map(|item| item.item_id)
                .collect::<HashSet<_>>(),
            Err(error) => {
                self.inner.locks.release(lock_token);
                self.clear_active();
                return Err(OrchestrationError::remote_service(error.to_string()));
            }
        };

        if let Err(error) = self.inner.driver.launch(options.profile_id.as_str()).await {
            self.inner.locks.release(lock_token);
            self.clear_active();
            return Err(error);
        }
        tracing::info!(
            session_id,
            profile_id = %options.profile_id,
            duration_seconds = options.duration_seconds,
            max_count = options.max_count,
            "collection session started"
        );

        let controller = self.clone();
        let loop_session_id = session_id.clone();
        tokio::spawn(async move {
            controller
                .run_loop(loop_session_id, options, token, stats, lock_token, dedup_seed)
                .await;
        });
        Ok(session_id)
    }

    fn clear_active(&self) {
        let mut active = lock_unpoisoned(&self.inner.active);
        *active = None;
    }

    /// Signals the active session to stop at its next boundary (including
    /// mid-dwell). Returns false when no session is active.
    pub fn stop(&self) -> bool {
        let active = lock_unpoisoned(&self.inner.active);
        match active.as_ref() {
            Some(session) => {
                session.token.cancel();
                tracing::info!(session_id = %session.session_id, "collection stop requested");
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> CollectionStatusReport {
        let active = lock_unpoisoned(&self.inner.active);
        match active.as_ref() {
            Some(session) => CollectionStatusReport {
                is_collecting: true,
                session_id: Some(session.session_id.clone()),
                stats: *lock_unpoisoned(&session.stats),
            },
            None => CollectionStatusReport {
                is_collecting: false,
                session_id: None,
                stats: *lock_unpoisoned(&self.inner.last_stats),
            },
        }
    }

    async fn run_loop(
        &self,
        session_id: String,
        options: CollectionOptions,
        token: CancelToken,
        stats: Arc<Mutex<CollectionStats>>,
        lock_token: ProfileLockToken,
        mut seen: HashSet<String>,
    ) {
        let started_unix_ms = current_unix_timestamp_ms();
        let reason = self
            .loop_body(&session_id, &options, &token, &stats, &mut seen, started_unix_ms)
            .await;
        self.finish(session_id, options, stats, lock_token, reason).await;
    }

    /// One full session: repeats fetch → classify → skip/collect until a
    /// stop condition holds. Stop conditions are checked at every loop
    /// boundary and inside every delay.
    async fn loop_body(
        &self,
        session_id: &str,
        options: &CollectionOptions,
        token: &CancelToken,
        stats: &Arc<Mutex<CollectionStats>>,
        seen: &mut HashSet<String>,
        started_unix_ms: u64,
    ) -> StopReason {
        loop {
            if token.is_cancelled() {
                return StopReason::Stopped;
            }
            if options.duration_seconds > 0 {
                let elapsed = elapsed_seconds_since(started_unix_ms, current_unix_timestamp_ms());
                if elapsed >= options.duration_seconds {
                    return StopReason::DurationReached;
                }
            }
            if options.max_count > 0 {
                let collected = lock_unpoisoned(stats).collected_count;
                if collected >= options.max_count {
                    return StopReason::MaxCountReached;
                }
            }

            let fetch = self
                .inner
                .driver
                .fetch_current_item(options.profile_id.as_str());
            let fetch_timeout = Duration::from_millis(options.fetch_timeout_ms.max(1));
            let item = match tokio::time::timeout(fetch_timeout, fetch).await {
                Ok(Ok(item)) => item,
                Ok(Err(error)) => {
                    tracing::error!(session_id, %error, "feed fetch failed, stopping collection");
                    return StopReason::DriverError;
                }
                Err(_elapsed) => {
                    tracing::error!(session_id, "feed fetch timed out, stopping collection");
                    return StopReason::DriverError;
                }
            };

            match self.classify(&item, options, seen) {
                Ok(Some(reason)) => {
                    {
                        lock_unpoisoned(stats).record_skip(reason);
                    }
                    self.emit(
                        session_id,
                        CollectionEventKind::Skipped { reason },
                        Some(item),
                        stats,
                    );
                }
                Ok(None) => {
                    let tracked = options.tracked_group.contains(item.channel_handle.as_str());
                    if tracked {
                        let dwell_ms = item
                            .duration_seconds
                            .map(|seconds| seconds.saturating_mul(1_000))
                            .unwrap_or(options.dwell_cap_ms)
                            .min(options.dwell_cap_ms);
                        self.emit(
                            session_id,
                            CollectionEventKind::Watching { dwell_ms },
                            Some(item.clone()),
                            stats,
                        );
                        if !sleep_unless_cancelled(token, Duration::from_millis(dwell_ms)).await {
                            return StopReason::Stopped;
                        }
                        lock_unpoisoned(stats).watched_count += 1;
                    }
                    // Persist before announcing: the store write is the
                    // durability boundary.
                    if let Err(error) = self.persist_item(&item) {
                        tracing::error!(session_id, %error, "failed to persist collected item");
                        return StopReason::DriverError;
                    }
                    seen.insert(item.item_id.clone());
                    {
                        let mut stats = lock_unpoisoned(stats);
                        stats.collected_count += 1;
                    }
                    self.emit(session_id, CollectionEventKind::Collected, Some(item), stats);
                }
                Err(error) => {
                    tracing::error!(session_id, %error, "classification lookup failed");
                    return StopReason::DriverError;
                }
            }

            if let Err(error) = self
                .inner
                .driver
                .advance_feed(options.profile_id.as_str())
                .await
            {
                tracing::error!(session_id, %error, "feed advance failed, stopping collection");
                return StopReason::DriverError;
            }
            if options.advance_delay_ms > 0 {
                self.emit(
                    session_id,
                    CollectionEventKind::Waiting {
                        delay_ms: options.advance_delay_ms,
                    },
                    None,
                    stats,
                );
                if !sleep_unless_cancelled(
                    token,
                    Duration::from_millis(options.advance_delay_ms),
                )
                .await
                {
                    return StopReason::Stopped;
                }
            }
        }
    }

    /// Applies the documented precedence order: ad > followed > duplicate >
    /// too_old > not_in_group. First match wins; `Ok(None)` means collect.
    fn classify(
        &self,
        item: &FeedItem,
        options: &CollectionOptions,
        seen: &HashSet<String>,
    ) -> Result<Option<SkipReason>, OrchestrationError> {
        if item.is_ad {
            return Ok(Some(SkipReason::Ad));
        }
        if item.is_followed {
            return Ok(Some(SkipReason::Followed));
        }
        let duplicate = seen.contains(item.item_id.as_str())
            || self
                .inner
                .store
                .collected_item_exists(item.item_id.as_str())
                .map_err(|error| OrchestrationError::remote_service(error.to_string()))?;
        if duplicate {
            return Ok(Some(SkipReason::Duplicate));
        }
        if options.max_item_age_days > 0 {
            if let Some(published) = item.published_unix_ms {
                let age_cap_ms = u64::from(options.max_item_age_days) * 24 * 60 * 60 * 1_000;
                if current_unix_timestamp_ms().saturating_sub(published) > age_cap_ms {
                    return Ok(Some(SkipReason::TooOld));
                }
            }
        }
        let known = options.known_channels.contains(item.channel_handle.as_str());
        let tracked = options.tracked_group.contains(item.channel_handle.as_str());
        if known && !tracked {
            return Ok(Some(SkipReason::NotInGroup));
        }
        Ok(None)
    }

    fn persist_item(&self, item: &FeedItem) -> anyhow::Result<()> {
        self.inner.store.put_collected_item(&CollectedItem {
            item_id: item.item_id.clone(),
            title: item.title.clone(),
            channel_handle: item.channel_handle.clone(),
            collected_unix_ms: current_unix_timestamp_ms(),
            payload: serde_json::json!({
                "published_unix_ms": item.published_unix_ms,
                "duration_seconds": item.duration_seconds,
            }),
        })
    }

    async fn finish(
        &self,
        session_id: String,
        options: CollectionOptions,
        stats: Arc<Mutex<CollectionStats>>,
        lock_token: ProfileLockToken,
        reason: StopReason,
    ) {
        if let Err(error) = self.inner.driver.close(options.profile_id.as_str()).await {
            tracing::warn!(session_id, %error, "failed to close browser after collection");
        }

        let final_stats = *lock_unpoisoned(&stats);
        // Flush the terminal summary before the session slot clears, so an
        // observer that sees `is_collecting == false` can already read it.
        self.inner.bus.publish(BusEvent::Collection(CollectionEvent {
            session_id: session_id.clone(),
            kind: CollectionEventKind::Finished { reason },
            item: None,
            stats: final_stats,
        }));
        {
            let mut last_stats = lock_unpoisoned(&self.inner.last_stats);
            *last_stats = final_stats;
        }
        self.clear_active();
        self.inner.locks.release(lock_token);
        tracing::info!(
            session_id,
            reason = reason.as_str(),
            collected = final_stats.collected_count,
            skipped = final_stats.skipped_count,
            "collection session finished"
        );
    }

    fn emit(
        &self,
        session_id: &str,
        kind: CollectionEventKind,
        item: Option<FeedItem>,
        stats: &Arc<Mutex<CollectionStats>>,
    ) {
        let snapshot = *lock_unpoisoned(stats);
        self.inner.bus.publish(BusEvent::Collection(CollectionEvent {
            session_id: session_id.to_string(),
            kind,
            item,
            stats: snapshot,
        }));
    }
}

fn next_session_id() -> String {
    let now = current_unix_timestamp_ms();
    let suffix = SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{SESSION_ID_PREFIX}-{now}-{suffix:04}")
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
