//! Daily at-most-once scheduler.
//!
//! One instance per schedule kind. Computes the next fire time from a
//! `HH:MM` local configuration, guarantees at-most-once automatic execution
//! per calendar day, exposes a manual override, and maintains a capped,
//! persisted execution log. The calendar-day guard is advanced *before*
//! work is dispatched: a crash mid-fire costs that day's run instead of
//! duplicating it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, NaiveTime};
use serde::Serialize;
use serde_json::json;

use skein_contract::{
    ContentStore, ExecutionLogEntry, LogLevel, OrchestrationError, RemoteContentService,
    RemoteItemStatus, RemoteQueryFilter, RemoteWorkItem, ScheduleConfig, ScheduleConfigPatch,
    ScheduleKind, TaskKind,
};
use skein_core::{current_unix_timestamp_ms, CancelToken};
use skein_events::{BusEvent, FireProgress, ProgressBus, SchedulerFireStatus};
use skein_queue::TaskQueue;


const DEFAULT_LOG_CAP: usize = 100;
const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(30);
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Lifecycle states reported by `get_status`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Disabled,
    /// Enabled, waiting for the execute time.
    Armed,
    /// A fire is in progress.
    Running,
    /// Fired today, waiting for the next calendar day.
    Cooldown,
}

impl SchedulerState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Armed => "armed",
            Self::Running => "running",
            Self::Cooldown => "cooldown",
        }
    }
}

/// Snapshot returned by `get_status`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SchedulerStatusReport {
    pub enabled: bool,
    pub is_running: bool,
    pub state: SchedulerState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_execute_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_execute_unix_ms: Option<u64>,
}

/// Result of a manual `execute_now` request.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExecuteNowOutcome {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Where a fire originated; both advance the calendar-day guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FireOrigin {
    Automatic,
    Manual,
}

impl FireOrigin {
    fn as_str(self) -> &'static str {
        match self {
            Self::Automatic => "automatic",
            Self::Manual => "manual",
        }
    }
}

/// Scheduler tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub tick_interval: Duration,
    pub log_cap: usize,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            log_cap: DEFAULT_LOG_CAP,
        }
    }
}

struct SchedulerInner {
    kind: ScheduleKind,
    store: Arc<dyn ContentStore>,
    remote: Arc<dyn RemoteContentService>,
    queue: TaskQueue,
    bus: ProgressBus,
    options: SchedulerOptions,
    config: Mutex<ScheduleConfig>,
    logs: Mutex<Vec<ExecutionLogEntry>>,
    is_running: AtomicBool,
    ticker_token: CancelToken,
}

/// Daily scheduler for one schedule kind.
#[derive(Clone)]
pub struct DailyScheduler {
    inner: Arc<SchedulerInner>,
}

impl DailyScheduler {
    /// Builds a scheduler, loading its persisted config and execution log.
    pub fn new(
        kind: ScheduleKind,
        store: Arc<dyn ContentStore>,
        remote: Arc<dyn RemoteContentService>,
        queue: TaskQueue,
        bus: ProgressBus,
        options: SchedulerOptions,
    ) -> Self {
        let config = load_config(store.as_ref(), kind);
        let logs = load_logs(store.as_ref(), kind);
        Self {
            inner: Arc::new(SchedulerInner {
                kind,
                store,
                remote,
                queue,
                bus,
                options,
                config: Mutex::new(config),
                logs: Mutex::new(logs),
                is_running: AtomicBool::new(false),
                ticker_token: CancelToken::new(),
            }),
        }
    }

    pub fn kind(&self) -> ScheduleKind {
        self.inner.kind
    }

    /// Spawns the wall-clock ticker. Stopped by `shutdown`.
    pub fn start_ticker(&self) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let token = scheduler.inner.ticker_token.clone();
            loop {
                if token.is_cancelled() {
                    break;
                }
                scheduler.poll_once(Local::now().naive_local()).await;
                if !skein_core::sleep_unless_cancelled(&token, scheduler.inner.options.tick_interval)
                    .await
                {
                    break;
                }
            }
            tracing::debug!(kind = scheduler.inner.kind.as_str(), "scheduler ticker stopped");
        });
    }

    /// Stops the ticker. An in-flight fire still runs to completion.
    pub fn shutdown(&self) {
        self.inner.ticker_token.cancel();
    }

    /// One clock check: fires when the wall clock has crossed the execute
    /// time on a calendar day different from `last_execute_date`.
    pub async fn poll_once(&self, now: NaiveDateTime) {
        let due = {
            let config = lock_unpoisoned(&self.inner.config);
            automatic_fire_due(&config, now)
        };
        if !due {
            return;
        }
        let _ = self.fire(now, FireOrigin::Automatic).await;
    }

    pub fn get_config(&self) -> ScheduleConfig {
        lock_unpoisoned(&self.inner.config).clone()
    }

    /// Merges a patch into the config and persists it. Changing the execute
    /// time re-arms the schedule but never touches `last_execute_date`.
    pub fn update_config(&self, patch: ScheduleConfigPatch) -> ScheduleConfig {
        let updated = {
            let mut config = lock_unpoisoned(&self.inner.config);
            config.apply_patch(patch);
            config.clone()
        };
        self.persist_config(&updated);
        updated
    }

    pub fn enable(&self) -> ScheduleConfig {
        let updated = self.set_enabled(true);
        self.add_log(LogLevel::Info, "schedule enabled".to_string());
        updated
    }

    /// Disabling an armed or cooling-down schedule does not cancel an
    /// in-flight fire.
    pub fn disable(&self) -> ScheduleConfig {
        let updated = self.set_enabled(false);
        self.add_log(LogLevel::Info, "schedule disabled".to_string());
        updated
    }

    /// Fires immediately, bypassing the calendar-day guard. Still sets
    /// `last_execute_date`, so a manual run and an automatic run on the
    /// same day are mutually exclusive.
    pub async fn execute_now(&self) -> ExecuteNowOutcome {
        self.fire(Local::now().naive_local(), FireOrigin::Manual).await
    }

    /// Returns the most recent `limit` log entries, newest first.
    pub fn get_logs(&self, limit: usize) -> Vec<ExecutionLogEntry> {
        let logs = lock_unpoisoned(&self.inner.logs);
        logs.iter()
            .rev()
            .take(limit.max(1))
            .cloned()
            .collect()
    }

    pub fn clear_logs(&self) {
        {
            let mut logs = lock_unpoisoned(&self.inner.logs);
            logs.clear();
        }
        self.persist_logs();
        self.add_log(LogLevel::Info, "execution log cleared".to_string());
    }

    pub fn get_status(&self) -> SchedulerStatusReport {
        self.status_at(Local::now().naive_local())
    }

    /// Status against an explicit clock; the ticker and tests share it.
    pub fn status_at(&self, now: NaiveDateTime) -> SchedulerStatusReport {
        let config = lock_unpoisoned(&self.inner.config).clone();
        let is_running = self.inner.is_running.load(Ordering::SeqCst);
        let today = now.date().format(DATE_FORMAT).to_string();
        let state = if !config.enabled {
            SchedulerState::Disabled
        } else if is_running {
            SchedulerState::Running
        } else if config.last_execute_date.as_deref() == Some(today.as_str()) {
            SchedulerState::Cooldown
        } else {
            SchedulerState::Armed
        };
        SchedulerStatusReport {
            enabled: config.enabled,
            is_running,
            state,
            last_execute_date: config.last_execute_date.clone(),
            next_execute_unix_ms: next_execute_at(&config, now)
                .map(|at| at.and_utc().timestamp_millis().max(0) as u64),
        }
    }

    async fn fire(&self, now: NaiveDateTime, origin: FireOrigin) -> ExecuteNowOutcome {
        if self
            .inner
            .is_running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return ExecuteNowOutcome {
                accepted: false,
                reason: Some("a fire is already in progress".to_string()),
            };
        }

        // Guard first: a crash between here and completion costs this
        // day's run rather than duplicating it.
        let today = now.date().format(DATE_FORMAT).to_string();
        let config = {
            let mut config = lock_unpoisoned(&self.inner.config);
            config.last_execute_date = Some(today);
            config.clone()
        };
        self.persist_config(&config);

        self.emit_status(
            SchedulerFireStatus::Running,
            format!("{} fire started", origin.as_str()),
            None,
        );
        self.add_log(
            LogLevel::Info,
            format!("{} fire started at {}", origin.as_str(), config.execute_time),
        );

        match self.dispatch_work(&config, now).await {
            Ok(queued) => {
                let message = if queued == 0 {
                    "no matching work items".to_string()
                } else {
                    format!("queued {queued} task(s)")
                };
                self.add_log(LogLevel::Success, format!("fire completed: {message}"));
                self.emit_status(SchedulerFireStatus::Completed, message, None);
            }
            Err(error) => {
                self.add_log(LogLevel::Error, format!("fire failed: {error}"));
                self.emit_status(SchedulerFireStatus::Error, error.to_string(), None);
            }
        }

        self.inner.is_running.store(false, Ordering::SeqCst);
        ExecuteNowOutcome {
            accepted: true,
            reason: None,
        }
    }

    /// Queries the filter window, claims the matching items remotely, and
    /// enqueues one task per selected profile (items split round-robin).
    async fn dispatch_work(
        &self,
        config: &ScheduleConfig,
        now: NaiveDateTime,
    ) -> Result<usize, OrchestrationError> {
        let filter = build_filter(config, now);
        let items = self.inner.remote.query(&filter).await?;
        self.add_log(
            LogLevel::Info,
            format!("found {} matching work item(s)", items.len()),
        );
        if items.is_empty() {
            return Ok(0);
        }

        if config.selected_browser_profile_ids.is_empty() {
            return Err(OrchestrationError::fatal_configuration(
                "no browser profiles configured for this schedule",
            ));
        }

        for item in &items {
            self.inner
                .remote
                .update_status(item.id.as_str(), RemoteItemStatus::InProgress, None)
                .await?;
        }

        let shares = split_round_robin(&items, config.selected_browser_profile_ids.len());
        let kind = task_kind_for(self.inner.kind);
        let total = shares.iter().filter(|share| !share.is_empty()).count() as u64;
        let mut queued = 0usize;
        for (profile_id, share) in config.selected_browser_profile_ids.iter().zip(shares) {
            if share.is_empty() {
                continue;
            }
            let payload = json!({
                "work_items": share
                    .iter()
                    .map(|item| json!({
                        "id": item.id,
                        "item_id": item.item_id,
                        "title": item.title,
                        "url": item.url,
                        "channel_id": item.channel_id,
                    }))
                    .collect::<Vec<_>>(),
            });
            let record = self
                .inner
                .queue
                .enqueue(kind, payload, profile_id.as_str())?;
            queued += 1;
            self.emit_status(
                SchedulerFireStatus::Running,
                format!("queued task {} on {}", record.task_id, profile_id),
                Some(FireProgress::of(queued as u64, total)),
            );
        }
        Ok(queued)
    }

    fn set_enabled(&self, enabled: bool) -> ScheduleConfig {
        let updated = {
            let mut config = lock_unpoisoned(&self.inner.config);
            config.enabled = enabled;
            config.clone()
        };
        self.persist_config(&updated);
        updated
    }

    fn add_log(&self, level: LogLevel, message: String) {
        let entry = ExecutionLogEntry {
            time_unix_ms: current_unix_timestamp_ms(),
            level,
            message,
        };
        {
            let mut logs = lock_unpoisoned(&self.inner.logs);
            logs.push(entry.clone());
            let cap = self.inner.options.log_cap.max(1);
            while logs.len() > cap {
                logs.remove(0);
            }
        }
        self.persist_logs();
        self.inner.bus.publish(BusEvent::SchedulerLog {
            kind: self.inner.kind,
            entry,
        });
    }

    fn emit_status(
        &self,
        status: SchedulerFireStatus,
        message: String,
        progress: Option<FireProgress>,
    ) {
        self.inner.bus.publish(BusEvent::SchedulerStatus {
            kind: self.inner.kind,
            status,
            message,
            progress,
        });
    }

    fn persist_config(&self, config: &ScheduleConfig) {
        let key = config_key(self.inner.kind);
        match serde_json::to_string(config) {
            Ok(raw) => {
                if let Err(error) = self.inner.store.set_setting(key.as_str(), raw.as_str()) {
                    tracing::error!(kind = self.inner.kind.as_str(), %error, "failed to persist schedule config");
                }
            }
            Err(error) => {
                tracing::error!(kind = self.inner.kind.as_str(), %error, "failed to encode schedule config");
            }
        }
    }

    fn persist_logs(&self) {
        let key = logs_key(self.inner.kind);
        let raw = {
            let logs = lock_unpoisoned(&self.inner.logs);
            serde_json::to_string(&*logs)
        };
        match raw {
            Ok(raw) => {
                if let Err(error) = self.inner.store.set_setting(key.as_str(), raw.as_str()) {
                    tracing::error!(kind = self.inner.kind.as_str(), %error, "failed to persist execution log");
                }
            }
            Err(error) => {
                tracing::error!(kind = self.inner.kind.as_str(), %error, "failed to encode execution log");
            }
        }
    }
}

/// True when the clock has crossed the configured execute time on a day the
/// schedule has not yet fired.
pub fn automatic_fire_due(config: &ScheduleConfig, now: NaiveDateTime) -> bool {
    if !config.enabled {
        return false;
    }
    let Some(execute_time) = parse_execute_time(config.execute_time.as_str()) else {
        return false;
    };
    let today = now.date().format(DATE_FORMAT).to_string();
    if config.last_execute_date.as_deref() == Some(today.as_str()) {
        return false;
    }
    now.time() >= execute_time
}

/// Next automatic fire: today at the execute time when still ahead and not
/// yet fired today, otherwise tomorrow.
pub fn next_execute_at(config: &ScheduleConfig, now: NaiveDateTime) -> Option<NaiveDateTime> {
    if !config.enabled {
        return None;
    }
    let execute_time = parse_execute_time(config.execute_time.as_str())?;
    let today = now.date().format(DATE_FORMAT).to_string();
    let today_at = now.date().and_time(execute_time);
    let fired_today = config.last_execute_date.as_deref() == Some(today.as_str());
    if !fired_today && now < today_at {
        return Some(today_at);
    }
    Some(today_at + chrono::Duration::days(1))
}

fn parse_execute_time(raw: &str) -> Option<NaiveTime> {
    let (hours, minutes) = raw.trim().split_once(':')?;
    let hours = hours.parse::<u32>().ok()?;
    let minutes = minutes.parse::<u32>().ok()?;
    NaiveTime::from_hms_opt(hours, minutes, 0)
}

fn build_filter(config: &ScheduleConfig, now: NaiveDateTime) -> RemoteQueryFilter {
    let now_ms = now.and_utc().timestamp_millis().max(0) as u64;
    let day_ms = 24 * 60 * 60 * 1_000u64;
    RemoteQueryFilter {
        published_after_unix_ms: Some(
            now_ms.saturating_sub(u64::from(config.filter_window.days_back) * day_ms),
        ),
        published_before_unix_ms: Some(
            now_ms.saturating_add(u64::from(config.filter_window.days_forward) * day_ms),
        ),
        min_metric_count: config.min_threshold,
        status: config.status_filter.clone(),
    }
}

fn split_round_robin(items: &[RemoteWorkItem], buckets: usize) -> Vec<Vec<RemoteWorkItem>> {
    let mut shares = vec![Vec::new(); buckets.max(1)];
    let len = shares.len();
    for (index, item) in items.iter().enumerate() {
        shares[index % len].push(item.clone());
    }
    shares
}

fn task_kind_for(kind: ScheduleKind) -> TaskKind {
    match kind {
        ScheduleKind::ScriptGeneration => TaskKind::ScriptGeneration,
        ScheduleKind::VideoUpload => TaskKind::VideoUpload,
    }
}

fn config_key(kind: ScheduleKind) -> String {
    format!("scheduler/{}", kind.as_str())
}

fn logs_key(kind: ScheduleKind) -> String {
    format!("scheduler/{}/logs", kind.as_str())
}

fn load_config(store: &dyn ContentStore, kind: ScheduleKind) -> ScheduleConfig {
    match store.get_setting(config_key(kind).as_str()) {
        Ok(Some(raw)) => match serde_json::from_str(raw.as_str()) {
            Ok(config) => config,
            Err(error) => {
                tracing::warn!(kind = kind.as_str(), %error, "malformed schedule config, using defaults");
                ScheduleConfig::default()
            }
        },
        Ok(None) => ScheduleConfig::default(),
        Err(error) => {
            tracing::warn!(kind = kind.as_str(), %error, "failed to load schedule config, using defaults");
            ScheduleConfig::default()
        }
    }
}

fn load_logs(store: &dyn ContentStore, kind: ScheduleKind) -> Vec<ExecutionLogEntry> {
    match store.get_setting(logs_key(kind).as_str()) {
        Ok(Some(raw)) => serde_json::from_str(raw.as_str()).unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
