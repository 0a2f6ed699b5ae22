//! Tests for classification precedence, dedup, dwell interruption, bounds,
//! and lock discipline of the collection loop.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::tempdir;

use skein_contract::{
    BrowserDriver, CollectedItem, ContentStore, FeedItem, OrchestrationError, ProfileStatus,
    SkipReason, StopReason,
};
use skein_events::{BusEvent, CollectionEventKind, ProgressBus};
use skein_locks::ProfileLockRegistry;
use skein_store::JsonStore;

use super::{CollectionController, CollectionOptions};

/// Feed driver fake that serves a scripted item sequence. Once the script
/// is exhausted it either fails the fetch or recycles the last item.
struct FeedDriver {
    items: Mutex<VecDeque<FeedItem>>,
    recycle: bool,
}

impl FeedDriver {
    fn scripted(items: Vec<FeedItem>) -> Self {
        Self {
            items: Mutex::new(items.into()),
            recycle: false,
        }
    }

    fn cycling(items: Vec<FeedItem>) -> Self {
        Self {
            items: Mutex::new(items.into()),
            recycle: true,
        }
    }
}

#[async_trait]
impl BrowserDriver for FeedDriver {
    async fn launch(&self, _profile_id: &str) -> Result<(), OrchestrationError> {
        Ok(())
    }

    async fn check_status(&self, _profile_id: &str) -> Result<ProfileStatus, OrchestrationError> {
        Ok(ProfileStatus { active: true })
    }

    async fn run_step(
        &self,
        _profile_id: &str,
        step_name: &str,
        _args: &Value,
    ) -> Result<Value, OrchestrationError> {
        Err(OrchestrationError::transient(step_name, "not a workflow driver"))
    }

    async fn fetch_current_item(&self, _profile_id: &str) -> Result<FeedItem, OrchestrationError> {
        let mut items = self.items.lock().expect("items lock");
        match items.pop_front() {
            Some(item) => {
                if self.recycle {
                    items.push_back(item.clone());
                }
                Ok(item)
            }
            None => Err(OrchestrationError::transient(
                "fetch_current_item",
                "feed exhausted",
            )),
        }
    }

    async fn advance_feed(&self, _profile_id: &str) -> Result<(), OrchestrationError> {
        Ok(())
    }

    async fn close(&self, _profile_id: &str) -> Result<(), OrchestrationError> {
        Ok(())
    }
}

fn feed_item(item_id: &str, channel: &str) -> FeedItem {
    FeedItem {
        item_id: item_id.to_string(),
        title: format!("clip {item_id}"),
        channel_handle: channel.to_string(),
        is_ad: false,
        is_followed: false,
        published_unix_ms: Some(skein_core::current_unix_timestamp_ms()),
        duration_seconds: Some(10),
    }
}

struct Harness {
    controller: CollectionController,
    store: Arc<JsonStore>,
    locks: ProfileLockRegistry,
    bus: ProgressBus,
    _temp: tempfile::TempDir,
}

fn harness(driver: FeedDriver) -> Harness {
    let temp = tempdir().expect("tempdir");
    let store = Arc::new(JsonStore::open(temp.path()).expect("open store"));
    let locks = ProfileLockRegistry::new();
    let bus = ProgressBus::new();
    let controller = CollectionController::new(
        Arc::new(driver),
        store.clone(),
        bus.clone(),
        locks.clone(),
    );
    Harness {
        controller,
        store,
        locks,
        bus,
        _temp: temp,
    }
}

fn fast_options(profile_id: &str) -> CollectionOptions {
    CollectionOptions {
        advance_delay_ms: 1,
        dwell_cap_ms: 20,
        ..CollectionOptions::for_profile(profile_id)
    }
}

async fn wait_until<F: Fn() -> bool>(predicate: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn functional_classification_precedence_counts_every_skip_reason() {
    let mut ad = feed_item("item-ad", "channel-new");
    ad.is_ad = true;
    // An ad that is also followed counts as ad: precedence is deterministic.
    ad.is_followed = true;
    let mut followed = feed_item("item-followed", "channel-new");
    followed.is_followed = true;
    let duplicate = feed_item("item-dup", "channel-new");
    let mut old = feed_item("item-old", "channel-new");
    old.published_unix_ms =
        Some(skein_core::current_unix_timestamp_ms().saturating_sub(200 * 24 * 60 * 60 * 1_000));
    let grouped_out = feed_item("item-outside", "channel-known");
    let fresh = feed_item("item-fresh", "channel-new");

    let harness = harness(FeedDriver::scripted(vec![
        ad, followed, duplicate, old, grouped_out, fresh,
    ]));
    harness
        .store
        .put_collected_item(&CollectedItem {
            item_id: "item-dup".to_string(),
            title: String::new(),
            channel_handle: "channel-new".to_string(),
            collected_unix_ms: 1,
            payload: json!({}),
        })
        .expect("seed duplicate");

    let options = CollectionOptions {
        max_count: 1,
        known_channels: HashSet::from(["channel-known".to_string()]),
        ..fast_options("profile-a")
    };
    harness.controller.start(options).await.expect("start");

    let controller = harness.controller.clone();
    wait_until(|| !controller.status().is_collecting, "loop to finish").await;

    let stats = harness.controller.status().stats;
    assert_eq!(stats.collected_count, 1);
    assert_eq!(stats.skipped_count, 5);
    assert_eq!(stats.ad_count, 1);
    assert_eq!(stats.followed_count, 1);
    assert_eq!(stats.duplicate_count, 1);
    assert_eq!(stats.too_old_count, 1);
    assert_eq!(stats.not_in_group_count, 1);

    // The duplicate produced no second store write; only the fresh item
    // was added next to the seeded one.
    let items = harness.store.list_collected_items().expect("list");
    assert_eq!(items.len(), 2);
    assert!(items.iter().any(|item| item.item_id == "item-fresh"));
    assert!(!harness.locks.is_held("profile-a"));
}

#[tokio::test(flavor = "multi_thread")]
async fn functional_tracked_group_items_dwell_then_collect() {
    let tracked = feed_item("item-tracked", "channel-tracked");
    let harness = harness(FeedDriver::scripted(vec![tracked]));
    let (_sub, mut events) = harness.bus.subscribe();

    let options = CollectionOptions {
        max_count: 1,
        known_channels: HashSet::from(["channel-tracked".to_string()]),
        tracked_group: HashSet::from(["channel-tracked".to_string()]),
        ..fast_options("profile-a")
    };
    harness.controller.start(options).await.expect("start");

    let controller = harness.controller.clone();
    wait_until(|| !controller.status().is_collecting, "loop to finish").await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let BusEvent::Collection(collection) = event {
            kinds.push(collection.kind);
        }
    }
    let watching_index = kinds
        .iter()
        .position(|kind| matches!(kind, CollectionEventKind::Watching { .. }))
        .expect("watching event");
    let collected_index = kinds
        .iter()
        .position(|kind| matches!(kind, CollectionEventKind::Collected))
        .expect("collected event");
    assert!(watching_index < collected_index);

    let stats = harness.controller.status().stats;
    assert_eq!(stats.watched_count, 1);
    assert_eq!(stats.collected_count, 1);
    assert!(harness
        .store
        .collected_item_exists("item-tracked")
        .expect("exists"));
}

#[tokio::test(flavor = "multi_thread")]
async fn functional_stop_mid_dwell_terminates_promptly_with_consistent_stats() {
    let mut long_watch = feed_item("item-long", "channel-tracked");
    long_watch.duration_seconds = Some(600);
    let harness = harness(FeedDriver::scripted(vec![long_watch]));
    let (_sub, mut events) = harness.bus.subscribe();

    let options = CollectionOptions {
        known_channels: HashSet::from(["channel-tracked".to_string()]),
        tracked_group: HashSet::from(["channel-tracked".to_string()]),
        dwell_cap_ms: 600_000,
        ..fast_options("profile-a")
    };
    harness.controller.start(options).await.expect("start");

    // Wait until the dwell began, then stop mid-dwell.
    loop {
        match events.recv().await.expect("event stream") {
            BusEvent::Collection(collection)
                if matches!(collection.kind, CollectionEventKind::Watching { .. }) =>
            {
                break;
            }
            _ => {}
        }
    }
    assert!(harness.controller.stop());

    let controller = harness.controller.clone();
    wait_until(|| !controller.status().is_collecting, "loop to stop").await;

    // The dwelled item was never persisted and the terminal summary agrees
    // with the emitted events.
    let status = harness.controller.status();
    assert_eq!(status.stats.collected_count, 0);
    assert!(!harness
        .store
        .collected_item_exists("item-long")
        .expect("exists"));
    assert!(!harness.locks.is_held("profile-a"));

    let mut finished_reason = None;
    while let Ok(event) = events.try_recv() {
        if let BusEvent::Collection(collection) = event {
            if let CollectionEventKind::Finished { reason } = collection.kind {
                finished_reason = Some(reason);
                assert_eq!(collection.stats, status.stats);
            }
        }
    }
    assert_eq!(finished_reason, Some(StopReason::Stopped));
}

#[tokio::test(flavor = "multi_thread")]
async fn functional_final_stats_equal_the_sum_of_emitted_events() {
    let items = vec![
        feed_item("item-1", "channel-new"),
        feed_item("item-2", "channel-new"),
        {
            let mut ad = feed_item("item-3", "channel-new");
            ad.is_ad = true;
            ad
        },
        feed_item("item-4", "channel-new"),
    ];
    let harness = harness(FeedDriver::scripted(items));
    let (_sub, mut events) = harness.bus.subscribe();

    let options = CollectionOptions {
        max_count: 3,
        ..fast_options("profile-a")
    };
    harness.controller.start(options).await.expect("start");
    let controller = harness.controller.clone();
    wait_until(|| !controller.status().is_collecting, "loop to finish").await;

    let mut collected_events = 0u64;
    let mut skipped_events = 0u64;
    while let Ok(event) = events.try_recv() {
        if let BusEvent::Collection(collection) = event {
            match collection.kind {
                CollectionEventKind::Collected => collected_events += 1,
                CollectionEventKind::Skipped { .. } => skipped_events += 1,
                _ => {}
            }
        }
    }
    let stats = harness.controller.status().stats;
    assert_eq!(stats.collected_count, collected_events);
    assert_eq!(stats.skipped_count, skipped_events);
    assert_eq!(stats.collected_count, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn functional_feed_failure_stops_the_loop_with_driver_error() {
    // Two good items, then the script runs dry and the fetch fails.
    let harness = harness(FeedDriver::scripted(vec![
        feed_item("item-1", "channel-new"),
        feed_item("item-2", "channel-new"),
    ]));
    let (_sub, mut events) = harness.bus.subscribe();

    harness
        .controller
        .start(fast_options("profile-a"))
        .await
        .expect("start");
    let controller = harness.controller.clone();
    wait_until(|| !controller.status().is_collecting, "loop to finish").await;

    // Partial results stay persisted; no rollback.
    assert_eq!(harness.store.list_collected_items().expect("list").len(), 2);

    let mut finished_reason = None;
    while let Ok(event) = events.try_recv() {
        if let BusEvent::Collection(collection) = event {
            if let CollectionEventKind::Finished { reason } = collection.kind {
                finished_reason = Some(reason);
            }
        }
    }
    assert_eq!(finished_reason, Some(StopReason::DriverError));
}

#[tokio::test(flavor = "multi_thread")]
async fn functional_second_session_is_rejected_while_one_is_active() {
    let harness = harness(FeedDriver::cycling(vec![feed_item("item-1", "channel-new")]));

    harness
        .controller
        .start(CollectionOptions {
            advance_delay_ms: 20,
            ..CollectionOptions::for_profile("profile-a")
        })
        .await
        .expect("start");

    let busy = harness
        .controller
        .start(CollectionOptions::for_profile("profile-b"))
        .await
        .expect_err("second session");
    assert_eq!(busy.error_code(), "resource_busy");
    assert!(harness.locks.is_held("profile-a"));

    assert!(harness.controller.stop());
    let controller = harness.controller.clone();
    wait_until(|| !controller.status().is_collecting, "loop to stop").await;
    assert!(!harness.locks.is_held("profile-a"));
    // The registry is free again for a follow-up session.
    harness
        .controller
        .start(CollectionOptions {
            max_count: 1,
            advance_delay_ms: 1,
            ..CollectionOptions::for_profile("profile-a")
        })
        .await
        .expect("restart after stop");
    harness.controller.stop();
}

#[tokio::test]
async fn unit_duration_bound_stops_an_unbounded_feed() {
    let harness = harness(FeedDriver::cycling(vec![feed_item("item-1", "channel-new")]));
    let (_sub, mut events) = harness.bus.subscribe();

    harness
        .controller
        .start(CollectionOptions {
            duration_seconds: 1,
            advance_delay_ms: 20,
            ..CollectionOptions::for_profile("profile-a")
        })
        .await
        .expect("start");

    let controller = harness.controller.clone();
    wait_until(|| !controller.status().is_collecting, "duration bound").await;

    let mut finished_reason = None;
    while let Ok(event) = events.try_recv() {
        if let BusEvent::Collection(collection) = event {
            if let CollectionEventKind::Finished { reason } = collection.kind {
                finished_reason = Some(reason);
            }
        }
    }
    assert_eq!(finished_reason, Some(StopReason::DurationReached));
}
