//! Tests for bus fan-out, explicit unsubscription, and event encoding.

use skein_contract::{CollectionStats, ScheduleKind, SkipReason, TaskStatus};

use super::{
    BusEvent, CollectionEvent, CollectionEventKind, FireProgress, ProgressBus, SchedulerFireStatus,
};

fn task_status_event(task_id: &str) -> BusEvent {
    BusEvent::TaskStatus {
        task_id: task_id.to_string(),
        status: TaskStatus::Running,
        error: None,
    }
}

#[tokio::test]
async fn functional_publish_fans_out_to_all_current_subscribers() {
    let bus = ProgressBus::new();
    let (id_a, mut rx_a) = bus.subscribe();
    let (_id_b, mut rx_b) = bus.subscribe();

    let delivered = bus.publish(task_status_event("task-1"));
    assert_eq!(delivered, 2);
    assert!(matches!(
        rx_a.recv().await,
        Some(BusEvent::TaskStatus { ref task_id, .. }) if task_id.as_str() == "task-1"
    ));
    assert!(matches!(
        rx_b.recv().await,
        Some(BusEvent::TaskStatus { ref task_id, .. }) if task_id.as_str() == "task-1"
    ));

    assert!(bus.unsubscribe(id_a));
    assert!(!bus.unsubscribe(id_a));
    assert_eq!(bus.subscriber_count(), 1);
}

#[tokio::test]
async fn functional_late_subscribers_see_no_replay_and_closed_ones_are_pruned() {
    let bus = ProgressBus::new();
    assert_eq!(bus.publish(task_status_event("task-before")), 0);

    let (_id, mut rx) = bus.subscribe();
    assert!(rx.try_recv().is_err());

    let (_dropped_id, dropped_rx) = bus.subscribe();
    drop(dropped_rx);
    assert_eq!(bus.publish(task_status_event("task-after")), 1);
    assert_eq!(bus.subscriber_count(), 1);
    assert!(matches!(
        rx.recv().await,
        Some(BusEvent::TaskStatus { ref task_id, .. }) if task_id.as_str() == "task-after"
    ));
}

#[test]
fn unit_fire_progress_percent_is_bounded() {
    assert_eq!(FireProgress::of(0, 0).percent, 100);
    assert_eq!(FireProgress::of(1, 4).percent, 25);
    assert_eq!(FireProgress::of(9, 4).percent, 100);
}

#[test]
fn unit_event_wire_encoding_is_stable() {
    let event = BusEvent::SchedulerStatus {
        kind: ScheduleKind::ScriptGeneration,
        status: SchedulerFireStatus::Running,
        message: "querying work items".to_string(),
        progress: Some(FireProgress::of(1, 2)),
    };
    let raw = serde_json::to_value(&event).expect("encode");
    assert_eq!(raw["channel"], "scheduler_status");
    assert_eq!(raw["status"], "running");

    let mut stats = CollectionStats::default();
    stats.record_skip(SkipReason::Duplicate);
    let event = BusEvent::Collection(CollectionEvent {
        session_id: "collect-1".to_string(),
        kind: CollectionEventKind::Skipped {
            reason: SkipReason::Duplicate,
        },
        item: None,
        stats,
    });
    let raw = serde_json::to_value(&event).expect("encode");
    assert_eq!(raw["type"], "skipped");
    assert_eq!(raw["reason"], "duplicate");
    assert_eq!(raw["stats"]["skipped_count"], 1);
}
