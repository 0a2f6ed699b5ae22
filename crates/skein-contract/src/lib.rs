//! Shared contracts for the Skein orchestration engine.
//!
//! Defines the durable domain records, the typed error taxonomy, the
//! collaborator traits implemented by the browser driver, persistent store,
//! and remote content service, and the response envelope returned by every
//! public command.

pub mod api;
pub mod collect;
pub mod driver;
pub mod error;
pub mod remote;
pub mod schedule;
pub mod store;
pub mod task;

pub use api::ApiResponse;
pub use collect::{CollectedItem, CollectionStats, FeedItem, SkipReason, StopReason};
pub use driver::{BrowserDriver, ProfileStatus};
pub use error::OrchestrationError;
pub use remote::{RemoteContentService, RemoteItemStatus, RemoteQueryFilter, RemoteWorkItem};
pub use schedule::{
    ExecutionLogEntry, FilterWindow, LogLevel, ScheduleConfig, ScheduleConfigPatch, ScheduleKind,
};
pub use store::ContentStore;
pub use task::{TaskKind, TaskRecord, TaskStatus, TaskStatusFilter};
