//! Browser-activity dwell-time accounting engine.
//!
//! Attributes elapsed wall-clock time to the currently focused browsing
//! context (a domain + path pair) and durably accumulates it into per-day
//! aggregates. A periodic heartbeat bounds uncommitted data to one period,
//! a single in-process guard serializes every aggregate mutation, and
//! intervals crossing a local midnight are split across both dates.
//!
//! The host environment (tab, focus, and idle signals) and all rendering
//! surfaces are external collaborators: the host feeds
//! [`ActivityEvent`]s into a [`TrackerController`] and provides the
//! key -> JSON stores behind the [`KeyValueStore`] trait.

pub mod commit;
pub mod config;
pub mod guard;
pub mod limits;
pub mod models;
pub mod normalize;
pub mod retention;
pub mod store;
pub mod tracker;

pub use commit::{split_interval, CommitEngine, CommitOutcome, DatedSlice};
pub use config::{ConfigStore, TrackerConfig};
pub use guard::{StoreGuard, StorePermit};
pub use limits::{LimitEvaluator, LimitRule, LogNotifier, NotificationSink};
pub use models::{TrackedSession, OVERFLOW_PATH, PATH_CAP, SESSION_KEY};
pub use normalize::{normalize_domain, normalize_path};
pub use retention::RetentionCollector;
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use tracker::{ActivityEvent, IdleState, TabContext, TrackerController};

/// Initializes logging from the `RUST_LOG` environment variable,
/// defaulting to `Info`.
pub fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
}
