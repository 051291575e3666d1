use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Ephemeral-store key holding the single live session slot.
pub const SESSION_KEY: &str = "current_session";

/// The browsing context currently being attributed time.
///
/// At most one instance is live at a time; absence of the record means
/// nothing is being tracked. `last_checkpoint` is the only field used for
/// delta computation and is monotonically non-decreasing for a given
/// session instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TrackedSession {
    pub domain: String,
    pub current_path: String,
    /// Informational timestamp of session creation; never used for accounting.
    pub start_time: DateTime<Local>,
    pub last_checkpoint: DateTime<Local>,
    pub tab_id: i64,
    pub window_id: i64,
}

impl TrackedSession {
    pub fn new(
        domain: String,
        current_path: String,
        tab_id: i64,
        window_id: i64,
        now: DateTime<Local>,
    ) -> Self {
        Self {
            domain,
            current_path,
            start_time: now,
            last_checkpoint: now,
            tab_id,
            window_id,
        }
    }

    /// True when an activation refers to the context already being tracked.
    pub fn matches(&self, domain: &str, path: &str, tab_id: i64) -> bool {
        self.domain == domain && self.current_path == path && self.tab_id == tab_id
    }
}
