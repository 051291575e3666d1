use serde::{Deserialize, Serialize};

/// A focused-tab context as the host environment reports it. How the host
/// detects focus changes is its own concern; the engine only defines what
/// happens once a context is delivered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabContext {
    pub tab_id: i64,
    pub window_id: i64,
    pub url: String,
    /// Private/incognito contexts are never tracked and never committed.
    pub incognito: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum IdleState {
    Active,
    Idle,
    Locked,
}

/// Discrete activity events delivered by the host environment plus the two
/// engine-internal timer ticks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ActivityEvent {
    TabActivated(TabContext),
    /// In-place navigation within the already-focused tab.
    Navigated(TabContext),
    TabClosed {
        tab_id: i64,
    },
    /// `None` means focus moved away from all browser windows.
    FocusChanged(Option<TabContext>),
    IdleStateChanged {
        state: IdleState,
        /// The focused tab to resume on a return to `Active`, when the
        /// host could resolve one.
        context: Option<TabContext>,
    },
    /// The host could no longer resolve the attributed context (tab
    /// already gone). Ends tracking without a commit.
    ContextVanished,
    /// Periodic incremental-commit tick.
    HeartbeatTick,
    /// Daily retention tick.
    CleanupTick,
}
