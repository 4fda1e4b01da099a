//! Per-(agent, memory) visibility state machine.

use serde::{Deserialize, Serialize};

/// Visibility of one memory to one agent.
///
/// `Stale` is the in-between state: a dependent event has arrived but
/// reconciliation has not completed. It exits to `Visible` on success or
/// to `NotVisible` when access was revoked or the memory deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    NotVisible,
    Visible,
    Stale,
}

/// Reconciliation state for one (agent, memory) pair.
///
/// `last_applied` is the ordering key of the newest event reflected in
/// this view: (timestamp_ms, event_id). Later keys win; an equal or
/// older key is ignored so replays and reordered deliveries cannot roll
/// a view backwards.
#[derive(Debug, Clone, Default)]
pub struct ViewState {
    pub visibility: Visibility,
    pub last_applied: Option<(i64, String)>,
}

impl ViewState {
    /// Whether an event with this ordering key supersedes the view.
    pub fn supersedes(&self, key: (i64, &str)) -> bool {
        match &self.last_applied {
            Some((ts, id)) => key > (*ts, id.as_str()),
            None => true,
        }
    }

    /// Enter reconciliation: the view is stale until `complete` runs.
    pub fn begin(&mut self) {
        self.visibility = Visibility::Stale;
    }

    /// Finish reconciliation with the computed outcome.
    pub fn complete(&mut self, visible: bool, key: (i64, &str)) {
        self.visibility = if visible {
            Visibility::Visible
        } else {
            Visibility::NotVisible
        };
        self.last_applied = Some((key.0, key.1.to_string()));
    }
}
