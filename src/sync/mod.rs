//! The reconcilers that run one sync pass
//!
//! A pass pulls the items that changed since the activity's checkpoint, diffs them against
//! the sink by stable external id, applies create/update/delete operations, and persists a
//! new checkpoint only when everything succeeded. Failed passes keep their checkpoint, so
//! the next pass covers the same window again; existence checks make the replay safe.

pub mod calendar;
pub mod progress;
pub mod tasks;

pub use progress::PassSummary;

/// How the most recent pass of an activity went.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassStatus {
    /// No pass has run yet
    NotStarted,
    Success,
    /// The pass aborted; the causing error is retained by the reconciler for inspection
    Failed,
}

impl Default for PassStatus {
    fn default() -> Self {
        Self::NotStarted
    }
}
