use serde::Serialize;

/// Where a sync run currently is.
///
/// ```text
/// Idle -> Paginating -> Fetching -> Extracting -> Resolving -> Persisting
///              ^            |                                     |
///              +------------+-------------------------------------+
/// ```
///
/// `Persisting` goes back to `Fetching` for the next page of the same
/// partition, or to `Paginating` when the partition is finished. `Done` and
/// `Aborted` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Paginating,
    Fetching,
    Extracting,
    Resolving,
    Persisting,
    Done,
    Aborted,
}

impl SyncState {
    pub fn can_transition_to(self, next: SyncState) -> bool {
        use SyncState::*;
        matches!(
            (self, next),
            (Idle, Paginating)
                | (Idle, Aborted)
                | (Paginating, Fetching)
                | (Paginating, Done)
                | (Paginating, Aborted)
                // exhausted fetch skips the partition
                | (Fetching, Paginating)
                | (Fetching, Extracting)
                | (Fetching, Aborted)
                | (Extracting, Resolving)
                | (Resolving, Persisting)
                | (Resolving, Aborted)
                | (Persisting, Fetching)
                | (Persisting, Paginating)
                | (Persisting, Aborted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SyncState::Done | SyncState::Aborted)
    }
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
