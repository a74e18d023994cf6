use serde::{Deserialize, Serialize};

/// Lifecycle state of a conversation turn (SPEC_FULL.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Processing,
    Completed,
    Interrupted,
    Failed,
}

impl TurnStatus {
    /// Terminal statuses never transition again (invariant 2).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TurnStatus::Completed | TurnStatus::Interrupted | TurnStatus::Failed
        )
    }
}

impl std::fmt::Display for TurnStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TurnStatus::Pending => "pending",
            TurnStatus::Processing => "processing",
            TurnStatus::Completed => "completed",
            TurnStatus::Interrupted => "interrupted",
            TurnStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
