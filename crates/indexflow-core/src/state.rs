//! Pipeline state machine states.

use serde::{Deserialize, Serialize};

/// Where the pipeline is within its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Between cycles, or waiting for new blocks.
    Idle,
    DeterminingRange,
    CheckingReorg,
    /// Retracting events above a reorg's common ancestor.
    RollingBack,
    FetchingLogs,
    Decoding,
    Applying,
    Checkpointing,
    /// Terminal: stopped on an unrecoverable error.
    Halted,
}

impl PipelineState {
    pub const ALL: [PipelineState; 9] = [
        Self::Idle,
        Self::DeterminingRange,
        Self::CheckingReorg,
        Self::RollingBack,
        Self::FetchingLogs,
        Self::Decoding,
        Self::Applying,
        Self::Checkpointing,
        Self::Halted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DeterminingRange => "determining_range",
            Self::CheckingReorg => "checking_reorg",
            Self::RollingBack => "rolling_back",
            Self::FetchingLogs => "fetching_logs",
            Self::Decoding => "decoding",
            Self::Applying => "applying",
            Self::Checkpointing => "checkpointing",
            Self::Halted => "halted",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
