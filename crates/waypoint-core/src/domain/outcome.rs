//! Outcome model: result of one scan execution.

use serde::{Deserialize, Serialize};

/// Classification of a processed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    Success,
    Failure,
    /// URL 解決の結果が空だった（正常な、ただし成果のない結果）
    NoTargets,
}

/// What the scan executor reports back for a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanOutcome {
    pub kind: OutcomeKind,
    pub url_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ScanOutcome {
    pub fn success(url_count: usize) -> Self {
        Self {
            kind: OutcomeKind::Success,
            url_count,
            message: None,
        }
    }

    pub fn no_targets() -> Self {
        Self {
            kind: OutcomeKind::NoTargets,
            url_count: 0,
            message: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            url_count: 0,
            message: Some(message.into()),
        }
    }
}
