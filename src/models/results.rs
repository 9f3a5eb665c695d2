use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Configuration stage identifiers, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    L3,
    Bgp,
}

impl StageKind {
    pub const ALL: [StageKind; 2] = [StageKind::L3, StageKind::Bgp];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::L3 => "l3",
            StageKind::Bgp => "bgp",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage on one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageOutcome {
    Success,
    /// The device reported an explicit error; usually an intent defect
    Failure,
    /// State never converged within the budget; a re-run may succeed
    Timeout,
}

impl StageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageOutcome::Success => "success",
            StageOutcome::Failure => "failure",
            StageOutcome::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// StageResult is the verdict for one (device, stage) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageKind,
    pub outcome: StageOutcome,
    /// Raw command output or a parsed summary backing the outcome
    pub evidence: String,
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

impl StageResult {
    pub fn new(stage: StageKind, outcome: StageOutcome, evidence: impl Into<String>, attempts: u32) -> Self {
        Self {
            stage,
            outcome,
            evidence: evidence.into(),
            attempts,
            timestamp: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StageOutcome::Success
    }

    /// Wire shape written back to the source-of-truth
    pub fn to_record(&self, device_id: &str) -> StageResultRecord {
        StageResultRecord {
            device_id: device_id.to_string(),
            stage: self.stage,
            outcome: self.outcome,
            evidence: self.evidence.clone(),
            attempts: self.attempts,
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// StageResultRecord is the persisted write-back document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageResultRecord {
    pub device_id: String,
    pub stage: StageKind,
    pub outcome: StageOutcome,
    pub evidence: String,
    /// Validation attempts made; 0 when the stage failed before validating
    pub attempts: u32,
    /// ISO 8601, UTC
    pub timestamp: String,
}

/// Why a device ended the run in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    MalformedIntent(String),
    /// The intent could not be read at all
    IntentUnavailable(String),
    Render(String),
    Apply(String),
    ValidationFailure(String),
    ValidationTimeout(String),
    StageBudgetExceeded(String),
    Cancelled,
    /// The device worker stopped unexpectedly
    Internal(String),
}

impl FailureReason {
    /// Outcome recorded for the stage that failed with this reason
    pub fn outcome(&self) -> StageOutcome {
        match self {
            FailureReason::ValidationTimeout(_)
            | FailureReason::StageBudgetExceeded(_)
            | FailureReason::Cancelled => StageOutcome::Timeout,
            _ => StageOutcome::Failure,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::MalformedIntent(_) => "malformed intent",
            FailureReason::IntentUnavailable(_) => "intent unavailable",
            FailureReason::Render(_) => "render error",
            FailureReason::Apply(_) => "apply error",
            FailureReason::ValidationFailure(_) => "validation failure",
            FailureReason::ValidationTimeout(_) => "validation timeout",
            FailureReason::StageBudgetExceeded(_) => "stage budget exceeded",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Internal(_) => "internal error",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Cancelled => f.write_str(self.label()),
            FailureReason::MalformedIntent(d)
            | FailureReason::IntentUnavailable(d)
            | FailureReason::Render(d)
            | FailureReason::Apply(d)
            | FailureReason::ValidationFailure(d)
            | FailureReason::ValidationTimeout(d)
            | FailureReason::StageBudgetExceeded(d)
            | FailureReason::Internal(d) => write!(f, "{}: {}", self.label(), d),
        }
    }
}
