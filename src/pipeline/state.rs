use chrono::{DateTime, Utc};

use crate::models::{Device, DeviceStatus, FailureReason, Intent, ObservedInterface, StageKind, StageResult};

/// Per-device pipeline state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    Pending,
    L3Applying,
    L3Validating,
    L3Ready,
    BgpApplying,
    BgpValidating,
    BgpReady,
    Failed { stage: StageKind, reason: FailureReason },
}

impl DeviceState {
    pub fn name(&self) -> &'static str {
        match self {
            DeviceState::Pending => "pending",
            DeviceState::L3Applying => "l3_applying",
            DeviceState::L3Validating => "l3_validating",
            DeviceState::L3Ready => "l3_ready",
            DeviceState::BgpApplying => "bgp_applying",
            DeviceState::BgpValidating => "bgp_validating",
            DeviceState::BgpReady => "bgp_ready",
            DeviceState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeviceState::BgpReady | DeviceState::Failed { .. })
    }

    pub fn applying(stage: StageKind) -> Self {
        match stage {
            StageKind::L3 => DeviceState::L3Applying,
            StageKind::Bgp => DeviceState::BgpApplying,
        }
    }

    pub fn validating(stage: StageKind) -> Self {
        match stage {
            StageKind::L3 => DeviceState::L3Validating,
            StageKind::Bgp => DeviceState::BgpValidating,
        }
    }

    pub fn ready(stage: StageKind) -> Self {
        match stage {
            StageKind::L3 => DeviceState::L3Ready,
            StageKind::Bgp => DeviceState::BgpReady,
        }
    }

    /// Stage a non-terminal device is working on or about to start
    pub fn stage(&self) -> Option<StageKind> {
        match self {
            DeviceState::Pending | DeviceState::L3Applying | DeviceState::L3Validating => Some(StageKind::L3),
            DeviceState::L3Ready | DeviceState::BgpApplying | DeviceState::BgpValidating => Some(StageKind::Bgp),
            DeviceState::BgpReady | DeviceState::Failed { .. } => None,
        }
    }

    /// Milestone persisted to the source-of-truth for this state
    pub fn status(&self) -> DeviceStatus {
        match self {
            DeviceState::Pending | DeviceState::L3Applying => DeviceStatus::Pending,
            DeviceState::L3Validating => DeviceStatus::L3Applied,
            DeviceState::L3Ready | DeviceState::BgpApplying => DeviceStatus::L3Validated,
            DeviceState::BgpValidating => DeviceStatus::BgpApplied,
            DeviceState::BgpReady => DeviceStatus::BgpValidated,
            DeviceState::Failed { .. } => DeviceStatus::Failed,
        }
    }

    fn allows(&self, next: &DeviceState) -> bool {
        use DeviceState::*;
        match (self, next) {
            (Pending, L3Applying)
            | (L3Applying, L3Validating)
            | (L3Validating, L3Ready)
            | (L3Ready, BgpApplying)
            | (BgpApplying, BgpValidating)
            | (BgpValidating, BgpReady) => true,
            // Pending fails only before the device is contacted
            (Pending, Failed { .. }) => true,
            (L3Applying | L3Validating | BgpApplying | BgpValidating, Failed { .. }) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceState::Failed { stage, reason } => write!(f, "failed at {} ({})", stage, reason),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct IllegalTransition {
    pub from: &'static str,
    pub to: &'static str,
}

/// One entry of the transition log
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: DeviceState,
    pub to: DeviceState,
    pub at: DateTime<Utc>,
}

/// DeviceRun is the per-device context, owned by exactly one worker
#[derive(Debug, Clone)]
pub struct DeviceRun {
    pub device: Device,
    /// Set once the intent has been fetched
    pub intent: Option<Intent>,
    /// Interfaces read back from a device that reached BgpReady
    pub observed: Vec<ObservedInterface>,
    /// `write memory` succeeded
    pub saved: bool,
    state: DeviceState,
    transitions: Vec<Transition>,
    results: Vec<StageResult>,
}

impl DeviceRun {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            intent: None,
            observed: Vec::new(),
            saved: false,
            state: DeviceState::Pending,
            transitions: Vec::new(),
            results: Vec::new(),
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn record(&mut self, result: StageResult) {
        self.results.push(result);
    }

    /// Move to `next`, logging the transition
    pub fn advance(&mut self, next: DeviceState) -> Result<(), IllegalTransition> {
        if !self.state.allows(&next) {
            return Err(IllegalTransition { from: self.state.name(), to: next.name() });
        }
        match &next {
            DeviceState::Failed { .. } => tracing::warn!("{} -> {}", self.state.name(), next),
            _ => tracing::info!("{} -> {}", self.state.name(), next.name()),
        }
        self.transitions.push(Transition {
            from: self.state.clone(),
            to: next.clone(),
            at: Utc::now(),
        });
        self.state = next;
        Ok(())
    }

    /// Enter `Failed` and record the stage result explaining why.
    /// A device that is already terminal is left untouched.
    pub fn fail(&mut self, stage: StageKind, reason: FailureReason) {
        if self.state.is_terminal() {
            return;
        }
        let result = StageResult::new(stage, reason.outcome(), reason.to_string(), 0);
        self.fail_with(stage, reason, result);
    }

    /// Enter `Failed` with a result produced by the stage itself
    pub fn fail_with(&mut self, stage: StageKind, reason: FailureReason, result: StageResult) {
        if self.state.is_terminal() {
            return;
        }
        let next = DeviceState::Failed { stage, reason };
        debug_assert!(
            self.state.allows(&next),
            "{} cannot fail from {}",
            self.device.name,
            self.state.name()
        );
        if let Err(e) = self.advance(next) {
            tracing::error!("{}: {}", self.device.name, e);
            return;
        }
        self.results.push(result);
    }

    /// Fail wherever the device currently is, keeping its log and results.
    /// A device between stages enters the next stage first: only in-flight
    /// states have an edge to `Failed`.
    pub fn abandon(&mut self, reason: FailureReason) {
        let Some(stage) = self.state.stage() else { return };
        if self.state == DeviceState::ready(StageKind::L3) {
            if let Err(e) = self.advance(DeviceState::applying(stage)) {
                tracing::error!("{}: {}", self.device.name, e);
                return;
            }
        }
        self.fail(stage, reason);
    }

    /// Whether the transition log shows the device entering `state`
    pub fn passed_through(&self, state: &DeviceState) -> bool {
        self.transitions.iter().any(|t| &t.to == state)
    }
}
