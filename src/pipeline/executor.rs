use crate::error::ApplyError;
use crate::models::StageKind;
use crate::session::{DeviceSession, RawOutput};

use super::parsers::find_rejection;

/// Push one stage's configuration. Success means the device accepted every
/// line, not that the resulting state has converged.
pub async fn apply_stage(
    session: &mut dyn DeviceSession,
    stage: StageKind,
    config: &str,
) -> Result<RawOutput, ApplyError> {
    if config.trim().is_empty() {
        return Err(ApplyError::EmptyConfig(stage.to_string()));
    }

    let line_count = config.lines().filter(|l| !l.trim().is_empty()).count();
    tracing::debug!("Pushing {} {} config lines", line_count, stage);

    let output = session.apply_config(config).await?;
    if let Some(line) = find_rejection(&output) {
        return Err(ApplyError::Rejected { line, output });
    }
    Ok(output)
}
