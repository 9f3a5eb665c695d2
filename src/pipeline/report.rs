use chrono::{DateTime, Utc};
use std::fmt::Write;
use uuid::Uuid;

use super::state::{DeviceRun, DeviceState};

/// Exit code when at least one device failed
pub const EXIT_DEVICE_FAILED: i32 = 2;

/// Terminal state of every device in a run
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Sorted by device name
    pub devices: Vec<DeviceRun>,
}

impl RunReport {
    pub fn new(run_id: Uuid, started_at: DateTime<Utc>, devices: Vec<DeviceRun>) -> Self {
        Self {
            run_id,
            started_at,
            finished_at: Utc::now(),
            devices,
        }
    }

    #[cfg(test)]
    pub fn device(&self, name: &str) -> Option<&DeviceRun> {
        self.devices.iter().find(|d| d.device.name == name)
    }

    pub fn succeeded(&self) -> usize {
        self.devices.iter().filter(|d| *d.state() == DeviceState::BgpReady).count()
    }

    pub fn failed(&self) -> usize {
        self.devices.len() - self.succeeded()
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed() == 0 {
            0
        } else {
            EXIT_DEVICE_FAILED
        }
    }

    /// Human-readable per-device summary
    pub fn summary(&self) -> String {
        let elapsed = (self.finished_at - self.started_at).num_seconds();
        let mut out = format!("Run {} finished in {}s\n", self.run_id, elapsed);

        for run in &self.devices {
            let stages: Vec<String> = run
                .results()
                .iter()
                .map(|r| format!("{}={}({})", r.stage, r.outcome, r.attempts))
                .collect();
            let stages = if stages.is_empty() { "-".to_string() } else { stages.join(" ") };
            let _ = write!(out, "  {:<20} {:<10} {}", run.device.name, run.state().name(), stages);
            if let DeviceState::Failed { stage, reason } = run.state() {
                let _ = write!(out, "  [{}] {}", stage, reason);
            }
            if run.saved {
                out.push_str("  (saved)");
            }
            out.push('\n');
            let _ = writeln!(out, "    {}", transition_path(run));
        }

        let _ = write!(
            out,
            "{} of {} devices reached bgp_ready, {} failed",
            self.succeeded(),
            self.devices.len(),
            self.failed()
        );
        out
    }
}

/// "pending -> l3_applying -> ... (4.2s)" replayed from the transition log
fn transition_path(run: &DeviceRun) -> String {
    let log = run.transitions();
    let (Some(first), Some(last)) = (log.first(), log.last()) else {
        return run.state().name().to_string();
    };
    let states: Vec<&str> = std::iter::once(first.from.name())
        .chain(log.iter().map(|t| t.to.name()))
        .collect();
    let elapsed = (last.at - first.at).num_milliseconds() as f64 / 1000.0;
    format!("{} ({:.1}s)", states.join(" -> "), elapsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Device, FailureReason, StageKind, StageOutcome, StageResult};

    #[test]
    fn test_summary_lists_outcomes_and_reasons() {
        let mut ok = DeviceRun::new(Device::new(1, "csr-1", "192.0.2.1"));
        for stage in StageKind::ALL {
            ok.advance(DeviceState::applying(stage)).unwrap();
            ok.advance(DeviceState::validating(stage)).unwrap();
            ok.record(StageResult::new(stage, StageOutcome::Success, "ok", 1));
            ok.advance(DeviceState::ready(stage)).unwrap();
        }

        let mut bad = DeviceRun::new(Device::new(2, "csr-2", "192.0.2.2"));
        bad.advance(DeviceState::L3Applying).unwrap();
        bad.fail(StageKind::L3, FailureReason::Apply("authentication to 192.0.2.2 failed".into()));
        ok.saved = true;

        let report = RunReport::new(Uuid::new_v4(), Utc::now(), vec![ok, bad]);
        let summary = report.summary();

        assert!(summary.contains("csr-1"));
        assert!(summary.contains("l3=success(1) bgp=success(1)"));
        assert!(summary.contains("[l3] apply error: authentication to 192.0.2.2 failed"));
        assert!(summary.contains("bgp=success(1)  (saved)"));
        assert!(summary.contains(
            "pending -> l3_applying -> l3_validating -> l3_ready -> bgp_applying -> bgp_validating -> bgp_ready ("
        ));
        assert!(summary.contains("    pending -> l3_applying -> failed ("));
        assert!(summary.ends_with("1 of 2 devices reached bgp_ready, 1 failed"));
        assert_eq!(report.exit_code(), EXIT_DEVICE_FAILED);
    }

    #[test]
    fn test_untouched_device_shows_its_state() {
        let run = DeviceRun::new(Device::new(3, "csr-3", "192.0.2.3"));
        assert_eq!(transition_path(&run), "pending");
    }

    #[test]
    fn test_all_ready_exits_zero() {
        let report = RunReport::new(Uuid::new_v4(), Utc::now(), Vec::new());
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.device("csr-1").map(|d| d.device.id), None);
    }
}
