//! Convergence checks for each stage.
//!
//! A stage is re-checked under its RetryPolicy until the observed state
//! matches intent or attempts run out. Each attempt ends in one of four
//! verdicts; the last verdict decides between failure and timeout.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::parsers::{find_rejection, parse_bgp_summary, parse_interface_brief, parse_ping, PeerState};
use super::retry::{RetryPolicy, Sleeper};
use crate::error::SessionError;
use crate::models::{Intent, StageKind, StageOutcome, StageResult};
use crate::session::DeviceSession;
use crate::utils::{parse_ipv4, same_subnet, truncate_lines};

pub const SHOW_INTERFACES: &str = "show ip interface brief";
pub const SHOW_BGP_SUMMARY: &str = "show ip bgp summary";

const PING_COUNT: u32 = 5;
/// A probe passes when fewer echoes than this are lost
const MAX_LOST_ECHOES: u32 = 2;
const MAX_EVIDENCE_LINES: usize = 40;

#[derive(Debug)]
enum Verdict {
    Converged(Vec<String>),
    /// Not converged yet; waiting may help
    Pending(Vec<String>),
    /// The device reports state that contradicts intent
    Failed(Vec<String>),
    /// The device refused a validation command
    Rejected(String),
}

/// Findings of a single attempt
#[derive(Default)]
struct Findings {
    lines: Vec<String>,
    failed: bool,
    pending: bool,
}

impl Findings {
    fn ok(&mut self, line: String) {
        self.lines.push(line);
    }

    fn pending(&mut self, line: String) {
        self.pending = true;
        self.lines.push(line);
    }

    fn failed(&mut self, line: String) {
        self.failed = true;
        self.lines.push(line);
    }

    fn session_error(&mut self, command: &str, err: SessionError) {
        let line = format!("{}: {}", command, err);
        match err {
            SessionError::Timeout(_) => self.pending(line),
            _ => self.failed(line),
        }
    }

    fn is_clean(&self) -> bool {
        !self.failed && !self.pending
    }

    fn into_verdict(self) -> Verdict {
        if self.failed {
            Verdict::Failed(self.lines)
        } else if self.pending {
            Verdict::Pending(self.lines)
        } else {
            Verdict::Converged(self.lines)
        }
    }
}

/// A reachability probe from a local interface address to a BGP neighbor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct L3Target {
    pub destination: String,
    pub source: String,
}

impl L3Target {
    pub fn command(&self) -> String {
        format!("ping {} source {} repeat {}", self.destination, self.source, PING_COUNT)
    }
}

/// Neighbors that sit on the subnet of an enabled interface, paired with
/// that interface's address
pub fn l3_targets(intent: &Intent) -> Vec<L3Target> {
    let mut targets: Vec<L3Target> = Vec::new();
    for nb in &intent.bgp.neighbors {
        let Some(peer) = parse_ipv4(&nb.ipaddr) else { continue };
        let source = intent.up_interfaces().find_map(|(_, intf)| {
            let (addr, mask) = intf.address_and_mask()?;
            let local = parse_ipv4(addr)?;
            let mask = parse_ipv4(mask)?;
            (local != peer && same_subnet(local, peer, mask)).then(|| addr.to_string())
        });
        if let Some(source) = source {
            if !targets.iter().any(|t| t.destination == nb.ipaddr) {
                targets.push(L3Target { destination: nb.ipaddr.clone(), source });
            }
        }
    }
    targets
}

/// Validator runs the retry loop for a stage
pub struct Validator {
    sleeper: Arc<dyn Sleeper>,
    cancel: CancellationToken,
}

impl Validator {
    pub fn new(sleeper: Arc<dyn Sleeper>, cancel: CancellationToken) -> Self {
        Self { sleeper, cancel }
    }

    /// Check `stage` until it converges or `policy` is exhausted.
    /// Always returns a result; cancellation ends the loop with a timeout.
    pub async fn validate(
        &self,
        session: &mut dyn DeviceSession,
        stage: StageKind,
        intent: &Intent,
        policy: &RetryPolicy,
    ) -> StageResult {
        let max_attempts = policy.attempts();
        let mut last = Verdict::Pending(vec!["no validation attempt completed".to_string()]);

        for attempt in 1..=max_attempts {
            let delay = policy.delay_before(attempt);
            if !delay.is_zero() {
                tracing::debug!("Waiting {:?} before {} check {}/{}", delay, stage, attempt, max_attempts);
            }
            let interrupted = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => true,
                _ = self.sleeper.sleep(delay), if !delay.is_zero() => false,
                _ = std::future::ready(()), if delay.is_zero() => self.cancel.is_cancelled(),
            };
            if interrupted {
                tracing::warn!("{} validation cancelled before attempt {}", stage, attempt);
                return StageResult::new(
                    stage,
                    StageOutcome::Timeout,
                    format!("cancelled before attempt {}", attempt),
                    attempt - 1,
                );
            }

            let verdict = match stage {
                StageKind::L3 => check_l3(session, intent).await,
                StageKind::Bgp => check_bgp(session, intent).await,
            };

            match verdict {
                Verdict::Converged(lines) => {
                    tracing::info!("{} converged on attempt {}/{}", stage, attempt, max_attempts);
                    return StageResult::new(stage, StageOutcome::Success, evidence(&lines), attempt);
                }
                Verdict::Rejected(line) => {
                    tracing::warn!("{} validation command rejected: {}", stage, line);
                    return StageResult::new(stage, StageOutcome::Failure, line, attempt);
                }
                other => {
                    tracing::debug!("{} not converged on attempt {}/{}: {:?}", stage, attempt, max_attempts, other);
                    last = other;
                }
            }
        }

        match last {
            Verdict::Failed(lines) => {
                tracing::warn!("{} failed after {} attempts", stage, max_attempts);
                StageResult::new(stage, StageOutcome::Failure, evidence(&lines), max_attempts)
            }
            Verdict::Pending(lines) => {
                tracing::warn!("{} did not converge after {} attempts", stage, max_attempts);
                StageResult::new(stage, StageOutcome::Timeout, evidence(&lines), max_attempts)
            }
            // Converged and Rejected return from inside the loop
            Verdict::Converged(lines) => StageResult::new(stage, StageOutcome::Success, evidence(&lines), max_attempts),
            Verdict::Rejected(line) => StageResult::new(stage, StageOutcome::Failure, line, max_attempts),
        }
    }
}

fn evidence(lines: &[String]) -> String {
    truncate_lines(&lines.join("\n"), MAX_EVIDENCE_LINES)
}

async fn check_l3(session: &mut dyn DeviceSession, intent: &Intent) -> Verdict {
    let mut findings = Findings::default();

    let output = match session.run_command(SHOW_INTERFACES).await {
        Ok(output) => output,
        Err(e) => {
            findings.session_error(SHOW_INTERFACES, e);
            return findings.into_verdict();
        }
    };
    if let Some(line) = find_rejection(&output) {
        return Verdict::Rejected(format!("{}: {}", SHOW_INTERFACES, line));
    }

    let rows = parse_interface_brief(&output);
    for (name, intf) in intent.up_interfaces() {
        let Some((addr, _)) = intf.address_and_mask() else { continue };
        match rows.iter().find(|r| r.name.eq_ignore_ascii_case(name)) {
            None => findings.failed(format!("{}: not present on device", name)),
            Some(row) if row.address != addr => findings.failed(format!(
                "{}: address {} does not match intent {}",
                name, row.address, addr
            )),
            Some(row) if row.is_up() => findings.ok(format!("{} {} up/up", name, addr)),
            Some(row) if row.is_admin_down() => findings.failed(format!("{}: administratively down", name)),
            Some(row) => findings.pending(format!("{} {} {}/{}", name, addr, row.status, row.protocol)),
        }
    }

    // Probing peers is pointless until every interface is up
    if !findings.is_clean() {
        return findings.into_verdict();
    }

    for target in l3_targets(intent) {
        let command = target.command();
        let output = match session.run_command(&command).await {
            Ok(output) => output,
            Err(e) => {
                findings.session_error(&command, e);
                continue;
            }
        };
        let report = parse_ping(&output);
        if let Some(line) = report.rejected {
            return Verdict::Rejected(format!("{}: {}", command, line));
        }

        let label = format!("ping {} from {}", target.destination, target.source);
        if report.unreachable {
            findings.failed(format!("{}: unreachable", label));
        } else if report.sent == 0 {
            findings.pending(format!("{}: no result", label));
        } else if report.lost() >= MAX_LOST_ECHOES {
            findings.pending(format!("{}: {}/{} received", label, report.received, report.sent));
        } else {
            findings.ok(format!("{}: {}/{} received", label, report.received, report.sent));
        }
    }

    findings.into_verdict()
}

async fn check_bgp(session: &mut dyn DeviceSession, intent: &Intent) -> Verdict {
    let mut findings = Findings::default();

    let output = match session.run_command(SHOW_BGP_SUMMARY).await {
        Ok(output) => output,
        Err(e) => {
            findings.session_error(SHOW_BGP_SUMMARY, e);
            return findings.into_verdict();
        }
    };
    if let Some(line) = find_rejection(&output) {
        return Verdict::Rejected(format!("{}: {}", SHOW_BGP_SUMMARY, line));
    }
    if output.contains("BGP not active") {
        findings.pending("BGP not active".to_string());
        return findings.into_verdict();
    }

    let peers = parse_bgp_summary(&output);
    for nb in &intent.bgp.neighbors {
        match peers.iter().find(|p| p.address == nb.ipaddr) {
            None => findings.failed(format!("{}: not in BGP neighbor table", nb.ipaddr)),
            Some(peer) if peer.remote_asn != nb.remote_asn => findings.failed(format!(
                "{}: remote AS {} does not match intent {}",
                nb.ipaddr, peer.remote_asn, nb.remote_asn
            )),
            Some(peer) => {
                let line = format!("{} AS{} {}", peer.address, peer.remote_asn, peer.state);
                match &peer.state {
                    PeerState::Established { .. } => findings.ok(line),
                    state if state.is_admin_down() => findings.failed(line),
                    PeerState::Down(_) => findings.pending(line),
                }
            }
        }
    }

    findings.into_verdict()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::intent::sample_intent;
    use crate::models::Device;
    use crate::pipeline::retry::RecordingSleeper;
    use crate::session::mock::{MockScript, MockSessionFactory};
    use crate::session::SessionFactory;
    use std::time::Duration;

    const INTERFACES_UP: &str = "\
Interface              IP-Address      OK? Method Status                Protocol
GigabitEthernet1       172.20.12.1     YES manual up                    up
GigabitEthernet2       172.20.13.1     YES manual up                    up
Loopback0              1.1.1.1         YES manual up                    up
";

    const PING_OK: &str = "Type escape sequence to abort.\n!!!!!\nSuccess rate is 100 percent (5/5), round-trip min/avg/max = 1/1/2 ms\n";
    const PING_UNREACHABLE: &str = "Type escape sequence to abort.\nU.U.U\nSuccess rate is 0 percent (0/5)\n";
    const PING_SILENT: &str = "Type escape sequence to abort.\n.....\nSuccess rate is 0 percent (0/5)\n";

    const BGP_HEADER: &str = "\
BGP router identifier 1.1.1.1, local AS number 65511
Neighbor        V           AS MsgRcvd MsgSent   TblVer  InQ OutQ Up/Down  State/PfxRcd
";

    const PING_12: &str = "ping 172.20.12.2 source 172.20.12.1 repeat 5";
    const PING_13: &str = "ping 172.20.13.3 source 172.20.13.1 repeat 5";

    fn bgp_summary(rows: &[&str]) -> String {
        format!("{}{}\n", BGP_HEADER, rows.join("\n"))
    }

    fn session(script: MockScript) -> Box<dyn DeviceSession> {
        MockSessionFactory::new()
            .with_device("csr-1", script)
            .session_for(&Device::new(1, "csr-1", "192.0.2.1"))
    }

    fn validator(sleeper: Arc<RecordingSleeper>) -> Validator {
        Validator::new(sleeper, CancellationToken::new())
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::fixed(attempts, Duration::from_secs(10)).with_settle(Duration::from_secs(20))
    }

    #[test]
    fn test_l3_targets_pair_neighbors_with_local_subnet() {
        let targets = l3_targets(&sample_intent());
        assert_eq!(
            targets,
            vec![
                L3Target { destination: "172.20.12.2".to_string(), source: "172.20.12.1".to_string() },
                L3Target { destination: "172.20.13.3".to_string(), source: "172.20.13.1".to_string() },
            ]
        );
        assert_eq!(targets[0].command(), PING_12);
    }

    #[tokio::test]
    async fn test_l3_converges() {
        let script = MockScript::default()
            .respond(SHOW_INTERFACES, &[INTERFACES_UP])
            .respond(PING_12, &[PING_OK])
            .respond(PING_13, &[PING_OK]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let result = validator(sleeper.clone())
            .validate(session(script).as_mut(), StageKind::L3, &sample_intent(), &policy(3))
            .await;

        assert_eq!(result.outcome, StageOutcome::Success, "{}", result.evidence);
        assert_eq!(result.attempts, 1);
        assert!(result.evidence.contains("Loopback0 1.1.1.1 up/up"));
        assert!(result.evidence.contains("ping 172.20.13.3 from 172.20.13.1: 5/5 received"));
        assert_eq!(sleeper.waits(), vec![Duration::from_secs(20)]);
    }

    #[tokio::test]
    async fn test_l3_unreachable_probe_is_failure() {
        let script = MockScript::default()
            .respond(SHOW_INTERFACES, &[INTERFACES_UP])
            .respond(PING_12, &[PING_OK])
            .respond(PING_13, &[PING_UNREACHABLE]);
        let result = validator(Arc::new(RecordingSleeper::default()))
            .validate(session(script).as_mut(), StageKind::L3, &sample_intent(), &policy(3))
            .await;

        assert_eq!(result.outcome, StageOutcome::Failure);
        assert_eq!(result.attempts, 3);
        assert!(result.evidence.contains("ping 172.20.13.3 from 172.20.13.1: unreachable"));
    }

    #[tokio::test]
    async fn test_l3_silent_loss_is_timeout() {
        let script = MockScript::default()
            .respond(SHOW_INTERFACES, &[INTERFACES_UP])
            .respond(PING_12, &[PING_OK])
            .respond(PING_13, &[PING_SILENT]);
        let result = validator(Arc::new(RecordingSleeper::default()))
            .validate(session(script).as_mut(), StageKind::L3, &sample_intent(), &policy(2))
            .await;

        assert_eq!(result.outcome, StageOutcome::Timeout);
        assert_eq!(result.attempts, 2);
    }

    #[tokio::test]
    async fn test_l3_shutdown_interface_is_failure() {
        let output = INTERFACES_UP.replace(
            "GigabitEthernet2       172.20.13.1     YES manual up                    up",
            "GigabitEthernet2       172.20.13.1     YES manual administratively down down",
        );
        let script = MockScript::default().respond(SHOW_INTERFACES, &[&output]);
        let result = validator(Arc::new(RecordingSleeper::default()))
            .validate(session(script).as_mut(), StageKind::L3, &sample_intent(), &policy(2))
            .await;

        assert_eq!(result.outcome, StageOutcome::Failure);
        assert_eq!(result.attempts, 2);
        assert!(result.evidence.contains("GigabitEthernet2: administratively down"));
    }

    #[tokio::test]
    async fn test_l3_address_mismatch_is_failure() {
        let output = INTERFACES_UP.replace("172.20.13.1 ", "172.20.99.1 ");
        let script = MockScript::default().respond(SHOW_INTERFACES, &[&output]);
        let result = validator(Arc::new(RecordingSleeper::default()))
            .validate(session(script).as_mut(), StageKind::L3, &sample_intent(), &policy(1))
            .await;

        assert_eq!(result.outcome, StageOutcome::Failure);
        assert!(result.evidence.contains("GigabitEthernet2: address 172.20.99.1 does not match intent 172.20.13.1"));
    }

    #[tokio::test]
    async fn test_l3_converges_on_later_attempt() {
        let down = INTERFACES_UP.replace(
            "GigabitEthernet2       172.20.13.1     YES manual up                    up",
            "GigabitEthernet2       172.20.13.1     YES manual up                    down",
        );
        let script = MockScript::default()
            .respond(SHOW_INTERFACES, &[&down, &down, INTERFACES_UP])
            .respond(PING_12, &[PING_OK])
            .respond(PING_13, &[PING_OK]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let result = validator(sleeper.clone())
            .validate(session(script).as_mut(), StageKind::L3, &sample_intent(), &policy(5))
            .await;

        assert_eq!(result.outcome, StageOutcome::Success);
        assert_eq!(result.attempts, 3);
        assert_eq!(
            sleeper.waits(),
            vec![Duration::from_secs(20), Duration::from_secs(10), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn test_bgp_missing_neighbor_is_failure() {
        let summary = bgp_summary(&["172.20.12.2     4        65512      12      11        7    0    0 00:05:12        2"]);
        let script = MockScript::default().respond(SHOW_BGP_SUMMARY, &[&summary]);
        let result = validator(Arc::new(RecordingSleeper::default()))
            .validate(session(script).as_mut(), StageKind::Bgp, &sample_intent(), &policy(3))
            .await;

        assert_eq!(result.outcome, StageOutcome::Failure);
        assert_eq!(result.attempts, 3);
        assert!(result.evidence.contains("172.20.13.3: not in BGP neighbor table"));
        assert!(result.evidence.contains("172.20.12.2 AS65512 Established"));
    }

    #[tokio::test]
    async fn test_bgp_extra_neighbors_are_ignored() {
        let summary = bgp_summary(&[
            "172.20.12.2     4        65512      12      11        7    0    0 00:05:12        2",
            "172.20.13.3     4        65513      10      10        7    0    0 00:04:40        1",
            "172.20.99.9     4        65599       0       0        1    0    0 never    Active",
        ]);
        let script = MockScript::default().respond(SHOW_BGP_SUMMARY, &[&summary]);
        let result = validator(Arc::new(RecordingSleeper::default()))
            .validate(session(script).as_mut(), StageKind::Bgp, &sample_intent(), &policy(3))
            .await;

        assert_eq!(result.outcome, StageOutcome::Success, "{}", result.evidence);
        assert!(!result.evidence.contains("172.20.99.9"));
    }

    #[tokio::test]
    async fn test_bgp_asn_mismatch_is_failure() {
        let summary = bgp_summary(&[
            "172.20.12.2     4        65512      12      11        7    0    0 00:05:12        2",
            "172.20.13.3     4        65000       0       0        1    0    0 never    Idle",
        ]);
        let script = MockScript::default().respond(SHOW_BGP_SUMMARY, &[&summary]);
        let result = validator(Arc::new(RecordingSleeper::default()))
            .validate(session(script).as_mut(), StageKind::Bgp, &sample_intent(), &policy(2))
            .await;

        assert_eq!(result.outcome, StageOutcome::Failure);
        assert!(result.evidence.contains("172.20.13.3: remote AS 65000 does not match intent 65513"));
    }

    #[tokio::test]
    async fn test_bgp_stuck_active_is_timeout() {
        let summary = bgp_summary(&[
            "172.20.12.2     4        65512      12      11        7    0    0 00:05:12        2",
            "172.20.13.3     4        65513       0       0        1    0    0 never    Active",
        ]);
        let script = MockScript::default().respond(SHOW_BGP_SUMMARY, &[&summary]);
        let result = validator(Arc::new(RecordingSleeper::default()))
            .validate(session(script).as_mut(), StageKind::Bgp, &sample_intent(), &policy(4))
            .await;

        assert_eq!(result.outcome, StageOutcome::Timeout);
        assert_eq!(result.attempts, 4);
        assert!(result.evidence.contains("172.20.13.3 AS65513 Active"));
    }

    #[tokio::test]
    async fn test_rejected_command_fails_immediately() {
        // No responses scripted: every command is rejected
        let result = validator(Arc::new(RecordingSleeper::default()))
            .validate(session(MockScript::default()).as_mut(), StageKind::Bgp, &sample_intent(), &policy(5))
            .await;

        assert_eq!(result.outcome, StageOutcome::Failure);
        assert_eq!(result.attempts, 1);
        assert!(result.evidence.starts_with(SHOW_BGP_SUMMARY));
    }

    #[tokio::test]
    async fn test_cancellation_stops_retries() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let script = MockScript::default().respond(SHOW_BGP_SUMMARY, &["% BGP not active"]);
        let factory = MockSessionFactory::new().with_device("csr-1", script);
        let mut s = factory.session_for(&Device::new(1, "csr-1", "192.0.2.1"));

        let result = Validator::new(Arc::new(RecordingSleeper::default()), cancel)
            .validate(s.as_mut(), StageKind::Bgp, &sample_intent(), &policy(5))
            .await;

        assert_eq!(result.outcome, StageOutcome::Timeout);
        assert_eq!(result.attempts, 0);
        assert!(factory.log("csr-1").is_empty());
    }
}
