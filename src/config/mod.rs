use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::pipeline::{Backoff, PipelineSettings, RetryPolicy};
use crate::session::ssh::{credential_key, Credentials, SshSettings};

const CREDENTIAL_USER_PREFIX: &str = "SSH_USER_";
const CREDENTIAL_PASS_PREFIX: &str = "SSH_PASS_";

/// Config holds all run configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub netbox_url: String,
    pub netbox_token: String,
    pub netbox_timeout_secs: u64,
    /// Role slug selecting devices to provision
    pub device_role: String,
    /// Role slug validated devices are moved to; `None` disables promotion
    pub production_role: Option<String>,
    pub ssh: SshSettings,
    pub max_sessions: usize,
    pub save_config: bool,
    pub l3_policy: RetryPolicy,
    pub bgp_policy: RetryPolicy,
    pub stage_budget: Duration,
    pub configs_dir: Option<PathBuf>,
    pub templates_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> anyhow::Result<Self> {
        Self::from_vars(&env::vars().collect())
    }

    pub fn from_vars(vars: &HashMap<String, String>) -> anyhow::Result<Self> {
        let netbox_token = get_env(vars, "NETBOX_TOKEN", "");
        if netbox_token.trim().is_empty() {
            anyhow::bail!("NETBOX_TOKEN must be set");
        }

        let l3_policy = RetryPolicy::fixed(
            parse_env(vars, "L3_MAX_ATTEMPTS", 3),
            Duration::from_secs(parse_env(vars, "L3_RETRY_INTERVAL_SECS", 10)),
        )
        .with_settle(Duration::from_secs(parse_env(vars, "L3_SETTLE_SECS", 20)));

        let bgp_interval = Duration::from_secs(parse_env(vars, "BGP_RETRY_INTERVAL_SECS", 10));
        let bgp_policy = RetryPolicy::fixed(parse_env(vars, "BGP_MAX_ATTEMPTS", 6), bgp_interval)
            .with_settle(Duration::from_secs(parse_env(vars, "BGP_SETTLE_SECS", 20)))
            .with_backoff(
                parse_env(vars, "BGP_BACKOFF", Backoff::Exponential),
                Duration::from_secs(parse_env(vars, "BGP_MAX_INTERVAL_SECS", 60)),
            );

        let stage_budget = Duration::from_secs(positive_env(vars, "STAGE_BUDGET_SECS", 300));
        for (stage, policy) in [("l3", &l3_policy), ("bgp", &bgp_policy)] {
            if policy.total_wait() >= stage_budget {
                tracing::warn!(
                    "{} validation may wait {:?}, longer than the {:?} stage budget",
                    stage,
                    policy.total_wait(),
                    stage_budget
                );
            }
        }

        Ok(Self {
            netbox_url: get_env(vars, "NETBOX_URL", "http://localhost:8000"),
            netbox_token,
            netbox_timeout_secs: parse_env(vars, "NETBOX_TIMEOUT_SECS", 30),
            device_role: get_env(vars, "DEVICE_ROLE", "wan-router-provision"),
            production_role: non_empty(get_env(vars, "PRODUCTION_ROLE", "wan-router")),
            ssh: SshSettings {
                port: parse_env(vars, "SSH_PORT", 22),
                timeout_secs: parse_env(vars, "SSH_TIMEOUT_SECS", 30),
                enable_scp: parse_env(vars, "ENABLE_SCP", true),
                default_credentials: Credentials {
                    username: get_env(vars, "SSH_USER", "admin"),
                    password: get_env(vars, "SSH_PASS", ""),
                },
                named_credentials: named_credentials(vars),
            },
            max_sessions: parse_env(vars, "MAX_SESSIONS", 4),
            save_config: parse_env(vars, "SAVE_CONFIG", true),
            l3_policy,
            bgp_policy,
            stage_budget,
            configs_dir: non_empty(get_env(vars, "CONFIGS_DIR", "configs")).map(PathBuf::from),
            templates_dir: non_empty(get_env(vars, "TEMPLATES_DIR", "")).map(PathBuf::from),
        })
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            l3_policy: self.l3_policy.clone(),
            bgp_policy: self.bgp_policy.clone(),
            stage_budget: self.stage_budget,
            save_config: self.save_config,
            configs_dir: self.configs_dir.clone(),
            promote: self.production_role.is_some(),
        }
    }
}

fn get_env(vars: &HashMap<String, String>, key: &str, default: &str) -> String {
    vars.get(key).cloned().unwrap_or_else(|| default.to_string())
}

/// Parse `key`, falling back to `default` with a warning when the value is invalid
fn parse_env<T: FromStr>(vars: &HashMap<String, String>, key: &str, default: T) -> T {
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid value {:?} for {}, using default", raw, key);
            default
        }),
    }
}

/// Like `parse_env`, but zero also falls back to `default`
fn positive_env(vars: &HashMap<String, String>, key: &str, default: u64) -> u64 {
    match parse_env(vars, key, default) {
        0 => {
            tracing::warn!("{} must be greater than zero, using default", key);
            default
        }
        value => value,
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// SSH_USER_<REF> / SSH_PASS_<REF> pairs, keyed by REF
fn named_credentials(vars: &HashMap<String, String>) -> HashMap<String, Credentials> {
    vars.iter()
        .filter_map(|(key, username)| {
            let reference = key.strip_prefix(CREDENTIAL_USER_PREFIX)?;
            let password = vars
                .get(&format!("{}{}", CREDENTIAL_PASS_PREFIX, reference))
                .cloned()
                .unwrap_or_default();
            Some((credential_key(reference), Credentials { username: username.clone(), password }))
        })
        .collect()
}
