use async_trait::async_trait;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{DeviceSession, RawOutput, SessionFactory};
use crate::error::SessionError;
use crate::models::Device;
use crate::pipeline::parsers::find_rejection;

const SCP_ENABLE: &str = "ip scp server enable";
const SCP_DISABLE: &str = "no ip scp server enable";

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// SSH login for one device
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Normalised name of a credential set: "lab-east" and "LAB_EAST" are the same set
pub fn credential_key(reference: &str) -> String {
    reference
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

/// Session settings shared by every SSH session in a run
#[derive(Debug, Clone)]
pub struct SshSettings {
    pub port: u16,
    pub timeout_secs: u64,
    /// Toggle the IOS SCP server around the session
    pub enable_scp: bool,
    pub default_credentials: Credentials,
    pub named_credentials: HashMap<String, Credentials>,
}

impl SshSettings {
    /// Device-specific credentials win over the defaults
    pub fn credentials_for(&self, device: &Device) -> Credentials {
        device
            .credential_ref
            .as_ref()
            .and_then(|name| {
                let creds = self.named_credentials.get(&credential_key(name));
                if creds.is_none() {
                    tracing::warn!("{}: credential set '{}' not configured, using defaults", device.name, name);
                }
                creds
            })
            .cloned()
            .unwrap_or_else(|| self.default_credentials.clone())
    }
}

/// SshSessionFactory builds SSH sessions against each device's management address
pub struct SshSessionFactory {
    settings: SshSettings,
}

impl SshSessionFactory {
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }
}

impl SessionFactory for SshSessionFactory {
    fn session_for(&self, device: &Device) -> Box<dyn DeviceSession> {
        Box::new(SshSession {
            host: device.mgmt_address.clone(),
            port: self.settings.port,
            credentials: self.settings.credentials_for(device),
            timeout_secs: self.settings.timeout_secs,
            enable_scp: self.settings.enable_scp,
            scp_enabled: false,
            session: None,
        })
    }
}

/// SshSession drives a Cisco IOS device over libssh2.
/// All libssh2 calls are blocking, so each one runs on the blocking pool.
pub struct SshSession {
    host: String,
    port: u16,
    credentials: Credentials,
    timeout_secs: u64,
    enable_scp: bool,
    /// The device accepted `ip scp server enable` on this session
    scp_enabled: bool,
    session: Option<ssh2::Session>,
}

impl SshSession {
    fn handle(&self) -> Result<ssh2::Session, SessionError> {
        self.session.clone().ok_or(SessionError::NotConnected)
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, SessionError>
    where
        T: Send + 'static,
        F: FnOnce(ssh2::Session, u64) -> Result<T, SessionError> + Send + 'static,
    {
        let session = self.handle()?;
        let timeout_secs = self.timeout_secs;
        tokio::task::spawn_blocking(move || f(session, timeout_secs))
            .await
            .map_err(|e| SessionError::Channel(format!("task join error: {}", e)))?
    }
}

#[async_trait]
impl DeviceSession for SshSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        let host = self.host.clone();
        let port = self.port;
        let creds = self.credentials.clone();
        let timeout_secs = self.timeout_secs;

        let session = tokio::task::spawn_blocking(move || ssh_connect(&host, port, &creds, timeout_secs))
            .await
            .map_err(|e| SessionError::Channel(format!("task join error: {}", e)))??;
        self.session = Some(session);
        tracing::debug!("SSH session established to {}", self.host);

        if self.enable_scp {
            let output = self.apply_config(SCP_ENABLE).await?;
            self.scp_enabled = accepted(&self.host, SCP_ENABLE, &output);
            if self.scp_enabled {
                tracing::info!("{}: SCP has been enabled", self.host);
            }
        }
        Ok(())
    }

    async fn apply_config(&mut self, config: &str) -> Result<RawOutput, SessionError> {
        let config = config.to_string();
        self.blocking(move |session, timeout_secs| ssh_apply_config(&session, &config, timeout_secs))
            .await
    }

    async fn run_command(&mut self, command: &str) -> Result<RawOutput, SessionError> {
        let command = command.to_string();
        self.blocking(move |session, timeout_secs| ssh_exec(&session, &command, timeout_secs))
            .await
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        if self.session.is_none() {
            return Ok(());
        }
        let scp_result = if self.scp_enabled {
            self.apply_config(SCP_DISABLE).await.map(|output| {
                if accepted(&self.host, SCP_DISABLE, &output) {
                    tracing::info!("{}: SCP has been disabled", self.host);
                }
            })
        } else {
            Ok(())
        };
        self.scp_enabled = false;
        if let Some(session) = self.session.take() {
            let _ = tokio::task::spawn_blocking(move || session.disconnect(None, "provisioning complete", None)).await;
        }
        scp_result
    }
}

/// Whether the device took `command`; a refusal is logged
fn accepted(host: &str, command: &str, output: &str) -> bool {
    match find_rejection(output) {
        Some(line) => {
            tracing::warn!("{}: device refused '{}': {}", host, command, line);
            false
        }
        None => true,
    }
}

/// libssh2 takes its timeout in milliseconds as a u32
fn timeout_millis(timeout_secs: u64) -> u32 {
    u32::try_from(timeout_secs.saturating_mul(1000)).unwrap_or(u32::MAX)
}

/// Create an SSH session and authenticate with password + keyboard-interactive.
/// This is blocking, so call from a spawn_blocking context.
fn ssh_connect(host: &str, port: u16, creds: &Credentials, timeout_secs: u64) -> Result<ssh2::Session, SessionError> {
    let connect_err = |reason: String| SessionError::Connect { host: host.to_string(), reason };

    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| connect_err(format!("invalid address: {}", e)))?
        .next()
        .ok_or_else(|| connect_err("address did not resolve".to_string()))?;
    let tcp = TcpStream::connect_timeout(&addr, Duration::from_secs(timeout_secs))
        .map_err(|e| connect_err(format!("TCP connection failed: {}", e)))?;

    tcp.set_read_timeout(Some(Duration::from_secs(timeout_secs))).ok();
    tcp.set_write_timeout(Some(Duration::from_secs(timeout_secs))).ok();

    let mut session = ssh2::Session::new()
        .map_err(|e| connect_err(format!("failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout_millis(timeout_secs));
    session
        .handshake()
        .map_err(|e| connect_err(format!("SSH handshake failed: {}", e)))?;

    // Try password auth first
    match session.userauth_password(&creds.username, &creds.password) {
        Ok(_) if session.authenticated() => return Ok(session),
        _ => {}
    }

    let mut prompter = PasswordPrompt { password: creds.password.clone() };
    let _ = session.userauth_keyboard_interactive(&creds.username, &mut prompter);

    if session.authenticated() {
        Ok(session)
    } else {
        Err(SessionError::Auth { host: host.to_string() })
    }
}

/// Run one exec-mode command on an existing session
fn ssh_exec(session: &ssh2::Session, command: &str, timeout_secs: u64) -> Result<String, SessionError> {
    let mut channel = session
        .channel_session()
        .map_err(|e| SessionError::Channel(format!("failed to open channel: {}", e)))?;
    channel
        .exec(command)
        .map_err(|e| SessionError::Channel(format!("failed to execute command: {}", e)))?;

    let mut output = String::new();
    channel
        .read_to_string(&mut output)
        .map_err(|e| io_error(e, timeout_secs))?;
    let _ = channel.wait_close();
    Ok(output)
}

/// Push configuration through an interactive shell: IOS only accepts
/// multi-line config in config mode on a PTY.
fn ssh_apply_config(session: &ssh2::Session, config: &str, timeout_secs: u64) -> Result<String, SessionError> {
    let mut channel = session
        .channel_session()
        .map_err(|e| SessionError::Channel(format!("failed to open channel: {}", e)))?;
    channel
        .request_pty("vt100", None, None)
        .map_err(|e| SessionError::Channel(format!("failed to request PTY: {}", e)))?;
    channel
        .shell()
        .map_err(|e| SessionError::Channel(format!("failed to start shell: {}", e)))?;

    let mut script = String::from("terminal length 0\nconfigure terminal\n");
    for line in config.lines().filter(|l| !l.trim().is_empty()) {
        script.push_str(line);
        script.push('\n');
    }
    script.push_str("end\nexit\n");

    channel
        .write_all(script.as_bytes())
        .map_err(|e| io_error(e, timeout_secs))?;
    let _ = channel.send_eof();

    let mut output = String::new();
    channel
        .read_to_string(&mut output)
        .map_err(|e| io_error(e, timeout_secs))?;
    let _ = channel.wait_close();
    Ok(output)
}

fn io_error(err: std::io::Error, timeout_secs: u64) -> SessionError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => SessionError::Timeout(timeout_secs),
        _ => SessionError::Channel(err.to_string()),
    }
}
