//! Scripted in-memory device sessions for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{DeviceSession, RawOutput, SessionFactory};
use crate::error::SessionError;
use crate::models::Device;

pub const REJECTED: &str = "% Invalid input detected at '^' marker.";

/// What a scripted device answers
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    pub connect_error: Option<SessionError>,
    /// One entry per `apply_config` call; the last entry repeats
    pub apply_results: Vec<Result<String, SessionError>>,
    pub apply_delay: Option<Duration>,
    /// Responses per exec command; the last entry repeats
    pub responses: HashMap<String, Vec<String>>,
    /// Exec command that makes the session panic
    pub panic_on: Option<String>,
}

impl MockScript {
    pub fn respond(mut self, command: &str, outputs: &[&str]) -> Self {
        self.responses
            .insert(command.to_string(), outputs.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn apply_results(mut self, results: Vec<Result<String, SessionError>>) -> Self {
        self.apply_results = results;
        self
    }
}

/// MockSession replays a MockScript and records every call
pub struct MockSession {
    script: MockScript,
    log: Arc<Mutex<Vec<String>>>,
    applies: usize,
    calls: HashMap<String, usize>,
}

impl MockSession {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

#[async_trait]
impl DeviceSession for MockSession {
    async fn connect(&mut self) -> Result<(), SessionError> {
        self.record("connect".to_string());
        match &self.script.connect_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn apply_config(&mut self, config: &str) -> Result<RawOutput, SessionError> {
        let first = config.lines().next().unwrap_or_default().to_string();
        self.record(format!("apply:{}", first));
        if let Some(delay) = self.script.apply_delay {
            tokio::time::sleep(delay).await;
        }
        let idx = self.applies.min(self.script.apply_results.len().saturating_sub(1));
        self.applies += 1;
        match self.script.apply_results.get(idx) {
            Some(result) => result.clone(),
            None => Ok(format!("configure terminal\n{}\nend\n", config)),
        }
    }

    async fn run_command(&mut self, command: &str) -> Result<RawOutput, SessionError> {
        self.record(format!("run:{}", command));
        if self.script.panic_on.as_deref() == Some(command) {
            panic!("scripted panic on {}", command);
        }
        let count = self.calls.entry(command.to_string()).or_insert(0);
        let idx = *count;
        *count += 1;
        match self.script.responses.get(command) {
            Some(outputs) if !outputs.is_empty() => Ok(outputs[idx.min(outputs.len() - 1)].clone()),
            _ => Ok(REJECTED.to_string()),
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.record("close".to_string());
        Ok(())
    }
}

/// MockSessionFactory hands out scripted sessions by device name
#[derive(Default)]
pub struct MockSessionFactory {
    scripts: HashMap<String, MockScript>,
    logs: Mutex<HashMap<String, Arc<Mutex<Vec<String>>>>>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, name: &str, script: MockScript) -> Self {
        self.scripts.insert(name.to_string(), script);
        self
    }

    /// Calls made against `name`, in order
    pub fn log(&self, name: &str) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .get(name)
            .map(|log| log.lock().unwrap().clone())
            .unwrap_or_default()
    }
}

impl SessionFactory for MockSessionFactory {
    fn session_for(&self, device: &Device) -> Box<dyn DeviceSession> {
        let log = self
            .logs
            .lock()
            .unwrap()
            .entry(device.name.clone())
            .or_default()
            .clone();
        Box::new(MockSession {
            script: self.scripts.get(&device.name).cloned().unwrap_or_default(),
            log,
            applies: 0,
            calls: HashMap::new(),
        })
    }
}
