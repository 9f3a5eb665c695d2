//! Device sessions and the bounded session pool.

pub mod ssh;

#[cfg(test)]
pub mod mock;

use async_trait::async_trait;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::SessionError;
use crate::models::Device;

/// Raw text returned by a device
pub type RawOutput = String;

/// A command channel to one device. Implementations are used by exactly one
/// device worker at a time.
#[async_trait]
pub trait DeviceSession: Send {
    /// Open the channel and run any preparation the transport needs
    async fn connect(&mut self) -> Result<(), SessionError>;

    /// Push configuration lines in config mode
    async fn apply_config(&mut self, config: &str) -> Result<RawOutput, SessionError>;

    /// Run a single exec-mode command
    async fn run_command(&mut self, command: &str) -> Result<RawOutput, SessionError>;

    /// Undo preparation and close the channel
    async fn close(&mut self) -> Result<(), SessionError>;
}

/// Builds an unconnected session for a device
pub trait SessionFactory: Send + Sync {
    fn session_for(&self, device: &Device) -> Box<dyn DeviceSession>;
}

/// SessionPool bounds the number of simultaneously open device sessions
#[derive(Clone)]
pub struct SessionPool {
    factory: Arc<dyn SessionFactory>,
    permits: Arc<Semaphore>,
}

impl SessionPool {
    pub fn new(factory: Arc<dyn SessionFactory>, max_sessions: usize) -> Self {
        Self {
            factory,
            permits: Arc::new(Semaphore::new(max_sessions.max(1))),
        }
    }

    /// Wait for a free slot and hand out a session for `device`.
    /// The slot is released when the returned session is dropped.
    pub async fn checkout(&self, device: &Device) -> Result<PooledSession, SessionError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SessionError::Channel("session pool closed".to_string()))?;
        tracing::debug!("Session slot acquired for {} ({} free)", device.name, self.available());
        Ok(PooledSession {
            session: self.factory.session_for(device),
            _permit: permit,
        })
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// A session holding one pool slot
pub struct PooledSession {
    session: Box<dyn DeviceSession>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledSession {
    type Target = dyn DeviceSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for PooledSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}
