//! Error taxonomy for the provisioning pipeline.
//!
//! Every variant here is per-device: the orchestrator converts them into a
//! terminal `Failed` state instead of letting them escape the device worker.

/// Errors raised while reading or writing the source-of-truth.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),

    #[error("store returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("store response could not be decoded: {0}")]
    Decode(String),
}

impl From<anyhow::Error> for StoreError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<StoreError>() {
            Ok(store_err) => store_err,
            Err(err) => StoreError::Request(format!("{:#}", err)),
        }
    }
}

/// Errors raised while fetching a device's intent document.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IntentError {
    #[error("no intent found for {0}")]
    NotFound(String),

    #[error("malformed intent for {device}: {reason}")]
    Malformed { device: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised by the config renderer. Always raised before device contact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    #[error("interface {interface}: address {value:?} is not \"<addr> <mask>\"")]
    MissingMask { interface: String, value: String },

    #[error("{field}: {value:?} is not a valid IPv4 address")]
    InvalidAddress { field: String, value: String },

    #[error("{field}: {value:?} is not a contiguous netmask")]
    InvalidMask { field: String, value: String },

    #[error("{field}: ASN must be non-zero")]
    InvalidAsn { field: String },

    #[error("{field}: text contains a line break")]
    UnsafeText { field: String },

    #[error("template error: {0}")]
    Template(String),
}

/// Errors raised by a device session.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("authentication to {host} failed")]
    Auth { host: String },

    #[error("channel error: {0}")]
    Channel(String),

    #[error("command timed out after {0}s")]
    Timeout(u64),

    #[error("session is not connected")]
    NotConnected,
}

/// Errors raised while pushing a configuration stage.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApplyError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("device rejected configuration: {line}")]
    Rejected { line: String, output: String },

    #[error("no configuration rendered for stage {0}")]
    EmptyConfig(String),
}
