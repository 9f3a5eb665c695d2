pub mod devices;
pub mod intent;
pub mod results;

pub use devices::{Device, DeviceStatus, ObservedInterface};
pub use intent::{Intent, InterfaceIntent};
pub use results::{FailureReason, StageKind, StageOutcome, StageResult, StageResultRecord};
