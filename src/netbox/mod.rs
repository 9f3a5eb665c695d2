pub mod client;
pub mod store;
pub mod sync;
pub mod types;

pub use client::NetBoxClient;
pub use store::NetBoxStore;
