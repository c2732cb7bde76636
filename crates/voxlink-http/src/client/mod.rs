//! Transport client, its configuration and the reqwest network.

pub mod config;
pub mod native_network;
pub mod retry;
mod transport;
pub mod utils;

pub use config::ClientConfig;
pub use native_network::NativeNetwork;
pub use retry::{RetryConfig, RetryDecision, RetryState};
pub use transport::ChatTransportClient;
