//! Client-side network resilience for the voxlink voice and text assistant.
//!
//! [`ChatTransportClient`] is the entry point. It layers a request
//! de-duplication cache, pending-response recovery and a retrying request
//! queue over an [`HttpNetwork`], and keeps a [`ConnectivityTracker`] up to
//! date with what it learns.

pub mod client;
pub mod connectivity;
pub mod dedup;
pub mod error;
pub mod queue;
pub mod recovery;
pub mod session;
pub mod traits;
pub mod types;

#[cfg(test)]
mod testing;

pub use client::{ChatTransportClient, ClientConfig, NativeNetwork, RetryConfig};
pub use connectivity::{ConnectivityTracker, NetworkStatus, StatusSubscription};
pub use error::{Result, TransportError};
pub use queue::{PendingSnapshot, RequestKind};
pub use recovery::compute_message_hash;
pub use session::SessionId;
pub use traits::HttpNetwork;
pub use types::{AudioFormat, AudioUpload, ChatReply, HttpResponse};
