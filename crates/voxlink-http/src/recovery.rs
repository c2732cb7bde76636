//! Pending-response recovery.
//!
//! The backend keeps answers it computed for requests whose caller went away
//! (dropped connection, client-side timeout). Before a chat message is sent,
//! the client hashes it and asks the server whether an answer for that hash
//! is already waiting in the session.

use crate::client::config::ClientConfig;
use crate::client::utils::preview;
use crate::session::SessionId;
use crate::traits::HttpNetwork;
use crate::types::ChatReply;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Hex SHA-256 of `"{message}_{use_tts}"`, matching the server's key.
pub fn compute_message_hash(message: &str, use_tts: bool) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}_{}", message, use_tts).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// An answer the server finished but could not deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingServerResponse {
    pub message_hash: String,
    pub response: serde_json::Value,
    /// Whatever the server stamped the entry with; never interpreted.
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PendingResponsesEnvelope {
    #[serde(default)]
    pending_responses: Vec<PendingServerResponse>,
}

pub struct PendingResponseRecovery {
    network: Arc<dyn HttpNetwork>,
    config: ClientConfig,
    lookup_timeout: Duration,
}

impl PendingResponseRecovery {
    pub fn new(network: Arc<dyn HttpNetwork>, config: &ClientConfig) -> Self {
        PendingResponseRecovery {
            network,
            config: config.clone(),
            lookup_timeout: config.health_check_timeout,
        }
    }

    /// Everything the server holds for `session_id`. Failures of any kind
    /// yield an empty list.
    pub async fn fetch_pending_responses(
        &self,
        session_id: &SessionId,
    ) -> Vec<PendingServerResponse> {
        let url = self.config.pending_responses_url(session_id.as_str());
        let lookup = self.network.get(&url, Some(self.lookup_timeout));
        let response = match tokio::time::timeout(self.lookup_timeout, lookup).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                warn!("[Pending] Could not check pending responses: {}", e);
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    "[Pending] Pending response lookup timed out after {:?}",
                    self.lookup_timeout
                );
                return Vec::new();
            }
        };

        if !response.is_success() {
            warn!(
                "[Pending] Pending response lookup returned HTTP {}",
                response.status
            );
            return Vec::new();
        }

        match response.decode::<PendingResponsesEnvelope>() {
            Ok(envelope) => {
                debug!(
                    "[Pending] Found {} pending responses",
                    envelope.pending_responses.len()
                );
                envelope.pending_responses
            }
            Err(e) => {
                warn!("[Pending] Malformed pending response list: {}", e);
                Vec::new()
            }
        }
    }

    /// A reply the server already computed for this exact message, if any.
    pub async fn recover(
        &self,
        message: &str,
        use_tts: bool,
        session_id: &SessionId,
    ) -> Option<ChatReply> {
        let hash = compute_message_hash(message, use_tts);
        let pending = self.fetch_pending_responses(session_id).await;
        let matched = pending.into_iter().find(|p| p.message_hash == hash)?;

        match ChatReply::from_payload(&matched.response, use_tts, session_id.clone()) {
            Ok(reply) => {
                info!(
                    "[Pending] Recovered server response for: {:?}",
                    preview(message, 50)
                );
                Some(reply)
            }
            Err(e) => {
                warn!("[Pending] Unusable pending response for {}: {}", hash, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::testing::FakeNetwork;
    use crate::types::HttpResponse;
    use serde_json::json;

    fn recovery(network: Arc<FakeNetwork>) -> PendingResponseRecovery {
        PendingResponseRecovery::new(network, &ClientConfig::new("http://backend.test"))
    }

    #[test]
    fn test_hash_is_pure_and_flag_sensitive() {
        let a = compute_message_hash("Hello", false);
        assert_eq!(a, compute_message_hash("Hello", false));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(a, compute_message_hash("Hello", true));
        assert_ne!(a, compute_message_hash("Hello ", false));
    }

    #[test]
    fn test_hash_known_vector() {
        assert_eq!(
            compute_message_hash("abc", false),
            "196a81bea56345245bbbdbfb14258a1a49a8553f83bdd492894e68fc7555bdc6"
        );
        assert_eq!(
            compute_message_hash("Hello", false),
            "fc15783026ff2b0d8dd647e03faad06fc3725e454e616732b536ef79a49fb909"
        );
    }

    #[tokio::test]
    async fn test_recover_plain_reply() {
        let network = FakeNetwork::new();
        let hash = compute_message_hash("Hello", false);
        network.route("GET", "/pending_responses/", move |_| {
            Ok(HttpResponse::json(
                200,
                &json!({ "pending_responses": [
                    { "message_hash": "unrelated", "response": { "response": "nope" }, "timestamp": 1.0 },
                    { "message_hash": hash, "response": { "response": "Hi there" }, "timestamp": 1717171717.5 }
                ]}),
            ))
        });
        let session = SessionId::from("s-1");
        let reply = recovery(network.clone())
            .recover("Hello", false, &session)
            .await
            .unwrap();
        assert_eq!(reply.text, "Hi there");
        assert_eq!(reply.session_id, session);
        assert_eq!(network.calls()[0].url, "http://backend.test/pending_responses/s-1");
    }

    #[tokio::test]
    async fn test_recover_ignores_timestamp_shape() {
        let network = FakeNetwork::new();
        let hash = compute_message_hash("Hello", false);
        network.route("GET", "/pending_responses/", move |_| {
            Ok(HttpResponse::json(
                200,
                &json!({ "pending_responses": [
                    { "message_hash": "other", "response": { "response": "nope" }, "timestamp": null },
                    { "message_hash": hash, "response": { "response": "Kept" }, "timestamp": "2024-06-01T00:00:00Z" }
                ]}),
            ))
        });
        let r = recovery(network);
        let session = SessionId::new();

        let pending = r.fetch_pending_responses(&session).await;
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[1].timestamp, Some(json!("2024-06-01T00:00:00Z")));

        let reply = r.recover("Hello", false, &session).await.unwrap();
        assert_eq!(reply.text, "Kept");
    }

    #[tokio::test]
    async fn test_recover_tts_reply() {
        let network = FakeNetwork::new();
        let hash = compute_message_hash("Hello", true);
        network.route("GET", "/pending_responses/", move |_| {
            Ok(HttpResponse::json(
                200,
                &json!({ "pending_responses": [
                    { "message_hash": hash, "response": { "text": "Oi", "audio": "SUQz" } }
                ]}),
            ))
        });
        let reply = recovery(network)
            .recover("Hello", true, &SessionId::new())
            .await
            .unwrap();
        assert_eq!(reply.text, "Oi");
        assert_eq!(reply.audio.as_deref(), Some("SUQz"));
    }

    #[tokio::test]
    async fn test_failures_yield_nothing() {
        let network = FakeNetwork::new();
        let r = recovery(network.clone());
        let session = SessionId::new();

        // No route: connectivity error.
        assert!(r.fetch_pending_responses(&session).await.is_empty());

        network.route("GET", "/pending_responses/", |_| Ok(HttpResponse::new(500, "down")));
        assert!(r.fetch_pending_responses(&session).await.is_empty());

        network.route("GET", "/pending_responses/", |_| Ok(HttpResponse::new(200, "not json")));
        assert!(r.fetch_pending_responses(&session).await.is_empty());

        network.route("GET", "/pending_responses/", |_| {
            Err(TransportError::Timeout(Duration::from_secs(1)))
        });
        assert!(r.recover("Hello", false, &session).await.is_none());
    }

    #[tokio::test]
    async fn test_missing_list_and_unusable_entry() {
        let network = FakeNetwork::new();
        network.route("GET", "/pending_responses/", |_| Ok(HttpResponse::json(200, &json!({}))));
        let r = recovery(network.clone());
        assert!(r.fetch_pending_responses(&SessionId::new()).await.is_empty());

        let hash = compute_message_hash("Hello", false);
        network.route("GET", "/pending_responses/", move |_| {
            Ok(HttpResponse::json(
                200,
                &json!({ "pending_responses": [
                    { "message_hash": hash, "response": { "error": "model crashed" } }
                ]}),
            ))
        });
        assert!(r.recover("Hello", false, &SessionId::new()).await.is_none());
    }
}
