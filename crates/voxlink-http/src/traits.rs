use crate::error::Result;
use crate::types::{AudioUpload, HttpResponse};
use async_trait::async_trait;
use std::time::Duration;

/// Abstraction for the HTTP calls the transport makes.
///
/// Implementations return any well-formed response, including non-2xx
/// ones; only failures to obtain a response at all are errors.
#[async_trait]
pub trait HttpNetwork: Send + Sync + 'static {
    async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<HttpResponse>;

    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<HttpResponse>;

    /// Multipart upload with an `audio` file part and a `session_id` field.
    async fn post_audio(
        &self,
        url: &str,
        audio: AudioUpload,
        session_id: &str,
    ) -> Result<HttpResponse>;
}
