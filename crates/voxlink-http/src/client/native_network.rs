use crate::error::{Result, TransportError};
use crate::traits::HttpNetwork;
use crate::types::{AudioUpload, HttpResponse};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;

pub struct NativeNetwork {
    client: Client,
}

impl NativeNetwork {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    async fn send(
        &self,
        req_builder: reqwest::RequestBuilder,
        timeout: Option<Duration>,
    ) -> Result<HttpResponse> {
        let req_builder = match timeout {
            Some(t) => req_builder.timeout(t),
            None => req_builder,
        };

        let response = req_builder
            .send()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        let status = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (k, v) in response.headers() {
            if let Ok(val) = v.to_str() {
                headers.insert(k.as_str().to_lowercase(), val.to_string());
            }
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| map_send_error(e, timeout))?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_send_error(err: reqwest::Error, timeout: Option<Duration>) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout.unwrap_or_default())
    } else {
        TransportError::Connectivity(err.to_string())
    }
}

#[async_trait]
impl HttpNetwork for NativeNetwork {
    async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<HttpResponse> {
        tracing::trace!("[voxlink-out] GET {}", url);
        let req_builder = self
            .client
            .get(url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache");
        self.send(req_builder, timeout).await
    }

    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<HttpResponse> {
        tracing::trace!("[voxlink-out] POST {}", url);
        let req_builder = self.client.post(url).json(&body);
        self.send(req_builder, None).await
    }

    async fn post_audio(
        &self,
        url: &str,
        audio: AudioUpload,
        session_id: &str,
    ) -> Result<HttpResponse> {
        tracing::trace!(
            "[voxlink-out] POST {} ({} bytes of {})",
            url,
            audio.len(),
            audio.mime_type
        );
        let part = reqwest::multipart::Part::bytes(audio.bytes.to_vec())
            .file_name(audio.file_name)
            .mime_str(&audio.mime_type)
            .map_err(|e| TransportError::InvalidInput(format!("bad audio MIME type: {}", e)))?;
        let form = reqwest::multipart::Form::new()
            .part("audio", part)
            .text("session_id", session_id.to_string());

        let req_builder = self.client.post(url).multipart(form);
        self.send(req_builder, None).await
    }
}
