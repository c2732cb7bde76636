//! Scripted in-process network used by unit tests.

use crate::error::{Result, TransportError};
use crate::traits::HttpNetwork;
use crate::types::{AudioUpload, HttpResponse};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Call {
    pub method: &'static str,
    pub url: String,
    pub body: Option<serde_json::Value>,
    pub session_id: Option<String>,
    pub audio_len: Option<usize>,
}

type Handler = Arc<dyn Fn(&Call) -> Result<HttpResponse> + Send + Sync>;

struct Route {
    method: &'static str,
    path: String,
    latency: Duration,
    handler: Handler,
}

/// Answers requests from registered routes and records every call.
///
/// A route matches when the method is equal and the URL contains its path.
/// Later registrations win over earlier ones.
#[derive(Default)]
pub struct FakeNetwork {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<Call>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route<F>(&self, method: &'static str, path: &str, handler: F)
    where
        F: Fn(&Call) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        self.route_with_latency(method, path, Duration::ZERO, handler);
    }

    pub fn route_with_latency<F>(
        &self,
        method: &'static str,
        path: &str,
        latency: Duration,
        handler: F,
    ) where
        F: Fn(&Call) -> Result<HttpResponse> + Send + Sync + 'static,
    {
        self.routes.lock().push(Route {
            method,
            path: path.to_string(),
            latency,
            handler: Arc::new(handler),
        });
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.url.contains(path))
            .count()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    async fn dispatch(&self, call: Call) -> Result<HttpResponse> {
        self.calls.lock().push(call.clone());
        let matched = self
            .routes
            .lock()
            .iter()
            .rev()
            .find(|r| r.method == call.method && call.url.contains(&r.path))
            .map(|r| (r.latency, Arc::clone(&r.handler)));

        match matched {
            Some((latency, handler)) => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                handler(&call)
            }
            None => Err(TransportError::Connectivity(format!(
                "no route for {} {}",
                call.method, call.url
            ))),
        }
    }
}

#[async_trait]
impl HttpNetwork for FakeNetwork {
    async fn get(&self, url: &str, _timeout: Option<Duration>) -> Result<HttpResponse> {
        self.dispatch(Call {
            method: "GET",
            url: url.to_string(),
            body: None,
            session_id: None,
            audio_len: None,
        })
        .await
    }

    async fn post_json(&self, url: &str, body: serde_json::Value) -> Result<HttpResponse> {
        let session_id = body
            .get("session_id")
            .and_then(|s| s.as_str())
            .map(str::to_string);
        self.dispatch(Call {
            method: "POST",
            url: url.to_string(),
            body: Some(body),
            session_id,
            audio_len: None,
        })
        .await
    }

    async fn post_audio(
        &self,
        url: &str,
        audio: AudioUpload,
        session_id: &str,
    ) -> Result<HttpResponse> {
        self.dispatch(Call {
            method: "POST",
            url: url.to_string(),
            body: None,
            session_id: Some(session_id.to_string()),
            audio_len: Some(audio.len()),
        })
        .await
    }
}
