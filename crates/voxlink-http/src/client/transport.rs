//! Transport façade used by the UI layer.

use crate::client::config::ClientConfig;
use crate::client::native_network::NativeNetwork;
use crate::client::utils::preview;
use crate::connectivity::{ConnectivityTracker, NetworkStatus, StatusSubscription};
use crate::dedup::DedupCache;
use crate::error::{Result, TransportError};
use crate::queue::{AttemptContext, PendingSnapshot, RequestKind, RequestQueue, SubmitOptions};
use crate::recovery::{compute_message_hash, PendingResponseRecovery};
use crate::session::SessionId;
use crate::traits::HttpNetwork;
use crate::types::{AudioUpload, ChatReply, ChatRequestBody, TranscriptionResponse};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Client for the assistant backend.
///
/// Chat messages and transcriptions go through the de-duplication caches,
/// then the retry queue. Cloning is cheap and every clone shares the same
/// session, tracker and queue.
#[derive(Clone)]
pub struct ChatTransportClient {
    config: Arc<ClientConfig>,
    network: Arc<dyn HttpNetwork>,
    tracker: Arc<ConnectivityTracker>,
    queue: RequestQueue,
    recovery: Arc<PendingResponseRecovery>,
    chat_cache: Arc<DedupCache<ChatReply>>,
    audio_cache: Arc<DedupCache<String>>,
    session: Arc<Mutex<SessionId>>,
}

impl ChatTransportClient {
    pub fn new() -> Result<Self> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("voxlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Config(e.to_string()))?;
        Ok(Self::with_network(Arc::new(NativeNetwork::new(client)), config))
    }

    /// Build on any [`HttpNetwork`]. The host is assumed online until it
    /// reports otherwise.
    pub fn with_network(network: Arc<dyn HttpNetwork>, config: ClientConfig) -> Self {
        let tracker = Arc::new(ConnectivityTracker::new(Arc::clone(&network), &config, true));
        let queue = RequestQueue::new(Arc::clone(&tracker), &config);
        let recovery = Arc::new(PendingResponseRecovery::new(Arc::clone(&network), &config));
        ChatTransportClient {
            chat_cache: Arc::new(DedupCache::new("chat", config.dedup_grace)),
            audio_cache: Arc::new(DedupCache::new("audio", config.dedup_grace)),
            config: Arc::new(config),
            network,
            tracker,
            queue,
            recovery,
            session: Arc::new(Mutex::new(SessionId::new())),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<ConnectivityTracker> {
        &self.tracker
    }

    /// Start the health poll and the retry sweep.
    pub fn start(&self) {
        self.tracker.start();
        self.queue.start();
    }

    /// Reject everything outstanding and stop background work.
    pub fn shutdown(&self) {
        self.queue.destroy();
        self.tracker.destroy();
        info!("[Transport] Shut down");
    }

    pub fn session_id(&self) -> SessionId {
        self.session.lock().clone()
    }

    /// Start a new conversation. Requests already in flight keep the
    /// session they were sent with.
    pub fn reset_session(&self) -> SessionId {
        let fresh = SessionId::new();
        *self.session.lock() = fresh.clone();
        info!("[Transport] New session {}", fresh);
        fresh
    }

    pub fn status(&self) -> NetworkStatus {
        self.tracker.status()
    }

    #[must_use = "keep the subscription to be able to unsubscribe"]
    pub fn subscribe_status<F>(&self, listener: F) -> StatusSubscription
    where
        F: Fn(&NetworkStatus) + Send + Sync + 'static,
    {
        self.tracker.subscribe(listener)
    }

    pub async fn force_check(&self) -> NetworkStatus {
        self.tracker.force_check().await
    }

    pub async fn report_online(&self) -> NetworkStatus {
        self.tracker.report_online().await
    }

    pub fn report_offline(&self) -> NetworkStatus {
        self.tracker.report_offline()
    }

    pub fn active_requests(&self) -> usize {
        self.tracker.active_requests()
    }

    pub fn pending_requests(&self) -> Vec<PendingSnapshot> {
        self.queue.entries()
    }

    /// Send a chat message and wait for the assistant's reply.
    pub async fn send_chat_message(&self, message: &str, use_tts: bool) -> Result<ChatReply> {
        if message.trim().is_empty() {
            return Err(TransportError::InvalidInput("chat message is empty".into()));
        }

        let session = self.session_id();
        let key = format!("chat_{}_{}_{}", message, session, use_tts);
        let this = self.clone();
        let message = message.to_string();
        self.chat_cache
            .run_deduplicated(key, move || async move {
                this.chat_uncached(message, use_tts, session).await
            })
            .await
    }

    async fn chat_uncached(
        &self,
        message: String,
        use_tts: bool,
        session: SessionId,
    ) -> Result<ChatReply> {
        if self.tracker.status().is_online {
            if let Some(reply) = self.recovery.recover(&message, use_tts, &session).await {
                return Ok(reply);
            }
        }

        let url = if use_tts {
            self.config.chat_with_tts_url()
        } else {
            self.config.chat_url()
        };
        let body = serde_json::to_value(ChatRequestBody {
            message: message.clone(),
            session_id: session.to_string(),
        })?;
        let options = SubmitOptions::new(RequestKind::Chat)
            .with_max_retries(self.config.chat_max_retries)
            .with_content_hash(format!(
                "{}:{}",
                session,
                compute_message_hash(&message, use_tts)
            ));

        info!("[Transport] Sending chat message: {:?}", preview(&message, 50));
        let network = Arc::clone(&self.network);
        let recovery = Arc::clone(&self.recovery);
        self.queue
            .submit(
                move |ctx: AttemptContext| {
                    let network = Arc::clone(&network);
                    let recovery = Arc::clone(&recovery);
                    let url = url.clone();
                    let body = body.clone();
                    let message = message.clone();
                    let session = session.clone();
                    async move {
                        if ctx.is_retry() {
                            if let Some(reply) = recovery.recover(&message, use_tts, &session).await
                            {
                                return Ok(reply);
                            }
                        }
                        debug!("[Transport] POST {} (attempt {})", url, ctx.attempt + 1);
                        let response = network.post_json(&url, body).await?.error_for_status()?;
                        let payload: serde_json::Value = response.decode()?;
                        ChatReply::from_payload(&payload, use_tts, session)
                    }
                },
                options,
            )
            .await
    }

    /// Upload a recording and return its transcript.
    pub async fn speech_to_text(&self, audio: AudioUpload) -> Result<String> {
        if audio.is_empty() {
            return Err(TransportError::InvalidInput("audio recording is empty".into()));
        }

        let session = self.session_id();
        let key = format!("audio_{}_{}_{}", audio.len(), audio.mime_type, session);
        let queue = self.queue.clone();
        let network = Arc::clone(&self.network);
        let url = self.config.transcribe_url();
        let options = SubmitOptions::new(RequestKind::Transcription)
            .with_max_retries(self.config.transcription_max_retries);

        self.audio_cache
            .run_deduplicated(key, move || async move {
                info!(
                    "[Transport] Transcribing {} bytes of {}",
                    audio.len(),
                    audio.mime_type
                );
                queue
                    .submit(
                        move |_| {
                            let network = Arc::clone(&network);
                            let url = url.clone();
                            let audio = audio.clone();
                            let session = session.clone();
                            async move {
                                network
                                    .post_audio(&url, audio, session.as_str())
                                    .await?
                                    .error_for_status()?
                                    .decode::<TranscriptionResponse>()?
                                    .into_text()
                            }
                        },
                        options,
                    )
                    .await
            })
            .await
    }
}
