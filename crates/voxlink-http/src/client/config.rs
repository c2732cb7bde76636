//! Configuration for the voxlink transport client.

use crate::client::retry::RetryConfig;
use crate::error::{Result, TransportError};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Configuration for the voxlink transport client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Backend base URL, e.g. `http://192.168.0.10:8000`.
    pub base_url: String,
    /// Timeout for a single `/health` probe.
    pub health_check_timeout: Duration,
    /// Timeout for one chat completion attempt.
    pub chat_request_timeout: Duration,
    /// Timeout for one transcription attempt.
    pub transcription_request_timeout: Duration,
    /// How often the tracker probes `/health`.
    pub server_check_interval: Duration,
    /// How often the queue looks for entries ready to retry.
    pub queue_sweep_interval: Duration,
    /// Pause between dispatches within one sweep.
    pub sweep_throttle: Duration,
    /// How long a settled de-duplicated call stays shareable.
    pub dedup_grace: Duration,
    /// Backoff policy and default attempt budget.
    pub retry: RetryConfig,
    /// Attempt budget for chat messages.
    pub chat_max_retries: u32,
    /// Attempt budget for transcriptions.
    pub transcription_max_retries: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: DEFAULT_BASE_URL.to_string(),
            health_check_timeout: Duration::from_secs(5),
            chat_request_timeout: Duration::from_secs(120),
            transcription_request_timeout: Duration::from_secs(60),
            server_check_interval: Duration::from_secs(10),
            queue_sweep_interval: Duration::from_secs(2),
            sweep_throttle: Duration::from_millis(100),
            dedup_grace: Duration::from_secs(2),
            retry: RetryConfig::default(),
            chat_max_retries: 5,
            transcription_max_retries: 3,
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::default().with_base_url(base_url)
    }

    /// Defaults overridden by `VOXLINK_*` environment variables.
    ///
    /// Durations ending in `_SECS` are whole seconds, `_MS` milliseconds.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ClientConfig::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("VOXLINK_API_URL") {
            let url = url.trim();
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(TransportError::Config(format!(
                    "VOXLINK_API_URL must be an http(s) URL, got {:?}",
                    url
                )));
            }
            config.base_url = url.to_string();
        }

        let secs = |key: &str, slot: &mut Duration| -> Result<()> {
            if let Some(raw) = lookup(key) {
                *slot = Duration::from_secs(parse_number(key, &raw)?);
            }
            Ok(())
        };
        secs("VOXLINK_HEALTH_TIMEOUT_SECS", &mut config.health_check_timeout)?;
        secs("VOXLINK_CHAT_TIMEOUT_SECS", &mut config.chat_request_timeout)?;
        secs(
            "VOXLINK_TRANSCRIPTION_TIMEOUT_SECS",
            &mut config.transcription_request_timeout,
        )?;
        secs("VOXLINK_SERVER_CHECK_SECS", &mut config.server_check_interval)?;
        secs("VOXLINK_RETRY_MAX_DELAY_SECS", &mut config.retry.max_backoff)?;

        if let Some(raw) = lookup("VOXLINK_RETRY_INITIAL_DELAY_MS") {
            config.retry.initial_backoff =
                Duration::from_millis(parse_number("VOXLINK_RETRY_INITIAL_DELAY_MS", &raw)?);
        }
        // The general budget applies to every kind; per-kind variables win.
        if let Some(raw) = lookup("VOXLINK_MAX_RETRIES") {
            let max = parse_count("VOXLINK_MAX_RETRIES", &raw)?;
            config.retry.max_retries = max;
            config.chat_max_retries = max;
            config.transcription_max_retries = max;
        }
        if let Some(raw) = lookup("VOXLINK_CHAT_MAX_RETRIES") {
            config.chat_max_retries = parse_count("VOXLINK_CHAT_MAX_RETRIES", &raw)?;
        }
        if let Some(raw) = lookup("VOXLINK_TRANSCRIPTION_MAX_RETRIES") {
            config.transcription_max_retries =
                parse_count("VOXLINK_TRANSCRIPTION_MAX_RETRIES", &raw)?;
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_request_timeouts(mut self, chat: Duration, transcription: Duration) -> Self {
        self.chat_request_timeout = chat;
        self.transcription_request_timeout = transcription;
        self
    }

    #[must_use]
    pub fn with_intervals(mut self, server_check: Duration, queue_sweep: Duration) -> Self {
        self.server_check_interval = server_check;
        self.queue_sweep_interval = queue_sweep;
        self
    }

    #[must_use]
    pub fn with_dedup_grace(mut self, grace: Duration) -> Self {
        self.dedup_grace = grace;
        self
    }

    /// `{base}/{path}` without doubled slashes.
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn health_url(&self) -> String {
        self.endpoint("health")
    }

    pub fn transcribe_url(&self) -> String {
        self.endpoint("transcribe/")
    }

    pub fn chat_url(&self) -> String {
        self.endpoint("chat/")
    }

    pub fn chat_with_tts_url(&self) -> String {
        self.endpoint("chat_with_tts/")
    }

    pub fn pending_responses_url(&self, session_id: &str) -> String {
        self.endpoint(&format!("pending_responses/{}", session_id))
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| TransportError::Config(format!("{} must be a whole number, got {:?}", key, raw)))
}

/// Attempt budgets: at least one attempt, fits in `u32`.
fn parse_count(key: &str, raw: &str) -> Result<u32> {
    let count = parse_number(key, raw)?;
    match u32::try_from(count) {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(TransportError::Config(format!(
            "{} must be between 1 and {}, got {}",
            key,
            u32::MAX,
            count
        ))),
    }
}
