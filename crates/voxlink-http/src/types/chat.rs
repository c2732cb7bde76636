//! Chat and transcription payloads exchanged with the assistant backend.

use crate::error::{Result, TransportError};
use crate::session::SessionId;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Encoding of synthesized speech returned by `/chat_with_tts/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Mp3,
    Wav,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Wav => "wav",
        }
    }
}

/// Assistant answer handed back to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub text: String,
    /// Base64 encoded speech, present for TTS replies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_format: Option<AudioFormat>,
    pub session_id: SessionId,
    pub received_at: DateTime<Utc>,
}

impl ChatReply {
    pub fn text(text: impl Into<String>, session_id: SessionId) -> Self {
        ChatReply {
            text: text.into(),
            audio: None,
            audio_format: None,
            session_id,
            received_at: Utc::now(),
        }
    }

    pub fn has_audio(&self) -> bool {
        self.audio.is_some()
    }

    /// Interpret a chat or chat-with-TTS response body.
    ///
    /// TTS bodies carry `{text, audio, audio_format}`; plain bodies carry
    /// `{response}`. A TTS request answered without audio degrades to the
    /// plain shape, and `text` stands in for a missing `response`.
    pub fn from_payload(
        payload: &serde_json::Value,
        use_tts: bool,
        session_id: SessionId,
    ) -> Result<Self> {
        if let Some(error) = payload.get("error").and_then(|e| e.as_str()) {
            return Err(TransportError::Server(error.to_string()));
        }

        let field = |name: &str| payload.get(name).and_then(|v| v.as_str());

        if use_tts {
            if let (Some(text), Some(audio)) = (field("text"), field("audio")) {
                let audio_format = payload
                    .get("audio_format")
                    .and_then(|f| serde_json::from_value(f.clone()).ok())
                    .unwrap_or_default();
                return Ok(ChatReply {
                    text: text.to_string(),
                    audio: Some(audio.to_string()),
                    audio_format: Some(audio_format),
                    session_id,
                    received_at: Utc::now(),
                });
            }
        }

        field("response")
            .or_else(|| field("text"))
            .map(|text| ChatReply::text(text, session_id))
            .ok_or_else(|| {
                TransportError::Decode(format!("chat response without text: {}", payload))
            })
    }
}

/// JSON body for `/chat/` and `/chat_with_tts/`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequestBody {
    pub message: String,
    pub session_id: String,
}

/// Body of a `/transcribe/` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranscriptionResponse {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TranscriptionResponse {
    pub fn into_text(self) -> Result<String> {
        if let Some(error) = self.error {
            return Err(TransportError::Server(error));
        }
        self.text
            .ok_or_else(|| TransportError::Decode("transcription response without text".into()))
    }
}

/// Recorded audio to be transcribed.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioUpload {
    pub bytes: Bytes,
    pub mime_type: String,
    pub file_name: String,
}

impl AudioUpload {
    pub fn new(bytes: impl Into<Bytes>, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        let file_name = format!("recording.{}", extension_for_mime(&mime_type));
        AudioUpload {
            bytes: bytes.into(),
            mime_type,
            file_name,
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = file_name.into();
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

fn extension_for_mime(mime: &str) -> &'static str {
    let base = mime.split(';').next().unwrap_or("").trim();
    match base {
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/ogg" => "ogg",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" => "m4a",
        _ => "webm",
    }
}
