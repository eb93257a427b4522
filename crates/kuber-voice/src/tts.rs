use crate::config::{error_body, OpenAiConfig};
use crate::error::VoiceError;
use serde::Serialize;

/// Maximum text input size for TTS (64 KiB). Prevents resource exhaustion from
/// oversized synthesis requests.
const MAX_TTS_INPUT_BYTES: usize = 64 * 1024;

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'a str,
}

/// Text-to-speech over an OpenAI-compatible `/audio/speech` endpoint.
#[derive(Debug, Clone)]
pub struct TtsService {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl TtsService {
    pub fn new(config: &OpenAiConfig) -> Result<Self, VoiceError> {
        Ok(Self {
            client: config.http_client()?,
            config: config.clone(),
        })
    }

    /// Synthesizes speech from the given text with the configured voice.
    ///
    /// Returns raw PCM audio data (s16le, 24 kHz mono).
    pub async fn synthesize(&self, text: &str) -> Result<Vec<u8>, VoiceError> {
        if text.len() > MAX_TTS_INPUT_BYTES {
            return Err(VoiceError::Tts(format!(
                "text exceeds maximum size: {} bytes (limit: {} bytes)",
                text.len(),
                MAX_TTS_INPUT_BYTES
            )));
        }
        if text.trim().is_empty() {
            return Err(VoiceError::Tts("text is empty".to_string()));
        }

        let body = SpeechRequest {
            model: &self.config.tts_model,
            input: text,
            voice: &self.config.tts_voice,
            response_format: "pcm",
        };
        let request = self
            .client
            .post(self.config.endpoint("audio/speech"))
            .json(&body);
        let response = self
            .config
            .authorize(request)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(format!("speech request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(VoiceError::Tts(error_body(response).await));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| VoiceError::Tts(format!("failed to read speech audio: {e}")))?;
        Ok(audio.to_vec())
    }
}
