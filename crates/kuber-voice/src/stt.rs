use crate::config::{error_body, OpenAiConfig};
use crate::error::VoiceError;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

/// Maximum audio input size for STT (10 MiB). Prevents OOM from oversized payloads.
const MAX_STT_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Sample rate of PCM handed to [`SttService::transcribe`] (s16le mono).
pub const STT_SAMPLE_RATE: u32 = 16_000;

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// Speech-to-text over an OpenAI-compatible `/audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct SttService {
    client: reqwest::Client,
    config: OpenAiConfig,
}

impl SttService {
    pub fn new(config: &OpenAiConfig) -> Result<Self, VoiceError> {
        Ok(Self {
            client: config.http_client()?,
            config: config.clone(),
        })
    }

    /// Transcribes raw 16 kHz s16le mono PCM. Returns the trimmed text, which
    /// may be empty for silence.
    pub async fn transcribe(&self, pcm: &[u8]) -> Result<String, VoiceError> {
        if pcm.len() > MAX_STT_INPUT_BYTES {
            return Err(VoiceError::Stt(format!(
                "audio data exceeds maximum size: {} bytes (limit: {} bytes)",
                pcm.len(),
                MAX_STT_INPUT_BYTES
            )));
        }
        if pcm.is_empty() {
            return Ok(String::new());
        }

        let wav = wav_from_pcm(pcm, STT_SAMPLE_RATE);
        let file = Part::bytes(wav)
            .file_name("speech.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(format!("invalid audio part: {e}")))?;
        let form = Form::new()
            .text("model", self.config.stt_model.clone())
            .text("response_format", "json")
            .part("file", file);

        let request = self
            .client
            .post(self.config.endpoint("audio/transcriptions"))
            .multipart(form);
        let response = self
            .config
            .authorize(request)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(format!("transcription request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(VoiceError::Stt(error_body(response).await));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| VoiceError::Stt(format!("invalid transcription response: {e}")))?;
        Ok(body.text.trim().to_string())
    }
}

/// Prefixes s16le mono PCM with a 44-byte RIFF/WAVE header.
pub fn wav_from_pcm(pcm: &[u8], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;

    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);
    let data_len = pcm.len() as u32;

    let mut wav = Vec::with_capacity(44 + pcm.len());
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&(36 + data_len).to_le_bytes());
    wav.extend_from_slice(b"WAVE");
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&CHANNELS.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&data_len.to_le_bytes());
    wav.extend_from_slice(pcm);
    wav
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_layout() {
        let pcm = [0u8, 1, 2, 3];
        let wav = wav_from_pcm(&pcm, 16_000);

        assert_eq!(wav.len(), 48);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(wav[4..8].try_into().unwrap()), 40);
        assert_eq!(&wav[8..16], b"WAVEfmt ");
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 16_000);
        // byte rate: 16 kHz * 2 bytes
        assert_eq!(u32::from_le_bytes(wav[28..32].try_into().unwrap()), 32_000);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 4);
        assert_eq!(&wav[44..], &pcm);
    }

    #[tokio::test]
    async fn oversized_audio_is_rejected_before_any_request() {
        let config = OpenAiConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..OpenAiConfig::default()
        };
        let stt = SttService::new(&config).unwrap();
        let audio = vec![0u8; MAX_STT_INPUT_BYTES + 1];

        let err = stt.transcribe(&audio).await.unwrap_err();
        assert!(err.to_string().contains("exceeds maximum size"));
    }

    #[tokio::test]
    async fn empty_audio_transcribes_to_nothing() {
        let stt = SttService::new(&OpenAiConfig::default()).unwrap();
        assert_eq!(stt.transcribe(&[]).await.unwrap(), "");
    }
}
