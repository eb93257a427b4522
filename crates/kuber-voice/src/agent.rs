use crate::error::VoiceError;
use crate::stt::SttService;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

/// Default capacity for the per-agent broadcast channels.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Event emitted when an agent hears and transcribes speech.
#[derive(Debug, Clone)]
pub struct TranscriptionEvent {
    pub room_name: String,
    pub speaker: String,
    pub text: String,
}

/// The agent's presence in a LiveKit room.
///
/// Incoming audio arrives through [`hear`](Self::hear) and is transcribed onto
/// the transcription channel. Outgoing audio is fanned out to
/// [`subscribe_audio`](Self::subscribe_audio) listeners.
#[derive(Debug)]
pub struct AgentVoiceClient {
    room_url: String,
    room_name: String,
    stt_service: Arc<SttService>,
    transcription_tx: broadcast::Sender<TranscriptionEvent>,
    audio_tx: broadcast::Sender<Arc<[u8]>>,
    disconnect_tx: watch::Sender<bool>,
}

impl AgentVoiceClient {
    /// Connects to a LiveKit room.
    pub async fn connect(
        url: &str,
        token: &str,
        room_name: &str,
        stt_service: Arc<SttService>,
    ) -> Result<Self, VoiceError> {
        if url.is_empty() {
            return Err(VoiceError::Config("LiveKit URL is empty".to_string()));
        }
        if token.is_empty() {
            return Err(VoiceError::Config("agent join token is empty".to_string()));
        }

        info!(
            room = room_name,
            url,
            token_len = token.len(),
            "agent joining room"
        );

        let (transcription_tx, _) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        let (audio_tx, _) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        let (disconnect_tx, _) = watch::channel(false);

        Ok(Self {
            room_url: url.to_string(),
            room_name: room_name.to_string(),
            stt_service,
            transcription_tx,
            audio_tx,
            disconnect_tx,
        })
    }

    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    pub fn room_url(&self) -> &str {
        &self.room_url
    }

    pub fn is_connected(&self) -> bool {
        !*self.disconnect_tx.borrow()
    }

    /// Publishes PCM audio data to the room.
    pub fn publish_audio(&self, pcm: &[u8]) -> Result<(), VoiceError> {
        if !self.is_connected() {
            return Err(VoiceError::NotConnected(self.room_name.clone()));
        }

        debug!(room = %self.room_name, bytes = pcm.len(), "publishing agent audio");

        // No listeners is fine.
        let _ = self.audio_tx.send(Arc::from(pcm));
        Ok(())
    }

    /// Transcribes audio spoken by `speaker` and broadcasts the text.
    ///
    /// Silence (an empty transcription) is not broadcast.
    pub async fn hear(&self, audio: &[u8], speaker: &str) -> Result<(), VoiceError> {
        if !self.is_connected() {
            return Err(VoiceError::NotConnected(self.room_name.clone()));
        }

        debug!(
            room = %self.room_name,
            speaker,
            bytes = audio.len(),
            "agent hearing audio"
        );

        let text = self.stt_service.transcribe(audio).await?;
        if text.is_empty() {
            return Ok(());
        }

        let event = TranscriptionEvent {
            room_name: self.room_name.clone(),
            speaker: speaker.to_string(),
            text,
        };
        let _ = self.transcription_tx.send(event);

        Ok(())
    }

    /// Leaves the room. Idempotent.
    pub fn disconnect(&self) {
        let was_connected = !self.disconnect_tx.send_replace(true);
        if was_connected {
            info!(room = %self.room_name, "agent leaving room");
        }
    }

    pub fn subscribe_transcriptions(&self) -> broadcast::Receiver<TranscriptionEvent> {
        self.transcription_tx.subscribe()
    }

    pub fn subscribe_audio(&self) -> broadcast::Receiver<Arc<[u8]>> {
        self.audio_tx.subscribe()
    }

    /// Watches the disconnected flag; it flips to `true` exactly once.
    pub fn disconnected(&self) -> watch::Receiver<bool> {
        self.disconnect_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OpenAiConfig;

    fn stt() -> Arc<SttService> {
        Arc::new(SttService::new(&OpenAiConfig::default()).unwrap())
    }

    #[tokio::test]
    async fn connect_requires_url_and_token() {
        assert!(AgentVoiceClient::connect("", "tok", "room", stt()).await.is_err());
        assert!(AgentVoiceClient::connect("ws://lk", "", "room", stt()).await.is_err());
    }

    #[tokio::test]
    async fn published_audio_reaches_subscribers() {
        let client = AgentVoiceClient::connect("ws://lk", "tok", "room", stt())
            .await
            .unwrap();
        let mut audio = client.subscribe_audio();

        client.publish_audio(&[1, 2, 3]).unwrap();
        assert_eq!(&*audio.recv().await.unwrap(), &[1, 2, 3]);
    }

    #[tokio::test]
    async fn disconnect_is_observed_and_blocks_io() {
        let client = AgentVoiceClient::connect("ws://lk", "tok", "room", stt())
            .await
            .unwrap();
        let mut flag = client.disconnected();

        client.disconnect();
        client.disconnect();

        flag.changed().await.unwrap();
        assert!(*flag.borrow());
        assert!(!client.is_connected());
        assert!(matches!(
            client.publish_audio(&[0]),
            Err(VoiceError::NotConnected(_))
        ));
        assert!(matches!(
            client.hear(&[0, 0], "user").await,
            Err(VoiceError::NotConnected(_))
        ));
    }
}
