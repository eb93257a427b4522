use crate::agent::{AgentVoiceClient, TranscriptionEvent};
use crate::error::VoiceError;
use crate::llm::{trim_to_recent_exchanges, ChatClient, ChatMessage, MAX_CONTEXT_EXCHANGES};
use crate::runtime::{AgentSession, ConversationRuntime};
use crate::service::VoiceService;
use crate::stt::SttService;
use crate::tts::TtsService;
use async_trait::async_trait;
use kuber_types::Speaker;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::future::Future;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{info, warn};

/// Display name the agent joins rooms with.
const AGENT_DISPLAY_NAME: &str = "Kuber";

/// STT → LLM → TTS conversation loop over LiveKit rooms.
#[derive(Debug)]
pub struct VoicePipeline {
    voice: Arc<VoiceService>,
    stt: Arc<SttService>,
    tts: Arc<TtsService>,
    chat: Arc<ChatClient>,
    context_exchanges: usize,
    rooms: Mutex<HashMap<String, Arc<AgentVoiceClient>>>,
}

impl VoicePipeline {
    pub fn new(
        voice: Arc<VoiceService>,
        stt: Arc<SttService>,
        tts: Arc<TtsService>,
        chat: Arc<ChatClient>,
    ) -> Self {
        Self {
            voice,
            stt,
            tts,
            chat,
            context_exchanges: MAX_CONTEXT_EXCHANGES,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Caps how many past user exchanges are resent to the model each turn.
    pub fn with_context_exchanges(mut self, exchanges: usize) -> Self {
        self.context_exchanges = exchanges.max(1);
        self
    }

    /// The agent client currently in `room_name`, if any.
    pub fn client(&self, room_name: &str) -> Option<Arc<AgentVoiceClient>> {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(room_name)
            .cloned()
    }

    /// Makes `client` reachable by room name until the returned guard drops.
    fn register(&self, client: Arc<AgentVoiceClient>) -> RoomRegistration<'_> {
        self.rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(client.room_name().to_string(), Arc::clone(&client));
        RoomRegistration {
            pipeline: self,
            client,
        }
    }

    async fn converse(&self, client: &AgentVoiceClient, session: &AgentSession) {
        let mut transcriptions = client.subscribe_transcriptions();
        let mut disconnected = client.disconnected();

        let mut history = vec![
            ChatMessage::system(session.instructions.clone()),
            ChatMessage::system(session.opening_instructions.clone()),
        ];
        let opening = self.respond(client, session, &mut history);
        match unless_hung_up(&mut disconnected, opening).await {
            None => return,
            Some(Err(e)) => {
                warn!(session_id = %session.session_id, error = %e, "opening reply failed");
            }
            Some(Ok(())) => {}
        }

        loop {
            let event = tokio::select! {
                biased;
                () = hung_up(&mut disconnected) => break,
                event = transcriptions.recv() => event,
            };

            match event {
                Ok(event) => {
                    let turn = self.user_turn(client, session, &mut history, event);
                    match unless_hung_up(&mut disconnected, turn).await {
                        None => {
                            info!(session_id = %session.session_id, "hung up mid-turn");
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(session_id = %session.session_id, error = %e, "turn failed");
                        }
                        Some(Ok(())) => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session_id = %session.session_id, skipped, "dropped transcriptions");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn user_turn(
        &self,
        client: &AgentVoiceClient,
        session: &AgentSession,
        history: &mut Vec<ChatMessage>,
        event: TranscriptionEvent,
    ) -> Result<(), VoiceError> {
        info!(
            session_id = %session.session_id,
            speaker = %event.speaker,
            "user turn"
        );
        session
            .transcripts
            .committed(Speaker::User, &event.text)
            .await;
        history.push(ChatMessage::user(event.text));
        trim_to_recent_exchanges(history, self.context_exchanges);

        self.respond(client, session, history).await
    }

    /// Asks the model for a reply, records it, then speaks it.
    async fn respond(
        &self,
        client: &AgentVoiceClient,
        session: &AgentSession,
        history: &mut Vec<ChatMessage>,
    ) -> Result<(), VoiceError> {
        let reply = self.chat.reply(history, session.tools.as_ref()).await?;
        if reply.is_empty() {
            return Ok(());
        }

        session
            .transcripts
            .committed(Speaker::Assistant, &reply)
            .await;

        let audio = self.tts.synthesize(&reply).await?;
        client.publish_audio(&audio)
    }
}

/// Resolves once the agent has left the room.
async fn hung_up(disconnected: &mut watch::Receiver<bool>) {
    while !*disconnected.borrow_and_update() {
        if disconnected.changed().await.is_err() {
            return;
        }
    }
}

/// Runs `work` unless the agent leaves the room first, in which case the work
/// is dropped and `None` returned.
async fn unless_hung_up<T>(
    disconnected: &mut watch::Receiver<bool>,
    work: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        () = hung_up(disconnected) => None,
        output = work => Some(output),
    }
}

/// Unregisters and disconnects a room's agent, including when `run` is
/// cancelled mid-conversation.
struct RoomRegistration<'a> {
    pipeline: &'a VoicePipeline,
    client: Arc<AgentVoiceClient>,
}

impl Drop for RoomRegistration<'_> {
    fn drop(&mut self) {
        let mut rooms = self
            .pipeline
            .rooms
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // A newer conversation may have claimed the room name.
        if rooms
            .get(self.client.room_name())
            .is_some_and(|c| Arc::ptr_eq(c, &self.client))
        {
            rooms.remove(self.client.room_name());
        }
        drop(rooms);
        self.client.disconnect();
    }
}

#[async_trait]
impl ConversationRuntime for VoicePipeline {
    async fn run(&self, session: AgentSession) -> Result<(), VoiceError> {
        let identity = format!("agent-{}", session.session_id);
        let token =
            self.voice
                .generate_join_token(&session.room_name, &identity, AGENT_DISPLAY_NAME)?;

        let client = Arc::new(
            AgentVoiceClient::connect(
                self.voice.url(),
                &token,
                &session.room_name,
                Arc::clone(&self.stt),
            )
            .await?,
        );
        let _registration = self.register(Arc::clone(&client));

        info!(session_id = %session.session_id, room = %session.room_name, "conversation started");
        self.converse(&client, &session).await;

        info!(session_id = %session.session_id, "conversation ended");
        Ok(())
    }

    async fn hear(&self, room_name: &str, pcm: &[u8], speaker: &str) -> Result<(), VoiceError> {
        let client = self
            .client(room_name)
            .ok_or_else(|| VoiceError::RoomNotFound(room_name.to_string()))?;
        client.hear(pcm, speaker).await
    }

    async fn hang_up(&self, room_name: &str) -> Result<(), VoiceError> {
        let client = self
            .client(room_name)
            .ok_or_else(|| VoiceError::RoomNotFound(room_name.to_string()))?;
        client.disconnect();
        Ok(())
    }

    fn listen(&self, room_name: &str) -> Result<broadcast::Receiver<Arc<[u8]>>, VoiceError> {
        self.client(room_name)
            .map(|client| client.subscribe_audio())
            .ok_or_else(|| VoiceError::RoomNotFound(room_name.to_string()))
    }
}
