use crate::config::LiveKitConfig;
use crate::error::VoiceError;
use livekit_api::access_token::{AccessToken, VideoGrants};
use livekit_api::services::room::{CreateRoomOptions, RoomClient};
use livekit_protocol::Room;
use std::time::Duration;

/// LiveKit server API: rooms and join tokens.
#[derive(Debug)]
pub struct VoiceService {
    config: LiveKitConfig,
    room_client: RoomClient,
}

impl VoiceService {
    pub fn new(config: LiveKitConfig) -> Self {
        let room_client =
            RoomClient::with_api_key(&config.url, &config.api_key, &config.api_secret);
        Self {
            config,
            room_client,
        }
    }

    /// True when a server URL and credentials are configured.
    pub fn is_enabled(&self) -> bool {
        !self.config.url.is_empty()
            && !self.config.api_key.is_empty()
            && !self.config.api_secret.is_empty()
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    /// Returns the browser-facing URL. Falls back to the internal URL if no
    /// public URL is configured.
    pub fn public_url(&self) -> &str {
        if self.config.public_url.is_empty() {
            &self.config.url
        } else {
            &self.config.public_url
        }
    }

    pub async fn create_room(&self, name: &str) -> Result<Room, VoiceError> {
        self.room_client
            .create_room(name, CreateRoomOptions::default())
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))
    }

    pub async fn delete_room(&self, name: &str) -> Result<(), VoiceError> {
        self.room_client
            .delete_room(name)
            .await
            .map_err(|e| VoiceError::RoomService(e.to_string()))
    }

    pub fn generate_join_token(
        &self,
        room_name: &str,
        participant_identity: &str,
        participant_name: &str,
    ) -> Result<String, VoiceError> {
        let token = AccessToken::with_api_key(&self.config.api_key, &self.config.api_secret)
            .with_identity(participant_identity)
            .with_name(participant_name)
            .with_grants(VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                can_publish: true,
                can_subscribe: true,
                can_publish_data: true,
                ..Default::default()
            })
            .with_ttl(Duration::from_secs(self.config.token_ttl_seconds));

        token.to_jwt().map_err(VoiceError::LiveKit)
    }
}
