//! Home Assistant `media_player` entity over the REST API

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::{MediaCommand, MediaPlayer, PlayerState};
use crate::error::with_timeout;
use crate::{Error, Result};

#[derive(Deserialize)]
struct EntityState {
    state: String,
}

/// Media player backed by a Home Assistant entity
pub struct HomeAssistantPlayer {
    client: reqwest::Client,
    base_url: String,
    token: SecretString,
    entity_id: String,
    timeout: Duration,
}

impl HomeAssistantPlayer {
    #[must_use]
    pub fn new(base_url: &str, token: SecretString, entity_id: &str, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            entity_id: entity_id.to_string(),
            timeout,
        }
    }

    async fn call_service(&self, service: &str, extra: serde_json::Value) -> Result<()> {
        let mut body = json!({ "entity_id": self.entity_id });
        if let (Some(body), Some(extra)) = (body.as_object_mut(), extra.as_object()) {
            body.extend(extra.clone());
        }

        let url = format!("{}/api/services/media_player/{service}", self.base_url);
        let request = self
            .client
            .post(&url)
            .bearer_auth(self.token.expose_secret())
            .json(&body);
        let response = with_timeout("media", self.timeout, async { Ok(request.send().await?) }).await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Media(format!("{service} failed ({status}): {body}")));
        }
        tracing::debug!(service, entity_id = %self.entity_id, "media command sent");
        Ok(())
    }
}

#[async_trait]
impl MediaPlayer for HomeAssistantPlayer {
    async fn state(&self) -> Result<PlayerState> {
        let url = format!("{}/api/states/{}", self.base_url, self.entity_id);
        let request = self.client.get(&url).bearer_auth(self.token.expose_secret());
        let response = with_timeout("media", self.timeout, async { Ok(request.send().await?) }).await?;

        if !response.status().is_success() {
            return Err(Error::Media(format!("state query failed ({})", response.status())));
        }
        let entity: EntityState = response.json().await?;
        Ok(PlayerState::from_ha(&entity.state))
    }

    async fn command(&self, command: MediaCommand) -> Result<()> {
        let (service, extra) = match command {
            MediaCommand::Pause => ("media_pause", json!({})),
            MediaCommand::Resume => ("media_play", json!({})),
            MediaCommand::Stop => ("media_stop", json!({})),
            MediaCommand::Next => ("media_next_track", json!({})),
            MediaCommand::Previous => ("media_previous_track", json!({})),
            MediaCommand::VolumeUp => ("volume_up", json!({})),
            MediaCommand::VolumeDown => ("volume_down", json!({})),
            MediaCommand::Play(source) => (
                "play_media",
                json!({ "media_content_id": source, "media_content_type": "music" }),
            ),
        };
        self.call_service(service, extra).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn player(server: &MockServer) -> HomeAssistantPlayer {
        HomeAssistantPlayer::new(
            &server.uri(),
            SecretString::from("token"),
            "media_player.kitchen",
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn test_state_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/states/media_player.kitchen"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "playing"})))
            .mount(&server)
            .await;

        assert_eq!(player(&server).state().await.unwrap(), PlayerState::Playing);
    }

    #[tokio::test]
    async fn test_play_media_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/services/media_player/play_media"))
            .and(body_partial_json(json!({
                "entity_id": "media_player.kitchen",
                "media_content_id": "jazz"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        player(&server)
            .command(MediaCommand::Play("jazz".to_string()))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_command() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = player(&server).command(MediaCommand::Pause).await.unwrap_err();
        assert!(matches!(err, Error::Media(_)));
    }
}
