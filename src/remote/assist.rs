//! Home Assistant Assist conversation client

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::pipeline::{AssistClient, AssistReply};
use crate::{Error, Result};

#[derive(Serialize)]
struct ConversationRequest<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct ConversationResponse {
    response: ConversationBody,
    conversation_id: Option<String>,
    #[serde(default)]
    continue_conversation: bool,
}

#[derive(Deserialize)]
struct ConversationBody {
    #[serde(default)]
    speech: Option<SpeechBlock>,
}

#[derive(Deserialize)]
struct SpeechBlock {
    plain: Option<PlainSpeech>,
}

#[derive(Deserialize)]
struct PlainSpeech {
    speech: String,
}

/// Text conversation through `/api/conversation/process`
pub struct HomeAssistantAssist {
    client: reqwest::Client,
    base_url: String,
    token: Option<SecretString>,
    agent_id: Option<String>,
}

impl HomeAssistantAssist {
    /// Build from the remote settings
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no Assist URL is set
    pub fn new(remote: &RemoteConfig) -> Result<Self> {
        let base_url = remote
            .assist_url
            .as_deref()
            .ok_or_else(|| Error::Config("remote.assist_url is not set".to_string()))?;
        Ok(Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: remote.assist_token.clone(),
            agent_id: remote.assist_agent_id.clone(),
        })
    }
}

#[async_trait]
impl AssistClient for HomeAssistantAssist {
    async fn converse(&self, text: &str, conversation_id: Option<&str>) -> Result<AssistReply> {
        let request = ConversationRequest {
            text,
            conversation_id,
            agent_id: self.agent_id.as_deref(),
        };

        let mut builder = self
            .client
            .post(format!("{}/api/conversation/process", self.base_url))
            .json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Assist(format!("conversation error {status}: {body}")));
        }

        let body: ConversationResponse = response.json().await?;
        let speech = body
            .response
            .speech
            .and_then(|s| s.plain)
            .map(|p| p.speech)
            .unwrap_or_default();

        tracing::debug!(
            conversation_id = body.conversation_id.as_deref().unwrap_or(""),
            continue_conversation = body.continue_conversation,
            "assist reply"
        );
        Ok(AssistReply {
            speech,
            conversation_id: body.conversation_id,
            continue_conversation: body.continue_conversation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn assist(server: &MockServer, agent: Option<&str>) -> HomeAssistantAssist {
        HomeAssistantAssist::new(&RemoteConfig {
            assist_url: Some(format!("{}/", server.uri())),
            assist_token: Some(SecretString::from("ha-token")),
            assist_agent_id: agent.map(str::to_string),
            ..RemoteConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_requires_url() {
        assert!(HomeAssistantAssist::new(&RemoteConfig::default()).is_err());
    }

    #[tokio::test]
    async fn test_converse_reads_plain_speech() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/conversation/process"))
            .and(header("authorization", "Bearer ha-token"))
            .and(body_json(json!({
                "text": "turn on the lights",
                "agent_id": "conversation.home"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {
                    "response_type": "action_done",
                    "speech": {"plain": {"speech": "Turned on the lights", "extra_data": null}}
                },
                "conversation_id": "01HX",
                "continue_conversation": false
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = assist(&server, Some("conversation.home"))
            .converse("turn on the lights", None)
            .await
            .unwrap();
        assert_eq!(reply.speech, "Turned on the lights");
        assert_eq!(reply.conversation_id.as_deref(), Some("01HX"));
        assert!(!reply.continue_conversation);
    }

    #[tokio::test]
    async fn test_follow_up_carries_conversation_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_json(json!({"text": "the kitchen", "conversation_id": "01HX"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "response": {"speech": {"plain": {"speech": "Done"}}},
                "conversation_id": "01HX",
                "continue_conversation": true
            })))
            .expect(1)
            .mount(&server)
            .await;

        let reply = assist(&server, None)
            .converse("the kitchen", Some("01HX"))
            .await
            .unwrap();
        assert!(reply.continue_conversation);
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = assist(&server, None).converse("hi", None).await.unwrap_err();
        assert!(matches!(err, Error::Assist(_)));
    }
}
