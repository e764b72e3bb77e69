//! Chat-completions LLM client

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::RemoteConfig;
use crate::pipeline::{Exchange, LlmClient, LlmReply};
use crate::{Error, Result};

/// LLM behind an OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    model: String,
    system_prompt: String,
}

impl OpenAiChat {
    #[must_use]
    pub fn new(remote: &RemoteConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: remote.base_url.trim_end_matches('/').to_string(),
            api_key: remote.api_key.clone(),
            model: remote.llm_model.clone(),
            system_prompt: remote.system_prompt.clone(),
        }
    }

    fn messages<'a>(&'a self, prompt: &'a str, history: &'a [Exchange]) -> Vec<Message<'a>> {
        let mut messages = Vec::with_capacity(history.len() * 2 + 2);
        messages.push(Message {
            role: "system",
            content: &self.system_prompt,
        });
        for exchange in history {
            messages.push(Message {
                role: "user",
                content: &exchange.user,
            });
            messages.push(Message {
                role: "assistant",
                content: &exchange.assistant,
            });
        }
        messages.push(Message {
            role: "user",
            content: prompt,
        });
        messages
    }
}

#[async_trait]
impl LlmClient for OpenAiChat {
    async fn reply(&self, prompt: &str, history: &[Exchange]) -> Result<LlmReply> {
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: self.messages(prompt, history),
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }
        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Llm(format!("chat API error {status}: {body}")));
        }

        let result: ChatCompletionResponse = response.json().await?;
        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| Error::Llm("empty completion".to_string()))?;

        let reply = parse_reply(&content);
        tracing::debug!(
            model = %self.model,
            actions = reply.actions.len(),
            expects_reply = reply.expects_reply,
            "llm reply"
        );
        Ok(reply)
    }
}

/// Parse the structured reply, treating anything else as plain speech
fn parse_reply(content: &str) -> LlmReply {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map_or(trimmed, str::trim);

    serde_json::from_str::<LlmReply>(body).unwrap_or_else(|_| {
        tracing::debug!("llm reply was not structured, speaking it as-is");
        LlmReply {
            response: trimmed.to_string(),
            ..LlmReply::default()
        }
    })
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
