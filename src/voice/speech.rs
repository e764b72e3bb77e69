//! Speech recognition and synthesis over an OpenAI-compatible API

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::config::{RemoteConfig, VoiceConfig};
use crate::pipeline::SpeechClient;
use crate::{Error, Result};

#[derive(Deserialize)]
struct TranscriptionResponse {
    text: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f64,
    response_format: &'static str,
}

/// Whisper-style transcription and TTS against `base_url`
pub struct OpenAiSpeech {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<SecretString>,
    stt_model: String,
    tts_model: String,
    voice: String,
    speed: f64,
}

impl OpenAiSpeech {
    #[must_use]
    pub fn new(remote: &RemoteConfig, voice: &VoiceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: remote.base_url.trim_end_matches('/').to_string(),
            api_key: remote.api_key.clone(),
            stt_model: voice.stt_model.clone(),
            tts_model: voice.tts_model.clone(),
            voice: voice.tts_voice.clone(),
            speed: voice.tts_speed,
        }
    }

    fn post(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}/{endpoint}", self.base_url));
        match &self.api_key {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl SpeechClient for OpenAiSpeech {
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.stt_model.clone());

        let response = self
            .post("audio/transcriptions")
            .multipart(form)
            .send()
            .await
            .inspect_err(|e| tracing::error!(error = %e, "transcription request failed"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(Error::Stt(format!("transcription API error {status}: {body}")));
        }

        let result: TranscriptionResponse = response.json().await?;
        let text = result.text.trim().to_string();
        tracing::info!(transcript = %text, "transcription complete");
        Ok(text)
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let request = SpeechRequest {
            model: &self.tts_model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "mp3",
        };

        let response = self.post("audio/speech").json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("speech API error {status}: {body}")));
        }

        let audio = response.bytes().await?;
        tracing::debug!(chars = text.len(), audio_bytes = audio.len(), "speech synthesized");
        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn speech(server: &MockServer, key: Option<&str>) -> OpenAiSpeech {
        let remote = RemoteConfig {
            base_url: format!("{}/v1/", server.uri()),
            api_key: key.map(SecretString::from),
            ..RemoteConfig::default()
        };
        OpenAiSpeech::new(&remote, &VoiceConfig::default())
    }

    #[tokio::test]
    async fn test_transcribe_trims_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"text": " Hey hearth. "})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let text = speech(&server, Some("sk-test"))
            .transcribe(b"RIFF".to_vec())
            .await
            .unwrap();
        assert_eq!(text, "Hey hearth.");
    }

    #[tokio::test]
    async fn test_transcribe_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = speech(&server, None).transcribe(Vec::new()).await.unwrap_err();
        assert!(matches!(err, Error::Stt(ref m) if m.contains("401")));
    }

    #[tokio::test]
    async fn test_synthesize_request_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(header_exists("authorization"))
            .and(body_partial_json(json!({
                "model": "tts-1",
                "input": "Timer set for 5 minutes.",
                "voice": "alloy"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xFF, 0xFB, 0x90]))
            .expect(1)
            .mount(&server)
            .await;

        let audio = speech(&server, Some("sk-test"))
            .synthesize("Timer set for 5 minutes.")
            .await
            .unwrap();
        assert_eq!(audio, vec![0xFF, 0xFB, 0x90]);
    }

    #[tokio::test]
    async fn test_synthesize_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = speech(&server, None).synthesize("hi").await.unwrap_err();
        assert!(matches!(err, Error::Tts(_)));
    }
}
