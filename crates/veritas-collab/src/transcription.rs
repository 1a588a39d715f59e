//! Transcription collaborator (spec §6 "Collaborator: transcription
//! service"): one WAV-wrapped chunk plus optional prior-context string
//! in, a best-effort transcript or a typed error/blocked status out.

use std::time::Duration;

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use veritas_protocol::PipelineError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1/audio/transcriptions";
const ERROR_BODY_TRUNCATE: usize = 160;

#[derive(Debug, Clone, PartialEq)]
pub enum TranscriptionOutcome {
    Text(String),
    Blocked { reason: String },
    Error { message: String },
}

pub struct TranscriptionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl TranscriptionClient {
    pub fn new(api_key: Option<String>, model: String) -> Self {
        Self::with_base_url(api_key, model, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(api_key: Option<String>, model: String, base_url: String) -> Self {
        Self { http: reqwest::Client::new(), base_url, api_key, model }
    }

    /// Transcribe one canonical-WAV chunk (spec §4.1 produces the PCM;
    /// the caller wraps it with `veritas_wav` before calling this).
    /// `prior_context` becomes the model's `prompt` field, the same
    /// trailing-200-chars context the transcript assembler tracks
    /// (spec §4.2).
    pub async fn transcribe(
        &self,
        wav_bytes: Vec<u8>,
        prior_context: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<TranscriptionOutcome, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(TranscriptionOutcome::Error { message: "missing transcription API key".to_string() });
        };

        let mut form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .part("file", reqwest::multipart::Part::bytes(wav_bytes).file_name("chunk.wav"));
        if let Some(prompt) = prior_context.filter(|p| !p.is_empty()) {
            form = form.text("prompt", prompt.to_string());
        }

        let send_fut = self
            .http
            .post(&self.base_url)
            .bearer_auth(api_key)
            .timeout(Duration::from_secs(30))
            .multipart(form)
            .send();

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            result = send_fut => result,
        };

        let response = match response {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "transcription request failed");
                return Ok(TranscriptionOutcome::Error { message: err.to_string() });
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            return Ok(TranscriptionOutcome::Blocked { reason: "transcription service refused the request".to_string() });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let truncated: String = body.chars().take(ERROR_BODY_TRUNCATE).collect();
            warn!(%status, "transcription returned non-2xx");
            return Ok(TranscriptionOutcome::Error { message: format!("{status}: {truncated}") });
        }

        let parse_fut = response.json::<ResponseBody>();
        let parsed = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            result = parse_fut => result,
        };

        match parsed {
            Ok(body) => Ok(TranscriptionOutcome::Text(body.text)),
            Err(err) => Ok(TranscriptionOutcome::Error { message: format!("malformed transcription response: {err}") }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_api_key_returns_typed_error() {
        let client = TranscriptionClient::new(None, "whisper-1".to_string());
        let outcome = client.transcribe(vec![0u8; 44], None, &CancellationToken::new()).await.unwrap();
        assert!(matches!(outcome, TranscriptionOutcome::Error { .. }));
    }

    #[tokio::test]
    async fn pre_cancelled_token_is_rethrown() {
        let client = TranscriptionClient::new(Some("key".to_string()), "whisper-1".to_string());
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client.transcribe(vec![0u8; 44], None, &cancel).await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));
    }

    #[tokio::test]
    async fn non_2xx_response_becomes_typed_error() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let client = TranscriptionClient::with_base_url(Some("key".to_string()), "whisper-1".to_string(), server.uri());
        let outcome = client.transcribe(vec![0u8; 44], None, &CancellationToken::new()).await.unwrap();
        match outcome {
            TranscriptionOutcome::Error { message } => assert!(message.contains("boom")),
            other => panic!("expected Error, got {other:?}"),
        }
    }
}
