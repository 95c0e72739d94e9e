//! HTTP gateway for LM Studio (or any OpenAI-compatible local server).
//!
//! - `GET  {base}/models` to learn which model is loaded
//! - `POST {base}/chat/completions` for non-streaming completions
//!
//! No API key is sent; the server is expected on localhost.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use confidant_core::config::ModelConfig;

use crate::payload::{ChatCompletionResponse, ChatPayload, ModelsResponse};
use crate::traits::{GatewayFailure, ModelGateway, ProbeResult};

// ─────────────────────────────────────────────
// LmStudioGateway
// ─────────────────────────────────────────────

pub struct LmStudioGateway {
    /// HTTP client (shared, connection-pooled).
    client: reqwest::Client,
    /// API base URL including `/v1` (e.g. `"http://localhost:1234/v1"`).
    api_base: String,
    probe_timeout: Duration,
    completion_timeout: Duration,
}

impl std::fmt::Debug for LmStudioGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmStudioGateway")
            .field("api_base", &self.api_base)
            .field("probe_timeout", &self.probe_timeout)
            .field("completion_timeout", &self.completion_timeout)
            .finish()
    }
}

impl LmStudioGateway {
    pub fn new(
        api_base: impl Into<String>,
        probe_timeout: Duration,
        completion_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().build()?;
        Ok(LmStudioGateway {
            client,
            api_base: api_base.into(),
            probe_timeout,
            completion_timeout,
        })
    }

    pub fn from_config(config: &ModelConfig) -> Result<Self, reqwest::Error> {
        Self::new(
            config.api_base.clone(),
            Duration::from_secs(config.probe_timeout_secs),
            Duration::from_secs(config.completion_timeout_secs),
        )
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.api_base.trim_end_matches('/'), endpoint)
    }
}

#[async_trait]
impl ModelGateway for LmStudioGateway {
    async fn probe(&self) -> ProbeResult {
        let result = self
            .client
            .get(self.url("models"))
            .timeout(self.probe_timeout)
            .send()
            .await;

        let response = match result {
            Ok(resp) => resp,
            Err(e) => {
                debug!(error = %e, "model server unreachable");
                return ProbeResult::offline();
            }
        };

        if !response.status().is_success() {
            debug!(status = %response.status(), "model server probe rejected");
            return ProbeResult::offline();
        }

        let model_id = match response.json::<ModelsResponse>().await {
            Ok(models) => models
                .data
                .into_iter()
                .next()
                .map(|m| m.id)
                .filter(|id| !id.is_empty()),
            Err(e) => {
                warn!(error = %e, "unparsable /models response");
                None
            }
        };

        ProbeResult {
            available: true,
            model_id,
        }
    }

    async fn complete(&self, payload: &ChatPayload) -> Result<String, GatewayFailure> {
        debug!(
            messages = payload.messages.len(),
            max_tokens = payload.max_tokens,
            penalties = payload.has_penalties(),
            "calling model"
        );

        let response = self
            .client
            .post(self.url("chat/completions"))
            .timeout(self.completion_timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "model request failed");
                GatewayFailure::Transport(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(status = %status, body = %body, "model server error");
            return Err(GatewayFailure::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed = response
            .json::<ChatCompletionResponse>()
            .await
            .map_err(|e| {
                error!(error = %e, "failed to parse completion");
                GatewayFailure::Malformed(e.to_string())
            })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GatewayFailure::Malformed("no choices in response".to_string()))?;

        debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("?"),
            "completion received"
        );

        choice
            .message
            .content
            .ok_or_else(|| GatewayFailure::Malformed("choice has no content".to_string()))
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::WireMessage;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn gateway(base: &str) -> LmStudioGateway {
        LmStudioGateway::new(base, Duration::from_secs(5), Duration::from_secs(60)).unwrap()
    }

    fn payload() -> ChatPayload {
        ChatPayload {
            messages: vec![WireMessage::system("Eres útil.")],
            temperature: 0.7,
            max_tokens: 500,
            stream: false,
            repeat_penalty: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }

    #[test]
    fn test_url_trailing_slash() {
        let gw = gateway("http://localhost:1234/v1/");
        assert_eq!(gw.url("models"), "http://localhost:1234/v1/models");
        assert_eq!(
            gw.url("chat/completions"),
            "http://localhost:1234/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn test_probe_reports_first_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "object": "list",
                "data": [{"id": "qwen2.5-7b-instruct"}, {"id": "other"}]
            })))
            .mount(&server)
            .await;

        let probe = gateway(&server.uri()).probe().await;
        assert!(probe.available);
        assert_eq!(probe.model_id.as_deref(), Some("qwen2.5-7b-instruct"));
    }

    #[tokio::test]
    async fn test_probe_empty_data_means_no_model() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let probe = gateway(&server.uri()).probe().await;
        assert!(probe.available);
        assert!(probe.model_id.is_none());
    }

    #[tokio::test]
    async fn test_probe_unreachable_is_offline() {
        let probe = gateway("http://127.0.0.1:1").probe().await;
        assert_eq!(probe, ProbeResult::offline());
    }

    #[tokio::test]
    async fn test_complete_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"max_tokens": 500, "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "chatcmpl-1",
                "choices": [{
                    "message": {"role": "assistant", "content": "¡Hola! ¿En qué te ayudo?"},
                    "finish_reason": "stop"
                }]
            })))
            .mount(&server)
            .await;

        let text = gateway(&server.uri()).complete(&payload()).await.unwrap();
        assert_eq!(text, "¡Hola! ¿En qué te ayudo?");
    }

    #[tokio::test]
    async fn test_complete_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model crashed"))
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .complete(&payload())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            GatewayFailure::Upstream {
                status: 500,
                body: "model crashed".into()
            }
        );
    }

    #[tokio::test]
    async fn test_complete_invalid_json_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .complete(&payload())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[tokio::test]
    async fn test_complete_no_choices_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = gateway(&server.uri())
            .complete(&payload())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayFailure::Malformed(_)));
    }

    #[tokio::test]
    async fn test_complete_unreachable_is_transport() {
        let err = gateway("http://127.0.0.1:1")
            .complete(&payload())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayFailure::Transport(_)));
    }
}
