//! OpenAI-compatible chat-completions client.
//!
//! Works against any endpoint that speaks the `/chat/completions` protocol.
//! The defaults target OpenRouter, which additionally accepts the
//! `HTTP-Referer` and `X-Title` attribution headers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use cf_core::config::BackendConfig;

use crate::backend::GenerationBackend;
use crate::types::{ChatMessage, CompletionRequest, CompletionResponse};

/// Request timeout used when none is configured.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    api_key: String,
    default_model: String,
    site_url: Option<String>,
    app_name: Option<String>,
}

impl OpenAiCompatibleClient {
    /// Create a client for `base_url` authenticating with `api_key`.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: build_http_client(DEFAULT_TIMEOUT),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            default_model: String::new(),
            site_url: None,
            app_name: None,
        }
    }

    /// Create a client from the `[backend]` config section.
    ///
    /// Fails with [`cf_core::Error::Config`] when no API key can be resolved.
    pub fn from_config(config: &BackendConfig) -> cf_core::Result<Self> {
        let api_key = config.resolve_api_key()?;
        let client = Self::new(config.base_url.clone(), api_key)
            .with_timeout(Duration::from_secs(config.timeout_secs))
            .with_default_model(config.default_model.clone())
            .with_attribution(config.site_url.clone(), config.app_name.clone());
        Ok(client)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_http_client(timeout);
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    /// Attribution headers sent with every request.
    pub fn with_attribution(mut self, site_url: Option<String>, app_name: Option<String>) -> Self {
        self.site_url = site_url;
        self.app_name = app_name;
        self
    }

    fn build_headers(&self) -> cf_core::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", self.api_key);
        headers.insert(AUTHORIZATION, header_value(&auth)?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(ref site_url) = self.site_url {
            headers.insert("HTTP-Referer", header_value(site_url)?);
        }
        if let Some(ref app_name) = self.app_name {
            headers.insert("X-Title", header_value(app_name)?);
        }
        Ok(headers)
    }

    fn build_payload<'a>(&'a self, request: &'a CompletionRequest) -> Payload<'a> {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };
        Payload {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            top_p: request.top_p,
            max_tokens: request.max_tokens,
        }
    }

    fn map_error(status: u16, body: &str) -> cf_core::Error {
        let body = body.trim();
        match status {
            401 | 403 => cf_core::Error::backend(format!("authentication failed ({status}): {body}")),
            429 => cf_core::Error::backend(format!("rate limited: {body}")),
            _ => cf_core::Error::backend(format!("HTTP {status}: {body}")),
        }
    }

    fn parse_response(body: ChatCompletionBody, requested_model: &str) -> CompletionResponse {
        let choice = body.choices.into_iter().next();
        let finish_reason = choice.as_ref().and_then(|c| c.finish_reason.clone());
        let content = choice
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .unwrap_or_default();

        CompletionResponse {
            content,
            model: body.model.unwrap_or_else(|| requested_model.to_string()),
            finish_reason,
        }
    }
}

#[async_trait]
impl GenerationBackend for OpenAiCompatibleClient {
    fn id(&self) -> &str {
        "openai-compatible"
    }

    async fn complete(&self, request: &CompletionRequest) -> cf_core::Result<CompletionResponse> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = self.build_payload(request);
        tracing::debug!(model = payload.model, "Sending completion request to {url}");

        let response = self
            .client
            .post(&url)
            .headers(self.build_headers()?)
            .json(&payload)
            .send()
            .await
            .map_err(|e| cf_core::Error::backend(format!("request failed: {e}")))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| cf_core::Error::backend(format!("failed to read response: {e}")))?;

        if !status.is_success() {
            return Err(Self::map_error(status.as_u16(), &text));
        }

        let body: ChatCompletionBody = serde_json::from_str(&text)
            .map_err(|e| cf_core::Error::backend(format!("invalid response body: {e}")))?;
        let response = Self::parse_response(body, payload.model);
        tracing::debug!(
            model = %response.model,
            finish_reason = ?response.finish_reason,
            "Received {} chars",
            response.content.len()
        );
        Ok(response)
    }
}

fn build_http_client(timeout: Duration) -> Client {
    Client::builder().timeout(timeout).build().unwrap_or_else(|e| {
        tracing::warn!("Failed to build HTTP client with timeout: {}", e);
        Client::new()
    })
}

fn header_value(value: &str) -> cf_core::Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| cf_core::Error::Config(format!("invalid header value: {e}")))
}

// ---------------------------------------------------------------------------
// Wire structures
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Payload<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    top_p: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionBody {
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "deepseek/deepseek-chat".into(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("hi")],
            temperature: 0.1,
            top_p: 0.5,
            max_tokens: 256,
        }
    }

    fn completion_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "model": "deepseek/deepseek-chat",
            "choices": [{"message": {"role": "assistant", "content": content}, "finish_reason": "stop"}]
        })
    }

    #[tokio::test]
    async fn completes_and_sends_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(header("HTTP-Referer", "http://localhost:7860"))
            .and(header("X-Title", "clipforge"))
            .and(body_partial_json(serde_json::json!({
                "model": "deepseek/deepseek-chat",
                "max_tokens": 256,
                "top_p": 0.5,
                "messages": [
                    {"role": "system", "content": "be brief"},
                    {"role": "user", "content": "hi"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ffmpeg -i a.png out.mp4")))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(server.uri(), "test-key")
            .with_attribution(Some("http://localhost:7860".into()), Some("clipforge".into()));
        let resp = client.complete(&request()).await.unwrap();
        assert_eq!(resp.content, "ffmpeg -i a.png out.mp4");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn empty_model_uses_default() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"model": "google/gemini-pro"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("ok")))
            .expect(1)
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(server.uri(), "k").with_default_model("google/gemini-pro");
        let mut req = request();
        req.model.clear();
        assert_eq!(client.complete(&req).await.unwrap().content, "ok");
    }

    #[tokio::test]
    async fn auth_failure_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(server.uri(), "bad");
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, cf_core::Error::Backend(_)));
        assert!(err.to_string().contains("authentication failed"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn missing_content_is_empty_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"choices": []})))
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(server.uri(), "k");
        let resp = client.complete(&request()).await.unwrap();
        assert!(resp.content.is_empty());
        assert_eq!(resp.model, "deepseek/deepseek-chat");
    }

    #[tokio::test]
    async fn garbage_body_is_backend_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let client = OpenAiCompatibleClient::new(server.uri(), "k");
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, cf_core::Error::Backend(_)));
    }

    #[tokio::test]
    async fn unreachable_backend_is_backend_error() {
        let client = OpenAiCompatibleClient::new("http://127.0.0.1:9", "k")
            .with_timeout(Duration::from_secs(2));
        let err = client.complete(&request()).await.unwrap_err();
        assert!(matches!(err, cf_core::Error::Backend(_)));
    }

    #[test]
    fn from_config_requires_api_key() {
        let config = BackendConfig {
            api_key: None,
            api_key_env: "CLIPFORGE_TEST_UNSET_KEY_VAR".into(),
            ..BackendConfig::default()
        };
        let err = OpenAiCompatibleClient::from_config(&config).unwrap_err();
        assert!(matches!(err, cf_core::Error::Config(_)));

        let config = BackendConfig {
            api_key: Some("inline".into()),
            ..BackendConfig::default()
        };
        let client = OpenAiCompatibleClient::from_config(&config).unwrap();
        assert_eq!(client.default_model, "deepseek/deepseek-chat");
        assert_eq!(client.app_name.as_deref(), Some("clipforge"));
    }
}
