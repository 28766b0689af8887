//! Completion providers
//!
//! - `OpenAiProvider`: OpenAI-compatible chat completions in JSON mode
//! - `MockCompletionProvider`: canned output for local runs and tests

use super::prompt::Prompt;
use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use studyforge_common::config::GenerationConfig;
use studyforge_common::errors::{AppError, Result};
use studyforge_common::metrics::record_provider;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Trait for text completion
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Raw completion text for `prompt`
    async fn complete(&self, prompt: &Prompt) -> Result<String>;

    fn model(&self) -> &str;

    fn temperature(&self) -> f32;
}

/// OpenAI-compatible chat completion client
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_retries: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

fn provider_error(message: String) -> AppError {
    AppError::ProviderError { message }
}

impl OpenAiProvider {
    pub fn new(
        api_key: String,
        api_base: Option<String>,
        model: String,
        temperature: f32,
        max_retries: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let base = api_base.unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            model,
            temperature,
            max_retries,
        })
    }

    pub fn from_config(config: &GenerationConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "generation.api_key is required for the openai provider".into(),
        })?;
        Self::new(
            api_key,
            config.api_base.clone(),
            config.model.clone(),
            config.temperature,
            config.max_retries,
            Duration::from_secs(config.timeout_secs),
        )
    }

    async fn request_once(&self, prompt: &Prompt) -> std::result::Result<String, backoff::Error<AppError>> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: self.temperature,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| backoff::Error::transient(provider_error(format!("request failed: {}", e))))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = provider_error(format!("API error {}: {}", status.as_u16(), body));
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(backoff::Error::transient(err))
            } else {
                Err(backoff::Error::permanent(err))
            };
        }

        let chat: ChatResponse = response.json().await.map_err(|e| {
            backoff::Error::permanent(provider_error(format!("failed to parse response: {}", e)))
        })?;

        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| backoff::Error::permanent(provider_error("empty completion".into())))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    #[instrument(skip_all, fields(model = %self.model))]
    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let started = Instant::now();
        let counter = AtomicU32::new(0);
        let attempts = &counter;
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            max_elapsed_time: Some(Duration::from_secs(120)),
            ..Default::default()
        };

        let result = retry(policy, move || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed);
            match self.request_once(prompt).await {
                Err(backoff::Error::Transient { err, .. }) if attempt >= self.max_retries => {
                    Err(backoff::Error::permanent(err))
                }
                Err(backoff::Error::Transient { err, retry_after }) => {
                    warn!(attempt = attempt + 1, error = %err, "Provider request failed, retrying");
                    Err(backoff::Error::Transient { err, retry_after })
                }
                other => other,
            }
        })
        .await;

        let elapsed = started.elapsed().as_secs_f64();
        record_provider(elapsed, &self.model, result.is_ok());
        debug!(elapsed_secs = elapsed, attempts = counter.load(Ordering::Relaxed), "Provider call finished");
        result
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn temperature(&self) -> f32 {
        self.temperature
    }
}

/// Completion provider returning queued or canned responses
pub struct MockCompletionProvider {
    model: String,
    queued: Mutex<VecDeque<Result<String>>>,
    fallback: String,
    calls: AtomicUsize,
}

impl MockCompletionProvider {
    /// Always answers with `response`
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            model: "mock".to_string(),
            queued: Mutex::new(VecDeque::new()),
            fallback: response.into(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Answers with a structurally valid study set for the default bounds
    pub fn valid() -> Self {
        Self::new(canned_questions())
    }

    /// Queue a one-off response served before the fallback
    pub async fn push(&self, response: Result<String>) {
        self.queued.lock().await.push_back(response);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    async fn complete(&self, _prompt: &Prompt) -> Result<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        match self.queued.lock().await.pop_front() {
            Some(response) => response,
            None => Ok(self.fallback.clone()),
        }
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn temperature(&self) -> f32 {
        0.0
    }
}

/// Four recall, four translation and two trivia questions
pub fn canned_questions() -> String {
    let mut questions = Vec::new();
    for i in 0..4 {
        questions.push(serde_json::json!({
            "type": "recall",
            "prompt": format!("Which word completes line {}?", i + 1),
            "options": ["uno", "dos", "tres"],
            "correctIndex": i % 3,
        }));
    }
    for i in 0..4 {
        questions.push(serde_json::json!({
            "type": "translation",
            "prompt": format!("What does line {} mean?", i + 1),
            "options": ["hello", "goodbye", "thank you", "please"],
            "correctIndex": i % 4,
            "explanation": "Common greeting vocabulary",
        }));
    }
    for i in 0..2 {
        questions.push(serde_json::json!({
            "type": "trivia",
            "prompt": format!("Trivia question {}", i + 1),
            "options": ["true", "false"],
            "correctIndex": 0,
        }));
    }
    serde_json::json!({ "questions": questions }).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prompt() -> Prompt {
        Prompt {
            system: "sys".into(),
            user: "usr".into(),
        }
    }

    fn provider(server: &MockServer, max_retries: u32) -> OpenAiProvider {
        OpenAiProvider::new(
            "sk-test".into(),
            Some(format!("{}/v1/", server.uri())),
            "gpt-test".into(),
            0.4,
            max_retries,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn completion(content: &str) -> serde_json::Value {
        json!({ "choices": [ { "message": { "role": "assistant", "content": content } } ] })
    }

    #[tokio::test]
    async fn test_sends_json_mode_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "gpt-test",
                "response_format": { "type": "json_object" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("{\"questions\":[]}")))
            .expect(1)
            .mount(&server)
            .await;

        let text = provider(&server, 2).complete(&prompt()).await.unwrap();
        assert_eq!(text, "{\"questions\":[]}");
    }

    #[tokio::test]
    async fn test_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&server)
            .await;

        assert_eq!(provider(&server, 2).complete(&prompt()).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_client_errors_are_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad model"))
            .expect(1)
            .mount(&server)
            .await;

        let err = provider(&server, 3).complete(&prompt()).await.unwrap_err();
        assert!(matches!(err, AppError::ProviderError { .. }));
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        assert!(provider(&server, 1).complete(&prompt()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_serves_queue_then_fallback() {
        let mock = MockCompletionProvider::new("fallback");
        mock.push(Ok("first".into())).await;

        assert_eq!(mock.complete(&prompt()).await.unwrap(), "first");
        assert_eq!(mock.complete(&prompt()).await.unwrap(), "fallback");
        assert_eq!(mock.calls(), 2);
    }
}
