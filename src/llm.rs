use std::io::ErrorKind;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// A chat-completion backend: one system instruction, one user message, one reply.
pub trait ChatClient {
    fn complete(&self, system: &str, user: &str) -> Result<String>;
}

/// Check that a credential is present and shaped like an API key.
pub fn validate_credential(credential: Option<&str>) -> Result<&str> {
    static KEY_PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = KEY_PATTERN
        .get_or_init(|| Regex::new(r"^sk-[A-Za-z0-9_\-]+$").expect("static key pattern is valid"));

    let key = credential
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| Error::Configuration("API key is not set".to_string()))?;
    if !pattern.is_match(key) {
        return Err(Error::Configuration(
            "API key has an unexpected format (expected it to start with 'sk-')".to_string(),
        ));
    }
    Ok(key)
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: AssistantMessage,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().build(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        let mut builder = ureq::AgentBuilder::new();
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        self.agent = builder.build();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl ChatClient for OpenAiClient {
    fn complete(&self, system: &str, user: &str) -> Result<String> {
        let key = validate_credential(self.api_key.as_deref())?;

        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.temperature,
        };

        info!(model = %self.model, prompt_bytes = user.len(), "requesting review");

        let response = self
            .agent
            .post(&self.endpoint())
            .set("Authorization", &format!("Bearer {key}"))
            .set("Content-Type", "application/json")
            .send_json(&request)
            .map_err(classify_error)?;

        let body: ChatResponse = response
            .into_json()
            .map_err(|e| Error::Network(format!("failed to read review response: {e}")))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Service {
                status: 200,
                message: "response contained no completion text".to_string(),
            })?;

        debug!(response_bytes = text.len(), "review received");
        Ok(text)
    }
}

fn classify_error(err: ureq::Error) -> Error {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = service_message(&body);
            match status {
                401 => Error::Authentication(message),
                429 => Error::RateLimit(message),
                _ => Error::Service { status, message },
            }
        }
        ureq::Error::Transport(transport) => {
            if is_timeout(&transport) {
                Error::Timeout(format!("review request: {transport}"))
            } else {
                Error::Network(transport.to_string())
            }
        }
    }
}

/// The service's own error message when the body carries one, otherwise the raw body.
fn service_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn is_timeout(transport: &ureq::Transport) -> bool {
    let mut source = std::error::Error::source(transport);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>()
            && matches!(io.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock)
        {
            return true;
        }
        source = err.source();
    }
    false
}

/// Send one prompt with the fixed system instruction.
pub fn review<C: ChatClient + ?Sized>(client: &C, system: &str, prompt: &str) -> Result<String> {
    client.complete(system, prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_credential_ok() {
        assert_eq!(validate_credential(Some("sk-abc_123-XYZ")).unwrap(), "sk-abc_123-XYZ");
        assert_eq!(validate_credential(Some("  sk-proj-abc \n")).unwrap(), "sk-proj-abc");
    }

    #[test]
    fn test_validate_credential_missing() {
        let err = validate_credential(None).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        let err = validate_credential(Some("   ")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_validate_credential_wrong_prefix() {
        let err = validate_credential(Some("pk-live-123")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("sk-"));
    }

    #[test]
    fn test_service_message_prefers_json_error() {
        let body = r#"{"error":{"message":"model overloaded","type":"server_error"}}"#;
        assert_eq!(service_message(body), "model overloaded");
        assert_eq!(service_message("  Bad Gateway \n"), "Bad Gateway");
    }

    #[test]
    fn test_endpoint_strips_trailing_slash() {
        let client = OpenAiClient::new(None).with_base_url("http://localhost:1234/v1/");
        assert_eq!(client.endpoint(), "http://localhost:1234/v1/chat/completions");
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "m",
            messages: vec![ChatMessage {
                role: "user",
                content: "hi",
            }],
            temperature: 0.1,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["model"], "m");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
        assert!(json["temperature"].as_f64().unwrap() < 0.2);
    }
}
