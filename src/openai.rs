//! Chat-completion client for OpenAI-compatible APIs.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::session::Message;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Model and sampling settings sent with every completion.
#[derive(Debug, Clone, PartialEq)]
pub struct Engine {
    pub model: String,
    /// 0.0 to 2.0, higher is more random.
    pub temperature: f32,
}

impl Default for Engine {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
        }
    }
}

/// Anything that can turn a message sequence into one reply.
pub trait CompletionClient: Send + Sync {
    fn complete(
        &self,
        engine: &Engine,
        messages: &[Message],
    ) -> impl Future<Output = Result<String, Error>> + Send;
}

pub struct OpenAiClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

fn build_request<'a>(engine: &'a Engine, messages: &'a [Message]) -> ApiRequest<'a> {
    ApiRequest {
        model: &engine.model,
        messages: messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect(),
        temperature: engine.temperature,
    }
}

fn parse_response(body: &str) -> Result<String, Error> {
    let response: ApiResponse =
        serde_json::from_str(body).map_err(|e| Error::Parse(e.to_string()))?;

    response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or(Error::Empty)
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: impl Into<String>) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;

        Ok(Self {
            api_key,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

impl CompletionClient for OpenAiClient {
    async fn complete(&self, engine: &Engine, messages: &[Message]) -> Result<String, Error> {
        let request = build_request(engine, messages);
        debug!(model = %engine.model, messages = messages.len(), "Requesting completion");

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        if !status.is_success() {
            return Err(Error::Api(format!("{status}: {body}")));
        }

        parse_response(&body)
    }
}

#[derive(Debug)]
pub enum Error {
    Http(String),
    Api(String),
    Parse(String),
    Empty,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Api(e) => write!(f, "API error: {e}"),
            Error::Parse(e) => write!(f, "Parse error: {e}"),
            Error::Empty => write!(f, "Empty response"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Role;

    #[test]
    fn test_request_body_shape() {
        let engine = Engine {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
        };
        let messages = vec![
            Message::new(Role::System, "be brief"),
            Message::new(Role::User, "hi"),
            Message::new(Role::Assistant, "hello"),
        ];

        let json = serde_json::to_value(build_request(&engine, &messages)).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert!((json["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-6);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["messages"][2]["role"], "assistant");
        assert_eq!(json["messages"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_parse_first_choice() {
        let body = r#"{"choices":[
            {"message":{"role":"assistant","content":"first"}},
            {"message":{"role":"assistant","content":"second"}}
        ]}"#;
        assert_eq!(parse_response(body).unwrap(), "first");
    }

    #[test]
    fn test_parse_no_choices() {
        let err = parse_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, Error::Empty));
    }

    #[test]
    fn test_parse_null_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        assert!(matches!(parse_response(body), Err(Error::Empty)));
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(parse_response("not json"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = OpenAiClient::new("key".into(), "http://localhost:8080/v1/").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080/v1");
    }
}
