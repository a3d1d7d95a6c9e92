//! HTTP completion client for OpenAI-compatible chat endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::completion::{Completion, CompletionError, CompletionRequest};

/// Client for `POST {base}/v1/chat/completions`.
pub struct HttpCompletion {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    n: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl HttpCompletion {
    /// `base_url` should be like `https://api.openai.com` (trailing slash is trimmed).
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        let base_url = base_url.trim_end_matches('/').to_string();
        info!(url = %base_url, "completion endpoint");
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

fn chat_request(request: &CompletionRequest) -> ChatRequest<'_> {
    ChatRequest {
        model: &request.model,
        messages: [ChatMessage {
            role: "user",
            content: &request.prompt,
        }],
        n: request.samples.max(1),
        temperature: request.temperature,
        max_tokens: request.max_tokens,
    }
}

fn choices(response: ChatResponse) -> Result<Vec<String>, CompletionError> {
    if response.choices.is_empty() {
        return Err(CompletionError::Empty);
    }
    Ok(response
        .choices
        .into_iter()
        .map(|c| c.message.content.unwrap_or_default())
        .collect())
}

#[async_trait]
impl Completion for HttpCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<Vec<String>, CompletionError> {
        let url = self.endpoint();
        debug!(url = %url, model = %request.model, n = request.samples, "requesting completion");

        let mut builder = self.client.post(&url).json(&chat_request(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CompletionError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = resp.json().await?;
        choices(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_trailing_slash() {
        let client = HttpCompletion::new("http://localhost:8000/".into(), None);
        assert_eq!(client.endpoint(), "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn request_body_shape() {
        let mut request = CompletionRequest::new("gpt-3.5-turbo", "Say hi");
        request.samples = 3;
        let json = serde_json::to_value(chat_request(&request)).unwrap();
        assert_eq!(json["model"], "gpt-3.5-turbo");
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "Say hi");
        assert_eq!(json["n"], 3);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn response_choices_in_order() {
        let raw = r#"{"choices": [
            {"message": {"role": "assistant", "content": "first"}},
            {"message": {"role": "assistant", "content": null}},
            {"message": {"role": "assistant", "content": "third"}}
        ]}"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(choices(parsed).unwrap(), vec!["first", "", "third"]);
    }

    #[test]
    fn no_choices_is_an_error() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(matches!(choices(parsed), Err(CompletionError::Empty)));
    }
}
