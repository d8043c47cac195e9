use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::completion::{ChatMessage, CompletionProvider, CompletionRequest};
use crate::config::ResolvedApiConfiguration;
use crate::error::{ChatError, Result};

const REQUEST_TIMEOUT_SECS: u64 = 60; // 60 second timeout for API requests
const CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions against one Azure OpenAI deployment.
pub struct AzureOpenAIClient {
    client: Client,
    config: ResolvedApiConfiguration,
}

impl AzureOpenAIClient {
    pub fn new(config: ResolvedApiConfiguration) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ChatError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn deployment(&self) -> &str {
        &self.config.deployment
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint, self.config.deployment, self.config.api_version
        )
    }

    async fn post(&self, body: &ChatCompletionRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.completions_url())
            .header("api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;
        Ok(response)
    }

    pub async fn chat_completion(&self, request: CompletionRequest) -> Result<String> {
        let body = ChatCompletionRequest {
            messages: &request.messages,
            max_tokens: None,
            response_format: request.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self.post(&body).await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(ChatError::Provider(format!(
                "Azure OpenAI error ({}): {}",
                status, error_text
            )));
        }

        let completion: ChatCompletionResponse = response.json().await?;

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    /// One tiny request to prove the endpoint, key and deployment work.
    pub async fn validate_api_key(&self) -> Result<bool> {
        let messages = vec![ChatMessage::user("Say 'ok'")];
        let body = ChatCompletionRequest {
            messages: &messages,
            max_tokens: Some(5),
            response_format: None,
        };

        let response = self.post(&body).await?;

        if response.status().is_success() {
            return Ok(true);
        }

        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();

        match status.as_u16() {
            401 => Err(ChatError::Configuration("Invalid API key".to_string())),
            404 => Err(ChatError::Configuration(format!(
                "Deployment '{}' not found",
                self.config.deployment
            ))),
            429 => Err(ChatError::Provider(
                "Rate limited - too many requests".to_string(),
            )),
            _ => Err(ChatError::Provider(format!(
                "API error ({}): {}",
                status, error_text
            ))),
        }
    }
}

#[async_trait]
impl CompletionProvider for AzureOpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<String> {
        self.chat_completion(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> AzureOpenAIClient {
        AzureOpenAIClient::new(ResolvedApiConfiguration {
            endpoint: "https://example.openai.azure.com".to_string(),
            api_key: "key".to_string(),
            deployment: "gpt-4o".to_string(),
            api_version: "2024-02-15-preview".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_completions_url() {
        assert_eq!(
            client().completions_url(),
            "https://example.openai.azure.com/openai/deployments/gpt-4o/chat/completions?api-version=2024-02-15-preview"
        );
    }

    #[test]
    fn test_json_mode_request_body() {
        let messages = vec![ChatMessage::system("sys"), ChatMessage::user("hi")];
        let body = ChatCompletionRequest {
            messages: &messages,
            max_tokens: None,
            response_format: Some(ResponseFormat {
                kind: "json_object",
            }),
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["response_format"]["type"], "json_object");
        assert_eq!(value["messages"][0]["role"], "system");
        assert!(value.get("max_tokens").is_none());
    }

    #[test]
    fn test_missing_content_parses() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":null}}]}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert!(parsed.choices[0].message.content.is_none());
    }
}
