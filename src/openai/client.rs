//! OpenAI HTTP client

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use super::models::*;
use crate::config::ServiceSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::services::{ContentGenerator, ImageGenerator};
use crate::utils::http::{build_client, check_status, send_error};

const SERVICE: &str = "openai";

/// HTTP client for chat completions and image generation
#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    api_key: String,
    chat_model: String,
    image_model: String,
    http_client: Client,
}

impl OpenAiClient {
    pub fn new(settings: &ServiceSettings, api_key: &str) -> PipelineResult<Self> {
        Ok(Self {
            base_url: settings.openai_base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            chat_model: settings.chat_model.clone(),
            image_model: settings.image_model.clone(),
            http_client: build_client()?,
        })
    }
}

#[async_trait]
impl ContentGenerator for OpenAiClient {
    async fn complete_json(&self, system: &str, user: &str, user_tag: &str) -> PipelineResult<Value> {
        let request = ChatRequest {
            model: &self.chat_model,
            response_format: ResponseFormat { kind: "json_object" },
            user: user_tag,
            messages: vec![
                ChatMessage { role: "system", content: system },
                ChatMessage { role: "user", content: user },
            ],
        };
        debug!("Requesting chat completion ({} prompt chars)", system.len() + user.len());

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        let response: ChatResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, None, format!("Failed to parse completion: {e}")))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| PipelineError::InvalidGenerationResponse("completion has no content".into()))?;

        serde_json::from_str(&content)
            .map_err(|e| PipelineError::InvalidGenerationResponse(format!("completion is not JSON: {e}")))
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str, user_tag: &str) -> PipelineResult<Option<String>> {
        let request = ImageRequest {
            model: &self.image_model,
            prompt,
            n: 1,
            size: "1024x1024",
            response_format: "url",
            quality: "hd",
            user: user_tag,
        };
        debug!("Requesting cover image");

        let response = self
            .http_client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| send_error(SERVICE, e))?;

        // Prompts rejected by the content filter come back as 400
        if response.status() == reqwest::StatusCode::BAD_REQUEST {
            match response.text().await {
                Ok(body) => warn!("Image generation declined: {}", body),
                Err(e) => warn!("Image generation declined, failed to read the reason: {}", e),
            }
            return Ok(None);
        }

        let response: ImageResponse = check_status(SERVICE, response)
            .await?
            .json()
            .await
            .map_err(|e| PipelineError::upstream(SERVICE, None, format!("Failed to parse image response: {e}")))?;

        Ok(response.data.into_iter().next().and_then(|d| d.url))
    }

    async fn download(&self, url: &str) -> PipelineResult<Bytes> {
        debug!("Downloading generated image");

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| send_error("image download", e))?;

        check_status("image download", response)
            .await?
            .bytes()
            .await
            .map_err(|e| PipelineError::upstream("image download", None, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Answer a single request on a local port with `response`, verbatim
    async fn serve_once(response: &'static str) -> OpenAiClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        });

        OpenAiClient {
            base_url: format!("http://{addr}/v1"),
            api_key: "sk-test".into(),
            chat_model: "gpt-4o".into(),
            image_model: "dall-e-3".into(),
            http_client: Client::builder().no_proxy().build().unwrap(),
        }
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf);
            let Some(end) = text.find("\r\n\r\n") else {
                continue;
            };
            let length = text[..end]
                .lines()
                .find_map(|line| {
                    let lower = line.to_ascii_lowercase();
                    lower
                        .strip_prefix("content-length:")
                        .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                })
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_declined_prompt_means_no_cover() {
        let body = r#"{"error":{"message":"Your request was rejected by our safety system"}}"#;
        let response: &'static str = Box::leak(
            format!("HTTP/1.1 400 Bad Request\r\ncontent-length: {}\r\n\r\n{}", body.len(), body).into_boxed_str(),
        );
        let client = serve_once(response).await;

        assert_matches!(ImageGenerator::generate(&client, "a bike", "1").await, Ok(None));
    }

    #[tokio::test]
    async fn test_declined_prompt_with_unreadable_body_means_no_cover() {
        // Connection closes before the promised body arrives
        let client =
            serve_once("HTTP/1.1 400 Bad Request\r\ncontent-length: 64\r\nconnection: close\r\n\r\n{\"error\"").await;

        assert_matches!(ImageGenerator::generate(&client, "a bike", "1").await, Ok(None));
    }

    #[tokio::test]
    async fn test_revoked_key_is_not_retried() {
        let client = serve_once(
            "HTTP/1.1 401 Unauthorized\r\ncontent-length: 47\r\n\r\n{\"error\":{\"message\":\"Incorrect API key given\"}}",
        )
        .await;

        let err = client.complete_json("system", "user", "1").await.unwrap_err();
        assert_matches!(err, PipelineError::Rejected { status: 401, .. });
        assert!(!err.is_retryable());
        assert!(err.to_string().ends_with("Incorrect API key given"));
    }
}
