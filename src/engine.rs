use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::GenerationParams;
use crate::error::{GatewayError, Result};
use crate::sse::{parse_sse_line, LineBuffer, StreamEvent, Token};

/// Tokens as they come off the upstream, in order. Finite; not restartable.
pub type TokenStream = BoxStream<'static, Result<Token>>;

/// Remote text-generation service.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Opens a token stream for `prompt`. Errors here mean the stream never started.
    async fn stream(&self, prompt: &str, params: &GenerationParams) -> Result<TokenStream>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Remote text-to-image service.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        negative_prompt: &str,
    ) -> Result<GeneratedImage>;
}

/// Text-generation-inference endpoint speaking SSE.
pub struct HfTextGenerator {
    client: Client,
    endpoint: String,
    api_token: String,
}

impl HfTextGenerator {
    pub fn new(endpoint: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            api_token: api_token.into(),
        }
    }
}

#[async_trait]
impl TextGenerator for HfTextGenerator {
    async fn stream(&self, prompt: &str, params: &GenerationParams) -> Result<TokenStream> {
        let body = json!({
            "inputs": prompt,
            "parameters": {
                "max_new_tokens": params.max_new_tokens,
                "do_sample": params.do_sample,
                "return_full_text": params.return_full_text,
            },
            "stream": true,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        // The reader stops at its next send once the consumer drops the stream.
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut lines = LineBuffer::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(GatewayError::Http(e))).await;
                        return;
                    }
                };
                for line in lines.push(&chunk) {
                    if !forward_line(&tx, &line).await {
                        return;
                    }
                }
            }

            if let Some(rest) = lines.finish() {
                forward_line(&tx, &rest).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Returns `false` once nothing more should be read.
async fn forward_line(tx: &mpsc::Sender<Result<Token>>, line: &str) -> bool {
    match parse_sse_line(line) {
        Some(StreamEvent::Token(token)) => tx.send(Ok(token)).await.is_ok(),
        Some(StreamEvent::Error(message)) => {
            let _ = tx.send(Err(GatewayError::Stream(message))).await;
            false
        }
        None => true,
    }
}

/// Inference API text-to-image models, one blob per call.
pub struct HfImageGenerator {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HfImageGenerator {
    pub fn new(base_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
            api_token: api_token.into(),
        }
    }
}

#[async_trait]
impl ImageGenerator for HfImageGenerator {
    async fn generate(
        &self,
        prompt: &str,
        model: &str,
        negative_prompt: &str,
    ) -> Result<GeneratedImage> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), model);
        let body = json!({
            "inputs": prompt,
            "parameters": { "negative_prompt": negative_prompt },
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = response.bytes().await?.to_vec();

        Ok(GeneratedImage {
            content_type,
            bytes,
        })
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Upstream {
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory upstreams for handler and relay tests.

    use super::*;
    use futures_util::stream;
    use parking_lot::Mutex;

    /// Replays a fixed token script; records every prompt it was asked for.
    #[derive(Default)]
    pub struct ScriptedText {
        pub script: Vec<Result<String, String>>,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedText {
        pub fn new(tokens: &[&str]) -> Self {
            Self {
                script: tokens.iter().map(|t| Ok(t.to_string())).collect(),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedText {
        async fn stream(&self, prompt: &str, _params: &GenerationParams) -> Result<TokenStream> {
            self.prompts.lock().push(prompt.to_string());
            let items: Vec<Result<Token>> = self
                .script
                .iter()
                .map(|item| match item {
                    Ok(text) => Ok(Token::text(text.clone())),
                    Err(message) => Err(GatewayError::Stream(message.clone())),
                })
                .collect();
            Ok(stream::iter(items).boxed())
        }
    }

    /// Returns a fixed image, or fails when `fail` is set.
    #[derive(Default)]
    pub struct FixedImage {
        pub fail: bool,
        pub prompts: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ImageGenerator for FixedImage {
        async fn generate(
            &self,
            prompt: &str,
            model: &str,
            negative_prompt: &str,
        ) -> Result<GeneratedImage> {
            self.prompts.lock().push((
                prompt.to_string(),
                model.to_string(),
                negative_prompt.to_string(),
            ));
            if self.fail {
                return Err(GatewayError::Upstream {
                    status: 503,
                    body: "model is loading".to_string(),
                });
            }
            Ok(GeneratedImage {
                content_type: "image/jpeg".to_string(),
                bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
            })
        }
    }
}
