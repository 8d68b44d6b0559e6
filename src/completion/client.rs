//! Gemini streaming client

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use secrecy::{ExposeSecret, SecretString};

use crate::config::{CompletionConfig, NetworkConfig};
use crate::conversation::Utterance;
use crate::{Error, Result};

use super::prompt::build_contents;
use super::sse::{SseDecoder, SseLine};
use super::types::{Attachment, Content, GenerateChunk, GenerateRequest, GenerationConfig};

/// Ordered stream of reply fragments
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// The message being answered
#[derive(Debug, Clone)]
pub struct UserMessage {
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl UserMessage {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachment: None,
        }
    }
}

/// Everything a backend needs to produce one reply
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// Persona instruction
    pub system_prompt: String,
    /// Prior conversation, oldest first, excluding `message`
    pub history: Vec<Utterance>,
    /// The new user message
    pub message: UserMessage,
}

/// A source of streamed completions
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Open a reply stream
    ///
    /// Fragments arrive in generation order. A transport failure after the
    /// stream opened is yielded as the final `Err` item.
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be sent or the backend rejects it
    async fn stream_completion(&self, request: CompletionRequest) -> Result<FragmentStream>;
}

/// Gemini `streamGenerateContent` client
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
    generation: GenerationConfig,
    history_turns: usize,
}

impl GeminiClient {
    /// Create a client with default generation parameters
    ///
    /// # Errors
    ///
    /// Returns error if the API key is empty
    pub fn new(client: reqwest::Client, api_key: SecretString, model: impl Into<String>) -> Result<Self> {
        if api_key.expose_secret().is_empty() {
            return Err(Error::Config(
                "Gemini API key required for completions".to_string(),
            ));
        }

        Ok(Self {
            client,
            api_key,
            base_url: crate::config::DEFAULT_COMPLETION_BASE_URL.to_string(),
            model: model.into(),
            generation: GenerationConfig::default(),
            history_turns: 10,
        })
    }

    /// Create a client from configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the HTTP client cannot be built
    pub fn from_config(config: &CompletionConfig, network: &NetworkConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| Error::Config("GEMINI_API_KEY not set".to_string()))?;

        Ok(Self::new(network.http_client()?, api_key, config.model.clone())?
            .with_base_url(config.base_url.clone())
            .with_generation(GenerationConfig {
                max_output_tokens: config.max_output_tokens,
                temperature: config.temperature,
                top_p: config.top_p,
            })
            .with_history_turns(config.history_turns))
    }

    /// Override the API base URL
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[must_use]
    pub const fn with_generation(mut self, generation: GenerationConfig) -> Self {
        self.generation = generation;
        self
    }

    /// Number of prior turns sent with each request
    #[must_use]
    pub const fn with_history_turns(mut self, turns: usize) -> Self {
        self.history_turns = turns;
        self
    }

    /// Build the wire request for a completion
    #[must_use]
    pub fn build_request(&self, request: &CompletionRequest) -> GenerateRequest {
        let system_instruction = if request.system_prompt.trim().is_empty() {
            None
        } else {
            Some(Content::text("system", request.system_prompt.clone()))
        };

        GenerateRequest {
            contents: build_contents(
                &request.history,
                self.history_turns,
                &request.message.text,
                request.message.attachment.as_ref(),
            ),
            system_instruction,
            generation_config: self.generation,
        }
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

/// Extract fragment text from one `data:` payload
fn parse_payload(payload: &str) -> Option<String> {
    match serde_json::from_str::<GenerateChunk>(payload) {
        Ok(chunk) => chunk.text(),
        Err(e) => {
            tracing::trace!(error = %e, "skipping malformed completion chunk");
            None
        }
    }
}

#[async_trait]
impl CompletionBackend for GeminiClient {
    async fn stream_completion(&self, request: CompletionRequest) -> Result<FragmentStream> {
        let body = self.build_request(&request);

        tracing::debug!(
            model = %self.model,
            history = body.contents.len() - 1,
            "opening completion stream"
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status, "completion request rejected");
            return Err(Error::Upstream {
                service: "completion",
                status,
                body,
            });
        }

        let mut bytes = response.bytes_stream();

        let stream = async_stream::stream! {
            let mut decoder = SseDecoder::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        tracing::warn!(error = %e, "completion stream interrupted");
                        yield Err(Error::Http(e));
                        return;
                    }
                };

                for line in decoder.push(&chunk) {
                    match line {
                        SseLine::Done => return,
                        SseLine::Data(payload) => {
                            if let Some(text) = parse_payload(&payload) {
                                yield Ok(text);
                            }
                        }
                    }
                }
            }

            if let Some(SseLine::Data(payload)) = decoder.finish() {
                if let Some(text) = parse_payload(&payload) {
                    yield Ok(text);
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GeminiClient {
        GeminiClient::new(
            reqwest::Client::new(),
            SecretString::from("test-key".to_string()),
            "gemini-2.0-flash-exp",
        )
        .unwrap()
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = GeminiClient::new(
            reqwest::Client::new(),
            SecretString::from(String::new()),
            "m",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_endpoint() {
        let client = client().with_base_url("http://localhost:9000/v1beta/");
        assert_eq!(
            client.endpoint(),
            "http://localhost:9000/v1beta/models/gemini-2.0-flash-exp:streamGenerateContent?alt=sse"
        );
    }

    #[test]
    fn test_build_request_truncates_history() {
        let client = client().with_history_turns(2);
        let history = vec![
            Utterance::user("one"),
            Utterance::assistant("two"),
            Utterance::user("three"),
        ];
        let request = client.build_request(&CompletionRequest {
            system_prompt: "persona".to_string(),
            history,
            message: UserMessage::text("four"),
        });

        let texts: Vec<_> = request
            .contents
            .iter()
            .map(|c| c.parts[0].text.clone().unwrap_or_default())
            .collect();
        assert_eq!(texts, vec!["two", "three", "four"]);
        assert!(request.system_instruction.is_some());
    }

    #[test]
    fn test_parse_payload_skips_garbage() {
        assert!(parse_payload("{not json").is_none());
        assert_eq!(
            parse_payload(r#"{"candidates":[{"content":{"parts":[{"text":"hi"}]}}]}"#).as_deref(),
            Some("hi")
        );
    }
}
