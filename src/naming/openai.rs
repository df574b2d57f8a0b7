//! Name suggestions from an OpenAI-compatible chat completion API.
//!
//! This also works with LiteLLM, Ollama and other compatible gateways, via
//! `OPENAI_API_BASE`.

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs,
    },
};
use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};
use tokio::time;

use crate::{
    prelude::*,
    retry::{
        IntoRetryResult as _, IsKnownTransient as _, retry_result_ok, try_with_retry_result,
    },
};

use super::{NameSuggester, NamingOpts};

/// Instructions for the model.
const SYSTEM_PROMPT: &str = "You are a file naming assistant. Generate a descriptive \
filename based on the content provided. Use only alphanumeric characters and underscores. \
Do not include spaces or special characters. Do not include any explanation, just output \
the filename without extension.";

/// Create an OpenAI-compatible client configured from the environment.
fn create_llm_client() -> Client<OpenAIConfig> {
    let mut client_config = OpenAIConfig::new();
    if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
        client_config = client_config.with_api_key(api_key);
    }
    if let Ok(api_base) = std::env::var("OPENAI_API_BASE") {
        client_config = client_config.with_api_base(api_base);
    }
    Client::with_config(client_config)
}

/// Asks a chat model to name a document.
#[derive(Debug)]
pub struct OpenAiSuggester {
    client: Client<OpenAIConfig>,
    opts: NamingOpts,
}

impl OpenAiSuggester {
    /// Create a new suggester.
    pub fn new(opts: NamingOpts) -> Self {
        Self {
            client: create_llm_client(),
            opts,
        }
    }

    /// Turn document text into a chat request.
    fn build_request(&self, text: &str) -> Result<CreateChatCompletionRequest> {
        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(text)
                .build()?
                .into(),
        ];
        CreateChatCompletionRequestArgs::default()
            .model(self.opts.model.clone())
            .messages(messages)
            .max_completion_tokens(self.opts.max_completion_tokens)
            .temperature(self.opts.temperature)
            .build()
            .context("Error building request")
    }

    /// Make a single request.
    async fn suggest_once(
        &self,
        req: &CreateChatCompletionRequest,
    ) -> RetryResult<(), (), String, anyhow::Error> {
        let chat = self.client.chat();
        let response =
            match time::timeout(self.opts.timeout(), chat.create(req.clone())).await {
                Ok(result) => try_with_retry_result!(
                    result.into_retry_result(|err| err.is_known_transient())
                ),
                Err(_) => {
                    return RetryResult::Transient {
                        input: (),
                        error: anyhow!(
                            "name request timed out after {}s",
                            self.opts.timeout
                        ),
                    };
                }
            };
        trace!(?response, "OpenAI response");

        let Some(content) = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
        else {
            return Err(anyhow!("No content in OpenAI response")).into_fatal();
        };
        let name = content.trim();
        if name.is_empty() {
            // Give the model another chance.
            return Err(anyhow!("OpenAI returned an empty name")).into_transient();
        }
        debug!(%name, "Generated name");
        retry_result_ok(name.to_owned())
    }
}

#[async_trait]
impl NameSuggester for OpenAiSuggester {
    #[instrument(level = "debug", skip_all, fields(model = %self.opts.model))]
    async fn suggest_name(&self, text: &str) -> Result<String> {
        let req = self.build_request(text)?;

        // If we have a transient failure, back off exponentially.
        let jitter = ExponentialJitter::FromBackoffRange {
            backoff_range_millis: 1..=30_000,
            re_attempts: 5,
            jitter_ratio: 0.2,
        };

        let result = self
            .suggest_once(&req)
            .await
            .retry_with_async(|_| async { self.suggest_once(&req).await })
            .with_exponential_jitter(|| jitter)
            .await
            .inspect_recovered(|_, _, retry_errors_list| {
                warn!(
                    "suceeded after retrying {} times (failed attempts: [{}])",
                    retry_errors_list.len(),
                    keen_retry::loggable_retry_errors(retry_errors_list)
                )
            })
            .inspect_given_up(|_, retry_errors_list, fatal_error| {
                error!(
                    "FAILED after exhausting all {} retrying attempts with error {fatal_error:?}. Previous transient failures: [{}]",
                    retry_errors_list.len(),
                    keen_retry::loggable_retry_errors(retry_errors_list)
                )
            });
        match result {
            ResolvedResult::Ok { output, .. } | ResolvedResult::Recovered { output, .. } => {
                Ok(output)
            }
            ResolvedResult::Fatal { error, .. } => Err(error),
            ResolvedResult::GivenUp { fatal_error, .. }
            | ResolvedResult::Unrecoverable { fatal_error, .. } => Err(fatal_error),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_openai::types::ChatCompletionRequestSystemMessageContent;

    use super::*;

    #[test]
    fn builds_requests_from_opts() -> Result<()> {
        let suggester = OpenAiSuggester::new(NamingOpts::default());
        let req = suggester.build_request("Invoice #42 from ACME")?;
        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.max_completion_tokens, Some(50));
        assert_eq!(req.temperature, Some(0.7));
        assert_eq!(req.messages.len(), 2);
        let ChatCompletionRequestMessage::System(system) = &req.messages[0] else {
            panic!("expected a system message first");
        };
        assert!(matches!(
            &system.content,
            ChatCompletionRequestSystemMessageContent::Text(text) if text.contains("underscores")
        ));
        Ok(())
    }

    #[tokio::test]
    #[ignore = "Requires OPENAI_API_KEY and network access"]
    async fn suggests_a_name() -> Result<()> {
        let suggester = OpenAiSuggester::new(NamingOpts::default());
        let name = suggester
            .suggest_name("ACME Power Company. Electricity bill for March 2024.")
            .await?;
        assert!(!name.is_empty());
        Ok(())
    }
}
