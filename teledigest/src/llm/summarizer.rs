// Chunk summarizer: one corpus chunk in, a JSON array of report sections out.
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::{extract_json_array_from_text, ChunkSummarizer, LlmProvider, LlmRequest};

const PROMPT_HEADER: &str = r#"You are an analyst preparing a daily digest from channel posts.
Group the posts below into thematic sections. Keep the original language of the posts.

OUTPUT FORMAT (strict JSON array, nothing else):
[
  {
    "title": "section title",
    "data": [
      {
        "subtitle": "topic within the section",
        "items": [
          { "text": "summary of one or more posts", "images": ["image URL taken from the posts"], "figureCaption": "optional caption" }
        ]
      }
    ]
  }
]

Only use image URLs that appear in the posts. Omit "images" when a summary has none.

POSTS:
"#;

/// [`ChunkSummarizer`] backed by an [`LlmProvider`].
pub struct LlmChunkSummarizer {
    provider: Arc<dyn LlmProvider>,
    max_tokens: Option<usize>,
}

impl LlmChunkSummarizer {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            provider,
            max_tokens: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

pub fn build_prompt(chunk: &str) -> String {
    format!("{}{}", PROMPT_HEADER, chunk)
}

/// Parse the model's reply into result objects. The reply must contain a JSON array.
pub fn parse_results(content: &str) -> Result<Vec<Value>> {
    let json = extract_json_array_from_text(content)
        .ok_or_else(|| anyhow!("No JSON array found in LLM response"))?;
    let results: Vec<Value> = serde_json::from_str(&json)
        .with_context(|| {
            format!("Failed to parse LLM response as a JSON array. Input was: {}", json)
        })?;
    Ok(results)
}

#[async_trait::async_trait]
impl ChunkSummarizer for LlmChunkSummarizer {
    async fn summarize_chunk(&self, chunk: &str) -> Result<Vec<Value>> {
        let response = self
            .provider
            .generate(LlmRequest {
                prompt: build_prompt(chunk),
                max_tokens: self.max_tokens,
                temperature: Some(0.3),
                ..Default::default()
            })
            .await?;

        let results = parse_results(&response.content)?;
        info!(
            "LLM chunk summarization successful: {} sections, {} tokens",
            results.len(),
            response.usage.total_tokens
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResponse, UsageMetadata};
    use serde_json::json;
    use std::sync::Mutex;

    struct CannedProvider {
        reply: String,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl LlmProvider for CannedProvider {
        async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
            self.prompts.lock().unwrap().push(request.prompt);
            Ok(LlmResponse {
                content: self.reply.clone(),
                usage: UsageMetadata::default(),
                model: "canned".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn prompt_embeds_chunk_and_reply_is_parsed() {
        let provider = Arc::new(CannedProvider {
            reply: "```json\n[{\"title\": \"Economy\", \"data\": []}]\n```".to_string(),
            prompts: Mutex::new(Vec::new()),
        });
        let summarizer = LlmChunkSummarizer::new(provider.clone());

        let results = summarizer.summarize_chunk("Source: alpha\n...").await.unwrap();
        assert_eq!(results, vec![json!({"title": "Economy", "data": []})]);
        assert!(provider.prompts.lock().unwrap()[0].ends_with("Source: alpha\n..."));
    }

    #[test]
    fn reply_without_array_is_an_error() {
        assert!(parse_results("I cannot help with that").is_err());
        assert!(parse_results("[not json]").is_err());
        assert!(parse_results("{\"title\": \"object, not array\"}").is_err());
    }
}
