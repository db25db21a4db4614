use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Core trait for LLM providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate completion for a given prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Turns one chunk of the post corpus into result objects.
///
/// The objects are opaque to the pipeline and passed through unchanged. An error means the
/// chunk could not be processed and aborts the run.
#[async_trait::async_trait]
pub trait ChunkSummarizer: Send + Sync {
    async fn summarize_chunk(&self, chunk: &str) -> Result<Vec<Value>>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub prompt: String,
    /// Overrides the provider's configured model
    pub model: Option<String>,
    pub max_tokens: Option<usize>,
    pub temperature: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub usage: UsageMetadata,
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

pub mod remote;
pub mod summarizer;

/// Helper to extract a JSON array from text that might contain markdown backticks or preamble
pub fn extract_json_array_from_text(text: &str) -> Option<String> {
    // 1. Content between ```json and ```
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 2. Content between ``` and ```
    if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        if let Some(end) = rest.find("```") {
            return Some(rest[..end].trim().to_string());
        }
    }

    // 3. First '[' to last ']'
    if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
        if start < end {
            return Some(text[start..=end].to_string());
        }
    }

    None
}
