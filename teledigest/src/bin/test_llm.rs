use std::sync::Arc;

use common::RemoteLlmConfig;
use teledigest::llm::remote::RemoteLlmProvider;
use teledigest::llm::summarizer::LlmChunkSummarizer;
use teledigest::llm::ChunkSummarizer;

const SAMPLE_CHUNK: &str = "Source: economy_daily
Author: Economy Daily
Date: 2024-05-01 10:00:00 +03:00

The central bank kept the key rate unchanged at 16% and signalled that it may stay there until autumn.

Images: 

---

Source: tech_news
Author: Tech News
Date: 2024-05-01 09:30:00 +03:00

A new domestic smartphone line goes on sale next week, with prices starting below last year's models.

Images: https://cdn.example/phone.jpg

---

";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = RemoteLlmConfig {
        api_url: std::env::var("LLM_BASE_URL").ok(),
        model: std::env::var("LLM_MODEL").ok(),
        ..Default::default()
    };
    let provider = RemoteLlmProvider::from_config(&config)?;

    println!("\n{}", "=".repeat(60));
    println!("Testing chunk summarization");
    println!("Model: {}", provider.model());
    println!("{}", "=".repeat(60));

    let summarizer = LlmChunkSummarizer::new(Arc::new(provider));
    match summarizer.summarize_chunk(SAMPLE_CHUNK).await {
        Ok(results) => {
            println!("✓ Success! {} sections", results.len());
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Err(e) => {
            eprintln!("✗ Failed: {:#}", e);
        }
    }

    Ok(())
}
