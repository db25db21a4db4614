use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use chrono::{FixedOffset, Utc};
use common::Pacing;
use serde_json::{json, Value};
use teledigest::fetch::{PageFetch, SourceClient};
use teledigest::ingestion::HarvestSettings;
use teledigest::llm::ChunkSummarizer;
use teledigest::pipeline::{spawn_run, DigestRunner, PipelineError};
use teledigest::post::DisplayZone;
use teledigest::processing::dispatch;
use teledigest::progress::{ProgressEvent, RecordingSink};

/// Listing pages whose posts are all dated now, so they pass today's cutoff.
struct FreshSource {
    listings: HashMap<String, Vec<&'static str>>,
}

impl FreshSource {
    fn new(listings: &[(&str, Vec<&'static str>)]) -> Self {
        Self {
            listings: listings
                .iter()
                .map(|(name, texts)| (name.to_string(), texts.clone()))
                .collect(),
        }
    }
}

#[async_trait::async_trait]
impl SourceClient for FreshSource {
    async fn listing_page(&self, channel: &str) -> PageFetch {
        let Some(texts) = self.listings.get(channel) else {
            return PageFetch::Unavailable {
                reason: "unknown channel".to_string(),
            };
        };
        let now = Utc::now().to_rfc3339();
        let messages: String = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                format!(
                    r#"<div class="tgme_widget_message" data-post="{channel}/{i}">
                         <div class="tgme_widget_message_text js-message_text">{t}</div>
                         <time datetime="{now}"></time>
                       </div>"#
                )
            })
            .collect();
        PageFetch::Loaded(format!("<html><body>{}</body></html>", messages))
    }

    async fn single_post_page(&self, _post_id: &str) -> PageFetch {
        PageFetch::Unavailable {
            reason: "not used".to_string(),
        }
    }
}

/// Answers each chunk with one object naming its position, optionally failing on one chunk.
#[derive(Default)]
struct NumberingSummarizer {
    fail_on: Option<usize>,
    seen: Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl ChunkSummarizer for NumberingSummarizer {
    async fn summarize_chunk(&self, chunk: &str) -> Result<Vec<Value>> {
        let mut seen = self.seen.lock().unwrap();
        seen.push(chunk.to_string());
        let number = seen.len();
        if self.fail_on == Some(number) {
            bail!("quota exhausted");
        }
        Ok(vec![json!({ "chunk": number, "part": "a" }), json!({ "chunk": number, "part": "b" })])
    }
}

fn settings() -> HarvestSettings {
    HarvestSettings {
        zone: DisplayZone::new(FixedOffset::east_opt(0).unwrap(), "%Y-%m-%d %H:%M:%S"),
        pacing: Pacing::none(),
    }
}

fn channel_file(contents: &str) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(file.path(), contents).unwrap();
    file
}

#[tokio::test]
async fn full_run_flattens_results_in_chunk_order() {
    let channels = channel_file("# morning digest\nalpha\n\nbeta\n");
    let source = Arc::new(FreshSource::new(&[
        ("alpha", vec!["first alpha post", "second alpha post"]),
        ("beta", vec!["only beta post"]),
    ]));
    let summarizer = Arc::new(NumberingSummarizer::default());

    let runner = DigestRunner::new(source, summarizer.clone(), settings(), channels.path(), 2);
    let sink = RecordingSink::default();
    let results = runner.run(&sink).await.unwrap();

    assert_eq!(
        results,
        vec![
            json!({"chunk": 1, "part": "a"}),
            json!({"chunk": 1, "part": "b"}),
            json!({"chunk": 2, "part": "a"}),
            json!({"chunk": 2, "part": "b"}),
        ]
    );

    // Both chunks together are exactly the formatted corpus
    let corpus = summarizer.seen.lock().unwrap().concat();
    assert!(corpus.starts_with("Source: "));
    assert!(corpus.contains("only beta post"));
    assert_eq!(corpus.matches("\n---\n\n").count(), 3);

    assert_eq!(
        sink.messages(),
        vec![
            "Starting to parse channels...",
            "Parsing channel 1/2: alpha...",
            "Parsing channel 2/2: beta...",
            "Parsing finished. Collected 3 posts.",
            "Text split into 2 parts. Starting analysis...",
            "Sending part 1/2 for analysis...",
            "Part 1/2 processed successfully.",
            "Pausing 0 seconds for API rate limits...",
            "Sending part 2/2 for analysis...",
            "Part 2/2 processed successfully.",
            "Analysis of all parts finished. Sending data for document generation...",
        ]
    );
    assert_eq!(
        sink.events().last(),
        Some(&ProgressEvent::FinalData {
            json_data: results.clone()
        })
    );
}

#[tokio::test]
async fn failing_chunk_aborts_without_final_data() {
    let channels = channel_file("alpha\n");
    let source = Arc::new(FreshSource::new(&[("alpha", vec!["a", "b", "c", "d", "e", "f"])]));
    let summarizer = Arc::new(NumberingSummarizer {
        fail_on: Some(2),
        ..Default::default()
    });

    let runner = DigestRunner::new(source, summarizer.clone(), settings(), channels.path(), 3);
    let sink = RecordingSink::default();
    let err = runner.run(&sink).await.unwrap_err();

    assert!(matches!(err, PipelineError::Summarization { chunk: 2, total: 3, .. }));
    assert!(err.to_string().contains("quota exhausted"));
    // the third chunk is never sent
    assert_eq!(summarizer.seen.lock().unwrap().len(), 2);

    let events = sink.events();
    assert!(!events.iter().any(|e| matches!(e, ProgressEvent::FinalData { .. })));
    let errors = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::Error { .. }))
        .count();
    assert_eq!(errors, 1);
    assert!(matches!(events.last(), Some(ProgressEvent::Error { .. })));
}

#[tokio::test]
async fn empty_channel_list_is_terminal() {
    let channels = channel_file("# nothing but comments\n\n");
    let runner = DigestRunner::new(
        Arc::new(FreshSource::new(&[])),
        Arc::new(NumberingSummarizer::default()),
        settings(),
        channels.path(),
        1,
    );

    let sink = RecordingSink::default();
    let err = runner.run(&sink).await.unwrap_err();
    assert!(matches!(err, PipelineError::ChannelList(_)));
    assert!(matches!(sink.events().last(), Some(ProgressEvent::Error { .. })));
}

#[tokio::test]
async fn spawned_run_outlives_a_dropped_receiver() {
    let channels = channel_file("alpha\n");
    let summarizer = Arc::new(NumberingSummarizer::default());
    let runner = Arc::new(DigestRunner::new(
        Arc::new(FreshSource::new(&[("alpha", vec!["post"])])),
        summarizer.clone(),
        settings(),
        channels.path(),
        1,
    ));

    drop(spawn_run(runner.clone()));

    // The run still reaches the summarizer with nobody listening
    for _ in 0..100 {
        if !summarizer.seen.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(summarizer.seen.lock().unwrap().len(), 1);

    // A listening run streams through to final_data
    let mut events = spawn_run(runner);
    let mut last = None;
    while let Some(ev) = events.recv().await {
        last = Some(ev);
    }
    assert!(matches!(last, Some(ProgressEvent::FinalData { .. })));
}

#[tokio::test]
async fn dispatch_with_single_chunk_sends_everything_at_once() {
    let source = FreshSource::new(&[("alpha", vec!["x"])]);
    let posts = teledigest::ingestion::harvest_all_since(
        &source,
        &["alpha".to_string()],
        Utc::now() - chrono::Duration::hours(1),
        &settings(),
        &RecordingSink::default(),
    )
    .await
    .unwrap();

    let summarizer = NumberingSummarizer::default();
    let sink = RecordingSink::default();
    let results = dispatch(&posts, 1, &summarizer, std::time::Duration::ZERO, &sink)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert!(!sink.messages().iter().any(|m| m.starts_with("Pausing")));
}
