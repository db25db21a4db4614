use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use common::{load_channel_list, Config};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{error, info};
use uuid::Uuid;

use crate::fetch::SourceClient;
use crate::ingestion::{harvest_all, HarvestSettings};
use crate::llm::ChunkSummarizer;
use crate::processing::dispatch;
use crate::progress::{ProgressEvent, ProgressSink};

/// Conditions that end a digest run. Each one is reported as a single `error` event.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to load channel list: {0:#}")]
    ChannelList(anyhow::Error),

    #[error("channel list is empty")]
    NoChannels,

    #[error("no posts found; check the channel list and time window")]
    NoPosts,

    #[error("summarization of part {chunk}/{total} failed: {cause:#}")]
    Summarization {
        chunk: usize,
        total: usize,
        cause: anyhow::Error,
    },
}

/// One end-to-end digest: harvest every listed channel, then summarize the corpus.
pub struct DigestRunner {
    source: Arc<dyn SourceClient>,
    summarizer: Arc<dyn ChunkSummarizer>,
    settings: HarvestSettings,
    channels_path: PathBuf,
    chunk_count: usize,
}

impl DigestRunner {
    pub fn new(
        source: Arc<dyn SourceClient>,
        summarizer: Arc<dyn ChunkSummarizer>,
        settings: HarvestSettings,
        channels_path: impl Into<PathBuf>,
        chunk_count: usize,
    ) -> Self {
        Self {
            source,
            summarizer,
            settings,
            channels_path: channels_path.into(),
            chunk_count: chunk_count.max(1),
        }
    }

    pub fn from_config(
        config: &Config,
        source: Arc<dyn SourceClient>,
        summarizer: Arc<dyn ChunkSummarizer>,
    ) -> Result<Self> {
        Ok(Self::new(
            source,
            summarizer,
            HarvestSettings::from_config(config)?,
            config.channels_path(),
            config.chunk_count(),
        ))
    }

    /// Run to completion, reporting through `sink`. The last event is either `final_data` or a
    /// single `error`; the same outcome is returned to the caller.
    pub async fn run(&self, sink: &dyn ProgressSink) -> Result<Vec<Value>, PipelineError> {
        let run_id = Uuid::new_v4();
        info!(%run_id, "pipeline: run started");

        match self.execute(sink).await {
            Ok(results) => {
                info!(%run_id, results = results.len(), "pipeline: run finished");
                sink.emit(ProgressEvent::FinalData {
                    json_data: results.clone(),
                });
                Ok(results)
            }
            Err(e) => {
                error!(%run_id, "pipeline: run failed: {}", e);
                sink.emit(ProgressEvent::error(e.to_string()));
                Err(e)
            }
        }
    }

    async fn execute(&self, sink: &dyn ProgressSink) -> Result<Vec<Value>, PipelineError> {
        sink.emit(ProgressEvent::progress("Starting to parse channels..."));

        let channels = load_channel_list(&self.channels_path)
            .await
            .map_err(PipelineError::ChannelList)?;

        let posts = harvest_all(self.source.as_ref(), &channels, &self.settings, sink).await?;
        sink.emit(ProgressEvent::progress(format!(
            "Parsing finished. Collected {} posts.",
            posts.len()
        )));

        let results = dispatch(
            &posts,
            self.chunk_count,
            self.summarizer.as_ref(),
            self.settings.pacing.batch_delay,
            sink,
        )
        .await?;

        sink.emit(ProgressEvent::progress(
            "Analysis of all parts finished. Sending data for document generation...",
        ));
        Ok(results)
    }
}

/// Start a run on its own task and return the event stream. Dropping the receiver does not
/// stop the run.
pub fn spawn_run(runner: Arc<DigestRunner>) -> UnboundedReceiver<ProgressEvent> {
    let (tx, rx) = unbounded_channel();
    tokio::spawn(async move {
        let _ = runner.run(&tx).await;
    });
    rx
}
