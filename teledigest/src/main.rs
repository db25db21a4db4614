/*
teledigest - single-binary main.rs
Starts the Rocket HTTP server serving digest runs, or performs one run from the command line.
*/

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use teledigest::fetch::HttpSource;
use teledigest::image_proxy::{ImageProxy, ImageProxySettings};
use teledigest::llm::remote::RemoteLlmProvider;
use teledigest::llm::summarizer::LlmChunkSummarizer;
use teledigest::llm::LlmProvider;
use teledigest::pipeline::DigestRunner;
use teledigest::progress::LogSink;
use teledigest::server::{launch_rocket, AppState};

#[derive(Parser, Debug)]
#[command(name = "teledigest", about = "Channel digest server")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run one digest and exit instead of serving HTTP
    #[arg(long)]
    once: bool,

    /// With --once, write the result array to FILE instead of stdout
    #[arg(long, value_name = "FILE", requires = "once")]
    output: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Pick up OPENAI_API_KEY and friends from .env if present
    dotenv::dotenv().ok();

    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config.clone() {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() {
            Some(p)
        } else {
            None
        }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(%e, "failed to load configuration");
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    let source = Arc::new(HttpSource::new(&config.source())?);

    let llm_provider: Option<Arc<RemoteLlmProvider>> = match config.llm.as_ref() {
        Some(llm_config) => match RemoteLlmProvider::from_config(llm_config) {
            Ok(provider) => {
                info!("LLM provider initialized: remote ({})", provider.model());
                Some(Arc::new(provider))
            }
            Err(e) => {
                warn!("LLM configured but unavailable: {:#}", e);
                None
            }
        },
        None => {
            warn!("no [llm] section in configuration; digest runs will fail");
            None
        }
    };

    let runner = match &llm_provider {
        Some(provider) => {
            let mut summarizer = LlmChunkSummarizer::new(provider.clone());
            if let Some(max_tokens) = config.llm.as_ref().and_then(|l| l.max_tokens) {
                summarizer = summarizer.with_max_tokens(max_tokens);
            }
            Some(Arc::new(DigestRunner::from_config(
                &config,
                source,
                Arc::new(summarizer),
            )?))
        }
        None => None,
    };

    if args.once {
        return run_once(runner, args.output).await;
    }

    let supported_models = config
        .llm
        .as_ref()
        .and_then(|l| l.supported_models.clone())
        .or_else(|| llm_provider.as_ref().map(|p| vec![p.model().to_string()]))
        .unwrap_or_default();

    let state = AppState {
        started_at: Utc::now(),
        runner,
        llm_provider: llm_provider.map(|p| p as Arc<dyn LlmProvider>),
        supported_models,
        image_proxy: Arc::new(ImageProxy::new(ImageProxySettings::from_config(
            config.image_proxy.as_ref(),
        ))?),
    };

    info!("Launching Rocket HTTP server");
    if let Err(e) = launch_rocket(state, config.server.as_ref()).await {
        error!(%e, "Rocket server failed");
        return Err(e);
    }

    info!("Shutdown complete");
    Ok(())
}

/// Perform a single digest, logging progress, and write the result array.
async fn run_once(runner: Option<Arc<DigestRunner>>, output: Option<PathBuf>) -> Result<()> {
    let runner = runner.context("cannot run a digest without a configured LLM provider")?;
    let results = runner.run(&LogSink).await?;

    let json = serde_json::to_string_pretty(&results).context("failed to serialize results")?;
    match output {
        Some(path) => {
            tokio::fs::write(&path, json)
                .await
                .with_context(|| format!("failed to write results to {}", path.display()))?;
            info!(path = %path.display(), results = results.len(), "results written");
        }
        None => println!("{}", json),
    }
    Ok(())
}
