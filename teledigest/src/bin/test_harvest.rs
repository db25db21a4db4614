use chrono::Utc;
use common::{Config, Pacing};
use teledigest::fetch::HttpSource;
use teledigest::ingestion::{harvest_channel, start_of_day, HarvestSettings};
use teledigest::post::DisplayZone;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let channels: Vec<String> = std::env::args().skip(1).collect();
    if channels.is_empty() {
        anyhow::bail!("usage: test_harvest CHANNEL [CHANNEL...]");
    }

    let config = Config::default();
    let source = HttpSource::new(&config.source())?;
    let settings = HarvestSettings {
        zone: DisplayZone::new(config.display_offset()?, config.timestamp_format()),
        pacing: Pacing {
            channel_delay: std::time::Duration::ZERO,
            ..config.pacing()
        },
    };
    let since = start_of_day(Utc::now(), settings.zone.offset);

    for channel in channels {
        println!("\n{}", "=".repeat(60));
        println!("Channel: {} (since {})", channel, settings.zone.format(&since));
        println!("{}", "=".repeat(60));

        let posts = harvest_channel(&source, &channel, since, &settings).await;
        println!("Posts: {}", posts.len());
        for (i, post) in posts.iter().enumerate() {
            let preview: String = post.text().chars().take(120).collect();
            println!("  {}. [{}] {}", i + 1, post.formatted_timestamp(), post.author());
            println!("     {}", preview.replace('\n', " "));
            println!(
                "     images: {}, videos: {}",
                post.images().len(),
                post.videos().len()
            );
        }
    }

    Ok(())
}
