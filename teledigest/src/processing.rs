use common::pause;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

use crate::llm::ChunkSummarizer;
use crate::pipeline::PipelineError;
use crate::post::Post;
use crate::progress::{ProgressEvent, ProgressSink};

/// Render posts into the single text corpus handed to the summarizer.
pub fn format_posts(posts: &[Post]) -> String {
    posts
        .iter()
        .map(|p| {
            format!(
                "Source: {}\nAuthor: {}\nDate: {}\n\n{}\n\nImages: {}\n\n---\n\n",
                p.channel(),
                p.author(),
                p.formatted_timestamp(),
                p.text(),
                p.images().join(", ")
            )
        })
        .collect()
}

/// Split `text` into contiguous slices of `ceil(len / chunk_count)` characters; the last
/// slice may be shorter. Cuts fall on character offsets, not on post boundaries.
pub fn split_into_chunks(text: &str, chunk_count: usize) -> Vec<&str> {
    let len = text.chars().count();
    if len == 0 {
        return Vec::new();
    }
    let chunk_size = len.div_ceil(chunk_count.max(1));

    // Byte offsets of every chunk start, plus the end of the text.
    let mut bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .step_by(chunk_size)
        .collect();
    bounds.push(text.len());

    bounds.windows(2).map(|w| &text[w[0]..w[1]]).collect()
}

/// Summarize posts chunk by chunk and flatten the results in chunk order.
///
/// Chunks are sent one at a time with `batch_delay` between two calls to stay under the
/// remote rate limit. The first failing chunk aborts the whole dispatch.
pub async fn dispatch(
    posts: &[Post],
    chunk_count: usize,
    summarizer: &dyn ChunkSummarizer,
    batch_delay: Duration,
    sink: &dyn ProgressSink,
) -> Result<Vec<Value>, PipelineError> {
    let corpus = format_posts(posts);
    let chunks = split_into_chunks(&corpus, chunk_count);
    let total = chunks.len();

    info!("processing: corpus of {} chars split into {} chunks", corpus.chars().count(), total);
    sink.emit(ProgressEvent::progress(format!(
        "Text split into {} parts. Starting analysis...",
        total
    )));

    let mut results: Vec<Value> = Vec::new();
    for (index, chunk) in chunks.iter().enumerate() {
        let number = index + 1;
        sink.emit(ProgressEvent::progress(format!(
            "Sending part {}/{} for analysis...",
            number, total
        )));

        let mut partial = summarizer.summarize_chunk(chunk).await.map_err(|cause| {
            error!("processing: chunk {}/{} failed: {:#}", number, total, cause);
            PipelineError::Summarization {
                chunk: number,
                total,
                cause,
            }
        })?;
        info!("processing: chunk {}/{} produced {} results", number, total, partial.len());
        results.append(&mut partial);

        sink.emit(ProgressEvent::progress(format!(
            "Part {}/{} processed successfully.",
            number, total
        )));

        if number < total {
            sink.emit(ProgressEvent::progress(format!(
                "Pausing {} seconds for API rate limits...",
                batch_delay.as_secs()
            )));
            pause(batch_delay).await;
        }
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::MediaSet;
    use crate::post::DisplayZone;
    use chrono::{FixedOffset, TimeZone, Utc};

    #[test]
    fn splits_ten_chars_into_three_chunks() {
        let chunks = split_into_chunks("abcdefghij", 3);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
        let lens: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
    }

    #[test]
    fn split_edge_cases() {
        assert!(split_into_chunks("", 3).is_empty());
        assert_eq!(split_into_chunks("abc", 1), vec!["abc"]);
        assert_eq!(split_into_chunks("abc", 0), vec!["abc"]);
        assert_eq!(split_into_chunks("ab", 5), vec!["a", "b"]);
        // ceil(9 / 4) = 3, so only three chunks come out
        assert_eq!(split_into_chunks("abcdefghi", 4), vec!["abc", "def", "ghi"]);
    }

    #[test]
    fn split_counts_characters_not_bytes() {
        let chunks = split_into_chunks("привет мир", 2);
        assert_eq!(chunks, vec!["приве", "т мир"]);
        assert_eq!(chunks.concat(), "привет мир");
    }

    #[test]
    fn formats_posts_with_fixed_template() {
        let zone = DisplayZone::new(FixedOffset::east_opt(3 * 3600).unwrap(), "%Y-%m-%d %H:%M");
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 7, 0, 0).unwrap();
        let mut media = MediaSet::default();
        media.add_image("https://cdn/a.jpg");
        media.add_image("https://cdn/b.jpg");
        let post = Post::new("alpha", Some("Alpha"), ts, &zone, "Body", media).unwrap();

        assert_eq!(
            format_posts(&[post]),
            "Source: alpha\nAuthor: Alpha\nDate: 2024-05-01 10:00\n\nBody\n\nImages: https://cdn/a.jpg, https://cdn/b.jpg\n\n---\n\n"
        );
    }
}
