//! Content enrichment: fetch an article URL and reduce it to plain text.
//!
//! Runs before curation for articles whose stored content is missing or
//! too short to judge. Per-URL failures are tolerated; enrichment is
//! idempotent, so re-fetching on the next run is safe.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use crate::store::Store;

/// Content shorter than this is considered unusable for judging.
pub const MIN_CONTENT_LENGTH: usize = 100;

/// In-flight fetch ceiling; candidate sources are rarely the same host,
/// so this bounds our own socket usage rather than politeness per host.
const FETCH_CONCURRENCY: usize = 10;

pub struct ContentExtractor {
    client: Client,
    semaphore: Arc<Semaphore>,
}

impl ContentExtractor {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (compatible; NewsletterPipeline/1.0)")
            .build()
            .context("Failed to create HTTP client")?;

        let semaphore = Arc::new(Semaphore::new(FETCH_CONCURRENCY));

        Ok(Self { client, semaphore })
    }

    pub async fn fetch_article_content(&self, url: &str) -> Result<Option<String>> {
        let _permit = self.semaphore.acquire().await?;

        for attempt in 0..3 {
            match self.try_fetch(url).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    if attempt == 2 {
                        debug!("Failed to fetch {url}: {e:#}");
                        return Ok(None);
                    }
                    let backoff = std::time::Duration::from_millis(500 * 2_u64.pow(attempt));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        Ok(None)
    }

    async fn try_fetch(&self, url: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send HTTP request")?;

        let status = response.status();
        if status == 401 || status == 403 || status == 404 {
            return Ok(None);
        }

        if !status.is_success() {
            anyhow::bail!("HTTP error: {}", status);
        }

        let html = response.text().await.context("Failed to read response body")?;

        let text = html2text::from_read(html.as_bytes(), 100);

        if text.trim().is_empty() || text.len() < MIN_CONTENT_LENGTH {
            return Ok(None);
        }

        Ok(Some(text))
    }

    pub async fn fetch_articles_parallel(&self, urls: Vec<String>) -> Vec<(String, Option<String>)> {
        stream::iter(urls)
            .map(|url| {
                let url_clone = url.clone();
                async move {
                    let content = self.fetch_article_content(&url).await.ok().flatten();
                    (url_clone, content)
                }
            })
            .buffer_unordered(FETCH_CONCURRENCY)
            .collect()
            .await
    }
}

/// Fetch content for every uncurated article that has none (or too little)
/// and persist what came back. Returns the number of articles enriched.
pub async fn enrich_uncurated(store: &Store, extractor: &ContentExtractor) -> Result<usize> {
    let needing: Vec<String> = store
        .uncurated_articles()?
        .into_iter()
        .filter(|a| a.raw_content.len() < MIN_CONTENT_LENGTH)
        .map(|a| a.url)
        .collect();

    if needing.is_empty() {
        return Ok(0);
    }

    let results = extractor.fetch_articles_parallel(needing).await;

    let mut enriched = 0;
    for (url, content) in results {
        if let Some(content) = content {
            store.update_content(&url, &content)?;
            enriched += 1;
        }
    }

    info!("Scraped content for {enriched} articles");
    Ok(enriched)
}
