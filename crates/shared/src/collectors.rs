//! Ingestion adapter contract and the built-in manual-picks source.
//!
//! Scraping adapters (RSS, search, social APIs) live outside this crate;
//! they only have to produce candidate records satisfying [`Collector`].
//! Deduplication across adapters is the store's job, not theirs.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tracing::{info, warn};

use crate::models::Article;
use crate::store::Store;

#[async_trait]
pub trait Collector: Send + Sync {
    /// Human-readable name for this source.
    fn name(&self) -> &str;

    /// Gather candidate articles. A failure here means this source
    /// contributes nothing this run; it never aborts the pipeline.
    async fn collect(&self) -> Result<Vec<Article>>;
}

/// Run all collectors concurrently, isolating failures per source and
/// dropping records that violate the contract (unparseable url or empty
/// title).
pub async fn collect_all(collectors: &[Box<dyn Collector>]) -> Vec<Article> {
    let futures = collectors.iter().map(|collector| async move {
        match collector.collect().await {
            Ok(articles) => {
                info!("  {}: {} articles", collector.name(), articles.len());
                articles
            }
            Err(e) => {
                warn!("  {}: failed: {e:#}", collector.name());
                Vec::new()
            }
        }
    });

    join_all(futures)
        .await
        .into_iter()
        .flatten()
        .filter(|a| {
            let ok = url::Url::parse(&a.url).is_ok() && !a.title.trim().is_empty();
            if !ok {
                warn!("Dropping candidate with invalid url or empty title from {}", a.source);
            }
            ok
        })
        .collect()
}

/// Reads manually curated URLs from the editor_picks table. Picks enter
/// the pool with maximum source quality so they survive diversity
/// selection; the curation pass still runs on them for summary and
/// category.
pub struct EditorPicksCollector {
    db_path: String,
}

impl EditorPicksCollector {
    pub const SOURCE: &'static str = "Editor Pick";

    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }
}

#[async_trait]
impl Collector for EditorPicksCollector {
    fn name(&self) -> &str {
        "Editor Picks"
    }

    async fn collect(&self) -> Result<Vec<Article>> {
        let store = Store::open(&self.db_path)?;
        let picks = store.unused_editor_picks()?;

        let mut articles = Vec::with_capacity(picks.len());
        for pick in picks {
            let url = pick.url.trim().to_string();
            // A malformed pick stays unused so a corrected entry is picked
            // up on a later run instead of being consumed and lost.
            if url::Url::parse(&url).is_err() {
                warn!("Skipping editor pick with invalid url: {}", pick.url);
                continue;
            }
            let note = pick.note.unwrap_or_default();
            let mut article = Article::new(
                url,
                pick.title.unwrap_or_else(|| pick.url.clone()),
                Self::SOURCE,
            );
            article.raw_content = note.clone();
            article.summary = note;
            article.scores.relevance = 0.95;
            article.scores.source_quality = 1.0;
            article.final_score = 0.95;
            article.collected_at = Utc::now();
            articles.push(article);

            store.mark_editor_pick_used(pick.id)?;
        }

        Ok(articles)
    }
}
