use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Parser;
use shared::collectors::{self, Collector, EditorPicksCollector};
use shared::composer::{self, ComposedEdition};
use shared::curator::Curator;
use shared::emailer::{self, ResendTransport};
use shared::extractor::{self, ContentExtractor};
use shared::selector::{self, Selection};
use shared::{Config, RunContext, RunStatus, SourceClassifier, Store};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Runs stuck in `running` longer than this are reclaimed at startup.
const STALE_RUN_AGE_HOURS: i64 = 6;

#[derive(Parser)]
#[command(name = "run-newsletter")]
#[command(about = "Collect, curate and send the AI newsletter")]
struct Args {
    /// Compose the edition but send nothing; archive it as sent.
    #[arg(long)]
    dry_run: bool,

    /// Save the edition as pending and send it to the review address only.
    #[arg(long)]
    preview: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    // Curation cannot run without a judging credential. Abort before any
    // state is touched.
    if config.anthropic_api_key.is_empty() {
        anyhow::bail!("ANTHROPIC_API_KEY is not set");
    }

    let mut store = Store::open(&config.database_path)
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;

    let reclaimed = store.fail_stale_runs(Duration::hours(STALE_RUN_AGE_HOURS))?;
    if reclaimed > 0 {
        warn!("Reclaimed {reclaimed} stale pipeline runs");
    }

    let run = store.create_run()?;
    info!("Starting pipeline run {}", run.run_id);

    match run_pipeline(&args, &config, &mut store, &run).await {
        Ok(()) => {
            store.finish_run(&run, RunStatus::Completed, None)?;
            info!("Pipeline run {} completed", run.run_id);
            Ok(())
        }
        Err(e) => {
            error!("Pipeline run {} failed: {e:#}", run.run_id);
            store.finish_run(&run, RunStatus::Failed, Some(&format!("{e:#}")))?;
            Err(e)
        }
    }
}

async fn run_pipeline(
    args: &Args,
    config: &Config,
    store: &mut Store,
    run: &RunContext,
) -> Result<()> {
    // Collect. Adapters run concurrently; a failing source contributes
    // nothing and the run continues.
    info!("Collecting articles...");
    let collectors: Vec<Box<dyn Collector>> =
        vec![Box::new(EditorPicksCollector::new(&config.database_path))];
    let collected = collectors::collect_all(&collectors).await;
    let inserted = store.insert_articles(&collected)?;
    store.record_collected(run, collected.len())?;
    info!(
        "Collected {} articles ({} new after dedup)",
        collected.len(),
        inserted
    );

    // Enrich articles whose content is too thin to judge.
    let extractor = ContentExtractor::new()?;
    extractor::enrich_uncurated(store, &extractor).await?;

    // Curate. Failed batches stay uncurated and are retried next run.
    let uncurated = store.uncurated_articles()?;
    info!("Curating {} articles...", uncurated.len());
    let curator = Curator::new(
        config.anthropic_api_key.clone(),
        config.claude_model.clone(),
        config.curation_context_length,
    )?;
    let judged = curator.curate(uncurated, store, run).await;

    let mut newly_curated = 0;
    for article in judged.iter().filter(|a| a.curated) {
        store.update_curation(
            &article.url,
            &article.summary,
            article.category,
            &article.scores,
            article.final_score,
        )?;
        newly_curated += 1;
    }
    store.record_curated(run, newly_curated)?;
    info!("Curated {newly_curated} articles");

    // Select.
    let pool = store.selection_pool()?;
    let classifier = SourceClassifier::new(&config.paper_sources, &config.expert_sources);
    let selection = selector::select(&pool, &config.selection, &classifier);
    for shortfall in &selection.shortfalls {
        info!("Selection shortfall: {shortfall}");
    }
    store.record_selected(run, selection.articles.len())?;
    info!(
        "Selected {} of {} curated articles",
        selection.articles.len(),
        pool.len()
    );

    if selection.articles.is_empty() {
        info!("Nothing to send this run");
        return Ok(());
    }

    // Compose and dispatch according to the mode.
    let edition = composer::compose(&selection.articles, Utc::now());

    if args.dry_run {
        dry_run(store, run, &edition, &selection)?;
    } else if args.preview {
        preview(config, store, run, &edition).await?;
    } else {
        full_send(config, store, run, &edition, &selection).await?;
    }

    Ok(())
}

/// Print the edition and archive it without sending anything. Articles are
/// never marked sent here: nothing was delivered, so they stay eligible for
/// a later real run.
fn dry_run(
    store: &Store,
    run: &RunContext,
    edition: &ComposedEdition,
    selection: &Selection,
) -> Result<()> {
    println!("Subject: {}\n", edition.subject);
    println!("{}", edition.body);

    let edition_id = store.save_pending_edition(
        run,
        &edition.subject,
        &edition.body,
        &edition.urls,
        &edition.topics,
    )?;
    store.mark_edition_sent(edition_id)?;
    info!(
        "Dry run: archived edition with {} articles, no email sent",
        selection.articles.len()
    );
    Ok(())
}

/// Save the edition as pending and send it to the review address only.
/// Articles stay unsent until send-pending confirms delivery.
async fn preview(
    config: &Config,
    store: &mut Store,
    run: &RunContext,
    edition: &ComposedEdition,
) -> Result<()> {
    let edition_id = store.save_pending_edition(
        run,
        &edition.subject,
        &edition.body,
        &edition.urls,
        &edition.topics,
    )?;
    info!("Saved pending edition {edition_id} for review");

    if config.review_email.is_empty() {
        warn!("REVIEW_EMAIL is not set; edition saved but no preview sent");
        return Ok(());
    }

    let transport = ResendTransport::new(config.resend_api_key.clone())?;
    let subject = format!("[PREVIEW] {}", edition.subject);
    let recipients = vec![config.review_email.clone()];
    let report = emailer::dispatch(
        &transport,
        &config.from_email,
        &subject,
        &edition.body,
        &recipients,
        &config.base_url,
    )
    .await;
    store.record_emails(run, report.sent, report.failed)?;

    if !report.any_sent() {
        warn!("Preview email failed; edition remains pending");
    }
    Ok(())
}

/// Send to the merged subscriber set. Articles and the edition are marked
/// sent only if at least one delivery succeeded.
async fn full_send(
    config: &Config,
    store: &mut Store,
    run: &RunContext,
    edition: &ComposedEdition,
    selection: &Selection,
) -> Result<()> {
    let recipients = merged_recipients(config, store)?;
    if recipients.is_empty() {
        warn!("No subscribers configured; saving edition as pending");
        store.save_pending_edition(
            run,
            &edition.subject,
            &edition.body,
            &edition.urls,
            &edition.topics,
        )?;
        return Ok(());
    }

    let edition_id = store.save_pending_edition(
        run,
        &edition.subject,
        &edition.body,
        &edition.urls,
        &edition.topics,
    )?;

    let transport = ResendTransport::new(config.resend_api_key.clone())?;
    let report = emailer::dispatch(
        &transport,
        &config.from_email,
        &edition.subject,
        &edition.body,
        &recipients,
        &config.base_url,
    )
    .await;
    store.record_emails(run, report.sent, report.failed)?;
    info!(
        "Dispatched edition to {} subscribers ({} failed)",
        report.sent, report.failed
    );

    if report.any_sent() {
        store.mark_sent(&edition.urls)?;
        store.mark_edition_sent(edition_id)?;
        info!("Marked {} articles as sent", selection.articles.len());
    } else {
        warn!("Every delivery failed; edition remains pending for retry");
    }
    Ok(())
}

/// Environment-configured recipients merged with active database
/// subscribers, deduplicated, order preserved.
fn merged_recipients(config: &Config, store: &Store) -> Result<Vec<String>> {
    let mut seen = std::collections::HashSet::new();
    let mut recipients = Vec::new();
    for email in config
        .subscribers
        .iter()
        .cloned()
        .chain(store.active_subscribers()?)
    {
        if seen.insert(email.to_lowercase()) {
            recipients.push(email);
        }
    }
    Ok(recipients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{Article, Category, Scores};

    #[test]
    fn test_dry_run_archives_edition_without_consuming_articles() {
        let store = Store::open_in_memory().unwrap();
        let run = store.create_run().unwrap();

        for url in ["https://a.com/1", "https://a.com/2"] {
            store
                .insert_article(&Article::new(url, "Title", "News"))
                .unwrap();
            store
                .update_curation(url, "s", Category::Report, &Scores::default(), 0.5)
                .unwrap();
        }

        let pool = store.selection_pool().unwrap();
        let selection = Selection {
            articles: pool.clone(),
            shortfalls: Vec::new(),
        };
        let edition = composer::compose(&selection.articles, Utc::now());

        dry_run(&store, &run, &edition, &selection).unwrap();

        // The edition is archived, not left pending.
        assert!(store.pending_edition().unwrap().is_none());
        assert!(!store.recent_edition_topics(1).unwrap().is_empty());

        // Nothing was delivered, so the articles stay eligible.
        assert_eq!(store.selection_pool().unwrap().len(), pool.len());
    }
}
