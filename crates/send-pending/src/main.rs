use anyhow::{Context, Result};
use clap::Parser;
use shared::emailer::{self, ResendTransport};
use shared::{Config, Store};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "send-pending")]
#[command(about = "Send the latest pending newsletter edition to all subscribers")]
struct Args {
    /// Print the pending edition instead of sending it.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let mut store = Store::open(&config.database_path)
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;

    let Some(edition) = store.pending_edition()? else {
        info!("No pending edition to send");
        return Ok(());
    };
    info!(
        "Found pending edition {} from run {}",
        edition.id, edition.run_id
    );

    if args.dry_run {
        println!("Subject: {}\n", edition.subject);
        println!("{}", edition.body);
        return Ok(());
    }

    let recipients = merged_recipients(&config, &store)?;
    if recipients.is_empty() {
        anyhow::bail!("No subscribers configured");
    }

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
    info!(
        "Dispatched edition to {} subscribers ({} failed)",
        report.sent, report.failed
    );

    if report.any_sent() {
        store.mark_sent(&edition.urls)?;
        store.mark_edition_sent(edition.id)?;
        info!("Edition {} marked as sent", edition.id);
    } else {
        warn!("Every delivery failed; edition remains pending");
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
