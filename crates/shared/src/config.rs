//! Environment-backed configuration.
//!
//! Everything tunable lives in environment variables, optionally loaded
//! from a .env file. Missing optional values fall back to defaults here;
//! the binaries decide which keys are fatal for their mode before any
//! database write happens.

use anyhow::Result;
use std::path::PathBuf;
use tracing::debug;

use crate::selector::SelectionParams;

#[derive(Debug, Clone)]
pub struct Config {
    /// Anthropic API key. May be empty; the pipeline refuses to start a
    /// run without it, but preview tooling that never curates can cope.
    pub anthropic_api_key: String,
    pub claude_model: String,
    /// Max characters of article content sent per item to the judge.
    pub curation_context_length: usize,

    /// Resend API key for newsletter delivery.
    pub resend_api_key: String,
    pub from_email: String,
    /// Recipients configured via environment, merged with active
    /// database subscribers at dispatch time.
    pub subscribers: Vec<String>,
    /// Where preview-mode editions go for review.
    pub review_email: String,
    /// Base URL for per-recipient unsubscribe links.
    pub base_url: String,

    pub database_path: String,

    pub selection: SelectionParams,
    /// Source-name markers identifying research-paper feeds.
    pub paper_sources: Vec<String>,
    /// Source-name markers identifying expert commentary feeds.
    pub expert_sources: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables, checking a few
    /// standard locations for a .env file first.
    pub fn from_env() -> Result<Self> {
        try_load_dotenv();

        let selection = SelectionParams {
            limit: parse_env("NEWSLETTER_LIMIT", SelectionParams::default().limit),
            max_same_source: parse_env("MAX_SAME_SOURCE", SelectionParams::default().max_same_source),
            min_papers: parse_env("MIN_PAPERS", SelectionParams::default().min_papers),
            min_expert: parse_env("MIN_EXPERT", SelectionParams::default().min_expert),
        };

        Ok(Config {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").unwrap_or_default(),
            claude_model: std::env::var("CLAUDE_MODEL")
                .unwrap_or_else(|_| String::from("claude-sonnet-4-20250514")),
            curation_context_length: parse_env("CURATION_CONTEXT_LENGTH", 2000),

            resend_api_key: std::env::var("RESEND_API_KEY").unwrap_or_default(),
            from_email: std::env::var("FROM_EMAIL")
                .unwrap_or_else(|_| String::from("newsletter@example.com")),
            subscribers: parse_list(&std::env::var("SUBSCRIBERS").unwrap_or_default()),
            review_email: std::env::var("REVIEW_EMAIL").unwrap_or_default(),
            base_url: std::env::var("BASE_URL")
                .unwrap_or_else(|_| String::from("https://example.com")),

            database_path: std::env::var("DATABASE_PATH")
                .unwrap_or_else(|_| String::from("newsletter.db")),

            selection,
            paper_sources: parse_list_or(
                &std::env::var("PAPER_SOURCES").unwrap_or_default(),
                &["hugging face papers", "arxiv"],
            ),
            expert_sources: parse_list_or(
                &std::env::var("EXPERT_SOURCES").unwrap_or_default(),
                &["bluesky"],
            ),
        })
    }
}

/// Try to load a .env file from standard locations.
fn try_load_dotenv() {
    let candidates: Vec<PathBuf> = vec![
        Some(PathBuf::from(".env")),
        dirs::config_dir().map(|d| d.join("ai-newsletter").join(".env")),
        dirs::home_dir().map(|d| d.join(".env")),
    ]
    .into_iter()
    .flatten()
    .collect();

    for path in candidates {
        if path.exists() {
            if dotenvy::from_path(&path).is_ok() {
                debug!("Loaded environment from {}", path.display());
                return;
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_list_or(raw: &str, defaults: &[&str]) -> Vec<String> {
    let parsed = parse_list(raw);
    if parsed.is_empty() {
        defaults.iter().map(|s| s.to_string()).collect()
    } else {
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list_splits_and_trims() {
        let list = parse_list(" a@example.com , b@example.com ,, ");
        assert_eq!(list, vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn test_parse_list_or_falls_back_to_defaults() {
        let list = parse_list_or("", &["arxiv"]);
        assert_eq!(list, vec!["arxiv"]);

        let list = parse_list_or("custom feed", &["arxiv"]);
        assert_eq!(list, vec!["custom feed"]);
    }

    #[test]
    fn test_parse_env_ignores_garbage() {
        std::env::set_var("TEST_PARSE_ENV_GARBAGE", "not-a-number");
        let value: usize = parse_env("TEST_PARSE_ENV_GARBAGE", 7);
        assert_eq!(value, 7);
        std::env::remove_var("TEST_PARSE_ENV_GARBAGE");
    }
}
