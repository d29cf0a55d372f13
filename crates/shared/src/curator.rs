//! Batch curation against the Claude API.
//!
//! Articles go to the judge in fixed-size batches; each verdict carries a
//! category, the five sub-scores, and a summary. The response is judge
//! output driving persisted state, so it is parsed into a typed record
//! with defaulted fields and every score clamped to its documented range.
//! A failed batch leaves its articles uncurated for the next run.

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::{Article, Category, Scores};
use crate::run::RunContext;
use crate::scoring;
use crate::store::Store;

pub const BATCH_SIZE: usize = 10;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

const SYSTEM_PROMPT: &str = r#"You are an AI news curator for a weekly newsletter. Your job is to analyze articles and provide structured metadata for each one.

For each article, you must return:
1. **category**: One of: opinion, forum, report, future, success_case, uncategorized
   - opinion: Opinion pieces, editorials, analysis, commentary
   - forum: Community discussions, Reddit threads, forum posts
   - report: Research papers, industry reports, benchmark results, technical announcements
   - future: Forward-looking pieces, predictions, theoretical explorations
   - success_case: Real-world AI implementations, case studies, production deployments
   - uncategorized: Doesn't fit other categories

2. **Scores** (all 0.0 to 1.0 unless noted):
   - **relevance**: How relevant and interesting this is for an AI-focused audience (0.0-1.0)
   - **impact**: Breakthrough vs incremental. Major paradigm shifts=0.9+, significant=0.7, incremental=0.3-0.5 (0.0-1.0)
   - **actionability**: Can readers act on this now? Practical tools/techniques=0.8+, theoretical=0.2 (0.0-1.0)
   - **source_quality**: Research paper=0.9+, Expert blog=0.8, Major news outlet=0.6, Reddit/forum=0.4 (0.0-1.0)
   - **recency_bonus**: Extra credit for very fresh news. Breaking/today=0.2, this week=0.1, older=0.0 (0.0-0.2)

3. **summary**: A concise 2-3 sentence summary capturing the key takeaway. Write in a professional, engaging tone.

Respond with a JSON array of objects, one per article. Each object must have: "url", "category", "relevance", "impact", "actionability", "source_quality", "recency_bonus", "summary"."#;

#[derive(Serialize)]
struct ClaudeRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// Raw judge output: the response text plus token accounting.
#[derive(Debug, Default)]
pub struct JudgeReply {
    pub text: String,
    pub usage: Usage,
}

/// The model boundary. Production talks to the Claude HTTP API; tests
/// substitute a local double, same seam as the emailer's [`Transport`].
///
/// [`Transport`]: crate::emailer::Transport
#[async_trait]
pub trait Judge: Send + Sync {
    async fn evaluate(&self, prompt: &str) -> Result<JudgeReply>;
}

pub struct ClaudeJudge {
    client: Client,
    api_key: String,
    model: String,
}

impl ClaudeJudge {
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl Judge for ClaudeJudge {
    async fn evaluate(&self, prompt: &str) -> Result<JudgeReply> {
        let request = ClaudeRequest {
            model: self.model.clone(),
            max_tokens: 4096,
            system: SYSTEM_PROMPT.to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .context("Failed to send request to Claude API")?;

        if !response.status().is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("unknown error"));
            anyhow::bail!("Claude API error: {}", error_text);
        }

        let claude_response = response
            .json::<ClaudeResponse>()
            .await
            .context("Failed to parse Claude API response")?;

        let text = claude_response
            .content
            .first()
            .map(|c| c.text.clone())
            .unwrap_or_default();

        Ok(JudgeReply {
            text,
            usage: claude_response.usage,
        })
    }
}

/// One judged article as returned by the model. Every field except the URL
/// is optional and defaults to its zero value.
#[derive(Debug, Deserialize)]
pub struct Verdict {
    pub url: String,
    #[serde(default)]
    pub category: String,
    // Older judge prompts returned "relevance_score"; accept both.
    #[serde(default, alias = "relevance_score")]
    pub relevance: f64,
    #[serde(default)]
    pub impact: f64,
    #[serde(default)]
    pub actionability: f64,
    #[serde(default)]
    pub source_quality: f64,
    #[serde(default)]
    pub recency_bonus: f64,
    #[serde(default)]
    pub summary: String,
}

impl Verdict {
    /// The judge's scores, coerced into their documented ranges.
    pub fn clamped_scores(&self) -> Scores {
        Scores {
            relevance: self.relevance.clamp(0.0, 1.0),
            impact: self.impact.clamp(0.0, 1.0),
            actionability: self.actionability.clamp(0.0, 1.0),
            source_quality: self.source_quality.clamp(0.0, 1.0),
            recency_bonus: self.recency_bonus.clamp(0.0, 0.2),
        }
    }
}

pub struct Curator {
    judge: Box<dyn Judge>,
    model: String,
    context_length: usize,
}

impl Curator {
    pub fn new(api_key: String, model: String, context_length: usize) -> Result<Self> {
        let judge = ClaudeJudge::new(api_key, model.clone())?;
        Ok(Self::with_judge(Box::new(judge), model, context_length))
    }

    pub fn with_judge(judge: Box<dyn Judge>, model: impl Into<String>, context_length: usize) -> Self {
        Self {
            judge,
            model: model.into(),
            context_length,
        }
    }

    /// Judge all articles in batches of [`BATCH_SIZE`]. Articles in a batch
    /// that fails (or that the judge did not answer for) come back
    /// unchanged with `curated` still false, to be retried next run.
    pub async fn curate(
        &self,
        articles: Vec<Article>,
        store: &Store,
        run: &RunContext,
    ) -> Vec<Article> {
        if articles.is_empty() {
            return Vec::new();
        }

        let mut curated = Vec::with_capacity(articles.len());
        for batch in articles.chunks(BATCH_SIZE) {
            match self.judge_batch(batch).await {
                Ok((verdicts, usage)) => {
                    if let Err(e) = store.log_api_usage(
                        run,
                        &self.model,
                        "curation",
                        usage.input_tokens,
                        usage.output_tokens,
                    ) {
                        debug!("Failed to log API usage: {e}");
                    }
                    curated.extend(apply_verdicts(batch.to_vec(), &verdicts));
                }
                Err(e) => {
                    warn!("Curation batch failed, {} articles left for retry: {e:#}", batch.len());
                    curated.extend(batch.to_vec());
                }
            }
        }

        let done = curated.iter().filter(|a| a.curated).count();
        info!("Curated {done}/{} articles", curated.len());
        curated
    }

    async fn judge_batch(&self, batch: &[Article]) -> Result<(Vec<Verdict>, Usage)> {
        for attempt in 0..3 {
            match self.try_judge_batch(batch).await {
                Ok(result) => return Ok(result),
                Err(e) if attempt < 2 => {
                    let backoff = std::time::Duration::from_millis(500 * 2_u64.pow(attempt));
                    warn!("Judge call failed (attempt {}): {e:#}, retrying in {backoff:?}", attempt + 1);
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
        unreachable!("retry loop always returns")
    }

    async fn try_judge_batch(&self, batch: &[Article]) -> Result<(Vec<Verdict>, Usage)> {
        let payload: Vec<serde_json::Value> = batch
            .iter()
            .map(|a| {
                let preview = if a.raw_content.is_empty() {
                    "(no content scraped)"
                } else {
                    truncate_utf8(&a.raw_content, self.context_length)
                };
                serde_json::json!({
                    "url": a.url,
                    "title": a.title,
                    "source": a.source,
                    "content_preview": preview,
                })
            })
            .collect();

        let user_message = format!(
            "Analyze and curate the following articles. \
             Return a JSON array with one object per article.\n\nArticles:\n{}",
            serde_json::to_string_pretty(&payload)?
        );

        let reply = self.judge.evaluate(&user_message).await?;
        Ok((parse_verdicts(&reply.text), reply.usage))
    }
}

/// Merge verdicts back onto their articles by URL. Matched articles get the
/// clamped scores, the derived final score, and curated = true; articles
/// the judge skipped pass through untouched.
pub fn apply_verdicts(articles: Vec<Article>, verdicts: &[Verdict]) -> Vec<Article> {
    let mut result = Vec::with_capacity(articles.len());
    for mut article in articles {
        if let Some(verdict) = verdicts.iter().find(|v| v.url == article.url) {
            let scores = verdict.clamped_scores();
            article.category = Category::parse_lossy(&verdict.category);
            article.summary = verdict.summary.clone();
            article.scores = scores;
            article.final_score = scoring::final_score(&scores);
            article.curated = true;
        }
        result.push(article);
    }
    result
}

/// Extract a JSON array of verdicts from the model's text, tolerating
/// markdown code fences and surrounding prose. Returns an empty list when
/// nothing parseable is found; entries that fail to deserialize are
/// dropped individually.
pub fn parse_verdicts(text: &str) -> Vec<Verdict> {
    let mut text = text.trim();

    // Strip a markdown code fence if present.
    if text.starts_with("```") {
        let mut lines: Vec<&str> = text.lines().collect();
        lines.remove(0);
        if lines.last().map(|l| l.trim()) == Some("```") {
            lines.pop();
        }
        return parse_verdict_array(&lines.join("\n"));
    }

    // Fall back to the outermost array boundaries.
    if !text.starts_with('[') {
        if let (Some(start), Some(end)) = (text.find('['), text.rfind(']')) {
            if start < end {
                text = &text[start..=end];
            }
        }
    }

    parse_verdict_array(text)
}

fn parse_verdict_array(text: &str) -> Vec<Verdict> {
    let text = text.trim();
    let values: Vec<serde_json::Value> = match serde_json::from_str(text) {
        Ok(values) => values,
        Err(_) => {
            // One more chance: array boundaries inside fenced content.
            match (text.find('['), text.rfind(']')) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&text[start..=end]).unwrap_or_default()
                }
                _ => Vec::new(),
            }
        }
    };

    if values.is_empty() {
        warn!("Could not parse any verdicts from judge response");
    }

    values
        .into_iter()
        .filter_map(|v| serde_json::from_value::<Verdict>(v).ok())
        .collect()
}

/// Truncate to at most `max` bytes, respecting UTF-8 boundaries.
fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
