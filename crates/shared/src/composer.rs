//! Edition composition: turn a shortlist into a subject line and a
//! plain-text body with fixed sections. The headline (first shortlist
//! item) gets its own Top Story section; everything else is grouped by
//! category in a fixed order, keeping shortlist order within each group.
//! HTML rendering and styling belong to the external publisher.

use chrono::{DateTime, Utc};

use crate::models::{Article, Category};

/// Substituted per recipient just before send.
pub const UNSUBSCRIBE_PLACEHOLDER: &str = "{{unsubscribe_url}}";

#[derive(Debug, Clone)]
pub struct ComposedEdition {
    pub subject: String,
    pub body: String,
    /// Selected URLs in shortlist order, for the sent-flag bookkeeping.
    pub urls: Vec<String>,
    /// Thematic metadata recorded in the edition history.
    pub topics: Vec<String>,
}

pub fn compose(articles: &[Article], date: DateTime<Utc>) -> ComposedEdition {
    let formatted_date = date.format("%B %-d, %Y").to_string();
    let subject = format!("AI Weekly Digest - {formatted_date}");

    let mut body = String::new();
    let mut topics = Vec::new();

    body.push_str(&format!("# AI Weekly Digest\n{formatted_date}\n\n"));

    if let Some(headline) = articles.first() {
        body.push_str("## Top Story\n\n");
        push_article(&mut body, headline);
        topics.push(headline.title.clone());
    }

    let rest = if articles.is_empty() { articles } else { &articles[1..] };
    for category in Category::SECTION_ORDER {
        let section: Vec<&Article> = rest.iter().filter(|a| a.category == category).collect();
        if section.is_empty() {
            continue;
        }
        body.push_str(&format!("## {}\n\n", category.display_name()));
        topics.push(category.display_name().to_string());
        for article in section {
            push_article(&mut body, article);
        }
    }

    body.push_str("---\n");
    body.push_str(&format!("Unsubscribe: {UNSUBSCRIBE_PLACEHOLDER}\n"));

    ComposedEdition {
        subject,
        body,
        urls: articles.iter().map(|a| a.url.clone()).collect(),
        topics,
    }
}

fn push_article(body: &mut String, article: &Article) {
    body.push_str(&format!("### {} ({})\n", article.title, article.source));
    if !article.summary.is_empty() {
        body.push_str(&format!("{}\n", article.summary));
    }
    body.push_str(&format!("{}\n\n", article.url));
}
