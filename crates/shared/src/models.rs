use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Editorial category assigned during curation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Opinion,
    Forum,
    Report,
    Future,
    SuccessCase,
    Uncategorized,
}

impl Category {
    /// Section order used when composing an edition.
    pub const SECTION_ORDER: [Category; 6] = [
        Category::Report,
        Category::SuccessCase,
        Category::Opinion,
        Category::Forum,
        Category::Future,
        Category::Uncategorized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Opinion => "opinion",
            Category::Forum => "forum",
            Category::Report => "report",
            Category::Future => "future",
            Category::SuccessCase => "success_case",
            Category::Uncategorized => "uncategorized",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Category::Opinion => "Opinions & Analysis",
            Category::Forum => "Community Discussions",
            Category::Report => "Research & Reports",
            Category::Future => "Future Outlook",
            Category::SuccessCase => "Success Stories",
            Category::Uncategorized => "Other Notable",
        }
    }

    /// Parse a category label; anything unrecognized maps to Uncategorized
    /// so a sloppy judge response never poisons a row.
    pub fn parse_lossy(s: &str) -> Self {
        match s.trim() {
            "opinion" => Category::Opinion,
            "forum" => Category::Forum,
            "report" => Category::Report,
            "future" => Category::Future,
            "success_case" => Category::SuccessCase,
            _ => Category::Uncategorized,
        }
    }
}

/// The five judgment axes produced by the curation judge.
///
/// All axes are 0.0-1.0 except recency_bonus, which is 0.0-0.2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    pub relevance: f64,
    pub impact: f64,
    pub actionability: f64,
    pub source_quality: f64,
    pub recency_bonus: f64,
}

/// A collected article moving through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    /// Canonical URL; primary key, immutable once stored.
    pub url: String,
    pub title: String,
    /// Free-text provenance label, e.g. "Hugging Face Papers".
    pub source: String,
    pub raw_content: String,
    pub summary: String,
    pub category: Category,
    pub scores: Scores,
    /// Weighted sum of the five sub-scores; zero until curated.
    pub final_score: f64,
    pub collected_at: DateTime<Utc>,
    pub curated: bool,
    pub sent: bool,
}

impl Article {
    pub fn new(url: impl Into<String>, title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            source: source.into(),
            raw_content: String::new(),
            summary: String::new(),
            category: Category::Uncategorized,
            scores: Scores::default(),
            final_score: 0.0,
            collected_at: Utc::now(),
            curated: false,
            sent: false,
        }
    }
}

/// Lifecycle of a composed edition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditionStatus {
    Pending,
    Sent,
    Discarded,
}

impl EditionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EditionStatus::Pending => "pending",
            EditionStatus::Sent => "sent",
            EditionStatus::Discarded => "discarded",
        }
    }

    pub fn parse_lossy(s: &str) -> Self {
        match s.trim() {
            "sent" => EditionStatus::Sent,
            "discarded" => EditionStatus::Discarded,
            _ => EditionStatus::Pending,
        }
    }
}

/// One shortlist-to-dispatch cycle, as persisted.
#[derive(Debug, Clone)]
pub struct Edition {
    pub id: i64,
    pub run_id: String,
    pub subject: String,
    pub body: String,
    /// Selected article URLs in shortlist order.
    pub urls: Vec<String>,
    /// Thematic metadata kept as read-only history across editions.
    pub topics: Vec<String>,
    pub status: EditionStatus,
    pub created_at: DateTime<Utc>,
}

/// A manually curated URL waiting to enter the pool.
#[derive(Debug, Clone)]
pub struct EditorPick {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub note: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_parse_known_labels() {
        assert_eq!(Category::parse_lossy("report"), Category::Report);
        assert_eq!(Category::parse_lossy("success_case"), Category::SuccessCase);
        assert_eq!(Category::parse_lossy(" opinion "), Category::Opinion);
    }

    #[test]
    fn test_category_parse_unknown_is_uncategorized() {
        assert_eq!(Category::parse_lossy("breaking-news"), Category::Uncategorized);
        assert_eq!(Category::parse_lossy(""), Category::Uncategorized);
    }

    #[test]
    fn test_category_round_trip() {
        for cat in Category::SECTION_ORDER {
            assert_eq!(Category::parse_lossy(cat.as_str()), cat);
        }
    }

    #[test]
    fn test_new_article_is_unprocessed() {
        let article = Article::new("https://example.com/a", "Title", "RSS");
        assert!(!article.curated);
        assert!(!article.sent);
        assert_eq!(article.final_score, 0.0);
        assert_eq!(article.category, Category::Uncategorized);
    }
}
