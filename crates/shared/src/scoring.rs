//! Score aggregation: five judgment axes collapse into one ranking scalar.

use crate::models::{Article, Scores};

pub const WEIGHT_RELEVANCE: f64 = 0.35;
pub const WEIGHT_IMPACT: f64 = 0.25;
pub const WEIGHT_ACTIONABILITY: f64 = 0.20;
pub const WEIGHT_SOURCE_QUALITY: f64 = 0.15;
pub const WEIGHT_RECENCY_BONUS: f64 = 0.05;

/// Weighted sum of the five sub-scores.
///
/// Inputs are trusted to honor their documented ranges (the judge clamps
/// them before they get here); a zero sub-score simply contributes zero.
pub fn final_score(scores: &Scores) -> f64 {
    scores.relevance * WEIGHT_RELEVANCE
        + scores.impact * WEIGHT_IMPACT
        + scores.actionability * WEIGHT_ACTIONABILITY
        + scores.source_quality * WEIGHT_SOURCE_QUALITY
        + scores.recency_bonus * WEIGHT_RECENCY_BONUS
}

/// The canonical sort key for ranking.
///
/// Rows written before the multi-score schema only carry a relevance score,
/// so a zero final_score falls back to the raw relevance value.
pub fn effective_score(article: &Article) -> f64 {
    if article.final_score > 0.0 {
        article.final_score
    } else {
        article.scores.relevance
    }
}
