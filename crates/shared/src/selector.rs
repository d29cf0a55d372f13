//! Diversity-aware shortlist selection.
//!
//! Given the pool of curated, unsent articles pre-sorted by score, build a
//! bounded shortlist in four strict phases: reserve the headline, satisfy
//! the paper quota, satisfy the expert quota, then fill by score. Output
//! order follows phase order, not score order: a paper forced in by quota
//! may rank below an article the source cap excluded.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::classify::SourceClassifier;
use crate::models::Article;

#[derive(Debug, Clone, Copy)]
pub struct SelectionParams {
    /// Maximum shortlist size.
    pub limit: usize,
    /// Per-source cap, headline included.
    pub max_same_source: usize,
    /// Minimum research-paper items to include if available.
    pub min_papers: usize,
    /// Minimum expert-voice items to include if available.
    pub min_expert: usize,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            limit: 20,
            max_same_source: 5,
            min_papers: 2,
            min_expert: 1,
        }
    }
}

/// A quota the pool could not satisfy. Informational, never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortfall {
    Papers { wanted: usize, got: usize },
    Experts { wanted: usize, got: usize },
}

impl fmt::Display for Shortfall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shortfall::Papers { wanted, got } => {
                write!(f, "paper quota unmet: wanted {}, got {}", wanted, got)
            }
            Shortfall::Experts { wanted, got } => {
                write!(f, "expert quota unmet: wanted {}, got {}", wanted, got)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Selection {
    /// Shortlist in phase order (headline first).
    pub articles: Vec<Article>,
    pub shortfalls: Vec<Shortfall>,
}

impl Selection {
    fn empty() -> Self {
        Self {
            articles: Vec::new(),
            shortfalls: Vec::new(),
        }
    }
}

/// Select at most `params.limit` articles from `pool`.
///
/// The pool must already be sorted descending by effective score with a
/// deterministic tiebreak (the store's selection query guarantees this);
/// same pool and parameters always produce the same shortlist.
pub fn select(pool: &[Article], params: &SelectionParams, classifier: &SourceClassifier) -> Selection {
    if pool.is_empty() || params.limit == 0 {
        return Selection::empty();
    }

    let mut picker = Picker::new(params);

    // Phase 1: the single highest-scoring item is the lead story,
    // regardless of source or category. It still counts against its
    // source's quota.
    picker.force(&pool[0]);

    // Phase 2: paper quota, in score order.
    while picker.count_matching(classifier, Kind::Paper) < params.min_papers {
        match picker.next_eligible(pool, |a| classifier.is_paper(&a.source)) {
            Some(article) => picker.add(article),
            None => break,
        }
    }
    let papers = picker.count_matching(classifier, Kind::Paper);
    let mut shortfalls = Vec::new();
    if papers < params.min_papers {
        shortfalls.push(Shortfall::Papers {
            wanted: params.min_papers,
            got: papers,
        });
    }

    // Phase 3: expert quota, same scan and skip rules.
    while picker.count_matching(classifier, Kind::Expert) < params.min_expert {
        match picker.next_eligible(pool, |a| classifier.is_expert(&a.source)) {
            Some(article) => picker.add(article),
            None => break,
        }
    }
    let experts = picker.count_matching(classifier, Kind::Expert);
    if experts < params.min_expert {
        shortfalls.push(Shortfall::Experts {
            wanted: params.min_expert,
            got: experts,
        });
    }

    // Phase 4: fill the remainder by score.
    while picker.selected.len() < params.limit {
        match picker.next_eligible(pool, |_| true) {
            Some(article) => picker.add(article),
            None => break,
        }
    }

    Selection {
        articles: picker.selected,
        shortfalls,
    }
}

#[derive(Clone, Copy)]
enum Kind {
    Paper,
    Expert,
}

struct Picker<'a> {
    params: &'a SelectionParams,
    selected: Vec<Article>,
    urls: HashSet<String>,
    per_source: HashMap<String, usize>,
}

impl<'a> Picker<'a> {
    fn new(params: &'a SelectionParams) -> Self {
        Self {
            params,
            selected: Vec::new(),
            urls: HashSet::new(),
            per_source: HashMap::new(),
        }
    }

    /// Add regardless of the source cap (headline reservation only).
    fn force(&mut self, article: &Article) {
        self.urls.insert(article.url.clone());
        *self.per_source.entry(article.source.clone()).or_insert(0) += 1;
        self.selected.push(article.clone());
    }

    fn add(&mut self, article: Article) {
        self.urls.insert(article.url.clone());
        *self.per_source.entry(article.source.clone()).or_insert(0) += 1;
        self.selected.push(article);
    }

    /// First pool item, in score order, that matches the predicate, is not
    /// yet selected, and whose source is under the cap.
    fn next_eligible(&self, pool: &[Article], matches: impl Fn(&Article) -> bool) -> Option<Article> {
        pool.iter()
            .find(|a| {
                !self.urls.contains(&a.url)
                    && self.per_source.get(&a.source).copied().unwrap_or(0) < self.params.max_same_source
                    && matches(a)
            })
            .cloned()
    }

    fn count_matching(&self, classifier: &SourceClassifier, kind: Kind) -> usize {
        self.selected
            .iter()
            .filter(|a| match kind {
                Kind::Paper => classifier.is_paper(&a.source),
                Kind::Expert => classifier.is_expert(&a.source),
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Article;

    fn classifier() -> SourceClassifier {
        SourceClassifier::new(&["papers".into()], &["expert".into()])
    }

    fn scored(url: &str, source: &str, score: f64) -> Article {
        let mut a = Article::new(format!("https://{url}"), url, source);
        a.curated = true;
        a.final_score = score;
        a.scores.relevance = score;
        a
    }

    /// Pools in these tests are built pre-sorted, matching the store's
    /// selection query contract.
    fn sort_pool(pool: &mut [Article]) {
        pool.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap()
                .then_with(|| a.url.cmp(&b.url))
        });
    }

    #[test]
    fn test_empty_pool_returns_empty_selection() {
        let selection = select(&[], &SelectionParams::default(), &classifier());
        assert!(selection.articles.is_empty());
        assert!(selection.shortfalls.is_empty());
    }

    #[test]
    fn test_headline_is_top_scoring_item() {
        let mut pool = vec![
            scored("b", "Reddit", 0.5),
            scored("a", "Reddit", 0.9),
            scored("c", "Papers Feed", 0.4),
        ];
        sort_pool(&mut pool);
        let params = SelectionParams {
            min_papers: 0,
            min_expert: 0,
            ..SelectionParams::default()
        };
        let selection = select(&pool, &params, &classifier());
        assert_eq!(selection.articles[0].url, "https://a");
    }

    #[test]
    fn test_thirty_item_pool_meets_all_quotas() {
        // 3 Reddit items (0.9, 0.85, 0.3), 2 papers (0.6, 0.4), 1 expert
        // (0.5), the rest uncategorized scattered scores.
        let mut pool = vec![
            scored("reddit-1", "Reddit", 0.9),
            scored("reddit-2", "Reddit", 0.85),
            scored("reddit-3", "Reddit", 0.3),
            scored("paper-1", "Papers Feed", 0.6),
            scored("paper-2", "Papers Feed", 0.4),
            scored("expert-1", "Expert Blog", 0.5),
        ];
        for i in 0..24 {
            pool.push(scored(&format!("misc-{i:02}"), &format!("Source {i}"), 0.01 * i as f64));
        }
        sort_pool(&mut pool);

        let params = SelectionParams {
            limit: 10,
            max_same_source: 5,
            min_papers: 2,
            min_expert: 1,
        };
        let selection = select(&pool, &params, &classifier());

        assert_eq!(selection.articles.len(), 10);
        assert!(selection.shortfalls.is_empty());
        // Headline is the top Reddit item.
        assert_eq!(selection.articles[0].url, "https://reddit-1");
        // Both papers and the expert made it in.
        let urls: Vec<&str> = selection.articles.iter().map(|a| a.url.as_str()).collect();
        assert!(urls.contains(&"https://paper-1"));
        assert!(urls.contains(&"https://paper-2"));
        assert!(urls.contains(&"https://expert-1"));
        // Quota items come right after the headline, in phase order.
        assert_eq!(selection.articles[1].url, "https://paper-1");
        assert_eq!(selection.articles[2].url, "https://paper-2");
        assert_eq!(selection.articles[3].url, "https://expert-1");
        // Reddit never exceeds the cap.
        let reddit = selection.articles.iter().filter(|a| a.source == "Reddit").count();
        assert!(reddit <= 5);
    }

    #[test]
    fn test_no_duplicate_urls() {
        let mut pool: Vec<Article> = (0..40)
            .map(|i| scored(&format!("item-{i:02}"), &format!("S{}", i % 4), 0.02 * i as f64))
            .collect();
        sort_pool(&mut pool);
        let selection = select(&pool, &SelectionParams::default(), &classifier());

        let mut seen = std::collections::HashSet::new();
        for article in &selection.articles {
            assert!(seen.insert(article.url.clone()), "duplicate {}", article.url);
        }
    }

    #[test]
    fn test_source_cap_holds_including_headline() {
        // One source dominates the pool; it is capped, never excluded.
        let mut pool: Vec<Article> = (0..15)
            .map(|i| scored(&format!("dom-{i:02}"), "Dominant", 0.9 - 0.01 * i as f64))
            .collect();
        for i in 0..10 {
            pool.push(scored(&format!("other-{i:02}"), &format!("O{i}"), 0.1));
        }
        sort_pool(&mut pool);

        let params = SelectionParams {
            limit: 12,
            max_same_source: 5,
            min_papers: 0,
            min_expert: 0,
        };
        let selection = select(&pool, &params, &classifier());

        let dominant = selection.articles.iter().filter(|a| a.source == "Dominant").count();
        assert_eq!(dominant, 5);
        assert_eq!(selection.articles.len(), 12);
        // Headline still came from the dominant source.
        assert_eq!(selection.articles[0].source, "Dominant");
    }

    #[test]
    fn test_paper_shortfall_is_reported_not_padded() {
        let mut pool = vec![
            scored("lead", "News", 0.9),
            scored("paper-1", "Papers Feed", 0.6),
            scored("expert-1", "Expert Blog", 0.5),
            scored("misc-1", "News", 0.4),
            scored("misc-2", "Blog", 0.35),
        ];
        sort_pool(&mut pool);

        let params = SelectionParams {
            limit: 10,
            max_same_source: 5,
            min_papers: 2,
            min_expert: 1,
        };
        let selection = select(&pool, &params, &classifier());

        // The one available paper is included; nothing pads the quota.
        let papers = selection
            .articles
            .iter()
            .filter(|a| classifier().is_paper(&a.source))
            .count();
        assert_eq!(papers, 1);
        assert_eq!(
            selection.shortfalls,
            vec![Shortfall::Papers { wanted: 2, got: 1 }]
        );
        // Pool smaller than limit: everything eligible, no padding.
        assert_eq!(selection.articles.len(), 5);
    }

    #[test]
    fn test_headline_counts_toward_quota() {
        // When the headline is itself a paper, it satisfies part of the quota.
        let mut pool = vec![
            scored("paper-1", "Papers Feed", 0.9),
            scored("paper-2", "Papers Feed", 0.6),
            scored("paper-3", "Papers Feed", 0.5),
            scored("misc-1", "News", 0.8),
        ];
        sort_pool(&mut pool);

        let params = SelectionParams {
            limit: 3,
            max_same_source: 5,
            min_papers: 2,
            min_expert: 0,
        };
        let selection = select(&pool, &params, &classifier());

        // Headline paper-1 plus quota paper-2; phase 4 fills misc-1 by score.
        let urls: Vec<&str> = selection.articles.iter().map(|a| a.url.as_str()).collect();
        assert_eq!(urls, vec!["https://paper-1", "https://paper-2", "https://misc-1"]);
    }

    #[test]
    fn test_quota_items_skip_capped_sources() {
        // Papers Feed hits the cap before the quota scan reaches paper-4;
        // the second quota slot goes to the other papers source.
        let mut pool = vec![
            scored("paper-1", "Papers Feed", 0.9),
            scored("paper-2", "Papers Feed", 0.8),
            scored("paper-3", "Papers Feed", 0.7),
            scored("paper-4", "Papers Feed", 0.6),
            scored("alt-paper", "Other Papers", 0.2),
        ];
        sort_pool(&mut pool);

        let params = SelectionParams {
            limit: 5,
            max_same_source: 3,
            min_papers: 4,
            min_expert: 0,
        };
        let selection = select(&pool, &params, &classifier());

        let from_main = selection.articles.iter().filter(|a| a.source == "Papers Feed").count();
        assert_eq!(from_main, 3);
        assert!(selection.articles.iter().any(|a| a.url == "https://alt-paper"));
        assert!(selection.shortfalls.is_empty());
    }

    #[test]
    fn test_deterministic_for_same_pool() {
        let mut pool: Vec<Article> = (0..25)
            .map(|i| scored(&format!("item-{i:02}"), &format!("S{}", i % 3), 0.5))
            .collect();
        sort_pool(&mut pool);

        let params = SelectionParams::default();
        let first = select(&pool, &params, &classifier());
        let second = select(&pool, &params, &classifier());
        let a: Vec<&str> = first.articles.iter().map(|x| x.url.as_str()).collect();
        let b: Vec<&str> = second.articles.iter().map(|x| x.url.as_str()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_limit_zero_selects_nothing() {
        let pool = vec![scored("a", "News", 0.9)];
        let params = SelectionParams {
            limit: 0,
            ..SelectionParams::default()
        };
        let selection = select(&pool, &params, &classifier());
        assert!(selection.articles.is_empty());
    }
}
