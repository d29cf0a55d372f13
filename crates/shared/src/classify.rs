//! Source classification for the diversity selector.
//!
//! Which sources count as "research papers" or "expert voices" is product
//! tuning, not algorithm: the selector receives this table as data and the
//! marker lists live in configuration.

#[derive(Debug, Clone)]
pub struct SourceClassifier {
    paper_markers: Vec<String>,
    expert_markers: Vec<String>,
}

impl SourceClassifier {
    /// Build a classifier from marker substrings. Matching is
    /// case-insensitive against the article's source label.
    pub fn new(paper_markers: &[String], expert_markers: &[String]) -> Self {
        Self {
            paper_markers: paper_markers.iter().map(|m| m.to_lowercase()).collect(),
            expert_markers: expert_markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    pub fn is_paper(&self, source: &str) -> bool {
        let source = source.to_lowercase();
        self.paper_markers.iter().any(|m| source.contains(m.as_str()))
    }

    pub fn is_expert(&self, source: &str) -> bool {
        let source = source.to_lowercase();
        self.expert_markers.iter().any(|m| source.contains(m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> SourceClassifier {
        SourceClassifier::new(
            &["hugging face papers".into(), "arxiv".into()],
            &["bluesky".into()],
        )
    }

    #[test]
    fn test_paper_membership_is_substring_match() {
        let c = classifier();
        assert!(c.is_paper("Hugging Face Papers"));
        assert!(c.is_paper("arXiv cs.CL"));
        assert!(!c.is_paper("Reddit r/MachineLearning"));
    }

    #[test]
    fn test_expert_membership_is_case_insensitive() {
        let c = classifier();
        assert!(c.is_expert("BlueSky @karpathy"));
        assert!(!c.is_expert("Google News"));
    }

    #[test]
    fn test_empty_tables_match_nothing() {
        let c = SourceClassifier::new(&[], &[]);
        assert!(!c.is_paper("Hugging Face Papers"));
        assert!(!c.is_expert("Bluesky"));
    }
}
