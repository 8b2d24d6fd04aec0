//! Topic selection

use regex::Regex;

use crate::error::Result;

/// Accepts topics that match any of a list of regular expressions.
///
/// Matching is a search, not a full match: `sensor$` accepts
/// `geo/temperature-sensor`. An empty router accepts nothing.
#[derive(Debug, Clone, Default)]
pub struct TopicRouter {
    patterns: Vec<Regex>,
}

impl TopicRouter {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref().trim()))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// Build from a comma separated selector. Blank entries are ignored.
    pub fn from_selector(selector: &str) -> Result<Self> {
        Self::new(datapipe_common::env::split_list(selector))
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(topic))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::StreamError;

    #[test]
    fn test_any_pattern_matches() {
        let router = TopicRouter::new(["^geo/.*", "sensor$"]).unwrap();
        assert!(router.matches("geo/sensor/1"));
        assert!(router.matches("city/air-sensor"));
        assert!(!router.matches("other/topic"));
    }

    #[test]
    fn test_search_semantics() {
        let router = TopicRouter::from_selector("fieldtester").unwrap();
        assert!(router.matches("v3/kl/devices/fieldtester-07/up"));
        assert!(!router.matches("v3/kl/devices/gateway/up"));
    }

    #[test]
    fn test_selector_ignores_blank_entries() {
        let router = TopicRouter::from_selector(" ^geo/ , ,sensor$,").unwrap();
        assert_eq!(router.len(), 2);
    }

    #[test]
    fn test_empty_selector_rejects_everything() {
        let router = TopicRouter::from_selector("  ").unwrap();
        assert!(router.is_empty());
        assert!(!router.matches("geo/sensor/1"));
        assert!(!router.matches(""));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = TopicRouter::from_selector("geo/(").unwrap_err();
        assert!(matches!(err, StreamError::Pattern(_)));
    }
}
