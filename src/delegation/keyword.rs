//! Keyword rule table used when the classifier oracle is unavailable.
//!
//! Rules are evaluated in insertion order against the lower-cased query; the
//! first rule with any matching keyword wins. Fallback decisions carry a
//! fixed low confidence so downstream consumers can tell them apart from
//! oracle answers, but routing proceeds regardless.

use super::classifier::{RoutingDecision, RoutingMethod};

/// Confidence assigned to every rule-based decision.
pub const FALLBACK_CONFIDENCE: f64 = 0.3;

/// One keyword rule.
#[derive(Debug, Clone)]
pub struct KeywordRule {
    /// Substrings matched against the lower-cased query.
    pub keywords: Vec<String>,
    /// Target agent when any keyword matches.
    pub target_agent: String,
    /// Query category reported in the decision.
    pub query_type: String,
}

/// Ordered rule table with a default agent for unmatched queries.
#[derive(Debug, Clone)]
pub struct KeywordRouter {
    rules: Vec<KeywordRule>,
    default_agent: String,
}

impl KeywordRouter {
    /// Empty table; every query routes to the default agent.
    pub fn new(default_agent: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_agent: default_agent.into(),
        }
    }

    /// The standard rule table, in its original evaluation order.
    pub fn with_default_rules(default_agent: impl Into<String>) -> Self {
        Self::new(default_agent)
            .rule(
                ["order", "sales", "sold", "purchase", "history", "analytics"],
                "order-history",
                "order-history",
            )
            .rule(["price", "cost", "update", "change"], "price-update", "price-update")
            .rule(
                ["pdf", "document", "file", "upload", "import"],
                "pdf-ingestion",
                "pdf-ingestion",
            )
            .rule(["menu", "item", "dish", "food", "category"], "menu", "menu")
    }

    /// Append a rule. Order matters; earlier rules shadow later ones.
    pub fn rule<I, S>(mut self, keywords: I, target_agent: &str, query_type: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.push(KeywordRule {
            keywords: keywords.into_iter().map(Into::into).collect(),
            target_agent: target_agent.to_string(),
            query_type: query_type.to_string(),
        });
        self
    }

    /// Route a query through the rule table.
    pub fn route(&self, query: &str) -> RoutingDecision {
        let lowered = query.to_lowercase();
        let (target_agent, query_type) = self
            .rules
            .iter()
            .find(|rule| rule.keywords.iter().any(|k| lowered.contains(k.as_str())))
            .map(|rule| (rule.target_agent.clone(), rule.query_type.clone()))
            .unwrap_or_else(|| (self.default_agent.clone(), "general".to_string()));

        RoutingDecision {
            target_agent,
            query_type,
            confidence: FALLBACK_CONFIDENCE,
            reasoning: "Fallback rule-based classification".to_string(),
            method: RoutingMethod::Fallback,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_match_in_order() {
        let router = KeywordRouter::with_default_rules("general");

        // "update" appears in the price rule, but the order rule fires first
        // because "history" matches and the order rule precedes it.
        let decision = router.route("Update the order history report");
        assert_eq!(decision.target_agent, "order-history");

        assert_eq!(router.route("What does the salmon cost?").target_agent, "price-update");
        assert_eq!(router.route("Import this PDF").target_agent, "pdf-ingestion");
        assert_eq!(router.route("Any vegan dishes?").target_agent, "menu");
    }

    #[test]
    fn test_unmatched_query_routes_to_default() {
        let router = KeywordRouter::with_default_rules("general");
        let decision = router.route("Hello there");
        assert_eq!(decision.target_agent, "general");
        assert_eq!(decision.query_type, "general");
    }

    #[test]
    fn test_fallback_decision_shape() {
        let router = KeywordRouter::with_default_rules("general");
        let decision = router.route("show me the menu");
        assert_eq!(decision.method, RoutingMethod::Fallback);
        assert_eq!(decision.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(decision.reasoning, "Fallback rule-based classification");
    }

    #[test]
    fn test_matching_is_case_insensitive() {
        let router = KeywordRouter::with_default_rules("general");
        assert_eq!(router.route("SHOW ME THE MENU").target_agent, "menu");
    }
}
