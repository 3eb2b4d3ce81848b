//! MCP parameter definitions for the `rules_*` tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::service::{NewRule, RuleSearch};

/// Parameters for `rules_search`.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RulesSearchParams {
    #[schemars(description = "Natural language query")]
    pub query: String,

    /// Number of results. Defaults to 10, at most 100.
    #[schemars(description = "Maximum number of results (1-100). Defaults to 10.")]
    pub k: Option<usize>,

    #[schemars(description = "Only return rules carrying at least one of these tags")]
    pub tags: Option<Vec<String>>,
}

impl From<RulesSearchParams> for RuleSearch {
    fn from(p: RulesSearchParams) -> Self {
        Self {
            query: p.query,
            k: p.k,
            tags: p.tags.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RulesGetParams {
    #[schemars(description = "ID of the rule")]
    pub id: String,
}

/// `rules_tags` takes no arguments.
#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct RulesTagsParams {}

/// Parameters for `rules_ingest`.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RulesIngestParams {
    #[schemars(description = "Short title of the rule")]
    pub title: String,

    #[schemars(description = "Full text of the rule")]
    pub body: String,

    #[schemars(description = "Tags such as 'security' or 'performance'")]
    pub tags: Option<Vec<String>>,

    /// Minimum caller tier needed to see this rule. Defaults to 0.
    #[schemars(description = "Minimum access tier required to read this rule. Defaults to 0 (everyone).")]
    pub tier: Option<u32>,
}

impl From<RulesIngestParams> for NewRule {
    fn from(p: RulesIngestParams) -> Self {
        Self {
            title: p.title,
            body: p.body,
            tags: p.tags.unwrap_or_default(),
            tier: p.tier,
        }
    }
}
