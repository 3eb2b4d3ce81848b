use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::service::{NewReference, ReferenceQuery};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RefsListParams {
    #[schemars(description = "Only return references carrying at least one of these tags")]
    pub tags: Option<Vec<String>>,

    #[schemars(description = "Maximum number of references (1-500). Defaults to 50.")]
    pub limit: Option<usize>,
}

impl From<RefsListParams> for ReferenceQuery {
    fn from(p: RefsListParams) -> Self {
        Self {
            tags: p.tags.unwrap_or_default(),
            limit: p.limit,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RefsAddParams {
    pub title: String,

    #[schemars(description = "Absolute http(s) URL")]
    pub url: String,

    pub note: Option<String>,

    pub tags: Option<Vec<String>>,

    #[schemars(description = "Minimum access tier required to see this reference. Defaults to 0.")]
    pub tier: Option<u32>,
}

impl From<RefsAddParams> for NewReference {
    fn from(p: RefsAddParams) -> Self {
        Self {
            title: p.title,
            url: p.url,
            note: p.note,
            tags: p.tags.unwrap_or_default(),
            tier: p.tier,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RefsFindByTagParams {
    #[schemars(description = "A single tag to match")]
    pub tag: String,
}
