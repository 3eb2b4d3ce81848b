//! MCP parameter definitions for the `project_*` tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::service::{NewProjectDoc, ProjectSearch};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProjectSearchParams {
    #[schemars(description = "Exact project name")]
    pub project: String,

    #[schemars(description = "Natural language query")]
    pub query: String,

    #[schemars(description = "Maximum number of results (1-100). Defaults to 10.")]
    pub k: Option<usize>,

    #[schemars(description = "Only return documents carrying at least one of these tags")]
    pub tags: Option<Vec<String>>,
}

impl From<ProjectSearchParams> for ProjectSearch {
    fn from(p: ProjectSearchParams) -> Self {
        Self {
            project: p.project,
            query: p.query,
            k: p.k,
            tags: p.tags.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProjectBrowseParams {
    #[schemars(description = "Exact project name")]
    pub project: String,

    #[schemars(description = "Only list documents whose path starts with this literal prefix")]
    pub path_prefix: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProjectContextPackParams {
    #[schemars(description = "Exact project name")]
    pub project: String,

    /// Facet names; unknown ones are ignored.
    #[schemars(description = "Facets to include: 'readme', 'api', 'recent'. Defaults to ['readme', 'api'].")]
    pub facets: Option<Vec<String>>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ProjectIngestParams {
    pub project: String,

    #[schemars(description = "Path of the document within the project")]
    pub path: String,

    #[schemars(description = "One of: readme, doc, code, api, todo, comment")]
    pub kind: String,

    pub body: String,

    pub tags: Option<Vec<String>>,
}

impl From<ProjectIngestParams> for NewProjectDoc {
    fn from(p: ProjectIngestParams) -> Self {
        Self {
            project: p.project,
            path: p.path,
            kind: p.kind,
            body: p.body,
            tags: p.tags.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, JsonSchema)]
pub struct ProjectListParams {}
