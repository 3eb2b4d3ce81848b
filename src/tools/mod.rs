pub mod project;
pub mod refs;
pub mod rules;

use project::{
    ProjectBrowseParams, ProjectContextPackParams, ProjectIngestParams, ProjectListParams,
    ProjectSearchParams,
};
use refs::{RefsAddParams, RefsFindByTagParams, RefsListParams};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    AnnotateAble, ListResourcesResult, PaginatedRequestParams, RawResource,
    ReadResourceRequestParams, ReadResourceResult, Resource, ResourceContents,
};
use rmcp::service::RequestContext;
use rmcp::{tool, tool_handler, tool_router, ErrorData, RoleServer, ServerHandler};
use rules::{RulesGetParams, RulesIngestParams, RulesSearchParams, RulesTagsParams};
use serde::Serialize;

use crate::error::KnowledgeError;
use crate::knowledge::types::Caller;
use crate::service::KnowledgeService;

/// Read-only resource listing every project name.
pub const PROJECTS_RESOURCE_URI: &str = "mcp://projects/list";

/// The MCP tool handler. Every tool is a thin conversion onto
/// [`KnowledgeService`]; the caller identity is fixed per session.
#[derive(Clone)]
pub struct KnowledgeTools {
    tool_router: ToolRouter<Self>,
    service: KnowledgeService,
    caller: Caller,
}

#[tool_router]
impl KnowledgeTools {
    pub fn new(service: KnowledgeService, caller: Caller) -> Self {
        Self {
            tool_router: Self::tool_router(),
            service,
            caller,
        }
    }

    #[tool(description = "Search global engineering rules by natural language. Results are ranked by vector distance (lower is closer) and limited to rules your access tier can see.")]
    async fn rules_search(
        &self,
        Parameters(params): Parameters<RulesSearchParams>,
    ) -> Result<String, String> {
        tracing::info!(query = %params.query, k = ?params.k, "rules_search called");
        let results = self.service.search_rules(&self.caller, params.into()).await;
        render(results.map(|r| listing("results", r)))
    }

    #[tool(description = "Fetch one rule by ID.")]
    async fn rules_get(
        &self,
        Parameters(params): Parameters<RulesGetParams>,
    ) -> Result<String, String> {
        tracing::info!(id = %params.id, "rules_get called");
        render(self.service.get_rule_by_id(&self.caller, &params.id).await)
    }

    #[tool(description = "List every tag used by the rules you can see.")]
    async fn rules_tags(
        &self,
        Parameters(_params): Parameters<RulesTagsParams>,
    ) -> Result<String, String> {
        render(self.service.list_distinct_tags(&self.caller).await.map(|t| listing("tags", t)))
    }

    #[tool(description = "Add or replace a rule. Identical title and body replace the existing rule in place.")]
    async fn rules_ingest(
        &self,
        Parameters(params): Parameters<RulesIngestParams>,
    ) -> Result<String, String> {
        tracing::info!(title = %params.title, "rules_ingest called");
        render(self.service.ingest_rule(&self.caller, params.into()).await)
    }

    #[tool(description = "Search one project's documentation by natural language, ranked by vector distance.")]
    async fn project_search(
        &self,
        Parameters(params): Parameters<ProjectSearchParams>,
    ) -> Result<String, String> {
        tracing::info!(project = %params.project, query = %params.query, "project_search called");
        let results = self.service.search_project_docs(&self.caller, params.into()).await;
        render(results.map(|r| listing("results", r)))
    }

    #[tool(description = "List a project's documents by path without their bodies. Optionally restrict to a path prefix.")]
    async fn project_browse(
        &self,
        Parameters(params): Parameters<ProjectBrowseParams>,
    ) -> Result<String, String> {
        let docs = self
            .service
            .browse_project_docs(&self.caller, &params.project, params.path_prefix.as_deref())
            .await;
        render(docs.map(|d| listing("documents", d)))
    }

    #[tool(description = "Get a bounded context bundle for a project: latest readme (3) and api (5) docs by default, or 'recent' (10). Bodies are clipped.")]
    async fn project_context_pack(
        &self,
        Parameters(params): Parameters<ProjectContextPackParams>,
    ) -> Result<String, String> {
        let facets = params.facets.unwrap_or_default();
        render(
            self.service
                .get_context_pack(&self.caller, &params.project, &facets)
                .await,
        )
    }

    #[tool(description = "Add or replace a project document. Kind is one of readme, doc, code, api, todo, comment.")]
    async fn project_ingest(
        &self,
        Parameters(params): Parameters<ProjectIngestParams>,
    ) -> Result<String, String> {
        tracing::info!(project = %params.project, path = %params.path, "project_ingest called");
        render(self.service.ingest_project_doc(&self.caller, params.into()).await)
    }

    #[tool(description = "List all project names.")]
    async fn project_list(
        &self,
        Parameters(_params): Parameters<ProjectListParams>,
    ) -> Result<String, String> {
        render(self.service.list_projects(&self.caller).await.map(|p| listing("projects", p)))
    }

    #[tool(description = "List curated reference links, newest first, optionally filtered by tags.")]
    async fn refs_list(
        &self,
        Parameters(params): Parameters<RefsListParams>,
    ) -> Result<String, String> {
        let refs = self.service.list_references(&self.caller, params.into()).await;
        render(refs.map(|r| listing("references", r)))
    }

    #[tool(description = "Add a curated reference link. Requires access tier 1 or higher.")]
    async fn refs_add(
        &self,
        Parameters(params): Parameters<RefsAddParams>,
    ) -> Result<String, String> {
        tracing::info!(url = %params.url, "refs_add called");
        render(self.service.add_reference(&self.caller, params.into()).await)
    }

    #[tool(description = "List reference links carrying a single tag, newest first.")]
    async fn refs_find_by_tag(
        &self,
        Parameters(params): Parameters<RefsFindByTagParams>,
    ) -> Result<String, String> {
        let refs = self.service.find_references_by_tag(&self.caller, &params.tag).await;
        render(refs.map(|r| listing("references", r)))
    }
}

#[tool_handler]
impl ServerHandler for KnowledgeTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Knowledge retrieval server. Use rules_search for engineering rules, \
                 project_search or project_context_pack for project documentation, \
                 and refs_list for curated links."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        Ok(ListResourcesResult::with_all_items(resources()))
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        self.read_resource_uri(&request.uri).await
    }
}

fn resources() -> Vec<Resource> {
    let mut projects = RawResource::new(PROJECTS_RESOURCE_URI, "projects");
    projects.description = Some("Every project with ingested documentation.".into());
    projects.mime_type = Some("application/json".into());
    vec![projects.no_annotation()]
}

impl KnowledgeTools {
    async fn read_resource_uri(&self, uri: &str) -> Result<ReadResourceResult, ErrorData> {
        if uri != PROJECTS_RESOURCE_URI {
            return Err(ErrorData::resource_not_found(format!("unknown resource: {uri}"), None));
        }
        tracing::info!(uri, "projects resource read");
        let projects = self
            .service
            .list_projects(&self.caller)
            .await
            .map_err(|e| ErrorData::internal_error(e.to_string(), None))?;
        let text = serde_json::to_string(&listing("projects", projects))
            .map_err(|e| ErrorData::internal_error(format!("serialization failed: {e}"), None))?;
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::text(text, uri)],
        })
    }
}

/// `{"count": n, "<key>": [...]}`
fn listing<T: Serialize>(key: &str, items: Vec<T>) -> serde_json::Value {
    let mut body = serde_json::Map::new();
    body.insert("count".into(), serde_json::Value::from(items.len()));
    body.insert(
        key.into(),
        serde_json::to_value(items).unwrap_or(serde_json::Value::Null),
    );
    serde_json::Value::Object(body)
}

/// Tool results are JSON text; errors are a serialized `ErrorBody`.
fn render<T: Serialize>(result: Result<T, KnowledgeError>) -> Result<String, String> {
    match result {
        Ok(value) => {
            serde_json::to_string(&value).map_err(|e| format!("serialization failed: {e}"))
        }
        Err(e) => Err(serde_json::to_string(&e.to_body()).unwrap_or_else(|_| e.to_string())),
    }
}
