//! Server entry points for the stdio and HTTP transports.
//!
//! [`serve_stdio`] runs the MCP tools over stdin/stdout. [`serve_http`] binds
//! one listener carrying the REST routes plus the MCP streamable-HTTP service
//! nested at `/mcp`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpServerConfig, StreamableHttpService,
};
use rmcp::ServiceExt;

use crate::config::KnowledgeConfig;
use crate::http;
use crate::knowledge::types::{Caller, Channel};
use crate::service::KnowledgeService;
use crate::tools::KnowledgeTools;

const SESSION_DRAIN_LIMIT: Duration = Duration::from_secs(5);

/// Start the MCP server over stdio transport.
///
/// Stdio carries no identity, so calls are attributed to
/// `server.default_login` (anonymous when unset).
pub async fn serve_stdio(config: KnowledgeConfig) -> Result<()> {
    tracing::info!("starting knowledge MCP server on stdio");

    let caller = Caller {
        login: config.server.default_login.clone(),
        display_name: None,
        channel: Channel::Mcp,
    };
    let service = KnowledgeService::open(config)?;

    let tools = KnowledgeTools::new(service.clone(), caller);
    let server = tools.serve(rmcp::transport::stdio()).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    close(service);
    Ok(())
}

/// Start the REST API with MCP nested at `/mcp`.
///
/// MCP sessions over HTTP are anonymous; identity headers are honored on the
/// REST routes only.
pub async fn serve_http(config: KnowledgeConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting knowledge HTTP server");

    let service = KnowledgeService::open(config)?;

    let session_manager = Arc::new(LocalSessionManager::default());
    let mcp_config = StreamableHttpServerConfig::default();
    let cancel = mcp_config.cancellation_token.clone();
    let mcp_service = {
        let service = service.clone();
        StreamableHttpService::new(
            move || Ok(KnowledgeTools::new(service.clone(), Caller::anonymous(Channel::Mcp))),
            session_manager.clone(),
            mcp_config,
        )
    };

    let router = http::router(service.clone()).nest_service("/mcp", mcp_service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "listening on http://{bind_addr} (MCP at /mcp)");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down HTTP server");
            cancel.cancel();
        })
        .await?;

    close_sessions(session_manager).await;
    if !service.store().wait_exclusive(SESSION_DRAIN_LIMIT).await {
        tracing::warn!("MCP sessions still hold the store after {:?}", SESSION_DRAIN_LIMIT);
    }
    close(service);
    Ok(())
}

/// Ask every live MCP session to stop so its tool handler releases the store.
async fn close_sessions(manager: Arc<LocalSessionManager>) {
    let sessions: Vec<_> = manager.sessions.write().await.drain().collect();
    for (id, handle) in sessions {
        if let Err(e) = handle.close().await {
            tracing::debug!(session = %id, error = %e, "session already gone");
        }
    }
}

fn close(service: KnowledgeService) {
    if let Err(e) = service.shutdown() {
        tracing::warn!(error = %e, "database not closed cleanly");
    }
}
