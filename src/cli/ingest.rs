//! CLI `ingest` commands: load a rule or a project document from a file.

use anyhow::{Context, Result};
use std::path::Path;

use crate::knowledge::types::Caller;
use crate::service::{KnowledgeService, NewProjectDoc, NewRule};

pub async fn rule(
    service: &KnowledgeService,
    caller: &Caller,
    title: &str,
    file: &Path,
    tags: Vec<String>,
    tier: Option<u32>,
) -> Result<()> {
    let body = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let req = NewRule {
        title: title.to_string(),
        body,
        tags,
        tier,
    };
    let result = service.ingest_rule(caller, req).await?;
    println!(
        "{} rule {}",
        if result.replaced { "Replaced" } else { "Stored" },
        result.id
    );
    Ok(())
}

/// Ingest `file` as a project document. `path` defaults to the file path as given.
pub async fn project_doc(
    service: &KnowledgeService,
    caller: &Caller,
    project: &str,
    file: &Path,
    path: Option<&str>,
    kind: &str,
    tags: Vec<String>,
) -> Result<()> {
    let body = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let req = NewProjectDoc {
        project: project.to_string(),
        path: path
            .map(String::from)
            .unwrap_or_else(|| file.to_string_lossy().into_owned()),
        kind: kind.to_string(),
        body,
        tags,
    };
    let result = service.ingest_project_doc(caller, req).await?;
    println!(
        "{} project doc {}",
        if result.replaced { "Replaced" } else { "Stored" },
        result.id
    );
    for stale in &result.superseded {
        println!("  superseded {stale}");
    }
    Ok(())
}
