use anyhow::Result;

use crate::cli::preview;
use crate::knowledge::types::Caller;
use crate::service::{KnowledgeService, ProjectSearch, RuleSearch};

/// Search rules, or one project's docs when `project` is given.
pub async fn search(
    service: &KnowledgeService,
    caller: &Caller,
    query: &str,
    project: Option<&str>,
    k: Option<usize>,
    tags: Vec<String>,
) -> Result<()> {
    let rows: Vec<(String, String, f64, String)> = match project {
        Some(project) => {
            let req = ProjectSearch {
                project: project.to_string(),
                query: query.to_string(),
                k,
                tags,
            };
            service
                .search_project_docs(caller, req)
                .await?
                .into_iter()
                .map(|r| (r.item.id, format!("{} [{}]", r.item.path, r.item.kind), r.score, r.item.body))
                .collect()
        }
        None => {
            let req = RuleSearch {
                query: query.to_string(),
                k,
                tags,
            };
            service
                .search_rules(caller, req)
                .await?
                .into_iter()
                .map(|r| (r.item.id, r.item.title, r.score, r.item.body))
                .collect()
        }
    };

    if rows.is_empty() {
        println!("No results found.");
        return Ok(());
    }

    println!("Found {} result(s)\n", rows.len());
    for (i, (id, heading, score, body)) in rows.iter().enumerate() {
        println!("  {}. {} (score: {:.4})", i + 1, heading, score);
        println!("     id: {id}");
        println!("     {}", preview(body, 120));
        println!();
    }

    Ok(())
}
