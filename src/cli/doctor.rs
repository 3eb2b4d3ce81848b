//! CLI `doctor` command: database diagnostics and embedding configuration report.

use anyhow::{Context, Result};

use crate::config::KnowledgeConfig;
use crate::db;
use crate::knowledge::access;

/// `login` is the local operator, reported with its resolved tier.
pub fn doctor(config: &KnowledgeConfig, login: Option<&str>) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `knowledge-service serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_health(&conn).context("failed to run health check")?;
    let stored_model = db::migrations::get_embedding_model(&conn)?;
    let tier = access::resolve_tier(&conn, login)?;

    println!("Knowledge Service Health Report");
    println!("===============================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Status:            {}", report.status);
    println!("Schema version:    {}", report.schema_version);
    println!("sqlite-vec:        {}", report.sqlite_vec_version);
    println!("Operator:          {} (tier {tier})", login.unwrap_or("anonymous"));
    println!();
    println!("Embedding:");
    println!("  Provider:        {}", config.embedding.provider);
    println!("  Stored model:    {}", stored_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {}", config.embedding.model);
    if let Some(ref stored) = stored_model {
        if stored != &config.embedding.model && config.embedding.provider != "hashed" {
            println!("  WARNING: model mismatch; stored vectors were produced by another model.");
        }
    }
    if config.embedding.provider == "openai" && std::env::var(&config.embedding.api_key_env).is_err() {
        println!("  WARNING: {} is not set; ingestion and search will fail.", config.embedding.api_key_env);
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
