use anyhow::Result;

use crate::knowledge::types::Caller;
use crate::service::KnowledgeService;

/// Print store metrics. Requires the admin tier.
pub async fn stats(service: &KnowledgeService, caller: &Caller) -> Result<()> {
    let m = service.metrics(caller).await?;

    println!("Knowledge Store Statistics");
    println!("{}", "=".repeat(40));
    println!("  Rules:               {}", m.counts.rules);
    println!("  Project docs:        {}", m.counts.project_docs);
    println!("  Projects:            {}", m.counts.projects);
    println!("  References:          {}", m.counts.refs);
    println!("  Access grants:       {}", m.counts.grants);
    println!("  Audit entries:       {}", m.counts.audit_entries);
    println!();

    println!("Activity (last hour):");
    if m.activity.last_hour.is_empty() {
        println!("  (none)");
    }
    for a in &m.activity.last_hour {
        let avg = a
            .avg_elapsed_ms
            .map(|ms| format!("{ms:.1} ms avg"))
            .unwrap_or_else(|| "-".into());
        println!("  {:<24} {:>6}  {}", a.operation, a.count, avg);
    }
    println!();

    println!("Activity (last 24h):");
    for a in &m.activity.last_day {
        println!("  {:<24} {:>6}", a.operation, a.count);
    }
    println!();

    println!("Recent operations:");
    for e in &m.activity.recent {
        println!(
            "  {}  {:<24} {:<20} {:<4} {}",
            e.timestamp, e.operation, e.login, e.channel, e.outcome
        );
    }
    println!();

    println!("Database size:         {} bytes", m.database.size_bytes);
    println!("Schema version:        {}", m.database.schema_version);
    if let Some(ref model) = m.database.embedding_model {
        println!("Embedding model:       {model}");
    }
    if m.audit_failures > 0 {
        println!("Audit write failures:  {}", m.audit_failures);
    }

    Ok(())
}
