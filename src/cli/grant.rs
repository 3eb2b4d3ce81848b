//! CLI `grant` / `grants` commands: manage access tiers.

use anyhow::Result;

use crate::knowledge::types::Caller;
use crate::service::KnowledgeService;

pub async fn grant(
    service: &KnowledgeService,
    caller: &Caller,
    login: &str,
    tier: u32,
    channels: &[String],
) -> Result<()> {
    let grant = service.grant_tier(caller, login, tier, channels).await?;
    let channels = if grant.channels.is_empty() {
        "any".to_string()
    } else {
        grant.channels.to_csv()
    };
    println!("{} -> tier {} (channels: {})", grant.login, grant.tier, channels);
    Ok(())
}

pub async fn list(service: &KnowledgeService, caller: &Caller) -> Result<()> {
    let grants = service.list_grants(caller).await?;
    if grants.is_empty() {
        println!("No access grants. Everyone resolves to tier 0.");
        return Ok(());
    }
    println!("{:<32} {:>4}  {:<16} {}", "LOGIN", "TIER", "CHANNELS", "UPDATED");
    for g in grants {
        let channels = if g.channels.is_empty() { "any".to_string() } else { g.channels.to_csv() };
        println!("{:<32} {:>4}  {:<16} {}", g.login, g.tier, channels, g.updated_at);
    }
    Ok(())
}
