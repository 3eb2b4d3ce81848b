//! Access tiers. Resolves a login to a [`Grant`] and answers "may this caller
//! do something needing tier N on this channel". Unknown or missing logins
//! resolve to tier 0 with no channel restriction; resolution never fails for a
//! missing identity.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use crate::error::{KnowledgeError, Result};
use crate::knowledge::now_timestamp;
use crate::knowledge::types::{AccessGrant, Channel, Tags};

/// Resolved privilege for one caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grant {
    pub tier: u32,
    /// Channels the login may use. Empty means any channel.
    pub channels: Tags,
}

impl Grant {
    pub fn allows_channel(&self, channel: Channel) -> bool {
        self.channels.is_empty() || self.channels.contains(channel.as_str())
    }

    /// Tier in effect on `channel`: 0 on a channel the grant excludes.
    pub fn effective_tier(&self, channel: Channel) -> u32 {
        if self.allows_channel(channel) {
            self.tier
        } else {
            0
        }
    }

    /// A channel the grant excludes lowers the caller to tier 0; it never
    /// denies more than an anonymous caller gets.
    pub fn permits(&self, required_tier: u32, channel: Channel) -> bool {
        self.effective_tier(channel) >= required_tier
    }

    /// Like [`Grant::permits`] but yields the error front-ends report.
    pub fn check(&self, required_tier: u32, channel: Channel) -> Result<()> {
        if self.permits(required_tier, channel) {
            Ok(())
        } else {
            Err(KnowledgeError::Forbidden {
                required: required_tier,
                actual: self.effective_tier(channel),
            })
        }
    }
}

pub fn resolve(conn: &Connection, login: Option<&str>) -> Result<Grant> {
    let Some(login) = login.map(str::trim).filter(|l| !l.is_empty()) else {
        return Ok(Grant::default());
    };

    let row: Option<(u32, String)> = conn
        .query_row(
            "SELECT tier, channels_csv FROM access_tiers WHERE login = ?1",
            params![login],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    Ok(match row {
        Some((tier, channels)) => Grant {
            tier,
            channels: Tags::from_csv(&channels),
        },
        None => Grant::default(),
    })
}

pub fn resolve_tier(conn: &Connection, login: Option<&str>) -> Result<u32> {
    Ok(resolve(conn, login)?.tier)
}

pub fn authorize(
    conn: &Connection,
    login: Option<&str>,
    required_tier: u32,
    channel: Channel,
) -> Result<bool> {
    match admit(conn, login, required_tier, channel) {
        Ok(_) => Ok(true),
        Err(KnowledgeError::Forbidden { .. }) => Ok(false),
        Err(e) => Err(e),
    }
}

/// Gate one call. Yields the tier to filter reads with, or `Forbidden`.
pub fn admit(conn: &Connection, login: Option<&str>, required_tier: u32, channel: Channel) -> Result<u32> {
    let grant = resolve(conn, login)?;
    grant.check(required_tier, channel)?;
    Ok(grant.effective_tier(channel))
}

/// Create or replace the grant for `login`. `created_at` survives updates.
pub fn grant(conn: &Connection, login: &str, tier: u32, channels: &Tags) -> Result<AccessGrant> {
    let login = login.trim();
    if login.is_empty() {
        return Err(KnowledgeError::invalid_field("login must not be empty"));
    }
    for channel in channels.iter() {
        if !matches!(channel.as_str(), "mcp" | "http" | "cli") {
            return Err(KnowledgeError::invalid_field(format!(
                "unknown channel '{channel}' (expected mcp, http or cli)"
            )));
        }
    }

    let now = now_timestamp();
    conn.execute(
        "INSERT INTO access_tiers (login, tier, channels_csv, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?4) \
         ON CONFLICT(login) DO UPDATE SET \
             tier = excluded.tier, channels_csv = excluded.channels_csv, updated_at = excluded.updated_at",
        params![login, tier, channels.to_csv(), now],
    )?;

    tracing::info!(login = %login, tier, channels = %channels.to_csv(), "access grant updated");

    conn.query_row(
        "SELECT login, tier, channels_csv, created_at, updated_at FROM access_tiers WHERE login = ?1",
        params![login],
        read_grant,
    )
    .map_err(Into::into)
}

pub fn list_grants(conn: &Connection) -> Result<Vec<AccessGrant>> {
    let mut stmt = conn.prepare(
        "SELECT login, tier, channels_csv, created_at, updated_at FROM access_tiers ORDER BY login",
    )?;
    let grants = stmt
        .query_map([], read_grant)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(grants)
}

fn read_grant(row: &Row<'_>) -> rusqlite::Result<AccessGrant> {
    Ok(AccessGrant {
        login: row.get(0)?,
        tier: row.get(1)?,
        channels: Tags::from_csv(&row.get::<_, String>(2)?),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Connection {
        crate::db::open_memory_database().unwrap()
    }

    #[test]
    fn missing_identity_is_tier_zero() {
        let conn = test_db();
        assert_eq!(resolve_tier(&conn, None).unwrap(), 0);
        assert_eq!(resolve_tier(&conn, Some("  ")).unwrap(), 0);
        assert_eq!(resolve_tier(&conn, Some("stranger@example.com")).unwrap(), 0);
    }

    #[test]
    fn granted_tier_is_resolved() {
        let conn = test_db();
        grant(&conn, "alice@example.com", 2, &Tags::default()).unwrap();
        assert_eq!(resolve_tier(&conn, Some("alice@example.com")).unwrap(), 2);
        assert!(authorize(&conn, Some("alice@example.com"), 2, Channel::Http).unwrap());
        assert!(!authorize(&conn, Some("alice@example.com"), 3, Channel::Http).unwrap());
        assert!(!authorize(&conn, None, 1, Channel::Mcp).unwrap());
        assert!(authorize(&conn, None, 0, Channel::Mcp).unwrap());
    }

    #[test]
    fn channel_restriction_is_enforced() {
        let conn = test_db();
        grant(&conn, "bot", 3, &Tags::new(["mcp"])).unwrap();
        assert!(authorize(&conn, Some("bot"), 3, Channel::Mcp).unwrap());
        assert!(!authorize(&conn, Some("bot"), 1, Channel::Http).unwrap());
        // Elsewhere the login is treated like an anonymous caller.
        assert!(authorize(&conn, Some("bot"), 0, Channel::Cli).unwrap());
        assert_eq!(admit(&conn, Some("bot"), 0, Channel::Http).unwrap(), 0);
        assert_eq!(admit(&conn, Some("bot"), 0, Channel::Mcp).unwrap(), 3);
    }

    #[test]
    fn admit_reports_effective_tier_on_denial() {
        let conn = test_db();
        grant(&conn, "bot", 3, &Tags::new(["mcp"])).unwrap();
        assert!(matches!(
            admit(&conn, Some("bot"), 2, Channel::Http),
            Err(KnowledgeError::Forbidden { required: 2, actual: 0 })
        ));
        assert!(matches!(
            admit(&conn, None, 1, Channel::Http),
            Err(KnowledgeError::Forbidden { required: 1, actual: 0 })
        ));
    }

    #[test]
    fn regrant_keeps_created_at() {
        let conn = test_db();
        let first = grant(&conn, "carol", 1, &Tags::default()).unwrap();
        let second = grant(&conn, "carol", 2, &Tags::new(["cli"])).unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.tier, 2);
        assert_eq!(list_grants(&conn).unwrap().len(), 1);
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let conn = test_db();
        assert!(grant(&conn, "dave", 1, &Tags::new(["smtp"])).is_err());
        assert!(grant(&conn, " ", 1, &Tags::default()).is_err());
    }

    #[test]
    fn check_reports_forbidden() {
        let g = Grant { tier: 1, channels: Tags::default() };
        match g.check(2, Channel::Http) {
            Err(KnowledgeError::Forbidden { required, actual }) => {
                assert_eq!(required, 2);
                assert_eq!(actual, 1);
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(g.check(1, Channel::Http).is_ok());

        let restricted = Grant { tier: 3, channels: Tags::new(["cli"]) };
        assert!(restricted.check(0, Channel::Http).is_ok());
        assert!(matches!(
            restricted.check(1, Channel::Http),
            Err(KnowledgeError::Forbidden { required: 1, actual: 0 })
        ));
        assert_eq!(restricted.effective_tier(Channel::Cli), 3);
    }
}
