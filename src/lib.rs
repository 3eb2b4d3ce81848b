//! Knowledge retrieval service: engineering rules, per-project documentation
//! and curated references behind tiered semantic search.
//!
//! Content is ingested with a SHA-256 fingerprint as its upsert key, embedded
//! through an OpenAI-compatible provider, and ranked by cosine distance
//! inside SQLite via [sqlite-vec](https://github.com/asg017/sqlite-vec).
//! Every caller resolves to an access tier; rows above that tier never reach
//! the ranking, and every operation lands in an append-only audit log.
//!
//! | Kind | Searchable | Tier-gated | Upsert key |
//! |------|------------|------------|------------|
//! | **Rule** | yes | yes | `sha256(title, body)` |
//! | **Project doc** | yes, per project | no | `sha256(project, path, body)` |
//! | **Reference** | tag listing | yes | none |
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from TOML files and environment variables
//! - [`db`]: SQLite schema, migrations, the shared [`db::Store`] handle and health checks
//! - [`embedding`]: Embedding providers and the timeout-bounded adapter
//! - [`knowledge`]: The engine: ingestion, search, references, access tiers, audit, metrics
//! - [`service`]: Authorized, audited operation facade used by every front-end
//! - [`tools`]: MCP tool surface
//! - [`http`]: REST routes
//! - [`server`]: stdio and HTTP transports
//! - [`cli`]: Operator commands

pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod http;
pub mod knowledge;
pub mod server;
pub mod service;
pub mod tools;
