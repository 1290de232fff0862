//! # codetrail
//!
//! Application layer for provenance-aware code retrieval. The engine
//! itself lives in `codetrail-core`; this crate supplies the pieces that
//! need a runtime: configuration, logging, SQLite storage, a network
//! embedder, and the deadline-bounded [`retrieve::Retriever`].
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────────┐   ┌────────────────┐
//! │  config    │──▶│    Retriever     │──▶│ ContextBuilder │──▶ LLM payload
//! │  (TOML)    │   │ search/rank/tree │   │  token budget  │
//! └────────────┘   └───┬─────────┬────┘   └────────────────┘
//!                      │         │
//!                      ▼         ▼
//!              ┌────────────┐ ┌──────────────────────┐
//!              │  Embedder  │ │ SQLite chunks+vectors │
//!              │  (OpenAI)  │ │  + ProvenanceGraph    │
//!              └────────────┘ └──────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use codetrail::config::load_config;
//! use codetrail::retrieve::Retriever;
//! use codetrail_core::search::SearchScope;
//!
//! let config = load_config(std::path::Path::new("config/codetrail.toml"))?;
//! codetrail::telemetry::init_tracing(&config.logging);
//! let retriever = Retriever::open(&config).await?;
//! let options = retriever.default_options();
//! let payload = retriever
//!     .retrieve(SearchScope::Product(uuid::Uuid::new_v4()), "parse config", &options)
//!     .await?;
//! println!("{}", payload.context);
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`telemetry`] | `tracing-subscriber` setup |
//! | [`db`] | SQLite connection pool (WAL) |
//! | [`migrate`] | Idempotent schema setup |
//! | [`sqlite_store`] | Similarity and hierarchy store over SQLite; provenance loading |
//! | [`embedding`] | Disabled and OpenAI query embedders |
//! | [`retrieve`] | Search → rank → enrich → render under a deadline |

pub mod config;
pub mod db;
pub mod embedding;
pub mod migrate;
pub mod retrieve;
pub mod sqlite_store;
pub mod telemetry;
