//! # codetrail core
//!
//! Provenance-aware hierarchical retrieval over versioned code chunks:
//! data models, the provenance graph, ranking, hierarchy enrichment,
//! search orchestration, and LLM context assembly.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! runtime-specific dependencies. Storage and embedding are reached
//! through the traits in [`store`] and [`embedding`].
//!
//! ```text
//! query ─▶ Searcher ─▶ Embedder ─▶ SimilarityStore
//!              │
//!              ├─▶ Ranker (ProvenanceGraph)      adjust / filter / dedup
//!              ├─▶ HierarchicalSearcher          parent / children / ancestors
//!              └─▶ ContextBuilder                render + token budget
//! ```

pub mod context;
pub mod embedding;
pub mod error;
pub mod hierarchy;
pub mod models;
pub mod provenance;
pub mod ranking;
pub mod search;
pub mod store;

pub use error::{Error, Result};
