//! Structural enrichment of flat search hits.
//!
//! Chunks form a tree per file: a file summary at the root, declarations
//! below it, logic blocks below those. The [`HierarchicalSearcher`] walks
//! that tree through a [`ChunkHierarchyStore`] to attach a hit's parent,
//! its children, and its chain of ancestors, then renders the result as a
//! single text block for a language model.
//!
//! # Ancestor walk
//!
//! Starting from the hit, parents are fetched one hop at a time until the
//! root is reached or `max_depth` hops have been taken (`0` means no
//! limit). Ancestors are stored nearest-first. A visited set stops the
//! walk if the store ever reports a cycle; the walk then ends quietly
//! with whatever was collected so far.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::{Chunk, HierarchicalSearchResult, SearchResult};
use crate::store::ChunkHierarchyStore;

/// Which relatives to attach to each hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyOptions {
    pub include_parent: bool,
    pub include_children: bool,
    pub include_ancestors: bool,
    /// Maximum ancestor hops; `0` is unlimited.
    pub max_depth: usize,
}

impl HierarchyOptions {
    pub fn is_noop(&self) -> bool {
        !self.include_parent && !self.include_children && !self.include_ancestors
    }
}

/// Enriches search hits with parent, child and ancestor chunks.
#[derive(Clone)]
pub struct HierarchicalSearcher {
    store: Arc<dyn ChunkHierarchyStore>,
}

impl HierarchicalSearcher {
    pub fn new(store: Arc<dyn ChunkHierarchyStore>) -> Self {
        Self { store }
    }

    /// Attach the requested relatives to every hit, preserving input order.
    ///
    /// With no flags set the hits are wrapped and returned as-is. Store
    /// errors abort the whole call; a missing parent does not.
    pub async fn enrich_with_hierarchy(
        &self,
        results: Vec<SearchResult>,
        options: &HierarchyOptions,
    ) -> Result<Vec<HierarchicalSearchResult>> {
        if options.is_noop() {
            return Ok(results.into_iter().map(HierarchicalSearchResult::from).collect());
        }

        let mut enriched = Vec::with_capacity(results.len());
        for result in results {
            let mut item = HierarchicalSearchResult::from(result);
            let chunk_id = item.result.chunk_id.clone();

            if options.include_parent {
                item.parent = self
                    .store
                    .get_parent_chunk(&chunk_id)
                    .await
                    .map_err(|e| Error::upstream("parent lookup", e))?;
            }

            if options.include_children {
                item.children = self
                    .store
                    .get_child_chunks(&chunk_id)
                    .await
                    .map_err(|e| Error::upstream("children lookup", e))?;
            }

            if options.include_ancestors {
                item.ancestors = self.ancestors(&chunk_id, options.max_depth).await?;
            }

            enriched.push(item);
        }

        tracing::debug!(
            results = enriched.len(),
            parent = options.include_parent,
            children = options.include_children,
            ancestors = options.include_ancestors,
            "Enriched results with hierarchy."
        );
        Ok(enriched)
    }

    async fn ancestors(&self, chunk_id: &str, max_depth: usize) -> Result<Vec<Chunk>> {
        let mut ancestors: Vec<Chunk> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(chunk_id.to_string());
        let mut current = chunk_id.to_string();

        while max_depth == 0 || ancestors.len() < max_depth {
            let parent = self
                .store
                .get_parent_chunk(&current)
                .await
                .map_err(|e| Error::upstream("ancestor lookup", e))?;
            let Some(parent) = parent else { break };

            if !visited.insert(parent.id.clone()) {
                tracing::warn!(
                    chunk_id = %chunk_id,
                    repeated = %parent.id,
                    "Cycle in chunk hierarchy; stopping ancestor walk."
                );
                break;
            }
            current = parent.id.clone();
            ancestors.push(parent);
        }

        Ok(ancestors)
    }
}

/// Render a hit and its relatives as one text block.
///
/// Ancestors, when present, are listed farthest first under "Higher-level
/// context"; otherwise the parent, if any, appears under "Parent context".
/// The hit itself always follows under "Main content", then any children.
pub fn build_context_from_hierarchy(item: &HierarchicalSearchResult) -> String {
    let mut out = String::new();

    if !item.ancestors.is_empty() {
        out.push_str("## Higher-level context\n\n");
        for ancestor in item.ancestors.iter().rev() {
            push_labeled(&mut out, ancestor);
        }
    } else if let Some(parent) = &item.parent {
        out.push_str("## Parent context\n\n");
        push_labeled(&mut out, parent);
    }

    out.push_str("## Main content\n\n");
    out.push_str(&item.result.content);
    out.push_str("\n\n");

    if !item.children.is_empty() {
        out.push_str("## Detail content (child chunks)\n\n");
        for child in &item.children {
            push_labeled(&mut out, child);
        }
    }

    out
}

fn push_labeled(out: &mut String, chunk: &Chunk) {
    let _ = write!(out, "### {}\n{}\n\n", chunk_label(chunk), chunk.content);
}

/// `"{kind} {name}"`, else `name`, else `kind`, else `"Chunk L{start}-L{end}"`.
pub fn chunk_label(chunk: &Chunk) -> String {
    match (chunk.kind.as_deref(), chunk.name.as_deref()) {
        (Some(kind), Some(name)) => format!("{} {}", kind, name),
        (None, Some(name)) => name.to_string(),
        (Some(kind), None) => kind.to_string(),
        (None, None) => format!("Chunk L{}-L{}", chunk.start_line, chunk.end_line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use uuid::Uuid;

    fn node(id: &str, parent: Option<&str>, ordinal: i64) -> Chunk {
        let mut c = Chunk::new(
            id,
            "f",
            "src/lib.rs",
            ordinal,
            ordinal * 10,
            ordinal * 10 + 9,
            format!("body of {}", id),
        );
        c.parent_id = parent.map(str::to_string);
        c.kind = Some("function".to_string());
        c.name = Some(id.to_string());
        c
    }

    /// file -> module -> func -> {block_a, block_b}
    fn tree_store() -> Arc<InMemoryStore> {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        store.insert(id, id, node("file", None, 0), None);
        store.insert(id, id, node("module", Some("file"), 1), None);
        store.insert(id, id, node("func", Some("module"), 2), None);
        store.insert(id, id, node("block_b", Some("func"), 4), None);
        store.insert(id, id, node("block_a", Some("func"), 3), None);
        Arc::new(store)
    }

    fn hit(store: &InMemoryStore, id: &str) -> SearchResult {
        store.get(id).unwrap().to_search_result(0.9)
    }

    #[tokio::test]
    async fn test_no_flags_passes_through() {
        let store = tree_store();
        let searcher = HierarchicalSearcher::new(store.clone());
        let input = vec![hit(&store, "func"), hit(&store, "block_a")];

        let out = searcher
            .enrich_with_hierarchy(input.clone(), &HierarchyOptions::default())
            .await
            .unwrap();
        let results: Vec<SearchResult> = out.iter().map(|r| r.result.clone()).collect();
        assert_eq!(results, input);
        assert!(out
            .iter()
            .all(|r| r.parent.is_none() && r.children.is_empty() && r.ancestors.is_empty()));
    }

    #[tokio::test]
    async fn test_parent_and_children() {
        let store = tree_store();
        let searcher = HierarchicalSearcher::new(store.clone());
        let options = HierarchyOptions {
            include_parent: true,
            include_children: true,
            ..Default::default()
        };

        let out = searcher
            .enrich_with_hierarchy(vec![hit(&store, "func"), hit(&store, "file")], &options)
            .await
            .unwrap();

        assert_eq!(out[0].parent.as_ref().unwrap().id, "module");
        let kids: Vec<&str> = out[0].children.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(kids, vec!["block_a", "block_b"]);

        assert!(out[1].parent.is_none());
        assert_eq!(out[1].children.len(), 1);
    }

    #[tokio::test]
    async fn test_ancestors_nearest_first_and_depth_limit() {
        let store = tree_store();
        let searcher = HierarchicalSearcher::new(store.clone());

        let unlimited = HierarchyOptions {
            include_ancestors: true,
            ..Default::default()
        };
        let out = searcher
            .enrich_with_hierarchy(vec![hit(&store, "block_a")], &unlimited)
            .await
            .unwrap();
        let chain: Vec<&str> = out[0].ancestors.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(chain, vec!["func", "module", "file"]);

        let limited = HierarchyOptions {
            include_ancestors: true,
            max_depth: 2,
            ..Default::default()
        };
        let out = searcher
            .enrich_with_hierarchy(vec![hit(&store, "block_a")], &limited)
            .await
            .unwrap();
        let chain: Vec<&str> = out[0].ancestors.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(chain, vec!["func", "module"]);
    }

    #[tokio::test]
    async fn test_ancestor_walk_survives_cycle() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        store.insert(id, id, node("a", Some("b"), 0), None);
        store.insert(id, id, node("b", Some("c"), 1), None);
        store.insert(id, id, node("c", Some("a"), 2), None);
        let store = Arc::new(store);
        let searcher = HierarchicalSearcher::new(store.clone());

        let options = HierarchyOptions {
            include_ancestors: true,
            ..Default::default()
        };
        let out = searcher
            .enrich_with_hierarchy(vec![hit(&store, "a")], &options)
            .await
            .unwrap();
        let chain: Vec<&str> = out[0].ancestors.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(chain, vec!["b", "c"]);
    }

    struct BrokenStore;

    #[async_trait]
    impl ChunkHierarchyStore for BrokenStore {
        async fn get_parent_chunk(&self, _chunk_id: &str) -> anyhow::Result<Option<Chunk>> {
            Err(anyhow!("connection reset"))
        }
        async fn get_child_chunks(&self, _chunk_id: &str) -> anyhow::Result<Vec<Chunk>> {
            Err(anyhow!("connection reset"))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_upstream_error() {
        let searcher = HierarchicalSearcher::new(Arc::new(BrokenStore));
        let options = HierarchyOptions {
            include_children: true,
            ..Default::default()
        };
        let hit = node("x", None, 0).to_search_result(0.5);
        let err = searcher
            .enrich_with_hierarchy(vec![hit], &options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Upstream { operation: "children lookup", .. }));
    }

    #[test]
    fn test_chunk_label_fallbacks() {
        let mut c = Chunk::new("x", "f", "a.rs", 0, 3, 7, "");
        assert_eq!(chunk_label(&c), "Chunk L3-L7");
        c.kind = Some("struct".to_string());
        assert_eq!(chunk_label(&c), "struct");
        c.name = Some("Config".to_string());
        assert_eq!(chunk_label(&c), "struct Config");
        c.kind = None;
        assert_eq!(chunk_label(&c), "Config");
    }

    #[test]
    fn test_render_main_only() {
        let item = HierarchicalSearchResult::from(node("func", None, 2).to_search_result(0.5));
        let text = build_context_from_hierarchy(&item);
        assert!(text.contains("## Main content"));
        assert!(text.contains("body of func"));
        assert!(!text.contains("Parent context"));
        assert!(!text.contains("Higher-level context"));
        assert!(!text.contains("Detail content"));
    }

    #[test]
    fn test_render_parent_and_children() {
        let mut item =
            HierarchicalSearchResult::from(node("func", None, 2).to_search_result(0.5));
        item.parent = Some(node("module", None, 1));
        item.children = vec![node("block_a", None, 3), node("block_b", None, 4)];

        let text = build_context_from_hierarchy(&item);
        assert!(text.contains("## Parent context\n\n### function module\nbody of module"));
        assert!(text.contains("## Detail content (child chunks)"));
        let a = text.find("### function block_a").unwrap();
        let b = text.find("### function block_b").unwrap();
        let main = text.find("## Main content").unwrap();
        assert!(main < a && a < b);
    }

    #[test]
    fn test_render_ancestors_farthest_first() {
        let mut item =
            HierarchicalSearchResult::from(node("block_a", None, 3).to_search_result(0.5));
        item.parent = Some(node("func", None, 2));
        item.ancestors = vec![
            node("func", None, 2),
            node("module", None, 1),
            node("file", None, 0),
        ];

        let text = build_context_from_hierarchy(&item);
        assert!(text.contains("## Higher-level context"));
        assert!(!text.contains("## Parent context"));
        let file = text.find("### function file").unwrap();
        let module = text.find("### function module").unwrap();
        let func = text.find("### function func").unwrap();
        assert!(file < module && module < func);
        assert!(func < text.find("## Main content").unwrap());
    }
}
