//! In-memory provenance index.
//!
//! The [`ProvenanceGraph`] maps chunk ids to their version metadata and
//! keeps two secondary indexes: chunk key → chunk ids, and file path →
//! chunk ids. All three maps live behind a single `RwLock` so they never
//! drift apart; readers share the lock, `add` and `clear` take it
//! exclusively.
//!
//! The graph is append-only. Records are never updated in place; the
//! ingestion pipeline adds one record per chunk version.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Error, Result};
use crate::models::{base_chunk_key, ChunkProvenance};

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, ChunkProvenance>,
    by_key: HashMap<String, Vec<String>>,
    by_path: HashMap<String, Vec<String>>,
}

/// Thread-safe index of chunk version metadata.
#[derive(Default)]
pub struct ProvenanceGraph {
    inner: RwLock<Indexes>,
}

impl ProvenanceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a writer panicked between O(1) inserts;
    // the maps are still structurally valid.
    fn read(&self) -> RwLockReadGuard<'_, Indexes> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indexes> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one chunk version.
    ///
    /// Fails with [`Error::InvalidInput`] when the chunk id, snapshot id
    /// or file path is empty. A chunk id that is already present is left
    /// untouched.
    pub fn add(&self, provenance: ChunkProvenance) -> Result<()> {
        if provenance.chunk_id.is_empty() {
            return Err(Error::invalid_input("provenance chunk_id is required"));
        }
        if provenance.snapshot_id.is_empty() {
            return Err(Error::invalid_input("provenance snapshot_id is required"));
        }
        if provenance.file_path.is_empty() {
            return Err(Error::invalid_input("provenance file_path is required"));
        }

        let mut idx = self.write();
        if idx.by_id.contains_key(&provenance.chunk_id) {
            tracing::warn!(
                chunk_id = %provenance.chunk_id,
                "Provenance already recorded; ignoring duplicate."
            );
            return Ok(());
        }

        let id = provenance.chunk_id.clone();
        if !provenance.chunk_key.is_empty() {
            idx.by_key
                .entry(provenance.chunk_key.clone())
                .or_default()
                .push(id.clone());
        }
        idx.by_path
            .entry(provenance.file_path.clone())
            .or_default()
            .push(id.clone());
        idx.by_id.insert(id, provenance);
        Ok(())
    }

    pub fn get(&self, chunk_id: &str) -> Result<ChunkProvenance> {
        self.read()
            .by_id
            .get(chunk_id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("provenance for chunk {}", chunk_id)))
    }

    /// Every chunk id recorded under exactly this key.
    pub fn get_by_chunk_key(&self, chunk_key: &str) -> Result<Vec<String>> {
        match self.read().by_key.get(chunk_key) {
            Some(ids) if !ids.is_empty() => Ok(ids.clone()),
            _ => Err(Error::not_found(format!("chunk key {}", chunk_key))),
        }
    }

    /// The flagged-latest record under `chunk_key`, falling back to the
    /// most recently indexed one when none is flagged.
    pub fn get_latest_by_chunk_key(&self, chunk_key: &str) -> Result<ChunkProvenance> {
        let idx = self.read();
        let records: Vec<&ChunkProvenance> = idx
            .by_key
            .get(chunk_key)
            .map(|ids| ids.iter().filter_map(|id| idx.by_id.get(id)).collect())
            .unwrap_or_default();

        if let Some(latest) = records.iter().find(|p| p.is_latest) {
            return Ok((*latest).clone());
        }
        records
            .into_iter()
            .max_by_key(|p| p.indexed_at)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("chunk key {}", chunk_key)))
    }

    /// Every recorded version of a logical region, i.e. all records whose
    /// key reduces to `base_key` once the commit suffix is removed.
    pub fn versions_of_region(&self, base_key: &str) -> Vec<ChunkProvenance> {
        let idx = self.read();
        idx.by_key
            .iter()
            .filter(|(key, _)| base_chunk_key(key) == base_key)
            .flat_map(|(_, ids)| ids.iter().filter_map(|id| idx.by_id.get(id)).cloned())
            .collect()
    }

    /// All versions recorded for a file path, in no particular order.
    pub fn get_file_history(&self, file_path: &str) -> Vec<ChunkProvenance> {
        let idx = self.read();
        idx.by_path
            .get(file_path)
            .map(|ids| ids.iter().filter_map(|id| idx.by_id.get(id)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn get_latest_versions(&self) -> Vec<ChunkProvenance> {
        self.read()
            .by_id
            .values()
            .filter(|p| p.is_latest)
            .cloned()
            .collect()
    }

    pub fn is_latest(&self, chunk_id: &str) -> Result<bool> {
        self.read()
            .by_id
            .get(chunk_id)
            .map(|p| p.is_latest)
            .ok_or_else(|| Error::not_found(format!("provenance for chunk {}", chunk_id)))
    }

    /// Human-readable dump of one record.
    pub fn trace_provenance(&self, chunk_id: &str) -> Result<String> {
        let p = self.get(chunk_id)?;
        let mut out = String::new();
        let _ = writeln!(out, "Chunk: {}", p.chunk_id);
        let _ = writeln!(out, "  File: {}", p.file_path);
        let _ = writeln!(out, "  Chunk key: {}", p.chunk_key);
        let _ = writeln!(out, "  Commit: {}", p.commit_hash);
        let _ = writeln!(out, "  Snapshot: {}", p.snapshot_id);
        let _ = writeln!(out, "  Source snapshot: {}", p.source_snapshot_id);
        let _ = writeln!(out, "  Latest: {}", p.is_latest);
        let _ = writeln!(out, "  Indexed at: {}", p.indexed_at.to_rfc3339());
        if let Some(author) = &p.author {
            let _ = writeln!(out, "  Author: {}", author);
        }
        if let Some(updated_at) = p.updated_at {
            let _ = writeln!(out, "  Updated at: {}", updated_at.to_rfc3339());
        }
        Ok(out)
    }

    pub fn count(&self) -> usize {
        self.read().by_id.len()
    }

    pub fn clear(&self) {
        *self.write() = Indexes::default();
    }
}
