//! Flat on-disk vector index, one per session directory.
//!
//! Entries live in memory and are written to `index.json` after every add.
//! Search is brute-force cosine similarity, which is adequate for the few
//! hundred chunks a handful of PDFs produce.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PdfChatError, Result};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub id: String,
    pub source: String,
    pub chunk_index: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub text: String,
    pub source: String,
    pub score: f32,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    entries: Vec<IndexEntry>,
}

#[derive(Debug)]
pub struct VectorIndex {
    path: PathBuf,
    entries: Vec<IndexEntry>,
    ids: HashSet<String>,
}

impl VectorIndex {
    /// Open the index stored in `dir`, creating an empty one if none exists
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(INDEX_FILE);

        let entries = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            serde_json::from_str::<IndexFile>(&raw)?.entries
        } else {
            Vec::new()
        };
        let ids = entries.iter().map(|e| e.id.clone()).collect();

        tracing::debug!(path = %path.display(), entries = entries.len(), "Opened vector index");
        Ok(Self { path, entries, ids })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Insert entries whose id is not already indexed, then persist.
    /// Returns how many were new.
    pub fn insert(&mut self, entries: Vec<IndexEntry>) -> Result<usize> {
        if let Some(dim) = self.dimensions() {
            if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dim) {
                return Err(PdfChatError::Backend(format!(
                    "Embedding dimension mismatch: index has {dim}, got {}",
                    bad.embedding.len()
                )));
            }
        }

        let mut added = 0;
        for entry in entries {
            if self.ids.insert(entry.id.clone()) {
                self.entries.push(entry);
                added += 1;
            }
        }

        if added > 0 {
            self.persist()?;
        }
        Ok(added)
    }

    /// Top `k` chunks by cosine similarity to `query`, best first
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .filter(|e| e.embedding.len() == query.len())
            .map(|e| ScoredChunk {
                text: e.text.clone(),
                source: e.source.clone(),
                score: cosine_similarity(query, &e.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        scored
    }

    fn dimensions(&self) -> Option<usize> {
        self.entries.first().map(|e| e.embedding.len())
    }

    /// Write to a sibling temp file then rename, so a crash never leaves a torn index
    fn persist(&self) -> Result<()> {
        let body = serde_json::to_vec(&IndexFile {
            entries: self.entries.clone(),
        })?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, body)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Stable id for a chunk: identical text from identical source content maps to the same id
pub fn chunk_id(source_hash: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_hash.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Content hash of a source document
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let (mut dot, mut na, mut nb) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
