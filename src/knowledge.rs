use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::config::{Config, LlmConfig};
use crate::error::{PdfChatError, Result};
use crate::loader::{chunk_text, extract_pdf_text};
use crate::models::{DataType, EmbeddingRequest, GenerateOptions, GenerateRequest};
use crate::transport::{OllamaTransport, Transport};
use crate::vector_store::{IndexEntry, ScoredChunk, VectorIndex, chunk_id, content_hash};

#[cfg(test)]
use mockall::automock;

const PROMPT_TEMPLATE: &str = "Use the following pieces of context to answer the query at the end.
If you don't know the answer, just say that you don't know, don't try to make up an answer.

$context

Query: $query

Helpful Answer:";

/// The two entry points the chat session relies on
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Chunk, embed and index the file at `path`
    async fn add(&self, path: &Path, data_type: DataType) -> Result<()>;
    /// Answer `prompt` from the indexed content
    async fn chat(&self, prompt: &str) -> Result<String>;
}

/// Retrieval-augmented chat over a per-session on-disk index, backed by Ollama
pub struct RagApp {
    db_path: PathBuf,
    llm: LlmConfig,
    embed_model: String,
    top_k: usize,
    chunk_size: usize,
    chunk_overlap: usize,
    tx: Arc<dyn Transport>,
    index: Mutex<VectorIndex>,
}

impl RagApp {
    pub fn from_config(config: &Config, db_path: &Path) -> Result<Self> {
        let tx = Arc::new(OllamaTransport::new(
            &config.llm.base_url,
            &config.embedder.base_url,
        ));
        Self::with_transport(config, db_path, tx)
    }

    pub fn with_transport(
        config: &Config,
        db_path: &Path,
        tx: Arc<dyn Transport>,
    ) -> Result<Self> {
        let index = VectorIndex::open(db_path)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            llm: config.llm.clone(),
            embed_model: config.embedder.model.clone(),
            top_k: config.vectordb.top_k,
            chunk_size: config.vectordb.chunk_size,
            chunk_overlap: config.vectordb.chunk_overlap,
            tx,
            index: Mutex::new(index),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn indexed_chunks(&self) -> usize {
        self.index.lock().await.len()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.tx
            .embed(&EmbeddingRequest {
                model: self.embed_model.clone(),
                prompt: text.to_string(),
            })
            .await
    }

    /// Chunk and embed `text`, indexing only chunks not seen before. Returns the number added.
    async fn index_text(&self, source: &str, source_hash: &str, text: &str) -> Result<usize> {
        let chunks = chunk_text(text, self.chunk_size, self.chunk_overlap);
        if chunks.is_empty() {
            return Err(PdfChatError::Pdf(format!(
                "{source} contains no extractable text"
            )));
        }

        let mut index = self.index.lock().await;
        let mut entries = Vec::new();
        let mut pending = HashSet::new();
        for (chunk_index, chunk) in chunks.into_iter().enumerate() {
            let id = chunk_id(source_hash, &chunk);
            if index.contains(&id) || !pending.insert(id.clone()) {
                continue;
            }
            let embedding = self.embed(&chunk).await?;
            entries.push(IndexEntry {
                id,
                source: source.to_string(),
                chunk_index,
                text: chunk,
                embedding,
            });
        }

        index.insert(entries)
    }

    async fn retrieve(&self, prompt: &str) -> Result<Vec<ScoredChunk>> {
        let index = self.index.lock().await;
        if index.is_empty() {
            return Ok(Vec::new());
        }
        let query = self.embed(prompt).await?;
        Ok(index.search(&query, self.top_k))
    }
}

/// Fill the answer template with retrieved context
pub fn build_prompt(contexts: &[ScoredChunk], query: &str) -> String {
    let context = contexts
        .iter()
        .map(|c| c.text.as_str())
        .collect::<Vec<_>>()
        .join(" | ");
    PROMPT_TEMPLATE
        .replace("$context", &context)
        .replace("$query", query)
}

#[async_trait]
impl KnowledgeStore for RagApp {
    async fn add(&self, path: &Path, data_type: DataType) -> Result<()> {
        let source = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        tracing::info!(source = %source, data_type = data_type.as_str(), "Adding source to knowledge base");

        let bytes = tokio::fs::read(path).await?;
        let source_hash = content_hash(&bytes);

        let owned = path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || extract_pdf_text(&owned))
            .await
            .map_err(|e| PdfChatError::Pdf(format!("PDF extraction aborted: {e}")))??;

        let added = self.index_text(&source, &source_hash, &text).await?;
        tracing::info!(source = %source, chunks_added = added, "Source indexed");
        Ok(())
    }

    async fn chat(&self, prompt: &str) -> Result<String> {
        let contexts = self.retrieve(prompt).await?;
        tracing::info!(
            contexts = contexts.len(),
            model = %self.llm.model,
            "Generating answer"
        );

        let request = GenerateRequest {
            model: self.llm.model.clone(),
            prompt: build_prompt(&contexts, prompt),
            stream: self.llm.stream,
            options: GenerateOptions {
                temperature: self.llm.temperature,
                num_predict: self.llm.max_tokens,
            },
        };
        self.tx.generate(&request).await
    }
}
