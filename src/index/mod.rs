//! Semantic retrieval engine: builds and queries a private nearest-neighbor
//! index over a document's text.
//!
//! An index is keyed by a content hash of the source document, so it survives
//! re-imports and device moves. Building embeds every chunk with a yield per
//! chunk to keep the host runtime responsive; the finished chunk set is
//! persisted and swapped in atomically. Search is a brute-force cosine scan;
//! chunk counts are bounded by single-document size, and the store/embedder
//! trait seams leave room to swap in an approximate index later without
//! touching callers.

pub mod binary;
pub mod chunker;
pub mod embeddings;
pub mod store;

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ToolError;
use crate::traits::{DocumentSource, Embedder, IndexStore, TocEntry};
use chunker::ChunkingConfig;

/// One bounded window of document text with its embedding. Immutable once
/// created; re-indexing replaces the whole chunk set.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub id: String,
    pub section_id: String,
    pub section_title: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct DocumentIndex {
    /// Content hash of the source document, not a locally-assigned id.
    pub document_id: String,
    pub chunks: Vec<DocumentChunk>,
    pub ready: bool,
}

/// Section text handed over by the extraction collaborator for indexing.
#[derive(Debug, Clone)]
pub struct IndexSection {
    pub id: String,
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub text: String,
    pub section_id: String,
    pub section_title: String,
    pub score: f32,
}

/// Stable, portable document id: hex sha-256 of the document's text content.
pub fn document_id_for(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

/// Pull every non-empty section of a document from its source, flattening
/// the table of contents in reading order. Sections the source cannot
/// produce are logged and skipped.
pub async fn collect_sections(source: &dyn DocumentSource) -> anyhow::Result<Vec<IndexSection>> {
    fn flatten<'a>(entries: &'a [TocEntry], out: &mut Vec<&'a TocEntry>) {
        for entry in entries {
            out.push(entry);
            flatten(&entry.children, out);
        }
    }

    let toc = source.table_of_contents().await?;
    let mut flat = Vec::new();
    flatten(&toc, &mut flat);

    let mut sections = Vec::new();
    for entry in flat {
        match source.section(&entry.id).await {
            Ok(Some(text)) if !text.trim().is_empty() => sections.push(IndexSection {
                id: entry.id.clone(),
                title: entry.title.clone(),
                text,
            }),
            Ok(_) => debug!(section_id = %entry.id, "skipping empty section"),
            Err(e) => warn!(section_id = %entry.id, error = %e, "failed to read section"),
        }
    }
    Ok(sections)
}

pub struct IndexManager {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn IndexStore>,
    chunking: ChunkingConfig,
    /// Indexes resident in memory; loaded from the store on first use per
    /// process lifetime.
    resident: RwLock<HashMap<String, Arc<DocumentIndex>>>,
}

impl IndexManager {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn IndexStore>,
        chunking: ChunkingConfig,
    ) -> anyhow::Result<Self> {
        chunking.validate()?;
        Ok(Self {
            embedder,
            store,
            chunking,
            resident: RwLock::new(HashMap::new()),
        })
    }

    /// Whether an index exists for the document, in memory or in the store.
    pub async fn is_indexed(&self, document_id: &str) -> bool {
        if self.resident.read().await.contains_key(document_id) {
            return true;
        }
        matches!(self.store.load(document_id).await, Ok(Some(idx)) if idx.ready)
    }

    /// Build (or rebuild) the index for a document. Individual chunk
    /// embedding failures are logged and skipped; progress is reported
    /// monotonically in [0,1]; the loop yields once per chunk and honors the
    /// cancellation token at each yield point. The previous index stays
    /// queryable until the replacement is persisted.
    pub async fn build(
        &self,
        document_id: &str,
        sections: &[IndexSection],
        progress: impl Fn(f32) + Send,
        cancel: &CancellationToken,
    ) -> anyhow::Result<()> {
        let mut planned: Vec<(usize, &IndexSection, String)> = Vec::new();
        for section in sections {
            let normalized = chunker::normalize(&section.text);
            for (seq, text) in chunker::chunk_text(&normalized, &self.chunking)
                .into_iter()
                .enumerate()
            {
                planned.push((seq, section, text));
            }
        }

        let total = planned.len();
        info!(document_id, sections = sections.len(), chunks = total, "indexing document");

        let mut chunks = Vec::with_capacity(total);
        for (done, (seq, section, text)) in planned.into_iter().enumerate() {
            if cancel.is_cancelled() {
                anyhow::bail!("indexing cancelled for document {document_id}");
            }

            match self.embedder.embed(&text).await {
                Ok(embedding) => chunks.push(DocumentChunk {
                    id: format!("{}:{}", section.id, seq),
                    section_id: section.id.clone(),
                    section_title: section.title.clone(),
                    text,
                    embedding,
                }),
                Err(e) => {
                    // One bad chunk must not fail the whole job.
                    warn!(
                        document_id,
                        section_id = %section.id,
                        seq,
                        error = %e,
                        "chunk embedding failed, skipping"
                    );
                }
            }

            progress((done + 1) as f32 / total.max(1) as f32);
            tokio::task::yield_now().await;
        }
        if total == 0 {
            progress(1.0);
        }

        let index = DocumentIndex {
            document_id: document_id.to_string(),
            chunks,
            ready: true,
        };

        // Persist first; only then does the new set replace the resident one.
        self.store.save(&index).await?;
        self.resident
            .write()
            .await
            .insert(document_id.to_string(), Arc::new(index));
        Ok(())
    }

    /// Nearest chunks for a single query, best first. Fails with `NotIndexed`
    /// if no index exists; search never indexes implicitly.
    pub async fn search(
        &self,
        document_id: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ToolError> {
        let index = self.resident_index(document_id).await?;
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(ToolError::Source)?;

        let mut scored: Vec<(usize, f32)> = index
            .chunks
            .iter()
            .enumerate()
            .map(|(i, chunk)| (i, dot(&query_embedding, &chunk.embedding)))
            .collect();
        // Descending by score; ties broken by original chunk order.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let chunk = &index.chunks[i];
                SearchHit {
                    text: chunk.text.clone(),
                    section_id: chunk.section_id.clone(),
                    section_title: chunk.section_title.clone(),
                    score,
                }
            })
            .collect())
    }

    /// Multi-query search: runs each query, deduplicates by chunk keeping the
    /// best score, returns the merged top `top_k`.
    pub async fn search_many(
        &self,
        document_id: &str,
        queries: &[String],
        top_k: usize,
    ) -> Result<Vec<SearchHit>, ToolError> {
        let index = self.resident_index(document_id).await?;

        let mut best: HashMap<usize, f32> = HashMap::new();
        for query in queries {
            let query_embedding = self
                .embedder
                .embed(query)
                .await
                .map_err(ToolError::Source)?;
            for (i, chunk) in index.chunks.iter().enumerate() {
                let score = dot(&query_embedding, &chunk.embedding);
                let entry = best.entry(i).or_insert(f32::NEG_INFINITY);
                if score > *entry {
                    *entry = score;
                }
            }
        }

        let mut scored: Vec<(usize, f32)> = best.into_iter().collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let chunk = &index.chunks[i];
                SearchHit {
                    text: chunk.text.clone(),
                    section_id: chunk.section_id.clone(),
                    section_title: chunk.section_title.clone(),
                    score,
                }
            })
            .collect())
    }

    async fn resident_index(&self, document_id: &str) -> Result<Arc<DocumentIndex>, ToolError> {
        if let Some(index) = self.resident.read().await.get(document_id) {
            return Ok(index.clone());
        }
        // First use this process lifetime: try the persistent store.
        let loaded = self
            .store
            .load(document_id)
            .await
            .map_err(ToolError::Source)?;
        match loaded {
            Some(index) if index.ready => {
                debug!(document_id, chunks = index.chunks.len(), "index loaded into memory");
                let index = Arc::new(index);
                self.resident
                    .write()
                    .await
                    .insert(document_id.to_string(), index.clone());
                Ok(index)
            }
            _ => Err(ToolError::NotIndexed(document_id.to_string())),
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
