//! Scripted doubles for the trait seams. Test-only.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RunError;
use crate::index::{DocumentIndex, IndexSection};
use crate::traits::{
    BookMetadata, DocumentSource, Embedder, FrameStream, IndexStore, ReadingPosition,
    RunTransport, StreamFrame, StreamRequest, TocEntry,
};

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Scripted transport: each `open_stream` call consumes the next queued frame
/// batch, and every request is recorded for assertions.
pub struct MockTransport {
    scripts: Mutex<VecDeque<Vec<Result<StreamFrame, RunError>>>>,
    calls: Mutex<Vec<StreamRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue the frames one stream will yield, in order.
    pub fn push_stream(&self, frames: Vec<Result<StreamFrame, RunError>>) {
        self.scripts.lock().unwrap().push_back(frames);
    }

    /// Every request `open_stream` has seen, in call order.
    pub fn calls(&self) -> Vec<StreamRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RunTransport for MockTransport {
    async fn create_thread(&self) -> anyhow::Result<String> {
        Ok("thread-1".to_string())
    }

    async fn open_stream(&self, request: StreamRequest) -> anyhow::Result<FrameStream> {
        self.calls.lock().unwrap().push(request);
        let frames = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        Ok(Box::pin(futures::stream::iter(frames)))
    }
}

// ---------------------------------------------------------------------------
// Embedder
// ---------------------------------------------------------------------------

const MOCK_DIM: usize = 64;

/// Deterministic bag-of-words embedder: each lowercased word is hashed into a
/// fixed-length histogram, then L2-normalized. Shared words mean high cosine,
/// disjoint texts score near zero.
pub struct MockEmbedder {
    fail_on: Option<String>,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self { fail_on: None }
    }

    /// Fail any embed whose input contains the given substring.
    pub fn failing_on(substr: &str) -> Self {
        Self {
            fail_on: Some(substr.to_string()),
        }
    }
}

// FNV-1a, 64-bit. Stable across processes, unlike the std hasher.
fn fnv1a(word: &str) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for b in word.bytes() {
        h ^= b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        if let Some(fail) = &self.fail_on {
            if text.contains(fail) {
                anyhow::bail!("embedding backend failure on {fail:?}");
            }
        }
        let mut v = vec![0.0f32; MOCK_DIM];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let bucket = (fnv1a(&word.to_lowercase()) % MOCK_DIM as u64) as usize;
            v[bucket] += 1.0;
        }
        crate::index::embeddings::l2_normalize(&mut v);
        Ok(v)
    }
}

// ---------------------------------------------------------------------------
// Index store
// ---------------------------------------------------------------------------

pub struct MemoryIndexStore {
    indexes: Mutex<HashMap<String, DocumentIndex>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self {
            indexes: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn load(&self, document_id: &str) -> anyhow::Result<Option<DocumentIndex>> {
        Ok(self.indexes.lock().unwrap().get(document_id).cloned())
    }

    async fn save(&self, index: &DocumentIndex) -> anyhow::Result<()> {
        self.indexes
            .lock()
            .unwrap()
            .insert(index.document_id.clone(), index.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Document source
// ---------------------------------------------------------------------------

/// A two-chapter book with a cover page and a fixed reading position.
pub struct StaticBook {
    sections: Vec<(TocEntry, String)>,
}

impl StaticBook {
    pub fn sample() -> Self {
        let entry = |id: &str, title: &str| TocEntry {
            id: id.to_string(),
            title: title.to_string(),
            children: Vec::new(),
        };
        Self {
            sections: vec![
                (entry("cover", "Cover"), String::new()),
                (
                    entry("ch1", "The Sea"),
                    "Waves and tides shape the rocky shore over long years.".to_string(),
                ),
                (
                    entry("ch2", "The City"),
                    "Concrete towers and crowded trains define urban life.".to_string(),
                ),
            ],
        }
    }

    /// The non-empty sections in indexing shape.
    pub fn index_sections(&self) -> Vec<IndexSection> {
        self.sections
            .iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(entry, text)| IndexSection {
                id: entry.id.clone(),
                title: entry.title.clone(),
                text: text.clone(),
            })
            .collect()
    }
}

#[async_trait]
impl DocumentSource for StaticBook {
    async fn table_of_contents(&self) -> anyhow::Result<Vec<TocEntry>> {
        Ok(self.sections.iter().map(|(e, _)| e.clone()).collect())
    }

    async fn section(&self, section_id: &str) -> anyhow::Result<Option<String>> {
        Ok(self
            .sections
            .iter()
            .find(|(e, _)| e.id == section_id)
            .map(|(_, text)| text.clone()))
    }

    async fn metadata(&self) -> anyhow::Result<BookMetadata> {
        let length = self.sections.iter().map(|(_, t)| t.chars().count()).sum();
        Ok(BookMetadata {
            title: "Shorelines".to_string(),
            author: "A. Author".to_string(),
            length,
        })
    }

    async fn current_page(&self) -> anyhow::Result<Option<ReadingPosition>> {
        Ok(Some(ReadingPosition {
            chapter_title: "The Sea".to_string(),
            progress: 0.25,
            visible_text: "Waves and tides shape the rocky shore".to_string(),
        }))
    }
}
