//! Windowed text chunking for semantic indexing.
//!
//! Chunks are `window`-character windows with `overlap` characters of shared
//! context between neighbours: every chunk after the first starts exactly
//! `overlap` characters before the previous chunk's end, so stripping that
//! many leading characters from each subsequent chunk reconstructs the
//! normalized input. Breakpoints prefer sentence ends, then word ends, then a
//! raw cut.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChunkingConfig {
    /// Target window size in characters.
    #[serde(default = "default_window")]
    pub window: usize,
    /// Characters of shared context between consecutive chunks. Must be
    /// smaller than `window`.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

pub(crate) fn default_window() -> usize {
    500
}

pub(crate) fn default_overlap() -> usize {
    50
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window: default_window(),
            overlap: default_overlap(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.window == 0 {
            anyhow::bail!("chunk window must be positive");
        }
        if self.overlap >= self.window {
            anyhow::bail!(
                "chunk overlap ({}) must be smaller than the window ({})",
                self.overlap,
                self.window
            );
        }
        Ok(())
    }
}

/// Collapse whitespace runs to single spaces and trim. Chunking and
/// reconstruction are both defined over this normalized form.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_whitespace = false;
    for ch in text.trim().chars() {
        if ch.is_whitespace() {
            if !in_whitespace {
                out.push(' ');
            }
            in_whitespace = true;
        } else {
            out.push(ch);
            in_whitespace = false;
        }
    }
    out
}

/// Split normalized section text into overlapping windows. Empty input yields
/// no chunks; no chunk exceeds `window` characters.
pub fn chunk_text(text: &str, config: &ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut chunks = Vec::new();
    if len == 0 {
        return chunks;
    }

    let window = config.window;
    let overlap = config.overlap.min(window.saturating_sub(1));
    let mut start = 0usize;

    while start < len {
        let remaining = len - start;
        if remaining <= window {
            chunks.push(chars[start..].iter().collect());
            break;
        }

        let limit = start + window;
        // A breakpoint at or before start+overlap would move the next start
        // backward past where this chunk began; restricting the search floor
        // keeps the scan strictly advancing.
        let floor = start + overlap + 1;
        let end = find_breakpoint(&chars, floor, limit);
        chunks.push(chars[start..end].iter().collect());
        start = end - overlap;
    }

    chunks
}

/// Best cut position in (floor..=limit]: latest sentence end, else latest
/// word end, else the raw limit.
fn find_breakpoint(chars: &[char], floor: usize, limit: usize) -> usize {
    let mut word_end = None;
    for end in (floor..=limit).rev() {
        let prev = chars[end - 1];
        let next = chars.get(end).copied();
        let at_gap = next.map(|c| c.is_whitespace()).unwrap_or(true);
        if !at_gap {
            continue;
        }
        if matches!(prev, '.' | '!' | '?') {
            return end;
        }
        if word_end.is_none() && !prev.is_whitespace() {
            word_end = Some(end);
        }
    }
    word_end.unwrap_or(limit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(window: usize, overlap: usize) -> ChunkingConfig {
        ChunkingConfig { window, overlap }
    }

    /// Strip exactly `overlap` leading chars from every chunk after the first
    /// and concatenate.
    fn reconstruct(chunks: &[String], overlap: usize) -> String {
        let mut out = String::new();
        for (i, chunk) in chunks.iter().enumerate() {
            if i == 0 {
                out.push_str(chunk);
            } else {
                out.extend(chunk.chars().skip(overlap));
            }
        }
        out
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", &cfg(100, 10)).is_empty());
        assert!(chunk_text(&normalize("   \n\t  "), &cfg(100, 10)).is_empty());
    }

    #[test]
    fn short_input_is_one_chunk() {
        let chunks = chunk_text("A short passage.", &cfg(100, 10));
        assert_eq!(chunks, vec!["A short passage.".to_string()]);
    }

    #[test]
    fn sections_of_1200_and_300_chars_give_3_plus_1_chunks() {
        // 239 five-char words plus a final 5-char word with no trailing space.
        let mut long = "word ".repeat(239);
        long.push_str("wordx");
        assert_eq!(long.chars().count(), 1200);
        let short = "tail ".repeat(59) + "tailz";
        assert_eq!(short.chars().count(), 300);

        let config = cfg(500, 50);
        let long_chunks = chunk_text(&normalize(&long), &config);
        let short_chunks = chunk_text(&normalize(&short), &config);
        assert_eq!(long_chunks.len(), 3);
        assert_eq!(short_chunks.len(), 1);
        for chunk in long_chunks.iter().chain(&short_chunks) {
            assert!(chunk.chars().count() <= 500);
        }
    }

    #[test]
    fn reconstruction_roundtrip() {
        let text = normalize(
            &"The narrator walks along the shore. Waves crash quietly. \
              A memory surfaces from childhood, unbidden and sharp. "
                .repeat(20),
        );
        for (w, o) in [(80, 10), (120, 30), (500, 50), (64, 0)] {
            let chunks = chunk_text(&text, &cfg(w, o));
            assert_eq!(reconstruct(&chunks, o), text, "w={w} o={o}");
            for chunk in &chunks {
                assert!(chunk.chars().count() <= w, "w={w} o={o}");
            }
        }
    }

    #[test]
    fn prefers_sentence_boundaries() {
        let text = "First sentence here. Second sentence follows. Third one rambles on for a while longer.";
        let chunks = chunk_text(text, &cfg(50, 5));
        // The first cut lands right after a sentence end, not mid-word.
        assert!(chunks[0].ends_with('.'), "got {:?}", chunks[0]);
    }

    #[test]
    fn unbroken_token_run_falls_back_to_raw_cut() {
        let text: String = "x".repeat(1000);
        let chunks = chunk_text(&text, &cfg(100, 10));
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
        assert_eq!(reconstruct(&chunks, 10), text);
    }

    #[test]
    fn terminates_and_advances_on_pathological_boundaries() {
        // Sentence ends clustered inside the overlap region must not stall
        // the scan or move it backward.
        let text = normalize(&"a. b. c. d. e. f. g. h. ".repeat(100));
        let config = cfg(20, 10);
        let chunks = chunk_text(&text, &config);
        // Step is at least one char per chunk, so the chunk count is bounded.
        assert!(chunks.len() <= text.chars().count());
        assert_eq!(reconstruct(&chunks, config.overlap), text);
    }

    #[test]
    fn step_bound_matches_window_minus_overlap() {
        let text = "word ".repeat(1000);
        let text = normalize(&text);
        let (w, o) = (100, 20);
        let chunks = chunk_text(&text, &cfg(w, o));
        // O(len / (W - O)) + constant. Boundary search can shorten each step
        // a little, so allow slack above the ideal count.
        let ideal = text.chars().count() / (w - o);
        assert!(
            chunks.len() <= ideal * 2 + 2,
            "chunks={} ideal={}",
            chunks.len(),
            ideal
        );
    }

    #[test]
    fn config_validation() {
        assert!(cfg(100, 99).validate().is_ok());
        assert!(cfg(100, 100).validate().is_err());
        assert!(cfg(0, 0).validate().is_err());
    }
}
