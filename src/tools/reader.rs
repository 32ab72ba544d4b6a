//! Reading tools backed by the document-extraction collaborator.

use serde_json::Value;

use crate::error::ToolError;
use crate::traits::{DocumentSource, TocEntry};

/// Chapters longer than this are truncated in tool results; the agent is told
/// how much was cut.
const MAX_CHAPTER_CHARS: usize = 20_000;

pub async fn table_of_contents(source: &dyn DocumentSource) -> Result<String, ToolError> {
    let toc = source
        .table_of_contents()
        .await
        .map_err(ToolError::Source)?;
    let metadata = source.metadata().await.map_err(ToolError::Source)?;

    let mut out = format!("{} by {}\n\nTable of Contents:\n", metadata.title, metadata.author);
    render_entries(&toc, 0, &mut out);
    Ok(out)
}

fn render_entries(entries: &[TocEntry], depth: usize, out: &mut String) {
    for entry in entries {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(&format!("- {} ({})\n", entry.title, entry.id));
        render_entries(&entry.children, depth + 1, out);
    }
}

pub async fn chapter(source: &dyn DocumentSource, args: &Value) -> Result<String, ToolError> {
    let chapter_id = args
        .get("chapter_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::Source(anyhow::anyhow!("missing chapter_id argument")))?;

    let text = source
        .section(chapter_id)
        .await
        .map_err(ToolError::Source)?;
    match text {
        None => Err(ToolError::Source(anyhow::anyhow!(
            "chapter '{chapter_id}' not found - check the table of contents for valid ids"
        ))),
        Some(text) if text.trim().is_empty() => Err(ToolError::Source(anyhow::anyhow!(
            "chapter '{chapter_id}' has empty content - it may be a cover or title page"
        ))),
        Some(text) => {
            let total = text.chars().count();
            if total > MAX_CHAPTER_CHARS {
                let truncated: String = text.chars().take(MAX_CHAPTER_CHARS).collect();
                Ok(format!(
                    "{truncated}\n\n[truncated: showing {MAX_CHAPTER_CHARS} of {total} characters]"
                ))
            } else {
                Ok(text)
            }
        }
    }
}

pub async fn current_page(source: &dyn DocumentSource) -> Result<String, ToolError> {
    let position = source.current_page().await.map_err(ToolError::Source)?;
    match position {
        Some(pos) => Ok(format!(
            "Currently reading: {} ({:.0}% through the book)\n\nVisible text:\n{}",
            pos.chapter_title,
            pos.progress * 100.0,
            pos.visible_text
        )),
        None => Ok("No reading position available.".to_string()),
    }
}
