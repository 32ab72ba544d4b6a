//! The semantic search tool over the retrieval engine.

use serde_json::Value;

use crate::error::ToolError;
use crate::index::{IndexManager, SearchHit};

const DEFAULT_TOP_K: usize = 5;
const MAX_TOP_K: usize = 10;

pub async fn search_book(
    index: &IndexManager,
    document_id: &str,
    args: &Value,
) -> Result<String, ToolError> {
    let queries = parse_queries(args)?;
    let top_k = args
        .get("top_k")
        .and_then(Value::as_u64)
        .map(|k| k as usize)
        .unwrap_or(DEFAULT_TOP_K)
        .clamp(1, MAX_TOP_K);

    let hits = if queries.len() == 1 {
        index.search(document_id, &queries[0], top_k).await?
    } else {
        index.search_many(document_id, &queries, top_k).await?
    };

    if hits.is_empty() {
        return Ok("no results - no matching passages found, try different search terms".to_string());
    }
    Ok(format_hits(&hits))
}

/// The tool accepts both the multi-query form (`queries: [..]`) and the
/// older single-query form (`query: ".."`).
fn parse_queries(args: &Value) -> Result<Vec<String>, ToolError> {
    if let Some(list) = args.get("queries").and_then(Value::as_array) {
        let queries: Vec<String> = list
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .filter(|q| !q.trim().is_empty())
            .collect();
        if !queries.is_empty() {
            return Ok(queries);
        }
    }
    if let Some(query) = args.get("query").and_then(Value::as_str) {
        if !query.trim().is_empty() {
            return Ok(vec![query.to_string()]);
        }
    }
    Err(ToolError::Source(anyhow::anyhow!(
        "search_book requires a 'queries' list or a 'query' string"
    )))
}

fn format_hits(hits: &[SearchHit]) -> String {
    let mut out = format!("Found {} relevant passage(s):\n", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. [{}, score {:.3}]\n{}\n",
            i + 1,
            hit.section_title,
            hit.score,
            hit.text
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_single_and_multi_query_forms() {
        let q = parse_queries(&json!({"query": "theme"})).unwrap();
        assert_eq!(q, vec!["theme"]);

        let q = parse_queries(&json!({"queries": ["a", "b"]})).unwrap();
        assert_eq!(q, vec!["a", "b"]);

        // Multi-query form wins when both are present.
        let q = parse_queries(&json!({"queries": ["a"], "query": "b"})).unwrap();
        assert_eq!(q, vec!["a"]);

        assert!(parse_queries(&json!({})).is_err());
        assert!(parse_queries(&json!({"query": "  "})).is_err());
    }

    #[test]
    fn formats_hits_with_section_and_score() {
        let hits = vec![SearchHit {
            text: "A memory surfaces.".to_string(),
            section_id: "ch3".to_string(),
            section_title: "Chapter Three".to_string(),
            score: 0.9123,
        }];
        let out = format_hits(&hits);
        assert!(out.contains("Chapter Three"));
        assert!(out.contains("0.912"));
        assert!(out.contains("A memory surfaces."));
    }
}
