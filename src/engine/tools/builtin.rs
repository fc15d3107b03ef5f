use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};

use super::{calculator, param_str, ToolError};
use crate::engine::round_to;

const DEFAULT_MAX_RESULTS: usize = 10;

/// Deterministic search results; there is no live search backend.
pub(super) fn web_search(params: &Map<String, Value>) -> Value {
    let query = param_str(params, "query").unwrap_or_default();
    let max_results = params
        .get("max_results")
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
        })
        .map(|n| n as usize)
        .unwrap_or(DEFAULT_MAX_RESULTS);
    let encoded = urlencoding::encode(&query);

    let snippets = [
        format!("This is a mock search result for the query \"{query}\". It contains relevant information about the topic."),
        format!("Another relevant search result for \"{query}\" with additional details and context."),
        format!("Third search result providing more context and information about \"{query}\"."),
    ];

    let results: Vec<Value> = snippets
        .into_iter()
        .enumerate()
        .take(max_results)
        .map(|(idx, snippet)| {
            let n = idx + 1;
            json!({
                "title": format!("Search result for \"{query}\" - Article {n}"),
                "url": format!("https://example.com/article{n}?q={encoded}"),
                "snippet": snippet,
            })
        })
        .collect();

    Value::Array(results)
}

/// Replaces every character outside `[A-Za-z0-9_.-]` with `_`. Names made
/// only of dots are rejected.
pub fn sanitize_filename(filename: &str) -> Result<String, ToolError> {
    let sanitized: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() || sanitized.chars().all(|c| c == '.') {
        return Err(ToolError::InvalidFilename(filename.to_string()));
    }
    Ok(sanitized)
}

fn sandbox_path(sandbox_dir: &Path, params: &Map<String, Value>) -> Result<(PathBuf, String), ToolError> {
    let filename = param_str(params, "filename")
        .filter(|f| !f.is_empty())
        .ok_or(ToolError::MissingParameter("Filename"))?;
    let safe = sanitize_filename(&filename)?;
    Ok((sandbox_dir.join(safe), filename))
}

pub(super) async fn file_write(
    sandbox_dir: &Path,
    params: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let (path, _) = sandbox_path(sandbox_dir, params)?;
    let content = param_str(params, "content").unwrap_or_default();

    let io_err = |source| ToolError::Io {
        action: "write",
        source,
    };
    tokio::fs::create_dir_all(sandbox_dir).await.map_err(io_err)?;
    tokio::fs::write(&path, content.as_bytes()).await.map_err(io_err)?;

    Ok(json!({
        "success": true,
        "filepath": path.display().to_string(),
        "bytes_written": content.len(),
    }))
}

pub(super) async fn file_read(
    sandbox_dir: &Path,
    params: &Map<String, Value>,
) -> Result<Value, ToolError> {
    let (path, filename) = sandbox_path(sandbox_dir, params)?;

    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ToolError::FileNotFound(filename));
        }
        Err(source) => {
            return Err(ToolError::Io {
                action: "read",
                source,
            })
        }
    };

    Ok(json!({
        "success": true,
        "content": content,
        "filepath": path.display().to_string(),
        "bytes_read": content.len(),
    }))
}

pub(super) fn calculator(params: &Map<String, Value>) -> Result<Value, ToolError> {
    let expression = param_str(params, "expression")
        .filter(|e| !e.trim().is_empty())
        .ok_or(ToolError::MissingParameter("Expression"))?;
    let value = calculator::evaluate(&expression)?;
    Ok(json!({
        "result": round_to(value, 3),
        "expression": expression,
    }))
}
