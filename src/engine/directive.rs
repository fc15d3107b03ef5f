use serde_json::{Map, Value};
use thiserror::Error;

pub const FINAL_ANSWER_MARKER: &str = "FINAL_ANSWER:";
pub const TOOL_CALL_MARKER: &str = "TOOL_CALL:";

/// What a model turn asks the ReAct loop to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    FinalAnswer(String),
    /// Raw text after the tool-call marker, parsed separately so a malformed
    /// call can be reported back to the model.
    ToolCall(String),
    Plain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub name: String,
    pub params: Map<String, Value>,
}

#[derive(Debug, Error, PartialEq)]
pub enum DirectiveError {
    #[error("Tool call parsing error: missing tool name")]
    MissingToolName,
    #[error("Tool call parsing error: unbalanced parentheses in `{0}`")]
    UnbalancedParentheses(String),
}

/// A final answer wins over a tool call when a turn contains both.
pub fn parse_response(response: &str) -> Directive {
    if let Some((_, answer)) = response.split_once(FINAL_ANSWER_MARKER) {
        return Directive::FinalAnswer(answer.trim().to_string());
    }
    if let Some((_, call)) = response.split_once(TOOL_CALL_MARKER) {
        return Directive::ToolCall(call.trim().to_string());
    }
    Directive::Plain
}

/// Parses `name(key=value, other="quoted, value")`. Values stay strings.
/// Segments without `=` are ignored. A missing argument list means no arguments.
pub fn parse_tool_call(raw: &str) -> Result<ToolCall, DirectiveError> {
    let raw = raw.trim();
    let (name, args) = match raw.find('(') {
        Some(open) => {
            let close = matching_paren(raw, open)
                .ok_or_else(|| DirectiveError::UnbalancedParentheses(raw.to_string()))?;
            (raw[..open].trim(), &raw[open + 1..close])
        }
        None => (raw.lines().next().unwrap_or_default().trim(), ""),
    };

    let name = name.trim_matches('`');
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(DirectiveError::MissingToolName);
    }

    let mut params = Map::new();
    for segment in split_top_level(args) {
        if let Some((key, value)) = segment.split_once('=') {
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            params.insert(key.to_string(), Value::String(unquote(value.trim()).to_string()));
        }
    }

    Ok(ToolCall {
        name: name.to_string(),
        params,
    })
}

fn matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (idx, ch) in text[open..].char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(') => depth += 1,
            (None, ')') => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + idx);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_top_level(args: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, ch) in args.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '(' | '[' | '{') => depth += 1,
            (None, ')' | ']' | '}') => depth -= 1,
            (None, ',') if depth == 0 => {
                parts.push(&args[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&args[start..]);
    parts
}

fn unquote(value: &str) -> &str {
    for q in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(q) && value.ends_with(q) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
