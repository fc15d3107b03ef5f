use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum TemplateError {
    #[error("Missing required input parameter: {0}")]
    MissingInputParameter(String),
}

/// Renders `{name}` placeholders from `input`. Dotted names walk nested
/// objects and arrays. `{{` and `}}` are literal braces. Braced text that is
/// not a placeholder name is copied through unchanged.
pub fn render(template: &str, input: &Value) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        let (head, tail) = rest.split_at(pos);
        out.push_str(head);

        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
            continue;
        }
        if tail.starts_with('}') {
            out.push('}');
            rest = &tail[1..];
            continue;
        }

        match tail[1..].find('}') {
            Some(end) if is_placeholder_name(&tail[1..=end]) => {
                let name = &tail[1..=end];
                let value = lookup(name, input)
                    .ok_or_else(|| TemplateError::MissingInputParameter(name.to_string()))?;
                out.push_str(&value);
                rest = &tail[end + 2..];
            }
            _ => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }

    out.push_str(rest);
    Ok(out)
}

fn is_placeholder_name(candidate: &str) -> bool {
    let mut chars = candidate.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

pub(crate) fn lookup(path: &str, input: &Value) -> Option<String> {
    let mut cur = input;
    for part in path.split('.') {
        if part.is_empty() {
            continue;
        }
        cur = match cur {
            Value::Object(map) => map.get(part)?,
            Value::Array(arr) => arr.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(match cur {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
