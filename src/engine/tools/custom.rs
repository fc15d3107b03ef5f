use boa_engine::context::Context as JsContext;
use boa_engine::Source;
use serde_json::{Map, Value};
use tracing::debug;

use super::ToolError;

const LOOP_ITERATION_LIMIT: u64 = 1_000_000;
const RECURSION_LIMIT: usize = 256;

/// Helpers exposed to custom tool scripts alongside `parameters`.
const PRELUDE: &str = r#"
const __printed = [];
function print(...args) {
  __printed.push(args.map((a) => (typeof a === "string" ? a : JSON.stringify(a))).join(" "));
}
function len(v) {
  if (typeof v === "string" || Array.isArray(v)) return v.length;
  if (v !== null && typeof v === "object") return Object.keys(v).length;
  throw new TypeError("object of type " + typeof v + " has no len()");
}
function str(v) {
  return typeof v === "string" ? v : JSON.stringify(v);
}
function int(v) {
  const n = Math.trunc(Number(v));
  if (Number.isNaN(n)) throw new TypeError("invalid literal for int(): " + v);
  return n;
}
function float(v) {
  const n = Number(v);
  if (Number.isNaN(n)) throw new TypeError("could not convert to float: " + v);
  return n;
}
function bool(v) {
  if (Array.isArray(v)) return v.length > 0;
  if (v !== null && typeof v === "object") return Object.keys(v).length > 0;
  return Boolean(v);
}
function list(v) {
  if (v === undefined || v === null) return [];
  if (typeof v === "object" && !Array.isArray(v)) return Object.keys(v);
  return Array.from(v);
}
function dict(v) {
  return Object.assign({}, v || {});
}
function round(v, digits) {
  const f = Math.pow(10, digits || 0);
  return Math.round(v * f) / f;
}
"#;

/// Evaluates `script` in a fresh context on a blocking thread and returns the
/// value the script assigned to `result` (null when unset).
pub(super) async fn run_script(script: String, params: Map<String, Value>) -> Result<Value, ToolError> {
    let source = build_source(&script, &params)?;

    let evaluated = tokio::task::spawn_blocking(move || evaluate(&source))
        .await
        .map_err(|e| ToolError::Script(format!("script task aborted: {e}")))??;

    let result = evaluated.get("result").cloned().unwrap_or(Value::Null);
    if let Some(printed) = evaluated.get("printed").and_then(Value::as_array) {
        for line in printed.iter().filter_map(Value::as_str) {
            debug!(output = line, "custom tool print");
        }
    }
    Ok(result)
}

fn build_source(script: &str, params: &Map<String, Value>) -> Result<String, ToolError> {
    let params_literal = serde_json::to_string(params)
        .map_err(|e| ToolError::Script(format!("failed to serialize parameters: {e}")))?;

    Ok(format!(
        "const parameters = {params_literal};\n{PRELUDE}\n{script}\n;JSON.stringify({{ result: typeof result === \"undefined\" ? null : result, printed: __printed }});"
    ))
}

fn evaluate(source: &str) -> Result<Value, ToolError> {
    let mut js_context = JsContext::default();
    js_context
        .runtime_limits_mut()
        .set_loop_iteration_limit(LOOP_ITERATION_LIMIT);
    js_context
        .runtime_limits_mut()
        .set_recursion_limit(RECURSION_LIMIT);

    let value = js_context
        .eval(Source::from_bytes(source.as_bytes()))
        .map_err(format_js_error)?;

    let json_text = value
        .to_string(&mut js_context)
        .map_err(format_js_error)?
        .to_std_string()
        .map_err(|_| ToolError::Script("result is not valid UTF-16".to_string()))?;

    serde_json::from_str(&json_text)
        .map_err(|e| ToolError::Script(format!("result is not JSON serializable: {e}")))
}

fn format_js_error(err: boa_engine::JsError) -> ToolError {
    let message = err.to_string();
    if message.trim().is_empty() {
        ToolError::Script("JavaScript execution error".to_string())
    } else {
        ToolError::Script(message)
    }
}
