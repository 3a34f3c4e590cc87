//! Tool handlers and the argument helpers they share.
//!
//! A handler is an opaque `(arguments) -> text` function. Failures are plain
//! `anyhow` errors; the registry turns them into readable content, so they
//! never surface as protocol errors.

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

/// A callable tool implementation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, arguments: Value) -> anyhow::Result<String>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send + 'static,
{
    async fn invoke(&self, arguments: Value) -> anyhow::Result<String> {
        (self.0)(arguments).await
    }
}

// ─── Argument Helpers ────────────────────────────────────────────────────────

/// Fail with one message naming every missing (or null) parameter.
pub fn validate_required(arguments: &Value, required: &[&str]) -> anyhow::Result<()> {
    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|key| arguments.get(*key).map_or(true, Value::is_null))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("Missing required parameters: {}", missing.join(", "))
    }
}

/// A required string parameter.
pub fn required_str<'a>(arguments: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    validate_required(arguments, &[key])?;
    arguments[key]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Parameter '{key}' must be a string"))
}

/// An optional boolean parameter; absent or null means `None`.
pub fn optional_bool(arguments: &Value, key: &str) -> anyhow::Result<Option<bool>> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("Parameter '{key}' must be a boolean")),
    }
}

/// An optional non-negative integer parameter; absent or null means `None`.
pub fn optional_u64(arguments: &Value, key: &str) -> anyhow::Result<Option<u64>> {
    match arguments.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .map(Some)
            .ok_or_else(|| anyhow::anyhow!("Parameter '{key}' must be a non-negative integer")),
    }
}

/// Render handler output as text: strings pass through, anything else is
/// pretty-printed JSON.
pub fn format_result(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_handler_invokes_closure() {
        let handler = handler_fn(|args: Value| async move {
            Ok::<_, anyhow::Error>(format!("got {}", required_str(&args, "text")?))
        });
        let out = handler.invoke(json!({"text": "hi"})).await.unwrap();
        assert_eq!(out, "got hi");

        let err = handler.invoke(json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing required parameters: text");
    }

    #[test]
    fn test_validate_required_lists_all_missing() {
        let args = json!({"a": 1, "b": null});
        let err = validate_required(&args, &["a", "b", "c"]).unwrap_err();
        assert_eq!(err.to_string(), "Missing required parameters: b, c");
        assert!(validate_required(&args, &["a"]).is_ok());
    }

    #[test]
    fn test_required_str_wrong_type() {
        let err = required_str(&json!({"text": 3}), "text").unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn test_optional_params() {
        let args = json!({"flag": true, "ms": 25, "bad": "x"});
        assert_eq!(optional_bool(&args, "flag").unwrap(), Some(true));
        assert_eq!(optional_bool(&args, "absent").unwrap(), None);
        assert_eq!(optional_u64(&args, "ms").unwrap(), Some(25));
        assert!(optional_u64(&args, "bad").is_err());
    }

    #[test]
    fn test_format_result() {
        assert_eq!(format_result(&json!("plain")), "plain");
        assert_eq!(format_result(&json!({"a": 1})), "{\n  \"a\": 1\n}");
    }
}
