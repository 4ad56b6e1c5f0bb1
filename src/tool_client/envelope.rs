//! Result unwrapping.
//!
//! Tool servers answer `tools/call` with
//! `{"content":[{"type":"text","text":"<json>"}]}` where `<json>` is the
//! tool's real answer encoded as a string. This module performs that second
//! decode so nothing above the core ever sees the envelope.

use super::errors::ToolError;
use super::types::JsonRpcResponse;

/// Extract the tool's payload from a response.
pub fn unwrap_result(response: JsonRpcResponse) -> Result<serde_json::Value, ToolError> {
    if let Some(err) = response.error {
        return Err(ToolError::Remote {
            code: err.code,
            message: err.message,
            data: err.data,
        });
    }

    let Some(result) = response.result else {
        return Err(ToolError::Protocol {
            reason: "response has neither result nor error".into(),
        });
    };

    let text = envelope_text(&result)?;
    serde_json::from_str(text).map_err(|e| ToolError::Shape {
        reason: format!("content[0].text is not valid JSON: {e}"),
    })
}

/// Find `content[0].text` inside a result object.
fn envelope_text(result: &serde_json::Value) -> Result<&str, ToolError> {
    let first = result
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|items| items.first())
        .ok_or_else(|| ToolError::Shape {
            reason: "result has no content[0]".into(),
        })?;

    first
        .get("text")
        .and_then(|t| t.as_str())
        .ok_or_else(|| ToolError::Shape {
            reason: "content[0].text is missing or not a string".into(),
        })
}

/// Build the envelope a tool server would send for `payload`.
#[cfg(test)]
pub(crate) fn wrap_payload(payload: &serde_json::Value) -> serde_json::Value {
    serde_json::json!({
        "content": [{"type": "text", "text": payload.to_string()}]
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
