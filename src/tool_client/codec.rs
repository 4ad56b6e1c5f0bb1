//! Line-delimited JSON-RPC framing.
//!
//! One request is one line of compact JSON terminated by `\n`; one reply is
//! one line back. Request ids come from a per-codec counter so that a reply
//! can always be matched to the request that produced it.

use super::errors::ToolError;
use super::types::{JsonRpcRequest, JsonRpcResponse, ToolInvocation};

/// Longest slice of an offending line quoted in error messages.
const MAX_QUOTED_LINE: usize = 200;

/// Encodes tool invocations and decodes replies for one transport.
#[derive(Debug)]
pub struct RpcCodec {
    next_id: u64,
}

impl Default for RpcCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcCodec {
    /// Create a codec whose first request id is 1.
    pub fn new() -> Self {
        Self { next_id: 1 }
    }

    /// Allocate the next request id.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Encode an invocation as a `tools/call` line (without the trailing newline).
    ///
    /// Returns the id that the matching reply must carry.
    pub fn encode(&mut self, invocation: &ToolInvocation) -> Result<(u64, String), ToolError> {
        let id = self.next_id();
        let line = encode_call(id, &invocation.tool_name, &invocation.arguments)?;
        Ok((id, line))
    }

    /// Parse one reply line.
    pub fn decode(line: &str) -> Result<JsonRpcResponse, ToolError> {
        let value: serde_json::Value =
            serde_json::from_str(line).map_err(|e| ToolError::MalformedResponse {
                reason: format!("invalid JSON ({e}): {}", quote(line)),
            })?;

        let Some(object) = value.as_object() else {
            return Err(ToolError::MalformedResponse {
                reason: format!("reply is not a JSON object: {}", quote(line)),
            });
        };

        let has_result = object.get("result").is_some_and(|v| !v.is_null());
        let has_error = object.get("error").is_some_and(|v| !v.is_null());
        if !has_result && !has_error {
            return Err(ToolError::MalformedResponse {
                reason: format!("reply has neither result nor error: {}", quote(line)),
            });
        }

        serde_json::from_value(value).map_err(|e| ToolError::MalformedResponse {
            reason: format!("invalid JSON-RPC response ({e}): {}", quote(line)),
        })
    }

    /// Parse a request line. The inverse of [`RpcCodec::encode`].
    pub fn decode_request(line: &str) -> Result<JsonRpcRequest, ToolError> {
        serde_json::from_str(line).map_err(|e| ToolError::MalformedResponse {
            reason: format!("invalid JSON-RPC request ({e}): {}", quote(line)),
        })
    }
}

/// Serialize a `tools/call` request with an explicit id.
pub fn encode_call(
    id: u64,
    tool_name: &str,
    arguments: &serde_json::Value,
) -> Result<String, ToolError> {
    let request = JsonRpcRequest::tools_call(id, tool_name, arguments.clone());
    serde_json::to_string(&request).map_err(|e| ToolError::InvalidArguments {
        tool: tool_name.to_string(),
        reason: format!("failed to serialize request: {e}"),
    })
}

fn quote(line: &str) -> String {
    if line.len() <= MAX_QUOTED_LINE {
        return format!("{line:?}");
    }
    let mut end = MAX_QUOTED_LINE;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{:?}...", &line[..end])
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn invocation(tool: &str, args: serde_json::Value) -> ToolInvocation {
        ToolInvocation::new(tool, args, Duration::from_secs(10))
    }

    #[test]
    fn test_first_request_matches_documented_wire_format() {
        let mut codec = RpcCodec::new();
        let (id, line) = codec
            .encode(&invocation("get_weather", serde_json::json!({"city": "Moscow"})))
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(
            line,
            r#"{"jsonrpc":"2.0","method":"tools/call","params":{"name":"get_weather","arguments":{"city":"Moscow"}},"id":1}"#
        );
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_ids_are_monotonic() {
        let mut codec = RpcCodec::new();
        let (a, _) = codec.encode(&invocation("t", serde_json::json!({}))).unwrap();
        let (b, _) = codec.encode(&invocation("t", serde_json::json!({}))).unwrap();
        let c = codec.next_id();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_encode_then_decode_request_round_trips() {
        let mut codec = RpcCodec::new();
        let args = serde_json::json!({
            "store_name": "bot_knowledge",
            "query": "как настроить бота?",
            "top_k": 10,
            "nested": {"flags": [true, false, null]}
        });
        let (id, line) = codec.encode(&invocation("rag_answer", args.clone())).unwrap();

        let decoded = RpcCodec::decode_request(&line).unwrap();
        assert_eq!(decoded, JsonRpcRequest::tools_call(id, "rag_answer", args));
    }

    #[test]
    fn test_decode_result_reply() {
        let resp = RpcCodec::decode(
            r#"{"jsonrpc":"2.0","result":{"content":[{"type":"text","text":"{}"}]},"id":1}"#,
        )
        .unwrap();
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
        assert!(resp.answers(1));
    }

    #[test]
    fn test_decode_error_reply() {
        let resp = RpcCodec::decode(
            r#"{"jsonrpc":"2.0","error":{"code":-32000,"message":"tool not found"},"id":1}"#,
        )
        .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32000);
        assert_eq!(err.message, "tool not found");
    }

    #[test]
    fn test_decode_rejects_malformed_lines() {
        let cases = [
            "",
            "   ",
            "not json at all",
            r#"{"jsonrpc":"2.0","result":{"content":["#,
            "[1, 2, 3]",
            "42",
            r#"{"jsonrpc":"2.0","id":1}"#,
            r#"{"jsonrpc":"2.0","id":1,"result":null}"#,
            r#"{"jsonrpc":"2.0","id":1,"error":"boom"}"#,
        ];
        for line in cases {
            match RpcCodec::decode(line) {
                Err(ToolError::MalformedResponse { .. }) => {}
                other => panic!("expected MalformedResponse for {line:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_quote_truncates_long_lines_on_char_boundary() {
        let long = "ж".repeat(300);
        let quoted = quote(&long);
        assert!(quoted.ends_with("..."));
        assert!(quoted.len() < long.len());
    }
}
