//! Line-framed JSON-RPC 2.0 server over stdin/stdout.
//!
//! A `BufReader::read_until` loop over stdin, one JSON object in, one JSON
//! object out, with stray diagnostics on stderr so the protocol stream on
//! stdout is never corrupted. Every `tools/call` dispatches straight into
//! [`Coordinator`] in-process.

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::warn;

use crate::coordinator::Coordinator;
use crate::error::CoreError;
use crate::log_store::Stream as LogStream;
use crate::value::Value as BoundaryValue;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "procd";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

/// Run the JSON-RPC loop on stdio until EOF on stdin.
pub async fn run_stdio(coordinator: Coordinator) {
    let stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut reader = BufReader::new(stdin);
    let mut buf: Vec<u8> = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("procd: stdin read error: {e}");
                break;
            }
        }

        // A line need not be valid UTF-8 — that's a ParseError, not a fatal
        // I/O error, so the loop keeps reading subsequent lines.
        let text = match std::str::from_utf8(&buf) {
            Ok(s) => s,
            Err(e) => {
                write_response(&mut stdout, &error_response(Value::Null, PARSE_ERROR, &format!("Parse error: invalid UTF-8: {e}"))).await;
                continue;
            }
        };

        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }

        let request: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                write_response(&mut stdout, &error_response(Value::Null, PARSE_ERROR, &format!("Parse error: {e}"))).await;
                continue;
            }
        };

        let id = request.get("id").cloned().filter(|v| !v.is_null());
        let method = request.get("method").and_then(Value::as_str).unwrap_or("").to_string();
        let params = request.get("params").cloned().unwrap_or(json!({}));

        // A request with a null or absent identifier is a notification —
        // dispatch any side effects but never emit a reply.
        let Some(id) = id else {
            if method == "initialized" {
                // acknowledged silently
            } else {
                warn!("procd: unhandled notification: {method}");
            }
            continue;
        };

        let response = match method.as_str() {
            "initialize" => success(id, handle_initialize()),
            "ping" => success(id, json!({})),
            "tools/list" => success(id, json!({ "tools": tool_catalog() })),
            "tools/call" => handle_tools_call(&coordinator, id, &params).await,
            _ => error_response(id, METHOD_NOT_FOUND, &format!("Method not found: {method}")),
        };

        write_response(&mut stdout, &response).await;
    }
}

fn handle_initialize() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
    })
}

async fn handle_tools_call(coordinator: &Coordinator, id: Value, params: &Value) -> Value {
    let name = params.get("name").and_then(Value::as_str).unwrap_or("");
    let args = params.get("arguments").cloned().unwrap_or(json!({}));

    // Boundary payloads round-trip through the deterministic Value variant
    // before dispatch, rejecting arguments that couldn't be sent back
    // unchanged (e.g. non-finite numbers) rather than passing them through.
    if let Err(reason) = BoundaryValue::from_json(&args) {
        return error_response(id, INVALID_PARAMS, &format!("invalid arguments: {reason}"));
    }

    match dispatch_tool(coordinator, name, &args).await {
        Ok(payload) => success(id, content_envelope(&payload, false)),
        Err(msg) => success(id, content_envelope(&format!("Error: {msg}"), true)),
    }
}

fn content_envelope(text: &str, is_error: bool) -> Value {
    let mut result = json!({ "content": [{ "type": "text", "text": text }] });
    if is_error {
        result["isError"] = json!(true);
    }
    result
}

async fn dispatch_tool(coordinator: &Coordinator, name: &str, args: &Value) -> Result<String, String> {
    match name {
        "start_dev_server" => {
            let session_id = require_i64(args, "session_id")?;
            let command = require_str(args, "command")?.to_string();
            let cwd = require_str(args, "working_directory")?.to_string();
            let port = args.get("port").and_then(Value::as_u64).map(|p| p as u16);
            let session = coordinator
                .start_dev_server(session_id, command, cwd, port)
                .await
                .map_err(|e| e.to_string())?;
            Ok(serde_json::to_string(&session).unwrap_or_default())
        }
        "stop_dev_server" => {
            let session_id = require_i64(args, "session_id")?;
            coordinator.stop_dev_server(session_id).await.map_err(|e| e.to_string())?;
            Ok(json!({ "stopped": session_id }).to_string())
        }
        "restart_dev_server" => {
            let session_id = require_i64(args, "session_id")?;
            let session = coordinator.restart_dev_server(session_id).await.map_err(|e| e.to_string())?;
            Ok(serde_json::to_string(&session).unwrap_or_default())
        }
        "get_server_status" => {
            if let Some(session_id) = args.get("session_id").and_then(Value::as_i64) {
                match coordinator.status(session_id).await {
                    Some(session) => Ok(serde_json::to_string(&session).unwrap_or_default()),
                    None => Err(CoreError::ProcessNotFound(session_id).to_string()),
                }
            } else {
                let all = coordinator.all_statuses().await;
                Ok(serde_json::to_string(&all).unwrap_or_default())
            }
        }
        "get_server_logs" => {
            let session_id = require_i64(args, "session_id")?;
            let count = args.get("lines").and_then(Value::as_u64).unwrap_or(50) as usize;
            let stream = args.get("stream").and_then(Value::as_str).unwrap_or("all");
            let filter = match stream {
                "stdout" => Some(LogStream::Out),
                "stderr" => Some(LogStream::Err),
                _ => None,
            };
            let entries = coordinator.logs(session_id, count, filter).await;
            Ok(serde_json::to_string(&entries).unwrap_or_default())
        }
        "list_available_ports" => {
            let count = args.get("count").and_then(Value::as_u64).unwrap_or(5) as usize;
            let ports = coordinator.available_ports(count);
            Ok(json!({ "ports": ports }).to_string())
        }
        "detect_project_type" => {
            let directory = require_str(args, "directory")?;
            Ok(serde_json::to_string(&coordinator.detect_project_type(directory)).unwrap_or_default())
        }
        "list_system_processes" => {
            let include_all_ports = args.get("include_all_ports").and_then(Value::as_bool).unwrap_or(false);
            let listening = coordinator.scan_system_processes();
            let filtered: Vec<_> = if include_all_ports {
                listening
            } else {
                listening.into_iter().filter(|p| (3000..=3099).contains(&p.port)).collect()
            };
            Ok(serde_json::to_string(&filtered).unwrap_or_default())
        }
        _ => Err(format!("unknown tool: {name}")),
    }
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, String> {
    args.get(key).and_then(Value::as_str).ok_or_else(|| format!("missing required argument: {key}"))
}

fn require_i64(args: &Value, key: &str) -> Result<i64, String> {
    args.get(key).and_then(Value::as_i64).ok_or_else(|| format!("missing required argument: {key}"))
}

fn tool_catalog() -> Value {
    json!([
        {
            "name": "start_dev_server",
            "description": "Launch a dev-server or long-lived shell command inside a supervised session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "session_id": { "type": "integer", "description": "Caller-assigned positive integer session identifier." },
                    "command": { "type": "string", "description": "Shell command to run." },
                    "working_directory": { "type": "string", "description": "Directory to run the command in." },
                    "port": { "type": "integer", "description": "Preferred port; honored only if free and in range." }
                },
                "required": ["session_id", "command", "working_directory"],
                "additionalProperties": false
            }
        },
        {
            "name": "stop_dev_server",
            "description": "Stop a running session and release its resources.",
            "inputSchema": {
                "type": "object",
                "properties": { "session_id": { "type": "integer" } },
                "required": ["session_id"],
                "additionalProperties": false
            }
        },
        {
            "name": "restart_dev_server",
            "description": "Stop and relaunch a session with its previous command and working directory, clearing its logs.",
            "inputSchema": {
                "type": "object",
                "properties": { "session_id": { "type": "integer" } },
                "required": ["session_id"],
                "additionalProperties": false
            }
        },
        {
            "name": "get_server_status",
            "description": "Return one session's status, or all sessions when session_id is omitted.",
            "inputSchema": {
                "type": "object",
                "properties": { "session_id": { "type": "integer" } },
                "additionalProperties": false
            }
        },
        {
            "name": "get_server_logs",
            "description": "Return recent log lines for a session.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "session_id": { "type": "integer" },
                    "lines": { "type": "integer", "description": "Default 50." },
                    "stream": { "type": "string", "enum": ["stdout", "stderr", "all"] }
                },
                "required": ["session_id"],
                "additionalProperties": false
            }
        },
        {
            "name": "list_available_ports",
            "description": "List free ports in the dev range.",
            "inputSchema": {
                "type": "object",
                "properties": { "count": { "type": "integer", "description": "Default 5." } },
                "additionalProperties": false
            }
        },
        {
            "name": "detect_project_type",
            "description": "Probe a directory for common project-ecosystem marker files and suggest a run command.",
            "inputSchema": {
                "type": "object",
                "properties": { "directory": { "type": "string" } },
                "required": ["directory"],
                "additionalProperties": false
            }
        },
        {
            "name": "list_system_processes",
            "description": "Scan the dev port range (and, optionally, a broader known-common set) for listening ports.",
            "inputSchema": {
                "type": "object",
                "properties": { "include_all_ports": { "type": "boolean", "description": "Default false." } },
                "additionalProperties": false
            }
        },
    ])
}

fn success(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

fn error_response(id: Value, code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
}

async fn write_response(stdout: &mut tokio::io::Stdout, response: &Value) {
    let mut output = serde_json::to_string(response).unwrap_or_default();
    output.push('\n');
    if let Err(e) = stdout.write_all(output.as_bytes()).await {
        warn!("procd: stdout write error: {e}");
    }
    if let Err(e) = stdout.flush().await {
        warn!("procd: stdout flush error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_catalog_has_eight_entries() {
        let catalog = tool_catalog();
        assert_eq!(catalog.as_array().unwrap().len(), 8);
    }

    #[test]
    fn content_envelope_marks_errors() {
        let env = content_envelope("Error: boom", true);
        assert_eq!(env["isError"], json!(true));
        assert_eq!(env["content"][0]["text"], json!("Error: boom"));
    }

    fn extract_id(request: &Value) -> Option<Value> {
        request.get("id").cloned().filter(|v| !v.is_null())
    }

    #[test]
    fn explicit_null_id_is_a_notification() {
        let request = json!({"jsonrpc":"2.0","id":null,"method":"initialized"});
        assert!(extract_id(&request).is_none());
    }

    #[test]
    fn absent_id_is_a_notification() {
        let request = json!({"jsonrpc":"2.0","method":"initialized"});
        assert!(extract_id(&request).is_none());
    }

    #[test]
    fn present_id_is_not_a_notification() {
        let request = json!({"jsonrpc":"2.0","id":7,"method":"ping"});
        assert_eq!(extract_id(&request), Some(json!(7)));
    }

    #[tokio::test]
    async fn get_server_logs_filters_before_truncating() {
        let dir = std::env::temp_dir().join(format!("rpc-test-logs-{}", std::process::id()));
        let coordinator = Coordinator::new(
            dir.clone(),
            1000,
            3000,
            3099,
            vec![],
            tokio::time::Duration::from_secs(5),
            tokio::time::Duration::from_secs(3),
        );
        coordinator.start().unwrap();
        let cwd = std::env::temp_dir();
        coordinator
            .start_dev_server(
                1,
                "for i in 1 2 3; do echo out-$i; echo err-$i 1>&2; done; sleep 2".into(),
                cwd.to_string_lossy().into_owned(),
                None,
            )
            .await
            .unwrap();
        tokio::time::sleep(tokio::time::Duration::from_millis(300)).await;

        // Only 2 stdout lines requested, but stderr lines interleave in the
        // buffer — the result must still contain 2 stdout lines, not fewer
        // because truncation ran before the stream filter.
        let result = dispatch_tool(&coordinator, "get_server_logs", &json!({"session_id": 1, "lines": 2, "stream": "stdout"}))
            .await
            .unwrap();
        let entries: Vec<Value> = serde_json::from_str(&result).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e["stream"] == json!("out")));

        coordinator.stop_dev_server(1).await.unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }
}
