use serde_json::Value;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use tempfile::NamedTempFile;

fn write_mcp_message(stdin: &mut impl Write, payload: &Value) {
    let body = serde_json::to_vec(payload).unwrap();
    write!(stdin, "Content-Length: {}\r\n\r\n", body.len()).unwrap();
    stdin.write_all(&body).unwrap();
    stdin.flush().unwrap();
}

fn read_mcp_message(stdout: &mut impl BufRead) -> Value {
    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        let n = stdout.read_line(&mut line).unwrap();
        assert!(n > 0, "unexpected EOF");
        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some((name, value)) = trimmed.split_once(':') {
            if name.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(value.trim().parse::<usize>().unwrap());
            }
        }
    }
    let len = content_length.expect("missing Content-Length");
    let mut buf = vec![0_u8; len];
    stdout.read_exact(&mut buf).unwrap();
    serde_json::from_slice(&buf).unwrap()
}

#[test]
fn stdio_server_add_and_search_document() {
    let db = NamedTempFile::new().unwrap();
    let bin = env!("CARGO_BIN_EXE_palimpsest-mcp");
    let mut child = Command::new(bin)
        .env("PALIMPSEST_DB_PATH", db.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    write_mcp_message(
        &mut stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {}
        }),
    );
    let init = read_mcp_message(&mut stdout);
    assert_eq!(init["id"], 1);
    assert_eq!(init["result"]["serverInfo"]["name"], "palimpsest-mcp");

    write_mcp_message(
        &mut stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "add_document",
                "arguments": { "id": "doc1", "content": "alice works at Acme", "metadata": {"tags": ["work"]} }
            }
        }),
    );
    let added = read_mcp_message(&mut stdout);
    assert_eq!(added["id"], 2);
    assert_eq!(added["result"]["structuredContent"]["version"], 1);

    write_mcp_message(
        &mut stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {
                "name": "search",
                "arguments": { "query": "alice", "limit": 10 }
            }
        }),
    );
    let search = read_mcp_message(&mut stdout);
    assert_eq!(search["id"], 3);
    let documents = search["result"]["structuredContent"]["documents"]
        .as_array()
        .unwrap();
    assert!(!documents.is_empty());

    write_mcp_message(
        &mut stdin,
        &serde_json::json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {
                "name": "get_document_timeline",
                "arguments": { "id": "doc1" }
            }
        }),
    );
    let timeline = read_mcp_message(&mut stdout);
    assert_eq!(timeline["id"], 4);
    let entries = timeline["result"]["structuredContent"]["timeline"]
        .as_array()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["event"], "created");

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn stdio_server_rejects_unknown_method() {
    let db = NamedTempFile::new().unwrap();
    let bin = env!("CARGO_BIN_EXE_palimpsest-mcp");
    let mut child = Command::new(bin)
        .env("PALIMPSEST_DB_PATH", db.path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    write_mcp_message(
        &mut stdin,
        &serde_json::json!({ "jsonrpc": "2.0", "id": 1, "method": "not_a_real_method", "params": {} }),
    );
    let response = read_mcp_message(&mut stdout);
    assert_eq!(response["error"]["code"], -32601);

    drop(stdin);
    let _ = child.wait();
}
