use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_visitd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn visitd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn send(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = send(stdin, reader, id, method, params);
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("visitd-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    let early = request(&mut stdin, &mut reader, "2", "visit.status", json!({ "documentId": "x" }));
    assert_eq!(error_code(&early), Some("no_workspace"));

    let selected = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["ok"], true);
    assert!(selected["result"]["templateDocumentId"].is_string());

    let methods = [
        ("config.get", json!({})),
        ("config.update", json!({ "patch": {} })),
        ("admin.institutions.create", json!({})),
        ("admin.professionals.create", json!({})),
        ("admin.accompaniments.create", json!({})),
        ("admin.catalog.add", json!({})),
        ("visits.provision", json!({})),
        ("visits.list", json!({})),
        ("visit.start", json!({})),
        ("visit.status", json!({})),
        ("visit.notes.stage", json!({})),
        ("visit.notes.replace", json!({})),
        ("visit.notes.get", json!({})),
        ("visit.evidence.stage", json!({})),
        ("visit.evidence.remove", json!({})),
        ("visit.evidence.list", json!({})),
        ("visit.finalize", json!({})),
        ("visit.abandon", json!({})),
        ("document.get", json!({})),
        ("document.edit", json!({})),
        ("teachers.save", json!({})),
        ("teachers.find", json!({})),
    ];
    for (i, (method, params)) in methods.iter().enumerate() {
        let id = format!("m{i}");
        let _ = request(&mut stdin, &mut reader, &id, method, params.clone());
    }

    let unknown = send(&mut stdin, &mut reader, "99", "visits.teleport", json!({}));
    assert_eq!(error_code(&unknown), Some("not_implemented"));

    let unknown_doc = request(
        &mut stdin,
        &mut reader,
        "100",
        "visit.status",
        json!({ "documentId": "does-not-exist" }),
    );
    assert_eq!(error_code(&unknown_doc), Some("not_found"));

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn config_update_persists_across_restarts() {
    let workspace = temp_dir("visitd-config");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let bad = request(
        &mut stdin,
        &mut reader,
        "2",
        "config.update",
        json!({ "patch": { "noSuchField": 1 } }),
    );
    assert_eq!(error_code(&bad), Some("bad_params"));
    let updated = request(
        &mut stdin,
        &mut reader,
        "3",
        "config.update",
        json!({ "patch": { "ownerEditor": "ops@example.org", "removedFolderName": "Trash" } }),
    );
    assert_eq!(updated["result"]["config"]["ownerEditor"], "ops@example.org");
    drop(stdin);
    let _ = child.wait();

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let cfg = request(&mut stdin, &mut reader, "2", "config.get", json!({}));
    assert_eq!(cfg["result"]["config"]["ownerEditor"], "ops@example.org");
    assert_eq!(cfg["result"]["config"]["removedFolderName"], "Trash");
    assert_eq!(cfg["result"]["config"]["reportsFolderName"], "Reports");
    drop(stdin);
    let _ = child.wait();
}
