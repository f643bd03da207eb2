use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
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

fn spawn_sidecar_with(workspace: Option<&Path>) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_concoursd");
    let mut cmd = Command::new(exe);
    match workspace {
        Some(ws) => cmd.env("CONCOURSD_WORKSPACE", ws),
        None => cmd.env_remove("CONCOURSD_WORKSPACE"),
    };
    let mut child = cmd
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn concoursd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
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

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .cloned()
            .unwrap_or(serde_json::Value::Null)
    );
    value.get("result").cloned().unwrap_or(serde_json::Value::Null)
}

fn error_code(value: &serde_json::Value) -> String {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "expected failure: {}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    spawn_sidecar_with(None)
}

fn create_candidate(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    matricule: &str,
) -> String {
    let created = request_ok(
        stdin,
        reader,
        id,
        "candidates.create",
        json!({ "matricule": matricule, "name": "Awa Ndiaye" }),
    );
    created["candidateId"].as_str().expect("candidateId").to_string()
}

#[test]
fn setup_get_returns_defaults_and_update_validates_patches() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let setup = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(setup["grading"]["passPolicy"], "admission12");
    assert_eq!(setup["grading"]["reportPassThreshold"], 10.0);
    assert_eq!(setup["uploads"]["maxSizeMb"], 10);
    assert_eq!(setup["uploads"]["acceptZip"], true);
    assert_eq!(setup["validation"]["correctorPattern"], "^[A-Za-z0-9]{6,}$");
    assert_eq!(setup["reports"]["showGeneratedAt"], true);
    assert!(setup["reports"]["pdfFontDir"].is_null());

    let bad_policy = request(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "grading", "patch": { "passPolicy": "pass15" } }),
    );
    assert_eq!(error_code(&bad_policy), "bad_params");

    let unknown_field = request(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "uploads", "patch": { "maxSizeGb": 1 } }),
    );
    assert_eq!(error_code(&unknown_field), "bad_params");

    let unknown_section = request(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "printing", "patch": {} }),
    );
    assert_eq!(error_code(&unknown_section), "bad_params");

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "grading", "patch": { "passPolicy": "pass10" } }),
    );
    assert_eq!(updated["grading"]["passPolicy"], "pass10");
    assert_eq!(updated["grading"]["reportPassThreshold"], 10.0);

    // Stored policy now drives aggregation when no policy param is given.
    let agg = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "grading.aggregate",
        json!({ "scores": { "Maths": 11, "Physique": 10 } }),
    );
    assert_eq!(agg["policy"], "pass10");
    assert_eq!(agg["passed"], true);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn upload_settings_gate_size_and_archives() {
    let dir = temp_dir("concoursd-setup-uploads");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let candidate_id = create_candidate(&mut stdin, &mut reader, "1", "20240001B");

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "uploads", "patch": { "maxSizeMb": 1, "acceptZip": false } }),
    );

    let big = dir.join("gros.pdf");
    let mut bytes = b"%PDF-1.7\n".to_vec();
    bytes.resize(1024 * 1024 + 16, b'x');
    std::fs::write(&big, &bytes).expect("write big copy");
    let too_large = request(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.upload",
        json!({ "candidateId": candidate_id, "path": big.to_string_lossy() }),
    );
    assert_eq!(error_code(&too_large), "upload_rejected");
    assert_eq!(too_large["error"]["details"]["reason"], "too_large");

    let archive = dir.join("copie.zip");
    std::fs::write(&archive, b"PK\x03\x04rest-of-archive").expect("write zip copy");
    let zip_disabled = request(
        &mut stdin,
        &mut reader,
        "4",
        "submissions.upload",
        json!({ "candidateId": candidate_id, "path": archive.to_string_lossy() }),
    );
    assert_eq!(error_code(&zip_disabled), "upload_rejected");
    assert_eq!(zip_disabled["error"]["details"]["reason"], "zip_disabled");

    let small = dir.join("copie.pdf");
    std::fs::write(&small, b"%PDF-1.7\n%ok\n").expect("write copy");
    let uploaded = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "submissions.upload",
        json!({ "candidateId": candidate_id, "path": small.to_string_lossy() }),
    );
    assert_eq!(uploaded["status"], "pending");

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "uploads", "patch": { "maxSizeMb": 51 } }),
    );
    assert_eq!(error_code(&out_of_range), "bad_params");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn corrector_pattern_change_applies_to_validation() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let before = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "matricule.validate",
        json!({ "value": "abcdef12", "role": "corrector" }),
    );
    assert_eq!(before["valid"], true);

    let unanchored = request(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "validation", "patch": { "correctorPattern": "[A-Z]{3}" } }),
    );
    assert_eq!(error_code(&unanchored), "bad_params");

    request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "validation", "patch": { "correctorPattern": "^CORR-[0-9]{4}$" } }),
    );
    let old_shape = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "matricule.validate",
        json!({ "value": "abcdef12", "role": "corrector" }),
    );
    assert_eq!(old_shape["valid"], false);
    let new_shape = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "matricule.validate",
        json!({ "value": "CORR-1234", "role": "service" }),
    );
    assert_eq!(new_shape["valid"], true);

    request_ok(
        &mut stdin,
        &mut reader,
        "5b",
        "setup.update",
        json!({ "section": "validation", "patch": { "correctorPattern": "^COR1|x$" } }),
    );
    for (id, value, expected) in [
        ("5c", "COR1", true),
        ("5d", "x", true),
        ("5e", "zzzzx", false),
        ("5f", "COR1-anything!!", false),
    ] {
        let checked = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "matricule.validate",
            json!({ "value": value, "role": "corrector" }),
        );
        assert_eq!(checked["valid"], expected, "{value}");
    }

    // Student format is fixed.
    let student = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "matricule.validate",
        json!({ "value": "12345678A", "role": "student" }),
    );
    assert_eq!(student["valid"], true);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn workspace_persists_across_restarts() {
    let ws = temp_dir("concoursd-setup-workspace");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["persistent"], false);
    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.select",
        json!({ "path": ws.to_string_lossy() }),
    );
    assert_eq!(selected["persistent"], true);
    let candidate_id = create_candidate(&mut stdin, &mut reader, "3", "20240002C");
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "grading", "patch": { "reportPassThreshold": 12 } }),
    );
    drop(stdin);
    let _ = child.wait();

    let (mut child, mut stdin, mut reader) = spawn_sidecar_with(Some(&ws));
    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["persistent"], true);
    let listed = request_ok(&mut stdin, &mut reader, "2", "candidates.list", json!({}));
    let candidates = listed["candidates"].as_array().expect("candidates");
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0]["candidateId"], candidate_id.as_str());
    assert_eq!(candidates[0]["matricule"], "20240002C");
    let setup = request_ok(&mut stdin, &mut reader, "3", "setup.get", json!({}));
    assert_eq!(setup["grading"]["reportPassThreshold"], 12.0);

    // Back to a throwaway store: nothing carries over.
    request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.select",
        json!({ "path": ":memory:" }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "5", "candidates.list", json!({}));
    assert_eq!(listed["candidates"].as_array().map(Vec::len), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(ws);
}
