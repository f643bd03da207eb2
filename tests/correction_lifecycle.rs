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
    let exe = env!("CARGO_BIN_EXE_concoursd");
    let mut child = Command::new(exe)
        .env_remove("CONCOURSD_WORKSPACE")
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

struct Fixture {
    workspace: PathBuf,
    submission_id: String,
    first: String,
    second: String,
}

fn setup_fixture(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Fixture {
    let workspace = temp_dir("concoursd-lifecycle");
    let copy = workspace.join("copie.pdf");
    std::fs::write(&copy, b"%PDF-1.4\n%lifecycle\n").expect("write copy");

    let candidate = request_ok(
        stdin,
        reader,
        "f1",
        "candidates.create",
        json!({ "matricule": "30303030D", "name": "Seynabou Gueye" }),
    );
    let uploaded = request_ok(
        stdin,
        reader,
        "f2",
        "submissions.upload",
        json!({ "candidateId": candidate["candidateId"], "path": copy.to_string_lossy() }),
    );
    let mut corrector_ids = Vec::new();
    for (i, lastname) in ["Diop", "Faye"].iter().enumerate() {
        let c = request_ok(
            stdin,
            reader,
            &format!("f3-{}", i),
            "correctors.create",
            json!({
                "lastname": lastname,
                "firstname": "Correcteur",
                "institution": "Lycée Lamine Guèye",
                "email": format!("{}@example.org", lastname.to_lowercase())
            }),
        );
        corrector_ids.push(c["correctorId"].as_str().expect("correctorId").to_string());
    }
    Fixture {
        workspace,
        submission_id: uploaded["submissionId"].as_str().expect("submissionId").to_string(),
        second: corrector_ids.pop().expect("second"),
        first: corrector_ids.pop().expect("first"),
    }
}

#[test]
fn claim_lock_and_finalize_flow() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader);

    let early = request(
        &mut stdin,
        &mut reader,
        "1",
        "corrections.save",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first, "score": 12 }),
    );
    assert_eq!(error_code(&early), "bad_transition");

    let claimed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "submissions.claim",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first }),
    );
    assert_eq!(claimed["status"], "in_progress");
    // Claiming again by the same corrector is harmless.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.claim",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first }),
    );

    let locked = request(
        &mut stdin,
        &mut reader,
        "4",
        "submissions.claim",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.second }),
    );
    assert_eq!(error_code(&locked), "locked");
    let locked_save = request(
        &mut stdin,
        &mut reader,
        "5",
        "corrections.save",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.second, "score": 3 }),
    );
    assert_eq!(error_code(&locked_save), "locked");

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "6",
        "corrections.save",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first, "score": 21 }),
    );
    assert_eq!(error_code(&out_of_range), "bad_score");

    let draft = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "corrections.save",
        json!({
            "submissionId": fx.submission_id,
            "correctorId": fx.first,
            "score": 11,
            "comments": "premier jet"
        }),
    );
    assert_eq!(draft["finalized"], false);
    assert_eq!(draft["status"], "in_progress");

    let rewritten = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "corrections.save",
        json!({
            "submissionId": fx.submission_id,
            "correctorId": fx.first,
            "score": "13,5",
            "comments": "Bon travail, \"rigoureux\"",
            "finalize": true
        }),
    );
    assert_eq!(rewritten["score"], 13.5);
    assert_eq!(rewritten["status"], "corrected");

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "corrections.get",
        json!({ "submissionId": fx.submission_id }),
    );
    assert_eq!(got["score"], 13.5);
    assert_eq!(got["finalized"], true);
    assert_eq!(got["comments"], "Bon travail, \"rigoureux\"");

    let after = request(
        &mut stdin,
        &mut reader,
        "10",
        "corrections.save",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first, "score": 20 }),
    );
    assert_eq!(error_code(&after), "correction_finalized");

    let reclaim = request(
        &mut stdin,
        &mut reader,
        "11",
        "submissions.claim",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.second }),
    );
    assert_eq!(error_code(&reclaim), "bad_transition");

    let progress = request_ok(&mut stdin, &mut reader, "12", "submissions.progress", json!({}));
    assert_eq!(progress["corrected"], 1);
    assert_eq!(progress["total"], 1);
    assert_eq!(progress["percentCorrected"], 100.0);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(fx.workspace);
}

#[test]
fn release_returns_copy_to_pool_and_drops_draft() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "submissions.claim",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "corrections.save",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first, "score": 9 }),
    );

    let wrong = request(
        &mut stdin,
        &mut reader,
        "3",
        "submissions.release",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.second }),
    );
    assert_eq!(error_code(&wrong), "locked");

    let released = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "submissions.release",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first }),
    );
    assert_eq!(released["status"], "pending");
    let gone = request(
        &mut stdin,
        &mut reader,
        "5",
        "corrections.get",
        json!({ "submissionId": fx.submission_id }),
    );
    assert_eq!(error_code(&gone), "not_found");

    let again = request(
        &mut stdin,
        &mut reader,
        "6",
        "submissions.release",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first }),
    );
    assert_eq!(error_code(&again), "bad_transition");

    // The other corrector can now take it.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "submissions.claim",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.second }),
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(fx.workspace);
}

#[test]
fn rubric_correction_uses_criteria_total() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "submissions.claim",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first }),
    );
    let saved = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "corrections.save",
        json!({
            "submissionId": fx.submission_id,
            "correctorId": fx.first,
            "comments": "Copie solide",
            "criteria": [
                { "name": "Contenu et exactitude", "maxPoints": 8, "score": 7 },
                { "name": "Méthodologie", "maxPoints": 6, "score": 9, "comments": "démarche claire" },
                { "name": "Présentation et clarté", "maxPoints": 4, "score": 2.5 },
                { "name": "Respect des consignes", "maxPoints": 2, "score": 2 }
            ],
            "adjustments": [
                { "criterion": "Présentation et clarté", "op": "increment" }
            ]
        }),
    );
    // Méthodologie is clamped to 6; the increment adds 0.5.
    assert_eq!(saved["score"], 18.0);
    assert_eq!(saved["rubric"]["maxTotal"], 20.0);
    assert_eq!(
        saved["rubric"]["combinedComments"],
        "Copie solide\n\nMéthodologie: démarche claire"
    );

    let got = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "corrections.get",
        json!({ "submissionId": fx.submission_id }),
    );
    assert_eq!(got["criteria"][1]["score"], 6.0);

    let oversized = request(
        &mut stdin,
        &mut reader,
        "4",
        "corrections.save",
        json!({
            "submissionId": fx.submission_id,
            "correctorId": fx.first,
            "criteria": [{ "name": "Dissertation", "maxPoints": 30, "score": 25 }]
        }),
    );
    assert_eq!(error_code(&oversized), "bad_score");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(fx.workspace);
}

#[test]
fn deleting_a_corrector_releases_claims() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "submissions.claim",
        json!({ "submissionId": fx.submission_id, "correctorId": fx.first }),
    );
    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "correctors.delete",
        json!({ "correctorId": fx.first }),
    );
    assert_eq!(deleted["deleted"], true);
    assert_eq!(deleted["releasedSubmissions"], 1);

    let progress = request_ok(&mut stdin, &mut reader, "3", "submissions.progress", json!({}));
    assert_eq!(progress["pending"], 1);

    let missing = request(
        &mut stdin,
        &mut reader,
        "4",
        "correctors.delete",
        json!({ "correctorId": fx.first }),
    );
    assert_eq!(error_code(&missing), "not_found");

    let bad_code = request(
        &mut stdin,
        &mut reader,
        "5",
        "correctors.authenticate",
        json!({ "accessCode": "CORR-NOPE-000000" }),
    );
    assert_eq!(error_code(&bad_code), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(fx.workspace);
}
