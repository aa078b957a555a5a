use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;

fn docchat_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("docchat");
    path
}

/// Minimal valid PDF containing the text "window test phrase".
/// Builds the body then an xref with correct byte offsets so pdf-extract
/// can parse it.
fn minimal_pdf() -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");
    let o1 = out.len();
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let o2 = out.len();
    out.extend_from_slice(b"2 0 obj << /Type /Pages /Kids [3 0 R] /Count 1 >> endobj\n");
    let o3 = out.len();
    out.extend_from_slice(b"3 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >> endobj\n");
    let o4 = out.len();
    out.extend_from_slice(b"4 0 obj << /Length 46 >> stream\nBT /F1 12 Tf 100 700 Td (window test phrase) Tj ET\nendstream endobj\n");
    let o5 = out.len();
    out.extend_from_slice(
        b"5 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica >> endobj\n",
    );
    let xref_start = out.len();
    out.extend_from_slice(b"xref\n0 6\n");
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o1).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o2).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o3).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o4).as_bytes());
    out.extend_from_slice(format!("{:010} 00000 n \n", o5).as_bytes());
    out.extend_from_slice(b"trailer << /Size 6 /Root 1 0 R >>\nstartxref\n");
    out.extend_from_slice(format!("{}\n", xref_start).as_bytes());
    out.extend_from_slice(b"%%EOF\n");
    out
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let files_dir = root.join("files");
    fs::create_dir_all(&files_dir).unwrap();
    fs::write(
        files_dir.join("alpha.txt"),
        "Alpha document about digital design automation.\n".repeat(60),
    )
    .unwrap();
    fs::write(
        files_dir.join("beta.md"),
        "# Beta\n\nNotes on placement and routing.\n".repeat(40),
    )
    .unwrap();

    let config_content = r#"[chunking]
chunk_size = 500
overlap = 100

[retrieval]
top_k = 3

[server]
bind = "127.0.0.1:7461"
"#;

    let config_path = config_dir.join("docchat.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docchat(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = docchat_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run docchat binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let success = output.status.success();
    (stdout, stderr, success)
}

#[test]
fn ingest_reports_per_file_chunks() {
    let (tmp, config_path) = setup_test_env();
    let files_dir = tmp.path().join("files");

    let (stdout, stderr, success) =
        run_docchat(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(success, "ingest failed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("documents: 2"), "{}", stdout);
    assert!(stdout.contains("extraction skipped: 0"), "{}", stdout);
    assert!(stdout.contains("ok"), "{}", stdout);
}

#[test]
fn corrupt_pdf_is_skipped_while_others_proceed() {
    let (tmp, config_path) = setup_test_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("bad.pdf"), b"not a valid pdf").unwrap();

    let (stdout, stderr, success) =
        run_docchat(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(success, "ingest must succeed: stdout={}, stderr={}", stdout, stderr);
    assert!(stdout.contains("extraction skipped: 1"), "{}", stdout);
    assert!(stdout.contains("documents: 2"), "{}", stdout);
    assert!(stdout.contains("skipped:"), "{}", stdout);
}

#[test]
fn valid_pdf_is_extracted() {
    let (tmp, config_path) = setup_test_env();
    let files_dir = tmp.path().join("files");
    fs::write(files_dir.join("manual.pdf"), minimal_pdf()).unwrap();

    let (stdout, _, success) =
        run_docchat(&config_path, &["ingest", files_dir.to_str().unwrap()]);
    assert!(success, "{}", stdout);
    assert!(stdout.contains("documents: 3"), "{}", stdout);
    assert!(stdout.contains("extraction skipped: 0"), "{}", stdout);
}

#[test]
fn unsupported_file_type_is_an_error() {
    let (tmp, config_path) = setup_test_env();
    let image = tmp.path().join("picture.png");
    fs::write(&image, b"\x89PNG").unwrap();

    let (_, stderr, success) = run_docchat(&config_path, &["ingest", image.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("unsupported file type"), "{}", stderr);
}

#[test]
fn invalid_config_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("docchat.toml");
    fs::write(
        &config_path,
        "[chunking]\nchunk_size = 100\noverlap = 100\n",
    )
    .unwrap();
    let doc = tmp.path().join("doc.txt");
    fs::write(&doc, "content").unwrap();

    let (_, stderr, success) = run_docchat(&config_path, &["ingest", doc.to_str().unwrap()]);
    assert!(!success);
    assert!(
        stderr.contains("overlap must be < chunking.chunk_size"),
        "{}",
        stderr
    );
}

#[test]
fn embed_without_provider_fails_cleanly() {
    let (tmp, config_path) = setup_test_env();
    let files_dir = tmp.path().join("files");

    let (_, stderr, success) = run_docchat(
        &config_path,
        &["ingest", files_dir.to_str().unwrap(), "--embed"],
    );
    assert!(!success);
    assert!(stderr.contains("disabled"), "{}", stderr);
}

// ============ Server tests ============

/// Kills the spawned server when the test ends, pass or fail.
struct ServerGuard(Child);

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_server(config_path: &Path, base_url: &str) -> ServerGuard {
    let child = Command::new(docchat_binary())
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .arg("serve")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .expect("failed to spawn docchat serve");
    let guard = ServerGuard(child);

    let client = reqwest::blocking::Client::new();
    let health = format!("{}/health", base_url);
    for _ in 0..50 {
        if client.get(&health).send().is_ok() {
            return guard;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("server did not become healthy at {}", health);
}

fn server_config(bind: &str) -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let config_path = tmp.path().join("docchat.toml");
    fs::write(
        &config_path,
        format!("[server]\nbind = \"{}\"\n", bind),
    )
    .unwrap();
    (tmp, config_path)
}

#[test]
fn server_health_and_session_settings() {
    let (_tmp, config_path) = server_config("127.0.0.1:7471");
    let base = "http://127.0.0.1:7471";
    let _guard = spawn_server(&config_path, base);
    let client = reqwest::blocking::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(health["status"], "ok");

    let settings: serde_json::Value = client
        .get(format!("{}/session", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(settings["backend"], "hosted");

    // Out-of-range temperature is rejected.
    let resp = client
        .put(format!("{}/session", base))
        .json(&serde_json::json!({
            "role_instruction": "",
            "temperature": 3.0,
            "backend": "local",
            "model": "qwen2-7b",
        }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "bad_request");

    // A valid update is echoed back.
    let updated: serde_json::Value = client
        .put(format!("{}/session", base))
        .json(&serde_json::json!({
            "role_instruction": "You are a chip-design expert.",
            "temperature": 0.5,
            "backend": "local",
            "model": "qwen2-7b",
        }))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(updated["backend"], "local");
    assert_eq!(updated["model"], "qwen2-7b");
}

#[test]
fn server_history_and_reset() {
    let (_tmp, config_path) = server_config("127.0.0.1:7472");
    let base = "http://127.0.0.1:7472";
    let _guard = spawn_server(&config_path, base);
    let client = reqwest::blocking::Client::new();

    let history: serde_json::Value = client
        .get(format!("{}/history", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(history["messages"].as_array().unwrap().len(), 0);

    let reset: serde_json::Value = client
        .post(format!("{}/reset", base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(reset["status"], "ok");
}

#[test]
fn server_rejects_upload_with_embeddings_disabled() {
    let (_tmp, config_path) = server_config("127.0.0.1:7473");
    let base = "http://127.0.0.1:7473";
    let _guard = spawn_server(&config_path, base);
    let client = reqwest::blocking::Client::new();

    use base64::Engine;
    let data = base64::engine::general_purpose::STANDARD.encode(b"some document text");
    let resp = client
        .post(format!("{}/documents", base))
        .json(&serde_json::json!({
            "files": [{"name": "notes.txt", "data_base64": data}]
        }))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
    assert!(body["error"]["message"]
        .as_str()
        .unwrap()
        .contains("disabled"));
}

#[test]
fn server_rejects_empty_chat_message() {
    let (_tmp, config_path) = server_config("127.0.0.1:7474");
    let base = "http://127.0.0.1:7474";
    let _guard = spawn_server(&config_path, base);
    let client = reqwest::blocking::Client::new();

    let resp = client
        .post(format!("{}/chat", base))
        .json(&serde_json::json!({"message": "   "}))
        .send()
        .unwrap();
    assert_eq!(resp.status(), 400);
}
