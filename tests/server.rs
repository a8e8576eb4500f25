//! `qa serve` over real HTTP.

use std::fs;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn qa_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.push("qa");
    path
}

struct Server {
    child: Child,
    base: String,
    _tmp: TempDir,
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn start_server() -> Server {
    let tmp = TempDir::new().unwrap();
    let port = free_port();
    let config_path = tmp.path().join("qa.toml");
    fs::write(
        &config_path,
        format!(
            r#"[db]
path = "{}/qa.sqlite"

[embedding]
provider = "hashing"
dims = 128

[server]
bind = "127.0.0.1:{}"
"#,
            tmp.path().display(),
            port
        ),
    )
    .unwrap();

    let child = Command::new(qa_binary())
        .arg("--config")
        .arg(&config_path)
        .arg("serve")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start qa serve");

    let server = Server {
        child,
        base: format!("http://127.0.0.1:{}", port),
        _tmp: tmp,
    };

    let deadline = Instant::now() + Duration::from_secs(15);
    while Instant::now() < deadline {
        if reqwest::blocking::get(format!("{}/health", server.base)).is_ok() {
            return server;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    panic!("qa serve did not come up on {}", server.base);
}

#[test]
fn test_http_ingest_query_and_errors() {
    let server = start_server();
    let client = reqwest::blocking::Client::new();

    let health: serde_json::Value = client
        .get(format!("{}/health", server.base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(health["status"], "ok");

    // Generation before any ingest has no evidence to work from.
    let resp = client
        .post(format!("{}/test-cases", server.base))
        .json(&serde_json::json!({"query": "discount tests"}))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 422);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "insufficient_context");

    let resp = client
        .post(format!("{}/ingest", server.base))
        .json(&serde_json::json!({
            "filename": "spec.md",
            "content": "Discount code rules: SAVE15 = 15% off the order total."
        }))
        .send()
        .unwrap();
    assert!(resp.status().is_success());
    let outcome: serde_json::Value = resp.json().unwrap();
    assert_eq!(outcome["chunks_created"], 1);

    let resp: serde_json::Value = client
        .post(format!("{}/query", server.base))
        .json(&serde_json::json!({"query": "discount code", "k": 1}))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(resp["results"][0]["chunk"]["source_name"], "spec.md");

    let stats: serde_json::Value = client
        .get(format!("{}/stats", server.base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(stats["document_count"], 1);
    assert_eq!(stats["has_target_page"], false);

    let resp = client
        .post(format!("{}/ingest", server.base))
        .json(&serde_json::json!({"filename": "notes.exe", "content": "x"}))
        .send()
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["error"]["code"], "unsupported_format");

    let cases: serde_json::Value = client
        .get(format!("{}/test-cases", server.base))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(cases["test_cases"], serde_json::json!([]));
}
