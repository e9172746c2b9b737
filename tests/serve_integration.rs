//! Purpose: End-to-end tests for `poolside serve` over loopback HTTP.
//! Role: Validate context reuse, global state, stats, and error envelopes across TCP.
//! Invariants: Servers bind loopback only and are killed on drop.
//! Invariants: Bounded waits avoid test flakiness.

use serde_json::{Value, json};
use std::io::Write;
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::thread::sleep;
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

static SERVER_LOCK: Mutex<()> = Mutex::new(());

struct TestServer {
    child: Child,
    base_url: String,
    _server_guard: MutexGuard<'static, ()>,
}

impl TestServer {
    fn start(extra_args: &[&str]) -> TestResult<Self> {
        let guard = SERVER_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let port = pick_port()?;
        let bind = format!("127.0.0.1:{port}");
        let child = Command::new(env!("CARGO_BIN_EXE_poolside"))
            .arg("serve")
            .arg("--bind")
            .arg(&bind)
            .args(extra_args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        let mut server = Self {
            child,
            base_url: format!("http://{bind}"),
            _server_guard: guard,
        };
        server.wait_ready()?;
        Ok(server)
    }

    fn wait_ready(&mut self) -> TestResult<()> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Some(status) = self.child.try_wait()? {
                return Err(format!("server exited early: {status}").into());
            }
            if ureq::get(&self.url("/healthz")).call().is_ok() {
                return Ok(());
            }
            sleep(Duration::from_millis(50));
        }
        Err("server did not become ready".into())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get_json(&self, path: &str) -> TestResult<Value> {
        Ok(ureq::get(&self.url(path)).call()?.into_json()?)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn prelude(contents: &str) -> TestResult<tempfile::NamedTempFile> {
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(contents.as_bytes())?;
    Ok(file)
}

#[test]
fn globals_round_trip_through_a_reused_context() -> TestResult<()> {
    let file = prelude(r#"{"greeting": "hello"}"#)?;
    let path = file.path().to_str().ok_or("utf8 path")?.to_string();
    let server = TestServer::start(&["--prelude", &path])?;

    let globals = server.get_json("/v0/globals")?;
    assert_eq!(globals["globals"]["greeting"], "hello");
    let context = globals["context"].as_u64().ok_or("context id")?;

    let set: Value = ureq::put(&server.url("/v0/globals/color"))
        .send_json(json!({ "value": "teal" }))?
        .into_json()?;
    assert_eq!(set["context"].as_u64(), Some(context));
    assert_eq!(set["previous"], Value::Null);

    let color = server.get_json("/v0/globals/color")?;
    assert_eq!(color["value"], "teal");
    assert_eq!(color["context"].as_u64(), Some(context));

    let stats = server.get_json("/v0/pool")?;
    assert_eq!(stats["pool"]["created"], 1);
    assert_eq!(stats["pool"]["checked_out"], 0);
    Ok(())
}

#[test]
fn prewarm_constructs_contexts_before_requests() -> TestResult<()> {
    let server = TestServer::start(&["--prewarm", "3"])?;
    let stats = server.get_json("/v0/pool")?;
    assert_eq!(stats["pool"]["created"], 3);
    assert_eq!(stats["pool"]["idle"], 3);
    Ok(())
}

#[test]
fn missing_global_returns_not_found_envelope() -> TestResult<()> {
    let server = TestServer::start(&[])?;
    match ureq::get(&server.url("/v0/globals/missing")).call() {
        Err(ureq::Error::Status(code, response)) => {
            assert_eq!(code, 404);
            assert_eq!(response.header("poolside-version"), Some("1"));
            let body: Value = response.into_json()?;
            assert_eq!(body["error"]["kind"], "NotFound");
        }
        other => return Err(format!("expected 404, got {other:?}").into()),
    }
    Ok(())
}

#[test]
fn versions_endpoint_matches_builtin_checklist() -> TestResult<()> {
    let server = TestServer::start(&[])?;
    let report = server.get_json("/v0/versions")?;
    let count = report["versions"].as_array().map(Vec::len);
    assert_eq!(count, Some(poolside::api::builtin_checklist().len()));
    assert_eq!(report["mismatched"], 0);
    Ok(())
}

#[test]
fn unreadable_prelude_fails_startup() -> TestResult<()> {
    let temp = tempfile::tempdir()?;
    let missing = temp.path().join("missing.json");
    let output = Command::new(env!("CARGO_BIN_EXE_poolside"))
        .args(["serve", "--bind", "127.0.0.1:0", "--prelude"])
        .arg(&missing)
        .output()?;
    assert_eq!(output.status.code(), Some(8));
    let err: Value = serde_json::from_slice(&output.stderr)?;
    assert_eq!(err["error"]["kind"], "Io");
    Ok(())
}

#[test]
fn non_loopback_bind_requires_opt_in() -> TestResult<()> {
    let output = Command::new(env!("CARGO_BIN_EXE_poolside"))
        .args(["serve", "--bind", "0.0.0.0:0"])
        .output()?;
    assert_eq!(output.status.code(), Some(2));
    let err: Value = serde_json::from_slice(&output.stderr)?;
    assert_eq!(err["error"]["kind"], "Usage");
    Ok(())
}
