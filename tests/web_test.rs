use std::sync::{Arc, Mutex};

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use riptables_panel::error::{RIPTError, RIPTResult};
use riptables_panel::rule::RIPTChain;
use riptables_panel::web::{router, AppState};
use riptables_panel::{parse_chains, Firewall};

const THREE_CHAINS: &str = include_str!("fixtures/three_chains.txt");

#[derive(Debug, Clone, PartialEq)]
enum Call {
  Add(String, String, Option<u32>),
  Replace(String, u32, String),
  Delete(String, u32),
}

#[derive(Default)]
struct FakeFirewall {
  calls: Mutex<Vec<Call>>,
  fail: bool,
}

impl FakeFirewall {
  fn failing() -> FakeFirewall {
    FakeFirewall { fail: true, ..Default::default() }
  }

  fn record(&self, call: Call) -> RIPTResult<()> {
    let command = match &call {
      Call::Add(chain, _, _) => vec!["iptables".to_string(), "-A".to_string(), chain.clone()],
      Call::Replace(chain, number, _) | Call::Delete(chain, number) => vec!["iptables".to_string(), chain.clone(), number.to_string()],
    };
    self.calls.lock().unwrap().push(call);
    if self.fail {
      return Err(RIPTError::Command { command, status: 1, stderr: "iptables: No chain/target/match by that name.\n".to_string() });
    }
    Ok(())
  }

  fn calls(&self) -> Vec<Call> {
    self.calls.lock().unwrap().clone()
  }
}

impl Firewall for FakeFirewall {
  fn list(&self) -> RIPTResult<Vec<RIPTChain>> {
    if self.fail {
      return Err(RIPTError::Command {
        command: vec!["iptables".into(), "-L".into(), "-n".into(), "--line-numbers".into()],
        status: 4,
        stderr: "iptables: Permission denied (you must be root).\n".to_string(),
      });
    }
    Ok(parse_chains(THREE_CHAINS))
  }

  fn add(&self, chain: &str, specification: &str, position: Option<u32>) -> RIPTResult<()> {
    self.record(Call::Add(chain.to_string(), specification.to_string(), position))
  }

  fn replace(&self, chain: &str, number: u32, specification: &str) -> RIPTResult<()> {
    self.record(Call::Replace(chain.to_string(), number, specification.to_string()))
  }

  fn delete(&self, chain: &str, number: u32) -> RIPTResult<()> {
    self.record(Call::Delete(chain.to_string(), number))
  }
}

async fn send(state: AppState, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
  let request = Request::builder().method(method).uri(uri);
  let request = match body {
    Some(body) => request.header("content-type", "application/json").body(Body::from(body.to_string())),
    None => request.body(Body::empty()),
  }.unwrap();

  let response = router(Arc::new(state)).oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

fn state_with(firewall: &Arc<FakeFirewall>) -> AppState {
  AppState::with_firewall(firewall.clone())
}

#[tokio::test]
async fn test_list_rules() {
  let firewall = Arc::new(FakeFirewall::default());
  let (status, body) = send(state_with(&firewall), Method::GET, "/api/rules", None).await;

  assert_eq!(status, StatusCode::OK);
  let chains = body["chains"].as_array().unwrap();
  assert_eq!(chains.len(), 3);
  assert_eq!(chains[1]["name"], "FORWARD");
  assert_eq!(chains[1]["policy"], "DROP");
  assert_eq!(chains[0]["rules"][0]["details"][0], json!({ "label": "tcp dpt", "value": "48461", "key": "dpt" }));
}

#[tokio::test]
async fn test_list_failure_is_server_error() {
  let firewall = Arc::new(FakeFirewall::failing());
  let (status, body) = send(state_with(&firewall), Method::GET, "/api/rules", None).await;

  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(
    body["error"],
    "Command 'iptables -L -n --line-numbers' failed with exit status 4: iptables: Permission denied (you must be root)."
  );
}

#[tokio::test]
async fn test_missing_config() {
  let dir = tempfile::tempdir().unwrap();
  let state = AppState::new(dir.path().join("config.json"));
  let (status, body) = send(state, Method::GET, "/api/rules", None).await;

  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert!(body["error"].as_str().unwrap().contains("config.example.json"));
}

#[tokio::test]
async fn test_missing_config_on_mutation() {
  let dir = tempfile::tempdir().unwrap();
  let state = AppState::new(dir.path().join("config.json"));
  let (status, _) = send(state, Method::DELETE, "/api/rules/INPUT/1", None).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_config_loaded_on_first_use() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("config.json");
  std::fs::write(&path, r#"{"host": "192.0.2.1", "username": "root"}"#).unwrap();
  let state = Arc::new(AppState::new(&path));

  // Bad quoting is rejected after the config loads and before ssh runs.
  let payload = json!({ "chain": "INPUT", "specification": "-m comment --comment \"open" });
  for _ in 0..2 {
    let request = Request::builder()
      .method(Method::POST)
      .uri("/api/rules")
      .header("content-type", "application/json")
      .body(Body::from(payload.to_string()))
      .unwrap();
    let response = router(state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert!(body["error"].as_str().unwrap().starts_with("No closing quotation"));

    // Kept once loaded, the file is not read again.
    let _ = std::fs::remove_file(&path);
  }
}

#[tokio::test]
async fn test_add_rule() {
  let firewall = Arc::new(FakeFirewall::default());
  let payload = json!({ "chain": "INPUT", "specification": "-p tcp --dport 22 -j ACCEPT" });
  let (status, body) = send(state_with(&firewall), Method::POST, "/api/rules", Some(payload)).await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body, json!({ "status": "ok" }));

  let payload = json!({ "chain": "INPUT", "specification": "-j DROP", "position": 2 });
  send(state_with(&firewall), Method::POST, "/api/rules", Some(payload)).await;

  assert_eq!(firewall.calls(), vec![
    Call::Add("INPUT".into(), "-p tcp --dport 22 -j ACCEPT".into(), None),
    Call::Add("INPUT".into(), "-j DROP".into(), Some(2)),
  ]);
}

#[tokio::test]
async fn test_add_rule_requires_fields() {
  let firewall = Arc::new(FakeFirewall::default());
  for payload in vec![json!({ "chain": "INPUT" }), json!({ "specification": "-j ACCEPT" }), json!({ "chain": "", "specification": "-j ACCEPT" })] {
    let (status, body) = send(state_with(&firewall), Method::POST, "/api/rules", Some(payload)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "chain and specification are required");
  }
  assert!(firewall.calls().is_empty());
}

#[tokio::test]
async fn test_add_rule_rejects_broken_json() {
  let firewall = Arc::new(FakeFirewall::default());
  let request = Request::builder()
    .method(Method::POST)
    .uri("/api/rules")
    .body(Body::from("{\"chain\": "))
    .unwrap();
  let response = router(Arc::new(state_with(&firewall))).oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::BAD_REQUEST);
  assert!(firewall.calls().is_empty());
}

#[tokio::test]
async fn test_command_failure_is_bad_request() {
  let firewall = Arc::new(FakeFirewall::failing());
  let payload = json!({ "chain": "NOPE", "specification": "-j ACCEPT" });
  let (status, body) = send(state_with(&firewall), Method::POST, "/api/rules", Some(payload)).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert!(body["error"].as_str().unwrap().contains("exit status 1"));
}

#[tokio::test]
async fn test_replace_rule() {
  let firewall = Arc::new(FakeFirewall::default());
  let payload = json!({ "specification": "-p udp --dport 53 -j ACCEPT" });
  let (status, _) = send(state_with(&firewall), Method::PUT, "/api/rules/OUTPUT/1", Some(payload)).await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(firewall.calls(), vec![Call::Replace("OUTPUT".into(), 1, "-p udp --dport 53 -j ACCEPT".into())]);
}

#[tokio::test]
async fn test_replace_rule_requires_specification() {
  let firewall = Arc::new(FakeFirewall::default());
  let (status, body) = send(state_with(&firewall), Method::PUT, "/api/rules/OUTPUT/1", Some(json!({}))).await;

  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(body["error"], "specification is required");
  assert!(firewall.calls().is_empty());
}

#[tokio::test]
async fn test_delete_rule() {
  let firewall = Arc::new(FakeFirewall::default());
  let (status, body) = send(state_with(&firewall), Method::DELETE, "/api/rules/DOCKER-USER/3", None).await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "ok");
  assert_eq!(firewall.calls(), vec![Call::Delete("DOCKER-USER".into(), 3)]);
}

#[tokio::test]
async fn test_rule_number_must_be_integer() {
  let firewall = Arc::new(FakeFirewall::default());
  let (status, body) = send(state_with(&firewall), Method::DELETE, "/api/rules/INPUT/first", None).await;

  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body["error"].is_string());
  assert!(firewall.calls().is_empty());
}

#[tokio::test]
async fn test_index_page() {
  let firewall = Arc::new(FakeFirewall::default());
  let request = Request::builder().uri("/").body(Body::empty()).unwrap();
  let response = router(Arc::new(state_with(&firewall))).oneshot(request).await.unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  let page = String::from_utf8_lossy(&bytes);
  assert!(page.contains("/api/rules"));
  assert!(page.contains("renderTargetView"));
  assert!(page.contains("name=\"dport\""));
  assert!(page.contains("extractPort(rule.details, \"dpt\")"));
}
