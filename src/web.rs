//! JSON API and control panel page.
//!
//! The firewall is created on first use from the config file and kept only
//! once that succeeds, so a missing config keeps answering with an error
//! until it is fixed, without restarting the server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
  body::Bytes,
  extract::{Path, State},
  http::StatusCode,
  response::{Html, IntoResponse, Json, Response},
  routing::{get, put},
  Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::error::{RIPTError, RIPTResult};
use crate::{Firewall, RIPTables};

const INDEX_HTML: &str = include_str!("../static/index.html");

pub struct AppState {
  config_path: PathBuf,
  firewall: OnceCell<Arc<dyn Firewall>>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
  /// Loads `config_path` on the first request that needs the device.
  pub fn new<P: Into<PathBuf>>(config_path: P) -> AppState {
    AppState {
      config_path: config_path.into(),
      firewall: OnceCell::new(),
    }
  }

  pub fn with_firewall(firewall: Arc<dyn Firewall>) -> AppState {
    AppState {
      config_path: PathBuf::new(),
      firewall: OnceCell::new_with(Some(firewall)),
    }
  }

  async fn firewall(&self) -> RIPTResult<Arc<dyn Firewall>> {
    let firewall = self.firewall
      .get_or_try_init(|| async {
        let config_path = self.config_path.clone();
        let firewall = self::blocking(move || RIPTables::from_config_file(config_path)).await?;
        info!("Managing {}@{}", firewall.config().username, firewall.config().host);
        Ok::<Arc<dyn Firewall>, RIPTError>(Arc::new(firewall))
      })
      .await?;
    Ok(firewall.clone())
  }
}

pub fn router(state: SharedState) -> Router {
  Router::new()
    .route("/", get(index))
    .route("/api/rules", get(list_rules).post(add_rule))
    .route("/api/rules/:chain/:number", put(replace_rule).delete(delete_rule))
    .with_state(state)
}

pub async fn serve(state: SharedState, addr: SocketAddr) -> RIPTResult<()> {
  let listener = tokio::net::TcpListener::bind(addr).await?;
  info!("Control panel listening on http://{}", listener.local_addr()?);
  axum::serve(listener, router(state)).await?;
  Ok(())
}

/// `{"error": ...}` with a status code.
#[derive(Debug)]
pub struct ApiError {
  status: StatusCode,
  message: String,
}

impl ApiError {
  fn new<M: ToString>(status: StatusCode, message: M) -> ApiError {
    ApiError { status, message: message.to_string() }
  }

  fn bad_request<M: ToString>(message: M) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, message)
  }

  fn not_found() -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "The requested URL was not found on the server.")
  }

  /// Listing failures are always the server's.
  fn listing(err: RIPTError) -> ApiError {
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err)
  }

  /// A rejected mutation is the caller's fault, a broken setup is not.
  fn mutation(err: RIPTError) -> ApiError {
    if err.is_caller_fault() {
      ApiError::bad_request(err)
    } else {
      ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err)
    }
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    if self.status.is_server_error() {
      error!("{}", self.message);
    } else {
      warn!("{}", self.message);
    }
    (self.status, Json(json!({ "error": self.message }))).into_response()
  }
}

#[derive(Debug, Default, Deserialize)]
struct AddRulePayload {
  chain: Option<String>,
  specification: Option<String>,
  position: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ReplaceRulePayload {
  specification: Option<String>,
}

async fn index() -> Html<&'static str> {
  Html(INDEX_HTML)
}

async fn list_rules(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
  let firewall = state.firewall().await.map_err(ApiError::listing)?;
  let chains = self::blocking(move || firewall.list()).await.map_err(ApiError::listing)?;
  Ok(Json(json!({ "chains": chains })))
}

async fn add_rule(State(state): State<SharedState>, body: Bytes) -> Result<Json<Value>, ApiError> {
  let payload: AddRulePayload = self::payload(&body)?;
  let (chain, specification) = match (self::required(payload.chain), self::required(payload.specification)) {
    (Some(chain), Some(specification)) => (chain, specification),
    _ => return Err(ApiError::bad_request("chain and specification are required")),
  };
  let position = payload.position;

  let firewall = state.firewall().await.map_err(ApiError::mutation)?;
  self::blocking(move || firewall.add(&chain, &specification, position))
    .await
    .map_err(ApiError::mutation)?;
  Ok(self::ok())
}

async fn replace_rule(
  State(state): State<SharedState>,
  Path((chain, number)): Path<(String, String)>,
  body: Bytes,
) -> Result<Json<Value>, ApiError> {
  let number = self::rule_number(&number)?;
  let payload: ReplaceRulePayload = self::payload(&body)?;
  let specification = self::required(payload.specification)
    .ok_or_else(|| ApiError::bad_request("specification is required"))?;

  let firewall = state.firewall().await.map_err(ApiError::mutation)?;
  self::blocking(move || firewall.replace(&chain, number, &specification))
    .await
    .map_err(ApiError::mutation)?;
  Ok(self::ok())
}

async fn delete_rule(
  State(state): State<SharedState>,
  Path((chain, number)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
  let number = self::rule_number(&number)?;

  let firewall = state.firewall().await.map_err(ApiError::mutation)?;
  self::blocking(move || firewall.delete(&chain, number))
    .await
    .map_err(ApiError::mutation)?;
  Ok(self::ok())
}

fn ok() -> Json<Value> {
  Json(json!({ "status": "ok" }))
}

fn payload<'de, T: Deserialize<'de>>(body: &'de [u8]) -> Result<T, ApiError> {
  serde_json::from_slice(body).map_err(|err| ApiError::bad_request(format!("Invalid JSON body: {}", err)))
}

/// Treats an empty string like a missing field.
fn required(field: Option<String>) -> Option<String> {
  field.filter(|item| !item.trim().is_empty())
}

fn rule_number(text: &str) -> Result<u32, ApiError> {
  text.parse::<u32>().map_err(|_| ApiError::not_found())
}

/// Runs a remote call or a config read on the blocking pool.
async fn blocking<T, F>(call: F) -> RIPTResult<T>
  where T: Send + 'static, F: FnOnce() -> RIPTResult<T> + Send + 'static {
  tokio::task::spawn_blocking(call)
    .await
    .unwrap_or_else(|_| Err("blocking task did not complete".into()))
}
