//! HTTP surface.
//!
//! `POST /processes/{processId}/{signType}/auth[/{step}]` runs the auth
//! handler and hands out a signing token (`signType` is `blind`, `ecdsa`, or
//! `sharedkey`, which answers with the shared key instead of a token).
//! `POST /processes/{processId}/{signType}/sign` consumes a token.

use crate::error::{Error, Result};
use crate::message::{HexBytes, Message};
use crate::protocol::{AuthOutcome, AuthProtocol, AuthRequest, HandlerInfo, SignatureKind};
use crate::utils::{decode_hex, point_to_bytes};
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

pub struct AppState {
    pub protocol: AuthProtocol,
}

impl AppState {
    pub fn new(protocol: AuthProtocol) -> Self {
        Self { protocol }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/auth", get(handler_info))
        .route("/pubkey/:sign_type", get(root_pubkey))
        .route("/processes/:process_id/:sign_type/pubkey", get(process_pubkey))
        .route("/processes/:process_id/:sign_type/auth", post(auth))
        .route("/processes/:process_id/:sign_type/auth/:step", post(auth_step))
        .route("/processes/:process_id/:sign_type/sign", post(sign))
        .with_state(state)
}

/// Error side of every handler: a `Message` with `ok: false`.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self.0 {
            Error::InvalidRequest(_)
            | Error::InvalidBytes(_)
            | Error::InvalidKeyFormat(_)
            | Error::SignFailure(_) => (StatusCode::BAD_REQUEST, self.0.to_string()),
            Error::Unauthorized(reason) => (StatusCode::UNAUTHORIZED, reason.clone()),
            Error::UnknownToken => (StatusCode::UNAUTHORIZED, "token not found".to_string()),
            Error::Storage(_) | Error::InvalidNonce | Error::Config(_) => {
                error!(error = %self.0, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal error".to_string(),
                )
            }
        };
        (status, Json(Message::failure(reason))).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

// engine and handler calls block on the store
async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(Error::Storage(format!("worker task failed: {}", e))))?
        .map_err(ApiError)
}

fn body(payload: std::result::Result<Json<Message>, JsonRejection>) -> ApiResult<Message> {
    payload
        .map(|Json(m)| m)
        .map_err(|e| ApiError(Error::InvalidRequest(e.body_text())))
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "blindcsp",
    }))
}

async fn handler_info(State(state): State<Arc<AppState>>) -> Json<HandlerInfo> {
    Json(state.protocol.handler().info())
}

async fn root_pubkey(
    State(state): State<Arc<AppState>>,
    Path(sign_type): Path<String>,
) -> ApiResult<Json<Message>> {
    pubkey_response(&state, None, &sign_type)
}

async fn process_pubkey(
    State(state): State<Arc<AppState>>,
    Path((process_id, sign_type)): Path<(String, String)>,
) -> ApiResult<Json<Message>> {
    let process_id = decode_hex(&process_id)?;
    pubkey_response(&state, Some(&process_id), &sign_type)
}

fn pubkey_response(
    state: &AppState,
    process_id: Option<&[u8]>,
    sign_type: &str,
) -> ApiResult<Json<Message>> {
    let engine = state.protocol.engine();
    let point = match sign_type.parse::<SignatureKind>()? {
        SignatureKind::Plain => engine.pub_key_plain(process_id)?,
        SignatureKind::Blind => engine.pub_key_blind(process_id)?,
        SignatureKind::SharedKey => {
            return Err(Error::InvalidRequest("invalid signature type sharedkey".into()).into())
        }
    };
    let mut msg = Message::ok();
    msg.pub_key = Some(HexBytes(point_to_bytes(&point)));
    Ok(Json(msg))
}

async fn auth(
    State(state): State<Arc<AppState>>,
    Path((process_id, sign_type)): Path<(String, String)>,
    connect: Option<ConnectInfo<SocketAddr>>,
    payload: std::result::Result<Json<Message>, JsonRejection>,
) -> ApiResult<Json<Message>> {
    run_auth(state, process_id, sign_type, 0, connect, body(payload)?).await
}

async fn auth_step(
    State(state): State<Arc<AppState>>,
    Path((process_id, sign_type, step)): Path<(String, String, String)>,
    connect: Option<ConnectInfo<SocketAddr>>,
    payload: std::result::Result<Json<Message>, JsonRejection>,
) -> ApiResult<Json<Message>> {
    let step = step
        .parse::<usize>()
        .map_err(|_| Error::InvalidRequest(format!("invalid auth step {}", step)))?;
    run_auth(state, process_id, sign_type, step, connect, body(payload)?).await
}

async fn run_auth(
    state: Arc<AppState>,
    process_id: String,
    sign_type: String,
    step: usize,
    connect: Option<ConnectInfo<SocketAddr>>,
    message: Message,
) -> ApiResult<Json<Message>> {
    let process_id = decode_hex(&process_id)?;
    let kind = sign_type.parse::<SignatureKind>()?;
    let request = AuthRequest {
        remote_addr: connect.map(|ConnectInfo(addr)| addr.ip()),
    };

    let outcome = blocking(move || {
        state
            .protocol
            .request_auth(&request, &message, &process_id, kind, step)
    })
    .await?;

    let mut reply = Message::ok();
    match outcome {
        AuthOutcome::Challenge {
            auth_token,
            response,
        } => {
            reply.auth_token = Some(auth_token);
            reply.response = response;
        }
        AuthOutcome::Token { token, response } => {
            reply.token = Some(HexBytes(token));
            reply.response = response;
        }
        AuthOutcome::SharedKey { key, response } => {
            reply.shared_key = Some(HexBytes(key));
            reply.response = response;
        }
    }
    Ok(Json(reply))
}

async fn sign(
    State(state): State<Arc<AppState>>,
    Path((process_id, sign_type)): Path<(String, String)>,
    payload: std::result::Result<Json<Message>, JsonRejection>,
) -> ApiResult<Json<Message>> {
    let message = body(payload)?;
    let process_id = decode_hex(&process_id)?;
    let kind = sign_type.parse::<SignatureKind>()?;
    let token = message.token.unwrap_or_default();
    let payload = message.payload.unwrap_or_default();

    let signature = blocking(move || {
        state
            .protocol
            .request_signature(&token, &payload, &process_id, kind)
    })
    .await?;

    let mut reply = Message::ok();
    reply.signature = Some(HexBytes(signature));
    Ok(Json(reply))
}
