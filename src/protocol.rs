//! Binds one authorization decision to one token issuance, and one signing
//! call to one token consumption.
//!
//! Authorization itself belongs to an [`AuthHandler`]. A handler may run its
//! own multi-step challenge with its own `auth_token`s; the coordinator only
//! issues a signing token once the handler reports success.

use crate::engine::SigningEngine;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::utils::salt_from_process_id;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    Blind,
    Plain,
    SharedKey,
}

impl SignatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureKind::Blind => "blind",
            SignatureKind::Plain => "ecdsa",
            SignatureKind::SharedKey => "sharedkey",
        }
    }
}

impl fmt::Display for SignatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "blind" => Ok(SignatureKind::Blind),
            "ecdsa" => Ok(SignatureKind::Plain),
            "sharedkey" => Ok(SignatureKind::SharedKey),
            other => Err(Error::InvalidRequest(format!(
                "invalid signature type {}",
                other
            ))),
        }
    }
}

/// Transport facts a handler may base its decision on.
#[derive(Clone, Debug, Default)]
pub struct AuthRequest {
    pub remote_addr: Option<IpAddr>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthResponse {
    pub success: bool,
    /// Set on intermediate steps of a multi-step challenge.
    pub auth_token: Option<String>,
    pub response: Vec<String>,
}

impl AuthResponse {
    pub fn granted() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn denied(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            auth_token: None,
            response: vec![reason.into()],
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStep {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Descriptor published on `GET /auth`.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerInfo {
    pub name: String,
    pub sign_types: Vec<String>,
    pub auth_steps: Vec<AuthStep>,
}

/// Pluggable authorization capability.
pub trait AuthHandler: Send + Sync {
    fn name(&self) -> &str;

    fn info(&self) -> HandlerInfo;

    fn auth(
        &self,
        request: &AuthRequest,
        message: &Message,
        process_id: &[u8],
        kind: SignatureKind,
        step: usize,
    ) -> AuthResponse;

    /// Whether the transport must demand a client certificate.
    fn require_certificate(&self) -> bool {
        false
    }

    /// DER-encoded CA certificates trusted for client authentication.
    fn certificates(&self) -> Vec<Vec<u8>> {
        Vec::new()
    }
}

pub type HandlerConstructor = fn() -> Arc<dyn AuthHandler>;

/// Name → constructor table, consulted once at startup.
pub struct HandlerRegistry {
    constructors: BTreeMap<String, HandlerConstructor>,
}

impl HandlerRegistry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(crate::handlers::dummy::NAME, crate::handlers::dummy::constructor);
        registry.register(crate::handlers::ipaddr::NAME, crate::handlers::ipaddr::constructor);
        registry
    }

    pub fn register(&mut self, name: &str, constructor: HandlerConstructor) {
        self.constructors.insert(name.to_string(), constructor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn build(&self, name: &str) -> Result<Arc<dyn AuthHandler>> {
        self.constructors
            .get(name)
            .map(|ctor| ctor())
            .ok_or_else(|| {
                Error::Config(format!(
                    "unknown auth handler {}, available: {}",
                    name,
                    self.names().join(", ")
                ))
            })
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The handler wants another round before deciding.
    Challenge {
        auth_token: String,
        response: Vec<String>,
    },
    /// A signing token was issued.
    Token { token: Vec<u8>, response: Vec<String> },
    /// The election-wide shared key.
    SharedKey { key: Vec<u8>, response: Vec<String> },
}

pub struct AuthProtocol {
    engine: Arc<SigningEngine>,
    handler: Arc<dyn AuthHandler>,
}

impl AuthProtocol {
    pub fn new(engine: Arc<SigningEngine>, handler: Arc<dyn AuthHandler>) -> Self {
        Self { engine, handler }
    }

    pub fn engine(&self) -> &SigningEngine {
        &self.engine
    }

    pub fn handler(&self) -> &dyn AuthHandler {
        self.handler.as_ref()
    }

    /// Runs one handler step; issues a signing token (or the shared key)
    /// only when the handler grants. A processID that can not salt a key is
    /// rejected before the handler sees it.
    pub fn request_auth(
        &self,
        request: &AuthRequest,
        message: &Message,
        process_id: &[u8],
        kind: SignatureKind,
        step: usize,
    ) -> Result<AuthOutcome> {
        salt_from_process_id(process_id)?;
        let decision = self
            .handler
            .auth(request, message, process_id, kind, step);

        if !decision.success {
            if let Some(auth_token) = decision.auth_token {
                return Ok(AuthOutcome::Challenge {
                    auth_token,
                    response: decision.response,
                });
            }
            warn!(
                handler = self.handler.name(),
                sign_type = %kind,
                step,
                "Authorization denied"
            );
            let reason = decision
                .response
                .into_iter()
                .next()
                .unwrap_or_else(|| "not authorized".to_string());
            return Err(Error::Unauthorized(reason));
        }

        info!(
            handler = self.handler.name(),
            process_id = %hex::encode(process_id),
            sign_type = %kind,
            "Authorization granted"
        );
        let response = decision.response;
        match kind {
            SignatureKind::Plain => Ok(AuthOutcome::Token {
                token: self.engine.new_plain_request()?.to_vec(),
                response,
            }),
            SignatureKind::Blind => Ok(AuthOutcome::Token {
                token: self.engine.new_blind_request()?.token(),
                response,
            }),
            SignatureKind::SharedKey => Ok(AuthOutcome::SharedKey {
                key: self.engine.shared_key_signature(process_id)?,
                response,
            }),
        }
    }

    /// Consumes `token` for one signature over `payload`.
    pub fn request_signature(
        &self,
        token: &[u8],
        payload: &[u8],
        process_id: &[u8],
        kind: SignatureKind,
    ) -> Result<Vec<u8>> {
        if token.is_empty() {
            return Err(Error::InvalidRequest("token is empty".into()));
        }
        if payload.is_empty() {
            return Err(Error::InvalidRequest("payload is empty".into()));
        }
        match kind {
            SignatureKind::Plain => self.engine.sign_plain(token, process_id, payload),
            SignatureKind::Blind => Ok(self
                .engine
                .sign_blind_with_token(token, payload, process_id)?
                .to_vec()),
            SignatureKind::SharedKey => Err(Error::InvalidRequest(
                "invalid signature type sharedkey".into(),
            )),
        }
    }
}
