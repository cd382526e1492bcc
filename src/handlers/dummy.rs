//! Grants every request. For testing deployments only.

use crate::message::Message;
use crate::protocol::{AuthHandler, AuthRequest, AuthResponse, HandlerInfo, SignatureKind};
use std::sync::Arc;

pub const NAME: &str = "dummy";

pub fn constructor() -> Arc<dyn AuthHandler> {
    Arc::new(DummyHandler)
}

pub struct DummyHandler;

impl AuthHandler for DummyHandler {
    fn name(&self) -> &str {
        NAME
    }

    fn info(&self) -> HandlerInfo {
        HandlerInfo {
            name: NAME.to_string(),
            sign_types: vec![
                SignatureKind::Blind.to_string(),
                SignatureKind::Plain.to_string(),
                SignatureKind::SharedKey.to_string(),
            ],
            auth_steps: vec![],
        }
    }

    fn auth(
        &self,
        _request: &AuthRequest,
        _message: &Message,
        _process_id: &[u8],
        _kind: SignatureKind,
        _step: usize,
    ) -> AuthResponse {
        AuthResponse::granted()
    }
}
