//! One authorization per client IP address and process.
//!
//! Granted `(processID, address)` pairs are kept in memory only. The set
//! grows with every grant and is never pruned, and it starts empty after a
//! restart, so an address authorized before a restart can be authorized
//! again afterwards.

use crate::message::Message;
use crate::protocol::{AuthHandler, AuthRequest, AuthResponse, HandlerInfo, SignatureKind};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use tracing::debug;

pub const NAME: &str = "ipaddr";

pub fn constructor() -> Arc<dyn AuthHandler> {
    Arc::new(IpAddrHandler::default())
}

#[derive(Default)]
pub struct IpAddrHandler {
    seen: Mutex<HashSet<(Vec<u8>, IpAddr)>>,
}

impl AuthHandler for IpAddrHandler {
    fn name(&self) -> &str {
        NAME
    }

    fn info(&self) -> HandlerInfo {
        HandlerInfo {
            name: NAME.to_string(),
            sign_types: vec![
                SignatureKind::Blind.to_string(),
                SignatureKind::Plain.to_string(),
            ],
            auth_steps: vec![],
        }
    }

    fn auth(
        &self,
        request: &AuthRequest,
        _message: &Message,
        process_id: &[u8],
        kind: SignatureKind,
        _step: usize,
    ) -> AuthResponse {
        // the shared key is not an individual credential
        if kind == SignatureKind::SharedKey {
            return AuthResponse::granted();
        }
        let ip = match request.remote_addr {
            Some(ip) => ip,
            None => return AuthResponse::denied("client address unknown"),
        };
        let mut seen = match self.seen.lock() {
            Ok(seen) => seen,
            Err(_) => return AuthResponse::denied("internal error"),
        };
        if seen.insert((process_id.to_vec(), ip)) {
            AuthResponse::granted()
        } else {
            debug!(%ip, "Address already authorized for this process");
            AuthResponse::denied("already authorized")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(ip: &str) -> AuthRequest {
        AuthRequest {
            remote_addr: Some(ip.parse().unwrap()),
        }
    }

    #[test]
    fn one_grant_per_address_and_process() {
        let h = IpAddrHandler::default();
        let msg = Message::default();
        let p1 = [1u8; 32];
        let p2 = [2u8; 32];
        assert!(h.auth(&request("10.0.0.1"), &msg, &p1, SignatureKind::Blind, 0).success);
        assert!(!h.auth(&request("10.0.0.1"), &msg, &p1, SignatureKind::Plain, 0).success);
        assert!(h.auth(&request("10.0.0.1"), &msg, &p2, SignatureKind::Blind, 0).success);
        assert!(h.auth(&request("10.0.0.2"), &msg, &p1, SignatureKind::Blind, 0).success);
    }

    #[test]
    fn missing_address_is_denied() {
        let h = IpAddrHandler::default();
        let r = h.auth(
            &AuthRequest::default(),
            &Message::default(),
            &[1u8; 32],
            SignatureKind::Blind,
            0,
        );
        assert!(!r.success);
        assert!(r.auth_token.is_none());
    }
}
