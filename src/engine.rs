//! Issues one-time signing tokens and turns each into exactly one
//! election-scoped signature.
//!
//! Token lifecycle: `Issued -> Consumed`. A token is consumed the moment its
//! lookup succeeds, whether or not the signature that follows succeeds, and
//! there is no expiry: unconsumed tokens stay in the store until consumed or
//! until the data directory is wiped.

use crate::error::{Error, Result};
use crate::salted_key::SaltedKey;
use crate::token_store::{SqliteKv, TokenStore};
use crate::utils::*;
use k256::elliptic_curve::Field;
use k256::{AffinePoint, ProjectivePoint, Scalar};
use rand::rngs::OsRng;
use rand::RngCore;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// File name of the token store inside the data directory.
pub const TOKEN_DB: &str = "tokens.db";

/// Byte length of a plain-scheme token.
pub const PLAIN_TOKEN_LEN: usize = 32;

// plain tokens carry no secret
const PLAIN_PLACEHOLDER: &[u8] = &[0u8];

/// Public parameters of a freshly issued blind request.
#[derive(Clone, Debug)]
pub struct BlindRequest {
    /// Store key: hex of `R.x ‖ R.y`.
    pub token_id: String,
    /// `R = k·G`, handed to the requester for blinding.
    pub signer_r: AffinePoint,
    /// Unsalted root key; salting happens per processID at signing time.
    pub root_public: AffinePoint,
}

impl BlindRequest {
    /// What the client echoes back: `R`, SEC1 compressed.
    pub fn token(&self) -> Vec<u8> {
        point_to_bytes(&self.signer_r)
    }
}

pub struct SigningEngine {
    key: SaltedKey,
    tokens: Arc<TokenStore>,
}

impl SigningEngine {
    /// The key is validated before anything touches `tokens`.
    pub fn new(key_hex: &str, tokens: Arc<TokenStore>) -> Result<Self> {
        let key = SaltedKey::from_hex(key_hex)?;
        Ok(Self { key, tokens })
    }

    /// Engine backed by a SQLite token store under `data_dir`.
    pub fn open(key_hex: &str, data_dir: impl AsRef<Path>) -> Result<Self> {
        let key = SaltedKey::from_hex(key_hex)?;
        let kv = SqliteKv::open(data_dir.as_ref().join(TOKEN_DB))?;
        Ok(Self {
            key,
            tokens: Arc::new(TokenStore::new(Arc::new(kv))),
        })
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// 32 random bytes, registered before being returned.
    pub fn new_plain_request(&self) -> Result<[u8; PLAIN_TOKEN_LEN]> {
        let mut token = [0u8; PLAIN_TOKEN_LEN];
        OsRng.fill_bytes(&mut token);
        self.tokens.put(&hex::encode(token), PLAIN_PLACEHOLDER)?;
        info!("Plain signing token issued");
        Ok(token)
    }

    /// Fresh `(k, R)`; `k` is stored under `R`'s coordinates.
    pub fn new_blind_request(&self) -> Result<BlindRequest> {
        let (k, signer_r) = loop {
            match draw_nonce() {
                Ok(pair) => break pair,
                Err(Error::InvalidNonce) => {
                    warn!("Drew a zero blind nonce, drawing again");
                    continue;
                }
                Err(e) => return Err(e),
            }
        };
        let token_id = point_coordinates_hex(&signer_r);
        self.tokens.put(&token_id, &scalar_to_be_bytes(&k))?;
        info!("Blind signing token issued");
        Ok(BlindRequest {
            token_id,
            signer_r,
            root_public: self.key.root_public(),
        })
    }

    /// Consumes `token` and signs `message` with the key salted by `process_id`.
    /// A malformed `process_id` is rejected before the token is touched.
    pub fn sign_plain(&self, token: &[u8], process_id: &[u8], message: &[u8]) -> Result<Vec<u8>> {
        let salt = salt_from_process_id(process_id)?;
        self.take_or_warn(&hex::encode(token))?;
        let signature = self.key.sign_plain(&salt, message)?;
        info!(process_id = %hex::encode(process_id), "Plain signature issued");
        Ok(signature)
    }

    /// Consumes the request identified by `signer_r` and returns the blind
    /// signature part `s'` as 32 big-endian bytes.
    pub fn sign_blind(
        &self,
        signer_r: &AffinePoint,
        blinded_message: &[u8],
        process_id: &[u8],
    ) -> Result<[u8; 32]> {
        let salt = salt_from_process_id(process_id)?;
        let secret = self.take_or_warn(&point_coordinates_hex(signer_r))?;
        let k = scalar_from_be_bytes(&secret)
            .ok_or_else(|| Error::Storage("stored nonce is corrupt".into()))?;
        let s_blind = self.key.sign_blind(&salt, blinded_message, &k)?;
        info!(process_id = %hex::encode(process_id), "Blind signature issued");
        Ok(scalar_to_be_bytes(&s_blind))
    }

    /// Same as [`SigningEngine::sign_blind`] with `R` in its wire encoding.
    pub fn sign_blind_with_token(
        &self,
        token: &[u8],
        blinded_message: &[u8],
        process_id: &[u8],
    ) -> Result<[u8; 32]> {
        // a token that is not a point can not have been issued
        let signer_r = point_from_bytes(token).map_err(|_| Error::UnknownToken)?;
        self.sign_blind(&signer_r, blinded_message, process_id)
    }

    /// Deterministic signature over `process_id` under its salted key; the
    /// same for every caller of one election.
    pub fn shared_key_signature(&self, process_id: &[u8]) -> Result<Vec<u8>> {
        let salt = salt_from_process_id(process_id)?;
        self.key.sign_plain(&salt, process_id)
    }

    /// Salted key for `process_id`, or the root key.
    pub fn pub_key_plain(&self, process_id: Option<&[u8]>) -> Result<AffinePoint> {
        match process_id {
            Some(pid) => self.key.derive_public_plain(&salt_from_process_id(pid)?),
            None => Ok(self.key.root_public()),
        }
    }

    pub fn pub_key_blind(&self, process_id: Option<&[u8]>) -> Result<AffinePoint> {
        match process_id {
            Some(pid) => self.key.derive_public_blind(&salt_from_process_id(pid)?),
            None => Ok(self.key.root_public()),
        }
    }

    fn take_or_warn(&self, token_id: &str) -> Result<Vec<u8>> {
        self.tokens.take(token_id).map_err(|e| {
            if let Error::UnknownToken = e {
                warn!("Signing attempted with an unknown or spent token");
            }
            e
        })
    }
}

fn draw_nonce() -> Result<(Scalar, AffinePoint)> {
    let k = random_scalar();
    if bool::from(k.is_zero()) {
        return Err(Error::InvalidNonce);
    }
    Ok((k, (ProjectivePoint::GENERATOR * k).to_affine()))
}
