//! Election-scoped key derivation.
//!
//! A salted key is the root key shifted by the first [`SALT_LEN`] bytes of a
//! processID read as a big-endian integer: `d' = d + salt` and
//! `Q' = Q + salt·G`. Verifiers recompute `Q'` the same way, so the
//! arithmetic must stay additive.

use crate::error::{Error, Result};
use crate::utils::*;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::Field;
use k256::{AffinePoint, ProjectivePoint, Scalar};

/// Root key material: a secp256k1 scalar and its public point.
#[derive(Clone)]
pub struct SaltedKey {
    root: Scalar,
    root_public: AffinePoint,
}

impl SaltedKey {
    /// Parses the root key from exactly 64 hex characters (an optional `0x`
    /// prefix is not counted).
    pub fn from_hex(key_hex: &str) -> Result<Self> {
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);
        if key_hex.len() != 64 {
            return Err(Error::InvalidKeyFormat(format!(
                "root key must be 64 hex characters, got {}",
                key_hex.len()
            )));
        }
        let bytes = hex::decode(key_hex)
            .map_err(|e| Error::InvalidKeyFormat(format!("root key is not hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != 32 {
            return Err(Error::InvalidKeyFormat(format!(
                "root key must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let root = scalar_from_be_bytes(bytes)
            .ok_or_else(|| Error::InvalidKeyFormat("root key out of range".into()))?;
        if bool::from(root.is_zero()) {
            return Err(Error::InvalidKeyFormat("root key is zero".into()));
        }
        let root_public = (ProjectivePoint::GENERATOR * root).to_affine();
        Ok(Self { root, root_public })
    }

    pub fn root_public(&self) -> AffinePoint {
        self.root_public
    }

    /// `root + salt`.
    pub fn derive_private(&self, salt: &[u8; SALT_LEN]) -> Result<Scalar> {
        let offset = salt_scalar(salt)?;
        let salted = self.root + offset;
        if bool::from(salted.is_zero()) {
            return Err(Error::InvalidKeyFormat("salted key is zero".into()));
        }
        Ok(salted)
    }

    /// `rootPublic + salt·G`.
    pub fn derive_public_plain(&self, salt: &[u8; SALT_LEN]) -> Result<AffinePoint> {
        let offset = salt_scalar(salt)?;
        let salted = ProjectivePoint::from(self.root_public) + ProjectivePoint::GENERATOR * offset;
        if is_identity(&salted) {
            return Err(Error::InvalidKeyFormat("salted key is the identity".into()));
        }
        Ok(salted.to_affine())
    }

    /// Same point as [`SaltedKey::derive_public_plain`]; the blind scheme
    /// verifies against it directly.
    pub fn derive_public_blind(&self, salt: &[u8; SALT_LEN]) -> Result<AffinePoint> {
        self.derive_public_plain(salt)
    }

    /// Deterministic ECDSA over `SHA-256(message)` with the salted key.
    /// Output is `r ‖ s ‖ v`.
    pub fn sign_plain(&self, salt: &[u8; SALT_LEN], message: &[u8]) -> Result<Vec<u8>> {
        let d = self.derive_private(salt)?;
        let signing_key =
            SigningKey::from_bytes(&d.to_bytes()).map_err(|e| Error::SignFailure(e.to_string()))?;
        let (sig, recid) = signing_key
            .sign_recoverable(message)
            .map_err(|e| Error::SignFailure(e.to_string()))?;

        let mut out = sig.to_bytes().to_vec();
        out.push(recid.to_byte());
        Ok(out)
    }

    /// One blind signing step, `s' = d'·m' + k`. The nonce comes from the
    /// caller and must never be used twice.
    pub fn sign_blind(
        &self,
        salt: &[u8; SALT_LEN],
        blinded_message: &[u8],
        nonce_k: &Scalar,
    ) -> Result<Scalar> {
        let m_blinded = scalar_from_be_bytes(blinded_message)
            .ok_or_else(|| Error::SignFailure("blinded message not inside the field".into()))?;
        if bool::from(m_blinded.is_zero()) {
            return Err(Error::SignFailure("blinded message can not be zero".into()));
        }
        if bool::from(nonce_k.is_zero()) {
            return Err(Error::SignFailure("nonce can not be zero".into()));
        }
        let d = self.derive_private(salt)?;
        Ok(sign_scalar(m_blinded, d, *nonce_k))
    }
}

// always below the group order: 20 bytes
fn salt_scalar(salt: &[u8; SALT_LEN]) -> Result<Scalar> {
    scalar_from_be_bytes(salt).ok_or_else(|| Error::InvalidKeyFormat("salt out of range".into()))
}

// s' = d·m' + k
fn sign_scalar(m_blinded: Scalar, d: Scalar, k: Scalar) -> Scalar {
    d * m_blinded + k
}
