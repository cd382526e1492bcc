//! Requester side of the blind scheme.
//!
//! The signer hands out an ephemeral point `R = k·G`. The requester blinds
//! its message against `R`, the signer answers with `s' = d·m' + k`, and the
//! requester unblinds that into a signature `(s, F)` the signer can not link
//! back to the request it served.

use crate::error::{Error, Result};
use crate::utils::*;
use k256::{AffinePoint, ProjectivePoint, Scalar};
use std::convert::TryFrom;

/// Represents a paper Slip that will
/// be stuffed inside an Envelope.
pub type Slip = Vec<u8>;

/// Encoded length of a [`BlindSignature`]: `s` then compressed `F`.
pub const BLIND_SIGNATURE_LEN: usize = 65;

/// Blinding factors held by the party that creates the Slip.
#[derive(Clone, Debug)]
pub struct SlipPreparer {
    a: Scalar,
    b: Scalar,
    f: AffinePoint,
}

impl SlipPreparer {
    /// Draws fresh blinding factors against the signer's `R` point.
    pub fn new(signer_r: &AffinePoint) -> Result<Self> {
        // retry in the negligible case F lands on the identity
        loop {
            let a = random_nonzero_scalar();
            let b = random_nonzero_scalar();
            match Self::with_factors(signer_r, a, b) {
                Err(Error::InvalidNonce) => continue,
                other => return other,
            }
        }
    }

    /// `F = b⁻¹·R + a·G`.
    pub fn with_factors(signer_r: &AffinePoint, a: Scalar, b: Scalar) -> Result<Self> {
        let b_inv: Option<Scalar> = b.invert().into();
        let b_inv = b_inv.ok_or_else(|| Error::SignFailure("b is not invertible".into()))?;
        let f = ProjectivePoint::from(*signer_r) * b_inv + ProjectivePoint::GENERATOR * a;
        if is_identity(&f) {
            return Err(Error::InvalidNonce);
        }
        Ok(Self {
            a,
            b,
            f: f.to_affine(),
        })
    }

    /// The `F` point that ends up in the final signature.
    pub fn f(&self) -> AffinePoint {
        self.f
    }

    /// `m' = b·r·m` where `m = H(slip)` and `r = F.x mod n`.
    #[allow(clippy::ptr_arg)]
    pub fn place_slip_in_envelope(&self, slip: &Slip) -> Envelope {
        self.place_hash_in_envelope(hash_to_scalar(slip))
    }

    pub fn place_hash_in_envelope(&self, m: Scalar) -> Envelope {
        let r = x_mod_n(&self.f);
        Envelope::from(self.b * r * m)
    }

    /// `s = b⁻¹·s' + a`.
    pub fn signature_for_slip(&self, blind_part: &Scalar) -> Result<BlindSignature> {
        let b_inv: Option<Scalar> = self.b.invert().into();
        let b_inv = b_inv.ok_or_else(|| Error::SignFailure("b is not invertible".into()))?;
        Ok(BlindSignature {
            s: b_inv * blind_part + self.a,
            f: self.f,
        })
    }

    /// Unblinds the signer's answer in its wire form (32 big-endian bytes).
    pub fn signature_for_signed_envelope(&self, blind_part: &[u8]) -> Result<BlindSignature> {
        let s_blind = scalar_from_be_bytes(blind_part)
            .ok_or_else(|| Error::InvalidRequest("blind signature not inside the field".into()))?;
        self.signature_for_slip(&s_blind)
    }

    #[allow(clippy::ptr_arg)]
    pub fn verify_slip_signature(
        &self,
        slip: &Slip,
        sig: &BlindSignature,
        pk: &AffinePoint,
    ) -> Result<()> {
        if sig.verify(slip, pk) {
            Ok(())
        } else {
            Err(Error::SignFailure("signature does not verify".into()))
        }
    }
}

/// An Envelope holds the blinded hash of a Slip
/// without revealing the Slip's contents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Envelope {
    blinded_msg: Scalar,
}

impl Envelope {
    pub fn blinded_msg(&self) -> Scalar {
        self.blinded_msg
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        scalar_to_be_bytes(&self.blinded_msg)
    }
}

impl From<Scalar> for Envelope {
    fn from(blinded_msg: Scalar) -> Self {
        Self { blinded_msg }
    }
}

impl TryFrom<&[u8]> for Envelope {
    type Error = Error;

    fn try_from(b: &[u8]) -> Result<Self> {
        let bytes: [u8; 32] = b.try_into()?;
        scalar_from_be_bytes(&bytes)
            .map(Self::from)
            .ok_or_else(|| Error::InvalidRequest("blinded message not inside the field".into()))
    }
}

/// An unblinded signature: verifies under the signer's (salted) public key
/// against the original Slip.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlindSignature {
    s: Scalar,
    f: AffinePoint,
}

impl BlindSignature {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = scalar_to_be_bytes(&self.s).to_vec();
        out.extend_from_slice(&point_to_bytes(&self.f));
        out
    }

    pub fn from_bytes(b: &[u8]) -> Result<Self> {
        if b.len() != BLIND_SIGNATURE_LEN {
            return Err(Error::InvalidRequest(format!(
                "blind signature must be {} bytes, got {}",
                BLIND_SIGNATURE_LEN,
                b.len()
            )));
        }
        let s = scalar_from_be_bytes(&b[..32])
            .ok_or_else(|| Error::InvalidRequest("s not inside the field".into()))?;
        let f = point_from_bytes(&b[32..])?;
        Ok(Self { s, f })
    }

    pub fn verify(&self, msg: &[u8], pk: &AffinePoint) -> bool {
        self.verify_hash(&hash_to_scalar(msg), pk)
    }

    /// `s·G == F + (r·m)·Q`.
    pub fn verify_hash(&self, m: &Scalar, pk: &AffinePoint) -> bool {
        let r = x_mod_n(&self.f);
        let left = ProjectivePoint::GENERATOR * self.s;
        let right = ProjectivePoint::from(self.f) + ProjectivePoint::from(*pk) * (r * m);
        left == right
    }
}
