use crate::error::{Error, Result};
use k256::elliptic_curve::group::Group;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::point::AffineCoordinates;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, U256};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Length in bytes of the per-election salt taken from a processID.
pub const SALT_LEN: usize = 20;

/// Decodes a hex string, tolerating a leading `0x`.
pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    Ok(hex::decode(s)?)
}

// Big-endian, left padded. Values not below the group order are rejected
// instead of being reduced.
pub(crate) fn scalar_from_be_bytes(bytes: &[u8]) -> Option<Scalar> {
    if bytes.len() > 32 {
        return None;
    }
    let mut repr = FieldBytes::default();
    repr[32 - bytes.len()..].copy_from_slice(bytes);
    Option::from(Scalar::from_repr(repr))
}

pub(crate) fn scalar_to_be_bytes(s: &Scalar) -> [u8; 32] {
    s.to_bytes().into()
}

/// First [`SALT_LEN`] bytes of a processID.
pub(crate) fn salt_from_process_id(process_id: &[u8]) -> Result<[u8; SALT_LEN]> {
    if process_id.len() < SALT_LEN {
        return Err(Error::InvalidKeyFormat(format!(
            "processID must be at least {} bytes, got {}",
            SALT_LEN,
            process_id.len()
        )));
    }
    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&process_id[..SALT_LEN]);
    Ok(salt)
}

/// `SHA-256(msg) mod n`, the scalar form of a message for the blind scheme.
pub fn hash_to_scalar(msg: &[u8]) -> Scalar {
    let digest = Sha256::digest(msg);
    <Scalar as Reduce<U256>>::reduce_bytes(&digest)
}

// x-coordinate of a point reduced modulo the group order
pub(crate) fn x_mod_n(p: &AffinePoint) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&p.x())
}

pub(crate) fn random_scalar() -> Scalar {
    Scalar::random(&mut OsRng)
}

pub(crate) fn random_nonzero_scalar() -> Scalar {
    loop {
        let s = random_scalar();
        if !bool::from(s.is_zero()) {
            return s;
        }
    }
}

/// SEC1 compressed encoding.
pub fn point_to_bytes(p: &AffinePoint) -> Vec<u8> {
    p.to_encoded_point(true).as_bytes().to_vec()
}

/// Accepts SEC1 compressed or uncompressed encodings. The identity is rejected.
pub fn point_from_bytes(bytes: &[u8]) -> Result<AffinePoint> {
    let encoded = EncodedPoint::from_bytes(bytes)
        .map_err(|_| Error::InvalidRequest("malformed curve point".into()))?;
    let point: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();
    match point {
        Some(p) if !is_identity(&p.into()) => Ok(p),
        _ => Err(Error::InvalidRequest("point is not on the curve".into())),
    }
}

/// Hex of the affine coordinates `x ‖ y`.
pub(crate) fn point_coordinates_hex(p: &AffinePoint) -> String {
    let uncompressed = p.to_encoded_point(false);
    // skip the 0x04 tag
    hex::encode(&uncompressed.as_bytes()[1..])
}

pub(crate) fn is_identity(p: &ProjectivePoint) -> bool {
    bool::from(p.is_identity())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_prefix_is_optional() -> Result<()> {
        assert_eq!(decode_hex("0xabcd")?, vec![0xab, 0xcd]);
        assert_eq!(decode_hex("abcd")?, vec![0xab, 0xcd]);
        assert!(decode_hex("0xabc").is_err());
        Ok(())
    }

    #[test]
    fn scalar_rejects_order_and_above() {
        let order_bytes =
            hex::decode("fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141").unwrap();
        assert!(scalar_from_be_bytes(&order_bytes).is_none());
        assert!(scalar_from_be_bytes(&[0xff; 33]).is_none());
        assert_eq!(scalar_from_be_bytes(&[1]), Some(Scalar::ONE));
    }

    #[test]
    fn short_process_id_is_rejected() {
        assert!(matches!(
            salt_from_process_id(&[0u8; 19]),
            Err(Error::InvalidKeyFormat(_))
        ));
        assert_eq!(salt_from_process_id(&[7u8; 32]).unwrap(), [7u8; SALT_LEN]);
    }

    #[test]
    fn point_encoding_roundtrips_and_rejects_garbage() -> Result<()> {
        let p = (ProjectivePoint::GENERATOR * random_nonzero_scalar()).to_affine();
        assert_eq!(point_from_bytes(&point_to_bytes(&p))?, p);
        assert!(point_from_bytes(&[2u8; 10]).is_err());
        assert_eq!(point_coordinates_hex(&p).len(), 128);
        Ok(())
    }
}
