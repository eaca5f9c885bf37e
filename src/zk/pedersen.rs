//! Pedersen commitments over secp256k1.
//!
//! `C = v·G + r·H` where `H` is derived by hashing to the curve, so nobody
//! knows `log_G(H)`. Hiding is perfect (for uniform `r`), binding rests on the
//! discrete log assumption.

use super::ZkError;
use k256::elliptic_curve::ops::Reduce;
use k256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use k256::elliptic_curve::{Field, PrimeField};
use k256::{AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar, U256};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::OnceLock;

/// Domain tag for deriving the second generator
const H_DOMAIN: &[u8] = b"mirrorshard-pedersen-h-v1";

static H: OnceLock<ProjectivePoint> = OnceLock::new();

/// Second generator `H`, derived by try-and-increment on SHA-256.
pub fn generator_h() -> ProjectivePoint {
    *H.get_or_init(|| {
        let mut counter: u32 = 0;
        loop {
            let mut hasher = Sha256::new();
            hasher.update(H_DOMAIN);
            hasher.update(counter.to_le_bytes());
            let x = hasher.finalize();

            let mut compressed = [0u8; 33];
            compressed[0] = 0x02;
            compressed[1..].copy_from_slice(&x);

            if let Some(point) = decode_affine(&compressed) {
                return ProjectivePoint::from(point);
            }
            counter += 1;
        }
    })
}

fn decode_affine(bytes: &[u8]) -> Option<AffinePoint> {
    let encoded = EncodedPoint::from_bytes(bytes).ok()?;
    AffinePoint::from_encoded_point(&encoded).into()
}

/// SEC1-compressed encoding of a point.
pub fn encode_point(point: &ProjectivePoint) -> Vec<u8> {
    point.to_affine().to_encoded_point(true).as_bytes().to_vec()
}

/// Decode a SEC1 point.
pub fn decode_point(bytes: &[u8]) -> Result<ProjectivePoint, ZkError> {
    decode_affine(bytes)
        .map(ProjectivePoint::from)
        .ok_or_else(|| ZkError::InvalidEncoding("not a curve point".to_string()))
}

/// Big-endian scalar encoding.
pub fn encode_scalar(scalar: &Scalar) -> Vec<u8> {
    scalar.to_bytes().to_vec()
}

/// Decode a canonical big-endian scalar.
pub fn decode_scalar(bytes: &[u8]) -> Result<Scalar, ZkError> {
    if bytes.len() != 32 {
        return Err(ZkError::InvalidEncoding(format!(
            "scalar must be 32 bytes, got {}",
            bytes.len()
        )));
    }
    let repr = FieldBytes::clone_from_slice(bytes);
    Option::<Scalar>::from(Scalar::from_repr(repr))
        .ok_or_else(|| ZkError::InvalidEncoding("scalar out of range".to_string()))
}

/// Map a SHA-256 digest onto a scalar.
pub fn hash_to_scalar(hasher: Sha256) -> Scalar {
    <Scalar as Reduce<U256>>::reduce_bytes(&hasher.finalize())
}

/// Uniformly random scalar from the OS RNG.
pub fn random_scalar() -> Scalar {
    Scalar::random(&mut rand::rngs::OsRng)
}

/// A Pedersen commitment, stored as a compressed point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Commitment(pub Vec<u8>);

impl Commitment {
    pub fn point(&self) -> Result<ProjectivePoint, ZkError> {
        decode_point(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

/// Commit to `value` under `blinder`.
pub fn commit(value: &Scalar, blinder: &Scalar) -> ProjectivePoint {
    ProjectivePoint::GENERATOR * value + generator_h() * blinder
}

/// Commit and encode.
pub fn commitment(value: &Scalar, blinder: &Scalar) -> Commitment {
    Commitment(encode_point(&commit(value, blinder)))
}
