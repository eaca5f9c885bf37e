//! Non-interactive proofs over Pedersen commitments.
//!
//! - **Existence**: Schnorr proof of knowledge of an opening `(v, r)` for a
//!   record commitment, made non-interactive with Fiat-Shamir and bound to the
//!   record id and a fresh nonce.
//! - **Range**: for a committed `u64` attribute, proves `v >= T` (or `v > T`)
//!   by committing to the 64 bits of `v - T` and giving a CDS OR-proof that
//!   each bit commitment opens to 0 or 1. The verifier checks the weighted bit
//!   commitments sum to `C - T·G`.
//!
//! Every proof draws fresh randomness, so transcripts from repeated queries
//! are independent and a verifier gains nothing by asking again.

use super::pedersen::{
    self, decode_point, decode_scalar, encode_point, encode_scalar, generator_h, hash_to_scalar,
    random_scalar, Commitment,
};
use super::ZkError;
use crate::crypto::aead;
use crate::types::RecordId;
use k256::elliptic_curve::Field;
use k256::{ProjectivePoint, Scalar};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const EXISTENCE_DOMAIN: &[u8] = b"mirrorshard-existence-v1";
const RANGE_DOMAIN: &[u8] = b"mirrorshard-range-v1";

/// Bits in a range proof (attributes are `u64`)
pub const RANGE_BITS: usize = 64;

fn update_len_prefixed(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

/// Proof that the prover knows the opening of a record commitment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistenceProof {
    pub record_id: RecordId,
    pub nonce: [u8; 16],
    pub announcement: Vec<u8>,
    pub response_value: Vec<u8>,
    pub response_blinder: Vec<u8>,
}

fn existence_challenge(
    record_id: &RecordId,
    nonce: &[u8; 16],
    commitment: &[u8],
    announcement: &[u8],
) -> Scalar {
    let mut hasher = Sha256::new();
    hasher.update(EXISTENCE_DOMAIN);
    update_len_prefixed(&mut hasher, record_id.as_str().as_bytes());
    hasher.update(nonce);
    update_len_prefixed(&mut hasher, commitment);
    update_len_prefixed(&mut hasher, announcement);
    hash_to_scalar(hasher)
}

/// Prove knowledge of `(value, blinder)` opening `commitment`.
pub fn prove_existence(
    record_id: &RecordId,
    commitment: &Commitment,
    value: &Scalar,
    blinder: &Scalar,
) -> Result<ExistenceProof, ZkError> {
    let nonce = aead::random_bytes::<16>().map_err(|_| ZkError::RandomFailed)?;
    let a = random_scalar();
    let b = random_scalar();
    let announcement = encode_point(&pedersen::commit(&a, &b));

    let c = existence_challenge(record_id, &nonce, commitment.as_bytes(), &announcement);

    Ok(ExistenceProof {
        record_id: record_id.clone(),
        nonce,
        announcement,
        response_value: encode_scalar(&(a + c * value)),
        response_blinder: encode_scalar(&(b + c * blinder)),
    })
}

/// Check an existence proof against a commitment.
///
/// Malformed proofs verify as `false`.
pub fn verify(proof: &ExistenceProof, commitment: &Commitment) -> bool {
    let check = || -> Result<bool, ZkError> {
        let point = commitment.point()?;
        let announcement = decode_point(&proof.announcement)?;
        let z_value = decode_scalar(&proof.response_value)?;
        let z_blinder = decode_scalar(&proof.response_blinder)?;

        let c = existence_challenge(
            &proof.record_id,
            &proof.nonce,
            commitment.as_bytes(),
            &proof.announcement,
        );
        Ok(pedersen::commit(&z_value, &z_blinder) == announcement + point * c)
    };
    check().unwrap_or(false)
}

/// Statement about a committed attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Predicate {
    /// value >= threshold
    AtLeast(u64),
    /// value > threshold
    Exceeds(u64),
}

impl Predicate {
    /// Smallest value satisfying the predicate, if any.
    fn floor(&self) -> Option<u64> {
        match *self {
            Predicate::AtLeast(t) => Some(t),
            Predicate::Exceeds(t) => t.checked_add(1),
        }
    }

    fn encode(&self) -> [u8; 9] {
        let (tag, t) = match *self {
            Predicate::AtLeast(t) => (0u8, t),
            Predicate::Exceeds(t) => (1u8, t),
        };
        let mut out = [0u8; 9];
        out[0] = tag;
        out[1..].copy_from_slice(&t.to_le_bytes());
        out
    }
}

/// OR-proof that a bit commitment opens to 0 or 1.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitProof {
    pub c0: Vec<u8>,
    pub c1: Vec<u8>,
    pub z0: Vec<u8>,
    pub z1: Vec<u8>,
}

/// Proof that a committed attribute satisfies a predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeProof {
    pub record_id: RecordId,
    pub attribute: String,
    pub predicate: Predicate,
    pub nonce: [u8; 16],
    pub bit_commitments: Vec<Vec<u8>>,
    pub bit_proofs: Vec<BitProof>,
}

struct RangeContext<'a> {
    record_id: &'a RecordId,
    attribute: &'a str,
    predicate: Predicate,
    nonce: &'a [u8; 16],
}

impl RangeContext<'_> {
    fn challenge(&self, bit: usize, commitment: &[u8], a0: &[u8], a1: &[u8]) -> Scalar {
        let mut hasher = Sha256::new();
        hasher.update(RANGE_DOMAIN);
        update_len_prefixed(&mut hasher, self.record_id.as_str().as_bytes());
        update_len_prefixed(&mut hasher, self.attribute.as_bytes());
        hasher.update(self.predicate.encode());
        hasher.update(self.nonce);
        hasher.update((bit as u32).to_le_bytes());
        update_len_prefixed(&mut hasher, commitment);
        update_len_prefixed(&mut hasher, a0);
        update_len_prefixed(&mut hasher, a1);
        hash_to_scalar(hasher)
    }
}

/// `2^i` as a scalar.
fn power_of_two(i: usize) -> Scalar {
    let mut acc = Scalar::ONE;
    for _ in 0..i {
        acc = acc.double();
    }
    acc
}

/// Prove that the attribute opening `(value, blinder)` satisfies `predicate`.
///
/// # Errors
///
/// - `PredicateUnsatisfied`: the committed value does not satisfy it
pub fn prove_attribute(
    record_id: &RecordId,
    attribute: &str,
    predicate: Predicate,
    value: u64,
    blinder: &Scalar,
) -> Result<RangeProof, ZkError> {
    let floor = predicate.floor().ok_or(ZkError::PredicateUnsatisfied)?;
    let delta = value
        .checked_sub(floor)
        .ok_or(ZkError::PredicateUnsatisfied)?;

    let nonce = aead::random_bytes::<16>().map_err(|_| ZkError::RandomFailed)?;
    let ctx = RangeContext {
        record_id,
        attribute,
        predicate,
        nonce: &nonce,
    };

    // Bit blinders must satisfy sum(2^i * r_i) == blinder; r_0 absorbs the rest
    let mut blinders = vec![Scalar::ZERO; RANGE_BITS];
    let mut weighted = Scalar::ZERO;
    for (i, r) in blinders.iter_mut().enumerate().skip(1) {
        *r = random_scalar();
        weighted += power_of_two(i) * *r;
    }
    blinders[0] = *blinder - weighted;

    let h = generator_h();
    let g = ProjectivePoint::GENERATOR;
    let mut bit_commitments = Vec::with_capacity(RANGE_BITS);
    let mut bit_proofs = Vec::with_capacity(RANGE_BITS);

    for (i, r) in blinders.iter().enumerate() {
        let bit = (delta >> i) & 1 == 1;
        let point = if bit { g + h * r } else { h * r };
        let encoded = encode_point(&point);

        // Statement j: point - j·G == x·H
        let statements = [point, point - g];
        let real = bit as usize;
        let fake = 1 - real;

        let w = random_scalar();
        let fake_c = random_scalar();
        let fake_z = random_scalar();

        let mut announcements = [ProjectivePoint::IDENTITY; 2];
        announcements[real] = h * w;
        announcements[fake] = h * fake_z - statements[fake] * fake_c;

        let a0 = encode_point(&announcements[0]);
        let a1 = encode_point(&announcements[1]);
        let c = ctx.challenge(i, &encoded, &a0, &a1);

        let real_c = c - fake_c;
        let real_z = w + real_c * r;

        let (c0, c1, z0, z1) = if real == 0 {
            (real_c, fake_c, real_z, fake_z)
        } else {
            (fake_c, real_c, fake_z, real_z)
        };

        bit_commitments.push(encoded);
        bit_proofs.push(BitProof {
            c0: encode_scalar(&c0),
            c1: encode_scalar(&c1),
            z0: encode_scalar(&z0),
            z1: encode_scalar(&z1),
        });
    }

    Ok(RangeProof {
        record_id: record_id.clone(),
        attribute: attribute.to_string(),
        predicate,
        nonce,
        bit_commitments,
        bit_proofs,
    })
}

/// Check a range proof against the attribute's commitment.
///
/// Malformed proofs verify as `false`.
pub fn verify_attribute(proof: &RangeProof, commitment: &Commitment) -> bool {
    let check = || -> Result<bool, ZkError> {
        if proof.bit_commitments.len() != RANGE_BITS || proof.bit_proofs.len() != RANGE_BITS {
            return Ok(false);
        }
        let Some(floor) = proof.predicate.floor() else {
            return Ok(false);
        };

        let ctx = RangeContext {
            record_id: &proof.record_id,
            attribute: &proof.attribute,
            predicate: proof.predicate,
            nonce: &proof.nonce,
        };
        let g = ProjectivePoint::GENERATOR;
        let h = generator_h();
        let mut sum = ProjectivePoint::IDENTITY;

        for (i, (encoded, bit_proof)) in proof
            .bit_commitments
            .iter()
            .zip(proof.bit_proofs.iter())
            .enumerate()
        {
            let point = decode_point(encoded)?;
            let c0 = decode_scalar(&bit_proof.c0)?;
            let c1 = decode_scalar(&bit_proof.c1)?;
            let z0 = decode_scalar(&bit_proof.z0)?;
            let z1 = decode_scalar(&bit_proof.z1)?;

            let a0 = h * z0 - point * c0;
            let a1 = h * z1 - (point - g) * c1;
            let c = ctx.challenge(i, encoded, &encode_point(&a0), &encode_point(&a1));
            if c0 + c1 != c {
                return Ok(false);
            }
            sum += point * power_of_two(i);
        }

        let target = commitment.point()? - g * Scalar::from(floor);
        Ok(sum == target)
    };
    check().unwrap_or(false)
}
