//! Shamir k-of-n splitting and reconstruction.
//!
//! ## Encoding
//!
//! ```text
//! secret = len (u32 LE) || payload || SHA-256(payload)
//!            │
//!            ▼ pack 15 bytes per element
//! [e_0, e_1, ..., e_m]
//!            │
//!            ▼ one random degree-(k-1) polynomial per element, f_j(0) = e_j
//! share_x = [f_0(x), f_1(x), ..., f_m(x)]   for x = 1..=n
//! ```
//!
//! ## Integrity
//!
//! - Shares beyond the first k must lie on the same polynomials.
//! - The length prefix and the embedded SHA-256 must match after
//!   interpolation, so a wrong-but-well-formed share set is rejected
//!   instead of producing a guessed payload.

use super::field::{
    bytes_to_elements, elements_to_bytes, evaluate, lagrange_weights, random_element,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use winter_math::{fields::f128::BaseElement, FieldElement, StarkField};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Maximum number of shares per split (share indices are `u8`, 0 is reserved).
pub const MAX_SHARES: usize = 255;

/// Largest payload the engine accepts.
pub const MAX_SECRET_LEN: usize = 16 * 1024 * 1024;

const LENGTH_PREFIX: usize = 4;
const CHECKSUM_LEN: usize = 32;

/// Errors produced by the secret-sharing engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SharingError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Insufficient shares: need {needed}, got {actual}")]
    InsufficientShares { needed: usize, actual: usize },

    #[error("Inconsistent shares: {0}")]
    InconsistentShares(String),
}

/// One evaluation point of the sharing polynomials.
///
/// `values[j]` is the evaluation of the j-th element polynomial at `index`.
/// Shares only exist in memory between split/encrypt and decrypt/reconstruct.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    /// Evaluation point x (1..=255)
    pub index: u8,

    /// Field elements, one per packed secret element
    pub values: Vec<u128>,
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Share")
            .field("index", &self.index)
            .field("width", &self.values.len())
            .finish_non_exhaustive()
    }
}

/// Validate a (n, k) pair.
pub fn validate_parameters(n: usize, k: usize) -> Result<(), SharingError> {
    if k < 1 {
        return Err(SharingError::InvalidParameters(
            "threshold k must be at least 1".to_string(),
        ));
    }
    if k > n {
        return Err(SharingError::InvalidParameters(format!(
            "threshold k={} exceeds share count n={}",
            k, n
        )));
    }
    if n > MAX_SHARES {
        return Err(SharingError::InvalidParameters(format!(
            "share count n={} exceeds maximum {}",
            n, MAX_SHARES
        )));
    }
    Ok(())
}

/// Split `secret` into `n` shares, any `k` of which reconstruct it.
///
/// # Errors
///
/// - `InvalidParameters`: `k < 1`, `k > n`, `n > 255`, or the secret is
///   larger than [`MAX_SECRET_LEN`]
pub fn split(secret: &[u8], n: usize, k: usize) -> Result<Vec<Share>, SharingError> {
    validate_parameters(n, k)?;
    if secret.len() > MAX_SECRET_LEN {
        return Err(SharingError::InvalidParameters(format!(
            "secret of {} bytes exceeds maximum {}",
            secret.len(),
            MAX_SECRET_LEN
        )));
    }

    let mut encoded = encode_secret(secret);
    let mut elements = bytes_to_elements(&encoded);
    encoded.zeroize();

    let mut rng = OsRng;
    let mut shares: Vec<Share> = (1..=n)
        .map(|x| Share {
            index: x as u8,
            values: Vec::with_capacity(elements.len()),
        })
        .collect();
    let xs: Vec<BaseElement> = shares
        .iter()
        .map(|share| BaseElement::new(share.index as u128))
        .collect();

    let mut coefficients = vec![BaseElement::ZERO; k];
    for element in &elements {
        coefficients[0] = *element;
        for coefficient in coefficients.iter_mut().skip(1) {
            *coefficient = random_element(&mut rng);
        }
        for (share, &x) in shares.iter_mut().zip(xs.iter()) {
            share.values.push(evaluate(&coefficients, x).as_int());
        }
    }

    coefficients.fill(BaseElement::ZERO);
    elements.fill(BaseElement::ZERO);

    Ok(shares)
}

/// Reconstruct the secret from at least `k` shares.
///
/// Uses Lagrange interpolation at x = 0 over the first `k` shares, checks
/// that every extra share agrees, then verifies the embedded checksum.
///
/// # Errors
///
/// - `InsufficientShares`: fewer than `k` shares supplied
/// - `InvalidParameters`: `k == 0`, zero or duplicate indices, mismatched widths
/// - `InconsistentShares`: shares do not lie on common degree-(k-1)
///   polynomials, or the decoded payload fails its checksum
pub fn reconstruct(shares: &[Share], k: usize) -> Result<Vec<u8>, SharingError> {
    if k < 1 {
        return Err(SharingError::InvalidParameters(
            "threshold k must be at least 1".to_string(),
        ));
    }
    if shares.len() < k {
        return Err(SharingError::InsufficientShares {
            needed: k,
            actual: shares.len(),
        });
    }
    validate_share_set(shares)?;

    let (basis, extra) = shares.split_at(k);
    let xs: Vec<BaseElement> = basis
        .iter()
        .map(|share| BaseElement::new(share.index as u128))
        .collect();
    let width = basis[0].values.len();

    // Redundant shares must sit on the interpolated polynomials.
    for witness in extra {
        let weights = lagrange_weights(&xs, BaseElement::new(witness.index as u128));
        for j in 0..width {
            let expected = interpolate_column(basis, &weights, j);
            if expected != BaseElement::new(witness.values[j]) {
                return Err(SharingError::InconsistentShares(format!(
                    "share {} disagrees with the first {} shares",
                    witness.index, k
                )));
            }
        }
    }

    let weights = lagrange_weights(&xs, BaseElement::ZERO);
    let mut elements: Vec<BaseElement> = (0..width)
        .map(|j| interpolate_column(basis, &weights, j))
        .collect();

    let decoded = elements_to_bytes(&elements);
    elements.fill(BaseElement::ZERO);
    let mut encoded = decoded.ok_or_else(|| {
        SharingError::InconsistentShares("interpolated value outside encoding range".to_string())
    })?;

    let result = decode_secret(&encoded);
    encoded.zeroize();
    result
}

fn interpolate_column(basis: &[Share], weights: &[BaseElement], column: usize) -> BaseElement {
    basis
        .iter()
        .zip(weights.iter())
        .fold(BaseElement::ZERO, |acc, (share, &weight)| {
            acc + weight * BaseElement::new(share.values[column])
        })
}

fn validate_share_set(shares: &[Share]) -> Result<(), SharingError> {
    let width = shares[0].values.len();
    if width == 0 {
        return Err(SharingError::InvalidParameters(
            "share carries no values".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(shares.len());
    for share in shares {
        if share.index == 0 {
            return Err(SharingError::InvalidParameters(
                "share index 0 is reserved for the secret".to_string(),
            ));
        }
        if !seen.insert(share.index) {
            return Err(SharingError::InvalidParameters(format!(
                "duplicate share index {}",
                share.index
            )));
        }
        if share.values.len() != width {
            return Err(SharingError::InvalidParameters(format!(
                "share {} has width {}, expected {}",
                share.index,
                share.values.len(),
                width
            )));
        }
    }
    Ok(())
}

fn encode_secret(secret: &[u8]) -> Vec<u8> {
    let mut encoded = Vec::with_capacity(LENGTH_PREFIX + secret.len() + CHECKSUM_LEN);
    encoded.extend_from_slice(&(secret.len() as u32).to_le_bytes());
    encoded.extend_from_slice(secret);
    encoded.extend_from_slice(&Sha256::digest(secret));
    encoded
}

fn decode_secret(encoded: &[u8]) -> Result<Vec<u8>, SharingError> {
    let inconsistent = |reason: &str| SharingError::InconsistentShares(reason.to_string());

    if encoded.len() < LENGTH_PREFIX + CHECKSUM_LEN {
        return Err(inconsistent("encoded secret too short"));
    }
    let mut prefix = [0u8; LENGTH_PREFIX];
    prefix.copy_from_slice(&encoded[..LENGTH_PREFIX]);
    let len = u32::from_le_bytes(prefix) as usize;

    let body_end = LENGTH_PREFIX
        .checked_add(len)
        .filter(|end| end + CHECKSUM_LEN <= encoded.len())
        .ok_or_else(|| inconsistent("length prefix out of range"))?;
    let checksum_end = body_end + CHECKSUM_LEN;

    if encoded[checksum_end..].iter().any(|&b| b != 0) {
        return Err(inconsistent("non-zero padding"));
    }

    let payload = &encoded[LENGTH_PREFIX..body_end];
    let digest = Sha256::digest(payload);
    if digest.as_slice() != &encoded[body_end..checksum_end] {
        return Err(inconsistent("checksum mismatch"));
    }

    Ok(payload.to_vec())
}
