//! Prime field helpers for the secret-sharing engine.
//!
//! The engine works over the 128-bit STARK field from `winter-math`
//! (p = 2^128 - 45 * 2^40 + 1). Secrets are packed 15 bytes per element so
//! an encoded element is always below 2^120 and therefore below p.

use rand::RngCore;
use winter_math::{fields::f128::BaseElement, FieldElement, StarkField};

/// Bytes packed into a single field element (120 bits < p).
pub const BYTES_PER_ELEMENT: usize = 15;

/// Upper bound (exclusive) for an element that decodes back to bytes.
const ENCODED_LIMIT: u128 = 1u128 << (BYTES_PER_ELEMENT * 8);

/// Field modulus.
pub const MODULUS: u128 = BaseElement::MODULUS;

/// Draw a uniformly random field element by rejection sampling.
pub fn random_element<R: RngCore>(rng: &mut R) -> BaseElement {
    loop {
        let mut bytes = [0u8; 16];
        rng.fill_bytes(&mut bytes);
        let candidate = u128::from_le_bytes(bytes);
        if candidate < MODULUS {
            return BaseElement::new(candidate);
        }
    }
}

/// Pack bytes into field elements, zero-padding the final element.
pub fn bytes_to_elements(bytes: &[u8]) -> Vec<BaseElement> {
    bytes
        .chunks(BYTES_PER_ELEMENT)
        .map(|chunk| {
            let mut word = [0u8; 16];
            word[..chunk.len()].copy_from_slice(chunk);
            BaseElement::new(u128::from_le_bytes(word))
        })
        .collect()
}

/// Unpack field elements into bytes.
///
/// Returns `None` if any element is outside the packed range, which can only
/// happen when the interpolated values did not come from a real secret.
pub fn elements_to_bytes(elements: &[BaseElement]) -> Option<Vec<u8>> {
    let mut bytes = Vec::with_capacity(elements.len() * BYTES_PER_ELEMENT);
    for element in elements {
        let value = element.as_int();
        if value >= ENCODED_LIMIT {
            return None;
        }
        bytes.extend_from_slice(&value.to_le_bytes()[..BYTES_PER_ELEMENT]);
    }
    Some(bytes)
}

/// Evaluate a polynomial (lowest coefficient first) at `x` using Horner's rule.
pub fn evaluate(coefficients: &[BaseElement], x: BaseElement) -> BaseElement {
    coefficients
        .iter()
        .rev()
        .fold(BaseElement::ZERO, |acc, &coefficient| acc * x + coefficient)
}

/// Lagrange basis weights for the points `xs`, evaluated at `at`.
///
/// `xs` must be distinct; callers validate this before interpolating.
pub fn lagrange_weights(xs: &[BaseElement], at: BaseElement) -> Vec<BaseElement> {
    xs.iter()
        .enumerate()
        .map(|(i, &xi)| {
            let mut numerator = BaseElement::ONE;
            let mut denominator = BaseElement::ONE;
            for (j, &xj) in xs.iter().enumerate() {
                if i != j {
                    numerator *= at - xj;
                    denominator *= xi - xj;
                }
            }
            numerator * denominator.inv()
        })
        .collect()
}
