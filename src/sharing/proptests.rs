//! Property-based tests for the secret-sharing engine
//!
//! Tests for:
//! - Round trip: any k-subset of split(P, n, k) reconstructs P for 2 <= k <= n <= 20
//! - Determinism: every valid subset yields the bit-identical payload
//! - Threshold: k-1 shares never reconstruct

use super::shamir::{reconstruct, split, Share, SharingError};
use proptest::prelude::*;

/// (n, k, a shuffled k-subset of share positions)
fn threshold_parameters() -> impl Strategy<Value = (usize, usize, Vec<usize>)> {
    (2usize..=20).prop_flat_map(|n| {
        (2usize..=n).prop_flat_map(move |k| {
            (
                Just(n),
                Just(k),
                prop::sample::subsequence((0..n).collect::<Vec<_>>(), k).prop_shuffle(),
            )
        })
    })
}

fn pick(shares: &[Share], positions: &[usize]) -> Vec<Share> {
    positions.iter().map(|&i| shares[i].clone()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: any k-subset reconstructs the payload
    #[test]
    fn roundtrip_any_k_subset(
        payload in prop::collection::vec(any::<u8>(), 0..512),
        (n, k, positions) in threshold_parameters(),
    ) {
        let shares = split(&payload, n, k).unwrap();
        prop_assert_eq!(shares.len(), n);

        let recovered = reconstruct(&pick(&shares, &positions), k).unwrap();
        prop_assert_eq!(recovered, payload);
    }

    /// Property: two different subsets produce bit-identical output
    #[test]
    fn reconstruction_is_subset_independent(
        payload in prop::collection::vec(any::<u8>(), 1..256),
        (n, k, first) in threshold_parameters(),
        rotate in 0usize..20,
    ) {
        let shares = split(&payload, n, k).unwrap();

        let mut all: Vec<usize> = (0..n).collect();
        all.rotate_left(rotate % n);
        let second: Vec<usize> = all.into_iter().take(k).collect();

        let a = reconstruct(&pick(&shares, &first), k).unwrap();
        let b = reconstruct(&pick(&shares, &second), k).unwrap();
        prop_assert_eq!(a, b);
    }

    /// Property: the full share set (redundant shares included) reconstructs
    #[test]
    fn full_share_set_is_consistent(
        payload in prop::collection::vec(any::<u8>(), 0..128),
        (n, k, _positions) in threshold_parameters(),
    ) {
        let shares = split(&payload, n, k).unwrap();
        prop_assert_eq!(reconstruct(&shares, k).unwrap(), payload);
    }

    /// Property: k-1 shares are rejected as insufficient
    #[test]
    fn below_threshold_is_insufficient(
        payload in prop::collection::vec(any::<u8>(), 1..128),
        (n, k, positions) in threshold_parameters(),
    ) {
        let shares = split(&payload, n, k).unwrap();
        let partial = pick(&shares, &positions[..k - 1]);

        let result = reconstruct(&partial, k);
        let is_insufficient = matches!(result, Err(SharingError::InsufficientShares { .. }));
        prop_assert!(is_insufficient);
    }
}
