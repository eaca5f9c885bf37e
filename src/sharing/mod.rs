//! Secret-Sharing Engine.
//!
//! Pure algorithm, no I/O: split a value into n shares with threshold k and
//! rebuild it from any k of them. Fewer than k shares are information-
//! theoretically independent of the value.

pub mod field;
pub mod shamir;

#[cfg(test)]
mod proptests;

pub use shamir::{
    reconstruct, split, validate_parameters, Share, SharingError, MAX_SECRET_LEN, MAX_SHARES,
};
