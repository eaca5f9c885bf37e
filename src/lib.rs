//! mirrorshard - threshold fragmentation and distributed reconstruction
//!
//! Splits sensitive records into encrypted fragments spread over independent
//! mirror nodes, so that no node (and no coalition below the threshold) learns
//! anything about a record, while any k healthy holders can rebuild it.
//!
//! Key principles:
//! - Shares never touch disk unencrypted; fragment keys live only sealed in
//!   the manifest
//! - All-or-nothing placement: a record is fully protected or not at all
//! - Fail closed: tampered fragments are discarded, never repaired by guessing
//! - Existence and attribute proofs without fetching a single fragment

pub mod breach;
pub mod config;
pub mod crypto;
pub mod distribution;
pub mod error;
pub mod fragment;
pub mod manifest;
pub mod node;
pub mod reconstruction;
pub mod serialization;
pub mod service;
pub mod sharing;
pub mod types;
pub mod zk;

pub use error::{ErrorClass, ProtectionError};
pub use service::{
    DeletionReceipt, GuardSettings, MirrorGuard, ProtectOptions, RequesterAuth, SweepReport,
};
pub use types::{NodeId, RecordId};
