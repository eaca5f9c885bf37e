//! Fragment placement and fan-out.

pub mod rendezvous;
pub mod router;

pub use router::{select_nodes, without, DistributionError, Distributor, Placement};
