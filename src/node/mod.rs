//! Mirror nodes and the health monitor that watches them.

pub mod health;
pub mod memory;
pub mod traits;

pub use health::{
    HealthMonitor, HealthPolicy, NodeStatus, NodeStatusReport, ScalingAction, ScalingAdvice,
};
pub use memory::MemoryNode;
pub use traits::{with_deadline, MirrorNode, NodeDescriptor, NodeError, NodeHealthReport, ReportedStatus};
