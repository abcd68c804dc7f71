//! CAPDO CRD Definitions
//!
//! DigitalOcean infrastructure resources (`DOCluster`, `DOMachine`) plus the
//! subset of the Cluster API `Cluster` and `Machine` types the provider reads.

pub mod cluster;
pub mod conditions;
pub mod do_cluster;
pub mod do_machine;
pub mod labels;
pub mod machine;
pub mod provider_id;
pub mod references;

pub use cluster::*;
pub use conditions::{Condition, ConditionStatus};
pub use do_cluster::*;
pub use do_machine::*;
pub use labels::*;
pub use machine::*;
pub use references::*;
