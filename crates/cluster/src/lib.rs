//! Cluster coordination for VersaDB
//!
//! Processes sharing one durable store coordinate through a
//! [`ClusterCoordinator`]:
//! - server id allocation (the first process gets 0 and bootstraps)
//! - a startup barrier released by server 0
//! - the cluster-wide commit lock
//! - commit broadcast for push replication
//!
//! [`LocalCluster`] implements the trait in-process for engines that share
//! an `Arc` of it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod coordinator;
pub mod local;

pub use coordinator::{ClusterCoordinator, MessageHandler, SubscriptionId};
pub use local::LocalCluster;
