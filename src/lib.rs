//! kdecl - Declarative resource management for Apache Kafka clusters
//!
//! Operators author YAML or JSON definitions describing desired state for
//! topics, broker configuration and ACLs; kdecl reconciles the live cluster
//! to match, and can export live state back into the same format.
//!
//! # Example
//!
//! ```yaml
//! apiVersion: v1
//! kind: topic
//! metadata:
//!   name: orders
//! spec:
//!   partitions: 6
//!   replicationFactor: 3
//!   configs:
//!     retention.ms: "604800000"
//!   deleteMissingConfigs: true
//! ```
//!
//! Applying a definition performs one plan/apply cycle:
//! validate, fetch remote state, build the minimal operation plan, diff,
//! execute, and await any resulting partition reassignments.

pub mod apply;
pub mod assignments;
pub mod config;
pub mod def;
pub mod diff;
pub mod docparse;
pub mod error;
pub mod export;
pub mod kafka;
pub mod meta;

pub use config::{AlterConfigsMethod, ClientConfig};
pub use error::{KdeclError, Result};
