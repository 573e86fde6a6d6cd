//! oam-runtime - Kubernetes operator for Open Application Model workloads
//!
//! Reconciles two OAM resources into plain Kubernetes objects:
//! - a ContainerizedWorkload becomes a Deployment and, when any container
//!   exposes a port, a Service
//! - a ManualScalerTrait pins the replica count of every scalable child of
//!   the workload it references
//!
//! An admission webhook validates and defaults ManualScalerTraits before
//! they are persisted.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (ContainerizedWorkload, ManualScalerTrait, WorkloadDefinition)
//! - [`controller`] - Workload and trait reconciliation logic
//! - [`workload`] - Renders a workload into its Deployment and Service
//! - [`apply`] - Server-side apply of rendered objects
//! - [`gc`] - Deletes children a workload no longer renders
//! - [`ownership`] - The per-workload record of owned resources
//! - [`store`] - Storage abstraction over the Kubernetes API, with an in-memory implementation
//! - [`registry`] - Kinds the runtime knows how to address, track and scale
//! - [`object`] - Owner-reference view over typed and dynamic objects
//! - [`webhook`] - Admission webhook for ManualScalerTrait
//! - [`events`] - Kubernetes Event publishing
//! - [`config`] - Reconcile configuration
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod apply;
pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod gc;
pub mod object;
pub mod ownership;
pub mod registry;
pub mod store;
pub mod webhook;
pub mod workload;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default delay in seconds before a failed pass is retried
pub const DEFAULT_RECONCILE_WAIT_SECS: u64 = 30;

/// Default field manager for merge patches, status writes and CRD installs
pub const DEFAULT_FIELD_MANAGER: &str = "oam-runtime";

/// Default port for the admission webhook
pub const DEFAULT_WEBHOOK_PORT: u16 = 9443;
