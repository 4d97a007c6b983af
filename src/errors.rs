//! Error types of the descheduling core.
//!
//! None of these is fatal to a simulation run: a `ConfigError` leaves the
//! cluster untouched, a `DeletionError` skips the victim, and a `ScoreError`
//! just makes the node non-competitive for the pod.

use thiserror::Error;

/// Configuration problems detected before any eviction happens.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("unknown deschedule policy: {0}")]
    UnknownPolicy(String),
}

/// A chosen victim could not be removed from the simulated cluster,
/// e.g. because it is already gone.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("failed to delete pod {pod_key}: {reason}")]
pub struct DeletionError {
    pub pod_key: String,
    pub reason: String,
}

/// Placement scoring refused the node for this pod.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScoreError {
    /// GPU type/accessibility mismatch; the caller should have pre-filtered
    /// this node out.
    #[error("node {node_name} ({node_gpu_type}) does not match GPU type request {requested_gpu_type}")]
    IneligibleNode {
        node_name: String,
        node_gpu_type: String,
        requested_gpu_type: String,
    },
}

/// A hypothetical allocation did not fit the node's remaining capacity.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("node {node_name} cannot hold request {requested}")]
pub struct ResourceError {
    pub node_name: String,
    pub requested: String,
}

impl ResourceError {
    pub fn insufficient(node_name: String, requested: String) -> Self {
        Self { node_name, requested }
    }
}
