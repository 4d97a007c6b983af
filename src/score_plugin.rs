//! Placement-time scoring interface.

use crate::errors::ScoreError;
use crate::resources::{NodeResource, Pod};

/// Highest possible placement score of a node.
pub const MAX_NODE_SCORE: i64 = 100;
/// Lowest possible placement score of a node.
pub const MIN_NODE_SCORE: i64 = 0;

/// Result of scoring one node for one pod.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeScore {
    /// Normalized score in `[MIN_NODE_SCORE, MAX_NODE_SCORE]`; higher is
    /// more preferable.
    pub score: i64,
    /// Concrete GPU slot(s) the pod should use on this node, when any
    /// allocation is possible. Slot indices joined with `,`.
    pub gpu_id: Option<String>,
}

pub trait ScorePlugin {
    fn name(&self) -> &str;

    /// Scores the placement of `pod` on the node with remaining capacity
    /// `node_res`. Nodes that cannot satisfy the pod's GPU-type constraint
    /// must be pre-filtered by the caller; scoring them is an error, not a
    /// low score.
    fn score(&self, node_res: &NodeResource, pod: &Pod) -> Result<NodeScore, ScoreError>;
}
