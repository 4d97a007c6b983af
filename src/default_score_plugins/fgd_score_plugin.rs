//! Fragmentation-gradient-descent (FGD) placement scoring.
//!
//! Scores a placement by the reduction in node fragmentation it causes: the
//! fragmentation-score delta of the hypothetical allocation is squashed with
//! a sigmoid and scaled into the normalized node-score range. Partial-GPU
//! requests additionally search for the GPU slot yielding the best delta.

use std::rc::Rc;

use crate::errors::ScoreError;
use crate::fragmentation::{node_gpu_share_frag_score, sigmoid, TargetPodList};
use crate::resources::{get_pod_resource, NodeResource, Pod, PodResource};
use crate::score_plugin::{NodeScore, ScorePlugin, MAX_NODE_SCORE, MIN_NODE_SCORE};

/// Strategy choosing the concrete GPU ids for whole-GPU and multi-GPU
/// exclusive requests. Injected at construction instead of registered in a
/// process-wide map.
pub type ExclusiveGpuAllocator = Box<dyn Fn(&NodeResource, &PodResource) -> Option<String>>;

pub struct FGDScorePlugin {
    typical_pods: Rc<TargetPodList>,
    exclusive_gpu_allocator: ExclusiveGpuAllocator,
}

impl FGDScorePlugin {
    pub fn new(typical_pods: Rc<TargetPodList>) -> Self {
        Self {
            typical_pods,
            exclusive_gpu_allocator: Box::new(allocate_exclusive_gpu_id),
        }
    }

    pub fn with_allocator(typical_pods: Rc<TargetPodList>, allocator: ExclusiveGpuAllocator) -> Self {
        Self { typical_pods, exclusive_gpu_allocator: allocator }
    }
}

impl ScorePlugin for FGDScorePlugin {
    fn name(&self) -> &str {
        "FGDScore"
    }

    fn score(&self, node_res: &NodeResource, pod: &Pod) -> Result<NodeScore, ScoreError> {
        let pod_res = get_pod_resource(pod);
        if pod_res.is_empty() {
            return Ok(NodeScore { score: MAX_NODE_SCORE, gpu_id: None });
        }
        if !is_node_accessible_to_pod(node_res, &pod_res) {
            return Err(ScoreError::IneligibleNode {
                node_name: node_res.node_name.clone(),
                node_gpu_type: node_res.gpu_type.clone(),
                requested_gpu_type: pod_res.gpu_type.clone(),
            });
        }
        let (score, gpu_id) = calculate_gpu_share_frag_extend_score(
            node_res,
            &pod_res,
            &self.typical_pods,
            &self.exclusive_gpu_allocator,
        );
        Ok(NodeScore { score, gpu_id })
    }
}

/// True when the node can serve the pod's GPU-type constraint. An untyped
/// request runs anywhere; a typed request needs the matching node tag.
pub fn is_node_accessible_to_pod(node_res: &NodeResource, pod_res: &PodResource) -> bool {
    pod_res.gpu_type.is_empty() || pod_res.gpu_type == node_res.gpu_type
}

/// Core FGD computation covering both the partial-GPU slot search and the
/// whole/multi-GPU hypothetical allocation.
pub fn calculate_gpu_share_frag_extend_score(
    node_res: &NodeResource,
    pod_res: &PodResource,
    typical_pods: &TargetPodList,
    exclusive_gpu_allocator: &ExclusiveGpuAllocator,
) -> (i64, Option<String>) {
    let node_frag_score = node_gpu_share_frag_score(node_res, typical_pods);
    if pod_res.is_partial_gpu() {
        // try every slot with enough remaining share; ties keep the first
        let mut score = 0;
        let mut gpu_id: Option<String> = None;
        for i in 0..node_res.milli_gpu_left_list.len() {
            if node_res.milli_gpu_left_list[i] >= pod_res.milli_gpu {
                let mut new_node_res = node_res.clone();
                new_node_res.milli_cpu_left -= pod_res.milli_cpu;
                new_node_res.milli_gpu_left_list[i] -= pod_res.milli_gpu;
                let new_frag_score = node_gpu_share_frag_score(&new_node_res, typical_pods);
                let frag_score =
                    (sigmoid((node_frag_score - new_frag_score) / 1000.0) * MAX_NODE_SCORE as f64) as i64;
                if gpu_id.is_none() || frag_score > score {
                    score = frag_score;
                    gpu_id = Some(i.to_string());
                }
            }
        }
        (score, gpu_id)
    } else {
        match node_res.sub(pod_res) {
            Ok(new_node_res) => {
                let new_frag_score = node_gpu_share_frag_score(&new_node_res, typical_pods);
                let score =
                    (sigmoid((node_frag_score - new_frag_score) / 1000.0) * MAX_NODE_SCORE as f64) as i64;
                (score, (exclusive_gpu_allocator)(node_res, pod_res))
            }
            Err(_) => (MIN_NODE_SCORE, None),
        }
    }
}

/// Default exclusive-GPU-id strategy: the lowest-index slots that can each
/// hold the pod's per-GPU share, comma-joined. `None` when the node cannot
/// provide enough slots.
pub fn allocate_exclusive_gpu_id(node_res: &NodeResource, pod_res: &PodResource) -> Option<String> {
    let share = if pod_res.gpu_number > 0 { pod_res.milli_gpu_per_gpu() } else { return None };
    let mut picked = Vec::default();
    for (i, &left) in node_res.milli_gpu_left_list.iter().enumerate() {
        if left >= share {
            picked.push(i.to_string());
            if picked.len() as i64 == pod_res.gpu_number {
                return Some(picked.join(","));
            }
        }
    }
    None
}

/// Parses a GPU id produced by scoring back into slot indices.
pub fn parse_gpu_id(gpu_id: &str) -> Vec<usize> {
    gpu_id.split(',').filter_map(|part| part.parse::<usize>().ok()).collect()
}
