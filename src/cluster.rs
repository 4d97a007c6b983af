//! Collaborator interface between the descheduling core and the surrounding
//! cluster simulation.

use std::collections::HashMap;
use std::rc::Rc;

use crate::errors::DeletionError;
use crate::fragmentation::{node_gpu_frag_amount, FragAmount, TargetPodList};
use crate::resources::{
    get_node_resource_map, NodeResource, NodeStatus, Pod, UnscheduledPod,
};

/// Diagnostic tag fired after a descheduling pass has issued its evictions.
pub const TAG_POST_EVICTION: &str = "PostEviction";

/// Everything the descheduling engine needs from the cluster simulation.
/// The snapshot accessors are read-only for the duration of a pass; the only
/// mutation channel is `delete_pod`.
pub trait ClusterService {
    /// Current pods, keyed by `namespace/name`.
    fn get_current_pod_map(&self) -> HashMap<String, Rc<Pod>>;

    /// Current nodes with their pods. Node descriptors hold capacity, not
    /// request-adjusted values.
    fn get_cluster_node_status(&self) -> Vec<NodeStatus>;

    /// Whole-GPU demand distribution (bucket -> ratio) of the workload.
    fn get_pod_distribution(&self) -> HashMap<i64, f64>;

    /// Reference pod-size distribution used for fragmentation scoring.
    fn get_typical_pods(&self) -> Rc<TargetPodList>;

    /// Removes a pod from the simulated cluster.
    fn delete_pod(&mut self, pod: &Pod) -> Result<(), DeletionError>;

    /// Best-effort rescheduling of evicted pods; returns the pods that could
    /// not be placed.
    fn schedule_evicted_pods(&mut self, pods: Vec<Rc<Pod>>) -> Vec<UnscheduledPod>;

    /// Fire-and-forget diagnostic hook.
    fn cluster_analysis(&mut self, tag: &str);

    /// Cosine-similarity victim chooser: the pod whose removal best restores
    /// the node's CPU/GPU shape balance, if any.
    fn find_victim_pod_on_cos_sim(
        &self,
        node_res: &NodeResource,
        pods: &[Rc<Pod>],
    ) -> Option<Rc<Pod>>;

    /// Fragmentation-aware victim chooser. On success also returns the
    /// node's fragmentation amount after the eviction, so the caller can
    /// re-prioritize the node without rescanning the cluster.
    fn find_victim_pod_on_node_frag_aware(
        &self,
        frag_amount: &FragAmount,
        node_res: &NodeResource,
        pods: &[Rc<Pod>],
    ) -> (Option<Rc<Pod>>, Option<FragAmount>);

    /// Per-node fragmentation amounts, sorted descending by
    /// `frag_amount_sum_except_q3`.
    fn get_node_frag_amount_list(&self, node_statuses: &[NodeStatus]) -> Vec<FragAmount> {
        let node_res_map = get_node_resource_map(node_statuses);
        let typical_pods = self.get_typical_pods();
        let mut frag_list: Vec<FragAmount> = node_statuses
            .iter()
            .filter_map(|ns| node_res_map.get(&ns.node.name))
            .map(|node_res| node_gpu_frag_amount(node_res, &typical_pods))
            .collect();
        frag_list.sort_by(|a, b| {
            b.frag_amount_sum_except_q3()
                .total_cmp(&a.frag_amount_sum_except_q3())
        });
        frag_list
    }

    /// Per-node fragmentation amounts keyed by node name.
    fn node_gpu_frag_amount_map(
        &self,
        node_res_map: &HashMap<String, NodeResource>,
    ) -> HashMap<String, FragAmount> {
        let typical_pods = self.get_typical_pods();
        node_res_map
            .iter()
            .map(|(name, node_res)| (name.clone(), node_gpu_frag_amount(node_res, &typical_pods)))
            .collect()
    }
}
