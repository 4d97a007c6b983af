//! Best-fit-descending eviction planner.
//!
//! Considers the largest pods first and, for each, looks for the node whose
//! remaining capacity after a hypothetical allocation best matches the
//! reference demand distribution. The chosen node only feeds the planner's
//! private resource accounting; the pod is evicted, not moved, and actual
//! placement is left to the external rescheduler.

use std::collections::HashMap;
use std::rc::Rc;

use crate::errors::DeletionError;
use crate::resources::{
    allocate_gpu, generate_pod_key, get_pod_resource, NodeResource, NodeStatus, Pod, PodResource,
    MILLI,
};

pub const DEFAULT_MAX_RETRIES: usize = 3;

pub struct BinPackingPlanner {
    max_retries: usize,
}

impl Default for BinPackingPlanner {
    fn default() -> Self {
        Self { max_retries: DEFAULT_MAX_RETRIES }
    }
}

impl BinPackingPlanner {
    pub fn new(max_retries: usize) -> Self {
        Self { max_retries }
    }

    /// Plans up to `budget` evictions and applies them through `delete_pod`.
    /// Returns the keys of the pods whose deletion succeeded, in eviction
    /// order. A pod whose deletion keeps failing is given up on after
    /// `max_retries` attempts without consuming budget.
    pub fn plan(
        &self,
        mut budget: i64,
        node_statuses: &[NodeStatus],
        node_res_map: &HashMap<String, NodeResource>,
        pod_map: &HashMap<String, Rc<Pod>>,
        pod_distribution: &HashMap<i64, f64>,
        delete_pod: &mut dyn FnMut(&Pod) -> Result<(), DeletionError>,
    ) -> Vec<String> {
        // largest demand first, CPU primary key, GPU tie-break
        let mut pod_list: Vec<Rc<Pod>> = pod_map.values().cloned().collect();
        pod_list.sort_by(|a, b| {
            let res_a = get_pod_resource(a);
            let res_b = get_pod_resource(b);
            (res_b.milli_cpu, res_b.milli_gpu).cmp(&(res_a.milli_cpu, res_a.milli_gpu))
        });

        // private working copy; never written back to the snapshot
        let mut working_res_map = node_res_map.clone();
        let mut descheduled_pod_keys = Vec::default();

        for pod in &pod_list {
            if budget <= 0 {
                break;
            }
            let pod_res = get_pod_resource(pod);
            let gpu_demand = pod_res.milli_gpu / MILLI;

            let mut retry_count = 0;
            while retry_count < self.max_retries {
                let best_fit = self.find_best_fit_node(
                    &pod_res,
                    gpu_demand,
                    node_statuses,
                    &working_res_map,
                    pod_distribution,
                );
                let Some(best_fit_node_name) = best_fit else {
                    retry_count += 1;
                    log::debug!(
                        "[binPacking] no fit for pod({}), attempt {}",
                        generate_pod_key(pod),
                        retry_count
                    );
                    continue;
                };

                match delete_pod(pod) {
                    Ok(()) => {
                        descheduled_pod_keys.push(generate_pod_key(pod));
                        budget -= 1;
                        // account the hypothetical placement for later pods
                        if let Some(node_res) = working_res_map.get_mut(&best_fit_node_name) {
                            node_res.milli_cpu_left -= pod_res.milli_cpu;
                            allocate_gpu(&mut node_res.milli_gpu_left_list, pod_res.milli_gpu);
                        }
                        break;
                    }
                    Err(err) => {
                        retry_count += 1;
                        log::error!(
                            "[binPacking] failed to delete pod({}) on attempt {}: {}",
                            generate_pod_key(pod),
                            retry_count,
                            err
                        );
                    }
                }
            }
        }
        descheduled_pod_keys
    }

    /// Scans all nodes and returns the one minimizing the bin-packing
    /// priority: remaining GPU capacity after the deduction, divided by the
    /// demand bucket's reference ratio when one exists. First-seen wins ties.
    fn find_best_fit_node(
        &self,
        pod_res: &PodResource,
        gpu_demand: i64,
        node_statuses: &[NodeStatus],
        working_res_map: &HashMap<String, NodeResource>,
        pod_distribution: &HashMap<i64, f64>,
    ) -> Option<String> {
        let mut best_fit: Option<(String, f64)> = None;
        for ns in node_statuses {
            let Some(node_res) = working_res_map.get(&ns.node.name) else {
                continue;
            };
            if node_res.milli_cpu_left < pod_res.milli_cpu
                || !node_res.can_allocate_gpu(pod_res.milli_gpu)
            {
                continue;
            }
            let mut remaining_gpu_list = node_res.milli_gpu_left_list.clone();
            allocate_gpu(&mut remaining_gpu_list, pod_res.milli_gpu);
            let remaining_gpu: i64 = remaining_gpu_list.iter().sum();

            let priority = match pod_distribution.get(&gpu_demand) {
                Some(&ratio) if ratio > 0.0 => remaining_gpu as f64 / ratio,
                _ => remaining_gpu as f64,
            };
            if best_fit.as_ref().map_or(true, |(_, best)| priority < *best) {
                best_fit = Some((ns.node.name.clone(), priority));
            }
        }
        best_fit.map(|(name, _)| name)
    }
}
