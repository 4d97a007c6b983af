//! In-process reference implementation of the `ClusterService` collaborator.
//!
//! Owns the node/pod snapshot of a simulated GPU-sharing cluster, applies
//! deletions, provides the two victim-selection primitives and a best-effort
//! rescheduler driven by the FGD score plugin. Production deployments wire
//! the descheduling engine to the real simulator instead.

use std::collections::HashMap;
use std::rc::Rc;

use crate::cluster::ClusterService;
use crate::default_score_plugins::fgd_score_plugin::{parse_gpu_id, FGDScorePlugin};
use crate::errors::DeletionError;
use crate::frag_metrics::{FragMetrics, MetricsLogger};
use crate::fragmentation::{
    node_gpu_frag_amount, node_gpu_share_frag_score, pod_distribution_from_pods,
    target_pod_list_from_pods, FragAmount, TargetPodList,
};
use crate::resources::{
    generate_pod_key, get_pod_resource, Node, NodeResource, NodeStatus, Pod, UnscheduledPod,
};
use crate::score_plugin::ScorePlugin;

pub struct SimulatedCluster {
    nodes: Vec<Rc<Node>>,
    pods_by_node: HashMap<String, Vec<Rc<Pod>>>,
    typical_pods: Rc<TargetPodList>,
    metrics_logger: Box<dyn MetricsLogger>,
}

impl SimulatedCluster {
    pub fn new(metrics_logger: Box<dyn MetricsLogger>) -> Self {
        Self {
            nodes: Vec::default(),
            pods_by_node: HashMap::default(),
            typical_pods: Rc::new(TargetPodList::default()),
            metrics_logger,
        }
    }

    pub fn add_node(&mut self, node: Node) {
        self.pods_by_node.entry(node.name.clone()).or_default();
        self.nodes.push(Rc::new(node));
    }

    /// Places a pod on the named node without any fit checking; the caller
    /// is responsible for consistent `gpu_indices`. Used when replaying a
    /// snapshot.
    pub fn place_pod(&mut self, pod: Pod, node_name: &str) {
        self.pods_by_node
            .entry(node_name.to_string())
            .or_default()
            .push(Rc::new(pod));
    }

    /// Schedules a pod onto the best-scoring accessible node, assigning GPU
    /// slots from the score plugin's GPU id. Returns the pod as unscheduled
    /// when no node fits.
    pub fn schedule_pod(&mut self, pod: Rc<Pod>) -> Option<UnscheduledPod> {
        let plugin = FGDScorePlugin::new(self.typical_pods.clone());
        let pod_res = get_pod_resource(&pod);

        let mut best: Option<(String, i64, Option<String>)> = None;
        for node in &self.nodes {
            let Some(node_res) = self.node_resource(&node.name) else {
                continue;
            };
            if node_res.milli_cpu_left < pod_res.milli_cpu {
                continue;
            }
            // inaccessible nodes are pre-filtered, never scored
            let Ok(node_score) = plugin.score(&node_res, &pod) else {
                continue;
            };
            if pod_res.milli_gpu > 0 && node_score.gpu_id.is_none() {
                continue;
            }
            if best.as_ref().map_or(true, |(_, score, _)| node_score.score > *score) {
                best = Some((node.name.clone(), node_score.score, node_score.gpu_id));
            }
        }

        match best {
            Some((node_name, _, gpu_id)) => {
                let gpu_indices = gpu_id.as_deref().map(parse_gpu_id).unwrap_or_default();
                let placed = (*pod).clone().with_gpu_indices(gpu_indices);
                self.place_pod(placed, &node_name);
                None
            }
            None => Some(UnscheduledPod {
                pod,
                reason: "no node with enough remaining capacity".to_string(),
            }),
        }
    }

    /// Recomputes the reference pod-size distribution from the current pod
    /// population. Call once per simulation tick, before a descheduling pass.
    pub fn refresh_workload_model(&mut self) {
        let pods = self.all_pods();
        self.typical_pods = Rc::new(target_pod_list_from_pods(&pods));
    }

    pub fn pod_count(&self) -> usize {
        self.pods_by_node.values().map(|pods| pods.len()).sum()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn save_metrics(&mut self, path: &str) -> Result<(), std::io::Error> {
        self.metrics_logger.save_log(path)
    }

    fn all_pods(&self) -> Vec<Rc<Pod>> {
        self.pods_by_node.values().flatten().cloned().collect()
    }

    /// Current remaining resources of a node, reflecting every deletion
    /// applied so far.
    pub fn node_resource(&self, node_name: &str) -> Option<NodeResource> {
        let node = self.nodes.iter().find(|n| n.name == node_name)?;
        let mut node_res = NodeResource::from_capacity(node);
        if let Some(pods) = self.pods_by_node.get(node_name) {
            for pod in pods {
                node_res.milli_cpu_left -= pod.milli_cpu;
                let share = get_pod_resource(pod).milli_gpu_per_gpu();
                for &i in &pod.gpu_indices {
                    if i < node_res.milli_gpu_left_list.len() {
                        node_res.milli_gpu_left_list[i] -= share;
                    }
                }
            }
        }
        Some(node_res)
    }
}

fn cosine_similarity(a: (f64, f64), b: (f64, f64)) -> f64 {
    let norm_a = (a.0 * a.0 + a.1 * a.1).sqrt();
    let norm_b = (b.0 * b.0 + b.1 * b.1).sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        // degenerate vectors are treated as fully aligned so they never win
        return 1.0;
    }
    (a.0 * b.0 + a.1 * b.1) / (norm_a * norm_b)
}

impl ClusterService for SimulatedCluster {
    fn get_current_pod_map(&self) -> HashMap<String, Rc<Pod>> {
        self.all_pods()
            .into_iter()
            .map(|pod| (generate_pod_key(&pod), pod))
            .collect()
    }

    fn get_cluster_node_status(&self) -> Vec<NodeStatus> {
        self.nodes
            .iter()
            .map(|node| {
                let pods = self.pods_by_node.get(&node.name).cloned().unwrap_or_default();
                NodeStatus::new(node.clone(), pods)
            })
            .collect()
    }

    fn get_pod_distribution(&self) -> HashMap<i64, f64> {
        pod_distribution_from_pods(&self.all_pods())
    }

    fn get_typical_pods(&self) -> Rc<TargetPodList> {
        self.typical_pods.clone()
    }

    fn delete_pod(&mut self, pod: &Pod) -> Result<(), DeletionError> {
        let pod_key = generate_pod_key(pod);
        for pods in self.pods_by_node.values_mut() {
            if let Some(pos) = pods.iter().position(|p| generate_pod_key(p) == pod_key) {
                pods.remove(pos);
                return Ok(());
            }
        }
        Err(DeletionError { pod_key, reason: "pod not found".to_string() })
    }

    fn schedule_evicted_pods(&mut self, pods: Vec<Rc<Pod>>) -> Vec<UnscheduledPod> {
        let mut failed_pods = Vec::default();
        for pod in pods {
            if let Some(unscheduled) = self.schedule_pod(pod) {
                failed_pods.push(unscheduled);
            }
        }
        failed_pods
    }

    fn cluster_analysis(&mut self, tag: &str) {
        for node in self.nodes.clone() {
            let Some(node_res) = self.node_resource(&node.name) else {
                continue;
            };
            let frag_amount = node_gpu_frag_amount(&node_res, &self.typical_pods);
            self.metrics_logger.log_metrics(FragMetrics::new(tag, &node_res, &frag_amount));
        }
        log::info!("[ClusterAnalysis] tag: {}, pods: {}", tag, self.pod_count());
    }

    /// Evicts the pod least aligned with the node's remaining capacity
    /// shape: on a CPU-starved, GPU-rich node that is the pod holding much
    /// CPU and little GPU, whose removal frees the scarce resource.
    fn find_victim_pod_on_cos_sim(
        &self,
        node_res: &NodeResource,
        pods: &[Rc<Pod>],
    ) -> Option<Rc<Pod>> {
        let free = (node_res.milli_cpu_left as f64, node_res.milli_gpu_left_total() as f64);
        pods.iter()
            .min_by(|a, b| {
                let sim_a = cosine_similarity((a.milli_cpu as f64, a.milli_gpu as f64), free);
                let sim_b = cosine_similarity((b.milli_cpu as f64, b.milli_gpu as f64), free);
                sim_a.total_cmp(&sim_b)
            })
            .cloned()
    }

    /// Evicts the pod whose removal reduces the node's fragmentation the
    /// most, and only when it strictly reduces it; otherwise the node keeps
    /// its pods for this pass.
    fn find_victim_pod_on_node_frag_aware(
        &self,
        frag_amount: &FragAmount,
        node_res: &NodeResource,
        pods: &[Rc<Pod>],
    ) -> (Option<Rc<Pod>>, Option<FragAmount>) {
        let node_res = self
            .node_resource(&frag_amount.node_name)
            .unwrap_or_else(|| node_res.clone());
        let mut best_score = node_gpu_share_frag_score(&node_res, &self.typical_pods);
        let mut victim: Option<(Rc<Pod>, FragAmount)> = None;
        for pod in pods {
            let released_res = node_res.release(pod);
            let released_frag = node_gpu_frag_amount(&released_res, &self.typical_pods);
            let released_score = released_frag.frag_amount_sum_except_q3();
            if released_score < best_score {
                best_score = released_score;
                victim = Some((pod.clone(), released_frag));
            }
        }
        match victim {
            Some((pod, frag)) => (Some(pod), Some(frag)),
            None => (None, None),
        }
    }
}
