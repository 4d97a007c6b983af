//! Descheduling engine: policy dispatch, eviction budget accounting and the
//! handoff of evicted pods to the rescheduler.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::bin_packing::BinPackingPlanner;
use crate::cluster::{ClusterService, TAG_POST_EVICTION};
use crate::errors::ConfigError;
use crate::eviction_queue::EvictionPriorityQueue;
use crate::resources::{
    generate_pod_key, get_node_resource_map, get_pods_from_pod_map, remove_pod_from_slice,
    NodeResource, NodeStatus, Pod, UnscheduledPod,
};

pub const DESCHEDULE_POLICY_COS_SIM: &str = "cosSim";
pub const DESCHEDULE_POLICY_FRAG_ONE_POD: &str = "fragOnePod";
pub const DESCHEDULE_POLICY_FRAG_MULTI_POD: &str = "fragMultiPod";
pub const DESCHEDULE_POLICY_BIN_PACKING: &str = "binPacking";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeschedulePolicy {
    CosSim,
    FragOnePod,
    FragMultiPod,
    BinPacking,
}

impl std::str::FromStr for DeschedulePolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            DESCHEDULE_POLICY_COS_SIM => Ok(DeschedulePolicy::CosSim),
            DESCHEDULE_POLICY_FRAG_ONE_POD => Ok(DeschedulePolicy::FragOnePod),
            DESCHEDULE_POLICY_FRAG_MULTI_POD => Ok(DeschedulePolicy::FragMultiPod),
            DESCHEDULE_POLICY_BIN_PACKING => Ok(DeschedulePolicy::BinPacking),
            _ => Err(ConfigError::UnknownPolicy(s.to_string())),
        }
    }
}

/// Holds raw deschedule config parsed from YAML file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
struct RawDescheduleConfig {
    pub ratio: Option<f64>,
    pub policy: Option<String>,
    pub milli_cpu_deschedule_bar: Option<i64>,
    pub milli_gpu_deschedule_bar: Option<i64>,
    pub bin_packing_max_retries: Option<usize>,
}

/// Configuration of a descheduling pass.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DescheduleConfig {
    /// Fraction of pods eligible for eviction per pass, in [0, 1].
    pub ratio: f64,
    /// Policy name, one of `cosSim`, `fragOnePod`, `fragMultiPod`,
    /// `binPacking`.
    pub policy: String,
    /// CosSim: nodes with less CPU left than this are CPU-starved.
    /// Default 2000.
    pub milli_cpu_deschedule_bar: i64,
    /// CosSim: nodes with a GPU slot above this are GPU-rich. Default 500.
    pub milli_gpu_deschedule_bar: i64,
    /// BinPacking: deletion attempts per pod. Default 3.
    pub bin_packing_max_retries: usize,
}

impl DescheduleConfig {
    pub fn new(ratio: f64, policy: &str) -> Self {
        Self {
            ratio: ratio.clamp(0.0, 1.0),
            policy: policy.to_string(),
            milli_cpu_deschedule_bar: 2000,
            milli_gpu_deschedule_bar: 500,
            bin_packing_max_retries: 3,
        }
    }

    pub fn from_file(file_name: &str) -> Self {
        let raw: RawDescheduleConfig = serde_yaml::from_str(
            &std::fs::read_to_string(file_name).unwrap_or_else(|_| panic!("Can't read file {}", file_name)),
        ).unwrap_or_else(|_| panic!("Can't parse YAML from file {}", file_name));

        Self {
            ratio: raw.ratio.unwrap_or(0.0).clamp(0.0, 1.0),
            policy: raw.policy.unwrap_or_else(|| DESCHEDULE_POLICY_FRAG_ONE_POD.to_string()),
            milli_cpu_deschedule_bar: raw.milli_cpu_deschedule_bar.unwrap_or(2000),
            milli_gpu_deschedule_bar: raw.milli_gpu_deschedule_bar.unwrap_or(500),
            bin_packing_max_retries: raw.bin_packing_max_retries.unwrap_or(3),
        }
    }
}

pub struct Descheduler {
    cluster: Rc<RefCell<dyn ClusterService>>,
    config: DescheduleConfig,
}

impl Descheduler {
    pub fn new(cluster: Rc<RefCell<dyn ClusterService>>, config: DescheduleConfig) -> Self {
        Self { cluster, config }
    }

    /// Runs one descheduling pass: computes the eviction budget, dispatches
    /// to the configured policy, triggers the post-eviction cluster analysis
    /// and hands the evicted pods to the rescheduler. Returns the pods the
    /// rescheduler could not place.
    pub fn deschedule_cluster(&mut self) -> Result<Vec<UnscheduledPod>, ConfigError> {
        let policy: DeschedulePolicy = self.config.policy.parse()?;

        let pod_map = self.cluster.borrow().get_current_pod_map();
        // resources in NodeStatus.node are capacities, not requests
        let node_statuses = self.cluster.borrow().get_cluster_node_status();
        let pod_distribution = self.cluster.borrow().get_pod_distribution();
        let node_res_map = get_node_resource_map(&node_statuses);

        let num_pods_to_deschedule = (self.config.ratio * pod_map.len() as f64).ceil() as i64;
        log::info!(
            "maximum number of pods that can be descheduled: {}, deschedule policy: {}",
            num_pods_to_deschedule,
            self.config.policy
        );

        let descheduled_pod_keys = match policy {
            DeschedulePolicy::CosSim => {
                self.deschedule_on_cos_sim(num_pods_to_deschedule, &node_statuses, &node_res_map)
            }
            DeschedulePolicy::FragOnePod => {
                self.deschedule_on_frag_one_pod(num_pods_to_deschedule, &node_statuses, &node_res_map)
            }
            DeschedulePolicy::FragMultiPod => {
                self.deschedule_on_frag_multi_pod(num_pods_to_deschedule, &node_statuses, &node_res_map)
            }
            DeschedulePolicy::BinPacking => self.deschedule_on_bin_packing(
                num_pods_to_deschedule,
                &node_statuses,
                &node_res_map,
                &pod_map,
                &pod_distribution,
            ),
        };

        self.cluster.borrow_mut().cluster_analysis(TAG_POST_EVICTION);
        let descheduled_pods = get_pods_from_pod_map(&descheduled_pod_keys, &pod_map);
        log::info!("[DescheduleCluster] num of descheduled pods: {}", descheduled_pods.len());

        let failed_pods = self.cluster.borrow_mut().schedule_evicted_pods(descheduled_pods);
        log::info!("[DescheduleCluster] num of failed pods: {}", failed_pods.len());
        Ok(failed_pods)
    }

    /// CosSim policy: only nodes that are simultaneously CPU-starved and
    /// GPU-rich are candidates, visited most CPU-starved first; victim choice
    /// is delegated to the external cosine-similarity selector.
    fn deschedule_on_cos_sim(
        &self,
        mut num_pods_to_deschedule: i64,
        node_statuses: &[NodeStatus],
        node_res_map: &HashMap<String, NodeResource>,
    ) -> Vec<String> {
        let milli_cpu_bar = self.config.milli_cpu_deschedule_bar;
        let milli_gpu_bar = self.config.milli_gpu_deschedule_bar;

        let mut sorted_statuses: Vec<&NodeStatus> = node_statuses.iter().collect();
        sorted_statuses.sort_by_key(|ns| {
            node_res_map
                .get(&ns.node.name)
                .map(|res| res.milli_cpu_left)
                .unwrap_or(i64::MAX)
        });

        let mut descheduled_pod_keys = Vec::default();
        for ns in sorted_statuses {
            if num_pods_to_deschedule <= 0 {
                break;
            }
            let Some(node_res) = node_res_map.get(&ns.node.name) else {
                continue;
            };
            if node_res.milli_cpu_left >= milli_cpu_bar {
                continue;
            }
            if !node_res.milli_gpu_left_list.iter().any(|&left| left > milli_gpu_bar) {
                continue;
            }

            let victim_pod = self.cluster.borrow().find_victim_pod_on_cos_sim(node_res, &ns.pods);
            if let Some(victim_pod) = victim_pod {
                match self.cluster.borrow_mut().delete_pod(&victim_pod) {
                    Ok(()) => {
                        descheduled_pod_keys.push(generate_pod_key(&victim_pod));
                        num_pods_to_deschedule -= 1;
                    }
                    Err(err) => {
                        log::error!("[descheduleOnCosSim] {}", err);
                    }
                }
            }
        }
        descheduled_pod_keys
    }

    /// FragOnePod policy: nodes in descending fragmentation order, at most
    /// one eviction per node.
    fn deschedule_on_frag_one_pod(
        &self,
        mut num_pods_to_deschedule: i64,
        node_statuses: &[NodeStatus],
        node_res_map: &HashMap<String, NodeResource>,
    ) -> Vec<String> {
        let node_status_map: HashMap<String, &NodeStatus> = node_statuses
            .iter()
            .map(|ns| (ns.node.name.clone(), ns))
            .collect();

        let node_frag_amount_list = self.cluster.borrow().get_node_frag_amount_list(node_statuses);

        let mut descheduled_pod_keys = Vec::default();
        // from nodes with the largest amount of fragment
        for nfa in node_frag_amount_list {
            if num_pods_to_deschedule <= 0 {
                break;
            }
            let Some(ns) = node_status_map.get(&nfa.node_name) else {
                continue;
            };
            let Some(node_res) = node_res_map.get(&nfa.node_name) else {
                continue;
            };
            let (victim_pod, _) = self
                .cluster
                .borrow()
                .find_victim_pod_on_node_frag_aware(&nfa, node_res, &ns.pods);
            if let Some(victim_pod) = victim_pod {
                match self.cluster.borrow_mut().delete_pod(&victim_pod) {
                    Ok(()) => {
                        descheduled_pod_keys.push(generate_pod_key(&victim_pod));
                        num_pods_to_deschedule -= 1;
                    }
                    Err(err) => {
                        log::error!("[descheduleOnFragOnePod] {}", err);
                    }
                }
            }
        }
        descheduled_pod_keys
    }

    /// FragMultiPod policy: priority-queue-driven multi-round eviction. The
    /// popped node is re-pushed with its post-eviction fragmentation amount
    /// after every successful eviction, so the same node can lose several
    /// pods within one pass.
    fn deschedule_on_frag_multi_pod(
        &self,
        mut num_pods_to_deschedule: i64,
        node_statuses: &[NodeStatus],
        node_res_map: &HashMap<String, NodeResource>,
    ) -> Vec<String> {
        let node_frag_amount_map = self.cluster.borrow().node_gpu_frag_amount_map(node_res_map);

        let mut node_frag_queue = EvictionPriorityQueue::new();
        for frag_amount in node_frag_amount_map.into_values() {
            node_frag_queue.push(frag_amount);
        }

        // private working pod lists; the shared snapshot stays untouched
        let mut working_pods_map: HashMap<String, Vec<Rc<Pod>>> = node_statuses
            .iter()
            .map(|ns| (ns.node.name.clone(), ns.pods.clone()))
            .collect();

        let mut node_deschedule_count: HashMap<String, usize> = HashMap::default();
        let mut descheduled_pod_keys = Vec::default();
        let mut pop_count = 0;

        while num_pods_to_deschedule > 0 {
            let Some(item) = node_frag_queue.pop() else {
                break;
            };
            pop_count += 1;
            log::debug!(" POP: [{}][pri:{:.2}] {}", pop_count, item.priority, item.frag);
            node_frag_queue.show();

            let node_name = item.frag.node_name.clone();
            let Some(node_res) = node_res_map.get(&node_name) else {
                continue;
            };
            let ns_pods = working_pods_map.get(&node_name).cloned().unwrap_or_default();
            let (victim_pod, victim_node_frag) = self
                .cluster
                .borrow()
                .find_victim_pod_on_node_frag_aware(&item.frag, node_res, &ns_pods);

            // no victim: the node leaves the queue for the rest of the pass
            let (Some(victim_pod), Some(victim_node_frag)) = (victim_pod, victim_node_frag) else {
                continue;
            };
            match self.cluster.borrow_mut().delete_pod(&victim_pod) {
                Ok(()) => {
                    descheduled_pod_keys.push(generate_pod_key(&victim_pod));
                    *node_deschedule_count.entry(node_name.clone()).or_insert(0) += 1;
                    num_pods_to_deschedule -= 1;

                    working_pods_map
                        .insert(node_name, remove_pod_from_slice(&ns_pods, &victim_pod));
                    // node stays a candidate with its refreshed priority
                    node_frag_queue.push(victim_node_frag);
                    node_frag_queue.show();
                }
                Err(err) => {
                    log::error!("[descheduleOnFragMultiPod] {}", err);
                }
            }
        }
        log::debug!("[descheduleOnFragMultiPod] nodeDescheduleCount: {:?}", node_deschedule_count);
        descheduled_pod_keys
    }

    /// BinPacking policy: selection is driven by global pod ordering through
    /// the best-fit-descending planner.
    fn deschedule_on_bin_packing(
        &self,
        num_pods_to_deschedule: i64,
        node_statuses: &[NodeStatus],
        node_res_map: &HashMap<String, NodeResource>,
        pod_map: &HashMap<String, Rc<Pod>>,
        pod_distribution: &HashMap<i64, f64>,
    ) -> Vec<String> {
        let planner = BinPackingPlanner::new(self.config.bin_packing_max_retries);
        let cluster = self.cluster.clone();
        planner.plan(
            num_pods_to_deschedule,
            node_statuses,
            node_res_map,
            pod_map,
            pod_distribution,
            &mut |pod| cluster.borrow_mut().delete_pod(pod),
        )
    }
}
