//! Typed representation of node and pod resources in a GPU-sharing cluster.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use serde::Serialize;

use crate::errors::ResourceError;

/// Milli-units per whole resource unit (1000 milli-GPU = 1 full GPU).
pub const MILLI: i64 = 1000;

/// A cluster node: identity and capacity. Owned by the cluster snapshot and
/// shared via `Rc`; descheduling code must never mutate it.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Node {
    pub name: String,
    /// CPU capacity in milli-cores.
    pub milli_cpu_capacity: i64,
    /// Number of physical GPUs on the node.
    pub gpu_number: usize,
    /// GPU model tag; empty string means untyped/generic.
    pub gpu_type: String,
}

impl Node {
    pub fn new(name: &str, milli_cpu_capacity: i64, gpu_number: usize, gpu_type: &str) -> Self {
        Self {
            name: name.to_string(),
            milli_cpu_capacity,
            gpu_number,
            gpu_type: gpu_type.to_string(),
        }
    }
}

/// A pod with its resource requests and, once placed, the GPU slot indices
/// it occupies on its node.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    /// Requested CPU in milli-cores.
    pub milli_cpu: i64,
    /// Total requested GPU capacity in milli-units (across all GPUs).
    pub milli_gpu: i64,
    /// Number of distinct GPUs requested (0 for CPU-only pods).
    pub gpu_number: i64,
    /// Required GPU model; empty string means any.
    pub gpu_type: String,
    /// GPU slot indices assigned at placement time, one per requested GPU.
    pub gpu_indices: Vec<usize>,
}

impl Pod {
    pub fn new(name: &str, namespace: &str, milli_cpu: i64, milli_gpu: i64, gpu_number: i64) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            milli_cpu,
            milli_gpu,
            gpu_number,
            gpu_type: String::new(),
            gpu_indices: Vec::default(),
        }
    }

    pub fn with_gpu_indices(mut self, gpu_indices: Vec<usize>) -> Self {
        self.gpu_indices = gpu_indices;
        self
    }

    pub fn with_gpu_type(mut self, gpu_type: &str) -> Self {
        self.gpu_type = gpu_type.to_string();
        self
    }
}

/// Unique pod key, `namespace/name`.
pub fn generate_pod_key(pod: &Pod) -> String {
    format!("{}/{}", pod.namespace, pod.name)
}

/// Resource requests of a pod, projected once per pass from its spec.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PodResource {
    pub milli_cpu: i64,
    /// Total requested GPU milli-capacity.
    pub milli_gpu: i64,
    pub gpu_number: i64,
    pub gpu_type: String,
}

impl PodResource {
    /// Requested milli-capacity per individual GPU.
    pub fn milli_gpu_per_gpu(&self) -> i64 {
        if self.gpu_number > 0 {
            self.milli_gpu / self.gpu_number
        } else {
            0
        }
    }

    /// A pod with no aggregate requests always fits and scores maximally.
    pub fn is_empty(&self) -> bool {
        self.milli_cpu == 0 && self.milli_gpu == 0
    }

    /// True for a single-GPU request at sub-whole-unit granularity.
    pub fn is_partial_gpu(&self) -> bool {
        self.gpu_number == 1 && self.milli_gpu < MILLI
    }
}

impl Display for PodResource {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "<cpu:{}m, gpu:{}m x{}>", self.milli_cpu, self.milli_gpu, self.gpu_number)
    }
}

/// Projects a pod's spec into a `PodResource`.
pub fn get_pod_resource(pod: &Pod) -> PodResource {
    PodResource {
        milli_cpu: pod.milli_cpu,
        milli_gpu: pod.milli_gpu,
        gpu_number: pod.gpu_number,
        gpu_type: pod.gpu_type.clone(),
    }
}

/// Remaining capacity of a node: capacity minus the requests of the pods
/// currently placed on it, tracked per GPU slot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct NodeResource {
    pub node_name: String,
    pub milli_cpu_left: i64,
    /// Remaining milli-capacity of every physical GPU, in slot order.
    pub milli_gpu_left_list: Vec<i64>,
    pub gpu_type: String,
}

impl NodeResource {
    /// Remaining capacity of an empty node.
    pub fn from_capacity(node: &Node) -> Self {
        Self {
            node_name: node.name.clone(),
            milli_cpu_left: node.milli_cpu_capacity,
            milli_gpu_left_list: vec![MILLI; node.gpu_number],
            gpu_type: node.gpu_type.clone(),
        }
    }

    pub fn gpu_number(&self) -> usize {
        self.milli_gpu_left_list.len()
    }

    pub fn milli_gpu_left_total(&self) -> i64 {
        self.milli_gpu_left_list.iter().sum()
    }

    /// True if some single GPU slot can hold `milli_gpu` more milli-units.
    pub fn can_allocate_gpu(&self, milli_gpu: i64) -> bool {
        self.milli_gpu_left_list.iter().any(|&left| left >= milli_gpu)
    }

    /// Remaining capacity after a hypothetical allocation of `pod_res`.
    /// Each requested GPU is taken from the lowest-index unused slot that
    /// still has enough capacity for the pod's per-GPU share; a slot never
    /// serves two GPUs of the same request.
    pub fn sub(&self, pod_res: &PodResource) -> Result<NodeResource, ResourceError> {
        if self.milli_cpu_left < pod_res.milli_cpu {
            return Err(ResourceError::insufficient(self.node_name.clone(), pod_res.to_string()));
        }
        let mut new_res = self.clone();
        new_res.milli_cpu_left -= pod_res.milli_cpu;
        let share = pod_res.milli_gpu_per_gpu();
        let mut used_slots: Vec<usize> = Vec::default();
        for _ in 0..pod_res.gpu_number {
            let slot = new_res
                .milli_gpu_left_list
                .iter()
                .enumerate()
                .find(|&(i, &left)| !used_slots.contains(&i) && left >= share)
                .map(|(i, _)| i);
            match slot {
                Some(i) => {
                    new_res.milli_gpu_left_list[i] -= share;
                    used_slots.push(i);
                }
                None => {
                    return Err(ResourceError::insufficient(self.node_name.clone(), pod_res.to_string()))
                }
            }
        }
        Ok(new_res)
    }

    /// Remaining capacity after evicting `pod` from this node, restoring the
    /// exact GPU slots the pod occupies.
    pub fn release(&self, pod: &Pod) -> NodeResource {
        let mut new_res = self.clone();
        new_res.milli_cpu_left += pod.milli_cpu;
        let pod_res = get_pod_resource(pod);
        let share = pod_res.milli_gpu_per_gpu();
        for &i in &pod.gpu_indices {
            if i < new_res.milli_gpu_left_list.len() {
                new_res.milli_gpu_left_list[i] = (new_res.milli_gpu_left_list[i] + share).min(MILLI);
            }
        }
        new_res
    }
}

impl Display for NodeResource {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "<{}: cpu:{}m, gpu:{:?}>", self.node_name, self.milli_cpu_left, self.milli_gpu_left_list)
    }
}

/// Deducts `milli_gpu` from the first slot in `milli_gpu_left_list` that can
/// hold it. Returns false when no slot fits.
pub fn allocate_gpu(milli_gpu_left_list: &mut [i64], milli_gpu: i64) -> bool {
    for left in milli_gpu_left_list.iter_mut() {
        if *left >= milli_gpu {
            *left -= milli_gpu;
            return true;
        }
    }
    false
}

/// A node together with the pods currently scheduled on it. `node` is shared
/// with the cluster snapshot; removing a pod means building a new `NodeStatus`
/// with a new pod vector, never editing the shared node.
#[derive(Clone)]
pub struct NodeStatus {
    pub node: Rc<Node>,
    pub pods: Vec<Rc<Pod>>,
}

impl NodeStatus {
    pub fn new(node: Rc<Node>, pods: Vec<Rc<Pod>>) -> Self {
        Self { node, pods }
    }
}

/// A pod evicted from its node and still pending reassignment.
#[derive(Clone, Debug, PartialEq)]
pub struct UnscheduledPod {
    pub pod: Rc<Pod>,
    pub reason: String,
}

/// Builds the remaining-resource map for a snapshot: node capacity minus the
/// requests of every pod placed on it, deducted slot by slot.
pub fn get_node_resource_map(node_statuses: &[NodeStatus]) -> HashMap<String, NodeResource> {
    let mut node_res_map = HashMap::default();
    for ns in node_statuses {
        let mut node_res = NodeResource::from_capacity(&ns.node);
        for pod in &ns.pods {
            node_res.milli_cpu_left -= pod.milli_cpu;
            let share = get_pod_resource(pod).milli_gpu_per_gpu();
            for &i in &pod.gpu_indices {
                if i < node_res.milli_gpu_left_list.len() {
                    node_res.milli_gpu_left_list[i] -= share;
                }
            }
        }
        node_res_map.insert(ns.node.name.clone(), node_res);
    }
    node_res_map
}

/// Returns a new pod vector without the given pod (matched by pod key).
pub fn remove_pod_from_slice(pods: &[Rc<Pod>], pod: &Pod) -> Vec<Rc<Pod>> {
    let key = generate_pod_key(pod);
    pods.iter().filter(|p| generate_pod_key(p) != key).cloned().collect()
}

/// Resolves descheduled pod keys back into full pod objects.
pub fn get_pods_from_pod_map(keys: &[String], pod_map: &HashMap<String, Rc<Pod>>) -> Vec<Rc<Pod>> {
    keys.iter().filter_map(|key| pod_map.get(key).cloned()).collect()
}
