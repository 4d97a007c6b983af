//! Fragmentation scoring for GPU-sharing nodes.
//!
//! A node is fragmented when its remaining capacity cannot serve the demand
//! patterns of a reference pod-size distribution. Every GPU slot is classified
//! against every target pod; the slot's free milli-capacity, weighted by the
//! target's frequency, is charged to one of four buckets. The scalar
//! fragmentation score is the bucket sum excluding `Q3Satisfied` (capacity a
//! typical pod can still use is not fragmentation).

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::rc::Rc;
use serde::Serialize;

use crate::resources::{get_pod_resource, NodeResource, Pod, PodResource, MILLI};

/// One entry of the reference pod-size distribution.
#[derive(Clone, Debug, Serialize)]
pub struct TargetPod {
    pub res: PodResource,
    /// Relative frequency of this pod shape, in [0, 1].
    pub percentage: f64,
}

pub type TargetPodList = Vec<TargetPod>;

/// Demand-bucket classification of a GPU slot against one target pod.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum FragBucket {
    /// Neither CPU nor GPU left for the target.
    Q1LackBoth,
    /// CPU fits but the slot cannot hold the target's GPU share.
    Q2LackGpu,
    /// The target would fit; this capacity is usable, not fragmented.
    Q3Satisfied,
    /// The slot could serve the target but the node is out of CPU.
    Q4LackCpu,
}

impl FragBucket {
    pub const ALL: [FragBucket; 4] = [
        FragBucket::Q1LackBoth,
        FragBucket::Q2LackGpu,
        FragBucket::Q3Satisfied,
        FragBucket::Q4LackCpu,
    ];

    fn index(self) -> usize {
        match self {
            FragBucket::Q1LackBoth => 0,
            FragBucket::Q2LackGpu => 1,
            FragBucket::Q3Satisfied => 2,
            FragBucket::Q4LackCpu => 3,
        }
    }
}

impl Display for FragBucket {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            FragBucket::Q1LackBoth => write!(f, "q1_lack_both"),
            FragBucket::Q2LackGpu => write!(f, "q2_lack_gpu"),
            FragBucket::Q3Satisfied => write!(f, "q3_satisfied"),
            FragBucket::Q4LackCpu => write!(f, "q4_lack_cpu"),
        }
    }
}

/// Per-node fragmentation summary: expected free GPU milli-capacity in each
/// demand bucket.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FragAmount {
    pub node_name: String,
    pub data: [f64; 4],
}

impl FragAmount {
    pub fn new(node_name: String) -> Self {
        Self { node_name, data: [0.0; 4] }
    }

    pub fn add(&mut self, bucket: FragBucket, amount: f64) {
        self.data[bucket.index()] += amount;
    }

    pub fn get(&self, bucket: FragBucket) -> f64 {
        self.data[bucket.index()]
    }

    /// Priority signal of the eviction queue. Q3 (satisfied) is deliberately
    /// excluded: capacity a typical pod can still consume is not actionable
    /// fragmentation.
    pub fn frag_amount_sum_except_q3(&self) -> f64 {
        FragBucket::ALL
            .iter()
            .filter(|b| **b != FragBucket::Q3Satisfied)
            .map(|b| self.get(*b))
            .sum()
    }
}

impl Display for FragAmount {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "{}: [q1:{:.0}, q2:{:.0}, q3:{:.0}, q4:{:.0}]",
            self.node_name, self.data[0], self.data[1], self.data[2], self.data[3]
        )
    }
}

/// Computes a node's fragmentation distribution against the reference
/// pod-size distribution. Pure function of its inputs.
pub fn node_gpu_frag_amount(node_res: &NodeResource, typical_pods: &TargetPodList) -> FragAmount {
    let mut frag_amount = FragAmount::new(node_res.node_name.clone());
    for target in typical_pods {
        let cpu_ok = node_res.milli_cpu_left >= target.res.milli_cpu;
        let gpu_share = target.res.milli_gpu_per_gpu();
        for &gpu_left in &node_res.milli_gpu_left_list {
            let gpu_ok = gpu_left >= gpu_share;
            let bucket = match (cpu_ok, gpu_ok) {
                (true, true) => FragBucket::Q3Satisfied,
                (true, false) => FragBucket::Q2LackGpu,
                (false, true) => FragBucket::Q4LackCpu,
                (false, false) => FragBucket::Q1LackBoth,
            };
            frag_amount.add(bucket, target.percentage * gpu_left as f64);
        }
    }
    frag_amount
}

/// Scalar fragmentation score of a node; lower means the remaining capacity
/// shape serves the reference demand better.
pub fn node_gpu_share_frag_score(node_res: &NodeResource, typical_pods: &TargetPodList) -> f64 {
    node_gpu_frag_amount(node_res, typical_pods).frag_amount_sum_except_q3()
}

/// Bounded, monotonic squashing of a fragmentation-score delta.
pub fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Derives the reference pod-size distribution from a pod population:
/// one target per distinct resource shape, weighted by frequency.
pub fn target_pod_list_from_pods(pods: &[Rc<Pod>]) -> TargetPodList {
    if pods.is_empty() {
        return TargetPodList::default();
    }
    let mut counts: HashMap<(i64, i64, i64), (PodResource, usize)> = HashMap::default();
    for pod in pods {
        let res = get_pod_resource(pod);
        let entry = counts
            .entry((res.milli_cpu, res.milli_gpu, res.gpu_number))
            .or_insert((res, 0));
        entry.1 += 1;
    }
    let total = pods.len() as f64;
    let mut list: TargetPodList = counts
        .into_values()
        .map(|(res, count)| TargetPod { percentage: count as f64 / total, res })
        .collect();
    // deterministic order for reproducible scoring logs
    list.sort_by(|a, b| {
        (b.res.milli_cpu, b.res.milli_gpu).cmp(&(a.res.milli_cpu, a.res.milli_gpu))
    });
    list
}

/// Derives the whole-GPU demand distribution (bucket -> ratio) from a pod
/// population. Partial-GPU pods land in bucket 0.
pub fn pod_distribution_from_pods(pods: &[Rc<Pod>]) -> HashMap<i64, f64> {
    let mut distribution = HashMap::default();
    if pods.is_empty() {
        return distribution;
    }
    let total = pods.len() as f64;
    for pod in pods {
        let bucket = pod.milli_gpu / MILLI;
        *distribution.entry(bucket).or_insert(0.0) += 1.0 / total;
    }
    distribution
}
