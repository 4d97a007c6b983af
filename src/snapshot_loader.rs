//! Reader of cluster snapshots stored as JSON event lists.

use std::fs::File;

#[derive(Clone)]
pub struct NodeRequest {
    pub name: String,
    pub milli_cpu: i64,
    pub gpu_number: usize,
    pub gpu_type: String,
}

#[derive(Clone)]
pub struct PodRequest {
    pub name: String,
    pub namespace: String,
    pub node_name: String,

    pub milli_cpu: i64,
    pub milli_gpu: i64,
    pub gpu_number: i64,
    pub gpu_type: String,
    pub gpu_indices: Vec<usize>,
}

#[derive(Default)]
pub struct SnapshotReader {
    pub node_requests: Vec<NodeRequest>,
    pub pod_requests: Vec<PodRequest>,
}

impl SnapshotReader {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn parse(&mut self, snapshot_filename: String) {
        let file = File::open(snapshot_filename).unwrap();
        let raw_json: Vec<serde_json::Value> = serde_json::from_reader(file).unwrap();
        for event in raw_json.iter() {
            if event["type"] == "ADD_NODE" {
                self.node_requests.push(NodeRequest {
                    name: event["name"].as_str().unwrap().to_string(),
                    milli_cpu: event["milli_cpu"].as_i64().unwrap(),
                    gpu_number: event["gpu_number"].as_u64().unwrap() as usize,
                    gpu_type: event["gpu_type"].as_str().unwrap_or("").to_string(),
                })
            } else if event["type"] == "ADD_POD" {
                let gpu_indices = event["gpu_indices"]
                    .as_array()
                    .map(|indices| {
                        indices.iter().filter_map(|v| v.as_u64()).map(|v| v as usize).collect()
                    })
                    .unwrap_or_default();
                self.pod_requests.push(PodRequest {
                    name: event["name"].as_str().unwrap().to_string(),
                    namespace: event["namespace"].as_str().unwrap_or("default").to_string(),
                    node_name: event["node"].as_str().unwrap().to_string(),
                    milli_cpu: event["milli_cpu"].as_i64().unwrap(),
                    milli_gpu: event["milli_gpu"].as_i64().unwrap_or(0),
                    gpu_number: event["gpu_number"].as_i64().unwrap_or(0),
                    gpu_type: event["gpu_type"].as_str().unwrap_or("").to_string(),
                    gpu_indices,
                })
            }
        }
    }
}
