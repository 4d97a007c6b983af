use std::collections::HashMap;
use std::rc::Rc;

use gpu_share_simulator::bin_packing::BinPackingPlanner;
use gpu_share_simulator::default_score_plugins::fgd_score_plugin::{
    allocate_exclusive_gpu_id, parse_gpu_id, FGDScorePlugin,
};
use gpu_share_simulator::errors::ScoreError;
use gpu_share_simulator::eviction_queue::EvictionPriorityQueue;
use gpu_share_simulator::fragmentation::{
    node_gpu_frag_amount, node_gpu_share_frag_score, pod_distribution_from_pods, sigmoid,
    target_pod_list_from_pods, FragAmount, FragBucket, TargetPod, TargetPodList,
};
use gpu_share_simulator::resources::{
    get_node_resource_map, get_pod_resource, Node, NodeResource, NodeStatus, Pod, MILLI,
};
use gpu_share_simulator::score_plugin::{ScorePlugin, MAX_NODE_SCORE};

fn node_res(name: &str, milli_cpu_left: i64, milli_gpu_left_list: Vec<i64>) -> NodeResource {
    NodeResource {
        node_name: name.to_string(),
        milli_cpu_left,
        milli_gpu_left_list,
        gpu_type: String::new(),
    }
}

fn typical(pods: &[(i64, i64, i64, f64)]) -> Rc<TargetPodList> {
    Rc::new(
        pods.iter()
            .map(|&(milli_cpu, milli_gpu, gpu_number, percentage)| TargetPod {
                res: get_pod_resource(&Pod::new("t", "default", milli_cpu, milli_gpu, gpu_number)),
                percentage,
            })
            .collect(),
    )
}

#[test]
fn test_partial_gpu_scoring_picks_the_only_eligible_slot() {
    let plugin = FGDScorePlugin::new(typical(&[(1000, 500, 1, 1.0)]));
    let node = node_res("n1", 4000, vec![500, 0]);
    let pod = Pod::new("p1", "default", 100, 200, 1);

    let node_score = plugin.score(&node, &pod).unwrap();
    assert_eq!(node_score.gpu_id, Some("0".to_string()));
}

#[test]
fn test_empty_request_scores_maximum() {
    let plugin = FGDScorePlugin::new(typical(&[(1000, 500, 1, 1.0)]));
    let node = node_res("n1", 4000, vec![1000, 1000]);
    let pod = Pod::new("empty", "default", 0, 0, 0);

    let node_score = plugin.score(&node, &pod).unwrap();
    assert_eq!(node_score.score, MAX_NODE_SCORE);
}

#[test]
fn test_gpu_type_mismatch_is_an_error_not_a_score() {
    let plugin = FGDScorePlugin::new(typical(&[(1000, 500, 1, 1.0)]));
    let mut node = node_res("n1", 4000, vec![1000]);
    node.gpu_type = "V100".to_string();
    let pod = Pod::new("p1", "default", 100, 200, 1).with_gpu_type("A100");

    match plugin.score(&node, &pod) {
        Err(ScoreError::IneligibleNode { node_name, .. }) => assert_eq!(node_name, "n1"),
        other => panic!("expected IneligibleNode, got {:?}", other),
    }
}

#[test]
fn test_partial_gpu_score_is_bounded_and_prefers_frag_reducing_slot() {
    // one target pod wanting a 600m share: a 700m slot serves it, a 300m
    // slot is fragmented
    let typical_pods = typical(&[(1000, 600, 1, 1.0)]);
    let plugin = FGDScorePlugin::new(typical_pods);
    let node = node_res("n1", 8000, vec![700, 300]);
    let pod = Pod::new("p1", "default", 500, 300, 1);

    let node_score = plugin.score(&node, &pod).unwrap();
    assert!(node_score.score >= 0 && node_score.score <= MAX_NODE_SCORE);
    // taking the 300m slot wipes already-fragmented capacity instead of
    // breaking the 700m slot
    assert_eq!(node_score.gpu_id, Some("1".to_string()));
}

#[test]
fn test_frag_score_is_idempotent() {
    let typical_pods = typical(&[(2000, 1000, 1, 0.5), (1000, 300, 1, 0.5)]);
    let node = node_res("n1", 1500, vec![700, 200, 1000]);
    let first = node_gpu_share_frag_score(&node, &typical_pods);
    let second = node_gpu_share_frag_score(&node, &typical_pods);
    assert_eq!(first, second);
}

#[test]
fn test_frag_amount_bucket_classification() {
    // cpu-starved node: every slot's capacity is stranded for a cpu-hungry
    // target
    let typical_pods = typical(&[(4000, 300, 1, 1.0)]);
    let node = node_res("n1", 1000, vec![700, 200]);
    let frag = node_gpu_frag_amount(&node, &typical_pods);

    assert_eq!(frag.get(FragBucket::Q4LackCpu), 700.0);
    assert_eq!(frag.get(FragBucket::Q1LackBoth), 200.0);
    assert_eq!(frag.get(FragBucket::Q3Satisfied), 0.0);
    assert_eq!(frag.frag_amount_sum_except_q3(), 900.0);
}

#[test]
fn test_frag_amount_sum_excludes_q3_only() {
    // Q3 exclusion is a documented policy choice, preserved as-is
    let frag = FragAmount { node_name: "n1".to_string(), data: [1.0, 2.0, 4.0, 8.0] };
    assert_eq!(frag.frag_amount_sum_except_q3(), 11.0);
}

#[test]
fn test_sigmoid_is_bounded_and_monotonic() {
    assert!(sigmoid(-50.0) > 0.0 && sigmoid(-50.0) < 0.5);
    assert_eq!(sigmoid(0.0), 0.5);
    assert!(sigmoid(50.0) > 0.5 && sigmoid(50.0) < 1.0);
    assert!(sigmoid(1.0) > sigmoid(-1.0));
}

#[test]
fn test_eviction_queue_pops_highest_priority_first() {
    let mut queue = EvictionPriorityQueue::new();
    queue.push(FragAmount { node_name: "low".to_string(), data: [10.0, 0.0, 0.0, 0.0] });
    queue.push(FragAmount { node_name: "high".to_string(), data: [300.0, 0.0, 0.0, 0.0] });
    queue.push(FragAmount { node_name: "mid".to_string(), data: [100.0, 0.0, 100.0, 0.0] });

    // q3 does not contribute to the priority
    assert_eq!(queue.pop().unwrap().frag.node_name, "high");
    assert_eq!(queue.pop().unwrap().frag.node_name, "mid");
    assert_eq!(queue.pop().unwrap().frag.node_name, "low");
    assert!(queue.pop().is_none());
}

#[test]
fn test_eviction_queue_breaks_ties_by_insertion_order() {
    let mut queue = EvictionPriorityQueue::new();
    for name in ["first", "second", "third"] {
        queue.push(FragAmount { node_name: name.to_string(), data: [42.0, 0.0, 0.0, 0.0] });
    }
    assert_eq!(queue.pop().unwrap().frag.node_name, "first");
    assert_eq!(queue.pop().unwrap().frag.node_name, "second");
    assert_eq!(queue.pop().unwrap().frag.node_name, "third");
}

#[test]
fn test_eviction_queue_keeps_one_live_entry_per_node() {
    let node_names = ["a", "b", "c"];
    let mut queue = EvictionPriorityQueue::new();
    for name in node_names {
        queue.push(FragAmount { node_name: name.to_string(), data: [100.0, 0.0, 0.0, 0.0] });
    }
    assert_eq!(queue.len(), node_names.len());

    // eviction rounds: pop, evict, push back with the refreshed amount;
    // the queue never grows past the live-node count
    for round in 0..6 {
        let item = queue.pop().unwrap();
        queue.push(FragAmount {
            node_name: item.frag.node_name.clone(),
            data: [item.priority - 30.0, 0.0, 0.0, 0.0],
        });
        assert_eq!(queue.len(), node_names.len(), "round {}", round);
    }

    // a node with no remaining victim is popped and not pushed back
    queue.pop();
    assert_eq!(queue.len(), node_names.len() - 1);
}

#[test]
fn test_exclusive_gpu_allocation_skips_busy_slots() {
    let node = node_res("n1", 8000, vec![1000, 400, 1000]);
    let pod_res = get_pod_resource(&Pod::new("p", "default", 1000, 2000, 2));
    assert_eq!(allocate_exclusive_gpu_id(&node, &pod_res), Some("0,2".to_string()));
    assert_eq!(parse_gpu_id("0,2"), vec![0, 2]);

    let small_node = node_res("n2", 8000, vec![1000, 400]);
    assert_eq!(allocate_exclusive_gpu_id(&small_node, &pod_res), None);
}

#[test]
fn test_node_resource_sub_and_release_round_trip() {
    let node = node_res("n1", 8000, vec![1000, 1000]);
    let pod_res = get_pod_resource(&Pod::new("p", "default", 2000, 1000, 1));

    let after = node.sub(&pod_res).unwrap();
    assert_eq!(after.milli_cpu_left, 6000);
    assert_eq!(after.milli_gpu_left_list, vec![0, 1000]);

    let pod = Pod::new("p", "default", 2000, 1000, 1).with_gpu_indices(vec![0]);
    let restored = after.release(&pod);
    assert_eq!(restored.milli_cpu_left, 8000);
    assert_eq!(restored.milli_gpu_left_list, vec![1000, 1000]);
}

#[test]
fn test_node_resource_sub_spreads_multi_gpu_shares_over_distinct_slots() {
    // two GPUs at 500m each must land on two different slots, matching the
    // id allocator's notion of distinct GPUs
    let node = node_res("n1", 8000, vec![1000, 1000]);
    let pod_res = get_pod_resource(&Pod::new("p", "default", 1000, 1000, 2));
    let after = node.sub(&pod_res).unwrap();
    assert_eq!(after.milli_gpu_left_list, vec![500, 500]);
    assert_eq!(allocate_exclusive_gpu_id(&node, &pod_res), Some("0,1".to_string()));

    // a single slot cannot serve both shares even though it has the total
    let single_slot = node_res("n2", 8000, vec![1000]);
    assert!(single_slot.sub(&pod_res).is_err());
    assert_eq!(allocate_exclusive_gpu_id(&single_slot, &pod_res), None);
}

#[test]
fn test_node_resource_sub_fails_on_insufficient_capacity() {
    let node = node_res("n1", 1000, vec![500]);
    let pod_res = get_pod_resource(&Pod::new("p", "default", 2000, 0, 0));
    assert!(node.sub(&pod_res).is_err());

    let gpu_pod_res = get_pod_resource(&Pod::new("p", "default", 500, 1000, 1));
    assert!(node.sub(&gpu_pod_res).is_err());
}

#[test]
fn test_node_resource_map_deducts_per_slot() {
    let node = Rc::new(Node::new("n1", 8000, 2, ""));
    let pods = vec![Rc::new(
        Pod::new("p1", "default", 2000, 300, 1).with_gpu_indices(vec![1]),
    )];
    let node_res_map = get_node_resource_map(&[NodeStatus::new(node, pods)]);

    let res = &node_res_map["n1"];
    assert_eq!(res.milli_cpu_left, 6000);
    assert_eq!(res.milli_gpu_left_list, vec![1000, 700]);
}

#[test]
fn test_workload_model_derivation() {
    let pods = vec![
        Rc::new(Pod::new("a", "default", 1000, 500, 1)),
        Rc::new(Pod::new("b", "default", 1000, 500, 1)),
        Rc::new(Pod::new("c", "default", 2000, 2 * MILLI, 2)),
        Rc::new(Pod::new("d", "default", 500, 0, 0)),
    ];

    let typical_pods = target_pod_list_from_pods(&pods);
    assert_eq!(typical_pods.len(), 3);
    let shared = typical_pods.iter().find(|t| t.res.milli_gpu == 500).unwrap();
    assert_eq!(shared.percentage, 0.5);

    let distribution = pod_distribution_from_pods(&pods);
    // partial pods land in bucket 0 together with cpu-only pods
    assert_eq!(distribution[&0], 0.75);
    assert_eq!(distribution[&2], 0.25);
}

#[test]
fn test_bin_packing_planner_accounts_hypothetical_placements() {
    // two identical pods; after the first eviction the tight node fills up,
    // so the second pod must pick the other node
    let nodes = vec![
        NodeStatus::new(Rc::new(Node::new("tight", 8000, 1, "")), vec![]),
        NodeStatus::new(Rc::new(Node::new("roomy", 8000, 2, "")), vec![]),
    ];
    let mut node_res_map = get_node_resource_map(&nodes);
    node_res_map.get_mut("tight").unwrap().milli_gpu_left_list = vec![600];

    let mut pod_map = HashMap::default();
    for name in ["p1", "p2"] {
        pod_map.insert(
            format!("default/{}", name),
            Rc::new(Pod::new(name, "default", 1000, 600, 1)),
        );
    }

    let mut deleted = Vec::default();
    let planner = BinPackingPlanner::default();
    let keys = planner.plan(2, &nodes, &node_res_map, &pod_map, &HashMap::default(), &mut |pod| {
        deleted.push(pod.name.clone());
        Ok(())
    });

    assert_eq!(keys.len(), 2);
    assert_eq!(deleted.len(), 2);
    // the planner's working copy, not the snapshot, absorbed the deductions
    assert_eq!(node_res_map["tight"].milli_gpu_left_list, vec![600]);
}
