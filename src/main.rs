use std::rc::Rc;

use rand::prelude::*;
use sugars::{rc, refcell};

use gpu_share_simulator::deschedule::{
    DescheduleConfig, Descheduler, DESCHEDULE_POLICY_FRAG_MULTI_POD,
};
use gpu_share_simulator::frag_metrics::CsvMetricsLogger;
use gpu_share_simulator::resources::{Node, Pod, MILLI};
use gpu_share_simulator::sim_cluster::SimulatedCluster;
use gpu_share_simulator::snapshot_loader::SnapshotReader;

fn generate_random_cluster(cluster: &mut SimulatedCluster, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);

    for i in 0..10 {
        cluster.add_node(Node::new(&format!("node_{}", i), 32000, 8, ""));
    }

    // mix of partial, whole-GPU, multi-GPU exclusive and CPU-only pods
    for i in 0..60 {
        let shape = rng.gen_range(0..4);
        let (milli_gpu, gpu_number) = match shape {
            0 => (rng.gen_range(1..10) * 100, 1),
            1 => (MILLI, 1),
            2 => (2 * MILLI, 2),
            _ => (0, 0),
        };
        let milli_cpu = rng.gen_range(1..8) * 500;
        let pod = Rc::new(Pod::new(
            &format!("pod_{}", i),
            "default",
            milli_cpu,
            milli_gpu,
            gpu_number,
        ));
        if cluster.schedule_pod(pod.clone()).is_some() {
            println!("could not place {} during generation", pod.name);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let config = if args.len() > 1 {
        DescheduleConfig::from_file(&args[1])
    } else {
        DescheduleConfig::new(0.2, DESCHEDULE_POLICY_FRAG_MULTI_POD)
    };

    let mut cluster = SimulatedCluster::new(Box::new(CsvMetricsLogger::new()));
    if args.len() > 2 {
        let mut reader = SnapshotReader::new();
        reader.parse(args[2].clone());
        for node_request in &reader.node_requests {
            cluster.add_node(Node::new(
                &node_request.name,
                node_request.milli_cpu,
                node_request.gpu_number,
                &node_request.gpu_type,
            ));
        }
        for pod_request in &reader.pod_requests {
            let pod = Pod::new(
                &pod_request.name,
                &pod_request.namespace,
                pod_request.milli_cpu,
                pod_request.milli_gpu,
                pod_request.gpu_number,
            )
            .with_gpu_type(&pod_request.gpu_type)
            .with_gpu_indices(pod_request.gpu_indices.clone());
            cluster.place_pod(pod, &pod_request.node_name);
        }
    } else {
        generate_random_cluster(&mut cluster, 42);
    }
    cluster.refresh_workload_model();

    let pods_before = cluster.pod_count();
    println!("cluster: {} nodes, {} pods", cluster.node_count(), pods_before);

    let cluster = rc!(refcell!(cluster));
    let mut descheduler = Descheduler::new(cluster.clone(), config);
    match descheduler.deschedule_cluster() {
        Ok(failed_pods) => {
            println!("{} pods still unscheduled after handoff", failed_pods.len());
            for unscheduled in &failed_pods {
                println!("  unscheduled: {} ({})", unscheduled.pod.name, unscheduled.reason);
            }
        }
        Err(err) => eprintln!("deschedule failed: {}", err),
    }

    cluster.borrow_mut().save_metrics("./frag-metrics.csv").unwrap();
}
