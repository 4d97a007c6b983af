use std::io::Error;
use serde::Serialize;

use crate::fragmentation::{FragAmount, FragBucket};
use crate::resources::NodeResource;

/// One per-node fragmentation record, captured by `cluster_analysis`.
#[derive(Serialize, Clone)]
pub struct FragMetrics {
    pub tag: String,
    pub node_name: String,
    pub milli_cpu_left: i64,
    pub milli_gpu_left: i64,
    pub q1_lack_both: f64,
    pub q2_lack_gpu: f64,
    pub q3_satisfied: f64,
    pub q4_lack_cpu: f64,
    pub frag_amount_sum_except_q3: f64,
}

impl FragMetrics {
    pub fn new(tag: &str, node_res: &NodeResource, frag_amount: &FragAmount) -> Self {
        Self {
            tag: tag.to_string(),
            node_name: node_res.node_name.clone(),
            milli_cpu_left: node_res.milli_cpu_left,
            milli_gpu_left: node_res.milli_gpu_left_total(),
            q1_lack_both: frag_amount.get(FragBucket::Q1LackBoth),
            q2_lack_gpu: frag_amount.get(FragBucket::Q2LackGpu),
            q3_satisfied: frag_amount.get(FragBucket::Q3Satisfied),
            q4_lack_cpu: frag_amount.get(FragBucket::Q4LackCpu),
            frag_amount_sum_except_q3: frag_amount.frag_amount_sum_except_q3(),
        }
    }
}

pub trait MetricsLogger {
    fn log_metrics(&mut self, metrics: FragMetrics);
    fn save_log(&mut self, path: &str) -> Result<(), std::io::Error>;
}

pub struct EmptyMetricsLogger {}

impl MetricsLogger for EmptyMetricsLogger {
    fn log_metrics(&mut self, _metrics: FragMetrics) {}

    fn save_log(&mut self, _path: &str) -> Result<(), Error> {
        Ok(())
    }
}

pub struct StdoutMetricsLogger {}

impl MetricsLogger for StdoutMetricsLogger {
    fn log_metrics(&mut self, metrics: FragMetrics) {
        println!(
            "[{}] {}: cpu left {}m, gpu left {}m, frag sum except q3 {:.1}",
            metrics.tag,
            metrics.node_name,
            metrics.milli_cpu_left,
            metrics.milli_gpu_left,
            metrics.frag_amount_sum_except_q3
        )
    }

    fn save_log(&mut self, _path: &str) -> Result<(), Error> {
        Ok(())
    }
}

/// Collects records in memory and writes them as CSV on save.
pub struct CsvMetricsLogger {
    metrics_history: Vec<FragMetrics>,
}

impl CsvMetricsLogger {
    pub fn new() -> Self {
        Self { metrics_history: Vec::default() }
    }
}

impl Default for CsvMetricsLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsLogger for CsvMetricsLogger {
    fn log_metrics(&mut self, metrics: FragMetrics) {
        self.metrics_history.push(metrics);
    }

    fn save_log(&mut self, path: &str) -> Result<(), Error> {
        let mut writer = csv::Writer::from_path(path)?;
        for metrics in &self.metrics_history {
            writer.serialize(metrics)?;
        }
        writer.flush()?;
        Ok(())
    }
}
