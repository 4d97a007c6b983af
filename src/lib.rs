pub mod bin_packing;
pub mod cluster;
pub mod default_score_plugins;
pub mod deschedule;
pub mod errors;
pub mod eviction_queue;
pub mod frag_metrics;
pub mod fragmentation;
pub mod resources;
pub mod score_plugin;
pub mod sim_cluster;
pub mod snapshot_loader;
