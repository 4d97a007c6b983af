pub mod fgd_score_plugin;
