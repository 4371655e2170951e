pub mod alerts;
pub mod autofollow;
pub mod cli;
pub mod command;
pub mod config;
pub mod decision;
pub mod http;
pub mod lsn;
pub mod member_prober;
pub mod model;
pub mod monitor;
pub mod node_map;
pub mod observer_prober;
pub mod pgutil;
pub mod publisher;
pub mod statsd;
pub mod supervisor;
