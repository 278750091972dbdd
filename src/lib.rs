//! Watches a university grade portal for one account and pushes
//! notifications when course grades appear or change between runs.

pub mod config;
pub mod model;
pub mod notify;
pub mod portal;
pub mod store;
pub mod watcher;
