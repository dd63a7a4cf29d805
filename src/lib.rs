#![forbid(unsafe_code)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod diff;
pub mod error;
pub mod fetch;
pub mod key;
pub mod logging;
pub mod model;
pub mod orchestrator;
pub mod reconcile;
pub mod store;
