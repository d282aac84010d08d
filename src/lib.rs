// src/lib.rs

pub mod config;
pub mod constants;
pub mod datastore;
pub mod error;
pub mod flow; // Northbound flow driver and workers
pub mod handle; // Lifecycle handles around remote processes
pub mod monitor;
pub mod poll;
pub mod pool;
pub mod remote; // SSH / local command execution
pub mod results_dir;
pub mod runner;
pub mod sample;
pub mod stats;
pub mod sweep;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;


pub use error::{NstatError, Result};
