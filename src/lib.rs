//! Library crate for reach-scan-rs exposing the probe engine and its export pipeline.
pub mod aggregator;
pub mod error;
pub mod export;
pub mod logging;
pub mod ports;
pub mod probe;
pub mod scanner;
pub mod targets;
pub mod types;
