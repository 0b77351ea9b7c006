//! Reconciles Jenkins build history into a local store and runs pluggable
//! anomaly detectors over the stored build metrics.

pub mod anomaly;
pub mod auth;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod providers;
pub mod sentinel;
pub mod store;
pub mod sync;

pub use sentinel::{CycleReport, Sentinel};
