//! Win rate driver diagnostics: metrics, per-period driver models and the
//! revenue-weighted driver ranking built on top of them.

pub mod actions;
pub mod config;
pub mod encoding;
pub mod engine;
pub mod error;
pub mod features;
pub mod fitter;
pub mod insights;
pub mod loader;
pub mod metrics;
pub mod models;
pub mod period;
pub mod ranker;
pub mod report;
pub mod risk;
pub mod trend;
