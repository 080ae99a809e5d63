pub mod metrics;
pub mod export;
