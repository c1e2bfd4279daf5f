// Common library for the ingestion scheduler and its tests

pub mod backup;
pub mod config;
pub mod errors;
pub mod executor;
pub mod index;
pub mod models;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod telemetry;
pub mod validation;
