// Common library for the build-job scheduler and the worker binary

pub mod activity;
pub mod batch;
pub mod bootstrap;
pub mod config;
pub mod errors;
pub mod executor;
pub mod jobs;
pub mod models;
pub mod telemetry;
