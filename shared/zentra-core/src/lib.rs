//! Zentra Core - Shared domain types and service infrastructure
//!
//! This crate provides:
//! - Standard service trait every Zentra service implements
//! - Caller identity and role types passed into authorization checks
//! - Money helpers shared by the ledger and investment code
//! - Error handling, retry policy and configuration utilities

pub mod config;
pub mod domain;
pub mod error;
pub mod retry;
pub mod service;

pub use config::ServiceConfig;
pub use domain::*;
pub use error::{Result, ZentraError};
pub use retry::RetryPolicy;
pub use service::{DependencyStatus, HealthStatus, MicroserviceRuntime, ReadinessStatus, ZentraService};
