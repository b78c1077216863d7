#![forbid(unsafe_code)]

//! `cinder`: agent session and tasking engine.
//!
//! Registers remote agents as sessions, tracks their liveness, queues and
//! dispatches tasking, correlates asynchronously-returned results, and
//! manages the lifecycle of any number of concurrent listener endpoints.

pub mod codec;
pub mod config;
pub mod errors;
pub mod events;
pub mod listeners;
pub mod models;
pub mod persistence;
pub mod registry;
pub mod tasking;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
