//! Listener lifecycle management and check-in endpoints.

pub mod endpoint;
pub mod manager;
pub mod profile;
