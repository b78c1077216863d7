//! Domain model types.

pub mod filter;
pub mod listener;
pub mod module;
pub mod session;
pub mod task;
