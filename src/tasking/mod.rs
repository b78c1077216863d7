//! Tasking queue, dispatcher, and result correlation.

pub mod dispatcher;
pub mod queue;
pub mod results;
