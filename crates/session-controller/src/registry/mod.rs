//! Canonical state registries owned by the session actor.

mod attendees;
mod connections;

pub use attendees::AttendeeRegistry;
pub use connections::{Binding, ConnectionRegistry};
