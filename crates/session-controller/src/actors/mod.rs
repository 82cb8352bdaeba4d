//! The session actor: one per live meeting, owning all mutable state.

pub mod messages;
pub mod session;

pub use messages::SessionMessage;
pub use session::{SessionActor, SessionActorHandle};
