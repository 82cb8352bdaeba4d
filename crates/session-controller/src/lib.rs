//! Beacon Session Controller
//!
//! The authoritative in-memory session server for a live multi-party
//! meeting: it tracks who is present, which room each attendee occupies,
//! who holds presentation control, and propagates every state change
//! consistently to all connected clients.
//!
//! # Architecture
//!
//! Each session is one actor owning all of its mutable state:
//!
//! ```text
//! SessionActor (one per live meeting)
//! ├── SessionContext (attendee/room/connection registries, settings)
//! ├── MutationPipeline (ordered approver chain: role → room → media)
//! ├── RoomEngine (moves, removal drains, presenter cache, auto-close)
//! ├── TimerRegistry (keyed cancelable timers: grace, watchdog, auto-close)
//! └── EventRouter (explicit event-name → handler registry)
//! ```
//!
//! The actor mailbox serializes every mutation: one message, including any
//! async sub-work its handler awaits, runs to completion before the next.
//! Sessions share nothing; many run as independent instances.
//!
//! # Key design decisions
//!
//! - **Everything through the pipeline**: attendee fields change only via
//!   [`pipeline::MutationPipeline`], whose approver chain is a statically
//!   ordered list (ordering is load-bearing; the unordered change fan-out
//!   is notification-only).
//! - **Fire-and-forget collaborators**: directory, export, audit, and
//!   snapshot calls never roll back committed in-memory state.
//! - **Keyed cancelable timers**: every deferred action is armed under a
//!   per-attendee/per-room key, so a superseding event cancels exactly the
//!   right timer.
//!
//! # Modules
//!
//! - [`actors`] - session actor, handle, and mailbox messages
//! - [`pipeline`] - the mutation-approval pipeline and standard approvers
//! - [`rooms`] - room registry and consistency engine
//! - [`baton`] - floor-control derivation
//! - [`media`] - the mic/cam decision table and its approver
//! - [`timers`] - keyed cancelable one-shot timers
//! - [`events`] - inbound event routing
//! - [`outbound`] - typed outbound events and the transport seam
//! - [`services`] - external collaborator traits
//! - [`config`] - process-level tuning from environment variables
//! - [`errors`] - error types with client-safe reject codes

pub mod actors;
pub mod baton;
pub mod config;
pub mod context;
pub mod errors;
pub mod events;
pub mod media;
pub mod metrics;
pub mod outbound;
pub mod pipeline;
pub mod registry;
pub mod rooms;
pub mod services;
pub mod timers;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;
