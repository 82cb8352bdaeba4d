//! # Session Controller Test Utilities
//!
//! Mock collaborators and fixtures for testing sessions without real
//! infrastructure: an in-memory directory, a recording transport, a
//! scriptable exporter, an in-memory snapshot store, and a recording audit
//! bus.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let directory = MockDirectory::new()
//!         .identity("ext-alice", identity("alice", Role::Host));
//!     let transport = RecordingTransport::shared();
//!     let (handle, _task) = SessionActor::spawn(
//!         "session-1",
//!         Config::default(),
//!         services(directory),
//!         transport.clone(),
//!     );
//!     // drive the session...
//! }
//! ```

mod fixtures;
mod mocks;

pub use fixtures::{human_join, identity, service_join, settings_with_capacity};
pub use mocks::{
    FlakyExporter, MemorySnapshotStore, MockDirectory, RecordingAudit, RecordingTransport,
};

use std::sync::Arc;

use session_controller::services::SessionServices;

/// Bundle a mock directory into a full collaborator set.
#[must_use]
pub fn services(directory: MockDirectory) -> SessionServices {
    SessionServices {
        directory: Arc::new(directory),
        exporter: Arc::new(FlakyExporter::always_ok()),
        audit: Arc::new(RecordingAudit::default()),
        snapshot_store: None,
    }
}

/// Bundle with a shared exporter the test keeps a handle to.
#[must_use]
pub fn services_with_exporter(
    directory: MockDirectory,
    exporter: Arc<FlakyExporter>,
) -> SessionServices {
    SessionServices {
        directory: Arc::new(directory),
        exporter,
        audit: Arc::new(RecordingAudit::default()),
        snapshot_store: None,
    }
}
