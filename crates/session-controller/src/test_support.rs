//! Crate-internal test fixtures. Richer mocks live in `sc-test-utils`.

use async_trait::async_trait;

use crate::context::SessionContext;
use crate::errors::RejectCode;
use crate::outbound::{Outbound, SessionEvent};

/// Outbound sink that drops everything.
pub(crate) struct NullOutbound;

#[async_trait]
impl Outbound for NullOutbound {
    async fn send(&self, _connection_id: &str, _event: &SessionEvent) {}
    async fn close(&self, _connection_id: &str, _code: RejectCode) {}
}

/// A context with the main room already normalized in.
pub(crate) fn ctx_with_main_room(session_id: &str) -> SessionContext {
    let mut ctx = SessionContext::new(session_id);
    let settings = ctx.settings.clone();
    ctx.rooms.normalize(&settings);
    ctx
}
