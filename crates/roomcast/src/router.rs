//! Seam between connections and application logic.

use std::sync::Arc;

use async_trait::async_trait;
use roomcast_protocol::InboundMessage;

use crate::connection::Connection;

/// Application callbacks invoked by a connection's read pump.
///
/// Each call runs under the hub's `router_timeout`. Implementations must
/// return quickly and move slow work (model calls, persistence) onto their
/// own tasks, publishing results through the [`Hub`](crate::hub::Hub).
#[async_trait]
pub trait MessageRouter: Send + Sync {
    /// A `message` frame arrived on `conn`.
    async fn on_message(&self, conn: &Arc<Connection>, message: InboundMessage)
    -> anyhow::Result<()>;

    /// A `typing` frame arrived on `conn`.
    async fn on_typing(&self, conn: &Arc<Connection>) -> anyhow::Result<()>;

    /// `conn` has left the hub. Called once per connection.
    async fn on_disconnect(&self, conn: &Arc<Connection>);
}
