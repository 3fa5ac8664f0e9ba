//! Roomcast: a real-time fan-out hub for persistent client connections.
//!
//! Connections join a room under an identity. A single [`hub::Hub`] task owns
//! membership and pushes every event onto the bounded outbound queue of each
//! recipient; per-connection read and write pumps move frames between those
//! queues and the network. Slow or silent peers are evicted instead of being
//! allowed to hold up anyone else.

pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod relay;
pub mod router;

pub use connection::{Connection, ConnectionState, Frame};
pub use error::{EnqueueError, ExitReason};
pub use hub::{Hub, HubStats, MembershipSnapshot};
pub use relay::RoomRelay;
pub use router::MessageRouter;
