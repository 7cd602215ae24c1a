//! WebSocket transport for Lilo rooms.
//!
//! Each socket is a thin adapter: frames are decoded into
//! [`lilo_core::protocol::ClientMessage`]s and handed to the shared
//! [`lilo_core::broadcaster::Broadcaster`]; events coming back through the
//! connection's outbox are encoded as JSON text frames.

pub mod connection;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod server;
pub mod state;

pub use server::{router, serve, start_gateway};
pub use state::GatewayState;
