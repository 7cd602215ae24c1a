//! Room engine for Lilo shared canvases: rooms, word pieces, operation
//! logs, presence and garbage collection.
//!
//! Nothing in this crate knows about sockets. A transport hands each
//! connection an [`protocol::Outbox`] and drives a [`broadcaster::Broadcaster`].

pub mod broadcaster;
pub mod canvas;
pub mod config;
pub mod error;
pub mod gc;
pub mod oplog;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod room;
pub mod types;
