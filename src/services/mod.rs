//! Service layer: board lifecycle, object operations, presence pipeline, and
//! background persistence. Everything here is dispatched from websocket
//! frames; nothing in this layer knows about sockets or frame encoding.

pub mod board;
pub mod object;
pub mod persistence;
pub mod presence;
