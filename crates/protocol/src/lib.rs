//! Wire types shared by the minimap producer and the web server.
//!
//! The only payload on the wire is the [`StateSnapshot`] JSON document, which
//! is returned by `GET /state` and pushed as a WebSocket text frame on every
//! broadcast.

mod snapshot;

pub use snapshot::StateSnapshot;
