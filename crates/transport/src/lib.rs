//! Reference transports for [`requestify`].
//!
//! Implements the [`requestify::Transport`] port twice:
//!
//! - [`MemoryTransport`]: an in-process connected pair, used by tests and by
//!   applications that correlate between tasks of one process.
//! - [`StreamTransport`]: newline-delimited JSON over any Tokio byte stream
//!   (TCP, Unix domain sockets, in-memory duplex pipes).
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Framing, connection handling, and stream lifecycle live
//! here. The [`requestify`] crate sees only the [`requestify::Transport`]
//! trait and never depends on this crate.

pub mod memory;
pub mod stream;

pub use memory::MemoryTransport;
pub use stream::StreamTransport;
