//! Daemon lifecycle and the Unix-socket IPC surface.

pub mod ipc;
pub mod lifecycle;

pub use ipc::{IpcServer, MemoryStats, Request, Response};
pub use lifecycle::Daemon;
