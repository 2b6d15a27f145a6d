//! The beads daemon: one per workspace, owning the storage engine and
//! serializing all access behind a unix-socket RPC.

pub mod client;
pub mod protocol;
pub mod server;
pub mod socket;
pub mod startup;
pub mod watcher;

pub use client::{ClientError, DaemonClient};
pub use protocol::{Op, PROTOCOL_VERSION, Request, Response, RpcError};
pub use server::{DaemonState, Server, handle_request, write_crash_report};
pub use socket::socket_path;
pub use startup::{DaemonContext, StartupError, startup};
