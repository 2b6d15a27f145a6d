//! Client side of the daemon RPC: connect, handshake, request/response.

use std::io::{BufReader, BufWriter};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use serde_json::{Value, json};

use crate::protocol::{Op, PROTOCOL_VERSION, Request, Response, read_frame, write_frame};

/// Default per-request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the daemon client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect to the daemon at {path}: {source}")]
    Connect {
        path: String,
        source: std::io::Error,
    },

    #[error("I/O error talking to the daemon: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol version skew; the caller should restart the daemon.
    #[error("daemon speaks protocol {daemon}, this client expects {client}; restart the daemon")]
    VersionMismatch { daemon: u32, client: u32 },

    #[error("daemon closed the connection mid-request")]
    Disconnected,

    /// The daemon returned a structured error.
    #[error("{code}: {message}")]
    Rpc { code: String, message: String },
}

/// A connected daemon client.
pub struct DaemonClient {
    reader: BufReader<UnixStream>,
    writer: BufWriter<UnixStream>,
    next_id: u64,
}

impl DaemonClient {
    /// Connects and performs the health/version handshake.
    pub fn connect(socket: &Path) -> Result<Self, ClientError> {
        let stream = UnixStream::connect(socket).map_err(|source| ClientError::Connect {
            path: socket.display().to_string(),
            source,
        })?;
        stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
        stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;

        let reader = BufReader::new(stream.try_clone()?);
        let writer = BufWriter::new(stream);
        let mut client = Self {
            reader,
            writer,
            next_id: 1,
        };

        let health = client.call(Op::Health, Value::Null)?;
        let daemon_protocol = health["protocol"].as_u64().unwrap_or(0) as u32;
        if daemon_protocol != PROTOCOL_VERSION {
            return Err(ClientError::VersionMismatch {
                daemon: daemon_protocol,
                client: PROTOCOL_VERSION,
            });
        }
        Ok(client)
    }

    /// Sends one request and waits for its response payload.
    pub fn call(&mut self, op: Op, args: Value) -> Result<Value, ClientError> {
        let id = self.next_id;
        self.next_id += 1;

        write_frame(&mut self.writer, &Request { id, op, args })?;

        let response: Response = read_frame(&mut self.reader)?.ok_or(ClientError::Disconnected)?;
        if response.ok {
            Ok(response.data)
        } else {
            let err = response.error.unwrap_or_else(|| {
                crate::protocol::RpcError::new("internal", "daemon sent an empty error")
            });
            Err(ClientError::Rpc {
                code: err.code,
                message: err.message,
            })
        }
    }

    /// Asks the daemon to shut down.
    pub fn shutdown(&mut self) -> Result<(), ClientError> {
        self.call(Op::Shutdown, json!({}))?;
        Ok(())
    }
}
