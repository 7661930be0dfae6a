//! Blocking TCP transport.
//!
//! [`SessionClient`] owns at most one [`TcpStream`]. It connects lazily, keeps
//! the stream for the life of the session, and tears it down on the first
//! fault so the next request starts from a fresh connection.
//!
//! The wire has no length prefix or end-of-reply delimiter. How much of the
//! stream counts as one reply is decided by [`ResponseFraming`]. A reply
//! longer than [`TransportConfig::max_response_bytes`] fails with
//! [`TransportError::Truncated`] and drops the connection, so its tail can
//! never be read as the answer to a later command.

use std::{
    io::{self, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs},
    time::Duration,
};

use thiserror::Error;
use wallet_proto::{Command, DEFAULT_PORT, LINE_TERMINATOR, Response};

/// Connect timeout used by [`TransportConfig::new`].
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read and write timeout used by [`TransportConfig::new`].
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Reply size cap used by [`TransportConfig::new`].
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Reply size cap of a single fixed read.
pub const LEGACY_RESPONSE_BYTES: usize = 4096;

/// Silence that ends a drained reply.
pub const DEFAULT_DRAIN_QUIET: Duration = Duration::from_millis(50);

/// How the end of a reply is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseFraming {
    /// One `read` call; whatever it returns is the reply. Long replies may be
    /// cut short.
    SingleRead,

    /// Block for the first bytes, then keep reading until the peer stays
    /// silent for `quiet` or the size cap is reached.
    Drain {
        /// Idle gap that ends the reply
        quiet: Duration,
    },
}

impl Default for ResponseFraming {
    fn default() -> Self {
        Self::Drain { quiet: DEFAULT_DRAIN_QUIET }
    }
}

/// Where and how to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// `host:port` of the server
    pub address: String,
    /// Connect timeout. `None` blocks until the OS gives up.
    pub connect_timeout: Option<Duration>,
    /// Timeout for the first bytes of a reply. `None` blocks.
    pub read_timeout: Option<Duration>,
    /// Timeout for sending a command. `None` blocks.
    pub write_timeout: Option<Duration>,
    /// Largest accepted reply. A longer one fails with
    /// [`TransportError::Truncated`] and closes the connection.
    pub max_response_bytes: usize,
    /// Reply boundary detection
    pub framing: ResponseFraming,
}

impl TransportConfig {
    /// Bounded timeouts and drained replies for `address`.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            read_timeout: Some(DEFAULT_IO_TIMEOUT),
            write_timeout: Some(DEFAULT_IO_TIMEOUT),
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            framing: ResponseFraming::default(),
        }
    }

    /// Local server on the default port.
    pub fn development() -> Self {
        Self::new(format!("127.0.0.1:{DEFAULT_PORT}"))
    }

    /// No timeouts and a single 4 KiB read, matching the oldest clients.
    pub fn legacy(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: None,
            read_timeout: None,
            write_timeout: None,
            max_response_bytes: LEGACY_RESPONSE_BYTES,
            framing: ResponseFraming::SingleRead,
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Socket faults.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Address did not resolve
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress {
        /// Configured address
        address: String,
        /// Resolver message
        reason: String,
    },

    /// No resolved address accepted the connection
    #[error("connect to {address} failed: {source}")]
    Connect {
        /// Configured address
        address: String,
        /// Last OS error
        #[source]
        source: io::Error,
    },

    /// Operation exceeded its configured timeout
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        /// `connect`, `read` or `write`
        operation: &'static str,
        /// Configured timeout
        after: Duration,
    },

    /// Any other socket error
    #[error("{operation} failed: {source}")]
    Io {
        /// `connect`, `read` or `write`
        operation: &'static str,
        /// OS error
        #[source]
        source: io::Error,
    },

    /// Peer closed before replying
    #[error("connection closed by server")]
    Closed,

    /// Reply exceeded `max_response_bytes`; the connection was dropped
    #[error("reply exceeded {limit} bytes")]
    Truncated {
        /// Configured cap
        limit: usize,
    },
}

impl TransportError {
    /// Whether retrying on a fresh connection may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout { .. } | Self::Closed)
    }
}

fn io_fault(operation: &'static str, source: io::Error, timeout: Option<Duration>) -> TransportError {
    match (source.kind(), timeout) {
        (io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut, Some(after)) => {
            TransportError::Timeout { operation, after }
        },
        _ => TransportError::Io { operation, source },
    }
}

/// One connection to the server.
///
/// Not thread-safe by construction: every method takes `&mut self`, so one
/// command is in flight at a time.
#[derive(Debug)]
pub struct SessionClient {
    config: TransportConfig,
    stream: Option<TcpStream>,
}

impl SessionClient {
    /// Create a disconnected client.
    pub fn new(config: TransportConfig) -> Self {
        Self { config, stream: None }
    }

    /// Active configuration.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open the connection if there is none. A no-op when already connected.
    ///
    /// # Errors
    ///
    /// - `InvalidAddress` if the address does not resolve
    /// - `Connect` / `Timeout` if no resolved address accepts the connection
    pub fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = open_stream(&self.config)?;
        tracing::debug!(address = %self.config.address, "connected");
        self.stream = Some(stream);
        Ok(())
    }

    /// Close the connection. A no-op when already disconnected.
    pub fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            // Peer may already be gone
            let _ = stream.shutdown(Shutdown::Both);
            tracing::debug!(address = %self.config.address, "disconnected");
        }
    }

    /// Send `command` and return the reply.
    ///
    /// Never fails: transport faults come back as an `[ERROR] ...` sentinel
    /// reply and leave the client disconnected.
    pub fn execute(&mut self, command: &Command) -> Response {
        self.try_execute(command).unwrap_or_else(|err| {
            tracing::warn!(opcode = %command.opcode(), error = %err, "request failed");
            Response::error(err)
        })
    }

    /// Send `command` and return the reply, surfacing transport faults.
    ///
    /// # Errors
    ///
    /// Any [`TransportError`]. The connection is closed before returning.
    pub fn try_execute(&mut self, command: &Command) -> Result<Response, TransportError> {
        tracing::trace!(opcode = %command.opcode(), "sending command");
        self.round_trip(&command.encode())
    }

    /// Send a line exactly as typed, without local validation.
    ///
    /// Faults are reported the same way as [`Self::execute`].
    pub fn execute_line(&mut self, line: &str) -> Response {
        let mut bytes = line.trim_end_matches(['\r', '\n']).as_bytes().to_vec();
        bytes.push(LINE_TERMINATOR as u8);

        self.round_trip(&bytes).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "raw request failed");
            Response::error(err)
        })
    }

    fn round_trip(&mut self, request: &[u8]) -> Result<Response, TransportError> {
        self.connect()?;

        match self.exchange(request) {
            Ok((response, peer_closed)) => {
                if peer_closed {
                    tracing::debug!("server closed the connection after replying");
                    self.disconnect();
                }
                Ok(response)
            },
            Err(err) => {
                self.disconnect();
                Err(err)
            },
        }
    }

    fn exchange(&mut self, request: &[u8]) -> Result<(Response, bool), TransportError> {
        let config = &self.config;
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::Closed);
        };

        stream.write_all(request).map_err(|e| io_fault("write", e, config.write_timeout))?;
        stream.flush().map_err(|e| io_fault("write", e, config.write_timeout))?;

        let (body, peer_closed) = read_reply(stream, config)?;
        Ok((Response::new(decode_text(body)), peer_closed))
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn open_stream(config: &TransportConfig) -> Result<TcpStream, TransportError> {
    let addrs: Vec<SocketAddr> = config
        .address
        .to_socket_addrs()
        .map_err(|e| TransportError::InvalidAddress {
            address: config.address.clone(),
            reason: e.to_string(),
        })?
        .collect();

    if addrs.is_empty() {
        return Err(TransportError::InvalidAddress {
            address: config.address.clone(),
            reason: "no addresses resolved".to_string(),
        });
    }

    let stream = match config.connect_timeout {
        None => TcpStream::connect(addrs.as_slice()).map_err(|source| TransportError::Connect {
            address: config.address.clone(),
            source,
        })?,
        Some(timeout) => connect_any(&addrs, timeout, &config.address)?,
    };

    stream.set_nodelay(true).map_err(|e| io_fault("connect", e, None))?;
    stream.set_read_timeout(config.read_timeout).map_err(|e| io_fault("connect", e, None))?;
    stream.set_write_timeout(config.write_timeout).map_err(|e| io_fault("connect", e, None))?;
    Ok(stream)
}

fn connect_any(addrs: &[SocketAddr], timeout: Duration, address: &str) -> Result<TcpStream, TransportError> {
    let mut last = None;

    for addr in addrs {
        match TcpStream::connect_timeout(addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                tracing::trace!(%addr, error = %err, "connect attempt failed");
                last = Some(err);
            },
        }
    }

    match last {
        Some(err) if matches!(err.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
            Err(TransportError::Timeout { operation: "connect", after: timeout })
        },
        Some(source) => Err(TransportError::Connect { address: address.to_string(), source }),
        None => Err(TransportError::InvalidAddress {
            address: address.to_string(),
            reason: "no addresses resolved".to_string(),
        }),
    }
}

/// Read one reply. Returns the bytes and whether the peer closed the stream.
///
/// The buffer holds one byte past the cap so an exact fit is told apart
/// from an overflow.
fn read_reply(stream: &mut TcpStream, config: &TransportConfig) -> Result<(Vec<u8>, bool), TransportError> {
    let limit = config.max_response_bytes.max(1);
    let mut buf = vec![0u8; limit.saturating_add(1)];

    let mut filled = loop {
        match stream.read(&mut buf) {
            Ok(0) => return Err(TransportError::Closed),
            Ok(n) => break n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {},
            Err(err) => return Err(io_fault("read", err, config.read_timeout)),
        }
    };

    let mut peer_closed = false;
    if let ResponseFraming::Drain { quiet } = config.framing {
        let quiet = quiet.max(Duration::from_millis(1));
        stream.set_read_timeout(Some(quiet)).map_err(|e| io_fault("read", e, None))?;
        let drained = drain(stream, &mut buf, &mut filled);
        stream.set_read_timeout(config.read_timeout).map_err(|e| io_fault("read", e, None))?;
        peer_closed = drained?;
    }

    if filled > limit {
        tracing::warn!(limit, "reply exceeded max_response_bytes, dropping connection");
        return Err(TransportError::Truncated { limit });
    }

    buf.truncate(filled);
    Ok((buf, peer_closed))
}

/// Reply bytes as text. An incomplete UTF-8 sequence at the end is cut off
/// rather than replaced; other invalid bytes become U+FFFD.
fn decode_text(mut body: Vec<u8>) -> String {
    match std::str::from_utf8(&body) {
        Ok(_) => {},
        Err(err) if err.error_len().is_none() => body.truncate(err.valid_up_to()),
        Err(_) => return String::from_utf8_lossy(&body).into_owned(),
    }
    String::from_utf8(body).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

fn drain(stream: &mut TcpStream, buf: &mut [u8], filled: &mut usize) -> Result<bool, TransportError> {
    while *filled < buf.len() {
        match stream.read(&mut buf[*filled..]) {
            Ok(0) => return Ok(true),
            Ok(n) => *filled += n,
            Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                break;
            },
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {},
            Err(err) => return Err(io_fault("read", err, None)),
        }
    }

    Ok(false)
}
