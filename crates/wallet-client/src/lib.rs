//! Client
//!
//! Blocking client for the wallet protocol. One [`WalletClient`] owns one TCP
//! connection and at most one logged-in user.
//!
//! # Architecture
//!
//! The client is split the same way the server is: a pure state machine and a
//! thin I/O layer.
//!
//! - [`Session`]: tracks the authenticated user and turns [`Request`]s into
//!   wire [`Command`]s, refusing those whose preconditions fail (logging in
//!   twice, privileged requests while logged out, invalid transfer amounts).
//!   No I/O.
//! - [`SessionClient`]: owns the socket. Sends one command line, reads one
//!   reply, and reports transport faults as an `[ERROR] ...` sentinel
//!   [`Response`] instead of an error.
//! - [`WalletClient`]: glues the two together and decodes structured replies.
//!
//! The connection is session-lived: it is opened on first use and kept until
//! [`WalletClient::logout`], [`WalletClient::disconnect`] or a transport fault.
//! The server binds login state to the connection, so losing the connection
//! also ends the [`Session`]'s login.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod session;
pub mod shell;
pub mod transport;
mod validate;
mod wallet;

pub use error::ClientError;
pub use session::{Request, Session, SessionConfig};
pub use transport::{ResponseFraming, SessionClient, TransportConfig, TransportError};
pub use validate::{AmountError, DEFAULT_TRANSFER_LIMIT, validate_amount};
pub use wallet::WalletClient;
pub use wallet_proto::{AdminStats, AllUsers, Command, Opcode, Response, TransactionRecord, UserRecord};
