//! Wallet protocol vocabulary.
//!
//! The wallet speaks a plaintext, line-oriented protocol over TCP: the client
//! sends one whitespace-separated command line (`OPCODE arg1 arg2 ...`) and the
//! server answers with free text. This crate owns every piece of that contract
//! so that neither the client nor the server hand-rolls string handling:
//!
//! - [`Opcode`] and [`Command`]: typed command lines and their encoding
//! - [`Response`]: raw reply text plus the status conventions layered on it
//!   (success marker, `[ERROR]` sentinel)
//! - [`bulk`]: the `SHOW_ALL_USERS` document grammar (decoder and encoder)
//! - [`history`] and [`stats`]: the `HISTORY` and `ADMIN_STATS` replies
//! - [`reply`]: the literal reply texts the server emits
//!
//! Nothing here performs I/O.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod amount;
pub mod bulk;
mod command;
mod errors;
pub mod history;
mod opcode;
pub mod reply;
pub mod stats;
mod status;

pub use bulk::{AllUsers, BulkDecoder, DecoderState, TransactionRecord, UserRecord, decode_all_users};
pub use command::{Command, LINE_TERMINATOR};
pub use errors::{ParseErrorKind, ProtocolError, Result};
pub use opcode::Opcode;
pub use stats::{AdminStats, SenderActivity, decode_admin_stats};
pub use status::{ERROR_SENTINEL, Response, SUCCESS_MARKER, is_success};

/// Default TCP port of the wallet server.
pub const DEFAULT_PORT: u16 = 8080;
