//! Protocol error types.

use thiserror::Error;

use crate::Opcode;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while building, parsing or decoding protocol text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Command line had no tokens
    #[error("empty command")]
    EmptyCommand,

    /// Leading token is not a known opcode
    #[error("unknown opcode: {0}")]
    UnknownOpcode(String),

    /// A token was empty or contained whitespace.
    ///
    /// The wire format has no escaping, so such a token would be split into
    /// several arguments by the server.
    #[error("invalid token {token:?}: tokens must be non-empty and contain no whitespace")]
    InvalidToken {
        /// Offending token
        token: String,
    },

    /// Wrong number of arguments for the opcode
    #[error("{opcode} takes {min}..={max} argument(s), got {found}")]
    ArgumentCount {
        /// Opcode being built or parsed
        opcode: Opcode,
        /// Minimum accepted arguments
        min: usize,
        /// Maximum accepted arguments
        max: usize,
        /// Arguments actually supplied
        found: usize,
    },

    /// A line of a structured reply did not match its grammar
    #[error("line {line}: {kind}: {text:?}")]
    Parse {
        /// 1-based line number within the reply
        line: usize,
        /// What was wrong with it
        kind: ParseErrorKind,
        /// The trimmed line text
        text: String,
    },
}

impl ProtocolError {
    pub(crate) fn parse(line: usize, kind: ParseErrorKind, text: &str) -> Self {
        Self::Parse { line, kind, text: text.to_string() }
    }
}

/// Reasons a structured reply line is rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// `User:` line without a name
    #[error("user name is empty")]
    EmptyUsername,

    /// `Balance:` line before any `User:` line
    #[error("balance outside a user block")]
    OrphanBalance,

    /// `Transaction History:` line before any `User:` line
    #[error("transaction header outside a user block")]
    OrphanTransactionHeader,

    /// User block ended without a `Balance:` line
    #[error("user block has no balance")]
    MissingBalance,

    /// Amount field is not a finite decimal number
    #[error("amount is not a number")]
    InvalidAmount,

    /// Integer field is not a non-negative integer
    #[error("count is not a number")]
    InvalidCount,

    /// Transaction detail line does not have exactly four fields
    #[error("expected 4 '|'-separated fields, found {0}")]
    FieldCount(usize),

    /// Field does not start with its expected label
    #[error("expected field label {0:?}")]
    MissingLabel(&'static str),
}
