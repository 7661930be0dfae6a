//! Client error types.

use thiserror::Error;
use wallet_proto::{Opcode, ProtocolError};

use crate::{transport::TransportError, validate::AmountError};

/// Errors returned by [`crate::Session`] and [`crate::WalletClient`].
///
/// Only structured operations surface transport faults here; plain status
/// operations fold them into an `[ERROR]` sentinel reply instead.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Request needs a logged-in session. Nothing was sent.
    #[error("{opcode} requires a logged in session")]
    AuthenticationRequired {
        /// Opcode that was refused
        opcode: Opcode,
    },

    /// Session already has a user. Nothing was sent.
    #[error("already logged in as {username}; log out first")]
    AlreadyAuthenticated {
        /// User currently logged in
        username: String,
    },

    /// Transfer amount failed local validation. Nothing was sent.
    #[error(transparent)]
    Amount(#[from] AmountError),

    /// Request could not be encoded, or the reply could not be decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Socket fault during a structured request.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Server answered a structured request with a refusal.
    #[error("server refused request: {reason}")]
    Rejected {
        /// Reply text
        reason: String,
    },
}

impl ClientError {
    /// Whether the request never reached the network.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationRequired { .. } | Self::AlreadyAuthenticated { .. } | Self::Amount(_)
        )
    }
}
