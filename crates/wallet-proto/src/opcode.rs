//! Command opcodes.

use std::{fmt, str::FromStr};

use crate::errors::ProtocolError;

/// Leading token of a command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `SIGNUP user pass`
    Signup,
    /// `LOGIN user pass`
    Login,
    /// `BALANCE [user]`
    Balance,
    /// `TRANSFER [sender] receiver amount`
    Transfer,
    /// `HISTORY [user]`
    History,
    /// `SHOW_ALL_USERS [user]`
    ShowAllUsers,
    /// `ADMIN_STATS [user]`
    AdminStats,
}

impl Opcode {
    /// Every opcode, in wire-table order.
    pub const ALL: [Self; 7] = [
        Self::Signup,
        Self::Login,
        Self::Balance,
        Self::Transfer,
        Self::History,
        Self::ShowAllUsers,
        Self::AdminStats,
    ];

    /// Wire spelling.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Signup => "SIGNUP",
            Self::Login => "LOGIN",
            Self::Balance => "BALANCE",
            Self::Transfer => "TRANSFER",
            Self::History => "HISTORY",
            Self::ShowAllUsers => "SHOW_ALL_USERS",
            Self::AdminStats => "ADMIN_STATS",
        }
    }

    /// Look up an opcode by its exact wire spelling.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == token)
    }

    /// Whether the server only answers this opcode on a logged-in connection.
    pub const fn requires_auth(self) -> bool {
        !matches!(self, Self::Signup | Self::Login)
    }

    /// Whether the logged-in user must also hold the admin role.
    pub const fn is_privileged(self) -> bool {
        matches!(self, Self::ShowAllUsers | Self::AdminStats)
    }

    /// Accepted argument count range `(min, max)`.
    pub const fn arity(self) -> (usize, usize) {
        match self {
            Self::Signup | Self::Login => (2, 2),
            Self::Transfer => (2, 3),
            Self::Balance | Self::History | Self::ShowAllUsers | Self::AdminStats => (0, 1),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Opcode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_token(s).ok_or_else(|| ProtocolError::UnknownOpcode(s.to_string()))
    }
}
