//! Authentication state machine.
//!
//! Pure: no sockets, no clocks. [`Session::prepare`] checks preconditions and
//! builds the wire command; [`Session::observe`] folds the reply back in.
//!
//! # State
//!
//! ```text
//!   LoggedOut ──LOGIN reply "successful"──▶ LoggedIn(user)
//!       ▲                                        │
//!       └──── logout / connection lost / ────────┘
//!             "Please login first."
//! ```

use std::fmt;

use wallet_proto::{Command, Opcode, Response};

use crate::{
    error::ClientError,
    validate::{DEFAULT_TRANSFER_LIMIT, validate_amount},
};

/// Client-side limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Largest transfer sent to the server
    pub transfer_limit: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { transfer_limit: DEFAULT_TRANSFER_LIMIT }
    }
}

/// Something the user asked for.
///
/// The username of authenticated requests is never part of the request; it
/// comes from the session.
#[derive(Clone, PartialEq, Eq)]
pub enum Request {
    /// Create an account
    Signup {
        /// Account name
        username: String,
        /// Plaintext password
        password: String,
    },
    /// Authenticate this connection
    Login {
        /// Account name
        username: String,
        /// Plaintext password
        password: String,
    },
    /// Own balance
    Balance,
    /// Move funds to another account
    Transfer {
        /// Recipient
        receiver: String,
        /// Amount as typed
        amount: String,
    },
    /// Own transfer history
    History,
    /// Every account (admin only)
    ShowAllUsers,
    /// Aggregate statistics (admin only)
    AdminStats,
}

impl Request {
    /// Opcode this request is sent as.
    pub fn opcode(&self) -> Opcode {
        match self {
            Self::Signup { .. } => Opcode::Signup,
            Self::Login { .. } => Opcode::Login,
            Self::Balance => Opcode::Balance,
            Self::Transfer { .. } => Opcode::Transfer,
            Self::History => Opcode::History,
            Self::ShowAllUsers => Opcode::ShowAllUsers,
            Self::AdminStats => Opcode::AdminStats,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signup { username, .. } => {
                f.debug_struct("Signup").field("username", username).finish_non_exhaustive()
            },
            Self::Login { username, .. } => {
                f.debug_struct("Login").field("username", username).finish_non_exhaustive()
            },
            Self::Transfer { receiver, amount } => f
                .debug_struct("Transfer")
                .field("receiver", receiver)
                .field("amount", amount)
                .finish(),
            other => f.write_str(other.opcode().as_str()),
        }
    }
}

/// Login state of one connection.
#[derive(Debug, Clone, Default)]
pub struct Session {
    config: SessionConfig,
    authenticated_user: Option<String>,
}

impl Session {
    /// Logged-out session.
    pub fn new(config: SessionConfig) -> Self {
        Self { config, authenticated_user: None }
    }

    /// Limits in force.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// User the server accepted, if any.
    pub fn authenticated_user(&self) -> Option<&str> {
        self.authenticated_user.as_deref()
    }

    /// Whether a user is logged in.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated_user.is_some()
    }

    /// Build the wire command for `request`.
    ///
    /// # Errors
    ///
    /// - `AlreadyAuthenticated` for a login while logged in
    /// - `AuthenticationRequired` for any other request while logged out,
    ///   signup excepted
    /// - `Amount` if a transfer amount fails validation
    /// - `Protocol` if an argument cannot be sent as a single token
    pub fn prepare(&self, request: &Request) -> Result<Command, ClientError> {
        let command = match request {
            Request::Signup { username, password } => Command::signup(username, password)?,
            Request::Login { username, password } => {
                if let Some(current) = &self.authenticated_user {
                    return Err(ClientError::AlreadyAuthenticated { username: current.clone() });
                }
                Command::login(username, password)?
            },
            Request::Balance => Command::balance(self.require_user(request)?)?,
            Request::Transfer { receiver, amount } => {
                let sender = self.require_user(request)?;
                let amount = validate_amount(amount, self.config.transfer_limit)?;
                Command::transfer(sender, receiver, amount)?
            },
            Request::History => Command::history(self.require_user(request)?)?,
            Request::ShowAllUsers => Command::show_all_users(Some(self.require_user(request)?))?,
            Request::AdminStats => Command::admin_stats(Some(self.require_user(request)?))?,
        };

        Ok(command)
    }

    /// Update login state from the reply to `request`.
    ///
    /// Returns `true` if the state changed.
    pub fn observe(&mut self, request: &Request, response: &Response) -> bool {
        match request {
            Request::Login { username, .. } if response.is_success() => {
                if self.authenticated_user.is_some() {
                    return false;
                }
                tracing::info!(username = %username, "logged in");
                self.authenticated_user = Some(username.clone());
                true
            },
            // Server forgot this connection's login, usually after a reconnect
            _ if response.is_login_required() && self.authenticated_user.is_some() => {
                tracing::info!("server reports no login; clearing session");
                self.authenticated_user = None;
                true
            },
            _ => false,
        }
    }

    /// Forget the logged-in user. Returns who it was.
    pub fn logout(&mut self) -> Option<String> {
        let user = self.authenticated_user.take();
        if let Some(user) = &user {
            tracing::info!(username = %user, "logged out");
        }
        user
    }

    /// The connection carrying this session is gone; so is the server's
    /// record of the login.
    pub fn connection_lost(&mut self) {
        if let Some(user) = self.authenticated_user.take() {
            tracing::debug!(username = %user, "connection lost; login dropped");
        }
    }

    fn require_user(&self, request: &Request) -> Result<&str, ClientError> {
        self.authenticated_user
            .as_deref()
            .ok_or(ClientError::AuthenticationRequired { opcode: request.opcode() })
    }
}
