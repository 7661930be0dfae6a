//! High-level client.

use wallet_proto::{
    AdminStats, AllUsers, ProtocolError, Response, TransactionRecord, decode_admin_stats, decode_all_users,
    history::decode_history,
};

use crate::{
    error::ClientError,
    session::{Request, Session, SessionConfig},
    transport::{SessionClient, TransportConfig},
};

/// One user session over one connection.
///
/// Status operations (`signup`, `login`, `balance`, `transfer`, `history`)
/// return the server's reply verbatim, or an `[ERROR]` sentinel reply on a
/// transport fault. They only fail when a local precondition does, in which
/// case nothing is sent.
///
/// Structured operations (`all_users`, `admin_stats`, `history_records`)
/// decode the reply and fail on transport faults, refusals and malformed
/// replies.
#[derive(Debug)]
pub struct WalletClient {
    transport: SessionClient,
    session: Session,
}

impl WalletClient {
    /// Disconnected, logged-out client.
    pub fn new(transport: TransportConfig, session: SessionConfig) -> Self {
        Self { transport: SessionClient::new(transport), session: Session::new(session) }
    }

    /// Client for a local server with default limits.
    pub fn development() -> Self {
        Self::new(TransportConfig::development(), SessionConfig::default())
    }

    /// Login state.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// User the server accepted, if any.
    pub fn authenticated_user(&self) -> Option<&str> {
        self.session.authenticated_user()
    }

    /// Whether a connection is open.
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Open the connection now instead of on first request.
    ///
    /// # Errors
    ///
    /// `Transport` if the server cannot be reached.
    pub fn connect(&mut self) -> Result<(), ClientError> {
        Ok(self.transport.connect()?)
    }

    /// Close the connection. The server drops the login with it.
    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        self.session.connection_lost();
    }

    /// Log out and close the connection. Returns the user that was logged in.
    pub fn logout(&mut self) -> Option<String> {
        let user = self.session.logout();
        self.transport.disconnect();
        user
    }

    /// Send any request and return the reply text.
    ///
    /// # Errors
    ///
    /// Local precondition failures only; see [`Session::prepare`].
    pub fn send(&mut self, request: &Request) -> Result<Response, ClientError> {
        let command = self.session.prepare(request)?;
        let response = self.transport.execute(&command);
        self.settle(request, &response);
        Ok(response)
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// `Protocol` if a field is empty or contains whitespace.
    pub fn signup(&mut self, username: &str, password: &str) -> Result<Response, ClientError> {
        self.send(&Request::Signup { username: username.to_string(), password: password.to_string() })
    }

    /// Log in. On a success reply the session becomes authenticated as
    /// `username`.
    ///
    /// # Errors
    ///
    /// `AlreadyAuthenticated` if a user is logged in; nothing is sent.
    pub fn login(&mut self, username: &str, password: &str) -> Result<Response, ClientError> {
        self.send(&Request::Login { username: username.to_string(), password: password.to_string() })
    }

    /// Own balance.
    ///
    /// # Errors
    ///
    /// `AuthenticationRequired` if logged out.
    pub fn balance(&mut self) -> Result<Response, ClientError> {
        self.send(&Request::Balance)
    }

    /// Transfer `amount` (as typed) to `receiver`.
    ///
    /// # Errors
    ///
    /// `AuthenticationRequired` if logged out, `Amount` if the amount is not
    /// a positive number within the transfer limit.
    pub fn transfer(&mut self, receiver: &str, amount: &str) -> Result<Response, ClientError> {
        self.send(&Request::Transfer { receiver: receiver.to_string(), amount: amount.to_string() })
    }

    /// Own history as reply text.
    ///
    /// # Errors
    ///
    /// `AuthenticationRequired` if logged out.
    pub fn history(&mut self) -> Result<Response, ClientError> {
        self.send(&Request::History)
    }

    /// Own history, decoded. Lines that are not transfers are skipped.
    ///
    /// # Errors
    ///
    /// `AuthenticationRequired`, `Transport` or `Rejected`.
    pub fn history_records(&mut self) -> Result<Vec<TransactionRecord>, ClientError> {
        self.structured(&Request::History, |text| Ok(decode_history(text)))
    }

    /// Every account with its transfers. Admin only.
    ///
    /// # Errors
    ///
    /// `AuthenticationRequired`, `Transport`, `Rejected` for non-admins, or
    /// `Protocol` if the dump is malformed. A dump larger than the reply cap
    /// is `Transport(Truncated)`, never a partial result.
    pub fn all_users(&mut self) -> Result<AllUsers, ClientError> {
        self.structured(&Request::ShowAllUsers, decode_all_users)
    }

    /// Aggregate statistics. Admin only.
    ///
    /// # Errors
    ///
    /// As for [`Self::all_users`].
    pub fn admin_stats(&mut self) -> Result<AdminStats, ClientError> {
        self.structured(&Request::AdminStats, decode_admin_stats)
    }

    /// Send a line exactly as typed. Debugging aid: the session does not
    /// learn from the reply, so a raw `LOGIN` leaves it logged out.
    pub fn raw(&mut self, line: &str) -> Response {
        let response = self.transport.execute_line(line);
        if !self.transport.is_connected() {
            self.session.connection_lost();
        }
        response
    }

    fn structured<T>(
        &mut self,
        request: &Request,
        decode: impl FnOnce(&str) -> Result<T, ProtocolError>,
    ) -> Result<T, ClientError> {
        let command = self.session.prepare(request)?;

        let response = match self.transport.try_execute(&command) {
            Ok(response) => response,
            Err(err) => {
                self.session.connection_lost();
                return Err(err.into());
            },
        };
        self.settle(request, &response);

        if response.is_unauthorized() || response.is_login_required() {
            return Err(ClientError::Rejected { reason: response.text().trim().to_string() });
        }

        Ok(decode(response.text())?)
    }

    fn settle(&mut self, request: &Request, response: &Response) {
        if self.transport.is_connected() {
            self.session.observe(request, response);
        } else {
            self.session.connection_lost();
        }
    }
}
