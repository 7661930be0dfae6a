//! Server driver.
//!
//! Sans-IO core of the server: consumes [`ServerEvent`]s produced by the
//! runtime and returns [`ServerAction`]s for it to execute. Owns the per
//! connection login state and applies every opcode against [`Storage`].
//!
//! Every command line gets exactly one reply. Refusals (bad credentials,
//! missing login, insufficient funds, malformed lines) are replies, not
//! errors; only storage faults escalate, and even those are answered with
//! [`reply::INTERNAL_ERROR`] first.
//!
//! SIGNUP and LOGIN reply in two steps. The line yields a
//! [`ServerAction::DerivePassword`]; the runtime runs the job off the driver
//! and feeds back [`ServerEvent::PasswordDerived`], which produces the reply.

use std::collections::HashMap;

use wallet_proto::{
    AdminStats, Command, Opcode, SenderActivity, TransactionRecord, UserRecord,
    amount::parse_amount, bulk::encode_user_block, history::encode_history, reply,
    stats::TOP_SENDERS,
};

use crate::{
    driver_error::DriverError,
    env::Environment,
    password::{HashedPassword, PasswordError, PasswordJob, PasswordOutcome, PasswordTask, SALT_LEN},
    storage::{Storage, StoredTransaction, StoredUser, TransferOutcome},
};

/// Driver configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Largest single transfer accepted
    pub transfer_limit: f64,
    /// Balance of a new account
    pub initial_balance: f64,
    /// Usernames that receive the admin role when they sign up
    pub admins: Vec<String>,
    /// Longest accepted command line, in bytes
    pub max_command_bytes: usize,
    /// PBKDF2 iterations for new passwords
    pub pbkdf2_iterations: u32,
    /// Maximum concurrent connections
    pub max_connections: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            transfer_limit: 1000.0,
            initial_balance: 1000.0,
            admins: vec!["admin".to_string()],
            max_command_bytes: 1024,
            pbkdf2_iterations: 100_000,
            max_connections: 10_000,
        }
    }
}

impl DriverConfig {
    /// Reject settings the driver cannot operate with.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.transfer_limit.is_finite() && self.transfer_limit > 0.0) {
            return Err(format!("transfer limit must be positive, got {}", self.transfer_limit));
        }
        if !(self.initial_balance.is_finite() && self.initial_balance >= 0.0) {
            return Err(format!("initial balance must not be negative, got {}", self.initial_balance));
        }
        if self.pbkdf2_iterations == 0 {
            return Err("pbkdf2 iterations must be at least 1".to_string());
        }
        if self.max_command_bytes == 0 || self.max_connections == 0 {
            return Err("command and connection limits must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Events that the server driver processes.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A new connection was accepted
    ConnectionAccepted {
        /// Unique connection ID assigned by the runtime
        session_id: u64,
    },

    /// One command line arrived, terminator removed
    LineReceived {
        /// Connection that sent the line
        session_id: u64,
        /// The line
        line: String,
    },

    /// A connection was closed (by peer or error)
    ConnectionClosed {
        /// Connection that was closed
        session_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// A [`ServerAction::DerivePassword`] job finished
    PasswordDerived {
        /// The job as issued
        job: PasswordJob,
        /// What it computed
        outcome: Result<PasswordOutcome, PasswordError>,
    },
}

/// Actions that the server driver produces.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerAction {
    /// Write reply text to a session
    SendToSession {
        /// Target session ID
        session_id: u64,
        /// Reply text, newline terminated
        reply: String,
    },

    /// Close a connection
    CloseConnection {
        /// Session to close
        session_id: u64,
        /// Reason for closure
        reason: String,
    },

    /// Run a key derivation without holding the driver, then report it
    /// back as [`ServerEvent::PasswordDerived`]. The session's reply waits
    /// on it.
    DerivePassword {
        /// Work to run
        job: PasswordJob,
    },

    /// Log a message (for debugging/monitoring)
    Log {
        /// Log level
        level: LogLevel,
        /// Message to log
        message: String,
    },
}

/// Log levels for server actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug information
    Debug,
    /// Informational message
    Info,
    /// Warning
    Warn,
    /// Error
    Error,
}

fn log(level: LogLevel, message: String) -> ServerAction {
    ServerAction::Log { level, message }
}

/// Where a command stands after the driver has looked at it.
enum Step {
    /// Answer now
    Reply(String),
    /// Answer once the key derivation is back
    Derive(PasswordJob),
}

fn job_opcode(job: &PasswordJob) -> Opcode {
    match job.task {
        PasswordTask::Hash { .. } => Opcode::Signup,
        PasswordTask::Verify { .. } => Opcode::Login,
    }
}

/// Per-connection state.
#[derive(Debug, Default)]
struct SessionState {
    /// Logged-in user, bound to this connection only
    user: Option<String>,
}

impl From<StoredTransaction> for TransactionRecord {
    fn from(tx: StoredTransaction) -> Self {
        Self { from: tx.from, to: tx.to, amount: tx.amount, timestamp: tx.timestamp }
    }
}

/// Action-based server driver.
pub struct ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Open connections (session_id → state)
    sessions: HashMap<u64, SessionState>,
    /// Storage backend
    storage: S,
    /// Environment (clock, RNG)
    env: E,
    /// Server configuration
    config: DriverConfig,
}

impl<E, S> ServerDriver<E, S>
where
    E: Environment,
    S: Storage,
{
    /// Create a new server driver.
    pub fn new(env: E, storage: S, config: DriverConfig) -> Self {
        Self { sessions: HashMap::new(), storage, env, config }
    }

    /// Storage backend.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Active configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Number of open connections.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// User logged in on `session_id`, if any.
    pub fn authenticated_user(&self, session_id: u64) -> Option<&str> {
        self.sessions.get(&session_id).and_then(|s| s.user.as_deref())
    }

    /// Process a server event and return actions to execute.
    ///
    /// # Errors
    ///
    /// - `SessionNotFound` for a line on an unknown connection
    /// - `SessionAlreadyExists` if an accepted ID is already open
    pub fn process_event(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, DriverError> {
        match event {
            ServerEvent::ConnectionAccepted { session_id } => {
                self.handle_connection_accepted(session_id)
            },
            ServerEvent::LineReceived { session_id, line } => {
                self.handle_line_received(session_id, &line)
            },
            ServerEvent::ConnectionClosed { session_id, reason } => {
                Ok(self.handle_connection_closed(session_id, &reason))
            },
            ServerEvent::PasswordDerived { job, outcome } => Ok(self.handle_password_derived(&job, outcome)),
        }
    }

    /// Process an event, running any requested key derivation on the calling
    /// thread and feeding its result straight back.
    ///
    /// Never returns [`ServerAction::DerivePassword`]. Meant for tests and
    /// single-threaded harnesses; the runtime derives keys with the driver
    /// unlocked instead.
    ///
    /// # Errors
    ///
    /// As [`Self::process_event`].
    pub fn process_event_inline(&mut self, event: ServerEvent) -> Result<Vec<ServerAction>, DriverError> {
        let mut pending = vec![event];
        let mut actions = Vec::new();

        while let Some(event) = pending.pop() {
            for action in self.process_event(event)? {
                match action {
                    ServerAction::DerivePassword { job } => {
                        let outcome = job.run();
                        pending.push(ServerEvent::PasswordDerived { job, outcome });
                    },
                    other => actions.push(other),
                }
            }
        }

        Ok(actions)
    }

    fn handle_connection_accepted(&mut self, session_id: u64) -> Result<Vec<ServerAction>, DriverError> {
        if self.sessions.contains_key(&session_id) {
            return Err(DriverError::SessionAlreadyExists(session_id));
        }

        if self.sessions.len() >= self.config.max_connections {
            return Ok(vec![
                log(LogLevel::Warn, format!("rejecting session {session_id}: connection limit reached")),
                ServerAction::CloseConnection {
                    session_id,
                    reason: "max connections exceeded".to_string(),
                },
            ]);
        }

        self.sessions.insert(session_id, SessionState::default());

        Ok(vec![log(LogLevel::Debug, format!("session {session_id} accepted"))])
    }

    fn handle_connection_closed(&mut self, session_id: u64, reason: &str) -> Vec<ServerAction> {
        match self.sessions.remove(&session_id) {
            Some(SessionState { user: Some(user) }) => vec![log(
                LogLevel::Info,
                format!("session {session_id} closed ({reason}); {user} logged out"),
            )],
            Some(SessionState { user: None }) => {
                vec![log(LogLevel::Debug, format!("session {session_id} closed ({reason})"))]
            },
            None => Vec::new(),
        }
    }

    fn handle_line_received(&mut self, session_id: u64, line: &str) -> Result<Vec<ServerAction>, DriverError> {
        if !self.sessions.contains_key(&session_id) {
            return Err(DriverError::SessionNotFound(session_id));
        }

        let mut actions = Vec::new();

        let reply = if line.len() > self.config.max_command_bytes {
            actions.push(log(
                LogLevel::Warn,
                format!("session {session_id} sent a {} byte line; limit is {}", line.len(), self.config.max_command_bytes),
            ));
            reply::INVALID_COMMAND.to_string()
        } else {
            match Command::parse(line) {
                Ok(command) => match self.dispatch(session_id, &command, &mut actions) {
                    Ok(Step::Reply(reply)) => reply,
                    Ok(Step::Derive(job)) => {
                        actions.push(ServerAction::DerivePassword { job });
                        return Ok(actions);
                    },
                    Err(err) => {
                        actions.push(log(
                            LogLevel::Error,
                            format!("session {session_id}: {} failed: {err}", command.opcode()),
                        ));
                        reply::INTERNAL_ERROR.to_string()
                    },
                },
                Err(err) => {
                    actions.push(log(LogLevel::Debug, format!("session {session_id}: rejected line: {err}")));
                    reply::INVALID_COMMAND.to_string()
                },
            }
        };

        actions.push(ServerAction::SendToSession { session_id, reply: terminated(reply) });
        Ok(actions)
    }

    fn dispatch(
        &mut self,
        session_id: u64,
        command: &Command,
        actions: &mut Vec<ServerAction>,
    ) -> Result<Step, DriverError> {
        match (command.opcode(), command.args()) {
            (Opcode::Signup, [username, password]) => self.signup(session_id, username, password, actions),
            (Opcode::Login, [username, password]) => self.login(session_id, username, password, actions),
            (Opcode::Signup | Opcode::Login, _) => Ok(Step::Reply(reply::INVALID_COMMAND.to_string())),
            (opcode, args) => self.account_command(session_id, opcode, args, actions).map(Step::Reply),
        }
    }

    /// Commands that act on the logged-in account.
    fn account_command(
        &mut self,
        session_id: u64,
        opcode: Opcode,
        args: &[String],
        actions: &mut Vec<ServerAction>,
    ) -> Result<String, DriverError> {
        let Some(username) = self.authenticated_user(session_id).map(str::to_string) else {
            return Ok(reply::LOGIN_REQUIRED.to_string());
        };

        let Some(account) = self.storage.load_user(&username)? else {
            // Account vanished underneath the session
            if let Some(session) = self.sessions.get_mut(&session_id) {
                session.user = None;
            }
            return Ok(reply::LOGIN_REQUIRED.to_string());
        };

        if opcode.is_privileged() && !account.is_admin {
            actions.push(log(LogLevel::Warn, format!("{username} attempted {opcode} without admin role")));
            return Ok(reply::UNAUTHORIZED.to_string());
        }

        match opcode {
            Opcode::Balance => Ok(reply::balance(account.balance)),
            Opcode::Transfer => self.transfer(&account, args, actions),
            Opcode::History => self.history(&account.username),
            Opcode::ShowAllUsers => self.all_users(),
            Opcode::AdminStats => Ok(self.admin_stats()?.encode()),
            Opcode::Signup | Opcode::Login => Ok(reply::INVALID_COMMAND.to_string()),
        }
    }

    fn signup(
        &self,
        session_id: u64,
        username: &str,
        password: &str,
        actions: &mut Vec<ServerAction>,
    ) -> Result<Step, DriverError> {
        if self.storage.load_user(username)?.is_some() {
            actions.push(log(LogLevel::Info, format!("signup refused: {username} exists")));
            return Ok(Step::Reply(reply::SIGNUP_FAILED.to_string()));
        }

        let mut salt = [0u8; SALT_LEN];
        self.env.random_bytes(&mut salt);
        Ok(Step::Derive(PasswordJob::hash(session_id, username, password, salt, self.config.pbkdf2_iterations)))
    }

    fn login(
        &self,
        session_id: u64,
        username: &str,
        password: &str,
        actions: &mut Vec<ServerAction>,
    ) -> Result<Step, DriverError> {
        if let Some(current) = self.authenticated_user(session_id) {
            actions.push(log(
                LogLevel::Debug,
                format!("session {session_id} already logged in as {current}"),
            ));
            return Ok(Step::Reply(reply::ALREADY_LOGGED_IN.to_string()));
        }

        let Some(account) = self.storage.load_user(username)? else {
            actions.push(log(LogLevel::Info, format!("login failed: unknown user {username}")));
            return Ok(Step::Reply(reply::LOGIN_FAILED.to_string()));
        };

        let stored = HashedPassword { salt: account.salt, hash: account.password_hash };
        Ok(Step::Derive(PasswordJob::verify(session_id, username, password, stored, account.iterations)))
    }

    fn handle_password_derived(
        &mut self,
        job: &PasswordJob,
        outcome: Result<PasswordOutcome, PasswordError>,
    ) -> Vec<ServerAction> {
        let session_id = job.session_id;
        let opcode = job_opcode(job);

        if !self.sessions.contains_key(&session_id) {
            return vec![log(LogLevel::Debug, format!("session {session_id} closed before {opcode} finished"))];
        }

        let mut actions = Vec::new();
        let result = match outcome {
            Ok(PasswordOutcome::Hashed(hashed)) => self.finish_signup(job, hashed, &mut actions),
            Ok(PasswordOutcome::Verified(matched)) => self.finish_login(job, matched, &mut actions),
            Err(err) => Err(err.into()),
        };

        let reply = result.unwrap_or_else(|err| {
            actions.push(log(LogLevel::Error, format!("session {session_id}: {opcode} failed: {err}")));
            reply::INTERNAL_ERROR.to_string()
        });

        actions.push(ServerAction::SendToSession { session_id, reply: terminated(reply) });
        actions
    }

    fn finish_signup(
        &self,
        job: &PasswordJob,
        hashed: HashedPassword,
        actions: &mut Vec<ServerAction>,
    ) -> Result<String, DriverError> {
        let username = &job.username;
        let is_admin = self.config.admins.iter().any(|admin| admin == username);
        let user = StoredUser {
            username: username.clone(),
            salt: hashed.salt,
            password_hash: hashed.hash,
            iterations: job.iterations,
            balance: self.config.initial_balance,
            is_admin,
        };

        // Another connection may have taken the name while the key was derived
        if !self.storage.create_user(&user)? {
            actions.push(log(LogLevel::Info, format!("signup refused: {username} exists")));
            return Ok(reply::SIGNUP_FAILED.to_string());
        }

        let role = if is_admin { " (admin)" } else { "" };
        actions.push(log(LogLevel::Info, format!("{username} signed up{role}")));
        Ok(reply::SIGNUP_OK.to_string())
    }

    fn finish_login(
        &mut self,
        job: &PasswordJob,
        matched: bool,
        actions: &mut Vec<ServerAction>,
    ) -> Result<String, DriverError> {
        let (session_id, username) = (job.session_id, &job.username);

        if let Some(current) = self.authenticated_user(session_id) {
            actions.push(log(
                LogLevel::Debug,
                format!("session {session_id} already logged in as {current}"),
            ));
            return Ok(reply::ALREADY_LOGGED_IN.to_string());
        }

        if !matched {
            actions.push(log(LogLevel::Info, format!("login failed: bad password for {username}")));
            return Ok(reply::LOGIN_FAILED.to_string());
        }

        if self.storage.load_user(username)?.is_none() {
            actions.push(log(LogLevel::Info, format!("login failed: {username} no longer exists")));
            return Ok(reply::LOGIN_FAILED.to_string());
        }

        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.user = Some(username.clone());
        }
        actions.push(log(LogLevel::Info, format!("{username} logged in on session {session_id}")));
        Ok(reply::LOGIN_OK.to_string())
    }

    /// `TRANSFER receiver amount` or `TRANSFER sender receiver amount`.
    fn transfer(
        &self,
        account: &StoredUser,
        args: &[String],
        actions: &mut Vec<ServerAction>,
    ) -> Result<String, DriverError> {
        let (sender, receiver, amount) = match args {
            [receiver, amount] => (None, receiver, amount),
            [sender, receiver, amount] => (Some(sender), receiver, amount),
            _ => return Ok(reply::INVALID_COMMAND.to_string()),
        };

        if sender.is_some_and(|sender| *sender != account.username) {
            return Ok(reply::TRANSFER_SENDER_MISMATCH.to_string());
        }

        let Some(amount) = parse_amount(amount).filter(|amount| *amount > 0.0) else {
            return Ok(reply::TRANSFER_INVALID_AMOUNT.to_string());
        };

        if amount > self.config.transfer_limit {
            return Ok(reply::limit_exceeded(self.config.transfer_limit));
        }

        if *receiver == account.username {
            return Ok(reply::TRANSFER_FAILED.to_string());
        }

        let from = account.username.as_str();
        match self.storage.transfer(from, receiver, amount, &self.env.timestamp())? {
            TransferOutcome::Completed { sender_balance, sequence } => {
                actions.push(log(
                    LogLevel::Info,
                    format!("transfer #{sequence}: {from} sent {amount:.2} to {receiver}; balance {sender_balance:.2}"),
                ));
                Ok(reply::transfer_ok(sender_balance))
            },
            TransferOutcome::InsufficientFunds { balance } => {
                actions.push(log(
                    LogLevel::Info,
                    format!("transfer refused: {from} has {balance:.2}, needs {amount:.2}"),
                ));
                Ok(reply::TRANSFER_FAILED.to_string())
            },
            TransferOutcome::UnknownSender | TransferOutcome::UnknownReceiver => {
                Ok(reply::TRANSFER_FAILED.to_string())
            },
        }
    }

    fn history(&self, username: &str) -> Result<String, DriverError> {
        let records: Vec<TransactionRecord> =
            self.storage.transactions_for(username)?.into_iter().map(Into::into).collect();
        Ok(encode_history(&records))
    }

    fn all_users(&self) -> Result<String, DriverError> {
        let users = self.storage.list_users()?;
        let ledger = self.storage.ledger()?;

        let mut out = String::new();
        for user in users {
            let transactions: Vec<TransactionRecord> = ledger
                .iter()
                .rev()
                .filter(|tx| tx.involves(&user.username))
                .cloned()
                .map(Into::into)
                .collect();
            let record = UserRecord { username: user.username, balance: user.balance };
            encode_user_block(&mut out, &record, &transactions);
        }

        Ok(out)
    }

    fn admin_stats(&self) -> Result<AdminStats, DriverError> {
        let users = self.storage.list_users()?;
        let ledger = self.storage.ledger()?;

        let mut sent: HashMap<&str, u64> = HashMap::new();
        for tx in &ledger {
            *sent.entry(tx.from.as_str()).or_default() += 1;
        }

        let mut ranking: Vec<(&str, u64)> = sent.into_iter().collect();
        ranking.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        ranking.truncate(TOP_SENDERS);

        Ok(AdminStats {
            total_users: users.len() as u64,
            total_balance: users.iter().map(|user| user.balance).sum(),
            total_transactions: ledger.len() as u64,
            top_senders: ranking
                .into_iter()
                .map(|(username, transactions)| SenderActivity {
                    username: username.to_string(),
                    transactions,
                })
                .collect(),
        })
    }
}

fn terminated(mut reply: String) -> String {
    if !reply.ends_with('\n') {
        reply.push('\n');
    }
    reply
}

#[cfg(test)]
mod tests {
    #![allow(clippy::disallowed_types, reason = "Test RNG state")]

    use std::sync::{Arc, Mutex};

    use insta::assert_snapshot;
    use rand::{RngCore, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use wallet_proto::{decode_admin_stats, decode_all_users, history::decode_history};

    use super::*;
    use crate::storage::{ChaoticStorage, MemoryStorage};

    /// Seeded RNG and a frozen clock.
    #[derive(Clone)]
    struct TestEnv {
        rng: Arc<Mutex<ChaCha8Rng>>,
        now: u64,
    }

    impl TestEnv {
        fn new(seed: u64) -> Self {
            Self { rng: Arc::new(Mutex::new(ChaCha8Rng::seed_from_u64(seed))), now: 1_700_000_000 }
        }
    }

    impl Environment for TestEnv {
        fn random_bytes(&self, buffer: &mut [u8]) {
            self.rng.lock().unwrap().fill_bytes(buffer);
        }

        fn wall_clock_secs(&self) -> u64 {
            self.now
        }
    }

    fn config() -> DriverConfig {
        DriverConfig { pbkdf2_iterations: 10, ..DriverConfig::default() }
    }

    fn driver() -> ServerDriver<TestEnv, MemoryStorage> {
        ServerDriver::new(TestEnv::new(7), MemoryStorage::new(), config())
    }

    fn open(driver: &mut ServerDriver<TestEnv, impl Storage>, session_id: u64) {
        driver.process_event(ServerEvent::ConnectionAccepted { session_id }).unwrap();
    }

    fn send(driver: &mut ServerDriver<TestEnv, impl Storage>, session_id: u64, line: &str) -> String {
        let actions = driver
            .process_event_inline(ServerEvent::LineReceived { session_id, line: line.to_string() })
            .unwrap();
        let replies: Vec<&str> = actions
            .iter()
            .filter_map(|action| match action {
                ServerAction::SendToSession { session_id: id, reply } if *id == session_id => {
                    Some(reply.as_str())
                },
                _ => None,
            })
            .collect();
        assert_eq!(replies.len(), 1, "exactly one reply per line");
        replies[0].to_string()
    }

    /// Driver with `alice`, `bob` and `admin` signed up; session 1 logged in as alice.
    fn populated() -> ServerDriver<TestEnv, MemoryStorage> {
        let mut driver = driver();
        open(&mut driver, 1);
        for name in ["alice", "bob", "admin"] {
            assert_eq!(send(&mut driver, 1, &format!("SIGNUP {name} pw-{name}")), "Signup successful!\n");
        }
        assert_eq!(send(&mut driver, 1, "LOGIN alice pw-alice"), "Login successful\n");
        driver
    }

    #[test]
    fn signup_then_login_succeeds() {
        let mut driver = driver();
        open(&mut driver, 1);

        assert!(wallet_proto::is_success(&send(&mut driver, 1, "SIGNUP carol secret")));
        assert!(wallet_proto::is_success(&send(&mut driver, 1, "LOGIN carol secret")));
        assert_eq!(driver.authenticated_user(1), Some("carol"));
    }

    #[test]
    fn duplicate_signup_fails() {
        let mut driver = populated();
        assert_eq!(send(&mut driver, 1, "SIGNUP bob other"), "Signup failed! Username might be taken.\n");
    }

    #[test]
    fn wrong_password_or_unknown_user_fails() {
        let mut driver = populated();
        open(&mut driver, 2);
        assert_eq!(send(&mut driver, 2, "LOGIN bob wrong"), "Login failed\n");
        assert_eq!(send(&mut driver, 2, "LOGIN nobody pw"), "Login failed\n");
        assert_eq!(driver.authenticated_user(2), None);
    }

    #[test]
    fn failure_replies_never_claim_success() {
        let mut driver = populated();
        open(&mut driver, 2);
        for line in ["LOGIN bob wrong", "BALANCE", "SIGNUP bob x", "FROB", "SHOW_ALL_USERS"] {
            assert!(!wallet_proto::is_success(&send(&mut driver, 2, line)), "{line}");
        }
    }

    #[test]
    fn second_login_on_same_connection_is_refused() {
        let mut driver = populated();
        let reply = send(&mut driver, 1, "LOGIN bob pw-bob");
        assert!(!wallet_proto::is_success(&reply));
        assert_eq!(driver.authenticated_user(1), Some("alice"));
    }

    #[test]
    fn login_is_bound_to_the_connection() {
        let mut driver = populated();
        open(&mut driver, 2);
        assert_eq!(send(&mut driver, 2, "BALANCE"), "Please login first.\n");

        driver
            .process_event(ServerEvent::ConnectionClosed { session_id: 1, reason: "eof".into() })
            .unwrap();
        assert_eq!(driver.authenticated_user(1), None);
        assert_eq!(driver.session_count(), 1);
    }

    #[test]
    fn balance_reports_the_logged_in_user() {
        let mut driver = populated();
        assert_eq!(send(&mut driver, 1, "BALANCE alice"), "Balance: ₹1000.00\n");
        // Argument is informational; the session decides
        assert_eq!(send(&mut driver, 1, "BALANCE bob"), "Balance: ₹1000.00\n");
    }

    #[test]
    fn transfer_accepts_both_forms() {
        let mut driver = populated();
        assert_eq!(
            send(&mut driver, 1, "TRANSFER alice bob 100"),
            "Transfer successful! New balance: ₹900.00\n"
        );
        assert_eq!(
            send(&mut driver, 1, "TRANSFER bob 50.5"),
            "Transfer successful! New balance: ₹849.50\n"
        );
        assert_eq!(driver.storage().load_user("bob").unwrap().unwrap().balance, 1150.5);
    }

    #[test]
    fn transfer_refusals() {
        let mut driver = populated();
        let cases = [
            ("TRANSFER bob alice 1", reply::TRANSFER_SENDER_MISMATCH),
            ("TRANSFER bob -5", reply::TRANSFER_INVALID_AMOUNT),
            ("TRANSFER bob ten", reply::TRANSFER_INVALID_AMOUNT),
            ("TRANSFER bob 0", reply::TRANSFER_INVALID_AMOUNT),
            ("TRANSFER alice 5", reply::TRANSFER_FAILED),
            ("TRANSFER ghost 5", reply::TRANSFER_FAILED),
        ];
        for (line, expected) in cases {
            assert_eq!(send(&mut driver, 1, line).trim_end(), expected, "{line}");
        }

        assert_eq!(send(&mut driver, 1, "TRANSFER bob 1500"), "Transaction limit exceeded! Max ₹1000.\n");
        assert!(driver.storage().ledger().unwrap().is_empty());
    }

    #[test]
    fn insufficient_funds_is_refused_atomically() {
        let mut driver = populated();
        for _ in 0..10 {
            send(&mut driver, 1, "TRANSFER bob 100");
        }
        assert_eq!(send(&mut driver, 1, "TRANSFER bob 0.01").trim_end(), reply::TRANSFER_FAILED);

        let users = driver.storage().list_users().unwrap();
        let total: f64 = users.iter().map(|u| u.balance).sum();
        assert_eq!(total, 3000.0);
        assert_eq!(driver.storage().ledger().unwrap().len(), 10);
    }

    #[test]
    fn history_is_newest_first() {
        let mut driver = populated();
        send(&mut driver, 1, "TRANSFER bob 40");
        open(&mut driver, 2);
        send(&mut driver, 2, "LOGIN bob pw-bob");
        send(&mut driver, 2, "TRANSFER alice 5");

        let reply = send(&mut driver, 1, "HISTORY alice");
        assert_snapshot!(reply.trim_end(), @r"
        Transaction History:
        2023-11-14 22:13:20 | From: bob | To: alice | ₹5.00
        2023-11-14 22:13:20 | From: alice | To: bob | ₹40.00
        ");
        assert_eq!(decode_history(&reply).len(), 2);
    }

    #[test]
    fn privileged_opcodes_need_admin() {
        let mut driver = populated();
        assert_eq!(send(&mut driver, 1, "SHOW_ALL_USERS alice"), "Unauthorized. Admin access only.\n");
        assert_eq!(send(&mut driver, 1, "ADMIN_STATS"), "Unauthorized. Admin access only.\n");

        open(&mut driver, 2);
        assert_eq!(send(&mut driver, 2, "SHOW_ALL_USERS"), "Please login first.\n");
    }

    #[test]
    fn bulk_dump_decodes_and_hides_passwords() {
        let mut driver = populated();
        send(&mut driver, 1, "TRANSFER bob 100");
        open(&mut driver, 2);
        send(&mut driver, 2, "LOGIN admin pw-admin");

        let dump = send(&mut driver, 2, "SHOW_ALL_USERS admin");
        assert!(!dump.contains("pw-"));

        let all = decode_all_users(&dump).unwrap();
        let names: Vec<_> = all.users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["alice", "bob", "admin"]);
        assert_eq!(all.users[0].balance, 900.0);
        assert_eq!(all.transactions_for("alice").len(), 1);
        assert_eq!(all.transactions_for("bob").len(), 1);
        assert!(all.transactions_for("admin").is_empty());
    }

    #[test]
    fn admin_stats_ranks_senders() {
        let mut driver = populated();
        send(&mut driver, 1, "TRANSFER bob 1");
        send(&mut driver, 1, "TRANSFER bob 1");
        open(&mut driver, 2);
        send(&mut driver, 2, "LOGIN admin pw-admin");
        send(&mut driver, 2, "TRANSFER bob 1");

        let stats = decode_admin_stats(&send(&mut driver, 2, "ADMIN_STATS")).unwrap();
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.total_balance, 3000.0);
        assert_eq!(stats.total_transactions, 3);
        assert_eq!(
            stats.top_senders,
            vec![
                SenderActivity { username: "alice".into(), transactions: 2 },
                SenderActivity { username: "admin".into(), transactions: 1 },
            ]
        );
    }

    #[test]
    fn malformed_lines_are_invalid_commands() {
        let mut driver = populated();
        for line in ["", "FROB", "login alice pw", "SIGNUP onlyname", "TRANSFER a b c d"] {
            assert_eq!(send(&mut driver, 1, line), "Invalid command!\n", "{line:?}");
        }
    }

    #[test]
    fn overlong_lines_are_refused() {
        let mut driver = populated();
        let line = format!("SIGNUP {} pw", "x".repeat(2000));
        assert_eq!(send(&mut driver, 1, &line), "Invalid command!\n");
        assert!(driver.storage().load_user(&"x".repeat(2000)).unwrap().is_none());
    }

    #[test]
    fn unknown_session_is_an_error() {
        let mut driver = driver();
        let err = driver
            .process_event(ServerEvent::LineReceived { session_id: 9, line: "BALANCE".into() })
            .unwrap_err();
        assert!(matches!(err, DriverError::SessionNotFound(9)));
    }

    #[test]
    fn duplicate_session_id_is_an_error() {
        let mut driver = driver();
        open(&mut driver, 1);
        let err = driver.process_event(ServerEvent::ConnectionAccepted { session_id: 1 }).unwrap_err();
        assert!(matches!(err, DriverError::SessionAlreadyExists(1)));
    }

    #[test]
    fn connection_limit_closes_new_sessions() {
        let mut driver = ServerDriver::new(
            TestEnv::new(1),
            MemoryStorage::new(),
            DriverConfig { max_connections: 1, ..config() },
        );
        open(&mut driver, 1);
        let actions = driver.process_event(ServerEvent::ConnectionAccepted { session_id: 2 }).unwrap();
        assert!(actions.iter().any(|a| matches!(a, ServerAction::CloseConnection { session_id: 2, .. })));
        assert_eq!(driver.session_count(), 1);
    }

    #[test]
    fn storage_faults_get_an_error_reply() {
        let storage = ChaoticStorage::new(MemoryStorage::new(), 1.0);
        let mut driver = ServerDriver::new(TestEnv::new(3), storage, config());
        open(&mut driver, 1);

        let actions = driver
            .process_event_inline(ServerEvent::LineReceived { session_id: 1, line: "SIGNUP alice pw".into() })
            .unwrap();
        assert!(actions.contains(&ServerAction::SendToSession {
            session_id: 1,
            reply: format!("{}\n", reply::INTERNAL_ERROR),
        }));
        assert!(actions.iter().any(|a| matches!(a, ServerAction::Log { level: LogLevel::Error, .. })));
        assert_eq!(driver.storage().inner().user_count().unwrap(), 0);
    }

    #[test]
    fn same_seed_same_salt() {
        let signup = || {
            let mut driver = driver();
            open(&mut driver, 1);
            send(&mut driver, 1, "SIGNUP alice pw");
            driver.storage().load_user("alice").unwrap().unwrap().salt
        };
        assert_eq!(signup(), signup());
    }

    #[test]
    fn config_validation() {
        assert!(DriverConfig::default().validate().is_ok());
        assert!(DriverConfig { transfer_limit: 0.0, ..config() }.validate().is_err());
        assert!(DriverConfig { initial_balance: f64::NAN, ..config() }.validate().is_err());
        assert!(DriverConfig { pbkdf2_iterations: 0, ..config() }.validate().is_err());
    }

    #[test]
    fn admins_are_assigned_at_signup() {
        let driver = populated();
        assert!(driver.storage().load_user("admin").unwrap().unwrap().is_admin);
        assert!(!driver.storage().load_user("alice").unwrap().unwrap().is_admin);
    }

    /// Feed a line and return the derivation job it asks for.
    fn start(driver: &mut ServerDriver<TestEnv, impl Storage>, session_id: u64, line: &str) -> PasswordJob {
        let actions = driver
            .process_event(ServerEvent::LineReceived { session_id, line: line.to_string() })
            .unwrap();
        assert!(
            !actions.iter().any(|a| matches!(a, ServerAction::SendToSession { .. })),
            "reply must wait for the derivation"
        );
        let mut jobs = actions.into_iter().filter_map(|action| match action {
            ServerAction::DerivePassword { job } => Some(job),
            _ => None,
        });
        let job = jobs.next().unwrap();
        assert!(jobs.next().is_none());
        job
    }

    fn finish(driver: &mut ServerDriver<TestEnv, impl Storage>, job: PasswordJob) -> Vec<ServerAction> {
        let outcome = job.run();
        driver.process_event(ServerEvent::PasswordDerived { job, outcome }).unwrap()
    }

    #[test]
    fn other_sessions_are_served_while_a_login_derives() {
        let mut driver = populated();
        open(&mut driver, 2);

        let job = start(&mut driver, 2, "LOGIN bob pw-bob");
        assert_eq!(job.session_id, 2);
        assert!(matches!(job.task, PasswordTask::Verify { .. }));
        assert_eq!(driver.authenticated_user(2), None);

        assert_eq!(send(&mut driver, 1, "BALANCE alice"), "Balance: \u{20b9}1000.00\n");

        let actions = finish(&mut driver, job);
        assert!(actions.contains(&ServerAction::SendToSession { session_id: 2, reply: "Login successful\n".into() }));
        assert_eq!(driver.authenticated_user(2), Some("bob"));
    }

    #[test]
    fn signup_commits_only_after_the_hash_returns() {
        let mut driver = populated();
        let job = start(&mut driver, 1, "SIGNUP carol secret");
        assert!(matches!(job.task, PasswordTask::Hash { .. }));
        assert!(driver.storage().load_user("carol").unwrap().is_none());

        let actions = finish(&mut driver, job);
        assert!(actions.contains(&ServerAction::SendToSession { session_id: 1, reply: "Signup successful!\n".into() }));
        assert!(driver.storage().load_user("carol").unwrap().is_some());
    }

    #[test]
    fn concurrent_signups_for_one_name_admit_one() {
        let mut driver = populated();
        open(&mut driver, 2);
        let first = start(&mut driver, 1, "SIGNUP carol one");
        let second = start(&mut driver, 2, "SIGNUP carol two");

        finish(&mut driver, first);
        let actions = finish(&mut driver, second);
        assert!(actions.contains(&ServerAction::SendToSession {
            session_id: 2,
            reply: "Signup failed! Username might be taken.\n".into(),
        }));

        open(&mut driver, 3);
        assert_eq!(send(&mut driver, 3, "LOGIN carol one"), "Login successful\n");
    }

    #[test]
    fn session_closed_during_derivation_gets_no_reply() {
        let mut driver = populated();
        open(&mut driver, 2);
        let job = start(&mut driver, 2, "LOGIN bob pw-bob");
        driver
            .process_event(ServerEvent::ConnectionClosed { session_id: 2, reason: "eof".into() })
            .unwrap();

        let actions = finish(&mut driver, job);
        assert!(!actions.iter().any(|a| matches!(a, ServerAction::SendToSession { .. })));
        assert_eq!(driver.session_count(), 1);
    }

    #[test]
    fn failed_derivation_is_an_internal_error() {
        let mut driver = populated();
        let job = start(&mut driver, 1, "SIGNUP carol secret");
        let actions = driver
            .process_event(ServerEvent::PasswordDerived { job, outcome: Err(PasswordError::NoIterations) })
            .unwrap();

        assert!(actions.contains(&ServerAction::SendToSession {
            session_id: 1,
            reply: format!("{}\n", reply::INTERNAL_ERROR),
        }));
        assert!(actions.iter().any(|a| matches!(a, ServerAction::Log { level: LogLevel::Error, .. })));
        assert!(driver.storage().load_user("carol").unwrap().is_none());
    }

    #[test]
    fn inline_processing_never_leaks_derivation_jobs() {
        let mut driver = driver();
        open(&mut driver, 1);
        let actions = driver
            .process_event_inline(ServerEvent::LineReceived { session_id: 1, line: "SIGNUP dave pw".into() })
            .unwrap();
        assert!(!actions.iter().any(|a| matches!(a, ServerAction::DerivePassword { .. })));
    }
}
