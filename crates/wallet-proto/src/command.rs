//! Command lines.
//!
//! A command is one line of whitespace-separated tokens: `OPCODE arg1 arg2 ...`.
//! Tokens are not escaped, so [`Command`] refuses any token that is empty or
//! contains whitespace rather than letting the server split it differently
//! from what the caller meant.

use std::fmt;

use crate::{
    Opcode,
    errors::{ProtocolError, Result},
};

/// Line terminator appended by [`Command::encode`].
pub const LINE_TERMINATOR: char = '\n';

/// A validated command line.
///
/// # Invariants
///
/// - Every argument is non-empty and free of whitespace.
/// - The argument count lies within [`Opcode::arity`].
#[derive(Clone, PartialEq, Eq)]
pub struct Command {
    opcode: Opcode,
    args: Vec<String>,
}

impl Command {
    /// Build a command, validating tokens and arity.
    pub fn new<I, S>(opcode: Opcode, args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();

        if let Some(bad) = args.iter().find(|arg| !is_valid_token(arg)) {
            return Err(ProtocolError::InvalidToken { token: bad.clone() });
        }

        let (min, max) = opcode.arity();
        if args.len() < min || args.len() > max {
            return Err(ProtocolError::ArgumentCount { opcode, min, max, found: args.len() });
        }

        Ok(Self { opcode, args })
    }

    /// `SIGNUP user pass`
    pub fn signup(username: &str, password: &str) -> Result<Self> {
        Self::new(Opcode::Signup, [username, password])
    }

    /// `LOGIN user pass`
    pub fn login(username: &str, password: &str) -> Result<Self> {
        Self::new(Opcode::Login, [username, password])
    }

    /// `BALANCE user`
    pub fn balance(username: &str) -> Result<Self> {
        Self::new(Opcode::Balance, [username])
    }

    /// `TRANSFER sender receiver amount`
    pub fn transfer(sender: &str, receiver: &str, amount: f64) -> Result<Self> {
        Self::new(Opcode::Transfer, [sender.to_string(), receiver.to_string(), amount.to_string()])
    }

    /// `HISTORY user`
    pub fn history(username: &str) -> Result<Self> {
        Self::new(Opcode::History, [username])
    }

    /// `SHOW_ALL_USERS [user]`
    pub fn show_all_users(requester: Option<&str>) -> Result<Self> {
        Self::new(Opcode::ShowAllUsers, requester)
    }

    /// `ADMIN_STATS [user]`
    pub fn admin_stats(requester: Option<&str>) -> Result<Self> {
        Self::new(Opcode::AdminStats, requester)
    }

    /// Parse a received line. Surrounding whitespace and runs of inner
    /// whitespace are insignificant.
    pub fn parse(line: &str) -> Result<Self> {
        let mut tokens = line.split_whitespace();
        let opcode: Opcode = tokens.next().ok_or(ProtocolError::EmptyCommand)?.parse()?;
        Self::new(opcode, tokens)
    }

    /// Command opcode.
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Arguments after the opcode.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Argument at `index`, if present.
    pub fn arg(&self, index: usize) -> Option<&str> {
        self.args.get(index).map(String::as_str)
    }

    /// Command line without terminator.
    pub fn to_line(&self) -> String {
        let mut line = String::from(self.opcode.as_str());
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// Wire bytes: the command line followed by [`LINE_TERMINATOR`].
    pub fn encode(&self) -> Vec<u8> {
        let mut line = self.to_line();
        line.push(LINE_TERMINATOR);
        line.into_bytes()
    }

    fn carries_secret(&self) -> bool {
        matches!(self.opcode, Opcode::Signup | Opcode::Login)
    }
}

/// Passwords are redacted so commands can be logged.
impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args: Vec<&str> = self
            .args
            .iter()
            .enumerate()
            .map(|(i, arg)| if self.carries_secret() && i == 1 { "<redacted>" } else { arg.as_str() })
            .collect();
        f.debug_struct("Command").field("opcode", &self.opcode).field("args", &args).finish()
    }
}

fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && !token.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;

    use super::*;

    #[test]
    fn transfer_line_layout() {
        let cmd = Command::transfer("alice", "bob", 12.5).unwrap();
        assert_snapshot!(cmd.to_line(), @"TRANSFER alice bob 12.5");
    }

    #[test]
    fn encode_appends_newline() {
        let cmd = Command::balance("alice").unwrap();
        assert_eq!(cmd.encode(), b"BALANCE alice\n".to_vec());
    }

    #[test]
    fn show_all_users_requester_is_optional() {
        assert_eq!(Command::show_all_users(None).unwrap().to_line(), "SHOW_ALL_USERS");
        assert_eq!(
            Command::show_all_users(Some("admin")).unwrap().to_line(),
            "SHOW_ALL_USERS admin"
        );
    }

    #[test]
    fn whitespace_in_token_is_rejected() {
        let err = Command::signup("bad name", "pw").unwrap_err();
        assert_eq!(err, ProtocolError::InvalidToken { token: "bad name".to_string() });
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(matches!(Command::login("", "pw"), Err(ProtocolError::InvalidToken { .. })));
    }

    #[test]
    fn parse_tolerates_extra_whitespace() {
        let cmd = Command::parse("  LOGIN   alice\tsecret \r\n").unwrap();
        assert_eq!(cmd.opcode(), Opcode::Login);
        assert_eq!(cmd.args(), ["alice", "secret"]);
    }

    #[test]
    fn parse_checks_arity() {
        let err = Command::parse("SIGNUP alice").unwrap_err();
        assert!(matches!(err, ProtocolError::ArgumentCount { opcode: Opcode::Signup, found: 1, .. }));
    }

    #[test]
    fn parse_rejects_blank_and_unknown() {
        assert_eq!(Command::parse("   "), Err(ProtocolError::EmptyCommand));
        assert!(matches!(Command::parse("DEPOSIT 5"), Err(ProtocolError::UnknownOpcode(_))));
    }

    #[test]
    fn debug_output_hides_password() {
        let cmd = Command::login("alice", "hunter2").unwrap();
        let debug = format!("{cmd:?}");
        assert!(debug.contains("alice"));
        assert!(!debug.contains("hunter2"));
    }
}
