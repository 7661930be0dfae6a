//! The `SHOW_ALL_USERS` document.
//!
//! The bulk dump is a line-oriented text document, one block per user:
//!
//! ```text
//! User: alice
//! Password: ********
//! Balance: ₹960.00
//! Transaction History:
//!   From: alice | To: bob | ₹40.00 | 2025-04-01 10:00:00
//! ```
//!
//! Lines are whitespace-trimmed before matching. Lines that match no rule are
//! skipped so the server may add annotations without breaking clients.
//!
//! # State Machine
//!
//! ```text
//! ┌──────────────┐  User:   ┌─────────────┐  Transaction History:  ┌────────────────────┐
//! │ AwaitingUser │─────────>│ InUserBlock │───────────────────────>│ InTransactionBlock │
//! └──────────────┘          └─────────────┘                        └────────────────────┘
//!                                  ^                User:                    │
//!                                  └─────────────────────────────────────────┘
//! ```
//!
//! `From:` lines only produce records in `InTransactionBlock`. Every malformed
//! line the grammar does recognise fails the whole decode with a
//! [`ProtocolError::Parse`]: partial admin data is worse than none.

use std::collections::HashMap;

use crate::{
    ParseErrorKind,
    amount::{after_last_glyph, format_amount, parse_amount},
    errors::{ProtocolError, Result},
};

/// Starts a user block.
pub const USER_PREFIX: &str = "User:";
/// Credential line, never stored.
pub const PASSWORD_PREFIX: &str = "Password:";
/// Balance line of the open user block.
pub const BALANCE_PREFIX: &str = "Balance:";
/// Opens the transaction list of the current user.
pub const TRANSACTIONS_HEADER: &str = "Transaction History:";
/// First field of a transaction detail line.
pub const FROM_LABEL: &str = "From:";
/// Second field of a transaction detail line.
pub const TO_LABEL: &str = "To:";
/// What the server prints on the `Password:` line.
pub const REDACTED_PASSWORD: &str = "********";

/// A user and their balance as listed in the dump.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRecord {
    /// Account name
    pub username: String,
    /// Balance in currency units
    pub balance: f64,
}

/// One ledger entry as listed under some user's block.
///
/// The same transfer appears under both the sender's and the receiver's
/// block; each appearance is its own record.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    /// Sending account
    pub from: String,
    /// Receiving account
    pub to: String,
    /// Amount in currency units
    pub amount: f64,
    /// Server-formatted time, kept verbatim
    pub timestamp: String,
}

/// Decoded bulk dump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllUsers {
    /// Users in document order
    pub users: Vec<UserRecord>,
    /// Transactions keyed by the user block they were listed in
    pub transactions: HashMap<String, Vec<TransactionRecord>>,
}

impl AllUsers {
    /// Whether the dump listed no users.
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Transactions listed under `username`'s block.
    pub fn transactions_for(&self, username: &str) -> &[TransactionRecord] {
        self.transactions.get(username).map_or(&[], Vec::as_slice)
    }

    /// Sum of all listed balances.
    pub fn total_balance(&self) -> f64 {
        self.users.iter().map(|user| user.balance).sum()
    }
}

/// Decoder position in the grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No user block open yet
    AwaitingUser,
    /// Inside a user block, before its transaction header
    InUserBlock,
    /// After the transaction header of the open user block
    InTransactionBlock,
}

#[derive(Debug)]
struct OpenUser {
    username: String,
    balance: Option<f64>,
    line: usize,
}

/// Single-pass, line-at-a-time bulk dump decoder.
///
/// Feed lines in order with [`BulkDecoder::feed_line`] and collect the result
/// with [`BulkDecoder::finish`]. [`decode_all_users`] does both for a whole
/// document.
#[derive(Debug)]
pub struct BulkDecoder {
    state: DecoderState,
    current: Option<OpenUser>,
    decoded: AllUsers,
}

impl Default for BulkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BulkDecoder {
    /// Decoder in [`DecoderState::AwaitingUser`].
    pub fn new() -> Self {
        Self { state: DecoderState::AwaitingUser, current: None, decoded: AllUsers::default() }
    }

    /// Current grammar state.
    pub fn state(&self) -> DecoderState {
        self.state
    }

    /// Consume one line. `line_no` is only used in error reports.
    pub fn feed_line(&mut self, line_no: usize, raw: &str) -> Result<()> {
        let line = raw.trim();

        if let Some(rest) = line.strip_prefix(USER_PREFIX) {
            return self.open_user(line_no, line, rest.trim());
        }

        if line.starts_with(PASSWORD_PREFIX) {
            return Ok(());
        }

        if line.starts_with(BALANCE_PREFIX) {
            let Some(user) = self.current.as_mut() else {
                return Err(ProtocolError::parse(line_no, ParseErrorKind::OrphanBalance, line));
            };
            let balance = parse_amount(after_last_glyph(line)).ok_or_else(|| {
                ProtocolError::parse(line_no, ParseErrorKind::InvalidAmount, line)
            })?;
            user.balance = Some(balance);
            return Ok(());
        }

        if line.starts_with(TRANSACTIONS_HEADER) {
            if self.current.is_none() {
                return Err(ProtocolError::parse(
                    line_no,
                    ParseErrorKind::OrphanTransactionHeader,
                    line,
                ));
            }
            self.state = DecoderState::InTransactionBlock;
            return Ok(());
        }

        if self.state == DecoderState::InTransactionBlock && line.starts_with(FROM_LABEL) {
            let record = parse_transaction_line(line_no, line)?;
            if let Some(user) = &self.current {
                self.decoded.transactions.entry(user.username.clone()).or_default().push(record);
            }
            return Ok(());
        }

        if !line.is_empty() {
            tracing::trace!(line = line_no, state = ?self.state, "skipping unrecognised line");
        }
        Ok(())
    }

    /// Close the last user block and return everything decoded.
    pub fn finish(mut self) -> Result<AllUsers> {
        self.close_user()?;
        Ok(self.decoded)
    }

    fn open_user(&mut self, line_no: usize, line: &str, username: &str) -> Result<()> {
        self.close_user()?;

        if username.is_empty() {
            return Err(ProtocolError::parse(line_no, ParseErrorKind::EmptyUsername, line));
        }

        // A repeated name starts over: attribution follows the latest block.
        self.decoded.transactions.insert(username.to_string(), Vec::new());
        self.current = Some(OpenUser { username: username.to_string(), balance: None, line: line_no });
        self.state = DecoderState::InUserBlock;
        Ok(())
    }

    fn close_user(&mut self) -> Result<()> {
        let Some(user) = self.current.take() else {
            return Ok(());
        };

        let Some(balance) = user.balance else {
            return Err(ProtocolError::Parse {
                line: user.line,
                kind: ParseErrorKind::MissingBalance,
                text: format!("{USER_PREFIX} {}", user.username),
            });
        };

        self.decoded.users.push(UserRecord { username: user.username, balance });
        self.state = DecoderState::AwaitingUser;
        Ok(())
    }
}

/// Decode a complete `SHOW_ALL_USERS` reply.
///
/// An empty document yields an empty [`AllUsers`].
pub fn decode_all_users(text: &str) -> Result<AllUsers> {
    let mut decoder = BulkDecoder::new();
    for (index, line) in text.lines().enumerate() {
        decoder.feed_line(index + 1, line)?;
    }
    decoder.finish()
}

/// Parse `From: <user> | To: <user> | ₹<amount> | <timestamp>`.
fn parse_transaction_line(line_no: usize, line: &str) -> Result<TransactionRecord> {
    let fields: Vec<&str> = line.split('|').collect();
    let [from, to, amount, timestamp] = fields.as_slice() else {
        return Err(ProtocolError::parse(line_no, ParseErrorKind::FieldCount(fields.len()), line));
    };

    let from = labelled(from, FROM_LABEL)
        .ok_or_else(|| ProtocolError::parse(line_no, ParseErrorKind::MissingLabel(FROM_LABEL), line))?;
    let to = labelled(to, TO_LABEL)
        .ok_or_else(|| ProtocolError::parse(line_no, ParseErrorKind::MissingLabel(TO_LABEL), line))?;
    let amount = parse_amount(amount)
        .ok_or_else(|| ProtocolError::parse(line_no, ParseErrorKind::InvalidAmount, line))?;

    Ok(TransactionRecord {
        from: from.to_string(),
        to: to.to_string(),
        amount,
        timestamp: timestamp.trim().to_string(),
    })
}

fn labelled<'a>(field: &'a str, label: &str) -> Option<&'a str> {
    field.trim().strip_prefix(label).map(str::trim)
}

/// Append one user block in the layout [`decode_all_users`] reads.
pub fn encode_user_block(out: &mut String, user: &UserRecord, transactions: &[TransactionRecord]) {
    out.push('\n');
    out.push_str(&format!("{USER_PREFIX} {}\n", user.username));
    out.push_str(&format!("{PASSWORD_PREFIX} {REDACTED_PASSWORD}\n"));
    out.push_str(&format!("{BALANCE_PREFIX} {}\n", format_amount(user.balance)));
    out.push_str(TRANSACTIONS_HEADER);
    out.push('\n');
    for txn in transactions {
        out.push_str(&format!(
            "  {FROM_LABEL} {} | {TO_LABEL} {} | {} | {}\n",
            txn.from,
            txn.to,
            format_amount(txn.amount),
            txn.timestamp
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_USERS: &str = "
User: alice
Password: 5f4dcc3b5aa765d61d8327deb882cf99
Balance: ₹123.45
Transaction History:
  From: alice | To: bob | ₹10.00 | 2025-04-01 10:00:00

User: bob
Password: 8d3533d75ae2c3966d7e0d4fcc69216b
Balance: ₹510.00
Transaction History:
  From: carol | To: bob | ₹ 500.00 | 2025-04-02 11:30:00
";

    #[test]
    fn empty_document_yields_nothing() {
        let decoded = decode_all_users("").unwrap();
        assert!(decoded.users.is_empty());
        assert!(decoded.transactions.is_empty());

        assert_eq!(decode_all_users("\n\n   \n").unwrap(), AllUsers::default());
    }

    #[test]
    fn two_blocks_are_attributed() {
        let decoded = decode_all_users(TWO_USERS).unwrap();

        assert_eq!(
            decoded.users,
            vec![
                UserRecord { username: "alice".into(), balance: 123.45 },
                UserRecord { username: "bob".into(), balance: 510.0 },
            ]
        );
        assert_eq!(decoded.transactions.len(), 2);
        assert_eq!(
            decoded.transactions_for("alice"),
            [TransactionRecord {
                from: "alice".into(),
                to: "bob".into(),
                amount: 10.0,
                timestamp: "2025-04-01 10:00:00".into(),
            }]
        );
        assert_eq!(decoded.transactions_for("bob")[0].from, "carol");
        assert_eq!(decoded.transactions_for("bob")[0].amount, 500.0);
    }

    #[test]
    fn user_without_transactions_has_empty_list() {
        let decoded =
            decode_all_users("User: dave\nBalance: ₹1000.00\nTransaction History:\n").unwrap();
        assert_eq!(decoded.transactions.get("dave"), Some(&Vec::new()));
    }

    #[test]
    fn short_transaction_line_fails() {
        let doc = "User: a\nBalance: ₹1.00\nTransaction History:\nFrom: a | To: b | ₹1.00\n";
        let err = decode_all_users(doc).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Parse { line: 4, kind: ParseErrorKind::FieldCount(3), .. }
        ));
    }

    #[test]
    fn non_numeric_transaction_amount_fails() {
        let doc = "User: a\nBalance: ₹1.00\nTransaction History:\nFrom: a | To: b | ₹ten | now\n";
        let err = decode_all_users(doc).unwrap_err();
        assert!(matches!(err, ProtocolError::Parse { kind: ParseErrorKind::InvalidAmount, .. }));
    }

    #[test]
    fn missing_to_label_fails() {
        let doc = "User: a\nBalance: ₹1.00\nTransaction History:\nFrom: a | b | ₹1.00 | now\n";
        let err = decode_all_users(doc).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Parse { kind: ParseErrorKind::MissingLabel(TO_LABEL), .. }
        ));
    }

    #[test]
    fn balance_before_user_fails() {
        let err = decode_all_users("Balance: ₹5.00\n").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Parse { line: 1, kind: ParseErrorKind::OrphanBalance, .. }
        ));
    }

    #[test]
    fn unparseable_balance_fails() {
        let err = decode_all_users("User: a\nBalance: ₹lots\n").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Parse { line: 2, kind: ParseErrorKind::InvalidAmount, .. }
        ));
    }

    #[test]
    fn block_without_balance_fails_at_its_user_line() {
        let err = decode_all_users("User: a\nTransaction History:\nUser: b\nBalance: ₹1\n")
            .unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Parse { line: 1, kind: ParseErrorKind::MissingBalance, .. }
        ));
    }

    #[test]
    fn empty_username_fails() {
        let err = decode_all_users("User:   \n").unwrap_err();
        assert!(matches!(err, ProtocolError::Parse { kind: ParseErrorKind::EmptyUsername, .. }));
    }

    #[test]
    fn from_lines_outside_transaction_block_are_ignored() {
        let doc = "User: a\nFrom: x | To: y | ₹1.00 | now\nBalance: ₹2.00\n";
        let decoded = decode_all_users(doc).unwrap();
        assert!(decoded.transactions_for("a").is_empty());
    }

    #[test]
    fn chatter_inside_transaction_block_is_skipped() {
        let doc = "User: a\nBalance: ₹2.00\nTransaction History:\n  (2 entries)\n  garbage | here\n";
        let decoded = decode_all_users(doc).unwrap();
        assert_eq!(decoded.users.len(), 1);
        assert!(decoded.transactions_for("a").is_empty());
    }

    #[test]
    fn password_line_is_never_stored() {
        let decoded = decode_all_users(TWO_USERS).unwrap();
        let debug = format!("{decoded:?}");
        assert!(!debug.contains("5f4dcc3b"));
    }

    #[test]
    fn state_follows_section_markers() {
        let mut decoder = BulkDecoder::new();
        assert_eq!(decoder.state(), DecoderState::AwaitingUser);
        decoder.feed_line(1, "User: a").unwrap();
        assert_eq!(decoder.state(), DecoderState::InUserBlock);
        decoder.feed_line(2, "Balance: ₹1.00").unwrap();
        decoder.feed_line(3, "Transaction History:").unwrap();
        assert_eq!(decoder.state(), DecoderState::InTransactionBlock);
        decoder.feed_line(4, "User: b").unwrap();
        assert_eq!(decoder.state(), DecoderState::InUserBlock);
    }

    #[test]
    fn repeated_user_resets_its_transactions() {
        let doc = "User: a\nBalance: ₹1\nTransaction History:\nFrom: a | To: b | ₹1 | t1\n\
                   User: a\nBalance: ₹2\nTransaction History:\n";
        let decoded = decode_all_users(doc).unwrap();
        assert_eq!(decoded.users.len(), 2);
        assert!(decoded.transactions_for("a").is_empty());
    }

    #[test]
    fn encoded_block_decodes_back() {
        let user = UserRecord { username: "erin".into(), balance: 42.5 };
        let txns = vec![TransactionRecord {
            from: "erin".into(),
            to: "frank".into(),
            amount: 7.25,
            timestamp: "2025-05-05 05:05:05".into(),
        }];
        let mut doc = String::new();
        encode_user_block(&mut doc, &user, &txns);

        let decoded = decode_all_users(&doc).unwrap();
        assert_eq!(decoded.users, vec![user]);
        assert_eq!(decoded.transactions_for("erin"), txns.as_slice());
    }
}
