//! The `ADMIN_STATS` reply.
//!
//! ```text
//! Total Users: 3
//! Total Balance in System: ₹3000.00
//! Total Transactions: 4
//!
//! Top 3 Most Active Senders:
//!   alice - 3 transactions
//!   bob - 1 transactions
//! ```

use crate::{
    ParseErrorKind,
    amount::{after_last_glyph, format_amount, parse_amount},
    errors::{ProtocolError, Result},
};

const TOTAL_USERS: &str = "Total Users:";
const TOTAL_BALANCE: &str = "Total Balance in System:";
const TOTAL_TRANSACTIONS: &str = "Total Transactions:";
const TOP_SENDERS_HEADER: &str = "Top 3 Most Active Senders:";
const SENDER_SEPARATOR: &str = " - ";
const SENDER_SUFFIX: &str = " transactions";

/// Number of senders listed in the ranking.
pub const TOP_SENDERS: usize = 3;

/// Ledger-wide aggregates shown to admins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdminStats {
    /// Registered accounts
    pub total_users: u64,
    /// Sum of all balances
    pub total_balance: f64,
    /// Ledger entries
    pub total_transactions: u64,
    /// Most frequent senders, busiest first
    pub top_senders: Vec<SenderActivity>,
}

/// One row of the sender ranking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderActivity {
    /// Sending account
    pub username: String,
    /// Transfers sent
    pub transactions: u64,
}

impl AdminStats {
    /// Render the reply text.
    pub fn encode(&self) -> String {
        let mut out = format!(
            "{TOTAL_USERS} {}\n{TOTAL_BALANCE} {}\n{TOTAL_TRANSACTIONS} {}\n\n{TOP_SENDERS_HEADER}\n",
            self.total_users,
            format_amount(self.total_balance),
            self.total_transactions
        );
        for sender in &self.top_senders {
            out.push_str(&format!(
                "  {}{SENDER_SEPARATOR}{}{SENDER_SUFFIX}\n",
                sender.username, sender.transactions
            ));
        }
        out
    }
}

/// Decode an `ADMIN_STATS` reply. All three totals are required.
pub fn decode_admin_stats(text: &str) -> Result<AdminStats> {
    let mut total_users = None;
    let mut total_balance = None;
    let mut total_transactions = None;
    let mut top_senders = Vec::new();
    let mut in_ranking = false;
    let mut last_line = 0;

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();
        last_line = line_no;

        if let Some(rest) = line.strip_prefix(TOTAL_USERS) {
            total_users = Some(parse_count(line_no, line, rest)?);
        } else if line.starts_with(TOTAL_BALANCE) {
            let balance = parse_amount(after_last_glyph(line)).ok_or_else(|| {
                ProtocolError::parse(line_no, ParseErrorKind::InvalidAmount, line)
            })?;
            total_balance = Some(balance);
        } else if let Some(rest) = line.strip_prefix(TOTAL_TRANSACTIONS) {
            total_transactions = Some(parse_count(line_no, line, rest)?);
        } else if line.starts_with(TOP_SENDERS_HEADER) {
            in_ranking = true;
        } else if in_ranking && !line.is_empty() {
            let Some((username, count)) = line.rsplit_once(SENDER_SEPARATOR) else {
                continue;
            };
            let count = count.strip_suffix(SENDER_SUFFIX).unwrap_or(count);
            top_senders.push(SenderActivity {
                username: username.trim().to_string(),
                transactions: parse_count(line_no, line, count)?,
            });
        }
    }

    let missing = |label: &'static str| {
        ProtocolError::parse(last_line, ParseErrorKind::MissingLabel(label), "")
    };

    Ok(AdminStats {
        total_users: total_users.ok_or_else(|| missing(TOTAL_USERS))?,
        total_balance: total_balance.ok_or_else(|| missing(TOTAL_BALANCE))?,
        total_transactions: total_transactions.ok_or_else(|| missing(TOTAL_TRANSACTIONS))?,
        top_senders,
    })
}

fn parse_count(line_no: usize, line: &str, field: &str) -> Result<u64> {
    field
        .trim()
        .parse()
        .map_err(|_| ProtocolError::parse(line_no, ParseErrorKind::InvalidCount, line))
}
