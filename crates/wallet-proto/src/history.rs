//! The `HISTORY` reply.
//!
//! ```text
//! Transaction History:
//! 2025-04-01 10:00:00 | From: alice | To: bob | ₹40.00
//! ```
//!
//! Unlike the bulk dump, this reply is meant for display, so decoding is
//! lenient: lines that do not look like entries are skipped.

use crate::{
    TransactionRecord,
    amount::{format_amount, parse_amount},
    bulk::{FROM_LABEL, TO_LABEL, TRANSACTIONS_HEADER},
};

/// Render a history reply, newest entry first as given.
pub fn encode_history(records: &[TransactionRecord]) -> String {
    let mut out = String::from(TRANSACTIONS_HEADER);
    out.push('\n');
    for record in records {
        out.push_str(&format!(
            "{} | {FROM_LABEL} {} | {TO_LABEL} {} | {}\n",
            record.timestamp,
            record.from,
            record.to,
            format_amount(record.amount)
        ));
    }
    out
}

/// Extract the entries of a history reply.
pub fn decode_history(text: &str) -> Vec<TransactionRecord> {
    text.lines().filter_map(parse_entry).collect()
}

fn parse_entry(line: &str) -> Option<TransactionRecord> {
    let mut fields = line.trim().split('|').map(str::trim);
    let timestamp = fields.next()?;
    let from = fields.next()?.strip_prefix(FROM_LABEL)?.trim();
    let to = fields.next()?.strip_prefix(TO_LABEL)?.trim();
    let amount = parse_amount(fields.next()?)?;
    if fields.next().is_some() {
        return None;
    }

    Some(TransactionRecord {
        from: from.to_string(),
        to: to.to_string(),
        amount,
        timestamp: timestamp.to_string(),
    })
}
