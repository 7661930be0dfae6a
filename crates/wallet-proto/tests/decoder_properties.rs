//! Property-based tests for the reply decoders and command lines.
//!
//! The decoders face text produced by a server we do not control, so the
//! properties focus on robustness: arbitrary input never panics, unknown lines
//! never turn into records, and well-formed documents keep every field.

use proptest::prelude::*;
use wallet_proto::{
    Command, Opcode, TransactionRecord, UserRecord,
    bulk::{USER_PREFIX, encode_user_block},
    decode_all_users, decode_admin_stats,
    history::decode_history,
};

/// Lines that start with none of the grammar's section markers.
fn chatter_line() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,:!()#-]{0,60}".prop_filter("must not look like a section marker", |line| {
        let line = line.trim();
        !["User:", "Password:", "Balance:", "Transaction History:", "From:"]
            .iter()
            .any(|marker| line.starts_with(marker))
    })
}

fn username() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}"
}

/// Whole-cent amounts, as the server prints two decimals.
fn cents() -> impl Strategy<Value = f64> {
    (0u64..100_000_000).prop_map(|c| c as f64 / 100.0)
}

fn user_block() -> impl Strategy<Value = (UserRecord, Vec<TransactionRecord>)> {
    (username(), cents(), prop::collection::vec((username(), username(), cents()), 0..5)).prop_map(
        |(name, balance, txns)| {
            let txns = txns
                .into_iter()
                .map(|(from, to, amount)| TransactionRecord {
                    from,
                    to,
                    amount,
                    timestamp: "2025-01-01 00:00:00".to_string(),
                })
                .collect();
            (UserRecord { username: name, balance }, txns)
        },
    )
}

proptest! {
    #[test]
    fn bulk_decoder_never_panics(text in ".{0,512}") {
        let _ = decode_all_users(&text);
    }

    #[test]
    fn other_decoders_never_panic(text in ".{0,512}") {
        let _ = decode_admin_stats(&text);
        let _ = decode_history(&text);
    }

    #[test]
    fn chatter_yields_no_records(lines in prop::collection::vec(chatter_line(), 0..20)) {
        let decoded = decode_all_users(&lines.join("\n")).unwrap();
        prop_assert!(decoded.users.is_empty());
        prop_assert!(decoded.transactions.is_empty());
    }

    #[test]
    fn chatter_between_sections_is_ignored(
        block in user_block(),
        noise in prop::collection::vec(chatter_line(), 0..4),
    ) {
        let (user, txns) = block;
        let mut doc = String::new();
        encode_user_block(&mut doc, &user, &txns);

        let mut noisy = String::new();
        for line in doc.lines() {
            noisy.push_str(line);
            noisy.push('\n');
            if !line.trim_start().starts_with(USER_PREFIX) {
                for extra in &noise {
                    noisy.push_str(extra);
                    noisy.push('\n');
                }
            }
        }

        let decoded = decode_all_users(&noisy).unwrap();
        prop_assert_eq!(decoded.users.len(), 1);
        prop_assert_eq!(decoded.transactions_for(&user.username).len(), txns.len());
    }

    #[test]
    fn every_block_is_kept_in_order(blocks in prop::collection::vec(user_block(), 0..6)) {
        let mut doc = String::new();
        for (user, txns) in &blocks {
            encode_user_block(&mut doc, user, txns);
        }

        let decoded = decode_all_users(&doc).unwrap();
        prop_assert_eq!(decoded.users.len(), blocks.len());
        for (decoded_user, (user, _)) in decoded.users.iter().zip(&blocks) {
            prop_assert_eq!(&decoded_user.username, &user.username);
            prop_assert!((decoded_user.balance - user.balance).abs() < 0.005);
        }
    }

    #[test]
    fn command_lines_reparse(user in username(), pass in "[!-~]{1,16}") {
        let cmd = Command::login(&user, &pass).unwrap();
        let parsed = Command::parse(&cmd.to_line()).unwrap();
        prop_assert_eq!(parsed.opcode(), Opcode::Login);
        prop_assert_eq!(parsed, cmd);
    }

    #[test]
    fn tokens_with_whitespace_are_refused(left in "[a-z]{1,8}", right in "[a-z]{1,8}") {
        let joined = format!("{left} {right}");
        prop_assert!(Command::signup(&joined, "pw").is_err());
    }
}
