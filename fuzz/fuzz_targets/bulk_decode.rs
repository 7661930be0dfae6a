//! Fuzz target for the reply decoders
//!
//! Feeds arbitrary text to the bulk-dump, history and admin-stats decoders.
//! None of them may panic, and neither may re-encoding a decoded bulk dump.

#![no_main]

use libfuzzer_sys::fuzz_target;
use wallet_proto::{bulk::encode_user_block, decode_admin_stats, decode_all_users, history};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);

    let _ = history::decode_history(&text);
    let _ = decode_admin_stats(&text);

    if let Ok(all) = decode_all_users(&text) {
        let mut encoded = String::new();
        for user in &all.users {
            encode_user_block(&mut encoded, user, all.transactions_for(&user.username));
        }

        let _ = decode_all_users(&encoded);
    }
});
