//! Fuzz target for `ServerDriver` under storage failures
//!
//! Drives several connections through arbitrary command sequences while
//! `ChaoticStorage` injects I/O errors.
//!
//! # Invariants
//!
//! - The driver NEVER panics, whatever the line or storage fault
//! - Every line on an open session gets exactly one newline-terminated reply
//! - Money is conserved: balances always sum to signups × initial balance
//! - The ledger holds exactly the transfers that were acknowledged

#![no_main]

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use wallet_server::{
    ChaoticStorage, DriverConfig, Environment, MemoryStorage, ServerAction, ServerDriver, ServerEvent,
    Storage,
};

const NAMES: [&str; 4] = ["admin", "alice", "bob", "carol"];

/// Counter-based environment so runs are reproducible.
#[derive(Clone, Default)]
struct FuzzEnv {
    counter: Arc<AtomicU64>,
}

impl Environment for FuzzEnv {
    fn random_bytes(&self, buffer: &mut [u8]) {
        let value = self.counter.fetch_add(1, Ordering::Relaxed).to_le_bytes();
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = value[i % value.len()];
        }
    }

    fn wall_clock_secs(&self) -> u64 {
        1_700_000_000 + self.counter.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Arbitrary)]
struct Scenario {
    chaos_seed: u64,
    /// 0-9 maps to 0%-90%
    failure_rate_tenth: u8,
    steps: Vec<Step>,
}

#[derive(Debug, Arbitrary)]
enum Step {
    Open { session: u8 },
    Close { session: u8 },
    Signup { session: u8, user: u8 },
    Login { session: u8, user: u8, correct: bool },
    Transfer { session: u8, to: u8, cents: u32 },
    Query { session: u8, which: u8 },
    Raw { session: u8, line: String },
}

fn password(user: u8) -> String {
    format!("pw-{}", NAMES[usize::from(user) % NAMES.len()])
}

fn name(user: u8) -> &'static str {
    NAMES[usize::from(user) % NAMES.len()]
}

fuzz_target!(|scenario: Scenario| {
    let failure_rate = f64::from(scenario.failure_rate_tenth % 10) / 10.0;
    let storage = ChaoticStorage::with_seed(MemoryStorage::new(), failure_rate, scenario.chaos_seed);
    let config = DriverConfig { pbkdf2_iterations: 1, ..DriverConfig::default() };
    let initial = config.initial_balance;
    let mut driver = ServerDriver::new(FuzzEnv::default(), storage, config);

    let mut open = [false; 4];
    let mut acknowledged = 0usize;

    for step in scenario.steps.into_iter().take(200) {
        let (session, line) = match step {
            Step::Open { session } => {
                let id = usize::from(session % 4);
                if !open[id] {
                    driver.process_event(ServerEvent::ConnectionAccepted { session_id: id as u64 }).unwrap();
                    open[id] = true;
                }
                continue;
            },
            Step::Close { session } => {
                let id = usize::from(session % 4);
                let _ = driver.process_event(ServerEvent::ConnectionClosed {
                    session_id: id as u64,
                    reason: "fuzz".to_string(),
                });
                open[id] = false;
                continue;
            },
            Step::Signup { session, user } => (session, format!("SIGNUP {} {}", name(user), password(user))),
            Step::Login { session, user, correct } => {
                let pw = if correct { password(user) } else { "wrong".to_string() };
                (session, format!("LOGIN {} {pw}", name(user)))
            },
            Step::Transfer { session, to, cents } => {
                (session, format!("TRANSFER {} {}.{:02}", name(to), cents / 100, cents % 100))
            },
            Step::Query { session, which } => {
                let opcode = ["BALANCE", "HISTORY", "SHOW_ALL_USERS", "ADMIN_STATS"][usize::from(which % 4)];
                (session, opcode.to_string())
            },
            Step::Raw { session, line } => (session, line),
        };

        let id = usize::from(session % 4);
        let result = driver.process_event_inline(ServerEvent::LineReceived { session_id: id as u64, line });

        if !open[id] {
            assert!(result.is_err(), "line on closed session must be refused");
            continue;
        }

        let actions = result.unwrap();
        let replies: Vec<&str> = actions
            .iter()
            .filter_map(|action| match action {
                ServerAction::SendToSession { reply, .. } => Some(reply.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].ends_with('\n'));
        if replies[0].starts_with("Transfer successful!") {
            acknowledged += 1;
        }
    }

    let inner = driver.storage().inner();
    let users = inner.list_users().unwrap();
    let total: f64 = users.iter().map(|user| user.balance).sum();
    assert!((total - initial * users.len() as f64).abs() < 1e-6);
    assert_eq!(inner.ledger().unwrap().len(), acknowledged);
});
