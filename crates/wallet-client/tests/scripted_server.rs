//! Client behaviour against a scripted in-process server.
//!
//! The server records every line it receives, so tests can assert on what did
//! (and did not) reach the wire.

#![allow(clippy::disallowed_types, reason = "Test server log shared with a std thread")]

use std::{
    io::{BufRead, BufReader, Write},
    net::TcpListener,
    sync::{Arc, Mutex},
    thread,
};

use wallet_client::{ClientError, SessionConfig, TransportConfig, TransportError, WalletClient};

struct Scripted {
    address: String,
    received: Arc<Mutex<Vec<String>>>,
}

/// Serve connections one after another, answering by opcode.
fn scripted(reply: fn(&str) -> String) -> Scripted {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let received = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&received);

    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { break };
            let mut writer = stream.try_clone().unwrap();
            for line in BufReader::new(stream).lines() {
                let Ok(line) = line else { break };
                log.lock().unwrap().push(line.clone());
                if writer.write_all(reply(&line).as_bytes()).is_err() {
                    break;
                }
            }
        }
    });

    Scripted { address, received }
}

fn bank(line: &str) -> String {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let reply = match tokens.as_slice() {
        ["SIGNUP", _, _] => "Signup successful!",
        ["LOGIN", _, "pw"] => "Login successful",
        ["LOGIN", _, _] => "Login failed",
        ["BALANCE", _] => "Balance: ₹1000.00",
        ["TRANSFER", ..] => "Transfer successful! New balance: ₹900.00",
        ["HISTORY", _] => {
            "Transaction History:\n2024-01-01 10:00:00 | From: alice | To: bob | ₹100.00\n"
        },
        ["SHOW_ALL_USERS", "admin"] => concat!(
            "\nUser: alice\nPassword: ********\nBalance: ₹900.00\nTransaction History:\n",
            "  From: alice | To: bob | ₹100.00 | 2024-01-01 10:00:00\n",
            "\nUser: bob\nPassword: ********\nBalance: ₹1100.00\nTransaction History:\n",
        ),
        ["ADMIN_STATS", "admin"] => concat!(
            "Total Users: 2\nTotal Balance in System: ₹2000.00\nTotal Transactions: 1\n",
            "Top 3 Most Active Senders:\n  alice - 1 transactions\n",
        ),
        ["SHOW_ALL_USERS" | "ADMIN_STATS", ..] => "Unauthorized. Admin access only.",
        _ => "Invalid command!",
    };
    reply.to_string()
}

fn client(server: &Scripted) -> WalletClient {
    WalletClient::new(TransportConfig::new(server.address.clone()), SessionConfig::default())
}

/// Client whose reply cap falls inside alice's balance line, just after
/// `₹9` of `₹900.00`.
fn capped_client(server: &Scripted) -> WalletClient {
    let mut config = TransportConfig::new(server.address.clone());
    config.max_response_bytes = "\nUser: alice\nPassword: ********\nBalance: ₹9".len();
    WalletClient::new(config, SessionConfig::default())
}

#[test]
fn signup_then_login_authenticates() {
    let server = scripted(bank);
    let mut client = client(&server);

    assert!(client.signup("alice", "pw").unwrap().is_success());
    assert!(client.login("alice", "pw").unwrap().is_success());
    assert_eq!(client.authenticated_user(), Some("alice"));
    assert_eq!(client.balance().unwrap().text(), "Balance: ₹1000.00");

    let received = server.received.lock().unwrap().clone();
    assert_eq!(received, ["SIGNUP alice pw", "LOGIN alice pw", "BALANCE alice"]);
}

#[test]
fn failed_login_stays_logged_out() {
    let server = scripted(bank);
    let mut client = client(&server);

    let response = client.login("alice", "wrong").unwrap();
    assert_eq!(response.text(), "Login failed");
    assert!(client.authenticated_user().is_none());
}

#[test]
fn second_login_sends_nothing() {
    let server = scripted(bank);
    let mut client = client(&server);
    client.login("alice", "pw").unwrap();

    let err = client.login("bob", "pw").unwrap_err();
    assert!(matches!(err, ClientError::AlreadyAuthenticated { .. }));
    assert_eq!(server.received.lock().unwrap().len(), 1);
}

#[test]
fn over_limit_transfer_sends_nothing() {
    let server = scripted(bank);
    let mut client = client(&server);
    client.login("alice", "pw").unwrap();

    assert!(client.transfer("bob", "1500").is_err());
    assert!(client.transfer("bob", "-5").is_err());
    let ok = client.transfer("bob", "100").unwrap();
    assert!(ok.is_success());

    let received = server.received.lock().unwrap().clone();
    assert_eq!(received, ["LOGIN alice pw", "TRANSFER alice bob 100"]);
}

#[test]
fn logout_allows_a_new_login() {
    let server = scripted(bank);
    let mut client = client(&server);
    client.login("alice", "pw").unwrap();

    assert_eq!(client.logout(), Some("alice".to_string()));
    assert!(!client.is_connected());
    assert!(client.login("bob", "pw").unwrap().is_success());
    assert_eq!(client.authenticated_user(), Some("bob"));
}

#[test]
fn history_records_decode() {
    let server = scripted(bank);
    let mut client = client(&server);
    client.login("alice", "pw").unwrap();

    let records = client.history_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].to, "bob");
    assert_eq!(records[0].amount, 100.0);
}

#[test]
fn admin_gets_structured_views() {
    let server = scripted(bank);
    let mut client = client(&server);
    client.login("admin", "pw").unwrap();

    let all = client.all_users().unwrap();
    assert_eq!(all.users.len(), 2);
    assert_eq!(all.transactions_for("alice").len(), 1);
    assert!(all.transactions_for("bob").is_empty());

    let stats = client.admin_stats().unwrap();
    assert_eq!(stats.total_users, 2);
    assert_eq!(stats.top_senders[0].username, "alice");
}

#[test]
fn non_admin_is_rejected() {
    let server = scripted(bank);
    let mut client = client(&server);
    client.login("alice", "pw").unwrap();

    let err = client.all_users().unwrap_err();
    assert!(matches!(err, ClientError::Rejected { ref reason } if reason == "Unauthorized. Admin access only."));
    // Refusal does not end the session
    assert_eq!(client.authenticated_user(), Some("alice"));
}

#[test]
fn capped_user_dump_is_an_error_not_a_short_balance() {
    let server = scripted(bank);
    let mut client = capped_client(&server);
    client.login("admin", "pw").unwrap();

    let err = client.all_users().unwrap_err();
    assert!(matches!(err, ClientError::Transport(TransportError::Truncated { .. })));
    // The connection, and with it the server-side login, is gone
    assert!(!client.is_connected());
    assert!(client.authenticated_user().is_none());
}

#[test]
fn commands_after_a_capped_reply_get_their_own_replies() {
    let server = scripted(bank);
    let mut client = capped_client(&server);
    client.login("admin", "pw").unwrap();
    assert!(client.all_users().is_err());

    let response = client.login("admin", "pw").unwrap();
    assert_eq!(response.text(), "Login successful");
    assert_eq!(client.balance().unwrap().text(), "Balance: ₹1000.00");

    let received = server.received.lock().unwrap().clone();
    assert_eq!(received, ["LOGIN admin pw", "SHOW_ALL_USERS admin", "LOGIN admin pw", "BALANCE admin"]);
}
