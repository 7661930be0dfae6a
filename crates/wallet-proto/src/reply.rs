//! Literal reply texts emitted by the wallet server.
//!
//! Clients match on some of these (see [`crate::Response`]); changing the
//! wording is a wire-compatibility break.

use crate::amount::format_amount;

/// Account created.
pub const SIGNUP_OK: &str = "Signup successful!";
/// Username taken or unusable.
pub const SIGNUP_FAILED: &str = "Signup failed! Username might be taken.";
/// Credentials accepted; the connection is now logged in.
pub const LOGIN_OK: &str = "Login successful";
/// Credentials rejected.
pub const LOGIN_FAILED: &str = "Login failed";
/// Connection already carries a login.
pub const ALREADY_LOGGED_IN: &str = "Login failed! Already logged in on this connection.";
/// Opcode needs a logged-in connection.
pub const LOGIN_REQUIRED: &str = "Please login first.";
/// Opcode needs the admin role.
pub const UNAUTHORIZED: &str = "Unauthorized. Admin access only.";
/// Line did not parse as a command.
pub const INVALID_COMMAND: &str = "Invalid command!";
/// Transfer refused by the ledger.
pub const TRANSFER_FAILED: &str = "Transfer failed! Check balance or recipient.";
/// Transfer amount was zero, negative or not a number.
pub const TRANSFER_INVALID_AMOUNT: &str = "Transfer failed! Invalid amount.";
/// Explicit sender differs from the logged-in user.
pub const TRANSFER_SENDER_MISMATCH: &str = "Transfer failed! Sender must be the logged in user.";
/// Server-side storage fault.
pub const INTERNAL_ERROR: &str = "Server error. Please try again later.";

/// `Balance: ₹X.XX`
pub fn balance(amount: f64) -> String {
    format!("Balance: {}", format_amount(amount))
}

/// `Transfer successful! New balance: ₹X.XX`
pub fn transfer_ok(new_balance: f64) -> String {
    format!("Transfer successful! New balance: {}", format_amount(new_balance))
}

/// `Transaction limit exceeded! Max ₹N.`
pub fn limit_exceeded(limit: f64) -> String {
    format!("Transaction limit exceeded! Max {}{limit}.", crate::amount::CURRENCY_GLYPH)
}
