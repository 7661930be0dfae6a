//! Line-oriented interactive shell.
//!
//! Reads one command per line, runs it through a [`WalletClient`] and writes
//! the outcome. Input and output are generic so the loop can be driven from
//! tests.

use std::io::{self, BufRead, Write};

use wallet_proto::{AdminStats, AllUsers, amount::format_amount};

use crate::{error::ClientError, wallet::WalletClient};

/// Prompt printed before each line.
pub const PROMPT: &str = "wallet> ";

const HELP: &str = "\
commands:
  signup <username> <password>   create an account
  login <username> <password>    log in on this connection
  logout                         log out and disconnect
  balance                        show your balance
  transfer <receiver> <amount>   send funds (max 1000 per transfer)
  history                        list your transfers
  users                          list every account (admin)
  stats                          system statistics (admin)
  raw <line>                     send a line unmodified
  help                           show this text
  quit                           exit";

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// `signup <username> <password>`
    Signup {
        /// Account name
        username: String,
        /// Password
        password: String,
    },
    /// `login <username> <password>`
    Login {
        /// Account name
        username: String,
        /// Password
        password: String,
    },
    /// `logout`
    Logout,
    /// `balance`
    Balance,
    /// `transfer <receiver> <amount>`
    Transfer {
        /// Recipient
        receiver: String,
        /// Amount as typed
        amount: String,
    },
    /// `history`
    History,
    /// `users`
    Users,
    /// `stats`
    Stats,
    /// `raw <line>`
    Raw(String),
    /// `help`
    Help,
    /// `quit`
    Quit,
}

impl ShellCommand {
    /// Parse a line. Blank lines yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// A usage message if the command is unknown or has the wrong arguments.
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let line = line.trim();
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Ok(None);
        };
        let rest: Vec<&str> = parts.collect();

        let command = match (word.to_ascii_lowercase().as_str(), rest.as_slice()) {
            ("signup", [username, password]) => {
                Self::Signup { username: (*username).to_string(), password: (*password).to_string() }
            },
            ("signup", _) => return Err("usage: signup <username> <password>".into()),
            ("login", [username, password]) => {
                Self::Login { username: (*username).to_string(), password: (*password).to_string() }
            },
            ("login", _) => return Err("usage: login <username> <password>".into()),
            ("transfer", [receiver, amount]) => {
                Self::Transfer { receiver: (*receiver).to_string(), amount: (*amount).to_string() }
            },
            ("transfer", _) => return Err("usage: transfer <receiver> <amount>".into()),
            ("raw", [_, ..]) => Self::Raw(line[word.len()..].trim().to_string()),
            ("raw", []) => return Err("usage: raw <line>".into()),
            ("logout", []) => Self::Logout,
            ("balance", []) => Self::Balance,
            ("history", []) => Self::History,
            ("users", []) => Self::Users,
            ("stats", []) => Self::Stats,
            ("help" | "?", _) => Self::Help,
            ("quit" | "exit" | "q", []) => Self::Quit,
            (other, _) => return Err(format!("unknown command {other:?}; try help")),
        };

        Ok(Some(command))
    }
}

/// Interactive front end over a [`WalletClient`].
#[derive(Debug)]
pub struct Shell {
    client: WalletClient,
}

impl Shell {
    /// Wrap a client.
    pub fn new(client: WalletClient) -> Self {
        Self { client }
    }

    /// Underlying client.
    pub fn client(&self) -> &WalletClient {
        &self.client
    }

    /// Run until `quit` or end of input.
    ///
    /// # Errors
    ///
    /// Only I/O errors on `input` or `output`; wallet failures are printed.
    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> io::Result<()> {
        let mut lines = input.lines();

        loop {
            write!(output, "{PROMPT}")?;
            output.flush()?;

            let Some(line) = lines.next().transpose()? else {
                writeln!(output)?;
                break;
            };

            match ShellCommand::parse(&line) {
                Ok(None) => {},
                Ok(Some(ShellCommand::Quit)) => break,
                Ok(Some(command)) => self.dispatch(command, &mut output)?,
                Err(usage) => writeln!(output, "{usage}")?,
            }
        }

        self.client.disconnect();
        Ok(())
    }

    /// Run one command and write its outcome.
    ///
    /// # Errors
    ///
    /// I/O errors on `output`.
    pub fn dispatch<W: Write>(&mut self, command: ShellCommand, output: &mut W) -> io::Result<()> {
        let outcome = match command {
            ShellCommand::Signup { username, password } => self.client.signup(&username, &password),
            ShellCommand::Login { username, password } => self.client.login(&username, &password),
            ShellCommand::Balance => self.client.balance(),
            ShellCommand::Transfer { receiver, amount } => self.client.transfer(&receiver, &amount),
            ShellCommand::History => self.client.history(),
            ShellCommand::Raw(line) => Ok(self.client.raw(&line)),
            ShellCommand::Logout => {
                return match self.client.logout() {
                    Some(user) => writeln!(output, "Logged out {user}."),
                    None => writeln!(output, "Not logged in."),
                };
            },
            ShellCommand::Users => {
                return match self.client.all_users() {
                    Ok(users) => write_users(output, &users),
                    Err(err) => write_error(output, &err),
                };
            },
            ShellCommand::Stats => {
                return match self.client.admin_stats() {
                    Ok(stats) => write_stats(output, &stats),
                    Err(err) => write_error(output, &err),
                };
            },
            ShellCommand::Help => return writeln!(output, "{HELP}"),
            ShellCommand::Quit => return Ok(()),
        };

        match outcome {
            Ok(response) => writeln!(output, "{}", response.text().trim_end()),
            Err(err) => write_error(output, &err),
        }
    }
}

fn write_error<W: Write>(output: &mut W, err: &ClientError) -> io::Result<()> {
    writeln!(output, "error: {err}")
}

fn write_users<W: Write>(output: &mut W, all: &AllUsers) -> io::Result<()> {
    if all.is_empty() {
        return writeln!(output, "No users.");
    }

    let width = all.users.iter().map(|u| u.username.chars().count()).max().unwrap_or(0).max(4);
    writeln!(output, "{:<width$}  {:>12}  transfers", "user", "balance")?;

    for user in &all.users {
        let transactions = all.transactions_for(&user.username);
        writeln!(
            output,
            "{:<width$}  {:>12}  {}",
            user.username,
            format_amount(user.balance),
            transactions.len()
        )?;
        for tx in transactions {
            writeln!(output, "    {} -> {}  {}  {}", tx.from, tx.to, format_amount(tx.amount), tx.timestamp)?;
        }
    }

    writeln!(output, "total balance: {}", format_amount(all.total_balance()))
}

fn write_stats<W: Write>(output: &mut W, stats: &AdminStats) -> io::Result<()> {
    writeln!(output, "users:        {}", stats.total_users)?;
    writeln!(output, "balance:      {}", format_amount(stats.total_balance))?;
    writeln!(output, "transfers:    {}", stats.total_transactions)?;
    if stats.top_senders.is_empty() {
        return Ok(());
    }
    writeln!(output, "top senders:")?;
    for sender in &stats.top_senders {
        writeln!(output, "  {:<16} {}", sender.username, sender.transactions)?;
    }
    Ok(())
}
