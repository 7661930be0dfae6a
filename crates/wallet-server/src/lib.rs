//! Wallet server.
//!
//! Serves the wallet protocol over plain TCP with Tokio, persisting accounts
//! and the transaction ledger in memory or in a redb database.
//!
//! # Architecture
//!
//! [`ServerDriver`] holds all protocol logic and performs no I/O: the runtime
//! turns socket activity into [`ServerEvent`]s and executes the
//! [`ServerAction`]s it gets back. [`Server`] is that runtime. Each connection
//! runs in its own task; the driver sits behind one async mutex, so commands
//! from different connections are applied one at a time. Password hashing is
//! the exception: the driver asks for it with
//! [`ServerAction::DerivePassword`] and the runtime runs it on the blocking
//! pool with the mutex released.
//!
//! # Components
//!
//! - [`ServerDriver`]: command handling (pure logic, no I/O)
//! - [`Server`]: Tokio runtime that executes driver actions
//! - [`storage`]: [`MemoryStorage`], [`RedbStorage`], [`ChaoticStorage`]
//! - [`SystemEnv`]: production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod driver;
mod driver_error;
pub mod env;
mod error;
mod framing;
pub mod password;
pub mod storage;
mod system_env;

use std::{future::Future, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use bytes::BytesMut;
pub use driver::{DriverConfig, LogLevel, ServerAction, ServerDriver, ServerEvent};
pub use driver_error::DriverError;
pub use env::Environment;
pub use error::ServerError;
pub use password::{PasswordJob, PasswordOutcome};
pub use storage::{
    ChaoticStorage, MemoryStorage, RedbStorage, ServerStorage, Storage, StorageError, StoredTransaction,
    StoredUser, TransferOutcome,
};
pub use system_env::SystemEnv;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, tcp::OwnedWriteHalf},
    sync::Mutex,
};

/// How long an unterminated command may sit in the buffer before it is
/// executed as a legacy, unframed command.
pub const FRAGMENT_IDLE: Duration = Duration::from_millis(100);

/// Buffered bytes without a newline after which the buffer is flushed as one
/// (oversized, rejected) command.
const MAX_PENDING_BYTES: usize = 64 * 1024;

type SharedDriver<S> = Arc<Mutex<ServerDriver<SystemEnv, S>>>;

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:8080")
    pub bind_address: String,
    /// redb database file; `None` keeps everything in memory
    pub database_path: Option<PathBuf>,
    /// Driver configuration (limits, admins, hashing cost)
    pub driver: DriverConfig,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("0.0.0.0:{}", wallet_proto::DEFAULT_PORT),
            database_path: None,
            driver: DriverConfig::default(),
        }
    }
}

/// Production wallet server.
///
/// Wraps `ServerDriver` with a Tokio TCP listener and the system environment.
pub struct Server<S: Storage = ServerStorage> {
    /// The action-based server driver
    driver: ServerDriver<SystemEnv, S>,
    /// Bound listener
    listener: TcpListener,
    /// Environment
    env: SystemEnv,
}

impl Server<ServerStorage> {
    /// Open the configured storage and bind the listener.
    pub async fn bind(config: ServerRuntimeConfig) -> Result<Self, ServerError> {
        let storage = ServerStorage::open(config.database_path.as_deref())?;
        Self::bind_with_storage(config, storage).await
    }
}

impl<S: Storage> Server<S> {
    /// Bind the listener over an already opened storage backend.
    pub async fn bind_with_storage(config: ServerRuntimeConfig, storage: S) -> Result<Self, ServerError> {
        config.driver.validate().map_err(ServerError::Config)?;

        let env = SystemEnv::new();
        let driver = ServerDriver::new(env.clone(), storage, config.driver);

        let listener = TcpListener::bind(&config.bind_address)
            .await
            .map_err(|e| ServerError::Transport(format!("failed to bind {}: {e}", config.bind_address)))?;

        Ok(Self { driver, listener, env })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Run the server, accepting connections and processing commands.
    ///
    /// This method runs until an unrecoverable error occurs.
    pub async fn run(self) -> Result<(), ServerError> {
        self.run_until(std::future::pending()).await
    }

    /// Run the server until `shutdown` resolves.
    ///
    /// Stops accepting immediately; connections already in flight finish
    /// their current command.
    pub async fn run_until(self, shutdown: impl Future<Output = ()>) -> Result<(), ServerError> {
        tracing::info!("Server listening on {}", self.local_addr()?);

        let Self { driver, listener, env } = self;
        let driver = Arc::new(Mutex::new(driver));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested");
                    return Ok(());
                },
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let driver = Arc::clone(&driver);
                        let env = env.clone();

                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, peer, driver, &env).await {
                                tracing::error!("Connection error: {}", e);
                            }
                        });
                    },
                    Err(e) => {
                        tracing::error!("Accept error: {}", e);
                    },
                },
            }
        }
    }
}

/// Handle a single TCP connection.
async fn handle_connection<S: Storage>(
    stream: TcpStream,
    peer: SocketAddr,
    driver: SharedDriver<S>,
    env: &SystemEnv,
) -> Result<(), ServerError> {
    let session_id = env.random_u64();
    tracing::debug!("New connection {} from {}", session_id, peer);

    let (mut reader, mut writer) = stream.into_split();

    let actions = driver.lock().await.process_event(ServerEvent::ConnectionAccepted { session_id })?;
    if !execute_actions(session_id, actions, &mut writer).await.open {
        return Ok(());
    }

    let mut buf = BytesMut::with_capacity(4096);

    let reason = 'connection: loop {
        while let Some(line) = framing::next_line(&mut buf) {
            if !process_line(session_id, line, &driver, &mut writer).await {
                break 'connection "closed by server";
            }
        }

        if buf.len() > MAX_PENDING_BYTES {
            if let Some(line) = framing::take_fragment(&mut buf) {
                if !process_line(session_id, line, &driver, &mut writer).await {
                    break 'connection "closed by server";
                }
            }
        }

        let read = if buf.is_empty() {
            reader.read_buf(&mut buf).await
        } else {
            match tokio::time::timeout(FRAGMENT_IDLE, reader.read_buf(&mut buf)).await {
                Ok(read) => read,
                Err(_idle) => {
                    if let Some(line) = framing::take_fragment(&mut buf) {
                        if !process_line(session_id, line, &driver, &mut writer).await {
                            break 'connection "closed by server";
                        }
                    }
                    continue;
                },
            }
        };

        match read {
            Ok(0) => {
                // Half-closed peer: an unterminated tail is still a command
                while let Some(line) = framing::next_line(&mut buf) {
                    process_line(session_id, line, &driver, &mut writer).await;
                }
                if let Some(line) = framing::take_fragment(&mut buf) {
                    process_line(session_id, line, &driver, &mut writer).await;
                }
                break "closed by peer";
            },
            Ok(_) => {},
            Err(e) => {
                tracing::debug!("Read error on {}: {}", session_id, e);
                break "read error";
            },
        }
    };

    let actions = driver
        .lock()
        .await
        .process_event(ServerEvent::ConnectionClosed { session_id, reason: reason.to_string() })?;
    execute_actions(session_id, actions, &mut writer).await;

    Ok(())
}

/// Feed one command line to the driver and execute the result.
///
/// A SIGNUP or LOGIN goes round twice: the key derivation runs on the
/// blocking pool between the two driver calls, with the lock released.
///
/// Returns `false` once the connection should be dropped.
async fn process_line<S: Storage>(
    session_id: u64,
    line: String,
    driver: &SharedDriver<S>,
    writer: &mut OwnedWriteHalf,
) -> bool {
    let mut event = ServerEvent::LineReceived { session_id, line };

    loop {
        let actions = {
            let mut driver = driver.lock().await;
            match driver.process_event(event) {
                Ok(actions) => actions,
                Err(e) => {
                    tracing::warn!("Command processing error: {}", e);
                    return false;
                },
            }
        };

        let executed = execute_actions(session_id, actions, writer).await;
        let Some(job) = executed.derive else {
            return executed.open;
        };
        if !executed.open {
            return false;
        }

        event = match tokio::task::spawn_blocking(move || {
            let outcome = job.run();
            ServerEvent::PasswordDerived { job, outcome }
        })
        .await
        {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("Password derivation for {} did not finish: {}", session_id, e);
                return false;
            },
        };
    }
}

/// Result of executing one batch of actions.
struct Executed {
    /// Connection still usable
    open: bool,
    /// Key derivation the reply is waiting on
    derive: Option<PasswordJob>,
}

/// Execute server actions for the connection owning `writer`.
async fn execute_actions(session_id: u64, actions: Vec<ServerAction>, writer: &mut OwnedWriteHalf) -> Executed {
    let mut open = true;
    let mut derive = None;

    for action in actions {
        match action {
            ServerAction::SendToSession { session_id: target, reply } => {
                if target != session_id {
                    tracing::warn!("SendToSession: reply for {} dropped on {}", target, session_id);
                    continue;
                }
                if let Err(e) = writer.write_all(reply.as_bytes()).await {
                    tracing::debug!("SendToSession write failed for {}: {}", session_id, e);
                    open = false;
                }
            },

            ServerAction::CloseConnection { session_id: target, reason } => {
                tracing::info!("Closing connection {}: {}", target, reason);
                if target == session_id {
                    if let Err(e) = writer.shutdown().await {
                        tracing::debug!("Shutdown failed for {}: {}", session_id, e);
                    }
                    open = false;
                }
            },

            ServerAction::DerivePassword { job } => {
                if job.session_id == session_id {
                    derive = Some(job);
                } else {
                    tracing::warn!("DerivePassword: job for {} dropped on {}", job.session_id, session_id);
                }
            },

            ServerAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
        }
    }

    Executed { open, derive }
}
