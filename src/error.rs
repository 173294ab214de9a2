use std::io;

use thiserror::Error;

/// Errors raised while constructing the server and its components.
///
/// Per-connection failures never surface here: they end in an HTTP error
/// response or a teardown of that one connection.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying I/O error from the OS or network.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// A synchronisation primitive could not be initialised.
    #[error("failed to initialise semaphore: {0}")]
    SyncInit(#[source] io::Error),
    /// A worker thread could not be started.
    #[error("failed to spawn worker thread {index}: {source}")]
    Spawn {
        index: usize,
        #[source]
        source: io::Error,
    },
    /// Rejected configuration value.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The shutdown signal handler could not be installed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
