//! Transport and session error types

use thiserror::Error;

/// Errors surfaced by a byte transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The peer endpoint is gone; no further I/O is possible.
    #[error("transport closed")]
    Closed,

    /// Device-level I/O failure.
    #[error("device i/o error: {0}")]
    Io(String),
}

/// Terminal outcomes of a transmitted task.
///
/// `Ok(())` corresponds to a task that resolved `DONE`; everything else is
/// one of the error legs of the session state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The inspector was not satisfied within its retry budget.
    #[error("no matching report within the retry budget")]
    TimedOut,

    /// The session was torn down while the task was still pending.
    #[error("session shut down while the request was pending")]
    Aborted,

    /// The transport failed while sending or receiving.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The inspector rejected the exchange with a protocol-level code.
    #[error("inspector rejected the exchange (code {0})")]
    Inspector(i32),
}
