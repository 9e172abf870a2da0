//! Request/response session engine for Joy-Con / Pro Controller transports
//!
//! A Switch controller keeps emitting input reports on its own schedule,
//! independent of anything the host sends.  There is no request/response
//! framing on the wire, so every outgoing command has to be matched to some
//! future inbound report by inspecting its content.  This crate provides:
//!
//! - the [`Transport`] contract — one blocking `send`/`recv` pair over a
//!   single logical HID device,
//! - the [`Session`] engine — a background poll thread that offers every
//!   inbound report to the queued inspectors, with per-task retry budgets,
//!   abandonment and abort-on-teardown,
//! - a [`loopback`] transport pair for tests, and an [`hid`] adapter for
//!   devices opened through `hidapi`.
//!
//! Protocol knowledge (report layouts, sub-commands, checksums) lives in the
//! `joycon-driver` crate; this crate only knows about opaque byte reports.

pub mod error;
pub mod hid;
pub mod loopback;

mod session;

pub use error::{SessionError, TransportError};
pub use hid::HidTransport;
pub use loopback::{loopback_pair, LoopbackDevice, LoopbackTransport};
pub use session::{Inspector, PushMode, Session, SessionSender, TaskHandle, Verdict};

/// Output (host → controller) report size in bytes.
pub const OUTPUT_REPORT_LEN: usize = 49;

/// Standard input (controller → host) report size in bytes.
pub const INPUT_REPORT_LEN: usize = 64;

/// Extended input report size when IR/NFC payloads are enabled.
pub const INPUT_REPORT_EXT_LEN: usize = 362;

/// One logical HID device as a pair of blocking byte-report operations.
///
/// `recv` is expected to return `Ok(0)` when no report was available within
/// a short internal poll interval.  The session's poll thread relies on this
/// to re-check its shutdown flag; a `recv` that blocks forever would make
/// session teardown hang.
pub trait Transport: Send + Sync {
    /// Write one output report. Returns the number of bytes written.
    fn send(&self, buf: &[u8]) -> Result<usize, TransportError>;

    /// Read one input report into `buf`. Returns the report length, or
    /// `Ok(0)` when nothing arrived within the transport's poll interval.
    fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Input report size this device was opened with: 64 for standard
    /// reports, 362 when IR/NFC extended reports are enabled.
    fn recv_size(&self) -> usize {
        INPUT_REPORT_LEN
    }
}
