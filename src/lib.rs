//! Host-side driver for Nintendo Switch Joy-Con and Pro Controllers.
//!
//! This crate implements the controller side of the Switch HID protocol
//! over any byte transport — Bluetooth HID, USB HID, or the in-process
//! loopback used by the tests.  It covers pairing, input sampling, flash
//! memory access, player LEDs and the home button light, rumble, and the
//! MCU-backed NFC reader and IR camera of the right Joy-Con.
//!
//! The session engine (background poll thread, report matching, retry
//! accounting) lives in the `joycon-session` crate, re-exported here as
//! [`session`].  The caller supplies an opened transport; driving a
//! controller then looks like:
//!
//! ```no_run
//! use joycon_driver::{Controller, JoyConR, Player, PlayerFlash};
//! use joycon_driver::session::{loopback_pair, INPUT_REPORT_EXT_LEN};
//!
//! let (transport, _device) = loopback_pair(INPUT_REPORT_EXT_LEN);
//! let joycon = JoyConR::new(Box::new(transport));
//! joycon.pair()?;
//! joycon.set_player(Player::lit(1), PlayerFlash::NONE)?;
//! joycon.test_ir(joycon_driver::mcu::IrResolution::R60p, |frame| {
//!     // consume the frame here; the buffer is reused afterwards
//!     !frame.is_empty()
//! })?;
//! # Ok::<(), joycon_driver::Error>(())
//! ```

use thiserror::Error as ThisError;

pub mod controller;
pub mod input;
pub mod mcu;
pub mod output;
pub mod protocol;
pub mod rumble;
pub mod types;

mod driver;
mod ir;

/// Session layer re-export.
pub use joycon_session as session;

pub use controller::{open, Controller, JoyConDual, JoyConL, JoyConR, ProController, Progress};
pub use rumble::{RumbleData, RumbleDataF};
pub use types::{
    Category, ControllerColor, ControllerData, ControllerInfo, HostDesc, Player, PlayerFlash,
    PollType,
};

use joycon_session::SessionError;

/// Driver-level errors.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Argument validation failed before anything touched the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The operation is not available on this controller or firmware.
    #[error("operation not supported")]
    Unsupported,

    /// The session layer reported a terminal failure.
    #[error(transparent)]
    Session(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, Error>;
