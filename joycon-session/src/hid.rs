//! Adapter from an opened `hidapi` device to the [`Transport`] contract.
//!
//! Discovery and enumeration stay with the caller; this module only turns
//! an already-opened [`HidDevice`] into something a session can drive.

use hidapi::HidDevice;
use parking_lot::Mutex;

use crate::error::TransportError;
use crate::{Transport, INPUT_REPORT_LEN};

/// How long one `recv` blocks before reporting "nothing yet".  Short enough
/// that session teardown is prompt, long enough to not spin.
const READ_INTERVAL_MS: i32 = 20;

/// `hidapi`-backed transport for a Bluetooth or USB HID controller.
pub struct HidTransport {
    device: Mutex<HidDevice>,
    recv_size: usize,
}

impl HidTransport {
    /// Wrap a device opened for standard 64-byte input reports.
    pub fn new(device: HidDevice) -> Self {
        Self::with_recv_size(device, INPUT_REPORT_LEN)
    }

    /// Wrap a device with an explicit input report size; pass
    /// [`crate::INPUT_REPORT_EXT_LEN`] when IR/NFC extended reports are
    /// enabled.
    pub fn with_recv_size(device: HidDevice, recv_size: usize) -> Self {
        Self {
            device: Mutex::new(device),
            recv_size,
        }
    }
}

impl Transport for HidTransport {
    fn send(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.device
            .lock()
            .write(buf)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        // hidapi reports a timeout as Ok(0), which is exactly the
        // Transport contract for "no report available".
        self.device
            .lock()
            .read_timeout(buf, READ_INTERVAL_MS)
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn recv_size(&self) -> usize {
        self.recv_size
    }
}
