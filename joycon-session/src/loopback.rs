//! In-process transport pair for exercising sessions without hardware.
//!
//! [`loopback_pair`] returns the host side (a [`Transport`] to hand to a
//! session) and the device side (a [`LoopbackDevice`] the test drives):
//! injected reports come out of the session's poll loop, transmitted
//! reports can be captured and asserted on.

use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::TransportError;
use crate::Transport;

const RECV_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Host side of the loopback pair.
pub struct LoopbackTransport {
    to_device: Sender<Vec<u8>>,
    from_device: Mutex<Receiver<Vec<u8>>>,
    recv_size: usize,
}

/// Device side of the loopback pair.
pub struct LoopbackDevice {
    to_host: Sender<Vec<u8>>,
    from_host: Receiver<Vec<u8>>,
    recv_size: usize,
}

/// Create a connected transport/device pair.
///
/// `recv_size` is the input report size the simulated device was "opened"
/// with: 64 for standard reports, 362 for IR/NFC extended reports.
pub fn loopback_pair(recv_size: usize) -> (LoopbackTransport, LoopbackDevice) {
    let (out_tx, out_rx) = channel();
    let (in_tx, in_rx) = channel();
    (
        LoopbackTransport {
            to_device: out_tx,
            from_device: Mutex::new(in_rx),
            recv_size,
        },
        LoopbackDevice {
            to_host: in_tx,
            from_host: out_rx,
            recv_size,
        },
    )
}

impl Transport for LoopbackTransport {
    fn send(&self, buf: &[u8]) -> Result<usize, TransportError> {
        self.to_device
            .send(buf.to_vec())
            .map_err(|_| TransportError::Closed)?;
        Ok(buf.len())
    }

    fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        match self.from_device.lock().recv_timeout(RECV_POLL_INTERVAL) {
            Ok(report) => {
                buf.fill(0);
                let n = report.len().min(buf.len());
                buf[..n].copy_from_slice(&report[..n]);
                Ok(n)
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn recv_size(&self) -> usize {
        self.recv_size
    }
}

impl LoopbackDevice {
    /// Push an input report towards the host. Short reports are zero-padded
    /// to the opened receive size, as a real HID read would present them.
    pub fn inject(&self, report: &[u8]) {
        let mut padded = vec![0u8; self.recv_size];
        let n = report.len().min(padded.len());
        padded[..n].copy_from_slice(&report[..n]);
        let _ = self.to_host.send(padded);
    }

    /// Capture the next output report, waiting up to `timeout`.
    pub fn next_output(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.from_host.recv_timeout(timeout).ok()
    }

    /// Drain every output report captured so far.
    pub fn drain_outputs(&self) -> Vec<Vec<u8>> {
        let mut outputs = Vec::new();
        while let Ok(report) = self.from_host.try_recv() {
            outputs.push(report);
        }
        outputs
    }
}
