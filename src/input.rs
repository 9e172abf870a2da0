//! Borrowing accessor view over inbound reports.
//!
//! Inspectors get a raw byte slice from the session; [`InputReport`] gives
//! the protocol fields names without copying.  Reports are 64 bytes in
//! standard mode and 362 bytes when the NFC/IR extended payload is enabled.

use crate::types::{Buttons, ControllerData, ControllerInfo, ControllerState, ImuFrame, MacAddr, Stick};

/// Byte offset of the NFC/IR extended payload.
const OFF_EXT: usize = 49;

/// Read-only view over one inbound report.
#[derive(Debug, Clone, Copy)]
pub struct InputReport<'a> {
    raw: &'a [u8],
}

impl<'a> InputReport<'a> {
    pub fn new(raw: &'a [u8]) -> InputReport<'a> {
        InputReport { raw }
    }

    pub fn id(&self) -> u8 {
        self.raw.first().copied().unwrap_or(0)
    }

    pub fn timer(&self) -> u8 {
        self.raw.get(1).copied().unwrap_or(0)
    }

    /// Decoded power/category/battery byte.
    pub fn state(&self) -> ControllerState {
        ControllerState::from_byte(self.raw.get(2).copied().unwrap_or(0))
    }

    /// Buttons and sticks from bytes [3..12].
    pub fn controller_data(&self) -> ControllerData {
        if self.raw.len() < 12 {
            return ControllerData::default();
        }
        let mut buttons = [0u8; 3];
        buttons.copy_from_slice(&self.raw[3..6]);
        let mut left = [0u8; 3];
        left.copy_from_slice(&self.raw[6..9]);
        let mut right = [0u8; 3];
        right.copy_from_slice(&self.raw[9..12]);
        ControllerData {
            buttons: Buttons(buttons),
            left_stick: Stick(left),
            right_stick: Stick(right),
        }
    }

    pub fn vibration_ack(&self) -> u8 {
        self.raw.get(12).copied().unwrap_or(0)
    }

    /// Sub-command reply block of a 0x21 report.
    pub fn reply(&self) -> ReplyView<'a> {
        ReplyView { raw: self.raw }
    }

    /// The three IMU sample frames of a 0x30..0x33 report.
    pub fn imu_frames(&self) -> [ImuFrame; 3] {
        let mut frames = [ImuFrame::default(); 3];
        if self.raw.len() < 49 {
            return frames;
        }
        for (i, frame) in frames.iter_mut().enumerate() {
            let base = 13 + 12 * i;
            for axis in 0..3 {
                frame.acc[axis] = i16_le(self.raw, base + 2 * axis);
                frame.gyro[axis] = i16_le(self.raw, base + 6 + 2 * axis);
            }
        }
        frames
    }

    /// NFC/IR extended payload of a 0x31 report; empty on standard-size
    /// reports.
    pub fn ext(&self) -> &'a [u8] {
        if self.raw.len() > OFF_EXT {
            &self.raw[OFF_EXT..]
        } else {
            &[]
        }
    }
}

/// The reply block `[13..49]` of a sub-command reply report.
#[derive(Debug, Clone, Copy)]
pub struct ReplyView<'a> {
    raw: &'a [u8],
}

impl<'a> ReplyView<'a> {
    pub fn ack(&self) -> u8 {
        self.raw.get(13).copied().unwrap_or(0)
    }

    /// Which sub-command this report replies to.
    pub fn subcmd_id(&self) -> u8 {
        self.raw.get(14).copied().unwrap_or(0)
    }

    /// Reply payload after the ack/id header.
    pub fn data(&self) -> &'a [u8] {
        if self.raw.len() >= 49 {
            &self.raw[15..49]
        } else if self.raw.len() > 15 {
            &self.raw[15..]
        } else {
            &[]
        }
    }

    /// Echoed address of a flash read/write reply.
    pub fn flash_address(&self) -> u32 {
        let data = self.data();
        if data.len() < 4 {
            return u32::MAX;
        }
        u32::from_le_bytes([data[0], data[1], data[2], data[3]])
    }

    /// Echoed window length of a flash read reply.
    pub fn flash_length(&self) -> u8 {
        self.data().get(4).copied().unwrap_or(0)
    }

    /// Payload bytes of a flash read reply.
    pub fn flash_data(&self) -> &'a [u8] {
        let data = self.data();
        let len = usize::from(self.flash_length());
        if data.len() >= 5 + len {
            &data[5..5 + len]
        } else {
            &[]
        }
    }

    /// Parse a device-info reply into firmware, category and MAC.
    pub fn device_info(&self) -> Option<ControllerInfo> {
        let data = self.data();
        if data.len() < 10 {
            return None;
        }
        let mut mac = [0u8; 6];
        mac.copy_from_slice(&data[4..10]);
        Some(ControllerInfo {
            firmware: [data[0], data[1]],
            category: data[2],
            mac: MacAddr(mac),
        })
    }
}

fn i16_le(raw: &[u8], at: usize) -> i16 {
    match (raw.get(at), raw.get(at + 1)) {
        (Some(&lo), Some(&hi)) => i16::from_le_bytes([lo, hi]),
        _ => 0,
    }
}
