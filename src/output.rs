//! Output report builder.
//!
//! One fixed 49-byte buffer with a writer method per sub-command.  All
//! offsets are explicit; nothing here relies on struct layout.  The timer
//! byte (offset 1) is left zero — the session stamps it at send time.

use joycon_session::OUTPUT_REPORT_LEN;

use crate::mcu::{IrConfigFixed, McuCmd, McuMode, McuReg, McuState, McuSubcmd};
use crate::protocol::{crc8, subcmd, SUBCMD_CRC_LEN};
use crate::rumble::RumbleData;
use crate::types::{
    pack_home_light_patterns, HciMode, HomeLightPattern, ImuSensitivity, MacAddr, Player,
    PlayerFlash, PollType,
};

// Field offsets within the 49-byte report.
const OFF_ID: usize = 0;
const OFF_RUMBLE_L: usize = 2;
const OFF_RUMBLE_R: usize = 6;
const OFF_SUBCMD: usize = 10;
const OFF_ARGS: usize = 11;
/// CRC window of the 0x03 sub-command: bytes [11..47], stored at 47.
const OFF_POLL_CRC: usize = 47;
const OFF_POLL_TAIL: usize = 48;
/// CRC window of the 0x21 sub-command: bytes [12..48], stored at 48.
const OFF_MCU_ARGS: usize = 12;
const OFF_MCU_CRC: usize = 48;

/// Fixed bytes [18..21] of the pairing record.
const PAIR_FIXED: [u8; 3] = [0x00, 0x04, 0x3C];
/// Tail bytes [41..49] of the pairing record.
const PAIR_TAIL: [u8; 8] = [0x68, 0x00, 0xC0, 0x39, 0x00, 0x00, 0x00, 0x00];

/// Host → controller report under construction.
#[derive(Debug, Clone, Copy)]
pub struct OutputReport {
    buf: [u8; OUTPUT_REPORT_LEN],
}

impl Default for OutputReport {
    fn default() -> Self {
        OutputReport {
            buf: [0u8; OUTPUT_REPORT_LEN],
        }
    }
}

impl OutputReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the whole report and set the report id.
    pub fn reset(&mut self, id: u8) {
        self.buf = [0u8; OUTPUT_REPORT_LEN];
        self.buf[OFF_ID] = id;
    }

    pub fn id(&self) -> u8 {
        self.buf[OFF_ID]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn subcmd_id(&self) -> u8 {
        self.buf[OFF_SUBCMD]
    }

    // ---- rumble block ----

    /// Fill the per-side rumble slots; `None` leaves a slot untouched.
    pub fn set_rumble(&mut self, left: Option<&RumbleData>, right: Option<&RumbleData>) {
        if let Some(data) = left {
            self.buf[OFF_RUMBLE_L..OFF_RUMBLE_L + 4].copy_from_slice(&data.to_bytes());
        }
        if let Some(data) = right {
            self.buf[OFF_RUMBLE_R..OFF_RUMBLE_R + 4].copy_from_slice(&data.to_bytes());
        }
    }

    // ---- sub-commands ----

    fn set_subcmd(&mut self, id: u8) {
        self.buf[OFF_SUBCMD] = id;
    }

    /// Sub-command 0x01: Bluetooth manual pairing record.
    pub fn set_pair(&mut self, mac: MacAddr, alias: &str) {
        self.set_subcmd(subcmd::PAIR);
        self.buf[OFF_ARGS] = 0x04;
        self.buf[12..18].copy_from_slice(&mac.to_le_bytes());
        self.buf[18..21].copy_from_slice(&PAIR_FIXED);
        let name = alias.as_bytes();
        let n = name.len().min(20);
        self.buf[21..21 + n].copy_from_slice(&name[..n]);
        self.buf[41..49].copy_from_slice(&PAIR_TAIL);
    }

    /// Sub-command 0x02: request device info.
    pub fn set_device_info(&mut self) {
        self.set_subcmd(subcmd::DEVICE_INFO);
    }

    /// Sub-command 0x03: select the input report mode.
    pub fn set_poll_type(&mut self, ty: PollType) {
        self.set_subcmd(subcmd::SET_POLL_TYPE);
        self.buf[OFF_ARGS] = ty as u8;
        self.refresh_poll_crc();
    }

    /// Sub-command 0x03 with the MCU tail marker (IR streaming requests).
    pub fn set_poll_type_mcu(&mut self, ty: PollType) {
        self.set_subcmd(subcmd::SET_POLL_TYPE);
        self.buf[OFF_ARGS] = ty as u8;
        self.buf[OFF_POLL_TAIL] = 0xFF;
        self.refresh_poll_crc();
    }

    /// Acknowledge one received IR fragment in a 0x03-phrased request.
    pub fn set_ir_ack_fragment(&mut self, fragment: u8) {
        self.buf[OFF_ARGS + 3] = fragment;
        self.refresh_poll_crc();
    }

    /// Rewrite the three IR status bytes (empty-report re-ACK and
    /// missed-fragment resend requests).
    pub fn set_ir_ack_status(&mut self, b1: u8, b2: u8, b3: u8) {
        self.buf[OFF_ARGS + 1] = b1;
        self.buf[OFF_ARGS + 2] = b2;
        self.buf[OFF_ARGS + 3] = b3;
        self.refresh_poll_crc();
    }

    fn refresh_poll_crc(&mut self) {
        self.buf[OFF_POLL_CRC] = crc8(&self.buf[OFF_ARGS..OFF_ARGS + SUBCMD_CRC_LEN]);
    }

    /// Sub-command 0x04: elapsed time in 10 ms units, little endian.
    pub fn set_elapsed_time(&mut self, time: u16) {
        self.set_subcmd(subcmd::SET_ELAPSED_TIME);
        self.buf[OFF_ARGS..OFF_ARGS + 2].copy_from_slice(&time.to_le_bytes());
    }

    /// Sub-command 0x06: HCI state change.
    pub fn set_hci_mode(&mut self, mode: HciMode) {
        self.set_subcmd(subcmd::HCI_MODE);
        self.buf[OFF_ARGS] = mode as u8;
    }

    /// Sub-command 0x08: low-power mode.
    pub fn set_low_power(&mut self, enable: bool) {
        self.set_subcmd(subcmd::SET_LOW_POWER);
        self.buf[OFF_ARGS] = u8::from(enable);
    }

    /// Sub-command 0x10: flash read request.
    pub fn set_flash_read(&mut self, address: u32, length: u8) {
        self.set_subcmd(subcmd::FLASH_READ);
        self.buf[OFF_ARGS..OFF_ARGS + 4].copy_from_slice(&address.to_le_bytes());
        self.buf[OFF_ARGS + 4] = length;
    }

    /// Sub-command 0x11: flash write, at most 0x1D data bytes.
    pub fn set_flash_write(&mut self, address: u32, data: &[u8]) {
        self.set_subcmd(subcmd::FLASH_WRITE);
        self.buf[OFF_ARGS..OFF_ARGS + 4].copy_from_slice(&address.to_le_bytes());
        self.buf[OFF_ARGS + 4] = data.len() as u8;
        self.buf[16..16 + data.len()].copy_from_slice(data);
    }

    /// Sub-command 0x21 / 0x21: switch the MCU into a mode.
    pub fn set_mcu_mode(&mut self, mode: McuMode) {
        self.set_subcmd(subcmd::MCU_COMMAND);
        self.buf[OFF_ARGS] = McuCmd::SetMode as u8;
        self.buf[OFF_MCU_ARGS] = 0x00;
        self.buf[OFF_MCU_ARGS + 1] = mode as u8;
        self.refresh_mcu_crc();
    }

    /// Sub-command 0x21 / 0x23 / 0x01: IR mode, fragment count and the
    /// required MCU firmware version.
    pub fn set_mcu_ir_mode(&mut self, fixed: &IrConfigFixed) {
        self.set_subcmd(subcmd::MCU_COMMAND);
        self.buf[OFF_ARGS] = McuCmd::Write as u8;
        self.buf[OFF_MCU_ARGS] = McuSubcmd::SetIrMode as u8;
        self.buf[OFF_MCU_ARGS + 1] = fixed.mode as u8;
        self.buf[OFF_MCU_ARGS + 2] = fixed.fragments;
        self.buf[15..17].copy_from_slice(&fixed.major.to_be_bytes());
        self.buf[17..19].copy_from_slice(&fixed.minor.to_be_bytes());
        self.refresh_mcu_crc();
    }

    /// Sub-command 0x21 / 0x23 / 0x04: write up to nine MCU registers.
    pub fn set_mcu_ir_registers(&mut self, regs: &[McuReg]) {
        self.set_subcmd(subcmd::MCU_COMMAND);
        self.buf[OFF_ARGS] = McuCmd::Write as u8;
        self.buf[OFF_MCU_ARGS] = McuSubcmd::SetIrReg as u8;
        let count = regs.len().min(9);
        self.buf[OFF_MCU_ARGS + 1] = count as u8;
        // Clear all nine register slots before writing this chunk.
        self.buf[14..41].fill(0);
        for (i, reg) in regs.iter().take(count).enumerate() {
            let at = 14 + 3 * i;
            self.buf[at..at + 2].copy_from_slice(&reg.address.to_be_bytes());
            self.buf[at + 2] = reg.value;
        }
        self.refresh_mcu_crc();
    }

    fn refresh_mcu_crc(&mut self) {
        self.buf[OFF_MCU_CRC] = crc8(&self.buf[OFF_MCU_ARGS..OFF_MCU_ARGS + SUBCMD_CRC_LEN]);
    }

    /// MCU status request (report id 0x11, command byte only, no CRC).
    pub fn set_mcu_status_request(&mut self) {
        self.set_subcmd(0x01);
    }

    /// MCU-phrased NFC command (report id 0x11): command 0x02 plus an
    /// argument block, CRC over the 36-byte window.
    pub fn set_nfc_command(&mut self, args: &[u8]) {
        self.set_subcmd(0x02);
        let n = args.len().min(SUBCMD_CRC_LEN);
        self.buf[OFF_ARGS..OFF_ARGS + n].copy_from_slice(&args[..n]);
        self.refresh_poll_crc();
    }

    /// Sub-command 0x22: MCU resume/suspend.
    pub fn set_mcu_state(&mut self, state: McuState) {
        self.set_subcmd(subcmd::MCU_STATE);
        self.buf[OFF_ARGS] = state as u8;
    }

    /// Sub-command 0x30: player LEDs, steady nibble low, flash nibble high.
    pub fn set_player(&mut self, player: Player, flash: PlayerFlash) {
        self.set_subcmd(subcmd::SET_PLAYER_LED);
        self.buf[OFF_ARGS] = player.bits() | (flash.bits() << 4);
    }

    /// Sub-command 0x38: home button light program.
    pub fn set_home_light(
        &mut self,
        intensity: u8,
        duration: u8,
        repeat: u8,
        patterns: &[HomeLightPattern],
    ) {
        self.set_subcmd(subcmd::SET_HOME_LIGHT);
        self.buf[OFF_ARGS] = (duration & 0x0F) | ((patterns.len() as u8 & 0x0F) << 4);
        self.buf[OFF_ARGS + 1] = (repeat & 0x0F) | ((intensity & 0x0F) << 4);
        self.buf[13..36].copy_from_slice(&pack_home_light_patterns(patterns));
    }

    /// Sub-command 0x40: IMU sampling on/off.
    pub fn set_imu(&mut self, enable: bool) {
        self.set_subcmd(subcmd::ENABLE_IMU);
        self.buf[OFF_ARGS] = u8::from(enable);
    }

    /// Sub-command 0x41: IMU sensitivity and bandwidth.
    pub fn set_imu_sensitivity(&mut self, sens: ImuSensitivity) {
        self.set_subcmd(subcmd::IMU_SENSITIVITY);
        self.buf[OFF_ARGS] = sens.gyro as u8;
        self.buf[OFF_ARGS + 1] = sens.acc as u8;
        self.buf[OFF_ARGS + 2] = sens.gyro_performance as u8;
        self.buf[OFF_ARGS + 3] = sens.acc_bandwidth as u8;
    }

    /// Sub-command 0x48: vibration on/off.
    pub fn set_vibration(&mut self, enable: bool) {
        self.set_subcmd(subcmd::ENABLE_VIBRATION);
        self.buf[OFF_ARGS] = u8::from(enable);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcu::IrResolution;
    use crate::protocol::report_id;

    #[test]
    fn pair_record_layout() {
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_CMD);
        out.set_pair(
            MacAddr([0xDC, 0x68, 0xEB, 0x15, 0x9A, 0x62]),
            "Nintendo Switch",
        );
        let raw = out.as_bytes();
        assert_eq!(raw[0], 0x01);
        assert_eq!(raw[10], 0x01);
        assert_eq!(raw[11], 0x04);
        assert_eq!(raw[12..18], [0x62, 0x9A, 0x15, 0xEB, 0x68, 0xDC]);
        assert_eq!(raw[18..21], [0x00, 0x04, 0x3C]);
        assert_eq!(&raw[21..36], b"Nintendo Switch");
        assert_eq!(raw[41..49], [0x68, 0x00, 0xC0, 0x39, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn poll_type_carries_crc_at_byte_47() {
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_CMD);
        out.set_poll_type(PollType::Standard);
        let raw = out.as_bytes();
        assert_eq!(raw[10], 0x03);
        assert_eq!(raw[11], 0x30);
        assert_eq!(raw[47], crc8(&raw[11..47]));
        assert_eq!(raw[48], 0x00);
    }

    #[test]
    fn mcu_poll_type_sets_tail_marker() {
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_MCU);
        out.set_poll_type_mcu(PollType::NfcIrCam);
        let raw = out.as_bytes();
        assert_eq!(raw[0], 0x11);
        assert_eq!(raw[11], 0x00);
        assert_eq!(raw[48], 0xFF);
        assert_eq!(raw[47], crc8(&raw[11..47]));
    }

    #[test]
    fn ir_ack_updates_fragment_and_crc() {
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_MCU);
        out.set_poll_type_mcu(PollType::NfcIrCam);
        let before = out.as_bytes()[47];
        out.set_ir_ack_fragment(0x2A);
        let raw = out.as_bytes();
        assert_eq!(raw[14], 0x2A);
        assert_eq!(raw[47], crc8(&raw[11..47]));
        assert_ne!(raw[47], before);
    }

    #[test]
    fn flash_read_encodes_address_le() {
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_CMD);
        out.set_flash_read(0x6050, 13);
        let raw = out.as_bytes();
        assert_eq!(raw[10], 0x10);
        assert_eq!(raw[11..15], [0x50, 0x60, 0x00, 0x00]);
        assert_eq!(raw[15], 13);
    }

    #[test]
    fn flash_write_carries_payload() {
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_CMD);
        out.set_flash_write(0x2004, &[0xAB; 6]);
        let raw = out.as_bytes();
        assert_eq!(raw[10], 0x11);
        assert_eq!(raw[11..15], [0x04, 0x20, 0x00, 0x00]);
        assert_eq!(raw[15], 6);
        assert_eq!(raw[16..22], [0xAB; 6]);
    }

    #[test]
    fn mcu_mode_command_carries_crc_at_byte_48() {
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_CMD);
        out.set_mcu_mode(McuMode::Ir);
        let raw = out.as_bytes();
        assert_eq!(raw[10], 0x21);
        assert_eq!(raw[11], 0x21);
        assert_eq!(raw[13], 0x05);
        assert_eq!(raw[48], crc8(&raw[12..48]));
    }

    #[test]
    fn ir_mode_write_encodes_version_be() {
        let fixed = IrResolution::R240p.config();
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_CMD);
        out.set_mcu_ir_mode(&fixed);
        let raw = out.as_bytes();
        assert_eq!(raw[11], 0x23);
        assert_eq!(raw[12], 0x01);
        assert_eq!(raw[13], 0x07); // image transfer
        assert_eq!(raw[14], 0xFF); // 240p fragment count
        assert_eq!(raw[15..17], [0x00, 0x05]);
        assert_eq!(raw[17..19], [0x00, 0x18]);
        assert_eq!(raw[48], crc8(&raw[12..48]));
    }

    #[test]
    fn ir_register_chunk_layout() {
        let regs = [
            McuReg {
                address: 0x002E,
                value: 0x69,
            },
            McuReg {
                address: 0x0130,
                value: 0x31,
            },
        ];
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_CMD);
        out.set_mcu_ir_registers(&regs);
        let raw = out.as_bytes();
        assert_eq!(raw[11], 0x23);
        assert_eq!(raw[12], 0x04);
        assert_eq!(raw[13], 2);
        assert_eq!(raw[14..17], [0x00, 0x2E, 0x69]);
        assert_eq!(raw[17..20], [0x01, 0x30, 0x31]);
        assert_eq!(raw[48], crc8(&raw[12..48]));
    }

    #[test]
    fn player_led_nibbles() {
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_CMD);
        out.set_player(Player(0b0101), PlayerFlash(0b1010));
        assert_eq!(out.as_bytes()[10], 0x30);
        assert_eq!(out.as_bytes()[11], 0xA5);
    }

    #[test]
    fn home_light_header_nibbles() {
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_CMD);
        out.set_home_light(0xF, 0x2, 0x1, &crate::types::DOUBLE_BLINK);
        let raw = out.as_bytes();
        assert_eq!(raw[10], 0x38);
        assert_eq!(raw[11], 0x62); // 6 patterns, base duration 2
        assert_eq!(raw[12], 0xF1); // intensity 15, repeat 1
    }

    #[test]
    fn reset_clears_previous_contents() {
        let mut out = OutputReport::new();
        out.reset(report_id::OUT_CMD);
        out.set_flash_write(0x6050, &[0xFF; 13]);
        out.reset(report_id::OUT_RUMBLE);
        assert_eq!(out.id(), 0x10);
        assert!(out.as_bytes()[1..].iter().all(|&b| b == 0));
    }
}
