//! MCU bring-up, IR image streaming, and NFC sequences.
//!
//! The MCU is driven through a mandatory mode ladder: resume it, wait for
//! standby, switch it into IR or NFC mode, confirm, configure, then stream.
//! Every exit path suspends the MCU and drops back to a standard poll mode,
//! whatever happened in between.

use tracing::{debug, trace};

use joycon_session::{Inspector, Session, SessionError, Verdict};

use crate::input::InputReport;
use crate::mcu::{
    reg, IrConfig, IrConfigFixed, IrConfigLive, IrMode, IrResolution, McuMode, McuReg, McuState,
    NfcState,
};
use crate::output::OutputReport;
use crate::protocol::report_id;
use crate::types::PollType;
use crate::{driver::Core, driver::RETRY, Error, Result};

/// Bytes per IR image fragment.
pub(crate) const IR_FRAGMENT_LEN: usize = 300;
/// Fragment payload offset inside the extended IR block.
const IR_DATA_OFFSET: usize = 10;

/// Rounds of mode polling tolerated before the bring-up gives up; a wedged
/// MCU must not hang the caller forever.
const MCU_POLL_ROUNDS: u32 = 8;

/// Frame callback: receives each completed frame, returns `true` to stop
/// streaming.  The buffer is reused — a caller that wants to keep the frame
/// must copy it inside the callback.
pub(crate) type FrameSink = Box<dyn FnMut(&[u8]) -> bool + Send>;

/// Register chunk size of one 0x21 MCU write.
const REGS_PER_WRITE: usize = 9;

impl Core {
    // ---- MCU mode ladder ----

    /// Switch the MCU into `mode` and wait for the standby acknowledgement.
    pub fn set_mcu_mode(&self, mode: McuMode, sessions: &[&Session]) -> Result<()> {
        debug!("set mcu mode {mode:?}");
        let _op = self.lock_op();
        let handles = {
            let mut out = self.lock_output();
            out.reset(report_id::OUT_CMD);
            out.set_mcu_mode(mode);
            self.transmit_all(
                &out,
                RETRY,
                |_| {
                    Some(Box::new(move |raw: &[u8]| {
                        let report = InputReport::new(raw);
                        if report.id() != report_id::IN_REPLY
                            || report.reply().subcmd_id() != crate::protocol::subcmd::MCU_COMMAND
                        {
                            return Verdict::Waiting;
                        }
                        let data = report.reply().data();
                        if data.first() == Some(&0x01) && data.get(7) == Some(&0x01) {
                            Verdict::Done
                        } else {
                            Verdict::Waiting
                        }
                    }) as Inspector)
                },
                sessions,
            )
        };
        Self::await_all(handles)
    }

    /// Request MCU status and wait until it reports `mode`.
    pub fn check_mcu_mode(&self, mode: McuMode, sessions: &[&Session]) -> Result<()> {
        let handles = {
            let mut out = self.lock_output();
            out.reset(report_id::OUT_MCU);
            out.set_mcu_status_request();
            self.transmit_all(
                &out,
                RETRY,
                |_| {
                    Some(Box::new(move |raw: &[u8]| {
                        let report = InputReport::new(raw);
                        let ext = report.ext();
                        // ext[3..7] carry firmware-dependent words; only the
                        // report kind and the mode byte matter here.
                        if report.id() == report_id::IN_NFC_IR
                            && ext.first() == Some(&0x01)
                            && ext.get(7) == Some(&(mode as u8))
                        {
                            Verdict::Done
                        } else {
                            Verdict::Waiting
                        }
                    }) as Inspector)
                },
                sessions,
            )
        };
        Self::await_all(handles)
    }

    /// Request IR status and wait until it reports `mode`.
    pub fn check_mcu_ir_mode(&self, mode: IrMode, sessions: &[&Session]) -> Result<()> {
        let handles = {
            let mut out = self.lock_output();
            out.reset(report_id::OUT_MCU);
            out.set_poll_type_mcu(PollType::NfcIrData);
            self.transmit_all(
                &out,
                RETRY,
                |_| {
                    Some(Box::new(move |raw: &[u8]| {
                        let report = InputReport::new(raw);
                        let ext = report.ext();
                        if report.id() == report_id::IN_NFC_IR
                            && ext.first() == Some(&0x13)
                            && ext.get(1) == Some(&0x00)
                            && ext.get(2) == Some(&(mode as u8))
                        {
                            Verdict::Done
                        } else {
                            Verdict::Waiting
                        }
                    }) as Inspector)
                },
                sessions,
            )
        };
        Self::await_all(handles)
    }

    /// Write a register batch in chunks of at most nine registers.
    pub fn set_mcu_ir_registers(&self, regs: &[McuReg], sessions: &[&Session]) -> Result<()> {
        debug!("write {} mcu registers", regs.len());
        let _op = self.lock_op();
        for chunk in regs.chunks(REGS_PER_WRITE) {
            let handles = {
                let mut out = self.lock_output();
                out.reset(report_id::OUT_CMD);
                out.set_mcu_ir_registers(chunk);
                self.transmit_all(
                    &out,
                    RETRY,
                    |_| {
                        Some(Box::new(|raw: &[u8]| {
                            let report = InputReport::new(raw);
                            if report.id() == report_id::IN_REPLY
                                && report.reply().subcmd_id()
                                    == crate::protocol::subcmd::MCU_COMMAND
                            {
                                Verdict::Done
                            } else {
                                Verdict::Waiting
                            }
                        }) as Inspector)
                    },
                    sessions,
                )
            };
            Self::await_all(handles)?;
        }
        Ok(())
    }

    /// Program the capture geometry: IR mode + fragment count first, then
    /// the resolution and update-time registers.
    pub fn set_mcu_ir_config_fixed(
        &self,
        fixed: &IrConfigFixed,
        sessions: &[&Session],
    ) -> Result<()> {
        debug!(
            "set ir config: {}x{}, {} fragments",
            fixed.width,
            fixed.height,
            u16::from(fixed.fragments) + 1
        );
        {
            let _op = self.lock_op();
            let handles = {
                let mut out = self.lock_output();
                out.reset(report_id::OUT_CMD);
                out.set_mcu_ir_mode(fixed);
                self.transmit_all(
                    &out,
                    RETRY,
                    |_| {
                        Some(Box::new(|raw: &[u8]| {
                            let report = InputReport::new(raw);
                            // The MCU acknowledges a CRC-valid mode write
                            // with 0x0B in the first reply byte.
                            if report.id() == report_id::IN_REPLY
                                && report.reply().subcmd_id()
                                    == crate::protocol::subcmd::MCU_COMMAND
                                && report.reply().data().first() == Some(&0x0B)
                            {
                                Verdict::Done
                            } else {
                                Verdict::Waiting
                            }
                        }) as Inspector)
                    },
                    sessions,
                )
            };
            Self::await_all(handles)?;
        }
        let regs = [
            McuReg::new(reg::RESOLUTION, fixed.resolution),
            McuReg::new(reg::UPDATE_TIME, fixed.update_time),
            McuReg::finalize(),
        ];
        self.set_mcu_ir_registers(&regs, sessions)
    }

    /// Program the per-capture tuning registers.
    pub fn set_mcu_ir_config_live(
        &self,
        live: &IrConfigLive,
        sessions: &[&Session],
    ) -> Result<()> {
        let exposure = live.exposure_word();
        let regs = [
            McuReg::new(reg::EXP_TIME_LSB, (exposure & 0xFF) as u8),
            McuReg::new(reg::EXP_TIME_MSB, (exposure >> 8) as u8),
            McuReg::new(reg::EXP_TIME_MAX, reg::EXP_TIME_MAX_MANUAL),
            McuReg::new(reg::LEDS_STATE, live.leds),
            McuReg::new(reg::DIGI_GAIN_LSB, (live.digi_gain & 0x0F) << 4),
            McuReg::new(reg::DIGI_GAIN_MSB, (live.digi_gain & 0xF0) >> 4),
            McuReg::new(reg::EXT_LIGHT_FILTER, live.ex_light_filter),
            McuReg::new(reg::EXLF_THR, reg::EXLF_THR_DEFAULT),
            McuReg::new(reg::LEDS_1_2_INT, live.intensity_bright),
            McuReg::new(reg::LEDS_3_4_INT, live.intensity_dim),
            McuReg::new(reg::FLIP_IMG, live.flip),
            McuReg::new(reg::DENOISE_ALG, u8::from(live.denoise_enabled)),
            McuReg::new(reg::DENOISE_EDGE, live.denoise_edge),
            McuReg::new(reg::DENOISE_COLOR, live.denoise_color),
            McuReg::finalize(),
        ];
        self.set_mcu_ir_registers(&regs, sessions)
    }

    // ---- IR capture ----

    /// Full capture session: bring the MCU up into image-transfer mode,
    /// stream frames into `sink` until it returns `true`, then suspend the
    /// MCU and restore the standard poll mode.  The teardown runs on every
    /// exit path.
    pub fn set_ir_config(
        &self,
        config: &IrConfig,
        sink: FrameSink,
        session: &Session,
    ) -> Result<()> {
        let result = self.ir_bring_up(config, sink, session);
        let sessions = [session];
        let teardown = self
            .set_mcu_state(McuState::Suspend, &sessions)
            .and_then(|()| self.poll(PollType::Standard, &sessions));
        result.and(teardown)
    }

    fn ir_bring_up(&self, config: &IrConfig, sink: FrameSink, session: &Session) -> Result<()> {
        /// The bring-up ladder of the IR subsystem.  `AwaitStandby` and
        /// `AwaitTransfer` tolerate a bounded number of timeouts — the MCU
        /// needs a few report cycles to change state.
        enum Step {
            SetPoll,
            Resume,
            AwaitStandby,
            EnterIr,
            ConfirmIr,
            WriteFixed,
            AwaitTransfer,
            WriteLive,
        }

        let sessions = [session];
        let mut step = Step::SetPoll;
        let mut rounds = 0u32;
        loop {
            step = match step {
                Step::SetPoll => {
                    self.poll(PollType::NfcIr, &sessions)?;
                    Step::Resume
                }
                Step::Resume => {
                    self.set_mcu_state(McuState::Resume, &sessions)?;
                    rounds = 0;
                    Step::AwaitStandby
                }
                Step::AwaitStandby => match self.check_mcu_mode(McuMode::Standby, &sessions) {
                    Ok(()) => Step::EnterIr,
                    Err(Error::Session(SessionError::TimedOut)) if rounds < MCU_POLL_ROUNDS => {
                        rounds += 1;
                        debug!("mcu not in standby yet, round {rounds}");
                        Step::AwaitStandby
                    }
                    Err(e) => return Err(e),
                },
                Step::EnterIr => {
                    self.set_mcu_mode(McuMode::Ir, &sessions)?;
                    Step::ConfirmIr
                }
                Step::ConfirmIr => {
                    self.check_mcu_mode(McuMode::Ir, &sessions)?;
                    Step::WriteFixed
                }
                Step::WriteFixed => {
                    self.set_mcu_ir_config_fixed(&config.fixed, &sessions)?;
                    rounds = 0;
                    Step::AwaitTransfer
                }
                Step::AwaitTransfer => {
                    match self.check_mcu_ir_mode(IrMode::ImageTransfer, &sessions) {
                        Ok(()) => Step::WriteLive,
                        Err(Error::Session(SessionError::TimedOut))
                            if rounds < MCU_POLL_ROUNDS =>
                        {
                            rounds += 1;
                            debug!("ir transfer mode not ready, round {rounds}");
                            Step::AwaitTransfer
                        }
                        Err(e) => return Err(e),
                    }
                }
                Step::WriteLive => {
                    self.set_mcu_ir_config_live(&config.live, &sessions)?;
                    break;
                }
            };
        }
        self.get_ir_image(&config.fixed, sink, session)
    }

    /// Stream IR frames.  One inspector pumps every fragment: it copies the
    /// slice into the frame buffer, acknowledges each fragment to keep the
    /// controller in low-latency mode, and hands completed frames to the
    /// sink.  Returning [`Verdict::Again`] after each fragment keeps the
    /// retry budget intact across an arbitrarily long stream.
    pub fn get_ir_image(
        &self,
        fixed: &IrConfigFixed,
        mut sink: FrameSink,
        session: &Session,
    ) -> Result<()> {
        debug!(
            "ir stream start: frame {} bytes, max fragment {}",
            fixed.frame_len(),
            fixed.fragments
        );
        let max_frag = usize::from(fixed.fragments);
        let handle = {
            let mut out = self.lock_output();
            out.reset(report_id::OUT_MCU);
            out.set_poll_type_mcu(PollType::NfcIrCam);

            let mut ack: OutputReport = *out;
            let sender = session.sender();
            let mut image = vec![0u8; fixed.frame_len()];
            let mut pre = 0usize;

            let inspector: Inspector = Box::new(move |raw: &[u8]| {
                let report = InputReport::new(raw);
                if report.id() != report_id::IN_NFC_IR {
                    return Verdict::Waiting;
                }
                let ir = report.ext();
                match ir.first().copied() {
                    Some(0x03) if ir.len() >= IR_DATA_OFFSET + IR_FRAGMENT_LEN => {
                        let cur = usize::from(ir[3]);
                        trace!("ir fragment {cur}");
                        let payload = &ir[IR_DATA_OFFSET..IR_DATA_OFFSET + IR_FRAGMENT_LEN];
                        if cur == 0 {
                            // frame start
                            pre = 0;
                            image[..IR_FRAGMENT_LEN].copy_from_slice(payload);
                        } else if cur == pre {
                            trace!("duplicated fragment, skip");
                        } else if cur == max_frag {
                            // frame end
                            pre = cur;
                            image[IR_FRAGMENT_LEN * cur..IR_FRAGMENT_LEN * (cur + 1)]
                                .copy_from_slice(payload);
                            if sink(&image) {
                                return Verdict::Done;
                            }
                            image.fill(0);
                        } else if cur == pre + 1 && cur < max_frag {
                            // next fragment
                            pre = cur;
                            image[IR_FRAGMENT_LEN * cur..IR_FRAGMENT_LEN * (cur + 1)]
                                .copy_from_slice(payload);
                        }
                        ack.set_ir_ack_fragment(cur as u8);
                        if let Err(e) = sender.send(ack.as_bytes()) {
                            debug!("ir ack send failed: {e}");
                        }
                        Verdict::Again
                    }
                    Some(0xFF) => {
                        // Empty IR report.  Re-ACK the last fragment or the
                        // controller drops to its 30 ms high-latency mode.
                        trace!("empty ir report, re-ack fragment {pre}");
                        ack.set_ir_ack_status(0x00, 0x00, pre as u8);
                        if let Err(e) = sender.send(ack.as_bytes()) {
                            debug!("ir ack send failed: {e}");
                        }
                        Verdict::Again
                    }
                    Some(0x00) => {
                        // Controller asks for the next fragment explicitly.
                        trace!("missed-fragment request, ask for {}", pre + 1);
                        ack.set_ir_ack_status(0x01, (pre + 1) as u8, 0x00);
                        if let Err(e) = sender.send(ack.as_bytes()) {
                            debug!("ir ack send failed: {e}");
                        }
                        Verdict::Again
                    }
                    _ => Verdict::Waiting,
                }
            });
            session.transmit(RETRY, Some(out.as_bytes()), Some(inspector))
        };
        handle.wait().map_err(Error::from)
    }

    /// Capture with the stock preset at the given resolution.
    pub fn test_ir(
        &self,
        resolution: IrResolution,
        sink: FrameSink,
        session: &Session,
    ) -> Result<()> {
        self.set_ir_config(&resolution.test_config(), sink, session)
    }

    // ---- NFC ----

    /// Arm the NFC reader and wait for a tag: StartWaitingReceive first,
    /// then start polling with Mifare support enabled.
    pub fn set_mcu_nfc_config(&self, sessions: &[&Session]) -> Result<()> {
        debug!("arm nfc reader");
        // 0x04: StartWaitingReceive (0x00 would cancel all).
        self.nfc_command(
            &[0x04, 0x00, 0x00, 0x08, 0x00],
            nfc_state_inspector(NfcState::AwaitingCommand),
            sessions,
        )?;
        // 0x01: start polling; payload enables Mifare support.  The 0x2C
        // byte is timing-sensitive, other values fail on real hardware.
        self.nfc_command(
            &[0x01, 0x00, 0x00, 0x08, 0x05, 0x01, 0x00, 0x00, 0x2C, 0x01],
            Box::new(|raw: &[u8]| {
                let report = InputReport::new(raw);
                let nfc = report.ext();
                if report.id() != report_id::IN_NFC_IR || !nfc_header_ok(nfc) {
                    return Verdict::Waiting;
                }
                if nfc.get(7) == Some(&(NfcState::TagDetected as u8)) {
                    let uid_len = usize::from(nfc.get(15).copied().unwrap_or(0)).min(10);
                    let uid = nfc.get(16..16 + uid_len).unwrap_or(&[]);
                    debug!(
                        "tag detected, type {}, uid {uid:02x?}",
                        if nfc.get(13) == Some(&0x02) { "ntag" } else { "mifare" },
                    );
                    Verdict::Done
                } else {
                    Verdict::Waiting
                }
            }),
            sessions,
        )
    }

    /// Issue a read-NTAG command for the detected tag.
    pub fn get_nfc_ntag(&self, sessions: &[&Session]) -> Result<()> {
        debug!("read ntag");
        // 0x06: read NTAG data (0x0F would read Mifare); one block covering
        // the whole tag.
        let mut args = [0u8; 16];
        args[0] = 0x06;
        args[3] = 0x08;
        args[4] = 0x13; // length of data after the command header
        args[5] = 0xD0;
        args[6] = 0x07;
        args[15] = 0x01; // one page range
        self.nfc_command(
            &args,
            nfc_state_inspector(NfcState::AwaitingCommand),
            sessions,
        )
    }

    /// Full NFC session: bring the MCU up into NFC mode, arm the reader and
    /// wait for a tag, then suspend and drop to simple HID polling.
    pub fn get_nfc_data(&self, session: &Session) -> Result<()> {
        let sessions = [session];
        let result = self.nfc_bring_up(&sessions);
        let teardown = self
            .set_mcu_state(McuState::Suspend, &sessions)
            .and_then(|()| self.poll(PollType::SimpleHid, &sessions));
        result.and(teardown)
    }

    fn nfc_bring_up(&self, sessions: &[&Session]) -> Result<()> {
        self.poll(PollType::NfcIr, sessions)?;
        self.set_mcu_state(McuState::Resume, sessions)?;
        let mut rounds = 0u32;
        loop {
            match self.check_mcu_mode(McuMode::Standby, sessions) {
                Ok(()) => break,
                Err(Error::Session(SessionError::TimedOut)) if rounds < MCU_POLL_ROUNDS => {
                    rounds += 1;
                    debug!("mcu not in standby yet, round {rounds}");
                }
                Err(e) => return Err(e),
            }
        }
        self.set_mcu_mode(McuMode::Nfc, sessions)?;
        self.check_mcu_mode(McuMode::Nfc, sessions)?;
        self.set_mcu_nfc_config(sessions)
    }

    fn nfc_command(
        &self,
        args: &[u8],
        inspector: Inspector,
        sessions: &[&Session],
    ) -> Result<()> {
        let mut inspector = Some(inspector);
        let handles = {
            let mut out = self.lock_output();
            out.reset(report_id::OUT_MCU);
            out.set_nfc_command(args);
            // NFC sequences run on the single right-hand session, so the
            // one inspector is handed to the first session.
            self.transmit_all(&out, RETRY, |_| inspector.take(), sessions)
        };
        Self::await_all(handles)
    }
}

/// NFC reports open with 0x2A and carry 0x05 in the command slot.
fn nfc_header_ok(nfc: &[u8]) -> bool {
    nfc.first() == Some(&0x2A) && nfc.get(1) == Some(&0x00) && nfc.get(2) == Some(&0x05)
}

fn nfc_state_inspector(expect: NfcState) -> Inspector {
    Box::new(move |raw: &[u8]| {
        let report = InputReport::new(raw);
        let nfc = report.ext();
        if report.id() == report_id::IN_NFC_IR
            && nfc_header_ok(nfc)
            && nfc.get(6) == Some(&0x31)
        {
            let state = nfc.get(7).copied().unwrap_or(0xFF);
            trace!("nfc state {state:#04x}");
            if state == expect as u8 {
                return Verdict::Done;
            }
        }
        Verdict::Waiting
    })
}
