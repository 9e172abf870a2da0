//! Shared driver core used by every controller variant.
//!
//! One operation follows one cycle: serialize against other operations,
//! build the output report under the output lock, install one inspector per
//! attached session, transmit to all of them, then await every handle.  In
//! dual mode the last-awaited result is the one reported to the caller.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use joycon_session::{Inspector, Session, SessionError, TaskHandle, Verdict};

use crate::input::InputReport;
use crate::mcu::McuState;
use crate::output::OutputReport;
use crate::protocol::{flash, report_id, subcmd};
use crate::rumble::RumbleData;
use crate::types::{
    Category, ControllerColor, ControllerData, ControllerInfo, HciMode, HomeLightPattern,
    HostDesc, ImuSensitivity, Player, PlayerFlash, PollType, HOME_LIGHT_MAX_PATTERNS,
};
use crate::{Error, Result};

/// Inspector evaluations granted to every exchange.
pub(crate) const RETRY: u32 = 10;

/// Shared state behind all four controller façades.
pub(crate) struct Core {
    host: HostDesc,
    output: Mutex<OutputReport>,
    /// Serializes whole operations so two methods never interleave their
    /// send-and-await cycles on the same sessions.
    sess_lock: Mutex<()>,
}

/// Match a sub-command reply that echoes the expected id.
fn reply_inspector(expect: u8) -> Inspector {
    Box::new(move |raw: &[u8]| {
        let report = InputReport::new(raw);
        if report.id() == report_id::IN_REPLY && report.reply().subcmd_id() == expect {
            Verdict::Done
        } else {
            Verdict::Waiting
        }
    })
}

impl Core {
    pub fn new(host: HostDesc) -> Core {
        Core {
            host,
            output: Mutex::new(OutputReport::new()),
            sess_lock: Mutex::new(()),
        }
    }

    pub(crate) fn lock_op(&self) -> parking_lot::MutexGuard<'_, ()> {
        self.sess_lock.lock()
    }

    pub(crate) fn lock_output(&self) -> parking_lot::MutexGuard<'_, OutputReport> {
        self.output.lock()
    }

    /// Fan the current output report out to every session, installing one
    /// inspector per session.
    pub(crate) fn transmit_all<F>(
        &self,
        out: &OutputReport,
        retry: u32,
        mut make_inspector: F,
        sessions: &[&Session],
    ) -> Vec<TaskHandle>
    where
        F: FnMut(&Session) -> Option<Inspector>,
    {
        sessions
            .iter()
            .map(|session| session.transmit(retry, Some(out.as_bytes()), make_inspector(session)))
            .collect()
    }

    /// Await every handle; the caller observes the last result.
    pub(crate) fn await_all(handles: Vec<TaskHandle>) -> Result<()> {
        let mut last = Ok(());
        for handle in handles {
            last = handle.wait();
        }
        last.map_err(Error::from)
    }

    /// The common cycle for sub-commands acknowledged with an echo reply.
    fn reply_op<F>(&self, sessions: &[&Session], expect: u8, build: F) -> Result<()>
    where
        F: FnOnce(&mut OutputReport),
    {
        let _op = self.sess_lock.lock();
        let handles = {
            let mut out = self.output.lock();
            out.reset(report_id::OUT_CMD);
            build(&mut out);
            trace!("sending sub-command {}", subcmd::name(expect));
            self.transmit_all(&out, RETRY, |_| Some(reply_inspector(expect)), sessions)
        };
        Self::await_all(handles)
    }

    // ---- pairing and modes ----

    pub fn pair(&self, sessions: &[&Session]) -> Result<()> {
        debug!("pair as \"{}\" ({})", self.host.name, self.host.mac);
        let mac = self.host.mac;
        let name = self.host.name.clone();
        self.reply_op(sessions, subcmd::PAIR, |out| out.set_pair(mac, &name))
    }

    pub fn poll(&self, ty: PollType, sessions: &[&Session]) -> Result<()> {
        debug!("set input report mode {:#04x}", ty as u8);
        self.reply_op(sessions, subcmd::SET_POLL_TYPE, |out| out.set_poll_type(ty))
    }

    pub fn set_player(
        &self,
        player: Player,
        flash: PlayerFlash,
        sessions: &[&Session],
    ) -> Result<()> {
        self.reply_op(sessions, subcmd::SET_PLAYER_LED, |out| {
            out.set_player(player, flash)
        })
    }

    pub fn set_low_power(&self, enable: bool, sessions: &[&Session]) -> Result<()> {
        self.reply_op(sessions, subcmd::SET_LOW_POWER, |out| {
            out.set_low_power(enable)
        })
    }

    pub fn set_elapsed_time(&self, time: u16, sessions: &[&Session]) -> Result<()> {
        self.reply_op(sessions, subcmd::SET_ELAPSED_TIME, |out| {
            out.set_elapsed_time(time)
        })
    }

    pub fn set_hci_mode(&self, mode: HciMode, sessions: &[&Session]) -> Result<()> {
        self.reply_op(sessions, subcmd::HCI_MODE, |out| out.set_hci_mode(mode))
    }

    pub fn set_imu(&self, enable: bool, sessions: &[&Session]) -> Result<()> {
        self.reply_op(sessions, subcmd::ENABLE_IMU, |out| out.set_imu(enable))
    }

    pub fn set_imu_sensitivity(
        &self,
        sens: ImuSensitivity,
        sessions: &[&Session],
    ) -> Result<()> {
        self.reply_op(sessions, subcmd::IMU_SENSITIVITY, |out| {
            out.set_imu_sensitivity(sens)
        })
    }

    pub fn set_vibration(&self, enable: bool, sessions: &[&Session]) -> Result<()> {
        self.reply_op(sessions, subcmd::ENABLE_VIBRATION, |out| {
            out.set_vibration(enable)
        })
    }

    pub fn set_mcu_state(&self, state: McuState, sessions: &[&Session]) -> Result<()> {
        self.reply_op(sessions, subcmd::MCU_STATE, |out| out.set_mcu_state(state))
    }

    pub fn set_home_light(
        &self,
        intensity: u8,
        duration: u8,
        repeat: u8,
        patterns: &[HomeLightPattern],
        sessions: &[&Session],
    ) -> Result<()> {
        if patterns.len() > HOME_LIGHT_MAX_PATTERNS {
            return Err(Error::InvalidArgument("too many home light patterns"));
        }
        self.reply_op(sessions, subcmd::SET_HOME_LIGHT, |out| {
            out.set_home_light(intensity, duration, repeat, patterns)
        })
    }

    // ---- input sampling ----

    /// Wait for the next standard report on every session and combine the
    /// samples into `data`.  A Pro-grip report replaces the sample; Joy-Con
    /// halves are OR-merged so dual mode composes both sides.
    pub fn get_data(&self, data: &mut ControllerData, sessions: &[&Session]) -> Result<()> {
        let shared = Arc::new(Mutex::new(*data));
        let handles: Vec<TaskHandle> = sessions
            .iter()
            .map(|session| {
                let shared = Arc::clone(&shared);
                let inspector: Inspector = Box::new(move |raw: &[u8]| {
                    let report = InputReport::new(raw);
                    match report.id() {
                        report_id::IN_STANDARD | report_id::IN_REPLY | report_id::IN_NFC_IR => {
                            let sample = report.controller_data();
                            let mut acc = shared.lock();
                            if report.state().category == Category::ProGrip as u8 {
                                *acc = sample;
                            } else {
                                acc.merge(&sample);
                            }
                            Verdict::Done
                        }
                        _ => Verdict::Waiting,
                    }
                });
                session.transmit(RETRY, None, Some(inspector))
            })
            .collect();
        let result = Self::await_all(handles);
        *data = *shared.lock();
        result
    }

    pub fn get_info(&self, sessions: &[&Session]) -> Result<ControllerInfo> {
        let found = Arc::new(Mutex::new(None));
        let _op = self.sess_lock.lock();
        let handles = {
            let mut out = self.output.lock();
            out.reset(report_id::OUT_CMD);
            out.set_device_info();
            self.transmit_all(
                &out,
                RETRY,
                |_| {
                    let found = Arc::clone(&found);
                    Some(Box::new(move |raw: &[u8]| {
                        let report = InputReport::new(raw);
                        if report.id() == report_id::IN_REPLY
                            && report.reply().subcmd_id() == subcmd::DEVICE_INFO
                        {
                            if let Some(info) = report.reply().device_info() {
                                *found.lock() = Some(info);
                                return Verdict::Done;
                            }
                        }
                        Verdict::Waiting
                    }) as Inspector)
                },
                sessions,
            )
        };
        Self::await_all(handles)?;
        let info = found.lock().take();
        info.ok_or(Error::Session(SessionError::TimedOut))
    }

    // ---- flash memory ----

    pub fn read_memory(
        &self,
        address: u32,
        length: u8,
        dst: &mut [u8],
        sessions: &[&Session],
    ) -> Result<()> {
        if !flash::valid_address(address) || !flash::valid_length(usize::from(length)) {
            return Err(Error::InvalidArgument("flash window out of range"));
        }
        if dst.len() < usize::from(length) {
            return Err(Error::InvalidArgument("destination shorter than window"));
        }
        let shared = Arc::new(Mutex::new(vec![0u8; usize::from(length)]));
        let _op = self.sess_lock.lock();
        let handles = {
            let mut out = self.output.lock();
            out.reset(report_id::OUT_CMD);
            out.set_flash_read(address, length);
            self.transmit_all(
                &out,
                RETRY,
                |_| {
                    let shared = Arc::clone(&shared);
                    Some(Box::new(move |raw: &[u8]| {
                        let report = InputReport::new(raw);
                        if report.id() != report_id::IN_REPLY
                            || report.reply().subcmd_id() != subcmd::FLASH_READ
                        {
                            return Verdict::Waiting;
                        }
                        let reply = report.reply();
                        trace!(
                            "flash read echo address={:#07x} length={:#04x}",
                            reply.flash_address(),
                            reply.flash_length()
                        );
                        let payload = reply.flash_data();
                        if reply.flash_address() == address
                            && reply.flash_length() == length
                            && payload.len() == usize::from(length)
                        {
                            shared.lock().copy_from_slice(payload);
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
        dst[..usize::from(length)].copy_from_slice(&shared.lock());
        Ok(())
    }

    pub fn write_memory(&self, address: u32, data: &[u8], sessions: &[&Session]) -> Result<()> {
        if !flash::valid_address(address) || !flash::valid_length(data.len()) {
            return Err(Error::InvalidArgument("flash window out of range"));
        }
        let _op = self.sess_lock.lock();
        let handles = {
            let mut out = self.output.lock();
            out.reset(report_id::OUT_CMD);
            out.set_flash_write(address, data);
            self.transmit_all(
                &out,
                RETRY,
                |_| {
                    Some(Box::new(move |raw: &[u8]| {
                        let report = InputReport::new(raw);
                        if report.id() != report_id::IN_REPLY
                            || report.reply().subcmd_id() != subcmd::FLASH_WRITE
                        {
                            return Verdict::Waiting;
                        }
                        let status = report.reply().data().first().copied().unwrap_or(0xFF);
                        trace!("flash write status {status:#04x}");
                        if status == 0 {
                            Verdict::Done
                        } else {
                            Verdict::Error(i32::from(status))
                        }
                    }) as Inspector)
                },
                sessions,
            )
        };
        Self::await_all(handles)
    }

    /// Dump flash into `dst`, window by window, reporting progress after
    /// each one.  Aborts on the first failing window.  Returns the number
    /// of bytes read.
    pub fn backup_memory(
        &self,
        dst: &mut [u8],
        progress: &mut dyn FnMut(usize, usize),
        sessions: &[&Session],
    ) -> Result<usize> {
        let total = dst.len().min(flash::MEM_SIZE);
        let mut address = 0usize;
        while address < total {
            let size = (total - address).min(flash::MEM_STEP);
            self.read_memory(
                address as u32,
                size as u8,
                &mut dst[address..address + size],
                sessions,
            )
            .map_err(|e| {
                debug!("backup aborted at {address:#07x}: {e}");
                e
            })?;
            address += size;
            progress(flash::MEM_SIZE, address);
        }
        debug!("backup done, {address} bytes");
        Ok(address)
    }

    pub fn restore_memory(
        &self,
        _src: &[u8],
        _progress: &mut dyn FnMut(usize, usize),
        _sessions: &[&Session],
    ) -> Result<usize> {
        Err(Error::Unsupported)
    }

    pub fn get_color(&self, sessions: &[&Session]) -> Result<ControllerColor> {
        let mut raw = [0u8; flash::COLOR_LEN];
        self.read_memory(flash::ADDR_COLOR, flash::COLOR_LEN as u8, &mut raw, sessions)?;
        ControllerColor::from_bytes(&raw)
            .ok_or(Error::InvalidArgument("malformed color record"))
    }

    pub fn set_color(&self, color: &ControllerColor, sessions: &[&Session]) -> Result<()> {
        self.write_memory(flash::ADDR_COLOR, &color.to_bytes(), sessions)
    }

    // ---- rumble ----

    /// Fire-and-forget rumble frame; both sides `None` is a no-op.
    pub fn rumble(
        &self,
        left: Option<&RumbleData>,
        right: Option<&RumbleData>,
        sessions: &[&Session],
    ) -> Result<()> {
        if left.is_none() && right.is_none() {
            return Ok(());
        }
        let handles = {
            let mut out = self.output.lock();
            out.reset(report_id::OUT_RUMBLE);
            out.set_rumble(left, right);
            self.transmit_all(&out, RETRY, |_| None, sessions)
        };
        Self::await_all(handles)
    }
}
