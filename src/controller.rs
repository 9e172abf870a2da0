//! The four controller façades: Pro Controller, left and right Joy-Con,
//! and the dual pair.
//!
//! All four implement [`Controller`] and differ only in which session(s)
//! each operation is fanned out to.  The dual variant owns two sessions,
//! sends every command to both, and OR-merges the inputs; MCU operations
//! always route to the right-hand session.

use std::fmt;

use joycon_session::{PushMode, Session, Transport};

use crate::driver::Core;
use crate::ir::FrameSink;
use crate::mcu::{IrConfig, IrConfigFixed, IrConfigLive, IrMode, IrResolution, McuMode, McuReg, McuState};
use crate::rumble::{RumbleData, RumbleDataF};
use crate::types::{
    Category, ControllerColor, ControllerData, ControllerInfo, HciMode, HomeLightPattern,
    HostDesc, ImuSensitivity, Player, PlayerFlash, PollType,
};
use crate::{Error, Result};

/// Progress callback for long flash transfers: `(total, current)` in bytes.
pub type Progress<'a> = &'a mut dyn FnMut(usize, usize);

/// The operations every Switch controller supports.
pub trait Controller: Send {
    fn category(&self) -> Category;

    /// Write this host's pairing record into the controller.
    fn pair(&self) -> Result<()>;

    /// Select which input report the controller emits.
    fn poll(&self, ty: PollType) -> Result<()>;

    /// Dump flash into `dst` (clamped to the 512 KiB flash size), calling
    /// `progress` after every window.  Returns the number of bytes read.
    fn backup_memory(&self, dst: &mut [u8], progress: Progress) -> Result<usize>;

    /// Flash restore surface; not implemented by current firmware drivers.
    fn restore_memory(&self, src: &[u8], progress: Progress) -> Result<usize>;

    /// Wait for the next input report and merge its buttons/sticks into
    /// `data`.
    fn get_data(&self, data: &mut ControllerData) -> Result<()>;

    fn get_color(&self) -> Result<ControllerColor>;
    fn set_color(&self, color: &ControllerColor) -> Result<()>;

    fn set_player(&self, player: Player, flash: PlayerFlash) -> Result<()>;
    fn set_low_power(&self, enable: bool) -> Result<()>;
    fn set_imu(&self, enable: bool) -> Result<()>;
    fn set_rumble(&self, enable: bool) -> Result<()>;

    /// Drive the actuators with pre-encoded wire data.  `None` leaves a
    /// side untouched; both `None` is a no-op.
    fn rumble(&self, left: Option<&RumbleData>, right: Option<&RumbleData>) -> Result<()>;

    /// Encode float frequency/amplitude pairs and delegate to [`rumble`].
    ///
    /// [`rumble`]: Controller::rumble
    fn rumblef(&self, left: Option<&RumbleDataF>, right: Option<&RumbleDataF>) -> Result<()> {
        let left = left.map(RumbleData::from_f).transpose()?.unwrap_or_default();
        let right = right.map(RumbleData::from_f).transpose()?.unwrap_or_default();
        self.rumble(Some(&left), Some(&right))
    }

    /// Firmware version, reported category and MAC address.
    fn get_info(&self) -> Result<ControllerInfo>;
}

macro_rules! delegate_controller_impl {
    ($sessions:ident) => {
        fn pair(&self) -> Result<()> {
            self.core.pair(&self.$sessions())
        }
        fn poll(&self, ty: PollType) -> Result<()> {
            self.core.poll(ty, &self.$sessions())
        }
        fn backup_memory(&self, dst: &mut [u8], progress: Progress) -> Result<usize> {
            self.core.backup_memory(dst, progress, &self.$sessions())
        }
        fn restore_memory(&self, src: &[u8], progress: Progress) -> Result<usize> {
            self.core.restore_memory(src, progress, &self.$sessions())
        }
        fn get_data(&self, data: &mut ControllerData) -> Result<()> {
            self.core.get_data(data, &self.$sessions())
        }
        fn get_color(&self) -> Result<ControllerColor> {
            self.core.get_color(&self.$sessions())
        }
        fn set_color(&self, color: &ControllerColor) -> Result<()> {
            self.core.set_color(color, &self.$sessions())
        }
        fn set_player(&self, player: Player, flash: PlayerFlash) -> Result<()> {
            self.core.set_player(player, flash, &self.$sessions())
        }
        fn set_low_power(&self, enable: bool) -> Result<()> {
            self.core.set_low_power(enable, &self.$sessions())
        }
        fn set_imu(&self, enable: bool) -> Result<()> {
            self.core.set_imu(enable, &self.$sessions())
        }
        fn set_rumble(&self, enable: bool) -> Result<()> {
            self.core.set_vibration(enable, &self.$sessions())
        }
        fn get_info(&self) -> Result<ControllerInfo> {
            self.core.get_info(&self.$sessions())
        }
    };
}

// ---- Pro Controller ----

/// Pro Controller (PID 0x2009): one session, both rumble slots, MCU-backed
/// home light and NFC.
pub struct ProController {
    core: Core,
    session: Session,
}

impl ProController {
    pub const PID: u16 = 0x2009;

    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_host(transport, HostDesc::default())
    }

    pub fn with_host(transport: Box<dyn Transport>, host: HostDesc) -> Self {
        ProController {
            core: Core::new(host),
            session: Session::new(transport, PushMode::Free),
        }
    }

    fn sessions(&self) -> [&Session; 1] {
        [&self.session]
    }

    /// Read one flash window (at most 0x1D bytes) into `dst`.
    pub fn read_memory(&self, address: u32, length: u8, dst: &mut [u8]) -> Result<()> {
        self.core.read_memory(address, length, dst, &self.sessions())
    }

    /// Write one flash window (at most 0x1D bytes).
    pub fn write_memory(&self, address: u32, data: &[u8]) -> Result<()> {
        self.core.write_memory(address, data, &self.sessions())
    }

    pub fn set_elapsed_time(&self, time: u16) -> Result<()> {
        self.core.set_elapsed_time(time, &self.sessions())
    }

    pub fn set_imu_sensitivity(&self, sens: ImuSensitivity) -> Result<()> {
        self.core.set_imu_sensitivity(sens, &self.sessions())
    }

    pub fn set_hci_mode(&self, mode: HciMode) -> Result<()> {
        self.core.set_hci_mode(mode, &self.sessions())
    }

    pub fn set_home_light(
        &self,
        intensity: u8,
        duration: u8,
        repeat: u8,
        patterns: &[HomeLightPattern],
    ) -> Result<()> {
        self.core
            .set_home_light(intensity, duration, repeat, patterns, &self.sessions())
    }

    pub fn set_mcu_state(&self, state: McuState) -> Result<()> {
        self.core.set_mcu_state(state, &self.sessions())
    }

    pub fn set_mcu_mode(&self, mode: McuMode) -> Result<()> {
        self.core.set_mcu_mode(mode, &self.sessions())
    }

    pub fn check_mcu_mode(&self, mode: McuMode) -> Result<()> {
        self.core.check_mcu_mode(mode, &self.sessions())
    }

    pub fn set_mcu_nfc_config(&self) -> Result<()> {
        self.core.set_mcu_nfc_config(&self.sessions())
    }

    pub fn get_nfc_ntag(&self) -> Result<()> {
        self.core.get_nfc_ntag(&self.sessions())
    }

    pub fn get_nfc_data(&self) -> Result<()> {
        self.core.get_nfc_data(&self.session)
    }
}

impl Controller for ProController {
    fn category(&self) -> Category {
        Category::ProGrip
    }

    fn rumble(&self, left: Option<&RumbleData>, right: Option<&RumbleData>) -> Result<()> {
        self.core.rumble(left, right, &self.sessions())
    }

    delegate_controller_impl!(sessions);
}

// ---- Left Joy-Con ----

/// Left Joy-Con (PID 0x2006): one session, left rumble slot only.
pub struct JoyConL {
    core: Core,
    session: Session,
}

impl JoyConL {
    pub const PID: u16 = 0x2006;

    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_host(transport, HostDesc::default())
    }

    pub fn with_host(transport: Box<dyn Transport>, host: HostDesc) -> Self {
        JoyConL {
            core: Core::new(host),
            session: Session::new(transport, PushMode::Free),
        }
    }

    fn sessions(&self) -> [&Session; 1] {
        [&self.session]
    }

    /// Read one flash window (at most 0x1D bytes) into `dst`.
    pub fn read_memory(&self, address: u32, length: u8, dst: &mut [u8]) -> Result<()> {
        self.core.read_memory(address, length, dst, &self.sessions())
    }

    /// Write one flash window (at most 0x1D bytes).
    pub fn write_memory(&self, address: u32, data: &[u8]) -> Result<()> {
        self.core.write_memory(address, data, &self.sessions())
    }

    pub fn set_elapsed_time(&self, time: u16) -> Result<()> {
        self.core.set_elapsed_time(time, &self.sessions())
    }

    pub fn set_imu_sensitivity(&self, sens: ImuSensitivity) -> Result<()> {
        self.core.set_imu_sensitivity(sens, &self.sessions())
    }

    pub fn set_hci_mode(&self, mode: HciMode) -> Result<()> {
        self.core.set_hci_mode(mode, &self.sessions())
    }
}

impl Controller for JoyConL {
    fn category(&self) -> Category {
        Category::JoyConL
    }

    /// A left Joy-Con only has the left actuator; the right slot is
    /// dropped.
    fn rumble(&self, left: Option<&RumbleData>, _right: Option<&RumbleData>) -> Result<()> {
        self.core.rumble(left, None, &self.sessions())
    }

    delegate_controller_impl!(sessions);
}

// ---- Right Joy-Con ----

/// Right Joy-Con (PID 0x2007): one session, right rumble slot, and the
/// full MCU surface — home light, NFC reader and IR camera.
pub struct JoyConR {
    core: Core,
    session: Session,
}

impl JoyConR {
    pub const PID: u16 = 0x2007;

    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self::with_host(transport, HostDesc::default())
    }

    pub fn with_host(transport: Box<dyn Transport>, host: HostDesc) -> Self {
        JoyConR {
            core: Core::new(host),
            session: Session::new(transport, PushMode::Free),
        }
    }

    fn sessions(&self) -> [&Session; 1] {
        [&self.session]
    }

    /// Read one flash window (at most 0x1D bytes) into `dst`.
    pub fn read_memory(&self, address: u32, length: u8, dst: &mut [u8]) -> Result<()> {
        self.core.read_memory(address, length, dst, &self.sessions())
    }

    /// Write one flash window (at most 0x1D bytes).
    pub fn write_memory(&self, address: u32, data: &[u8]) -> Result<()> {
        self.core.write_memory(address, data, &self.sessions())
    }

    pub fn set_elapsed_time(&self, time: u16) -> Result<()> {
        self.core.set_elapsed_time(time, &self.sessions())
    }

    pub fn set_imu_sensitivity(&self, sens: ImuSensitivity) -> Result<()> {
        self.core.set_imu_sensitivity(sens, &self.sessions())
    }

    pub fn set_hci_mode(&self, mode: HciMode) -> Result<()> {
        self.core.set_hci_mode(mode, &self.sessions())
    }

    pub fn set_home_light(
        &self,
        intensity: u8,
        duration: u8,
        repeat: u8,
        patterns: &[HomeLightPattern],
    ) -> Result<()> {
        self.core
            .set_home_light(intensity, duration, repeat, patterns, &self.sessions())
    }

    pub fn set_mcu_state(&self, state: McuState) -> Result<()> {
        self.core.set_mcu_state(state, &self.sessions())
    }

    pub fn set_mcu_mode(&self, mode: McuMode) -> Result<()> {
        self.core.set_mcu_mode(mode, &self.sessions())
    }

    pub fn check_mcu_mode(&self, mode: McuMode) -> Result<()> {
        self.core.check_mcu_mode(mode, &self.sessions())
    }

    pub fn set_mcu_ir_config_fixed(&self, fixed: &IrConfigFixed) -> Result<()> {
        self.core.set_mcu_ir_config_fixed(fixed, &self.sessions())
    }

    pub fn set_mcu_ir_config_live(&self, live: &IrConfigLive) -> Result<()> {
        self.core.set_mcu_ir_config_live(live, &self.sessions())
    }

    pub fn check_mcu_ir_mode(&self, mode: IrMode) -> Result<()> {
        self.core.check_mcu_ir_mode(mode, &self.sessions())
    }

    pub fn set_mcu_ir_registers(&self, regs: &[McuReg]) -> Result<()> {
        self.core.set_mcu_ir_registers(regs, &self.sessions())
    }

    /// Full IR capture session; `sink` receives each completed frame and
    /// returns `true` to stop streaming.  Requires a transport opened with
    /// the 362-byte extended input report size.
    pub fn set_ir_config<F>(&self, config: &IrConfig, sink: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.core
            .set_ir_config(config, Box::new(sink) as FrameSink, &self.session)
    }

    /// Stream frames from an already configured camera.
    pub fn get_ir_image<F>(&self, fixed: &IrConfigFixed, sink: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.core
            .get_ir_image(fixed, Box::new(sink) as FrameSink, &self.session)
    }

    /// Capture with the stock preset at the given resolution.
    pub fn test_ir<F>(&self, resolution: IrResolution, sink: F) -> Result<()>
    where
        F: FnMut(&[u8]) -> bool + Send + 'static,
    {
        self.core
            .test_ir(resolution, Box::new(sink) as FrameSink, &self.session)
    }

    pub fn set_mcu_nfc_config(&self) -> Result<()> {
        self.core.set_mcu_nfc_config(&self.sessions())
    }

    pub fn get_nfc_ntag(&self) -> Result<()> {
        self.core.get_nfc_ntag(&self.sessions())
    }

    pub fn get_nfc_data(&self) -> Result<()> {
        self.core.get_nfc_data(&self.session)
    }
}

impl Controller for JoyConR {
    fn category(&self) -> Category {
        Category::JoyConR
    }

    /// A right Joy-Con only has the right actuator; the left slot is
    /// dropped.
    fn rumble(&self, _left: Option<&RumbleData>, right: Option<&RumbleData>) -> Result<()> {
        self.core.rumble(None, right, &self.sessions())
    }

    delegate_controller_impl!(sessions);
}

// ---- Dual Joy-Con ----

/// A left/right Joy-Con pair driven as one controller.  Commands fan out
/// to both sessions, inputs are OR-merged, and the caller observes the
/// last-awaited result; MCU operations go to the right half only.
pub struct JoyConDual {
    core: Core,
    left: Session,
    right: Session,
}

impl JoyConDual {
    pub fn new(left: Box<dyn Transport>, right: Box<dyn Transport>) -> Self {
        Self::with_host(left, right, HostDesc::default())
    }

    pub fn with_host(
        left: Box<dyn Transport>,
        right: Box<dyn Transport>,
        host: HostDesc,
    ) -> Self {
        JoyConDual {
            core: Core::new(host),
            left: Session::new(left, PushMode::Free),
            right: Session::new(right, PushMode::Free),
        }
    }

    fn sessions(&self) -> [&Session; 2] {
        [&self.left, &self.right]
    }

    fn right_session(&self) -> [&Session; 1] {
        [&self.right]
    }

    /// Read one flash window (at most 0x1D bytes) into `dst`.
    pub fn read_memory(&self, address: u32, length: u8, dst: &mut [u8]) -> Result<()> {
        self.core.read_memory(address, length, dst, &self.sessions())
    }

    /// Write one flash window (at most 0x1D bytes).
    pub fn write_memory(&self, address: u32, data: &[u8]) -> Result<()> {
        self.core.write_memory(address, data, &self.sessions())
    }

    pub fn set_elapsed_time(&self, time: u16) -> Result<()> {
        self.core.set_elapsed_time(time, &self.sessions())
    }

    pub fn set_imu_sensitivity(&self, sens: ImuSensitivity) -> Result<()> {
        self.core.set_imu_sensitivity(sens, &self.sessions())
    }

    pub fn set_home_light(
        &self,
        intensity: u8,
        duration: u8,
        repeat: u8,
        patterns: &[HomeLightPattern],
    ) -> Result<()> {
        self.core
            .set_home_light(intensity, duration, repeat, patterns, &self.right_session())
    }

    pub fn set_mcu_state(&self, state: McuState) -> Result<()> {
        self.core.set_mcu_state(state, &self.right_session())
    }

    pub fn set_mcu_mode(&self, mode: McuMode) -> Result<()> {
        self.core.set_mcu_mode(mode, &self.right_session())
    }

    pub fn check_mcu_mode(&self, mode: McuMode) -> Result<()> {
        self.core.check_mcu_mode(mode, &self.right_session())
    }
}

impl Controller for JoyConDual {
    fn category(&self) -> Category {
        Category::JoyConDual
    }

    fn rumble(&self, left: Option<&RumbleData>, right: Option<&RumbleData>) -> Result<()> {
        self.core.rumble(left, right, &self.sessions())
    }

    delegate_controller_impl!(sessions);
}

impl fmt::Debug for dyn Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Controller").field(&self.category()).finish()
    }
}

// ---- Category factory ----

/// Build the controller variant for `category` from caller-supplied
/// transports: one transport for the single variants, left then right for
/// the dual pair.
pub fn open(
    category: Category,
    mut transports: Vec<Box<dyn Transport>>,
) -> Result<Box<dyn Controller>> {
    fn take_single(transports: &mut Vec<Box<dyn Transport>>) -> Result<Box<dyn Transport>> {
        if transports.len() != 1 {
            return Err(Error::InvalidArgument("one transport expected"));
        }
        transports
            .pop()
            .ok_or(Error::InvalidArgument("missing transport"))
    }

    match category {
        Category::ProGrip => Ok(Box::new(ProController::new(take_single(&mut transports)?))),
        Category::JoyConL => Ok(Box::new(JoyConL::new(take_single(&mut transports)?))),
        Category::JoyConR => Ok(Box::new(JoyConR::new(take_single(&mut transports)?))),
        Category::JoyConDual => {
            if transports.len() != 2 {
                return Err(Error::InvalidArgument("dual mode takes two transports"));
            }
            let right = transports
                .pop()
                .ok_or(Error::InvalidArgument("missing transport"))?;
            let left = transports
                .pop()
                .ok_or(Error::InvalidArgument("missing transport"))?;
            Ok(Box::new(JoyConDual::new(left, right)))
        }
    }
}
