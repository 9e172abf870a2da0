//! MCU-side types: the secondary microcontroller's modes and registers,
//! IR camera configuration, and NFC states.
//!
//! The MCU (right Joy-Con and Pro Controller only) owns the NFC reader and
//! the IR camera.  It is driven through 0x21/0x22 sub-commands and
//! 0x11-phrased requests; see the driver core for the sequencing.

/// First-level MCU command (byte 11 of a 0x21 sub-command).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum McuCmd {
    SetMode = 0x21,
    Write = 0x23,
}

/// Second-level MCU command (byte 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum McuSubcmd {
    SetIrMode = 0x01,
    SetIrReg = 0x04,
}

/// Operating mode reported at `ir[7]` of MCU status reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum McuMode {
    Standby = 0x1,
    Nfc = 0x4,
    Ir = 0x5,
    /// Initializing / firmware update.
    Init = 0x6,
}

/// Power state set with sub-command 0x22.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum McuState {
    Suspend = 0,
    Resume = 1,
    Update = 2,
}

/// IR sensor mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IrMode {
    Disabled = 0x2,
    Moment = 0x3,
    /// Wii-style pointing.
    Dpd = 0x4,
    Clustering = 0x6,
    ImageTransfer = 0x7,
    HandSilhouette = 0x8,
    HandImage = 0x9,
    HandBoth = 0xA,
}

/// MCU register addresses (written big-endian on the wire).
pub mod reg {
    /// LSB buffer update time, default 0x32.
    pub const UPDATE_TIME: u16 = 0x0004;
    /// Without finalize, register changes have no effect.
    pub const FINALIZE: u16 = 0x0007;
    /// External light filter enable bits.
    pub const EXT_LIGHT_FILTER: u16 = 0x000E;
    /// IR LED group state, 3 LSBs usable.
    pub const LEDS_STATE: u16 = 0x0010;
    /// LEDs 1/2 intensity, max 0x0F.
    pub const LEDS_1_2_INT: u16 = 0x0011;
    /// LEDs 3/4 intensity, max 0x10.
    pub const LEDS_3_4_INT: u16 = 0x0012;
    /// 0 normal, 1 vertical, 2 horizontal, 3 both.
    pub const FLIP_IMG: u16 = 0x002D;
    /// Resolution via sensor binning/skipping.
    pub const RESOLUTION: u16 = 0x002E;
    /// Digital gain, low 4 bits.
    pub const DIGI_GAIN_LSB: u16 = 0x012E;
    /// Digital gain, high 4 bits.
    pub const DIGI_GAIN_MSB: u16 = 0x012F;
    /// Exposure time LSB, (31200 * us / 1000) & 0xFF.
    pub const EXP_TIME_LSB: u16 = 0x0130;
    /// Exposure time MSB.
    pub const EXP_TIME_MSB: u16 = 0x0131;
    /// 0 manual exposure, 1 max exposure.
    pub const EXP_TIME_MAX: u16 = 0x0132;
    /// ExLF/white pixel stats threshold, default 200.
    pub const EXLF_THR: u16 = 0x0143;
    /// De-noise smoothing algorithms on/off.
    pub const DENOISE_ALG: u16 = 0x0167;
    /// Edge smoothing threshold, default 0x23.
    pub const DENOISE_EDGE: u16 = 0x0168;
    /// Color interpolation threshold, default 0x44.
    pub const DENOISE_COLOR: u16 = 0x0169;

    pub const EXLF_THR_DEFAULT: u8 = 0xC8;
    pub const EXP_TIME_MAX_MANUAL: u8 = 0;
}

/// One register write: 16-bit address plus value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct McuReg {
    pub address: u16,
    pub value: u8,
}

impl McuReg {
    pub fn new(address: u16, value: u8) -> McuReg {
        McuReg { address, value }
    }

    /// The mandatory trailing write that commits a register batch.
    pub fn finalize() -> McuReg {
        McuReg {
            address: reg::FINALIZE,
            value: 1,
        }
    }
}

/// IR LED group flags for [`IrConfigLive::leds`].
pub mod led {
    pub const BRIGHT_AND_DIM: u8 = 0b0000_0000;
    pub const BRIGHT: u8 = 0b0010_0000;
    pub const DIM: u8 = 0b0001_0000;
    pub const NONE: u8 = 0b0011_0000;
    pub const FLASHLIGHT: u8 = 0b0000_0001;
    pub const STROBE: u8 = 0b1000_0000;
}

/// External light filter values.
pub mod ex_filter {
    pub const ON: u8 = 0x03;
    pub const OFF: u8 = 0x00;
}

/// Image flip values.
pub mod flip {
    pub const NORMAL: u8 = 0;
    pub const VERTICAL: u8 = 1;
    pub const HORIZONTAL: u8 = 2;
    pub const BOTH: u8 = 3;
}

/// Capture geometry fixed for the lifetime of one IR session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrConfigFixed {
    pub mode: IrMode,
    /// Sensor binning/skipping pattern for the RESOLUTION register.
    pub resolution: u8,
    /// Highest fragment number of one frame; a frame carries
    /// `fragments + 1` slices of 300 bytes.
    pub fragments: u8,
    /// UPDATE_TIME register value.
    pub update_time: u8,
    pub width: u16,
    pub height: u16,
    /// Required MCU firmware version, big-endian on the wire.
    pub major: u16,
    pub minor: u16,
}

impl IrConfigFixed {
    /// Bytes of one reassembled frame.
    pub fn frame_len(&self) -> usize {
        (usize::from(self.fragments) + 1) * super::ir::IR_FRAGMENT_LEN
    }
}

/// Per-capture tuning written as a register batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrConfigLive {
    /// Shutter time in microseconds, 0..=600.
    pub exposure_us: u16,
    /// LED group flags, see [`led`].
    pub leds: u8,
    /// Intensity for the bright pair (LEDs 1/2).
    pub intensity_bright: u8,
    /// Intensity for the dim pair (LEDs 3/4).
    pub intensity_dim: u8,
    pub ex_light_filter: u8,
    pub digi_gain: u8,
    pub denoise_enabled: bool,
    pub denoise_edge: u8,
    pub denoise_color: u8,
    pub flip: u8,
}

impl IrConfigLive {
    /// Encoded exposure word: `us * 31200 / 1000`.
    pub fn exposure_word(&self) -> u16 {
        ((u32::from(self.exposure_us) * 31200) / 1000) as u16
    }
}

/// Fixed + live halves of one IR capture configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrConfig {
    pub fixed: IrConfigFixed,
    pub live: IrConfigLive,
}

/// The four supported capture resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrResolution {
    R240p,
    R120p,
    R60p,
    R30p,
}

impl IrResolution {
    pub fn config(self) -> IrConfigFixed {
        let (resolution, fragments, update_time, width, height) = match self {
            // Full pixel array.
            IrResolution::R240p => (0b0000_0000, 0xFF, 0x32, 320, 240),
            // Sensor binning [2 x 2].
            IrResolution::R120p => (0b0101_0000, 0x3F, 0x32, 160, 120),
            // Binning [4 x 2] and skipping [1 x 2].
            IrResolution::R60p => (0b0110_0100, 0x0F, 0x32, 80, 60),
            // Binning [4 x 2] and skipping [2 x 4].
            IrResolution::R30p => (0b0110_1001, 0x03, 0x2D, 40, 30),
        };
        IrConfigFixed {
            mode: IrMode::ImageTransfer,
            resolution,
            fragments,
            update_time,
            width,
            height,
            major: 0x0005,
            minor: 0x0018,
        }
    }

    /// The stock capture preset: 100 µs exposure, bright LEDs with strobe,
    /// no external light filter.
    pub fn test_config(self) -> IrConfig {
        IrConfig {
            fixed: self.config(),
            live: IrConfigLive {
                exposure_us: 100,
                leds: led::BRIGHT | led::STROBE,
                intensity_bright: 0x70,
                intensity_dim: 0x70,
                ex_light_filter: ex_filter::OFF,
                digi_gain: 1,
                denoise_enabled: false,
                denoise_edge: 0x7F,
                denoise_color: 0x7F,
                flip: flip::NORMAL,
            },
        }
    }
}

/// NFC reader state reported at `nfc[7]` of 0x31 reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NfcState {
    AwaitingCommand = 0x00,
    TagDetected = 0x09,
    Busy = 0x0B,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_presets_match_protocol_tables() {
        let r240 = IrResolution::R240p.config();
        assert_eq!((r240.fragments, r240.update_time), (0xFF, 0x32));
        assert_eq!((r240.width, r240.height), (320, 240));
        assert_eq!(r240.frame_len(), 256 * 300);

        let r30 = IrResolution::R30p.config();
        assert_eq!((r30.fragments, r30.update_time), (0x03, 0x2D));
        assert_eq!(r30.resolution, 0x69);
        assert_eq!(r30.frame_len(), 4 * 300);
    }

    #[test]
    fn exposure_word_scales_microseconds() {
        let live = IrResolution::R30p.test_config().live;
        assert_eq!(live.exposure_word(), 3120);
    }
}
