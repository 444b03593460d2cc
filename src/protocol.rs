/*!
 # Protocol table

 Register addresses, command bytes and per-model data for the AYANEO LED
 controllers. All values come from reverse engineering and are replayed
 verbatim; nothing here is derived at runtime.
*/

use crate::model::{Family, Model};
use crate::transport::Register;

// Legacy controller registers (direct EC access)

/// Selects the LED group to write
pub const LED_PWM_CONTROL: u8 = 0x6d;
/// Zone position / command address within the group
pub const LED_POS: u8 = 0xb1;
/// Value for the selected position
pub const LED_BRIGHTNESS: u8 = 0xb2;
/// Commits the pending write
pub const LED_MODE_REG: u8 = 0xbf;

pub const LED_MODE_RELEASE: u8 = 0x00;
pub const LED_MODE_WRITE: u8 = 0x10;
pub const LED_MODE_HOLD: u8 = 0xfe;

// Modern controller registers (EC RAM window)

pub const MC_ADDR_LEFT: u8 = 0xb0;
pub const MC_ADDR_RIGHT: u8 = 0x70;
pub const MC_CLOSE_LEFT: u8 = 0xc6;
pub const MC_CLOSE_RIGHT: u8 = 0x86;
pub const MC_CLOSE_VALUE: u8 = 0x01;
pub const MC_MODE_ADDR: u8 = 0x87;
pub const MC_MODE_HOLD: u8 = 0xa5;
pub const MC_MODE_RELEASE: u8 = 0x00;

// Commands shared by both controllers, written as (position, value)

pub const CMD_ENABLE_ADDR: u8 = 0x02;
pub const CMD_ENABLE_ON: u8 = 0xb1;
pub const CMD_ENABLE_OFF: u8 = 0x31;
pub const CMD_ENABLE_RESET: u8 = 0xc0;
pub const CMD_PATTERN_ADDR: u8 = 0x0f;
pub const CMD_PATTERN_OFF: u8 = 0x00;
pub const CMD_FADE_ADDR: u8 = 0x10;
pub const CMD_FADE_OFF: u8 = 0x00;
/// Per-sector mode registers, set to [`CMD_SECTOR_RGB`] for static color
pub const CMD_SECTOR_ADDRS: [u8; 4] = [0x11, 0x12, 0x13, 0x14];
pub const CMD_SECTOR_RGB: u8 = 0x05;
pub const CMD_WATCHDOG_ADDR: u8 = 0x15;
pub const CMD_WATCHDOG_ON: u8 = 0x07;

// Bypass charging

/// First of the five EC firmware version bytes
pub const EC_VERSION_BASE: u8 = 0x00;
pub const BYPASS_CHARGE_CONTROL: u8 = 0xd1;
/// Stops charging the battery while on external power
pub const BYPASS_CHARGE_OPEN: u8 = 0x01;
pub const BYPASS_CHARGE_CLOSE: u8 = 0x65;

/// Base calibration applied to every zone on every model
pub const BASE_SCALE: u8 = 192;

/// LED group selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Group {
    Left,
    Right,
    /// Both sticks, used to close a command sequence
    LeftRight,
    Button,
}

impl Group {
    pub fn code(self) -> u8 {
        match self {
            Group::Left => 0x01,
            Group::Right => 0x02,
            Group::LeftRight => 0x03,
            Group::Button => 0x04,
        }
    }
}

/// Channel order for one zone: output channel `i` takes input channel
/// `order[i]`
pub type ChannelOrder = [usize; 3];

pub const RGB: ChannelOrder = [0, 1, 2];

/// Zone base positions and their channel order
pub type ZoneMap = &'static [(u8, ChannelOrder)];

/// The four quadrants of a stick ring, in RGB order
pub const STANDARD_ZONES: ZoneMap = &[(3, RGB), (6, RGB), (9, RGB), (12, RGB)];

/// KUN stick rings wire each quadrant differently
pub const KUN_STICK_ZONES: ZoneMap = &[(3, [1, 0, 2]), (6, [1, 2, 0]), (9, [2, 0, 1]), (12, [2, 1, 0])];

pub const KUN_BUTTON_ZONES: ZoneMap = &[(12, [2, 0, 1])];

/// Scaling chain per zone. Each scalar `s` maps a channel to `c * s / 255`.
#[derive(Debug, Clone, Copy)]
pub struct Calibration {
    pub left: &'static [u8],
    pub right: &'static [u8],
    pub button: &'static [u8],
}

const UNIFORM: Calibration = Calibration {
    left: &[BASE_SCALE],
    right: &[BASE_SCALE],
    button: &[BASE_SCALE],
};

/// Bypass charge support for one model
#[derive(Debug, Clone, Copy)]
pub struct BypassSpec {
    /// First byte of the version fingerprint
    pub version: Register,
    /// Oldest EC firmware that handles the switch safely
    pub min_version: [u8; 5],
    pub control: Register,
}

/// Everything the driver needs to know about one model
#[derive(Debug, Clone, Copy)]
pub struct ProtocolEntry {
    pub model: Model,
    pub family: Family,
    pub calibration: Calibration,
    pub left_zones: ZoneMap,
    pub right_zones: ZoneMap,
    pub button_zones: Option<ZoneMap>,
    pub bypass: Option<BypassSpec>,
}

const fn legacy(model: Model, calibration: Calibration) -> ProtocolEntry {
    ProtocolEntry {
        model,
        family: Family::Legacy,
        calibration,
        left_zones: STANDARD_ZONES,
        right_zones: STANDARD_ZONES,
        button_zones: None,
        bypass: None,
    }
}

const fn modern(model: Model, calibration: Calibration) -> ProtocolEntry {
    ProtocolEntry {
        family: Family::Modern,
        ..legacy(model, calibration)
    }
}

static TABLE: [ProtocolEntry; 12] = [
    legacy(
        Model::Air,
        Calibration {
            left: &[BASE_SCALE, 69],
            ..UNIFORM
        },
    ),
    legacy(
        Model::Air1s,
        Calibration {
            left: &[BASE_SCALE, 69],
            ..UNIFORM
        },
    ),
    legacy(
        Model::Air1sLimited,
        Calibration {
            right: &[BASE_SCALE, 204],
            ..UNIFORM
        },
    ),
    ProtocolEntry {
        bypass: Some(BypassSpec {
            version: Register::Ram(EC_VERSION_BASE),
            min_version: [0x03, 0x00, 0x00, 0x00, 0x26],
            control: Register::Ram(BYPASS_CHARGE_CONTROL),
        }),
        ..modern(
            Model::AirPlus,
            Calibration {
                left: &[BASE_SCALE, 64],
                right: &[BASE_SCALE, 32],
                ..UNIFORM
            },
        )
    },
    legacy(
        Model::AirPlusMendo,
        Calibration {
            left: &[BASE_SCALE, 64],
            right: &[BASE_SCALE, 32],
            ..UNIFORM
        },
    ),
    legacy(
        Model::AirPro,
        Calibration {
            left: &[BASE_SCALE, 69],
            ..UNIFORM
        },
    ),
    legacy(Model::Ayaneo2, UNIFORM),
    ProtocolEntry {
        bypass: Some(BypassSpec {
            version: Register::Direct(EC_VERSION_BASE),
            min_version: [0x08, 0x04, 0x00, 0x00, 0x2a],
            control: Register::Direct(BYPASS_CHARGE_CONTROL),
        }),
        ..legacy(Model::Ayaneo2s, UNIFORM)
    },
    legacy(Model::Geek, UNIFORM),
    ProtocolEntry {
        bypass: Some(BypassSpec {
            version: Register::Direct(EC_VERSION_BASE),
            min_version: [0x08, 0x04, 0x00, 0x00, 0x2a],
            control: Register::Direct(BYPASS_CHARGE_CONTROL),
        }),
        ..legacy(Model::Geek1s, UNIFORM)
    },
    ProtocolEntry {
        left_zones: KUN_STICK_ZONES,
        right_zones: KUN_STICK_ZONES,
        button_zones: Some(KUN_BUTTON_ZONES),
        bypass: Some(BypassSpec {
            version: Register::Direct(EC_VERSION_BASE),
            min_version: [0x08, 0x05, 0x00, 0x00, 0x10],
            control: Register::Direct(BYPASS_CHARGE_CONTROL),
        }),
        ..legacy(Model::Kun, UNIFORM)
    },
    ProtocolEntry {
        bypass: Some(BypassSpec {
            version: Register::Ram(EC_VERSION_BASE),
            min_version: [0x01, 0x00, 0x00, 0x00, 0x0c],
            control: Register::Ram(BYPASS_CHARGE_CONTROL),
        }),
        ..modern(Model::Slide, UNIFORM)
    },
];

/// Looks up the protocol entry for a model
pub fn lookup(model: Model) -> Option<&'static ProtocolEntry> {
    TABLE.iter().find(|entry| entry.model == model)
}
