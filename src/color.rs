/*!
 # Color calibration

 Turns one requested RGB color into the calibrated per-zone bytes a model
 expects. Left and right rings on several models differ in perceived
 brightness at equal raw values, so each zone has its own scaling chain.
*/

use crate::protocol::{ChannelOrder, ProtocolEntry, ZoneMap};

/// An RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn from_channels(channels: [u8; 3]) -> Self {
        Self::new(channels[0], channels[1], channels[2])
    }

    pub fn channels(self) -> [u8; 3] {
        [self.r, self.g, self.b]
    }

    /// Reorders the channels; output channel `i` is input channel `order[i]`
    pub fn remap(self, order: ChannelOrder) -> Self {
        let c = self.channels();
        Self::from_channels([c[order[0]], c[order[1]], c[order[2]]])
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RGB({}, {}, {})", self.r, self.g, self.b)
    }
}

/// Scales one channel to `round(value * scalar / 255)`.
///
/// A lit channel never scales down to zero.
pub fn scale_channel(value: u8, scalar: u8) -> u8 {
    if value == 0 {
        return 0;
    }
    let scaled = (u32::from(value) * u32::from(scalar) + 127) / 255;
    scaled.max(1) as u8
}

pub fn scale(color: Rgb, scalar: u8) -> Rgb {
    Rgb::from_channels(color.channels().map(|c| scale_channel(c, scalar)))
}

/// Applies a scaling chain in order
pub fn calibrate(color: Rgb, chain: &[u8]) -> Rgb {
    chain.iter().fold(color, |c, &scalar| scale(c, scalar))
}

/// Calibrated colors for each LED group of a model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneColors {
    pub left: Rgb,
    pub right: Rgb,
    /// Only on models with a button ring
    pub button: Option<Rgb>,
}

pub fn zone_colors(color: Rgb, entry: &ProtocolEntry) -> ZoneColors {
    let cal = &entry.calibration;
    ZoneColors {
        left: calibrate(color, cal.left),
        right: calibrate(color, cal.right),
        button: entry.button_zones.map(|_| calibrate(color, cal.button)),
    }
}

/// One zone's three sub-pixel values, starting at position `zone`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneWrite {
    pub zone: u8,
    pub color: Rgb,
}

/// Expands a group color into per-zone writes, applying each zone's channel
/// order. Zones come out in map order.
pub fn zone_writes(color: Rgb, zones: ZoneMap) -> Vec<ZoneWrite> {
    zones
        .iter()
        .map(|&(zone, order)| ZoneWrite {
            zone,
            color: color.remap(order),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use crate::protocol::{self, KUN_STICK_ZONES, STANDARD_ZONES};

    #[test]
    fn lit_channels_never_reach_zero() {
        for value in 1..=255u8 {
            for scalar in [1u8, 32, 64, 69, 192, 204, 255] {
                assert!(scale_channel(value, scalar) >= 1, "{value} * {scalar}");
            }
        }
        assert_eq!(scale_channel(0, 255), 0);
    }

    #[test]
    fn scaling_rounds_to_nearest() {
        assert_eq!(scale_channel(255, 192), 192);
        assert_eq!(scale_channel(255, 255), 255);
        assert_eq!(scale_channel(128, 64), 32);
        // 100 * 69 / 255 = 27.06
        assert_eq!(scale_channel(100, 69), 27);
        // 200 * 32 / 255 = 25.10
        assert_eq!(scale_channel(200, 32), 25);
    }

    #[test]
    fn chained_scaling_matches_product_scalar() {
        for value in 0..=255u8 {
            for (s1, s2) in [(192u8, 64u8), (192, 32), (192, 69), (192, 204), (255, 128)] {
                let chained = scale_channel(scale_channel(value, s1), s2);
                let product = (u32::from(s1) * u32::from(s2) / 255) as u8;
                let direct = scale_channel(value, product);
                assert!(
                    chained.abs_diff(direct) <= 2,
                    "{value}: chained {chained} vs direct {direct}"
                );
            }
        }
    }

    #[test]
    fn mendocino_dims_right_ring_more_than_left() {
        let entry = protocol::lookup(Model::AirPlusMendo).unwrap();
        let zones = zone_colors(Rgb::new(255, 255, 255), entry);

        // 255 -> 192 -> 48 on the left, 192 -> 24 on the right
        assert_eq!(zones.left, Rgb::new(48, 48, 48));
        assert_eq!(zones.right, Rgb::new(24, 24, 24));
        assert_eq!(zones.button, None);
    }

    #[test]
    fn dim_colors_stay_symmetric_in_lit_channels() {
        let entry = protocol::lookup(Model::AirPlusMendo).unwrap();
        let zones = zone_colors(Rgb::new(2, 0, 1), entry);

        assert_eq!(zones.left, Rgb::new(1, 0, 1));
        assert_eq!(zones.right, Rgb::new(1, 0, 1));
    }

    #[test]
    fn kun_has_a_button_color() {
        let entry = protocol::lookup(Model::Kun).unwrap();
        let zones = zone_colors(Rgb::new(255, 0, 0), entry);
        assert_eq!(zones.button, Some(Rgb::new(192, 0, 0)));
    }

    #[test]
    fn standard_zones_keep_channel_order() {
        let writes = zone_writes(Rgb::new(10, 20, 30), STANDARD_ZONES);
        let zones: Vec<u8> = writes.iter().map(|w| w.zone).collect();
        assert_eq!(zones, vec![3, 6, 9, 12]);
        assert!(writes.iter().all(|w| w.color == Rgb::new(10, 20, 30)));
    }

    #[test]
    fn kun_zones_rotate_channels() {
        let writes = zone_writes(Rgb::new(10, 20, 30), KUN_STICK_ZONES);
        assert_eq!(writes[0].color, Rgb::new(20, 10, 30));
        assert_eq!(writes[1].color, Rgb::new(20, 30, 10));
        assert_eq!(writes[2].color, Rgb::new(30, 10, 20));
        assert_eq!(writes[3].color, Rgb::new(30, 20, 10));
    }
}
