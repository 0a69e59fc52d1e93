//! Control report encoding
//!
//! The dock takes a single 65-byte HID output report describing the whole
//! lighting state:
//!
//! | Offset      | Meaning                                   |
//! |-------------|-------------------------------------------|
//! | `0x00`      | report marker, always `0x16`              |
//! | `0x01`      | effect code (STATIC while powered off)    |
//! | `0x02`      | effect speed, 1..=4                       |
//! | `0x03`      | brightness mode, always 2                 |
//! | `0x04..0x10`| four RGB triples, one per zone            |
//!
//! Everything else is zero.

use crate::state::{DesiredState, Effect, Rgb};

/// Length of the control report in bytes
pub const REPORT_LEN: usize = 65;

/// First byte of every report
pub const REPORT_MARKER: u8 = 0x16;

/// Device-level brightness mode; only the high setting is used and dimming
/// is done by scaling the colour channels instead
pub const BRIGHTNESS_MODE: u8 = 2;

/// Byte offsets within the report
pub mod offset {
    pub const MARKER: usize = 0x00;
    pub const EFFECT: usize = 0x01;
    pub const SPEED: usize = 0x02;
    pub const BRIGHTNESS_MODE: usize = 0x03;
    pub const ZONES: usize = 0x04;
}

/// Encoded control report
pub type Report = [u8; REPORT_LEN];

/// Encode the desired state as a control report.
///
/// Powering off is a presentation override: the report carries STATIC with
/// black zones, but `state` itself keeps the configured effect and colours.
pub fn encode(state: &DesiredState) -> Report {
    let mut report = [0u8; REPORT_LEN];

    let effect = if state.power { state.effect } else { Effect::Static };

    report[offset::MARKER] = REPORT_MARKER;
    report[offset::EFFECT] = effect.code();
    report[offset::SPEED] = state.speed;
    report[offset::BRIGHTNESS_MODE] = BRIGHTNESS_MODE;

    for (zone, colour) in state.zones.iter().enumerate() {
        let lit = if state.power {
            colour.scaled(state.brightness)
        } else {
            Rgb::default()
        };
        let at = offset::ZONES + zone * 3;
        report[at..at + 3].copy_from_slice(&[lit.r, lit.g, lit.b]);
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ZONE_COUNT;

    fn red_state() -> DesiredState {
        DesiredState {
            power: true,
            effect: Effect::Static,
            speed: 1,
            brightness: 1.0,
            zones: [Rgb::new(255, 0, 0); ZONE_COUNT],
        }
    }

    #[test]
    fn test_fixed_bytes() {
        for effect in Effect::ALL {
            for speed in 1..=4 {
                let state = DesiredState { effect, speed, ..red_state() };
                let report = encode(&state);
                assert_eq!(report.len(), 65);
                assert_eq!(report[0], 0x16);
                assert_eq!(report[3], 2);
                assert_eq!(report[1], effect.code());
                assert_eq!(report[2], speed);
            }
        }
    }

    #[test]
    fn test_static_red_report() {
        let report = encode(&red_state());

        let mut expected = [0u8; 65];
        expected[..16].copy_from_slice(&[
            0x16, 1, 1, 2, 255, 0, 0, 255, 0, 0, 255, 0, 0, 255, 0, 0,
        ]);
        assert_eq!(report, expected);
    }

    #[test]
    fn test_power_off_report() {
        let state = DesiredState { power: false, ..red_state() };
        let report = encode(&state);

        let mut expected = [0u8; 65];
        expected[..4].copy_from_slice(&[0x16, 1, 1, 2]);
        assert_eq!(report, expected);
    }

    #[test]
    fn test_power_off_forces_static() {
        let state = DesiredState {
            power: false,
            effect: Effect::Breathing,
            speed: 3,
            ..red_state()
        };
        let report = encode(&state);

        assert_eq!(report[1], Effect::Static.code());
        assert_eq!(report[2], 3);
        assert!(report[4..16].iter().all(|&b| b == 0));
        // Stored effect is untouched
        assert_eq!(state.effect, Effect::Breathing);
    }

    #[test]
    fn test_half_brightness_truncates() {
        let state = DesiredState {
            brightness: 0.5,
            zones: [Rgb::new(255, 255, 255); ZONE_COUNT],
            ..red_state()
        };
        let report = encode(&state);

        assert!(report[4..16].iter().all(|&b| b == 127));
    }

    #[test]
    fn test_independent_zones() {
        let zones = [
            Rgb::new(1, 2, 3),
            Rgb::new(40, 50, 60),
            Rgb::new(200, 100, 0),
            Rgb::new(255, 255, 255),
        ];
        let state = DesiredState { brightness: 0.8, zones, ..red_state() };
        let report = encode(&state);

        for (i, zone) in zones.iter().enumerate() {
            let base = 4 + 3 * i;
            assert_eq!(report[base], (f64::from(zone.r) * 0.8).floor() as u8);
            assert_eq!(report[base + 1], (f64::from(zone.g) * 0.8).floor() as u8);
            assert_eq!(report[base + 2], (f64::from(zone.b) * 0.8).floor() as u8);
        }
    }

    #[test]
    fn test_tail_is_zero() {
        let report = encode(&red_state());
        assert!(report[16..].iter().all(|&b| b == 0));
    }
}
