use serde::{Deserialize, Serialize};
use std::fmt;

/// Input channel identifier as used on the wire (two decimal digits)
pub type ChannelId = u8;

/// Raw 3-digit volume code as used on the wire
pub type VolumeCode = u16;

/// Volume in decibels
pub type Decibels = f64;

/// Lowest volume the receiver reports (raw code 0)
pub const VOLUME_FLOOR_DB: Decibels = -80.5;

/// Size of one raw volume step
pub const VOLUME_STEP_DB: Decibels = 0.5;

/// Lowest volume a set command may request (raw code [`VOLUME_CODE_MIN`])
pub const VOLUME_MIN_DB: Decibels = -80.0;

/// Highest volume a set command may request (raw code [`VOLUME_CODE_MAX`])
pub const VOLUME_MAX_DB: Decibels = 12.0;

/// Smallest raw code accepted by the volume set command
pub const VOLUME_CODE_MIN: VolumeCode = 1;

/// Largest raw code accepted by the volume set command
pub const VOLUME_CODE_MAX: VolumeCode = 185;

/// Maximum visible length of an input name or the front panel display
pub const MAX_TEXT_LEN: usize = 14;

/// Channels the receiver exposes, in the order they are queried at startup
pub const INPUT_CHANNELS: [ChannelId; 17] = [
    25, 4, 6, 15, 19, 20, 21, 22, 23, 38, 44, 45, 17, 5, 1, 2, 33,
];

/// Speaker output configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpeakerConfig {
    Off,
    A,
    B,
    AB,
}

impl SpeakerConfig {
    /// All configurations, ordered by wire code
    pub const ALL: [SpeakerConfig; 4] = [
        SpeakerConfig::Off,
        SpeakerConfig::A,
        SpeakerConfig::B,
        SpeakerConfig::AB,
    ];

    /// Single digit wire code
    pub fn code(self) -> u8 {
        match self {
            SpeakerConfig::Off => 0,
            SpeakerConfig::A => 1,
            SpeakerConfig::B => 2,
            SpeakerConfig::AB => 3,
        }
    }

    /// Parse a wire code, `None` if out of range
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Label shown in menus
    pub fn label(self) -> &'static str {
        match self {
            SpeakerConfig::Off => "Off",
            SpeakerConfig::A => "A",
            SpeakerConfig::B => "B",
            SpeakerConfig::AB => "AB",
        }
    }

    /// Next configuration, wrapping around
    pub fn next(self) -> Self {
        Self::ALL[(self.code() as usize + 1) % Self::ALL.len()]
    }
}

impl fmt::Display for SpeakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One entry of the input table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputName {
    pub channel: ChannelId,
    pub name: String,
}

/// Outcome of a setter call
///
/// Setters never fail because of device state; they either send a command,
/// or explain why nothing was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// A command was queued for the receiver
    Applied,
    /// The requested value already matches the mirrored state, nothing sent
    AlreadyCurrent,
    /// The receiver is off, nothing sent
    RejectedPowerOff,
}

impl SetOutcome {
    /// Whether a command was queued
    pub fn is_applied(self) -> bool {
        self == SetOutcome::Applied
    }
}

/// Convert a raw volume code into decibels
pub fn code_to_db(code: VolumeCode) -> Decibels {
    VOLUME_FLOOR_DB + VOLUME_STEP_DB * code as Decibels
}

/// Convert decibels into a raw volume code accepted by the set command
///
/// Values between steps are rounded to the nearest step; values outside the
/// settable range are clamped to [`VOLUME_CODE_MIN`]..=[`VOLUME_CODE_MAX`].
pub fn db_to_code(db: Decibels) -> VolumeCode {
    let steps = ((db - VOLUME_FLOOR_DB) / VOLUME_STEP_DB).round();
    if steps.is_nan() {
        return VOLUME_CODE_MIN;
    }
    steps.clamp(VOLUME_CODE_MIN as f64, VOLUME_CODE_MAX as f64) as VolumeCode
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_settable_step_round_trips() {
        for code in VOLUME_CODE_MIN..=VOLUME_CODE_MAX {
            let db = code_to_db(code);
            assert_eq!(db_to_code(db), code, "{db} dB");
            assert_eq!(code_to_db(db_to_code(db)), db);
        }
    }

    #[test]
    fn settable_range_bounds() {
        assert_eq!(code_to_db(VOLUME_CODE_MIN), VOLUME_MIN_DB);
        assert_eq!(code_to_db(VOLUME_CODE_MAX), VOLUME_MAX_DB);
        assert_eq!(code_to_db(0), VOLUME_FLOOR_DB);
    }

    #[test]
    fn out_of_range_volume_is_clamped() {
        assert_eq!(db_to_code(-120.0), 1);
        assert_eq!(db_to_code(VOLUME_FLOOR_DB), 1);
        assert_eq!(db_to_code(40.0), 185);
        assert_eq!(db_to_code(f64::NAN), 1);
    }

    #[test]
    fn minus_twenty_db_is_code_121() {
        assert_eq!(db_to_code(-20.0), 121);
    }

    #[test]
    fn speaker_codes() {
        for config in SpeakerConfig::ALL {
            assert_eq!(SpeakerConfig::from_code(config.code()), Some(config));
        }
        assert_eq!(SpeakerConfig::from_code(4), None);
        assert_eq!(SpeakerConfig::AB.next(), SpeakerConfig::Off);
        assert_eq!(SpeakerConfig::B.to_string(), "B");
    }
}
