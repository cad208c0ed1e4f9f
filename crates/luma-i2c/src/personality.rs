//! Chipset personalities
//!
//! Each output runs one personality: the LED chipset it encodes for, in
//! either "individual" (one DMX pixel per LED) or "combined" (one DMX pixel
//! replicated across the string) control. The numeric values are stable; they
//! are stored in preference files and exposed to remote configuration, so new
//! personalities are only ever appended.

use serde::{Deserialize, Serialize};

/// An output personality: chipset plus control mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Personality {
    /// WS2801, one RGB pixel per LED.
    #[default]
    Ws2801Individual = 1,
    /// WS2801, one RGB pixel replicated.
    Ws2801Combined = 2,
    /// LPD8806, one RGB pixel per LED.
    Lpd8806Individual = 3,
    /// LPD8806, one RGB pixel replicated.
    Lpd8806Combined = 4,
    /// P9813, one RGB pixel per LED.
    P9813Individual = 5,
    /// P9813, one RGB pixel replicated.
    P9813Combined = 6,
    /// APA102, one RGB pixel per LED.
    Apa102Individual = 7,
    /// APA102, one RGB pixel replicated.
    Apa102Combined = 8,
    /// APA102 with per-pixel brightness, one IRGB pixel per LED.
    Apa102PbIndividual = 9,
    /// APA102 with per-pixel brightness, one IRGB pixel replicated.
    Apa102PbCombined = 10,
}

/// All personalities in numeric order.
pub const PERSONALITIES: [Personality; 10] = [
    Personality::Ws2801Individual,
    Personality::Ws2801Combined,
    Personality::Lpd8806Individual,
    Personality::Lpd8806Combined,
    Personality::P9813Individual,
    Personality::P9813Combined,
    Personality::Apa102Individual,
    Personality::Apa102Combined,
    Personality::Apa102PbIndividual,
    Personality::Apa102PbCombined,
];

impl Personality {
    /// Look up a personality by its stable number (1-10).
    pub fn from_number(number: u8) -> Option<Self> {
        match number {
            1 => Some(Self::Ws2801Individual),
            2 => Some(Self::Ws2801Combined),
            3 => Some(Self::Lpd8806Individual),
            4 => Some(Self::Lpd8806Combined),
            5 => Some(Self::P9813Individual),
            6 => Some(Self::P9813Combined),
            7 => Some(Self::Apa102Individual),
            8 => Some(Self::Apa102Combined),
            9 => Some(Self::Apa102PbIndividual),
            10 => Some(Self::Apa102PbCombined),
            _ => None,
        }
    }

    /// The stable personality number (1-10).
    pub fn number(self) -> u8 {
        self as u8
    }

    /// DMX slots consumed per pixel.
    pub fn slots_per_pixel(self) -> u16 {
        match self {
            Self::Apa102PbIndividual | Self::Apa102PbCombined => 4,
            _ => 3,
        }
    }

    /// Whether one pixel's worth of DMX drives the whole string.
    pub fn is_combined(self) -> bool {
        matches!(
            self,
            Self::Ws2801Combined
                | Self::Lpd8806Combined
                | Self::P9813Combined
                | Self::Apa102Combined
                | Self::Apa102PbCombined
        )
    }

    /// DMX slots consumed from the start address.
    pub fn footprint(self, pixel_count: u16) -> u32 {
        if self.is_combined() {
            u32::from(self.slots_per_pixel())
        } else {
            u32::from(pixel_count) * u32::from(self.slots_per_pixel())
        }
    }

    /// Human description, at most 32 characters.
    pub fn description(self) -> &'static str {
        match self {
            Self::Ws2801Individual => "WS2801 Individual Control",
            Self::Ws2801Combined => "WS2801 Combined Control",
            Self::Lpd8806Individual => "LPD8806 Individual Control",
            Self::Lpd8806Combined => "LPD8806 Combined Control",
            Self::P9813Individual => "P9813 Individual Control",
            Self::P9813Combined => "P9813 Combined Control",
            Self::Apa102Individual => "APA102 Individual Control",
            Self::Apa102Combined => "APA102 Combined Control",
            Self::Apa102PbIndividual => "APA102 Pixel Brightness Individ.",
            Self::Apa102PbCombined => "APA102 Pixel Brightness Combined",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_round_trip() {
        for personality in PERSONALITIES {
            assert_eq!(
                Personality::from_number(personality.number()),
                Some(personality)
            );
        }
        assert_eq!(Personality::from_number(0), None);
        assert_eq!(Personality::from_number(11), None);
    }

    #[test]
    fn test_footprints() {
        assert_eq!(Personality::Ws2801Individual.footprint(25), 75);
        assert_eq!(Personality::Ws2801Combined.footprint(25), 3);
        assert_eq!(Personality::Apa102PbIndividual.footprint(25), 100);
        assert_eq!(Personality::Apa102PbCombined.footprint(25), 4);
        assert_eq!(Personality::Lpd8806Individual.footprint(0), 0);
    }

    #[test]
    fn test_descriptions_fit_32_chars() {
        for personality in PERSONALITIES {
            assert!(personality.description().len() <= 32);
        }
    }

    #[test]
    fn test_default_is_ws2801_individual() {
        assert_eq!(Personality::default(), Personality::Ws2801Individual);
        assert_eq!(Personality::default().number(), 1);
    }
}
