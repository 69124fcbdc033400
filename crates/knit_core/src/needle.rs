//! Needle addressing and carrier direction.
//!
//! Public writer methods accept bed-needles as `"f3"`, `("b", -2)`,
//! `(Bed::Front, 3)` or a [`BedNeedle`]; every form is normalized once on
//! entry through [`IntoBedNeedle`].

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{KnitError, KnitResult};

/// A needle bed. Front-side beds order before back-side beds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bed {
    Front,
    FrontSlider,
    Back,
    BackSlider,
}

impl Bed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bed::Front => "f",
            Bed::FrontSlider => "fs",
            Bed::Back => "b",
            Bed::BackSlider => "bs",
        }
    }

    /// Front bed or its sliders.
    pub fn is_front_side(&self) -> bool {
        matches!(self, Bed::Front | Bed::FrontSlider)
    }

    pub fn is_slider(&self) -> bool {
        matches!(self, Bed::FrontSlider | Bed::BackSlider)
    }
}

impl fmt::Display for Bed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Bed {
    type Err = KnitError;

    fn from_str(s: &str) -> KnitResult<Self> {
        match s {
            "f" => Ok(Bed::Front),
            "fs" => Ok(Bed::FrontSlider),
            "b" => Ok(Bed::Back),
            "bs" => Ok(Bed::BackSlider),
            other => Err(KnitError::InvalidBedNeedle(other.to_string())),
        }
    }
}

/// A needle location: bed plus signed index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BedNeedle {
    pub bed: Bed,
    pub needle: i32,
}

impl BedNeedle {
    pub fn new(bed: Bed, needle: i32) -> Self {
        Self { bed, needle }
    }

    pub fn front(needle: i32) -> Self {
        Self::new(Bed::Front, needle)
    }

    pub fn back(needle: i32) -> Self {
        Self::new(Bed::Back, needle)
    }

    /// Horizontal position at the given rack: back-side needles shift by the rack.
    pub fn position(&self, rack: f64) -> f64 {
        if self.bed.is_front_side() {
            f64::from(self.needle)
        } else {
            f64::from(self.needle) + rack
        }
    }
}

impl fmt::Display for BedNeedle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bed, self.needle)
    }
}

fn bed_needle_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(fs|bs|f|b)(-?\d+)$").ok())
        .as_ref()
}

impl FromStr for BedNeedle {
    type Err = KnitError;

    fn from_str(s: &str) -> KnitResult<Self> {
        let token = s.trim();
        let caps = bed_needle_regex()
            .and_then(|re| re.captures(token))
            .ok_or_else(|| KnitError::InvalidBedNeedle(token.to_string()))?;
        let bed = caps[1].parse()?;
        let needle = caps[2]
            .parse()
            .map_err(|_| KnitError::InvalidBedNeedle(token.to_string()))?;
        Ok(Self { bed, needle })
    }
}

/// Conversion of any accepted bed-needle shape into a [`BedNeedle`].
pub trait IntoBedNeedle {
    fn into_bed_needle(self) -> KnitResult<BedNeedle>;
}

impl IntoBedNeedle for BedNeedle {
    fn into_bed_needle(self) -> KnitResult<BedNeedle> {
        Ok(self)
    }
}

impl IntoBedNeedle for &BedNeedle {
    fn into_bed_needle(self) -> KnitResult<BedNeedle> {
        Ok(*self)
    }
}

impl IntoBedNeedle for &str {
    fn into_bed_needle(self) -> KnitResult<BedNeedle> {
        self.parse()
    }
}

impl IntoBedNeedle for &String {
    fn into_bed_needle(self) -> KnitResult<BedNeedle> {
        self.parse()
    }
}

impl IntoBedNeedle for String {
    fn into_bed_needle(self) -> KnitResult<BedNeedle> {
        self.parse()
    }
}

impl IntoBedNeedle for (Bed, i32) {
    fn into_bed_needle(self) -> KnitResult<BedNeedle> {
        Ok(BedNeedle::new(self.0, self.1))
    }
}

impl IntoBedNeedle for (&str, i32) {
    fn into_bed_needle(self) -> KnitResult<BedNeedle> {
        Ok(BedNeedle::new(self.0.parse()?, self.1))
    }
}

/// Direction of carrier motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Positive => "+",
            Direction::Negative => "-",
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            Direction::Positive => Direction::Negative,
            Direction::Negative => Direction::Positive,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = KnitError;

    fn from_str(s: &str) -> KnitResult<Self> {
        match s.trim() {
            "+" => Ok(Direction::Positive),
            "-" => Ok(Direction::Negative),
            other => Err(KnitError::InvalidDirection(other.to_string())),
        }
    }
}

/// Conversion of `"+"`, `'-'` or a [`Direction`] into a [`Direction`].
pub trait IntoDirection {
    fn into_direction(self) -> KnitResult<Direction>;
}

impl IntoDirection for Direction {
    fn into_direction(self) -> KnitResult<Direction> {
        Ok(self)
    }
}

impl IntoDirection for &str {
    fn into_direction(self) -> KnitResult<Direction> {
        self.parse()
    }
}

impl IntoDirection for char {
    fn into_direction(self) -> KnitResult<Direction> {
        match self {
            '+' => Ok(Direction::Positive),
            '-' => Ok(Direction::Negative),
            other => Err(KnitError::InvalidDirection(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bed_needle() {
        assert_eq!("f3".parse::<BedNeedle>().unwrap(), BedNeedle::front(3));
        assert_eq!("b-2".parse::<BedNeedle>().unwrap(), BedNeedle::back(-2));
        assert_eq!(
            "fs10".parse::<BedNeedle>().unwrap(),
            BedNeedle::new(Bed::FrontSlider, 10)
        );
        assert_eq!(
            "bs0".parse::<BedNeedle>().unwrap(),
            BedNeedle::new(Bed::BackSlider, 0)
        );
    }

    #[test]
    fn test_reject_malformed_tokens() {
        for token in ["", "f", "x3", "f3.5", "front3", "3f", "fb3"] {
            assert!(
                matches!(token.parse::<BedNeedle>(), Err(KnitError::InvalidBedNeedle(_))),
                "accepted {token:?}"
            );
        }
    }

    #[test]
    fn test_normalize_all_shapes() {
        let expected = BedNeedle::back(7);
        assert_eq!("b7".into_bed_needle().unwrap(), expected);
        assert_eq!(String::from("b7").into_bed_needle().unwrap(), expected);
        assert_eq!(("b", 7).into_bed_needle().unwrap(), expected);
        assert_eq!((Bed::Back, 7).into_bed_needle().unwrap(), expected);
        assert_eq!(expected.into_bed_needle().unwrap(), expected);
        assert!(("q", 7).into_bed_needle().is_err());
    }

    #[test]
    fn test_display_roundtrip() {
        let bn = BedNeedle::new(Bed::BackSlider, -4);
        assert_eq!(bn.to_string(), "bs-4");
        assert_eq!(bn.to_string().parse::<BedNeedle>().unwrap(), bn);
    }

    #[test]
    fn test_position_at_rack() {
        assert_eq!(BedNeedle::front(4).position(1.0), 4.0);
        assert_eq!(BedNeedle::back(4).position(0.25), 4.25);
    }

    #[test]
    fn test_direction() {
        assert_eq!("+".into_direction().unwrap(), Direction::Positive);
        assert_eq!('-'.into_direction().unwrap(), Direction::Negative);
        assert_eq!(Direction::Positive.toggled(), Direction::Negative);
        assert!("up".into_direction().is_err());
    }
}
