// src/color.rs

//! Fill colors as carried over the bus and handed to the display.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};

/// A 24-bit RGB color packed as `0xRRGGBB`.
///
/// This is the value a `SetColor` call carries and, on a TrueColor visual,
/// also the pixel value the display expects. The high byte is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(u32);

impl Color {
    pub const BLACK: Color = Color(0x000000);
    pub const WHITE: Color = Color(0xFFFFFF);

    /// Builds a color from a packed value, discarding anything above 24 bits.
    pub const fn from_packed(packed: u32) -> Self {
        Color(packed & 0x00FF_FFFF)
    }

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Color(((r as u32) << 16) | ((g as u32) << 8) | b as u32)
    }

    /// The packed `0xRRGGBB` value.
    pub const fn packed(self) -> u32 {
        self.0
    }

    pub const fn red(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub const fn green(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub const fn blue(self) -> u8 {
        self.0 as u8
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:06x}", self.0)
    }
}

/// Accepts `#rrggbb`, `0xrrggbb` and plain decimal.
impl FromStr for Color {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let value = if let Some(hex) = s.strip_prefix('#') {
            if hex.len() != 6 {
                return Err(anyhow!("expected six hex digits after '#', got {:?}", s));
            }
            u32::from_str_radix(hex, 16)
        } else if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            u32::from_str_radix(hex, 16)
        } else {
            s.parse::<u32>()
        }
        .with_context(|| format!("invalid color {:?}", s))?;

        if value > 0x00FF_FFFF {
            return Err(anyhow!("color {:?} does not fit in 24 bits", s));
        }
        Ok(Color(value))
    }
}

impl TryFrom<String> for Color {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_should_split_components() {
        let c = Color::from_packed(0xAABBCC);
        assert_eq!((c.red(), c.green(), c.blue()), (0xAA, 0xBB, 0xCC));
        assert_eq!(Color::from_rgb(0xAA, 0xBB, 0xCC), c);
    }

    #[test]
    fn it_should_mask_values_wider_than_24_bits() {
        assert_eq!(Color::from_packed(0xFF00FF00).packed(), 0x0000FF00);
    }

    #[test]
    fn it_should_parse_all_accepted_notations() {
        assert_eq!("#00ff00".parse::<Color>().unwrap(), Color::from_packed(0x00FF00));
        assert_eq!("0xAABBCC".parse::<Color>().unwrap(), Color::from_packed(0xAABBCC));
        assert_eq!("255".parse::<Color>().unwrap(), Color::from_packed(0xFF));
    }

    #[test]
    fn it_should_reject_bad_colors() {
        assert!("#fff".parse::<Color>().is_err());
        assert!("0x1000000".parse::<Color>().is_err());
        assert!("green".parse::<Color>().is_err());
    }

    #[test]
    fn it_should_serialize_as_hex_string() {
        let json = serde_json::to_string(&Color::from_packed(0x12ab34)).unwrap();
        assert_eq!(json, "\"#12ab34\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back.packed(), 0x12AB34);
    }
}
