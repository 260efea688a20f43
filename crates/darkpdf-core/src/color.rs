//! Normalized color values and dark theme presets
//!
//! Colors are carried through the engine as plain RGBA tuples in the unit
//! interval. PDF color arrays (gray, RGB, CMYK) are converted at the edges
//! so nothing device-specific reaches the transform code.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::error::{DarkPdfError, Result};

/// An RGBA color with every channel in `[0, 1]`.
///
/// Equality and hashing are defined on the exact component values (with
/// `-0.0` folded into `0.0`), so two annotation colors parsed from the same
/// PDF numbers are the same distinct color.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    #[serde(default = "opaque")]
    pub a: f32,
}

fn opaque() -> f32 {
    1.0
}

impl Color {
    pub const WHITE: Color = Color::rgb(1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgb(0.0, 0.0, 0.0);

    /// Opaque color from RGB components
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Color from RGBA components
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Opaque gray level
    pub const fn gray(level: f32) -> Self {
        Self::rgb(level, level, level)
    }

    /// Build a color from a PDF color array.
    ///
    /// 1 component is DeviceGray, 3 are DeviceRGB, 4 are DeviceCMYK.
    /// An empty array means "transparent" and yields `None`, as does any
    /// other arity.
    pub fn from_pdf_components(components: &[f32]) -> Option<Self> {
        let c = |v: f32| v.clamp(0.0, 1.0);
        match *components {
            [g] => Some(Self::gray(c(g))),
            [r, g, b] => Some(Self::rgb(c(r), c(g), c(b))),
            [cy, m, y, k] => {
                let (cy, m, y, k) = (c(cy), c(m), c(y), c(k));
                Some(Self::rgb(
                    (1.0 - cy) * (1.0 - k),
                    (1.0 - m) * (1.0 - k),
                    (1.0 - y) * (1.0 - k),
                ))
            }
            _ => None,
        }
    }

    /// Same color with a different alpha
    pub fn with_alpha(self, a: f32) -> Self {
        Self {
            a: a.clamp(0.0, 1.0),
            ..self
        }
    }

    /// RGB channels as an array
    pub fn channels(&self) -> [f32; 3] {
        [self.r, self.g, self.b]
    }

    /// Build an opaque color from an RGB array
    pub fn from_channels(channels: [f32; 3]) -> Self {
        Self::rgb(channels[0], channels[1], channels[2])
    }

    /// Per-channel `1 - value`; alpha is kept
    pub fn inverted(&self) -> Self {
        Self {
            r: 1.0 - self.r,
            g: 1.0 - self.g,
            b: 1.0 - self.b,
            a: self.a,
        }
    }

    /// Luminosity with the weights PDF blend modes use
    pub fn luminosity(&self) -> f32 {
        0.3 * self.r + 0.59 * self.g + 0.11 * self.b
    }

    /// Channels rounded to 8-bit
    pub fn to_rgb8(&self) -> [u8; 3] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.r), q(self.g), q(self.b)]
    }

    /// Opaque color from 8-bit channels
    pub fn from_rgb8(rgb: [u8; 3]) -> Self {
        Self::rgb(
            rgb[0] as f32 / 255.0,
            rgb[1] as f32 / 255.0,
            rgb[2] as f32 / 255.0,
        )
    }

    /// Parse `#RRGGBB` or `#RRGGBBAA` (the leading `#` is optional)
    pub fn from_hex(hex: &str) -> Result<Self> {
        let digits = hex.trim().trim_start_matches('#');
        if !(digits.len() == 6 || digits.len() == 8) || !digits.is_ascii() {
            return Err(DarkPdfError::InvalidColor(hex.to_string()));
        }
        let byte = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map(|v| v as f32 / 255.0)
                .map_err(|_| DarkPdfError::InvalidColor(hex.to_string()))
        };
        let a = if digits.len() == 8 { byte(6)? } else { 1.0 };
        Ok(Self::rgba(byte(0)?, byte(2)?, byte(4)?, a))
    }

    /// `#RRGGBB` label; channels are truncated, not rounded
    pub fn to_hex(&self) -> String {
        let t = |v: f32| (v.clamp(0.0, 1.0) * 255.0) as u8;
        format!("#{:02X}{:02X}{:02X}", t(self.r), t(self.g), t(self.b))
    }

    fn key(&self) -> [u32; 4] {
        let bits = |v: f32| if v == 0.0 { 0 } else { v.to_bits() };
        [bits(self.r), bits(self.g), bits(self.b), bits(self.a)]
    }

    /// Channel-wise comparison with a tolerance, for rendered output
    pub fn approx_eq(&self, other: &Color, tolerance: f32) -> bool {
        (self.r - other.r).abs() <= tolerance
            && (self.g - other.g).abs() <= tolerance
            && (self.b - other.b).abs() <= tolerance
            && (self.a - other.a).abs() <= tolerance
    }
}

impl PartialEq for Color {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Color {}

impl Hash for Color {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.a < 1.0 {
            write!(f, "{} (alpha {:.2})", self.to_hex(), self.a)
        } else {
            f.write_str(&self.to_hex())
        }
    }
}

impl FromStr for Color {
    type Err = DarkPdfError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

/// Background color used to retint the inverted page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Theme {
    DarkGray,
    PureBlack,
    NightBlue,
    Custom(Color),
}

impl Theme {
    /// Built-in presets
    pub const PRESETS: [Theme; 3] = [Theme::DarkGray, Theme::PureBlack, Theme::NightBlue];

    /// Background color of the theme
    pub fn background(&self) -> Color {
        match self {
            Theme::DarkGray => Color::gray(0.1),
            Theme::PureBlack => Color::BLACK,
            Theme::NightBlue => Color::rgb(0.0, 0.0, 0.2),
            Theme::Custom(color) => *color,
        }
    }

    /// Human-readable name
    pub fn label(&self) -> String {
        match self {
            Theme::DarkGray => "Dark Gray".to_string(),
            Theme::PureBlack => "Pure Black".to_string(),
            Theme::NightBlue => "Night Blue".to_string(),
            Theme::Custom(color) => format!("Custom {}", color.to_hex()),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Theme::DarkGray => f.write_str("dark-gray"),
            Theme::PureBlack => f.write_str("pure-black"),
            Theme::NightBlue => f.write_str("night-blue"),
            Theme::Custom(color) => f.write_str(&color.to_hex()),
        }
    }
}

impl FromStr for Theme {
    type Err = DarkPdfError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "dark-gray" | "dark-grey" => Ok(Theme::DarkGray),
            "pure-black" | "black" => Ok(Theme::PureBlack),
            "night-blue" => Ok(Theme::NightBlue),
            _ => Color::from_hex(s)
                .map(Theme::Custom)
                .map_err(|_| DarkPdfError::InvalidColor(format!("unknown theme: {}", s))),
        }
    }
}

impl TryFrom<String> for Theme {
    type Error = DarkPdfError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Theme> for String {
    fn from(theme: Theme) -> Self {
        theme.to_string()
    }
}
