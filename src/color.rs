//! Node colors and the label color picked for them.
//!
//! Label color follows the WCAG 2.0 contrast computation: both candidate
//! colors are compared against the node background and the one with the
//! higher contrast ratio wins. Luminance is rounded to three decimals before
//! the ratios are taken so that near-identical backgrounds always resolve
//! to the same label color.

use std::fmt;

use serde::{Deserialize, Serialize};

const LUMINANCE_PRECISION: f64 = 1000.0;

/// An sRGB color with 8-bit channels, serialized as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);
    pub const WHITE: Rgb = Rgb::new(255, 255, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// WCAG relative luminance, rounded to three decimals.
    pub fn relative_luminance(&self) -> f64 {
        (self.exact_luminance() * LUMINANCE_PRECISION).round() / LUMINANCE_PRECISION
    }

    fn exact_luminance(&self) -> f64 {
        0.2126 * linear_channel(self.r)
            + 0.7152 * linear_channel(self.g)
            + 0.0722 * linear_channel(self.b)
    }
}

impl From<[u8; 3]> for Rgb {
    fn from([r, g, b]: [u8; 3]) -> Self {
        Rgb::new(r, g, b)
    }
}

impl From<Rgb> for [u8; 3] {
    fn from(color: Rgb) -> Self {
        [color.r, color.g, color.b]
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rgb({}, {}, {})", self.r, self.g, self.b)
    }
}

fn linear_channel(value: u8) -> f64 {
    let c = f64::from(value) / 255.0;
    if c <= 0.03928 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Foreground color used for a node label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LabelColor {
    Black,
    White,
}

impl LabelColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            LabelColor::Black => "black",
            LabelColor::White => "white",
        }
    }
}

impl fmt::Display for LabelColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn contrast_ratio(a: Rgb, b: Rgb) -> f64 {
    let l1 = a.relative_luminance();
    let l2 = b.relative_luminance();
    let (hi, lo) = if l1 >= l2 { (l1, l2) } else { (l2, l1) };
    (hi + 0.05) / (lo + 0.05)
}

/// Picks black or white, whichever reads better on `background`.
/// Ties go to white.
pub fn select_label_color(background: Rgb) -> LabelColor {
    let against_black = contrast_ratio(background, Rgb::BLACK);
    let against_white = contrast_ratio(background, Rgb::WHITE);

    if against_black > against_white {
        LabelColor::Black
    } else {
        LabelColor::White
    }
}
