use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed palette, vetted for contrast against white text labels.
pub const PALETTE: [&str; 10] = [
    "#4B2995", "#B22234", "#C97A11", "#B59F00", "#176CA6", "#1B7C6E", "#3A7A1D", "#5A5A5A",
    "#2D3A4A", "#3E2723",
];

/// A `#RRGGBB` color attached to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorToken(String);

impl ColorToken {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower the HSL lightness by `amount` percentage points.
    ///
    /// Tokens that are not `#RRGGBB` come back unchanged.
    pub fn darken(&self, amount: f64) -> ColorToken {
        let Some((r, g, b)) = self.rgb() else {
            return self.clone();
        };
        let (h, s, l) = rgb_to_hsl(r, g, b);
        let l = (l - amount / 100.0).clamp(0.0, 1.0);
        let (r, g, b) = hsl_to_rgb(h, s, l);
        ColorToken(format!("#{:02X}{:02X}{:02X}", r, g, b))
    }

    fn rgb(&self) -> Option<(u8, u8, u8)> {
        let hex = self.0.strip_prefix('#')?;
        if hex.len() != 6 || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        Some((channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for ColorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pick a palette entry uniformly at random.
pub fn allocate() -> ColorToken {
    allocate_with(&mut rand::rng())
}

pub fn allocate_with<R: Rng + ?Sized>(rng: &mut R) -> ColorToken {
    let idx = rng.random_range(0..PALETTE.len());
    ColorToken::new(PALETTE[idx])
}

fn rgb_to_hsl(r: u8, g: u8, b: u8) -> (f64, f64, f64) {
    let r = f64::from(r) / 255.0;
    let g = f64::from(g) / 255.0;
    let b = f64::from(b) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    if max == min {
        return (0.0, 0.0, l);
    }

    let d = max - min;
    let s = if l > 0.5 { d / (2.0 - max - min) } else { d / (max + min) };
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    (h / 6.0, s, l)
}

fn hsl_to_rgb(h: f64, s: f64, l: f64) -> (u8, u8, u8) {
    let to_byte = |v: f64| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    if s == 0.0 {
        let v = to_byte(l);
        return (v, v, v);
    }

    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    (
        to_byte(hue_to_rgb(p, q, h + 1.0 / 3.0)),
        to_byte(hue_to_rgb(p, q, h)),
        to_byte(hue_to_rgb(p, q, h - 1.0 / 3.0)),
    )
}

fn hue_to_rgb(p: f64, q: f64, mut t: f64) -> f64 {
    if t < 0.0 {
        t += 1.0;
    }
    if t > 1.0 {
        t -= 1.0;
    }
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 1.0 / 2.0 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}
