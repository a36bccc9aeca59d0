//! Exact rational frame rates.
//!
//! Rates are kept as `num/den` exactly as the container reports them
//! (`24000/1001`, `30/1`) so that multiplying by the interpolation factor does
//! not accumulate float error. Floats only appear in human-readable messages.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A positive frame rate expressed as a reduced fraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameRate {
    num: u32,
    den: u32,
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl FrameRate {
    /// Build a rate from a fraction; zero numerator or denominator is rejected.
    pub fn new(num: u32, den: u32) -> Option<Self> {
        if num == 0 || den == 0 {
            return None;
        }
        let g = gcd(num as u64, den as u64) as u32;
        Some(Self {
            num: num / g,
            den: den / g,
        })
    }

    /// Parse `"24000/1001"`, `"30"` or `"23.976"`.
    ///
    /// Decimal input is converted with millisecond precision
    /// (`23.976` -> `2997/125`).
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if let Some((n, d)) = s.split_once('/') {
            return Self::new(n.trim().parse().ok()?, d.trim().parse().ok()?);
        }
        if let Ok(whole) = s.parse::<u32>() {
            return Self::new(whole, 1);
        }
        let value: f64 = s.parse().ok()?;
        if !value.is_finite() || value <= 0.0 || value > u32::MAX as f64 / 1000.0 {
            return None;
        }
        Self::new((value * 1000.0).round() as u32, 1000)
    }

    pub fn numerator(&self) -> u32 {
        self.num
    }

    pub fn denominator(&self) -> u32 {
        self.den
    }

    /// Multiply the rate by an integer factor (the interpolation multiplier).
    /// `None` when the reduced numerator no longer fits in a `u32`.
    pub fn scaled(&self, factor: u32) -> Option<Self> {
        let num = self.num as u64 * factor.max(1) as u64;
        let g = gcd(num, self.den as u64);
        Some(Self {
            num: u32::try_from(num / g).ok()?,
            den: u32::try_from(self.den as u64 / g).ok()?,
        })
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Short decimal form for progress messages (`48`, `23.976`).
    pub fn approx(&self) -> String {
        if self.den == 1 {
            return self.num.to_string();
        }
        let s = format!("{:.3}", self.as_f64());
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Renders the form ffmpeg accepts for `-framerate`/`-r`
impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}
