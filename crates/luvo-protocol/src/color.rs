//! RGB and HSB color conversion for the uplight
//!
//! The wire format carries the uplight as RGB bytes. Callers may describe
//! it in HSB instead; both conversions are total and clamp their input.
//! HSB components are kept as `f32` so that a round trip through HSB only
//! loses the final rounding to whole bytes (at most 1 per channel).

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    #[must_use]
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// Hue (degrees, 0-360), saturation (0-100) and brightness (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Hsb {
    pub h: f32,
    pub s: f32,
    pub b: f32,
}

impl Hsb {
    #[must_use]
    pub const fn new(h: f32, s: f32, b: f32) -> Self {
        Self { h, s, b }
    }

    /// Bring every component into its valid range. Hue wraps, the others clamp;
    /// NaN maps to 0.
    #[must_use]
    pub fn clamped(self) -> Self {
        let finite = |v: f32| if v.is_nan() { 0.0 } else { v };
        let h = finite(self.h);
        let h = if h.is_finite() { h.rem_euclid(360.0) } else { 0.0 };
        Self {
            h,
            s: finite(self.s).clamp(0.0, 100.0),
            b: finite(self.b).clamp(0.0, 100.0),
        }
    }
}

/// Convert RGB to HSB. Black yields saturation 0 and brightness 0.
#[must_use]
pub fn rgb_to_hsb(rgb: Rgb) -> Hsb {
    let r = f32::from(rgb.r) / 255.0;
    let g = f32::from(rgb.g) / 255.0;
    let b = f32::from(rgb.b) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };

    let saturation = if max == 0.0 { 0.0 } else { delta / max * 100.0 };

    Hsb {
        h: hue,
        s: saturation,
        b: max * 100.0,
    }
}

/// Convert HSB to RGB using the six-sector formula.
#[must_use]
pub fn hsb_to_rgb(hsb: Hsb) -> Rgb {
    let hsb = hsb.clamped();
    let v = hsb.b / 100.0;
    let s = hsb.s / 100.0;

    let c = v * s;
    let sector = hsb.h / 60.0;
    let x = c * (1.0 - (sector % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if sector < 1.0 {
        (c, x, 0.0)
    } else if sector < 2.0 {
        (x, c, 0.0)
    } else if sector < 3.0 {
        (0.0, c, x)
    } else if sector < 4.0 {
        (0.0, x, c)
    } else if sector < 5.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    Rgb {
        r: to_byte(r + m),
        g: to_byte(g + m),
        b: to_byte(b + m),
    }
}

fn to_byte(unit: f32) -> u8 {
    // Saturating float-to-int cast after clamping
    (unit * 255.0).round().clamp(0.0, 255.0) as u8
}
