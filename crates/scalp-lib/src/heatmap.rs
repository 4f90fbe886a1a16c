use crate::signal::TimeFrequencyGrid;
use serde::{Deserialize, Serialize};

/// Packed 0xRRGGBB color, render-backend agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn r(&self) -> u8 {
        ((self.0 >> 16) & 0xFF) as u8
    }
    pub fn g(&self) -> u8 {
        ((self.0 >> 8) & 0xFF) as u8
    }
    pub fn b(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }

    fn lerp(a: Color, b: Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let mix = |x: u8, y: u8| -> u32 {
            (x as f64 + (y as f64 - x as f64) * t).round() as u32
        };
        Color((mix(a.r(), b.r()) << 16) | (mix(a.g(), b.g()) << 8) | mix(a.b(), b.b()))
    }
}

/// Cool endpoint of the diverging scale.
pub const COOL: Color = Color(0x3B4CC0);
/// Midpoint of the diverging scale.
pub const NEUTRAL: Color = Color(0xDDDDDD);
/// Warm endpoint of the diverging scale.
pub const WARM: Color = Color(0xB40426);

/// Two-segment diverging color scale over a symmetric-ish dB domain.
/// Values clamp to the domain; the domain midpoint maps to [`NEUTRAL`]
/// exactly, with clamped linear interpolation per RGB channel in each half.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DivergingScale {
    pub min: f64,
    pub max: f64,
}

impl Default for DivergingScale {
    fn default() -> Self {
        Self { min: -3.0, max: 3.0 }
    }
}

impl DivergingScale {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn color_at(&self, value: f64) -> Color {
        if !value.is_finite() || self.max <= self.min {
            return NEUTRAL;
        }
        let v = value.clamp(self.min, self.max);
        let mid = self.midpoint();
        if v <= mid {
            Color::lerp(COOL, NEUTRAL, (v - self.min) / (mid - self.min))
        } else {
            Color::lerp(NEUTRAL, WARM, (v - mid) / (self.max - mid))
        }
    }
}

/// RGBA8 pixel buffer, row-major with row 0 at the top.
#[derive(Debug, Clone, PartialEq)]
pub struct Raster {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u8>,
}

impl Raster {
    pub fn filled(width: usize, height: usize, color: Color) -> Self {
        let mut pixels = Vec::with_capacity(width * height * 4);
        for _ in 0..width * height {
            pixels.extend_from_slice(&[color.r(), color.g(), color.b(), 0xFF]);
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn blank(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![0; width * height * 4],
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y * self.width + x) * 4;
        Some([
            self.pixels[at],
            self.pixels[at + 1],
            self.pixels[at + 2],
            self.pixels[at + 3],
        ])
    }

    fn fill_rect(&mut self, x0: usize, y0: usize, x1: usize, y1: usize, color: Color) {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        let rgba = [color.r(), color.g(), color.b(), 0xFF];
        for y in y0..y1 {
            let row = y * self.width;
            for x in x0..x1 {
                let at = (row + x) * 4;
                self.pixels[at..at + 4].copy_from_slice(&rgba);
            }
        }
    }
}

/// Paint a time-frequency grid into an RGBA raster of the given pixel size.
///
/// Cell edges come from linear interpolation of bin indices into pixel space;
/// frequency bin 0 lands at the bottom row. Each cell is overdrawn by one
/// pixel on both axes so adjacent cells leave no seam. An empty grid yields a
/// blank raster.
pub fn render_grid(
    grid: &TimeFrequencyGrid,
    scale: &DivergingScale,
    width: usize,
    height: usize,
) -> Raster {
    let mut raster = Raster::blank(width, height);
    if grid.is_empty() || width == 0 || height == 0 {
        return raster;
    }
    let nt = grid.time_count() as f64;
    let nf = grid.freq_count() as f64;
    for (fi, row) in grid.power_db.iter().enumerate() {
        let y_top = (height as f64 * (1.0 - (fi + 1) as f64 / nf)).round() as usize;
        let y_bottom = (height as f64 * (1.0 - fi as f64 / nf)).round() as usize + 1;
        for (ti, &value) in row.iter().enumerate() {
            let x0 = (width as f64 * ti as f64 / nt).round() as usize;
            let x1 = (width as f64 * (ti + 1) as f64 / nt).round() as usize + 1;
            raster.fill_rect(x0, y_top, x1, y_bottom, scale.color_at(value));
        }
    }
    raster
}

/// Paint a vertical colorbar spanning the scale's domain, max at the top.
pub fn render_colorbar(scale: &DivergingScale, width: usize, height: usize) -> Raster {
    let mut raster = Raster::blank(width, height);
    if width == 0 || height == 0 {
        return raster;
    }
    let steps = (height - 1).max(1) as f64;
    for y in 0..height {
        let value = scale.max - (y as f64 / steps) * (scale.max - scale.min);
        raster.fill_rect(0, y, width, y + 1, scale.color_at(value));
    }
    raster
}

/// Max/mid/min labels for the colorbar, top to bottom.
pub fn colorbar_labels(scale: &DivergingScale) -> [String; 3] {
    [
        format_db(scale.max),
        format_db(scale.midpoint()),
        format_db(scale.min),
    ]
}

fn format_db(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.1}")
    }
}

/// One axis tick: fractional position along the axis plus its label.
/// For the time axis `frac` runs left to right, for the frequency axis
/// bottom to top.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisTick {
    pub frac: f64,
    pub label: String,
}

/// Evenly spaced time ticks interpolated between the first and last bin.
pub fn time_ticks(times_ms: &[f64], count: usize) -> Vec<AxisTick> {
    let (first, last) = match (times_ms.first(), times_ms.last()) {
        (Some(&f), Some(&l)) => (f, l),
        _ => return Vec::new(),
    };
    let count = count.max(2);
    (0..count)
        .map(|i| {
            let frac = i as f64 / (count - 1) as f64;
            let value = first + frac * (last - first);
            AxisTick {
                frac,
                label: format!("{value:.0}"),
            }
        })
        .collect()
}

/// Evenly spaced frequency ticks between the lowest and highest bin.
/// Labels keep one decimal below 1 Hz and round to integers above.
pub fn frequency_ticks(freqs_hz: &[f64], count: usize) -> Vec<AxisTick> {
    if freqs_hz.is_empty() {
        return Vec::new();
    }
    let min = freqs_hz.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = freqs_hz.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let count = count.max(2);
    (0..count)
        .map(|i| {
            let frac = i as f64 / (count - 1) as f64;
            let value = min + frac * (max - min);
            AxisTick {
                frac,
                label: format_frequency(value),
            }
        })
        .collect()
}

fn format_frequency(hz: f64) -> String {
    if hz < 1.0 {
        format!("{hz:.1}")
    } else {
        format!("{hz:.0}")
    }
}
