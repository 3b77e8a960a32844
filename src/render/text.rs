use std::path::Path;

use fontdue::{Font, FontSettings};

use crate::config::SpeedUnit;
use crate::foundation::core::{GeoPoint, MilliTime, Rgba8};
use crate::foundation::error::{TrackmotionError, TrackmotionResult};
use crate::render::canvas::mask_over_in_place;

/// Current per-frame values substituted into overlay text templates.
#[derive(Clone, Copy, Debug)]
pub struct TemplateValues {
    pub speed_kmh: Option<f64>,
    pub position: Option<GeoPoint>,
    pub time: MilliTime,
    pub speed_unit: SpeedUnit,
}

/// Replace `%SPEED%`, `%LATLON%` and `%DATETIME%` tokens.
pub fn expand_template(template: &str, values: &TemplateValues) -> String {
    let speed = match values.speed_kmh {
        Some(kmh) => format!(
            "{:.1} {}",
            values.speed_unit.convert(kmh),
            values.speed_unit.label()
        ),
        None => String::new(),
    };
    let latlon = match values.position {
        Some(p) => format!("{:.6}, {:.6}", p.lat, p.lon),
        None => String::new(),
    };
    let datetime = chrono::DateTime::from_timestamp_millis(values.time.0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();

    template
        .replace("%SPEED%", &speed)
        .replace("%LATLON%", &latlon)
        .replace("%DATETIME%", &datetime)
}

/// Rasterizes multi-line text with a single TrueType font at a fixed size.
pub struct TextRenderer {
    font: Font,
    size: f32,
}

impl TextRenderer {
    pub fn load(path: &Path, size: f64) -> TrackmotionResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| TrackmotionError::asset(format!("font {}: {e}", path.display())))?;
        Self::from_bytes(&bytes, size)
    }

    pub fn from_bytes(bytes: &[u8], size: f64) -> TrackmotionResult<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| TrackmotionError::asset(format!("font parse: {e}")))?;
        Ok(Self {
            font,
            size: size as f32,
        })
    }

    fn line_height(&self) -> f32 {
        self.font
            .horizontal_line_metrics(self.size)
            .map(|m| m.new_line_size)
            .unwrap_or(self.size * 1.2)
    }

    fn ascent(&self) -> f32 {
        self.font
            .horizontal_line_metrics(self.size)
            .map(|m| m.ascent)
            .unwrap_or(self.size)
    }

    /// Bounding box of `text` in pixels, newline-aware.
    pub fn measure(&self, text: &str) -> (u32, u32) {
        let mut max_w = 0f32;
        let mut lines = 0u32;
        for line in text.lines() {
            lines += 1;
            let w: f32 = line
                .chars()
                .map(|ch| self.font.metrics(ch, self.size).advance_width)
                .sum();
            max_w = max_w.max(w);
        }
        (max_w.ceil() as u32, (lines as f32 * self.line_height()).ceil() as u32)
    }

    /// Draw `text` with its top-left corner at `(x, y)` on a premultiplied
    /// canvas.
    pub fn draw(
        &self,
        data: &mut [u8],
        canvas_w: u32,
        canvas_h: u32,
        text: &str,
        x: i32,
        y: i32,
        color: Rgba8,
    ) {
        let line_height = self.line_height();
        let ascent = self.ascent();
        for (line_idx, line) in text.lines().enumerate() {
            let baseline = y + (ascent + line_idx as f32 * line_height).round() as i32;
            let mut pen_x = x as f32;
            for ch in line.chars() {
                let (metrics, bitmap) = self.font.rasterize(ch, self.size);
                if metrics.width > 0 && metrics.height > 0 {
                    let gx = (pen_x + metrics.xmin as f32).round() as i32;
                    let gy = baseline - metrics.height as i32 - metrics.ymin;
                    mask_over_in_place(
                        data,
                        canvas_w,
                        canvas_h,
                        &bitmap,
                        metrics.width as u32,
                        metrics.height as u32,
                        gx,
                        gy,
                        color,
                    );
                }
                pen_x += metrics.advance_width;
            }
        }
    }
}
