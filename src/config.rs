use std::path::PathBuf;

use crate::foundation::core::{GeoBounds, Rgba8};
use crate::foundation::error::{TrackmotionError, TrackmotionResult};

/// Anchor for positioned overlay elements (logo, texts).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    BottomLeft,
    BottomCenter,
    BottomRight,
}

/// Pixel origin for an item of `item_w x item_h` anchored inside a
/// `canvas_w x canvas_h` canvas with the given margin.
pub fn anchor_origin(
    anchor: Anchor,
    canvas_w: u32,
    canvas_h: u32,
    item_w: u32,
    item_h: u32,
    margin: u32,
) -> (i32, i32) {
    let cw = canvas_w as i64;
    let ch = canvas_h as i64;
    let iw = item_w as i64;
    let ih = item_h as i64;
    let m = margin as i64;

    let x = match anchor {
        Anchor::TopLeft | Anchor::BottomLeft => m,
        Anchor::TopCenter | Anchor::BottomCenter => (cw - iw) / 2,
        Anchor::TopRight | Anchor::BottomRight => cw - iw - m,
    };
    let y = match anchor {
        Anchor::TopLeft | Anchor::TopCenter | Anchor::TopRight => m,
        Anchor::BottomLeft | Anchor::BottomCenter | Anchor::BottomRight => ch - ih - m,
    };
    (x as i32, y as i32)
}

/// Display unit for the `%SPEED%` template token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SpeedUnit {
    #[default]
    Kmh,
    Mph,
    MinPerKm,
}

impl SpeedUnit {
    /// Convert a km/h value into this unit.
    pub fn convert(self, kmh: f64) -> f64 {
        match self {
            SpeedUnit::Kmh => kmh,
            SpeedUnit::Mph => kmh / 1.609_344,
            SpeedUnit::MinPerKm => {
                if kmh <= 0.0 {
                    0.0
                } else {
                    60.0 / kmh
                }
            }
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SpeedUnit::Kmh => "km/h",
            SpeedUnit::Mph => "mph",
            SpeedUnit::MinPerKm => "min/km",
        }
    }
}

/// All render settings. A plain struct with named fields; [`validate`]
/// rejects contradictory combinations before any frame is produced.
///
/// [`validate`]: RenderConfig::validate
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Output width in pixels; must be even for yuv420p encoding.
    pub width: u32,
    /// Output height in pixels; must be even for yuv420p encoding.
    pub height: u32,
    pub fps: f64,

    /// Desired output duration. Takes precedence over `speedup` when set.
    pub total_time_ms: Option<u64>,
    /// Real milliseconds of track time per millisecond of video.
    pub speedup: Option<f64>,

    /// Length of the fading trail behind the marker.
    pub tail_duration_ms: u64,
    /// Fade the trail from opaque at the marker to transparent at the tail
    /// end; when off the trail is drawn at constant alpha.
    pub tail_fadeout: bool,

    /// Hold the first composited frame this long before the animation runs.
    pub keep_first_frame_ms: u64,
    /// Hold the last composited frame this long after the animation ends.
    pub keep_last_frame_ms: u64,

    /// Remove time windows where no track moves beyond `idle_epsilon_deg`.
    pub skip_idle: bool,
    /// Geographic epsilon (degrees) below which movement counts as idle.
    pub idle_epsilon_deg: f64,
    /// Idle windows shorter than this are kept in the timeline.
    pub idle_min_window_ms: u64,

    pub background_color: Rgba8,
    pub background_image: Option<PathBuf>,

    /// Explicit viewport bounds; all four or none.
    pub min_lat: Option<f64>,
    pub max_lat: Option<f64>,
    pub min_lon: Option<f64>,
    pub max_lon: Option<f64>,
    /// Fixed zoom level; auto-fit when unset.
    pub zoom: Option<f64>,
    /// Sub-viewport for the tracking camera; defaults to the full canvas.
    pub viewport_width: Option<u32>,
    pub viewport_height: Option<u32>,
    /// Camera smoothing, 0 (instant) to 100 (maximal lag).
    pub viewport_inertia: u8,
    /// Minimum bounding-box span in degrees for degenerate track extents.
    pub min_span_deg: f64,

    /// Slippy-map tile URL template with `{zoom}`, `{x}`, `{y}` placeholders.
    pub map_tile_url: Option<String>,
    /// Alpha applied to the background map layer.
    pub map_visibility: f64,
    /// Tile cache time-to-live in seconds.
    pub tile_cache_ttl_secs: u64,

    /// Marker dot radius in pixels for tracks without an icon.
    pub marker_size: f64,

    /// How long a photo is held fully visible.
    pub photo_hold_ms: u64,
    /// Intro and outro fade duration for each photo.
    pub photo_animation_ms: u64,

    pub flashback_color: Rgba8,
    /// Duration of the flashback overlay after a timeline discontinuity;
    /// disabled when unset.
    pub flashback_duration_ms: Option<u64>,

    pub logo: Option<PathBuf>,
    pub logo_anchor: Anchor,
    /// Attribution text; `None` falls back to a map attribution when tiles
    /// are enabled.
    pub attribution: Option<String>,
    pub attribution_anchor: Anchor,
    /// Information text template; supports `%SPEED%`, `%LATLON%`,
    /// `%DATETIME%`.
    pub information: Option<String>,
    pub information_anchor: Anchor,
    pub comment_anchor: Anchor,

    /// TrueType font for overlay text; text layers are skipped when unset.
    pub font: Option<PathBuf>,
    pub font_size: f64,
    pub text_color: Rgba8,
    pub speed_unit: SpeedUnit,

    /// Margin in pixels around the viewport and anchored overlays.
    pub margin: u32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fps: 30.0,
            total_time_ms: None,
            speedup: Some(1000.0),
            tail_duration_ms: 120_000,
            tail_fadeout: true,
            keep_first_frame_ms: 0,
            keep_last_frame_ms: 0,
            skip_idle: false,
            idle_epsilon_deg: 5e-5,
            idle_min_window_ms: 3_000,
            background_color: Rgba8::rgb(255, 255, 255),
            background_image: None,
            min_lat: None,
            max_lat: None,
            min_lon: None,
            max_lon: None,
            zoom: None,
            viewport_width: None,
            viewport_height: None,
            viewport_inertia: 0,
            min_span_deg: 0.002,
            map_tile_url: None,
            map_visibility: 0.5,
            tile_cache_ttl_secs: 12 * 3600,
            marker_size: 5.0,
            photo_hold_ms: 3_000,
            photo_animation_ms: 700,
            flashback_color: Rgba8::rgba(255, 255, 255, 255),
            flashback_duration_ms: None,
            logo: None,
            logo_anchor: Anchor::TopLeft,
            attribution: None,
            attribution_anchor: Anchor::BottomLeft,
            information: None,
            information_anchor: Anchor::BottomRight,
            comment_anchor: Anchor::BottomCenter,
            font: None,
            font_size: 14.0,
            text_color: Rgba8::rgb(0, 0, 0),
            speed_unit: SpeedUnit::Kmh,
            margin: 10,
        }
    }
}

impl RenderConfig {
    pub fn validate(&self) -> TrackmotionResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(TrackmotionError::configuration(
                "output width/height must be > 0",
            ));
        }
        if !self.width.is_multiple_of(2) || !self.height.is_multiple_of(2) {
            // yuv420p subsampling needs even dimensions.
            return Err(TrackmotionError::configuration(
                "output width/height must be even",
            ));
        }
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(TrackmotionError::configuration("fps must be > 0"));
        }

        if self.total_time_ms == Some(0) {
            return Err(TrackmotionError::configuration("total_time_ms must be > 0"));
        }
        if let Some(s) = self.speedup
            && !(s.is_finite() && s > 0.0)
        {
            return Err(TrackmotionError::configuration("speedup must be > 0"));
        }
        if self.total_time_ms.is_none() && self.speedup.is_none() {
            return Err(TrackmotionError::configuration(
                "one of total_time_ms or speedup must be set",
            ));
        }

        if self.tail_fadeout && self.tail_duration_ms == 0 {
            return Err(TrackmotionError::configuration(
                "tail_fadeout requires tail_duration_ms > 0",
            ));
        }

        if self.min_lat.is_some() != self.max_lat.is_some()
            || self.min_lon.is_some() != self.max_lon.is_some()
            || self.min_lat.is_some() != self.min_lon.is_some()
        {
            return Err(TrackmotionError::configuration(
                "viewport bounds require all of min_lat/max_lat/min_lon/max_lon",
            ));
        }
        self.fixed_bounds()?;

        if self.viewport_inertia > 100 {
            return Err(TrackmotionError::configuration(
                "viewport_inertia must be in 0..=100",
            ));
        }
        if let (Some(vw), Some(vh)) = (self.viewport_width, self.viewport_height) {
            if vw == 0 || vh == 0 || vw > self.width || vh > self.height {
                return Err(TrackmotionError::configuration(
                    "viewport_width/height must be > 0 and within the canvas",
                ));
            }
        } else if self.viewport_width.is_some() != self.viewport_height.is_some() {
            return Err(TrackmotionError::configuration(
                "viewport_width and viewport_height must be set together",
            ));
        }

        if !(0.0..=1.0).contains(&self.map_visibility) {
            return Err(TrackmotionError::configuration(
                "map_visibility must be in 0.0..=1.0",
            ));
        }
        if let Some(z) = self.zoom
            && !(0.0..=19.0).contains(&z)
        {
            return Err(TrackmotionError::configuration("zoom must be in 0..=19"));
        }

        if self.idle_epsilon_deg <= 0.0 {
            return Err(TrackmotionError::configuration(
                "idle_epsilon_deg must be > 0",
            ));
        }
        if !(self.font_size.is_finite() && self.font_size > 0.0) {
            return Err(TrackmotionError::configuration("font_size must be > 0"));
        }
        if !(self.marker_size.is_finite() && self.marker_size > 0.0) {
            return Err(TrackmotionError::configuration("marker_size must be > 0"));
        }

        Ok(())
    }

    /// Explicit viewport bounds when all four are configured.
    pub fn fixed_bounds(&self) -> TrackmotionResult<Option<GeoBounds>> {
        match (self.min_lat, self.max_lat, self.min_lon, self.max_lon) {
            (Some(min_lat), Some(max_lat), Some(min_lon), Some(max_lon)) => {
                Ok(Some(GeoBounds::new(min_lat, max_lat, min_lon, max_lon)?))
            }
            _ => Ok(None),
        }
    }

    /// Effective attribution text: configured value, or a map attribution
    /// when a tile layer is enabled.
    pub fn effective_attribution(&self) -> Option<String> {
        if let Some(a) = &self.attribution {
            return Some(a.clone());
        }
        self.map_tile_url
            .as_ref()
            .map(|_| "Map data © OpenStreetMap contributors".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        RenderConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_odd_dimensions() {
        let cfg = RenderConfig {
            width: 1279,
            ..RenderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_one_sided_bounds() {
        let cfg = RenderConfig {
            min_lat: Some(47.0),
            ..RenderConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(crate::foundation::error::TrackmotionError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_inverted_bounds() {
        let cfg = RenderConfig {
            min_lat: Some(48.0),
            max_lat: Some(47.0),
            min_lon: Some(8.0),
            max_lon: Some(9.0),
            ..RenderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_neither_total_time_nor_speedup() {
        let cfg = RenderConfig {
            total_time_ms: None,
            speedup: None,
            ..RenderConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn speed_unit_conversions() {
        assert_eq!(SpeedUnit::Kmh.convert(36.0), 36.0);
        assert!((SpeedUnit::Mph.convert(1.609_344) - 1.0).abs() < 1e-12);
        assert!((SpeedUnit::MinPerKm.convert(12.0) - 5.0).abs() < 1e-12);
        assert_eq!(SpeedUnit::MinPerKm.convert(0.0), 0.0);
    }

    #[test]
    fn anchor_origins() {
        assert_eq!(anchor_origin(Anchor::TopLeft, 100, 50, 10, 10, 5), (5, 5));
        assert_eq!(
            anchor_origin(Anchor::BottomRight, 100, 50, 10, 10, 5),
            (85, 35)
        );
        assert_eq!(
            anchor_origin(Anchor::TopCenter, 100, 50, 10, 10, 5),
            (45, 5)
        );
    }

    #[test]
    fn attribution_defaults_with_tiles() {
        let cfg = RenderConfig {
            map_tile_url: Some("https://tile.example/{zoom}/{x}/{y}.png".to_string()),
            ..RenderConfig::default()
        };
        assert!(cfg.effective_attribution().unwrap().contains("OpenStreetMap"));
        assert!(RenderConfig::default().effective_attribution().is_none());
    }
}
