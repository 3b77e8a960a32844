use std::path::PathBuf;

use crate::foundation::core::{GeoPoint, MilliTime, Rgba8};

/// One time-stamped position inside a track.
///
/// Invariant: within a track's point sequence, timestamps are non-decreasing
/// after trimming and resampling (enforced by
/// [`prepare_track`](crate::timeline::prepare_track)).
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TrackPoint {
    pub point: GeoPoint,
    pub time: MilliTime,
    /// Speed in km/h when the recording device provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed_kmh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl TrackPoint {
    pub fn new(lat: f64, lon: f64, time_ms: i64) -> Self {
        Self {
            point: GeoPoint::new(lat, lon),
            time: MilliTime(time_ms),
            speed_kmh: None,
            comment: None,
        }
    }
}

/// A named marker independent of track segments, drawn once its time has
/// passed.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct WayPoint {
    pub point: GeoPoint,
    pub time: MilliTime,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A photo to fold into the animation at its capture time.
///
/// The source image is expected to be rotation-normalized already (EXIF
/// handling is a collaborator concern); `rotation_deg` carries any residual
/// rotation to apply at composition time.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Photo {
    pub time: MilliTime,
    pub source: PathBuf,
    #[serde(default)]
    pub rotation_deg: f64,
}

/// Per-track presentation and time-mapping settings.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TrackStyle {
    pub label: String,
    pub color: Rgba8,
    pub line_width: f64,
    /// Marker icon image; when absent a plain dot is drawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<PathBuf>,
    #[serde(default = "default_icon_scale")]
    pub icon_scale: f64,
    /// Mirror the icon horizontally (for icons drawn facing the other way).
    #[serde(default)]
    pub mirror_icon: bool,
    /// Added to every raw point timestamp; may be negative.
    #[serde(default)]
    pub time_offset_ms: i64,
    /// Drop points earlier than this many ms after the (offset) track start.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_start_ms: Option<i64>,
    /// Drop points later than this many ms before the (offset) track end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trim_end_ms: Option<i64>,
    /// Resample so consecutive points are at most this far apart in time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forced_point_interval_ms: Option<i64>,
    /// Draw the path travelled so far beneath the fading trail.
    #[serde(default)]
    pub pre_draw: bool,
    #[serde(default = "default_pre_draw_color")]
    pub pre_draw_color: Rgba8,
    #[serde(default = "default_pre_draw_width")]
    pub pre_draw_width: f64,
    /// Show the marker at the first point before the track has started.
    #[serde(default)]
    pub visible_before_start: bool,
}

fn default_icon_scale() -> f64 {
    1.0
}

fn default_pre_draw_color() -> Rgba8 {
    Rgba8::rgba(128, 128, 128, 160)
}

fn default_pre_draw_width() -> f64 {
    1.0
}

impl Default for TrackStyle {
    fn default() -> Self {
        Self {
            label: String::new(),
            color: Rgba8::rgb(255, 0, 0),
            line_width: 2.0,
            icon: None,
            icon_scale: 1.0,
            mirror_icon: false,
            time_offset_ms: 0,
            trim_start_ms: None,
            trim_end_ms: None,
            forced_point_interval_ms: None,
            pre_draw: false,
            pre_draw_color: default_pre_draw_color(),
            pre_draw_width: default_pre_draw_width(),
            visible_before_start: false,
        }
    }
}

/// An ordered sequence of time-stamped points from one input file, built once
/// before rendering begins and immutable afterwards.
///
/// Points arrive already time-sorted from the track-data collaborator.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Track {
    pub style: TrackStyle,
    pub points: Vec<TrackPoint>,
}

impl Track {
    pub fn new(style: TrackStyle, points: Vec<TrackPoint>) -> Self {
        Self { style, points }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_json_roundtrip() {
        let track = Track::new(
            TrackStyle {
                label: "ride".to_string(),
                time_offset_ms: -2500,
                ..TrackStyle::default()
            },
            vec![TrackPoint::new(47.0, 8.0, 0), TrackPoint::new(47.1, 8.1, 60_000)],
        );
        let s = serde_json::to_string(&track).unwrap();
        let de: Track = serde_json::from_str(&s).unwrap();
        assert_eq!(de.points.len(), 2);
        assert_eq!(de.style.time_offset_ms, -2500);
        assert_eq!(de.style.icon_scale, 1.0);
    }

    #[test]
    fn style_defaults_apply_on_sparse_json() {
        let de: TrackStyle = serde_json::from_str(
            r#"{"label":"a","color":{"r":0,"g":0,"b":255,"a":255},"line_width":3.0}"#,
        )
        .unwrap();
        assert!(!de.pre_draw);
        assert_eq!(de.time_offset_ms, 0);
        assert_eq!(de.pre_draw_width, 1.0);
    }
}
