use crate::foundation::error::{TrackmotionError, TrackmotionResult};

pub use kurbo::{Point, Rect};

/// Absolute 0-based index of an emitted output frame.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Wall-clock timestamp in milliseconds since the Unix epoch.
///
/// Track timestamps, per-track offsets and the animation timeline all live in
/// this space; frame pacing converts to it through [`Timeline`](crate::timeline::Timeline).
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct MilliTime(pub i64);

impl MilliTime {
    /// Signed distance `self - other` in milliseconds.
    pub fn delta_ms(self, other: MilliTime) -> i64 {
        self.0 - other.0
    }

    /// Shift by a signed millisecond offset.
    pub fn offset(self, ms: i64) -> MilliTime {
        MilliTime(self.0 + ms)
    }
}

/// A geographic position in degrees (WGS84).
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Linear interpolation in degree space; adequate for the point spacings
    /// seen in activity logs.
    pub fn lerp(a: GeoPoint, b: GeoPoint, t: f64) -> GeoPoint {
        GeoPoint {
            lat: a.lat + (b.lat - a.lat) * t,
            lon: a.lon + (b.lon - a.lon) * t,
        }
    }

    /// Initial bearing from `self` toward `other`, degrees clockwise from north.
    pub fn bearing_to(self, other: GeoPoint) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let y = dlon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * dlon.cos();
        let deg = y.atan2(x).to_degrees();
        (deg + 360.0) % 360.0
    }

    /// Great-circle distance in meters (haversine).
    pub fn distance_m(self, other: GeoPoint) -> f64 {
        const EARTH_RADIUS_M: f64 = 6_371_000.0;
        let dlat = (other.lat - self.lat).to_radians();
        let dlon = (other.lon - self.lon).to_radians();
        let a = (dlat / 2.0).sin().powi(2)
            + self.lat.to_radians().cos() * other.lat.to_radians().cos() * (dlon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// Axis-aligned geographic bounding box in degrees.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct GeoBounds {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl GeoBounds {
    pub fn new(min_lat: f64, max_lat: f64, min_lon: f64, max_lon: f64) -> TrackmotionResult<Self> {
        if min_lat > max_lat || min_lon > max_lon {
            return Err(TrackmotionError::configuration(
                "GeoBounds min must be <= max on both axes",
            ));
        }
        Ok(Self {
            min_lat,
            max_lat,
            min_lon,
            max_lon,
        })
    }

    /// Degenerate box around a single point.
    pub fn around(p: GeoPoint) -> Self {
        Self {
            min_lat: p.lat,
            max_lat: p.lat,
            min_lon: p.lon,
            max_lon: p.lon,
        }
    }

    pub fn include(&mut self, p: GeoPoint) {
        self.min_lat = self.min_lat.min(p.lat);
        self.max_lat = self.max_lat.max(p.lat);
        self.min_lon = self.min_lon.min(p.lon);
        self.max_lon = self.max_lon.max(p.lon);
    }

    pub fn union(a: GeoBounds, b: GeoBounds) -> GeoBounds {
        GeoBounds {
            min_lat: a.min_lat.min(b.min_lat),
            max_lat: a.max_lat.max(b.max_lat),
            min_lon: a.min_lon.min(b.min_lon),
            max_lon: a.max_lon.max(b.max_lon),
        }
    }

    pub fn center(self) -> GeoPoint {
        GeoPoint {
            lat: (self.min_lat + self.max_lat) / 2.0,
            lon: (self.min_lon + self.max_lon) / 2.0,
        }
    }

    /// Grow the box symmetrically so both spans are at least `min_span_deg`.
    ///
    /// A single point or all-identical points would otherwise produce a
    /// zero-extent box and a divide-by-zero in the scale computation.
    pub fn with_min_span(self, min_span_deg: f64) -> GeoBounds {
        let mut out = self;
        if out.max_lat - out.min_lat < min_span_deg {
            let c = (out.min_lat + out.max_lat) / 2.0;
            out.min_lat = c - min_span_deg / 2.0;
            out.max_lat = c + min_span_deg / 2.0;
        }
        if out.max_lon - out.min_lon < min_span_deg {
            let c = (out.min_lon + out.max_lon) / 2.0;
            out.min_lon = c - min_span_deg / 2.0;
            out.max_lon = c + min_span_deg / 2.0;
        }
        out
    }
}

/// Straight-alpha RGBA8 color as it appears in configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rgba8 {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba8 {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Premultiply color channels by alpha, with an extra opacity factor.
    pub fn to_premul(self, opacity: f64) -> [u8; 4] {
        let a = (f64::from(self.a) * opacity.clamp(0.0, 1.0)).round() as u16;
        let premul = |c: u8| (((u16::from(c) * a) + 127) / 255) as u8;
        [premul(self.r), premul(self.g), premul(self.b), a as u8]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearing_cardinal_directions() {
        let origin = GeoPoint::new(0.0, 0.0);
        assert!((origin.bearing_to(GeoPoint::new(1.0, 0.0)) - 0.0).abs() < 1e-9);
        assert!((origin.bearing_to(GeoPoint::new(0.0, 1.0)) - 90.0).abs() < 1e-9);
        assert!((origin.bearing_to(GeoPoint::new(-1.0, 0.0)) - 180.0).abs() < 1e-9);
        assert!((origin.bearing_to(GeoPoint::new(0.0, -1.0)) - 270.0).abs() < 1e-9);
    }

    #[test]
    fn min_span_expands_degenerate_box() {
        let b = GeoBounds::around(GeoPoint::new(47.0, 8.0)).with_min_span(0.01);
        assert!((b.max_lat - b.min_lat - 0.01).abs() < 1e-12);
        assert!((b.max_lon - b.min_lon - 0.01).abs() < 1e-12);
        let c = b.center();
        assert!((c.lat - 47.0).abs() < 1e-12);
        assert!((c.lon - 8.0).abs() < 1e-12);
    }

    #[test]
    fn premul_applies_opacity() {
        let c = Rgba8::rgba(255, 0, 0, 255);
        assert_eq!(c.to_premul(1.0), [255, 0, 0, 255]);
        assert_eq!(c.to_premul(0.0), [0, 0, 0, 0]);
        let half = c.to_premul(0.5);
        assert_eq!(half[3], 128);
        assert_eq!(half[0], 128);
    }
}
