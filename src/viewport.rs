use crate::config::RenderConfig;
use crate::foundation::core::{GeoBounds, GeoPoint, Point, Rect};
use crate::foundation::error::TrackmotionResult;

/// Highest latitude representable in Web Mercator.
const MERCATOR_MAX_LAT: f64 = 85.051_128_78;

const MIN_ZOOM: f64 = 0.0;
const MAX_ZOOM: f64 = 19.0;

/// Project to Web Mercator world coordinates, both axes in `[0, 1]`.
///
/// `y` grows southward, matching slippy-map tile numbering.
pub fn mercator(p: GeoPoint) -> (f64, f64) {
    let x = (p.lon + 180.0) / 360.0;
    let lat = p.lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
    let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / std::f64::consts::PI) / 2.0;
    (x, y)
}

/// Camera state: Web Mercator world center plus fractional zoom.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewportState {
    pub center_x: f64,
    pub center_y: f64,
    pub zoom: f64,
}

impl ViewportState {
    /// One smoothing step toward `target`; `alpha` = 1 jumps, 0 never moves.
    fn smooth_toward(self, target: ViewportState, alpha: f64) -> ViewportState {
        ViewportState {
            center_x: self.center_x + (target.center_x - self.center_x) * alpha,
            center_y: self.center_y + (target.center_y - self.center_y) * alpha,
            zoom: self.zoom + (target.zoom - self.zoom) * alpha,
        }
    }

    #[cfg(test)]
    fn distance_to(self, other: ViewportState) -> f64 {
        let dx = self.center_x - other.center_x;
        let dy = self.center_y - other.center_y;
        let dz = (self.zoom - other.zoom) / MAX_ZOOM;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Frozen geographic-to-pixel mapping for one frame.
#[derive(Clone, Copy, Debug)]
pub struct ViewTransform {
    center_x: f64,
    center_y: f64,
    /// World-unit-to-pixel factor, `256 * 2^zoom`.
    scale: f64,
    zoom: f64,
    width: u32,
    height: u32,
}

impl ViewTransform {
    pub fn new(state: ViewportState, width: u32, height: u32) -> Self {
        Self {
            center_x: state.center_x,
            center_y: state.center_y,
            scale: 256.0 * state.zoom.exp2(),
            zoom: state.zoom,
            width,
            height,
        }
    }

    pub fn to_pixel(&self, p: GeoPoint) -> Point {
        let (x, y) = mercator(p);
        self.world_to_pixel(x, y)
    }

    /// Map Web Mercator world coordinates to canvas pixels.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Point {
        Point::new(
            (x - self.center_x) * self.scale + f64::from(self.width) / 2.0,
            (y - self.center_y) * self.scale + f64::from(self.height) / 2.0,
        )
    }

    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Visible region in Web Mercator world units.
    pub fn world_rect(&self) -> Rect {
        let hw = f64::from(self.width) / 2.0 / self.scale;
        let hh = f64::from(self.height) / 2.0 / self.scale;
        Rect::new(
            self.center_x - hw,
            self.center_y - hh,
            self.center_x + hw,
            self.center_y + hh,
        )
    }
}

/// Fit `bounds` into a `fit_w x fit_h` pixel area, leaving `margin` pixels on
/// each side. Bounds are assumed non-degenerate (see
/// [`GeoBounds::with_min_span`]).
fn fit_bounds(bounds: GeoBounds, fit_w: u32, fit_h: u32, margin: u32) -> ViewportState {
    let (x_min, y_min) = mercator(GeoPoint::new(bounds.max_lat, bounds.min_lon));
    let (x_max, y_max) = mercator(GeoPoint::new(bounds.min_lat, bounds.max_lon));
    let span_x = (x_max - x_min).max(f64::EPSILON);
    let span_y = (y_max - y_min).max(f64::EPSILON);

    let avail_w = f64::from(fit_w.saturating_sub(2 * margin).max(1));
    let avail_h = f64::from(fit_h.saturating_sub(2 * margin).max(1));
    let scale = (avail_w / span_x).min(avail_h / span_y);
    let zoom = (scale / 256.0).log2().clamp(MIN_ZOOM, MAX_ZOOM);

    ViewportState {
        center_x: (x_min + x_max) / 2.0,
        center_y: (y_min + y_max) / 2.0,
        zoom,
    }
}

enum Mode {
    /// Explicit bounds; the camera never moves.
    Fixed(ViewportState),
    /// Re-target every frame from the currently visible points.
    Follow,
}

/// Per-frame camera. Fixed bounds are resolved at construction; in follow
/// mode each frame folds the previous state toward a freshly fitted target.
pub struct ViewportEngine {
    mode: Mode,
    state: Option<ViewportState>,
    /// `(101 - inertia) / 101`; strictly positive so the fold always converges.
    alpha: f64,
    canvas_w: u32,
    canvas_h: u32,
    /// Zoom is fitted against the sub-viewport when one is configured.
    fit_w: u32,
    fit_h: u32,
    margin: u32,
    fixed_zoom: Option<f64>,
    min_span_deg: f64,
    /// Fallback target when no point is visible yet.
    track_bounds: GeoBounds,
}

impl ViewportEngine {
    /// `track_bounds` is the extent of all tracks, used for auto-fit without a
    /// sub-viewport and as the fallback before any marker is visible.
    pub fn new(cfg: &RenderConfig, track_bounds: GeoBounds) -> TrackmotionResult<Self> {
        let fit_w = cfg.viewport_width.unwrap_or(cfg.width);
        let fit_h = cfg.viewport_height.unwrap_or(cfg.height);
        let tracking = cfg.viewport_width.is_some();

        let mode = if let Some(bounds) = cfg.fixed_bounds()? {
            let bounds = bounds.with_min_span(cfg.min_span_deg);
            Mode::Fixed(fit_bounds(bounds, fit_w, fit_h, cfg.margin))
        } else if tracking {
            Mode::Follow
        } else {
            // Whole-track auto-fit is a constant camera as well.
            let bounds = track_bounds.with_min_span(cfg.min_span_deg);
            let mut state = fit_bounds(bounds, fit_w, fit_h, cfg.margin);
            if let Some(z) = cfg.zoom {
                state.zoom = z;
            }
            Mode::Fixed(state)
        };

        Ok(Self {
            mode,
            state: None,
            alpha: f64::from(101 - u16::from(cfg.viewport_inertia.min(100))) / 101.0,
            canvas_w: cfg.width,
            canvas_h: cfg.height,
            fit_w,
            fit_h,
            margin: cfg.margin,
            fixed_zoom: cfg.zoom,
            min_span_deg: cfg.min_span_deg,
            track_bounds,
        })
    }

    /// Advance the camera one frame and return the frozen transform.
    ///
    /// `visible` holds the current positions of all visible markers.
    pub fn frame_transform(&mut self, visible: &[GeoPoint]) -> ViewTransform {
        let target = match &self.mode {
            Mode::Fixed(state) => *state,
            Mode::Follow => self.follow_target(visible),
        };
        let state = match self.state {
            // The first frame snaps to the target instead of easing in from
            // an arbitrary origin.
            None => target,
            Some(prev) => prev.smooth_toward(target, self.alpha),
        };
        self.state = Some(state);
        ViewTransform::new(state, self.canvas_w, self.canvas_h)
    }

    fn follow_target(&self, visible: &[GeoPoint]) -> ViewportState {
        let bounds = match visible.split_first() {
            None => self.track_bounds,
            Some((first, rest)) => {
                let mut b = GeoBounds::around(*first);
                for p in rest {
                    b.include(*p);
                }
                b
            }
        };
        let mut target = fit_bounds(
            bounds.with_min_span(self.min_span_deg),
            self.fit_w,
            self.fit_h,
            self.margin,
        );
        if let Some(z) = self.fixed_zoom {
            target.zoom = z;
        }
        target
    }
}
