use crate::foundation::core::{GeoPoint, MilliTime};
use crate::timeline::PreparedTrack;

/// One trail vertex tagged with its fade alpha.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrailPoint {
    pub point: GeoPoint,
    pub alpha: f64,
}

/// Everything the compositor needs to draw one track at one frame time.
#[derive(Clone, Debug, Default)]
pub struct CursorState {
    /// Interpolated marker position; `None` before the track starts when the
    /// track is configured to stay hidden until then.
    pub position: Option<GeoPoint>,
    /// Bearing at the marker, degrees clockwise from north.
    pub heading_deg: f64,
    /// Trail vertices inside `[t - tail, t]`, oldest first, ending at the
    /// current position.
    pub trail: Vec<TrailPoint>,
    /// Path travelled so far, drawn beneath the trail when pre-draw is on.
    pub pre_draw: Vec<GeoPoint>,
    /// Comment of the most recent passed point carrying one.
    pub comment: Option<String>,
    /// Speed at the marker in km/h (recorded, or derived from neighbors).
    pub speed_kmh: Option<f64>,
    /// True once the frame time is past the track's last point.
    pub finished: bool,
}

/// Fade options for the trail.
#[derive(Clone, Copy, Debug)]
pub struct TrailOpts {
    pub tail_duration_ms: i64,
    pub fadeout: bool,
}

/// Compute the cursor for `track` at frame time `t`.
///
/// Interpolating at exactly a recorded timestamp returns that point's
/// coordinates exactly, not a floating-point approximation.
pub fn cursor_at(track: &PreparedTrack, t: MilliTime, opts: TrailOpts) -> CursorState {
    let pts = &track.points;
    debug_assert!(!pts.is_empty());

    let mut state = CursorState::default();

    if t < track.start() {
        if track.style.visible_before_start {
            state.position = Some(pts[0].point);
            state.heading_deg = initial_heading(track);
        }
        return state;
    }

    state.finished = t > track.end();
    let clamped = t.min(track.end());

    // Index of the first point strictly after `clamped`.
    let idx = pts.partition_point(|p| p.time <= clamped);
    let (current, heading) = if idx == 0 {
        (pts[0].point, initial_heading(track))
    } else if idx >= pts.len() {
        (pts[pts.len() - 1].point, final_heading(track))
    } else {
        let a = &pts[idx - 1];
        let b = &pts[idx];
        let gap = b.time.delta_ms(a.time);
        let pos = if gap == 0 || a.time == clamped {
            a.point
        } else {
            let ratio = clamped.delta_ms(a.time) as f64 / gap as f64;
            GeoPoint::lerp(a.point, b.point, ratio)
        };
        (pos, a.point.bearing_to(b.point))
    };
    state.position = Some(current);
    state.heading_deg = heading;

    let last_passed = idx.min(pts.len()).saturating_sub(1);
    state.speed_kmh = speed_at(track, last_passed);
    state.comment = pts[..=last_passed]
        .iter()
        .rev()
        .find_map(|p| p.comment.clone());

    if track.style.pre_draw {
        state.pre_draw = pts[..=last_passed].iter().map(|p| p.point).collect();
        state.pre_draw.push(current);
    }

    state.trail = trail(pts, last_passed, current, clamped, opts);
    state
}

fn trail(
    pts: &[crate::model::TrackPoint],
    last_passed: usize,
    current: GeoPoint,
    t: MilliTime,
    opts: TrailOpts,
) -> Vec<TrailPoint> {
    let tail_start = t.offset(-opts.tail_duration_ms);
    let alpha_of = |point_time: MilliTime| -> f64 {
        if !opts.fadeout {
            return 1.0;
        }
        let age = t.delta_ms(point_time) as f64;
        (1.0 - age / opts.tail_duration_ms as f64).clamp(0.0, 1.0)
    };

    let mut out: Vec<TrailPoint> = pts[..=last_passed]
        .iter()
        .filter(|p| p.time >= tail_start)
        .map(|p| TrailPoint {
            point: p.point,
            alpha: alpha_of(p.time),
        })
        .collect();
    // The marker position closes the trail at full opacity.
    out.push(TrailPoint {
        point: current,
        alpha: 1.0,
    });
    out
}

fn speed_at(track: &PreparedTrack, last_passed: usize) -> Option<f64> {
    let pts = &track.points;
    if let Some(s) = pts[last_passed].speed_kmh {
        return Some(s);
    }
    // Fall back to the segment speed around the marker.
    let (a, b) = if last_passed + 1 < pts.len() {
        (&pts[last_passed], &pts[last_passed + 1])
    } else if last_passed > 0 {
        (&pts[last_passed - 1], &pts[last_passed])
    } else {
        return None;
    };
    let dt_ms = b.time.delta_ms(a.time);
    if dt_ms <= 0 {
        return None;
    }
    let meters = a.point.distance_m(b.point);
    Some(meters / (dt_ms as f64 / 1000.0) * 3.6)
}

fn initial_heading(track: &PreparedTrack) -> f64 {
    let pts = &track.points;
    if pts.len() > 1 {
        pts[0].point.bearing_to(pts[1].point)
    } else {
        0.0
    }
}

fn final_heading(track: &PreparedTrack) -> f64 {
    let pts = &track.points;
    if pts.len() > 1 {
        pts[pts.len() - 2].point.bearing_to(pts[pts.len() - 1].point)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Track, TrackPoint, TrackStyle};
    use crate::timeline::prepare_track;

    fn opts() -> TrailOpts {
        TrailOpts {
            tail_duration_ms: 10_000,
            fadeout: true,
        }
    }

    fn prepared(points: Vec<TrackPoint>) -> crate::timeline::PreparedTrack {
        prepare_track(&Track::new(
            TrackStyle {
                label: "t".to_string(),
                ..TrackStyle::default()
            },
            points,
        ))
        .unwrap()
    }

    fn two_point_track() -> crate::timeline::PreparedTrack {
        prepared(vec![
            TrackPoint::new(47.0, 8.0, 0),
            TrackPoint::new(48.0, 9.0, 10_000),
        ])
    }

    #[test]
    fn interpolation_is_exact_at_recorded_points() {
        let track = prepared(vec![
            TrackPoint::new(47.123_456_789, 8.987_654_321, 0),
            TrackPoint::new(47.3, 8.7, 7_777),
            TrackPoint::new(47.9, 8.1, 20_000),
        ]);
        for p in &track.points {
            let c = cursor_at(&track, p.time, opts());
            assert_eq!(c.position.unwrap(), p.point);
        }
    }

    #[test]
    fn interpolates_between_points_by_time_ratio() {
        let track = two_point_track();
        let c = cursor_at(&track, MilliTime(5_000), opts());
        let p = c.position.unwrap();
        assert!((p.lat - 47.5).abs() < 1e-12);
        assert!((p.lon - 8.5).abs() < 1e-12);
    }

    #[test]
    fn holds_last_point_after_track_end() {
        let track = two_point_track();
        let c = cursor_at(&track, MilliTime(99_000), opts());
        assert_eq!(c.position.unwrap(), GeoPoint::new(48.0, 9.0));
        assert!(c.finished);
    }

    #[test]
    fn before_start_respects_visibility_flag() {
        let track = two_point_track();
        let hidden = cursor_at(&track, MilliTime(-1_000), opts());
        assert!(hidden.position.is_none());

        let raw = Track::new(
            TrackStyle {
                label: "t".to_string(),
                visible_before_start: true,
                ..TrackStyle::default()
            },
            vec![
                TrackPoint::new(47.0, 8.0, 0),
                TrackPoint::new(48.0, 9.0, 10_000),
            ],
        );
        let track = prepare_track(&raw).unwrap();
        let shown = cursor_at(&track, MilliTime(-1_000), opts());
        assert_eq!(shown.position.unwrap(), GeoPoint::new(47.0, 8.0));
    }

    #[test]
    fn trail_alpha_bounds_and_endpoints() {
        let track = prepared(vec![
            TrackPoint::new(47.0, 8.0, 0),
            TrackPoint::new(47.1, 8.0, 5_000),
            TrackPoint::new(47.2, 8.0, 10_000),
        ]);
        let c = cursor_at(&track, MilliTime(10_000), opts());
        for tp in &c.trail {
            assert!((0.0..=1.0).contains(&tp.alpha));
        }
        // Oldest in-tail point sits exactly tail_duration in the past.
        assert_eq!(c.trail[0].alpha, 0.0);
        assert_eq!(c.trail.last().unwrap().alpha, 1.0);
    }

    #[test]
    fn trail_without_fadeout_is_constant_alpha() {
        let track = two_point_track();
        let c = cursor_at(
            &track,
            MilliTime(8_000),
            TrailOpts {
                tail_duration_ms: 10_000,
                fadeout: false,
            },
        );
        assert!(c.trail.iter().all(|tp| tp.alpha == 1.0));
    }

    #[test]
    fn trail_excludes_points_older_than_tail() {
        let track = prepared(vec![
            TrackPoint::new(47.0, 8.0, 0),
            TrackPoint::new(47.1, 8.0, 20_000),
            TrackPoint::new(47.2, 8.0, 25_000),
        ]);
        let c = cursor_at(&track, MilliTime(25_000), opts());
        // Point at t=0 is outside [15s, 25s].
        assert_eq!(c.trail.len(), 3);
        assert_eq!(c.trail[0].point, GeoPoint::new(47.1, 8.0));
    }

    #[test]
    fn pre_draw_covers_travelled_path() {
        let raw = Track::new(
            TrackStyle {
                label: "t".to_string(),
                pre_draw: true,
                ..TrackStyle::default()
            },
            vec![
                TrackPoint::new(47.0, 8.0, 0),
                TrackPoint::new(47.1, 8.0, 10_000),
                TrackPoint::new(47.2, 8.0, 20_000),
            ],
        );
        let track = prepare_track(&raw).unwrap();
        let c = cursor_at(&track, MilliTime(15_000), opts());
        assert_eq!(c.pre_draw.len(), 3); // two passed points + current
        assert!((c.pre_draw[2].lat - 47.15).abs() < 1e-12);
    }

    #[test]
    fn heading_follows_bracketing_bearing() {
        let track = prepared(vec![
            TrackPoint::new(0.0, 0.0, 0),
            TrackPoint::new(0.0, 1.0, 10_000), // due east
        ]);
        let c = cursor_at(&track, MilliTime(5_000), opts());
        assert!((c.heading_deg - 90.0).abs() < 0.5);
    }

    #[test]
    fn offset_scenario_two_tracks() {
        // Track A offset 0, track B offset +5000ms; at t=5000 A is at its
        // raw-5s position and B at its raw first point.
        let a = prepared(vec![
            TrackPoint::new(10.0, 10.0, 0),
            TrackPoint::new(11.0, 11.0, 10_000),
        ]);
        let b_raw = Track::new(
            TrackStyle {
                label: "b".to_string(),
                time_offset_ms: 5_000,
                ..TrackStyle::default()
            },
            vec![
                TrackPoint::new(20.0, 20.0, 0),
                TrackPoint::new(21.0, 21.0, 10_000),
            ],
        );
        let b = prepare_track(&b_raw).unwrap();

        let t = MilliTime(5_000);
        let ca = cursor_at(&a, t, opts());
        let cb = cursor_at(&b, t, opts());
        let pa = ca.position.unwrap();
        assert!((pa.lat - 10.5).abs() < 1e-12);
        assert_eq!(cb.position.unwrap(), GeoPoint::new(20.0, 20.0));
    }

    #[test]
    fn derived_speed_from_segment() {
        // 1 degree of latitude in 3600s is ~111 km/h... scaled down: 0.01 deg
        // (~1.11 km) in 60s => ~66.7 km/h.
        let track = prepared(vec![
            TrackPoint::new(47.0, 8.0, 0),
            TrackPoint::new(47.01, 8.0, 60_000),
        ]);
        let c = cursor_at(&track, MilliTime(30_000), opts());
        let v = c.speed_kmh.unwrap();
        assert!((60.0..75.0).contains(&v), "got {v}");
    }
}
