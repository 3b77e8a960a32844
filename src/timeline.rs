use crate::config::RenderConfig;
use crate::foundation::core::{FrameIndex, GeoPoint, MilliTime};
use crate::foundation::error::{TrackmotionError, TrackmotionResult};
use crate::model::{Track, TrackPoint, TrackStyle};

/// Half-open wall-clock interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: MilliTime,
    pub end: MilliTime,
}

impl TimeWindow {
    pub fn len_ms(self) -> i64 {
        (self.end.0 - self.start.0).max(0)
    }

    pub fn contains(self, t: MilliTime) -> bool {
        self.start <= t && t < self.end
    }
}

/// A track after offset application, trimming and resampling. Immutable for
/// the rest of the render.
#[derive(Clone, Debug)]
pub struct PreparedTrack {
    pub style: TrackStyle,
    pub points: Vec<TrackPoint>,
}

impl PreparedTrack {
    pub fn start(&self) -> MilliTime {
        self.points[0].time
    }

    pub fn end(&self) -> MilliTime {
        self.points[self.points.len() - 1].time
    }
}

/// Apply the track's time offset, trim its ends and resample long gaps.
///
/// Fails with [`TrackmotionError::TrackData`] when the point sequence is
/// empty after trimming; callers skip the track (and escalate only when all
/// tracks fail).
pub fn prepare_track(track: &Track) -> TrackmotionResult<PreparedTrack> {
    let style = track.style.clone();

    if track.points.is_empty() {
        return Err(TrackmotionError::track_data(format!(
            "track '{}' contains no points",
            style.label
        )));
    }

    let mut points: Vec<TrackPoint> = track
        .points
        .iter()
        .map(|p| {
            let mut p = p.clone();
            p.time = p.time.offset(style.time_offset_ms);
            p
        })
        .collect();

    if !points.windows(2).all(|w| w[0].time <= w[1].time) {
        return Err(TrackmotionError::track_data(format!(
            "track '{}' has decreasing timestamps",
            style.label
        )));
    }

    // Trims are measured from the track's own (offset) start and end.
    let first = points[0].time;
    let last = points[points.len() - 1].time;
    let cut_start = style.trim_start_ms.map(|ms| first.offset(ms));
    let cut_end = style.trim_end_ms.map(|ms| last.offset(-ms));
    points.retain(|p| {
        cut_start.is_none_or(|c| p.time >= c) && cut_end.is_none_or(|c| p.time <= c)
    });

    if points.is_empty() {
        return Err(TrackmotionError::track_data(format!(
            "track '{}' is empty after trimming",
            style.label
        )));
    }

    if let Some(interval) = style.forced_point_interval_ms {
        if interval <= 0 {
            return Err(TrackmotionError::track_data(format!(
                "track '{}' has non-positive forced_point_interval_ms",
                style.label
            )));
        }
        points = resample(points, interval);
    }

    Ok(PreparedTrack { style, points })
}

/// Insert linearly interpolated points so consecutive points are at most
/// `interval_ms` apart. Pairs with zero elapsed time are left as-is.
fn resample(points: Vec<TrackPoint>, interval_ms: i64) -> Vec<TrackPoint> {
    let mut out = Vec::with_capacity(points.len());
    for i in 0..points.len() {
        if i > 0 {
            let a = &points[i - 1];
            let b = &points[i];
            let gap = b.time.delta_ms(a.time);
            if gap > interval_ms {
                let mut t = a.time.0 + interval_ms;
                while t < b.time.0 {
                    let ratio = (t - a.time.0) as f64 / gap as f64;
                    let speed = match (a.speed_kmh, b.speed_kmh) {
                        (Some(sa), Some(sb)) => Some(sa + (sb - sa) * ratio),
                        _ => None,
                    };
                    out.push(TrackPoint {
                        point: GeoPoint::lerp(a.point, b.point, ratio),
                        time: MilliTime(t),
                        speed_kmh: speed,
                        comment: None,
                    });
                    t += interval_ms;
                }
            }
        }
        out.push(points[i].clone());
    }
    out
}

/// Windows where a track's position stays within `eps_deg` of an anchor
/// point for at least `min_window_ms`.
pub fn idle_windows(track: &PreparedTrack, eps_deg: f64, min_window_ms: i64) -> Vec<TimeWindow> {
    let pts = &track.points;
    let mut out = Vec::new();
    let mut i = 0;
    while i < pts.len() {
        let anchor = pts[i].point;
        let mut j = i;
        while j + 1 < pts.len() && within_eps(anchor, pts[j + 1].point, eps_deg) {
            j += 1;
        }
        if j > i {
            let w = TimeWindow {
                start: pts[i].time,
                end: pts[j].time,
            };
            if w.len_ms() >= min_window_ms {
                out.push(w);
            }
        }
        i = j.max(i) + 1;
    }
    out
}

fn within_eps(a: GeoPoint, b: GeoPoint, eps_deg: f64) -> bool {
    (a.lat - b.lat).abs() <= eps_deg && (a.lon - b.lon).abs() <= eps_deg
}

/// Merge overlapping or touching windows, returning them in ascending order.
fn union_windows(mut windows: Vec<TimeWindow>) -> Vec<TimeWindow> {
    windows.sort_by_key(|w| w.start);
    let mut out: Vec<TimeWindow> = Vec::with_capacity(windows.len());
    for w in windows {
        if let Some(last) = out.last_mut()
            && w.start <= last.end
        {
            last.end = last.end.max(w.end);
            continue;
        }
        out.push(w);
    }
    out
}

/// `span` minus `windows` (windows must be within the span and disjoint).
fn complement(span: TimeWindow, windows: &[TimeWindow]) -> Vec<TimeWindow> {
    let mut out = Vec::new();
    let mut cursor = span.start;
    for w in windows {
        if w.start > cursor {
            out.push(TimeWindow {
                start: cursor,
                end: w.start.min(span.end),
            });
        }
        cursor = cursor.max(w.end);
    }
    if cursor < span.end {
        out.push(TimeWindow {
            start: cursor,
            end: span.end,
        });
    }
    out.retain(|w| w.len_ms() > 0);
    out
}

/// The monotonic mapping from output frame index to wall-clock track time.
///
/// Derived once from the prepared tracks and the configuration; rendered
/// wall-clock time is covered by ascending `segments` with idle windows
/// removed when skip-idle is on.
#[derive(Clone, Debug)]
pub struct Timeline {
    segments: Vec<TimeWindow>,
    frame_count: u64,
    /// Real (track) milliseconds consumed per output frame.
    real_ms_per_frame: f64,
    pub speedup: f64,
    pub fps: f64,
}

impl Timeline {
    pub fn build(tracks: &[PreparedTrack], cfg: &RenderConfig) -> TrackmotionResult<Timeline> {
        if tracks.is_empty() {
            return Err(TrackmotionError::track_data(
                "no usable tracks for timeline",
            ));
        }

        let global_start = tracks.iter().map(|t| t.start()).min().unwrap_or(MilliTime(0));
        let global_end = tracks.iter().map(|t| t.end()).max().unwrap_or(MilliTime(0));
        let span = TimeWindow {
            start: global_start,
            end: global_end,
        };

        let segments = if cfg.skip_idle {
            let mut active = Vec::new();
            for track in tracks {
                let idle = union_windows(idle_windows(
                    track,
                    cfg.idle_epsilon_deg,
                    cfg.idle_min_window_ms as i64,
                ));
                let track_span = TimeWindow {
                    start: track.start(),
                    end: track.end(),
                };
                active.extend(complement(track_span, &idle));
            }
            let merged = union_windows(active);
            if merged.is_empty() {
                // Everything idle: fall back to a single instant at the start.
                vec![TimeWindow {
                    start: span.start,
                    end: span.start,
                }]
            } else {
                merged
            }
        } else {
            vec![span]
        };

        let real_ms: i64 = segments.iter().map(|s| s.len_ms()).sum();
        let speedup = match cfg.total_time_ms {
            Some(total) => real_ms as f64 / total as f64,
            None => cfg.speedup.unwrap_or(1.0),
        };
        if !(speedup.is_finite() && speedup > 0.0) {
            return Err(TrackmotionError::configuration(
                "derived speedup must be > 0 (is the track longer than an instant?)",
            ));
        }

        let video_ms = real_ms as f64 / speedup;
        let frame_count = ((video_ms * cfg.fps / 1000.0).ceil() as u64).max(1);
        let real_ms_per_frame = speedup * 1000.0 / cfg.fps;

        Ok(Timeline {
            segments,
            frame_count,
            real_ms_per_frame,
            speedup,
            fps: cfg.fps,
        })
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Wall-clock track time for a frame. Monotonic in the frame index and
    /// clamped to the end of the last segment.
    pub fn timestamp(&self, frame: FrameIndex) -> MilliTime {
        let mut remaining = frame.0 as f64 * self.real_ms_per_frame;
        for (i, seg) in self.segments.iter().enumerate() {
            let len = seg.len_ms() as f64;
            if remaining < len || i == self.segments.len() - 1 {
                let capped = remaining.min(len);
                return MilliTime(seg.start.0 + capped.round() as i64);
            }
            remaining -= len;
        }
        self.segments.last().map(|s| s.end).unwrap_or(MilliTime(0))
    }

    /// True when the step from `prev` to `next` spans more track time than a
    /// normal frame advance, i.e. the timeline jumped over a skipped window.
    pub fn is_discontinuity(&self, prev: MilliTime, next: MilliTime) -> bool {
        next.delta_ms(prev) as f64 > self.real_ms_per_frame * 1.5
    }

    pub fn segments(&self) -> &[TimeWindow] {
        &self.segments
    }
}
