use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::RenderConfig;
use crate::cursor::{CursorState, TrailOpts, cursor_at};
use crate::foundation::core::{FrameIndex, GeoBounds, GeoPoint, MilliTime};
use crate::foundation::error::{TrackmotionError, TrackmotionResult};
use crate::model::{Photo, Track, WayPoint};
use crate::render::canvas::FrameRgba;
use crate::render::compositor::Compositor;
use crate::render::tiles::TileProvider;
use crate::timeline::{PreparedTrack, Timeline, prepare_track};

/// Configuration provided to a [`FrameSink`] before the first frame.
#[derive(Debug, Clone)]
pub struct SinkConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
}

/// Sink contract for consuming rendered frames in timeline order.
///
/// Ordering contract: `push_frame` is called in strictly increasing
/// `FrameIndex` order. `push_frame` failures are fatal to the render.
pub trait FrameSink {
    /// Called once before any frames are pushed.
    fn begin(&mut self, cfg: SinkConfig) -> TrackmotionResult<()>;
    /// Push one frame in strictly increasing order.
    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> TrackmotionResult<()>;
    /// Called once after the last frame is pushed.
    fn end(&mut self) -> TrackmotionResult<()>;
}

/// Advisory progress reporting; never affects control flow.
pub trait ProgressSink {
    fn set_progress(&mut self, percent: u8, message: &str);
}

/// Progress sink that reports through the log.
#[derive(Debug, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn set_progress(&mut self, percent: u8, message: &str) {
        tracing::info!(percent, message, "render progress");
    }
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    frames: Vec<(FrameIndex, FrameRgba)>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the sink configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<SinkConfig> {
        self.cfg.clone()
    }

    /// Borrow the captured frames.
    pub fn frames(&self) -> &[(FrameIndex, FrameRgba)] {
        &self.frames
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> TrackmotionResult<()> {
        self.cfg = Some(cfg);
        self.frames.clear();
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> TrackmotionResult<()> {
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> TrackmotionResult<()> {
        Ok(())
    }
}

/// Everything one render needs: settings plus the parsed inputs handed over
/// by the track-data collaborator.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct RenderJob {
    pub config: RenderConfig,
    pub tracks: Vec<Track>,
    #[serde(default)]
    pub waypoints: Vec<WayPoint>,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

fn ms_to_frames(ms: u64, fps: f64) -> u64 {
    (ms as f64 * fps / 1000.0).round() as u64
}

struct PhotoPool {
    /// Pending photos sorted by time; drained front-to-back, each at most once.
    pending: Vec<Photo>,
}

impl PhotoPool {
    fn new(mut photos: Vec<Photo>) -> Self {
        photos.sort_by_key(|p| p.time);
        Self { pending: photos }
    }

    /// Remove and return every photo due at or before `t`.
    fn drain_due(&mut self, t: MilliTime) -> Vec<Photo> {
        let due = self.pending.partition_point(|p| p.time <= t);
        self.pending.drain(..due).collect()
    }

    fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Pushes frames through a sink while keeping the sink's strictly increasing
/// index contract, independent of how many source frames are repeated or
/// interleaved.
struct Emitter<'a> {
    sink: &'a mut dyn FrameSink,
    next: u64,
}

impl<'a> Emitter<'a> {
    fn push(&mut self, frame: &FrameRgba) -> TrackmotionResult<()> {
        let idx = FrameIndex(self.next);
        self.sink
            .push_frame(idx, frame)
            .map_err(|e| TrackmotionError::encoding(idx.0, e.to_string()))?;
        self.next += 1;
        Ok(())
    }
}

/// Render the whole animation into `sink`.
///
/// Cancellation is checked at frame boundaries; a cancelled render finalizes
/// the sink, leaving a truncated but valid output.
#[tracing::instrument(skip_all, fields(tracks = job.tracks.len()))]
pub fn render_animation(
    job: &RenderJob,
    mut tile_provider: Option<&mut dyn TileProvider>,
    sink: &mut dyn FrameSink,
    progress: &mut dyn ProgressSink,
    cancel: &AtomicBool,
) -> TrackmotionResult<()> {
    let cfg = &job.config;
    cfg.validate()?;

    let prepared = prepare_tracks(&job.tracks)?;
    let timeline = Timeline::build(&prepared, cfg)?;
    let bounds = overall_bounds(&prepared);
    let mut viewport = crate::viewport::ViewportEngine::new(cfg, bounds)?;
    let mut compositor = Compositor::new(cfg, &prepared)?;
    let mut photos = PhotoPool::new(job.photos.clone());

    let trail_opts = TrailOpts {
        tail_duration_ms: cfg.tail_duration_ms as i64,
        fadeout: cfg.tail_fadeout,
    };
    let keep_first = ms_to_frames(cfg.keep_first_frame_ms, cfg.fps);
    let keep_last = ms_to_frames(cfg.keep_last_frame_ms, cfg.fps);
    let flashback_total = cfg
        .flashback_duration_ms
        .map(|ms| ms_to_frames(ms, cfg.fps).max(1));
    let photo_anim = ms_to_frames(cfg.photo_animation_ms, cfg.fps);
    let photo_hold = ms_to_frames(cfg.photo_hold_ms, cfg.fps).max(1);

    sink.begin(SinkConfig {
        width: cfg.width,
        height: cfg.height,
        fps: cfg.fps,
    })?;
    let mut emitter = Emitter { sink, next: 0 };

    let mut flashback_left = 0u64;
    let mut last_t: Option<MilliTime> = None;
    let mut last_frame: Option<FrameRgba> = None;
    let mut last_percent = 0u8;
    let mut cancelled = false;

    for frame_idx in 0..timeline.frame_count() {
        if cancel.load(Ordering::Relaxed) {
            tracing::warn!(frame_idx, "render cancelled");
            cancelled = true;
            break;
        }

        let idx = FrameIndex(frame_idx);
        let t = timeline.timestamp(idx);

        let cursors: Vec<CursorState> = prepared
            .iter()
            .map(|track| cursor_at(track, t, trail_opts))
            .collect();
        let positions: Vec<GeoPoint> = cursors.iter().filter_map(|c| c.position).collect();
        let transform = viewport.frame_transform(&positions);

        if let Some(total) = flashback_total {
            let jumped = match last_t {
                None => true,
                Some(prev) => timeline.is_discontinuity(prev, t),
            };
            if jumped {
                flashback_left = total;
            }
        }
        last_t = Some(t);
        let flashback_alpha = match flashback_total {
            Some(total) if flashback_left > 0 => flashback_left as f64 / total as f64,
            _ => 0.0,
        };
        flashback_left = flashback_left.saturating_sub(1);

        let frame = compositor.compose(
            t,
            &cursors,
            &transform,
            &job.waypoints,
            flashback_alpha,
            tile_provider.as_deref_mut(),
        )?;

        emitter.push(&frame)?;
        if frame_idx == 0 {
            for _ in 0..keep_first {
                emitter.push(&frame)?;
            }
        }

        for photo in photos.drain_due(t) {
            emit_photo(&mut emitter, &compositor, &frame, &photo, photo_anim, photo_hold)?;
        }

        last_frame = Some(frame);

        let percent = (((frame_idx + 1) * 100) / timeline.frame_count()) as u8;
        if percent != last_percent {
            progress.set_progress(percent, "rendering frames");
            last_percent = percent;
        }
    }

    if !cancelled
        && let Some(frame) = &last_frame
    {
        for _ in 0..keep_last {
            emitter.push(frame)?;
        }
    }

    emitter.sink.end()?;
    if !photos.is_empty() {
        tracing::warn!(
            remaining = photos.pending.len(),
            "photos after the animation end were never shown"
        );
    }
    Ok(())
}

fn prepare_tracks(tracks: &[Track]) -> TrackmotionResult<Vec<PreparedTrack>> {
    let mut prepared = Vec::with_capacity(tracks.len());
    for track in tracks {
        match prepare_track(track) {
            Ok(p) => prepared.push(p),
            Err(e) => {
                tracing::warn!(label = %track.style.label, error = %e, "track skipped");
            }
        }
    }
    if prepared.is_empty() {
        return Err(TrackmotionError::track_data(
            "no usable tracks after preparation",
        ));
    }
    Ok(prepared)
}

fn overall_bounds(tracks: &[PreparedTrack]) -> GeoBounds {
    let mut bounds: Option<GeoBounds> = None;
    for track in tracks {
        for p in &track.points {
            match &mut bounds {
                None => bounds = Some(GeoBounds::around(p.point)),
                Some(b) => b.include(p.point),
            }
        }
    }
    // prepare_tracks guarantees at least one non-empty track.
    bounds.unwrap_or(GeoBounds::around(GeoPoint::new(0.0, 0.0)))
}

/// Intro, hold, outro sub-animation, all composed from the same base frame.
fn emit_photo(
    emitter: &mut Emitter<'_>,
    compositor: &Compositor,
    base: &FrameRgba,
    photo: &Photo,
    anim_frames: u64,
    hold_frames: u64,
) -> TrackmotionResult<()> {
    let pixmap = match Compositor::load_photo(&photo.source) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(photo = %photo.source.display(), error = %e, "photo skipped");
            return Ok(());
        }
    };

    for i in 0..anim_frames {
        let alpha = (i + 1) as f64 / anim_frames as f64;
        let frame = compositor.photo_overlay(base, &pixmap, photo.rotation_deg, alpha)?;
        emitter.push(&frame)?;
    }
    let held = compositor.photo_overlay(base, &pixmap, photo.rotation_deg, 1.0)?;
    for _ in 0..hold_frames {
        emitter.push(&held)?;
    }
    for i in (0..anim_frames).rev() {
        let alpha = (i + 1) as f64 / anim_frames as f64;
        let frame = compositor.photo_overlay(base, &pixmap, photo.rotation_deg, alpha)?;
        emitter.push(&frame)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::core::Rgba8;
    use crate::model::{TrackPoint, TrackStyle};

    fn job(cfg: RenderConfig) -> RenderJob {
        RenderJob {
            config: cfg,
            tracks: vec![Track::new(
                TrackStyle {
                    label: "a".to_string(),
                    ..TrackStyle::default()
                },
                vec![
                    TrackPoint::new(47.0, 8.0, 0),
                    TrackPoint::new(47.01, 8.01, 10_000),
                ],
            )],
            waypoints: Vec::new(),
            photos: Vec::new(),
        }
    }

    fn base_config() -> RenderConfig {
        RenderConfig {
            width: 32,
            height: 32,
            fps: 2.0,
            speedup: Some(1.0),
            ..RenderConfig::default()
        }
    }

    struct NullProgress;
    impl ProgressSink for NullProgress {
        fn set_progress(&mut self, _percent: u8, _message: &str) {}
    }

    fn run(job: &RenderJob, sink: &mut InMemorySink) -> TrackmotionResult<()> {
        render_animation(job, None, sink, &mut NullProgress, &AtomicBool::new(false))
    }

    #[test]
    fn emits_expected_frame_count_with_increasing_indices() {
        // 10s of track at 1x and 2 fps is 20 frames.
        let mut sink = InMemorySink::new();
        run(&job(base_config()), &mut sink).unwrap();
        assert_eq!(sink.frames().len(), 20);
        for pair in sink.frames().windows(2) {
            assert!(pair[0].0 < pair[1].0);
        }
        assert_eq!(sink.config().unwrap().fps, 2.0);
    }

    #[test]
    fn keep_first_and_last_repeat_frames() {
        let cfg = RenderConfig {
            keep_first_frame_ms: 1_000,
            keep_last_frame_ms: 2_000,
            ..base_config()
        };
        let mut sink = InMemorySink::new();
        run(&job(cfg), &mut sink).unwrap();
        // 20 animation frames + 2 extra first + 4 extra last.
        assert_eq!(sink.frames().len(), 26);
        assert_eq!(sink.frames()[0].1, sink.frames()[1].1);
        assert_eq!(sink.frames()[0].1, sink.frames()[2].1);
        let n = sink.frames().len();
        assert_eq!(sink.frames()[n - 1].1, sink.frames()[n - 5].1);
    }

    #[test]
    fn pre_set_cancellation_truncates_cleanly() {
        let mut sink = InMemorySink::new();
        let cancelled = AtomicBool::new(true);
        render_animation(
            &job(base_config()),
            None,
            &mut sink,
            &mut NullProgress,
            &cancelled,
        )
        .unwrap();
        assert!(sink.frames().is_empty());
        // begin/end still ran, so the output container is valid.
        assert!(sink.config().is_some());
    }

    #[test]
    fn invalid_config_rejected_before_any_frame() {
        let mut j = job(base_config());
        j.config.width = 31; // odd
        let mut sink = InMemorySink::new();
        let err = run(&j, &mut sink).unwrap_err();
        assert!(matches!(err, TrackmotionError::Configuration(_)));
        assert!(sink.config().is_none());
    }

    #[test]
    fn all_tracks_unusable_is_fatal() {
        let mut j = job(base_config());
        j.tracks[0].points.clear();
        let mut sink = InMemorySink::new();
        assert!(matches!(
            run(&j, &mut sink),
            Err(TrackmotionError::TrackData(_))
        ));
    }

    #[test]
    fn photo_is_emitted_at_most_once() {
        let dir = std::env::temp_dir().join("trackmotion-photo-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("p.png");
        image::RgbaImage::from_pixel(8, 8, image::Rgba([9, 9, 9, 255]))
            .save(&path)
            .unwrap();

        let cfg = RenderConfig {
            photo_animation_ms: 1_000, // 2 frames in and 2 out at 2 fps
            photo_hold_ms: 1_500,      // 3 frames
            ..base_config()
        };
        let mut j = job(cfg);
        j.photos.push(Photo {
            time: MilliTime(0),
            source: path,
            rotation_deg: 0.0,
        });

        let mut sink = InMemorySink::new();
        run(&j, &mut sink).unwrap();
        // Every later frame also satisfies time >= photo.time, so any count
        // beyond one sub-animation means the pool was drained twice.
        assert_eq!(sink.frames().len(), 20 + 2 + 3 + 2);
    }

    #[test]
    fn missing_photo_file_degrades_gracefully() {
        let mut j = job(base_config());
        j.photos.push(Photo {
            time: MilliTime(0),
            source: "/nonexistent/photo.jpg".into(),
            rotation_deg: 0.0,
        });
        let mut sink = InMemorySink::new();
        run(&j, &mut sink).unwrap();
        assert_eq!(sink.frames().len(), 20);
    }

    #[test]
    fn flashback_covers_first_frame() {
        let cfg = RenderConfig {
            background_color: Rgba8::rgb(255, 255, 255),
            flashback_color: Rgba8::rgb(0, 0, 0),
            flashback_duration_ms: Some(1_000),
            ..base_config()
        };
        let mut sink = InMemorySink::new();
        run(&job(cfg), &mut sink).unwrap();
        let first = &sink.frames()[0].1;
        assert_eq!(&first.data()[..4], &[0, 0, 0, 255]);
        // Flashback has faded out well before the end.
        let last = &sink.frames().last().unwrap().1;
        assert_eq!(&last.data()[..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn render_job_json_roundtrip() {
        let j = job(base_config());
        let s = serde_json::to_string(&j).unwrap();
        let de: RenderJob = serde_json::from_str(&s).unwrap();
        assert_eq!(de.tracks.len(), 1);
        assert_eq!(de.config.width, 32);
    }
}
