#![forbid(unsafe_code)]

pub mod config;
pub mod cursor;
pub mod encode;
pub mod foundation;
pub mod model;
pub mod render;
pub mod sequencer;
pub mod timeline;
pub mod viewport;

pub use config::{Anchor, RenderConfig, SpeedUnit};
pub use cursor::{CursorState, TrailOpts, cursor_at};
pub use encode::{FfmpegSink, PngSequenceSink};
pub use foundation::core::{FrameIndex, GeoBounds, GeoPoint, MilliTime, Rgba8};
pub use foundation::error::{TrackmotionError, TrackmotionResult};
pub use model::{Photo, Track, TrackPoint, TrackStyle, WayPoint};
pub use render::canvas::FrameRgba;
pub use render::compositor::Compositor;
pub use render::tiles::{TileCache, TileProvider};
pub use sequencer::{
    FrameSink, InMemorySink, LogProgress, ProgressSink, RenderJob, SinkConfig, render_animation,
};
pub use timeline::{PreparedTrack, Timeline, prepare_track};
pub use viewport::{ViewTransform, ViewportEngine};
