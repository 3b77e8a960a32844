pub type TrackmotionResult<T> = Result<T, TrackmotionError>;

#[derive(thiserror::Error, Debug)]
pub enum TrackmotionError {
    /// Invalid or contradictory settings. Surfaced before rendering starts;
    /// rendering never begins.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A track became unusable (for example empty after trimming). Per-track
    /// this is recovered by skipping the track; if all tracks fail it
    /// escalates to a fatal error.
    #[error("track data error: {0}")]
    TrackData(String),

    /// An optional asset (icon, logo, background image, photo) could not be
    /// loaded. Recovered locally by skipping the layer.
    #[error("asset error: {0}")]
    Asset(String),

    /// A map tile could not be produced. Recovered locally by omitting the
    /// tile for that frame.
    #[error("tile fetch error: {0}")]
    TileFetch(String),

    /// The frame sink failed. Fatal: aborts the whole render.
    #[error("encoding error at frame {frame}: {message}")]
    Encoding { frame: u64, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrackmotionError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn track_data(msg: impl Into<String>) -> Self {
        Self::TrackData(msg.into())
    }

    pub fn asset(msg: impl Into<String>) -> Self {
        Self::Asset(msg.into())
    }

    pub fn tile_fetch(msg: impl Into<String>) -> Self {
        Self::TileFetch(msg.into())
    }

    pub fn encoding(frame: u64, msg: impl Into<String>) -> Self {
        Self::Encoding {
            frame,
            message: msg.into(),
        }
    }

    /// Recoverable errors are compensated locally (layer or track skipped);
    /// everything else unwinds the render synchronously.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Asset(_) | Self::TileFetch(_))
    }
}
