use std::collections::HashMap;
use std::time::{Duration, Instant};

use tiny_skia::Pixmap;

use crate::foundation::core::Point;
use crate::foundation::error::{TrackmotionError, TrackmotionResult};
use crate::render::canvas::FrameRgba;
use crate::viewport::ViewTransform;

/// External slippy-map tile fetcher. Implementations do HTTP and their own
/// politeness (user agent, rate limits); failures are recoverable and only
/// drop the map layer for the affected tiles.
pub trait TileProvider {
    /// Fetch one tile as encoded raster bytes (PNG or JPEG).
    fn fetch(&mut self, url: &str) -> TrackmotionResult<Vec<u8>>;
}

/// A tile address in the slippy-map numbering scheme.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    /// Expand a URL template with `{zoom}`, `{x}`, `{y}` placeholders.
    pub fn url(&self, template: &str) -> String {
        template
            .replace("{zoom}", &self.zoom.to_string())
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
    }
}

/// Where to draw one tile on the canvas.
#[derive(Clone, Copy, Debug)]
pub struct TilePlacement {
    pub coord: TileCoord,
    /// Canvas pixel position of the tile's north-west corner.
    pub origin: Point,
    /// Tile draw scale; 1.0 means the 256px tile maps to 256 canvas pixels.
    pub scale: f64,
}

/// Tiles covering the transform's visible area, at the integer zoom nearest
/// to the fractional camera zoom.
pub fn visible_tiles(t: &ViewTransform) -> Vec<TilePlacement> {
    let zoom = t.zoom().round().clamp(0.0, 19.0);
    let z = zoom as u8;
    let n = 1u32 << z;
    let tile_span = 1.0 / f64::from(n);
    let scale = (t.zoom() - zoom).exp2();

    let rect = t.world_rect();
    let clamp_tile = |v: f64| -> u32 {
        (v.floor().max(0.0) as u32).min(n - 1)
    };
    let x0 = clamp_tile(rect.x0 / tile_span);
    let x1 = clamp_tile(rect.x1 / tile_span);
    let y0 = clamp_tile(rect.y0 / tile_span);
    let y1 = clamp_tile(rect.y1 / tile_span);

    let mut out = Vec::with_capacity(((x1 - x0 + 1) * (y1 - y0 + 1)) as usize);
    for y in y0..=y1 {
        for x in x0..=x1 {
            let origin =
                t.world_to_pixel(f64::from(x) * tile_span, f64::from(y) * tile_span);
            out.push(TilePlacement {
                coord: TileCoord { zoom: z, x, y },
                origin,
                scale,
            });
        }
    }
    out
}

/// FNV-1a 64-bit, for stable cache keys independent of the std hasher.
fn stable_hash64(s: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in s.bytes() {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

struct CacheEntry {
    expires_at: Instant,
    pixmap: Pixmap,
}

/// In-memory tile cache keyed by a content hash of the URL, each entry with
/// an explicit expiry timestamp.
pub struct TileCache {
    ttl: Duration,
    entries: HashMap<u64, CacheEntry>,
}

impl TileCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl: Duration::from_secs(ttl_secs),
            entries: HashMap::new(),
        }
    }

    /// Look up a tile, fetching and decoding through `provider` on a miss or
    /// an expired entry.
    pub fn get_or_fetch(
        &mut self,
        url: &str,
        provider: &mut (dyn TileProvider + '_),
    ) -> TrackmotionResult<&Pixmap> {
        let key = stable_hash64(url);
        let now = Instant::now();
        let stale = self
            .entries
            .get(&key)
            .is_none_or(|entry| entry.expires_at <= now);
        if stale {
            let bytes = provider.fetch(url)?;
            let pixmap = decode_tile(&bytes)
                .map_err(|e| TrackmotionError::tile_fetch(format!("decode {url}: {e}")))?;
            self.entries.insert(
                key,
                CacheEntry {
                    expires_at: now + self.ttl,
                    pixmap,
                },
            );
        }
        Ok(&self.entries[&key].pixmap)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn decode_tile(bytes: &[u8]) -> TrackmotionResult<Pixmap> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| TrackmotionError::tile_fetch(e.to_string()))?
        .to_rgba8();
    FrameRgba::from_rgba_image(&img).into_pixmap()
}
