use std::path::Path;

use tiny_skia::{
    FillRule, LineCap, LineJoin, Paint, PathBuilder, Pixmap, PixmapPaint, Stroke, Transform,
};

use crate::config::{RenderConfig, anchor_origin};
use crate::cursor::CursorState;
use crate::foundation::core::{MilliTime, Rgba8};
use crate::foundation::error::{TrackmotionError, TrackmotionResult};
use crate::model::WayPoint;
use crate::render::canvas::FrameRgba;
use crate::render::text::{TemplateValues, TextRenderer, expand_template};
use crate::render::tiles::{TileCache, TileProvider, visible_tiles};
use crate::timeline::PreparedTrack;
use crate::viewport::ViewTransform;

/// Per-track drawing parameters plus the loaded icon, if any.
struct TrackLayer {
    color: Rgba8,
    line_width: f64,
    pre_draw_color: Rgba8,
    pre_draw_width: f64,
    icon: Option<Pixmap>,
    icon_scale: f64,
    mirror_icon: bool,
}

/// Draws all layers of one frame onto a single canvas, in fixed z-order.
///
/// Missing optional assets (icons, logo, background image, font) degrade to
/// a skipped layer with a logged warning; only canvas allocation and frame
/// conversion errors are fatal.
pub struct Compositor {
    cfg: RenderConfig,
    layers: Vec<TrackLayer>,
    background_image: Option<Pixmap>,
    logo: Option<Pixmap>,
    text: Option<TextRenderer>,
    tile_cache: TileCache,
}

impl Compositor {
    pub fn new(cfg: &RenderConfig, tracks: &[PreparedTrack]) -> TrackmotionResult<Self> {
        let layers = tracks
            .iter()
            .map(|t| TrackLayer {
                color: t.style.color,
                line_width: t.style.line_width,
                pre_draw_color: t.style.pre_draw_color,
                pre_draw_width: t.style.pre_draw_width,
                icon: t.style.icon.as_deref().and_then(load_image_layer),
                icon_scale: t.style.icon_scale,
                mirror_icon: t.style.mirror_icon,
            })
            .collect();

        let text = match &cfg.font {
            None => None,
            Some(path) => match TextRenderer::load(path, cfg.font_size) {
                Ok(t) => Some(t),
                Err(e) => {
                    tracing::warn!(error = %e, "text layers disabled");
                    None
                }
            },
        };

        Ok(Self {
            cfg: cfg.clone(),
            layers,
            background_image: cfg.background_image.as_deref().and_then(load_image_layer),
            logo: cfg.logo.as_deref().and_then(load_image_layer),
            text,
            tile_cache: TileCache::new(cfg.tile_cache_ttl_secs),
        })
    }

    /// Compose one frame. `cursors` is parallel to the track list the
    /// compositor was built with.
    pub fn compose(
        &mut self,
        time: MilliTime,
        cursors: &[CursorState],
        transform: &ViewTransform,
        waypoints: &[WayPoint],
        flashback_alpha: f64,
        tile_provider: Option<&mut (dyn TileProvider + '_)>,
    ) -> TrackmotionResult<FrameRgba> {
        let mut pixmap = new_canvas(self.cfg.width, self.cfg.height)?;

        self.draw_background(&mut pixmap);
        if let Some(provider) = tile_provider
            && let Some(template) = self.cfg.map_tile_url.clone()
        {
            self.draw_tiles(&mut pixmap, transform, &template, provider);
        }

        for (layer, cursor) in self.layers.iter().zip(cursors) {
            draw_polyline(
                &mut pixmap,
                transform,
                &cursor.pre_draw,
                layer.pre_draw_color,
                1.0,
                layer.pre_draw_width,
            );
        }
        for (layer, cursor) in self.layers.iter().zip(cursors) {
            draw_trail(&mut pixmap, transform, cursor, layer);
        }
        for (layer, cursor) in self.layers.iter().zip(cursors) {
            self.draw_marker(&mut pixmap, transform, cursor, layer);
        }
        self.draw_waypoints(&mut pixmap, transform, waypoints, time);
        self.draw_logo(&mut pixmap);
        self.draw_texts(&mut pixmap, cursors, time);

        let mut frame = FrameRgba::from_pixmap(pixmap);
        if flashback_alpha > 0.0 {
            frame.overlay_color(self.cfg.flashback_color, flashback_alpha);
        }
        Ok(frame)
    }

    /// Compose a photo over a defensive copy of `base`, leaving the base
    /// untouched for the next sub-animation frame.
    pub fn photo_overlay(
        &self,
        base: &FrameRgba,
        photo: &Pixmap,
        rotation_deg: f64,
        alpha: f64,
    ) -> TrackmotionResult<FrameRgba> {
        let mut pixmap = base.clone().into_pixmap()?;
        let canvas_w = f64::from(self.cfg.width);
        let canvas_h = f64::from(self.cfg.height);
        let margin = f64::from(self.cfg.margin);

        let avail_w = (canvas_w - 2.0 * margin).max(1.0);
        let avail_h = (canvas_h - 2.0 * margin).max(1.0);
        let scale = (avail_w / f64::from(photo.width()))
            .min(avail_h / f64::from(photo.height()))
            .min(1.0);
        let draw_w = f64::from(photo.width()) * scale;
        let draw_h = f64::from(photo.height()) * scale;
        let x = (canvas_w - draw_w) / 2.0;
        let y = (canvas_h - draw_h) / 2.0;

        let ts = Transform::from_row(scale as f32, 0.0, 0.0, scale as f32, x as f32, y as f32)
            .post_concat(Transform::from_rotate_at(
                rotation_deg as f32,
                (canvas_w / 2.0) as f32,
                (canvas_h / 2.0) as f32,
            ));
        pixmap.draw_pixmap(
            0,
            0,
            photo.as_ref(),
            &PixmapPaint {
                opacity: alpha.clamp(0.0, 1.0) as f32,
                ..PixmapPaint::default()
            },
            ts,
            None,
        );
        Ok(FrameRgba::from_pixmap(pixmap))
    }

    /// Decode a photo file into a drawable pixmap.
    pub fn load_photo(path: &Path) -> TrackmotionResult<Pixmap> {
        let img = image::open(path)
            .map_err(|e| TrackmotionError::asset(format!("photo {}: {e}", path.display())))?
            .to_rgba8();
        FrameRgba::from_rgba_image(&img).into_pixmap()
    }

    fn draw_background(&self, pixmap: &mut Pixmap) {
        let c = self.cfg.background_color;
        pixmap.fill(tiny_skia::Color::from_rgba8(c.r, c.g, c.b, c.a));

        if let Some(bg) = &self.background_image {
            let sx = f64::from(self.cfg.width) / f64::from(bg.width());
            let sy = f64::from(self.cfg.height) / f64::from(bg.height());
            pixmap.draw_pixmap(
                0,
                0,
                bg.as_ref(),
                &PixmapPaint::default(),
                Transform::from_row(sx as f32, 0.0, 0.0, sy as f32, 0.0, 0.0),
                None,
            );
        }
    }

    fn draw_tiles(
        &mut self,
        pixmap: &mut Pixmap,
        transform: &ViewTransform,
        template: &str,
        provider: &mut (dyn TileProvider + '_),
    ) {
        let opacity = self.cfg.map_visibility as f32;
        if opacity <= 0.0 {
            return;
        }
        for placement in visible_tiles(transform) {
            let url = placement.coord.url(template);
            let tile = match self.tile_cache.get_or_fetch(&url, provider) {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "tile skipped");
                    continue;
                }
            };
            let s = placement.scale as f32;
            pixmap.draw_pixmap(
                0,
                0,
                tile.as_ref(),
                &PixmapPaint {
                    opacity,
                    ..PixmapPaint::default()
                },
                Transform::from_row(
                    s,
                    0.0,
                    0.0,
                    s,
                    placement.origin.x as f32,
                    placement.origin.y as f32,
                ),
                None,
            );
        }
    }

    fn draw_marker(
        &self,
        pixmap: &mut Pixmap,
        transform: &ViewTransform,
        cursor: &CursorState,
        layer: &TrackLayer,
    ) {
        let Some(position) = cursor.position else {
            return;
        };
        let px = transform.to_pixel(position);

        if let Some(icon) = &layer.icon {
            let w = f64::from(icon.width()) * layer.icon_scale;
            let h = f64::from(icon.height()) * layer.icon_scale;
            let sx = if layer.mirror_icon {
                -layer.icon_scale
            } else {
                layer.icon_scale
            };
            let tx = if layer.mirror_icon {
                px.x + w / 2.0
            } else {
                px.x - w / 2.0
            };
            let ts = Transform::from_row(
                sx as f32,
                0.0,
                0.0,
                layer.icon_scale as f32,
                tx as f32,
                (px.y - h / 2.0) as f32,
            )
            .post_concat(Transform::from_rotate_at(
                cursor.heading_deg as f32,
                px.x as f32,
                px.y as f32,
            ));
            pixmap.draw_pixmap(0, 0, icon.as_ref(), &PixmapPaint::default(), ts, None);
            return;
        }

        if let Some(circle) =
            PathBuilder::from_circle(px.x as f32, px.y as f32, self.cfg.marker_size as f32)
        {
            let mut paint = solid_paint(layer.color, 1.0);
            paint.anti_alias = true;
            pixmap.fill_path(&circle, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }

    fn draw_waypoints(
        &self,
        pixmap: &mut Pixmap,
        transform: &ViewTransform,
        waypoints: &[WayPoint],
        time: MilliTime,
    ) {
        let radius = (self.cfg.marker_size * 0.8) as f32;
        for wp in waypoints.iter().filter(|wp| wp.time <= time) {
            let px = transform.to_pixel(wp.point);
            if let Some(circle) = PathBuilder::from_circle(px.x as f32, px.y as f32, radius) {
                let mut paint = solid_paint(self.cfg.text_color, 1.0);
                paint.anti_alias = true;
                pixmap.fill_path(&circle, &paint, FillRule::Winding, Transform::identity(), None);
            }
            if let Some(text) = &self.text {
                text.draw(
                    pixmap.data_mut(),
                    self.cfg.width,
                    self.cfg.height,
                    &wp.name,
                    (px.x + f64::from(radius) + 2.0) as i32,
                    (px.y - f64::from(radius)) as i32,
                    self.cfg.text_color,
                );
            }
        }
    }

    fn draw_logo(&self, pixmap: &mut Pixmap) {
        let Some(logo) = &self.logo else {
            return;
        };
        let (x, y) = anchor_origin(
            self.cfg.logo_anchor,
            self.cfg.width,
            self.cfg.height,
            logo.width(),
            logo.height(),
            self.cfg.margin,
        );
        pixmap.draw_pixmap(
            x,
            y,
            logo.as_ref(),
            &PixmapPaint::default(),
            Transform::identity(),
            None,
        );
    }

    fn draw_texts(&self, pixmap: &mut Pixmap, cursors: &[CursorState], time: MilliTime) {
        let Some(text) = &self.text else {
            return;
        };

        let mut blocks: Vec<(String, crate::config::Anchor)> = Vec::new();
        if let Some(attr) = self.cfg.effective_attribution() {
            blocks.push((attr, self.cfg.attribution_anchor));
        }
        if let Some(template) = &self.cfg.information {
            let lead = cursors.iter().find(|c| c.position.is_some());
            let values = TemplateValues {
                speed_kmh: lead.and_then(|c| c.speed_kmh),
                position: lead.and_then(|c| c.position),
                time,
                speed_unit: self.cfg.speed_unit,
            };
            blocks.push((expand_template(template, &values), self.cfg.information_anchor));
        }
        if let Some(comment) = cursors.iter().find_map(|c| c.comment.clone()) {
            blocks.push((comment, self.cfg.comment_anchor));
        }

        for (content, anchor) in blocks {
            if content.is_empty() {
                continue;
            }
            let (w, h) = text.measure(&content);
            let (x, y) = anchor_origin(
                anchor,
                self.cfg.width,
                self.cfg.height,
                w,
                h,
                self.cfg.margin,
            );
            text.draw(
                pixmap.data_mut(),
                self.cfg.width,
                self.cfg.height,
                &content,
                x,
                y,
                self.cfg.text_color,
            );
        }
    }
}

fn new_canvas(width: u32, height: u32) -> TrackmotionResult<Pixmap> {
    Pixmap::new(width, height)
        .ok_or_else(|| TrackmotionError::configuration("canvas dimensions must be > 0"))
}

fn load_image_layer(path: &Path) -> Option<Pixmap> {
    let result = image::open(path)
        .map_err(|e| TrackmotionError::asset(format!("{}: {e}", path.display())))
        .map(|img| img.to_rgba8())
        .and_then(|img| FrameRgba::from_rgba_image(&img).into_pixmap());
    match result {
        Ok(pixmap) => Some(pixmap),
        Err(e) => {
            tracing::warn!(error = %e, "image layer skipped");
            None
        }
    }
}

fn solid_paint(color: Rgba8, alpha: f64) -> Paint<'static> {
    let a = (f64::from(color.a) * alpha.clamp(0.0, 1.0)).round() as u8;
    let mut paint = Paint::default();
    paint.set_color_rgba8(color.r, color.g, color.b, a);
    paint
}

fn line_stroke(width: f64) -> Stroke {
    Stroke {
        width: width as f32,
        line_cap: LineCap::Round,
        line_join: LineJoin::Round,
        ..Stroke::default()
    }
}

fn draw_polyline(
    pixmap: &mut Pixmap,
    transform: &ViewTransform,
    points: &[crate::foundation::core::GeoPoint],
    color: Rgba8,
    alpha: f64,
    width: f64,
) {
    if points.len() < 2 {
        return;
    }
    let mut pb = PathBuilder::new();
    let first = transform.to_pixel(points[0]);
    pb.move_to(first.x as f32, first.y as f32);
    for p in &points[1..] {
        let px = transform.to_pixel(*p);
        pb.line_to(px.x as f32, px.y as f32);
    }
    let Some(path) = pb.finish() else {
        return;
    };
    let mut paint = solid_paint(color, alpha);
    paint.anti_alias = true;
    pixmap.stroke_path(&path, &paint, &line_stroke(width), Transform::identity(), None);
}

/// Trail segments stroked individually so each can carry its own fade alpha.
fn draw_trail(
    pixmap: &mut Pixmap,
    transform: &ViewTransform,
    cursor: &CursorState,
    layer: &TrackLayer,
) {
    let trail = &cursor.trail;
    for pair in trail.windows(2) {
        let a = transform.to_pixel(pair[0].point);
        let b = transform.to_pixel(pair[1].point);
        let mut pb = PathBuilder::new();
        pb.move_to(a.x as f32, a.y as f32);
        pb.line_to(b.x as f32, b.y as f32);
        let Some(path) = pb.finish() else {
            continue;
        };
        let mut paint = solid_paint(layer.color, pair[1].alpha);
        paint.anti_alias = true;
        pixmap.stroke_path(
            &path,
            &paint,
            &line_stroke(layer.line_width),
            Transform::identity(),
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::{TrailOpts, cursor_at};
    use crate::foundation::core::{GeoBounds, GeoPoint};
    use crate::model::{Track, TrackPoint, TrackStyle};
    use crate::timeline::prepare_track;
    use crate::viewport::ViewportEngine;

    fn small_config() -> RenderConfig {
        RenderConfig {
            width: 64,
            height: 64,
            margin: 2,
            ..RenderConfig::default()
        }
    }

    fn one_track() -> PreparedTrack {
        prepare_track(&Track::new(
            TrackStyle {
                label: "a".to_string(),
                color: Rgba8::rgb(255, 0, 0),
                ..TrackStyle::default()
            },
            vec![
                TrackPoint::new(47.0, 8.0, 0),
                TrackPoint::new(47.01, 8.01, 10_000),
            ],
        ))
        .unwrap()
    }

    fn transform_for(cfg: &RenderConfig) -> ViewTransform {
        let bounds = GeoBounds::new(47.0, 47.01, 8.0, 8.01).unwrap();
        ViewportEngine::new(cfg, bounds)
            .unwrap()
            .frame_transform(&[])
    }

    fn pixel(frame: &FrameRgba, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * frame.width() + x) * 4) as usize;
        frame.data()[i..i + 4].try_into().unwrap()
    }

    #[test]
    fn background_fill_covers_canvas() {
        let cfg = RenderConfig {
            background_color: Rgba8::rgb(0, 0, 255),
            ..small_config()
        };
        let track = one_track();
        let mut comp = Compositor::new(&cfg, std::slice::from_ref(&track)).unwrap();
        let t = transform_for(&cfg);
        let frame = comp
            .compose(MilliTime(0), &[CursorState::default()], &t, &[], 0.0, None)
            .unwrap();
        assert_eq!(pixel(&frame, 0, 0), [0, 0, 255, 255]);
        assert_eq!(pixel(&frame, 63, 63), [0, 0, 255, 255]);
    }

    #[test]
    fn marker_changes_pixels_at_projected_position() {
        let cfg = RenderConfig {
            background_color: Rgba8::rgb(255, 255, 255),
            marker_size: 6.0,
            ..small_config()
        };
        let track = one_track();
        let mut comp = Compositor::new(&cfg, std::slice::from_ref(&track)).unwrap();
        let t = transform_for(&cfg);
        let cursor = cursor_at(
            &track,
            MilliTime(5_000),
            TrailOpts {
                tail_duration_ms: 120_000,
                fadeout: true,
            },
        );
        let px = t.to_pixel(cursor.position.unwrap());
        let frame = comp
            .compose(MilliTime(5_000), &[cursor], &t, &[], 0.0, None)
            .unwrap();
        assert_eq!(
            pixel(&frame, px.x as u32, px.y as u32),
            [255, 0, 0, 255],
            "marker center should be the track color"
        );
    }

    #[test]
    fn flashback_at_full_alpha_covers_everything() {
        let cfg = RenderConfig {
            flashback_color: Rgba8::rgb(1, 2, 3),
            ..small_config()
        };
        let track = one_track();
        let mut comp = Compositor::new(&cfg, std::slice::from_ref(&track)).unwrap();
        let t = transform_for(&cfg);
        let frame = comp
            .compose(MilliTime(0), &[CursorState::default()], &t, &[], 1.0, None)
            .unwrap();
        assert_eq!(pixel(&frame, 32, 32), [1, 2, 3, 255]);
    }

    #[test]
    fn missing_icon_degrades_to_plain_marker() {
        let cfg = small_config();
        let raw = Track::new(
            TrackStyle {
                label: "a".to_string(),
                icon: Some("/nonexistent/icon.png".into()),
                ..TrackStyle::default()
            },
            vec![
                TrackPoint::new(47.0, 8.0, 0),
                TrackPoint::new(47.01, 8.01, 10_000),
            ],
        );
        let track = prepare_track(&raw).unwrap();
        let comp = Compositor::new(&cfg, std::slice::from_ref(&track)).unwrap();
        assert!(comp.layers[0].icon.is_none());
    }

    #[test]
    fn photo_overlay_leaves_base_untouched() {
        let cfg = small_config();
        let track = one_track();
        let comp = Compositor::new(&cfg, std::slice::from_ref(&track)).unwrap();
        let mut base = FrameRgba::new(64, 64).unwrap();
        base.fill(Rgba8::rgb(10, 20, 30));
        let before = base.clone();

        let photo = Pixmap::new(16, 16).unwrap();
        let overlaid = comp.photo_overlay(&base, &photo, 0.0, 1.0).unwrap();
        assert_eq!(base, before);
        assert_eq!(overlaid.width(), 64);
    }

    #[test]
    fn waypoints_only_appear_once_due() {
        let cfg = RenderConfig {
            background_color: Rgba8::rgb(255, 255, 255),
            text_color: Rgba8::rgb(0, 0, 0),
            ..small_config()
        };
        let track = one_track();
        let mut comp = Compositor::new(&cfg, std::slice::from_ref(&track)).unwrap();
        let t = transform_for(&cfg);
        let wp = WayPoint {
            point: GeoPoint::new(47.005, 8.005),
            time: MilliTime(8_000),
            name: String::new(),
            comment: None,
        };
        let px = t.to_pixel(wp.point);

        let early = comp
            .compose(
                MilliTime(0),
                &[CursorState::default()],
                &t,
                std::slice::from_ref(&wp),
                0.0,
                None,
            )
            .unwrap();
        assert_eq!(pixel(&early, px.x as u32, px.y as u32), [255, 255, 255, 255]);

        let late = comp
            .compose(
                MilliTime(9_000),
                &[CursorState::default()],
                &t,
                std::slice::from_ref(&wp),
                0.0,
                None,
            )
            .unwrap();
        assert_eq!(pixel(&late, px.x as u32, px.y as u32), [0, 0, 0, 255]);
    }
}
