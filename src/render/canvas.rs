use tiny_skia::{IntSize, Pixmap};

use crate::foundation::core::Rgba8;
use crate::foundation::error::{TrackmotionError, TrackmotionResult};

pub type PremulRgba8 = [u8; 4];

/// Source-over for premultiplied RGBA8 with an extra opacity factor.
pub fn over(dst: PremulRgba8, src: PremulRgba8, opacity: f32) -> PremulRgba8 {
    let opacity = opacity.clamp(0.0, 1.0);
    if opacity <= 0.0 || src[3] == 0 {
        return dst;
    }

    let op = ((opacity * 255.0).round() as i32).clamp(0, 255) as u16;
    let sa = mul_div255(u16::from(src[3]), op);
    if sa == 0 {
        return dst;
    }

    let inv = 255u16 - u16::from(sa);

    let mut out = [0u8; 4];
    out[3] = add_sat_u8(sa, mul_div255(u16::from(dst[3]), inv));

    for i in 0..3 {
        let sc = mul_div255(u16::from(src[i]), op);
        let dc = mul_div255(u16::from(dst[i]), inv);
        out[i] = add_sat_u8(sc, dc);
    }
    out
}

/// Blend a solid color over every pixel of a premultiplied buffer.
pub fn fill_over_in_place(data: &mut [u8], color: Rgba8, opacity: f64) {
    let src = color.to_premul(opacity);
    if src[3] == 0 {
        return;
    }
    for d in data.chunks_exact_mut(4) {
        let out = over([d[0], d[1], d[2], d[3]], src, 1.0);
        d.copy_from_slice(&out);
    }
}

/// Blend a grayscale coverage mask, tinted with `color`, over a premultiplied
/// canvas at pixel origin `(x, y)`. Out-of-canvas parts are clipped.
pub fn mask_over_in_place(
    data: &mut [u8],
    canvas_w: u32,
    canvas_h: u32,
    mask: &[u8],
    mask_w: u32,
    mask_h: u32,
    x: i32,
    y: i32,
    color: Rgba8,
) {
    let tint = color.to_premul(1.0);
    for my in 0..mask_h {
        let cy = y + my as i32;
        if cy < 0 || cy >= canvas_h as i32 {
            continue;
        }
        for mx in 0..mask_w {
            let cx = x + mx as i32;
            if cx < 0 || cx >= canvas_w as i32 {
                continue;
            }
            let coverage = mask[(my * mask_w + mx) as usize];
            if coverage == 0 {
                continue;
            }
            let cv = u16::from(coverage);
            let src = [
                mul_div255(u16::from(tint[0]), cv),
                mul_div255(u16::from(tint[1]), cv),
                mul_div255(u16::from(tint[2]), cv),
                mul_div255(u16::from(tint[3]), cv),
            ];
            let i = ((cy as u32 * canvas_w + cx as u32) * 4) as usize;
            let d = &mut data[i..i + 4];
            let out = over([d[0], d[1], d[2], d[3]], src, 1.0);
            d.copy_from_slice(&out);
        }
    }
}

fn mul_div255(x: u16, y: u16) -> u8 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u8
}

fn add_sat_u8(a: u8, b: u8) -> u8 {
    a.saturating_add(b)
}

/// One finished frame: premultiplied RGBA8, row-major, tightly packed.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRgba {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameRgba {
    /// Transparent-black frame.
    pub fn new(width: u32, height: u32) -> TrackmotionResult<Self> {
        if width == 0 || height == 0 {
            return Err(TrackmotionError::configuration(
                "frame dimensions must be > 0",
            ));
        }
        Ok(Self {
            width,
            height,
            data: vec![0; (width as usize) * (height as usize) * 4],
        })
    }

    /// Wrap a rasterized pixmap; tiny-skia stores premultiplied RGBA8 too.
    pub fn from_pixmap(pixmap: Pixmap) -> Self {
        Self {
            width: pixmap.width(),
            height: pixmap.height(),
            data: pixmap.take(),
        }
    }

    /// Premultiply a straight-alpha image as loaded from disk.
    pub fn from_rgba_image(img: &image::RgbaImage) -> Self {
        let mut data = Vec::with_capacity((img.width() * img.height() * 4) as usize);
        for px in img.pixels() {
            let [r, g, b, a] = px.0;
            data.extend_from_slice(&Rgba8::rgba(r, g, b, a).to_premul(1.0));
        }
        Self {
            width: img.width(),
            height: img.height(),
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Reinterpret as a pixmap for further vector drawing.
    pub fn into_pixmap(self) -> TrackmotionResult<Pixmap> {
        let size = IntSize::from_wh(self.width, self.height).ok_or_else(|| {
            TrackmotionError::configuration("frame dimensions must be > 0")
        })?;
        Pixmap::from_vec(self.data, size)
            .ok_or_else(|| TrackmotionError::configuration("frame buffer size mismatch"))
    }

    pub fn fill(&mut self, color: Rgba8) {
        let px = color.to_premul(1.0);
        for d in self.data.chunks_exact_mut(4) {
            d.copy_from_slice(&px);
        }
    }

    /// Flashback-style solid overlay.
    pub fn overlay_color(&mut self, color: Rgba8, opacity: f64) {
        fill_over_in_place(&mut self.data, color, opacity);
    }

    /// Straight-alpha copy, for image-sequence output.
    pub fn to_unpremultiplied(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(4) {
            let a = px[3];
            if a == 0 {
                out.extend_from_slice(&[0, 0, 0, 0]);
            } else {
                let un = |c: u8| ((u16::from(c) * 255 + u16::from(a) / 2) / u16::from(a)) as u8;
                out.extend_from_slice(&[un(px[0]), un(px[1]), un(px[2]), a]);
            }
        }
        out
    }

    /// Flatten onto an opaque background, for video encoders that take no
    /// alpha channel.
    pub fn flatten_to_opaque(&self, background: Rgba8) -> Vec<u8> {
        let bg = background.to_premul(1.0);
        let mut out = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(4) {
            let flat = over([bg[0], bg[1], bg[2], 255], [px[0], px[1], px[2], px[3]], 1.0);
            out.extend_from_slice(&[flat[0], flat[1], flat[2], 255]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn over_opacity_0_is_noop() {
        let dst = [1, 2, 3, 4];
        let src = [200, 200, 200, 200];
        assert_eq!(over(dst, src, 0.0), dst);
    }

    #[test]
    fn over_src_opaque_replaces_dst() {
        let dst = [0, 0, 0, 255];
        let src = [255, 0, 0, 255];
        assert_eq!(over(dst, src, 1.0), src);
    }

    #[test]
    fn over_dst_transparent_returns_scaled_src() {
        let dst = [0, 0, 0, 0];
        let src = [100, 110, 120, 200];
        assert_eq!(over(dst, src, 1.0), src);
    }

    #[test]
    fn fill_produces_premultiplied_pixels() {
        let mut frame = FrameRgba::new(2, 2).unwrap();
        frame.fill(Rgba8::rgba(200, 100, 0, 128));
        // 200 * 128 / 255 rounds to 100.
        assert_eq!(&frame.data()[..4], &[100, 50, 0, 128]);
    }

    #[test]
    fn overlay_full_opacity_replaces() {
        let mut frame = FrameRgba::new(1, 1).unwrap();
        frame.fill(Rgba8::rgb(10, 20, 30));
        frame.overlay_color(Rgba8::rgb(255, 255, 255), 1.0);
        assert_eq!(frame.data(), &[255, 255, 255, 255]);
    }

    #[test]
    fn flatten_opaque_pixel_passes_through() {
        let mut frame = FrameRgba::new(1, 1).unwrap();
        frame.fill(Rgba8::rgb(9, 8, 7));
        assert_eq!(frame.flatten_to_opaque(Rgba8::rgb(0, 0, 0)), vec![9, 8, 7, 255]);
    }

    #[test]
    fn flatten_transparent_pixel_shows_background() {
        let frame = FrameRgba::new(1, 1).unwrap();
        assert_eq!(
            frame.flatten_to_opaque(Rgba8::rgb(1, 2, 3)),
            vec![1, 2, 3, 255]
        );
    }

    #[test]
    fn unpremultiply_inverts_premultiply() {
        let mut frame = FrameRgba::new(1, 1).unwrap();
        frame.fill(Rgba8::rgba(200, 100, 0, 128));
        let straight = frame.to_unpremultiplied();
        assert_eq!(straight[3], 128);
        assert!((i16::from(straight[0]) - 200).abs() <= 1);
        assert!((i16::from(straight[1]) - 100).abs() <= 1);
    }

    #[test]
    fn mask_blends_by_coverage() {
        let mut frame = FrameRgba::new(2, 1).unwrap();
        let mask = [255u8, 0u8];
        mask_over_in_place(
            frame.data.as_mut_slice(),
            2,
            1,
            &mask,
            2,
            1,
            0,
            0,
            Rgba8::rgb(255, 0, 0),
        );
        assert_eq!(&frame.data()[..4], &[255, 0, 0, 255]);
        assert_eq!(&frame.data()[4..], &[0, 0, 0, 0]);
    }

    #[test]
    fn pixmap_roundtrip_preserves_pixels() {
        let mut frame = FrameRgba::new(3, 2).unwrap();
        frame.fill(Rgba8::rgb(5, 6, 7));
        let copy = frame.clone();
        let pixmap = frame.into_pixmap().unwrap();
        assert_eq!(FrameRgba::from_pixmap(pixmap), copy);
    }
}
