use std::{
    path::{Path, PathBuf},
    process::{Child, ChildStdin, Command, Stdio},
};

use crate::foundation::core::{FrameIndex, Rgba8};
use crate::foundation::error::{TrackmotionError, TrackmotionResult};
use crate::render::canvas::FrameRgba;
use crate::sequencer::{FrameSink, SinkConfig};

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn ensure_parent_dir(path: &Path) -> TrackmotionResult<()> {
    if let Some(parent) = path.parent() {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

struct FfmpegProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    scratch: Vec<u8>,
    width: u32,
    height: u32,
}

/// MP4 sink driving a system `ffmpeg` process over a rawvideo pipe.
///
/// The process is spawned lazily in `begin`, once the frame geometry is
/// known; we use the system binary rather than `ffmpeg-next` to avoid native
/// FFmpeg dev header/lib requirements.
pub struct FfmpegSink {
    out_path: PathBuf,
    background: Rgba8,
    overwrite: bool,
    process: Option<FfmpegProcess>,
}

impl FfmpegSink {
    pub fn new(out_path: impl Into<PathBuf>, background: Rgba8) -> Self {
        Self {
            out_path: out_path.into(),
            background,
            overwrite: true,
            process: None,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> TrackmotionResult<()> {
        ensure_parent_dir(&self.out_path)?;
        if !self.overwrite && self.out_path.exists() {
            return Err(TrackmotionError::configuration(format!(
                "output file '{}' already exists",
                self.out_path.display()
            )));
        }
        if !is_ffmpeg_on_path() {
            return Err(TrackmotionError::encoding(
                0,
                "ffmpeg is required for MP4 output, but was not found on PATH",
            ));
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        if self.overwrite {
            cmd.arg("-y");
        } else {
            cmd.arg("-n");
        }

        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &format!("{}", cfg.fps),
            "-i",
            "pipe:0",
            "-an",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
        ])
        .arg(&self.out_path);

        let mut child = cmd.spawn().map_err(|e| {
            TrackmotionError::encoding(
                0,
                format!("failed to spawn ffmpeg (is it installed and on PATH?): {e}"),
            )
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TrackmotionError::encoding(0, "failed to open ffmpeg stdin"))?;

        self.process = Some(FfmpegProcess {
            scratch: vec![0u8; (cfg.width * cfg.height * 4) as usize],
            width: cfg.width,
            height: cfg.height,
            child,
            stdin: Some(stdin),
        });
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> TrackmotionResult<()> {
        let Some(process) = self.process.as_mut() else {
            return Err(TrackmotionError::encoding(idx.0, "sink not started"));
        };
        if frame.width() != process.width || frame.height() != process.height {
            return Err(TrackmotionError::encoding(
                idx.0,
                format!(
                    "frame size mismatch: got {}x{}, expected {}x{}",
                    frame.width(),
                    frame.height(),
                    process.width,
                    process.height
                ),
            ));
        }

        flatten_premul_to_opaque(&mut process.scratch, frame.data(), self.background.to_array());

        let Some(stdin) = process.stdin.as_mut() else {
            return Err(TrackmotionError::encoding(idx.0, "sink already finalized"));
        };
        use std::io::Write as _;
        stdin.write_all(&process.scratch).map_err(|e| {
            TrackmotionError::encoding(idx.0, format!("failed to write frame to ffmpeg: {e}"))
        })?;
        Ok(())
    }

    fn end(&mut self) -> TrackmotionResult<()> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        drop(process.stdin.take());

        let output = process.child.wait_with_output().map_err(|e| {
            TrackmotionError::encoding(0, format!("failed to wait for ffmpeg: {e}"))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrackmotionError::encoding(
                0,
                format!("ffmpeg exited with status {}: {}", output.status, stderr.trim()),
            ));
        }
        Ok(())
    }
}

/// Flatten premultiplied RGBA over an opaque background, in place into `dst`.
fn flatten_premul_to_opaque(dst: &mut [u8], src: &[u8], bg_rgba: [u8; 4]) {
    debug_assert_eq!(dst.len(), src.len());

    let bg_r = u16::from(bg_rgba[0]);
    let bg_g = u16::from(bg_rgba[1]);
    let bg_b = u16::from(bg_rgba[2]);

    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 {
            d.copy_from_slice(s);
            d[3] = 255;
            continue;
        }
        let inv = 255u16 - a;
        d[0] = (u16::from(s[0]) + mul_div255(bg_r, inv)).min(255) as u8;
        d[1] = (u16::from(s[1]) + mul_div255(bg_g, inv)).min(255) as u8;
        d[2] = (u16::from(s[2]) + mul_div255(bg_b, inv)).min(255) as u8;
        d[3] = 255;
    }
}

fn mul_div255(x: u16, y: u16) -> u16 {
    (((u32::from(x) * u32::from(y)) + 127) / 255) as u16
}

/// Sink writing each frame as `frame_NNNNNN.png` in one directory.
pub struct PngSequenceSink {
    dir: PathBuf,
}

impl PngSequenceSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl FrameSink for PngSequenceSink {
    fn begin(&mut self, _cfg: SinkConfig) -> TrackmotionResult<()> {
        use anyhow::Context as _;
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("failed to create output directory '{}'", self.dir.display()))?;
        Ok(())
    }

    fn push_frame(&mut self, idx: FrameIndex, frame: &FrameRgba) -> TrackmotionResult<()> {
        let path = self.dir.join(format!("frame_{:06}.png", idx.0));
        let img = image::RgbaImage::from_raw(
            frame.width(),
            frame.height(),
            frame.to_unpremultiplied(),
        )
        .ok_or_else(|| TrackmotionError::encoding(idx.0, "frame buffer size mismatch"))?;
        img.save(&path)
            .map_err(|e| TrackmotionError::encoding(idx.0, format!("{}: {e}", path.display())))?;
        Ok(())
    }

    fn end(&mut self) -> TrackmotionResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_premul_over_black_produces_expected_rgb() {
        let src = vec![128u8, 0, 0, 128];
        let mut dst = vec![0u8; 4];
        flatten_premul_to_opaque(&mut dst, &src, [0, 0, 0, 255]);
        assert_eq!(dst, vec![128, 0, 0, 255]);
    }

    #[test]
    fn flatten_transparent_shows_background() {
        let src = vec![0u8, 0, 0, 0];
        let mut dst = vec![0u8; 4];
        flatten_premul_to_opaque(&mut dst, &src, [7, 8, 9, 255]);
        assert_eq!(dst, vec![7, 8, 9, 255]);
    }

    #[test]
    fn png_sequence_writes_numbered_files() {
        let dir = std::env::temp_dir().join("trackmotion-png-sink-test");
        let _ = std::fs::remove_dir_all(&dir);
        let mut sink = PngSequenceSink::new(&dir);
        sink.begin(SinkConfig {
            width: 4,
            height: 4,
            fps: 30.0,
        })
        .unwrap();
        let frame = FrameRgba::new(4, 4).unwrap();
        sink.push_frame(FrameIndex(0), &frame).unwrap();
        sink.push_frame(FrameIndex(1), &frame).unwrap();
        sink.end().unwrap();
        assert!(dir.join("frame_000000.png").exists());
        assert!(dir.join("frame_000001.png").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
