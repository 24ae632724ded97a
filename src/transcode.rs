//! Transcoder Driver (component G): typed wrappers over the external ffmpeg
//! / ffprobe binaries. Every wrapper is idempotent against its declared
//! output path.

use crate::error::BbbError;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct EncodeOptions {
    pub encoder: String,
    pub audiocodec: String,
    pub preset: String,
    pub crf: Option<u32>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            encoder: "libx264".to_string(),
            audiocodec: "copy".to_string(),
            preset: "fast".to_string(),
            crf: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
}

/// Resolves a usable ffmpeg/ffprobe pair, trying the system binaries first
/// and falling back to a downloaded sidecar, matching the teacher's
/// `ensure_ffmpeg_available`.
pub struct Ffmpeg {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
}

impl Ffmpeg {
    #[instrument(name = "ensure_ffmpeg")]
    pub fn ensure_available() -> Result<Self> {
        let system_ok = std::process::Command::new("ffmpeg")
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false);

        if system_ok {
            info!("using system ffmpeg/ffprobe");
            return Ok(Ffmpeg {
                ffmpeg_bin: PathBuf::from("ffmpeg"),
                ffprobe_bin: PathBuf::from("ffprobe"),
            });
        }

        info!("system ffmpeg not found, downloading sidecar binary");
        let target_dir = ffmpeg_sidecar::paths::sidecar_dir()
            .context("failed to determine sidecar directory")?;
        ffmpeg_sidecar::download::auto_download().context("failed to download ffmpeg sidecar")?;
        Ok(Ffmpeg {
            ffmpeg_bin: target_dir.join("ffmpeg"),
            ffprobe_bin: target_dir.join("ffprobe"),
        })
    }

    #[instrument(skip(self))]
    pub async fn probe_video(&self, path: &Path) -> Result<VideoInfo> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,duration",
                "-of",
                "json",
            ])
            .arg(path)
            .output()
            .await
            .context("spawning ffprobe")?;

        if !output.status.success() {
            anyhow::bail!(BbbError::Transcode(format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_probe_json(&stdout)
    }

    /// Runs `freezedetect` over the whole stream and returns true iff there
    /// is exactly one `freeze_start` at or before 10s and no `freeze_end`.
    #[instrument(skip(self))]
    pub async fn detect_freeze(&self, path: &Path) -> Result<bool> {
        let output = Command::new(&self.ffmpeg_bin)
            .args(["-i"])
            .arg(path)
            .args(["-vf", "freezedetect=n=-60dB:d=2", "-f", "null", "-"])
            .output()
            .await
            .context("spawning ffmpeg freezedetect")?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        Ok(is_frozen(&stderr))
    }

    #[instrument(skip(self, opts))]
    pub async fn build_slideshow(
        &self,
        concat_manifest: &Path,
        width: u32,
        height: u32,
        out: &Path,
        opts: &EncodeOptions,
    ) -> Result<()> {
        if out.exists() {
            debug!(path = %out.display(), "slideshow already built, skipping");
            return Ok(());
        }
        let filter = format!(
            "fps=24,scale={width}:{height}:force_original_aspect_ratio=decrease,pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
        );
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-f", "concat", "-safe", "0", "-i"])
            .arg(concat_manifest)
            .args(["-filter_complex", &filter, "-c:v", &opts.encoder, "-preset", &opts.preset]);
        if let Some(crf) = opts.crf {
            cmd.args(["-crf", &crf.to_string()]);
        }
        cmd.arg(out);
        run(&mut cmd, "build_slideshow").await
    }

    #[instrument(skip(self, opts))]
    pub async fn resize_deskshare(
        &self,
        deskshare: &Path,
        width: u32,
        height: u32,
        out: &Path,
        opts: &EncodeOptions,
    ) -> Result<()> {
        if out.exists() {
            debug!(path = %out.display(), "deskshare already resized, skipping");
            return Ok(());
        }
        let filter = format!(
            "scale={width}:{height}:force_original_aspect_ratio=decrease,pad={width}:{height}:(ow-iw)/2:(oh-ih)/2"
        );
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-i"])
            .arg(deskshare)
            .args(["-vf", &filter, "-c:v", &opts.encoder, "-preset", &opts.preset, "-c:a", &opts.audiocodec])
            .arg(out);
        run(&mut cmd, "resize_deskshare").await
    }

    #[instrument(skip(self))]
    pub async fn add_deskshare(&self, presentation_manifest: &Path, out: &Path) -> Result<()> {
        if out.exists() {
            debug!(path = %out.display(), "deskshare already merged, skipping");
            return Ok(());
        }
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-f", "concat", "-safe", "0", "-i"])
            .arg(presentation_manifest)
            .args(["-c", "copy"])
            .arg(out);
        run(&mut cmd, "add_deskshare").await
    }

    #[instrument(skip(self, opts))]
    pub async fn add_webcam(
        &self,
        slideshow: &Path,
        webcam: &Path,
        width: u32,
        height: u32,
        out: &Path,
        opts: &EncodeOptions,
    ) -> Result<()> {
        if out.exists() {
            debug!(path = %out.display(), "final video already muxed, skipping");
            return Ok(());
        }
        let thumb_w = even(width / 5);
        let thumb_h = even(thumb_w * 3 / 4);
        let filter = format!(
            "[1:v]scale={thumb_w}:{thumb_h},colorchannelmixer=aa=0.8[pip];[0:v][pip]overlay=W-w:H-h[v]"
        );
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-i"])
            .arg(slideshow)
            .args(["-i"])
            .arg(webcam)
            .args([
                "-filter_complex",
                &filter,
                "-map",
                "[v]",
                "-map",
                "1:a",
                "-c:v",
                &opts.encoder,
                "-preset",
                &opts.preset,
                "-c:a",
                &opts.audiocodec,
                "-shortest",
            ])
            .arg(out);
        run(&mut cmd, "add_webcam").await
    }

    #[instrument(skip(self, opts))]
    pub async fn add_audio_only(&self, slideshow: &Path, webcam: &Path, out: &Path, opts: &EncodeOptions) -> Result<()> {
        if out.exists() {
            debug!(path = %out.display(), "final video already muxed, skipping");
            return Ok(());
        }
        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(["-i"])
            .arg(slideshow)
            .args(["-i"])
            .arg(webcam)
            .args([
                "-map",
                "0:v",
                "-map",
                "1:a",
                "-c:v",
                "copy",
                "-c:a",
                &opts.audiocodec,
                "-shortest",
            ])
            .arg(out);
        run(&mut cmd, "add_audio_only").await
    }
}

fn even(n: u32) -> u32 {
    if n % 2 == 0 {
        n
    } else {
        n + 1
    }
}

async fn run(cmd: &mut Command, label: &str) -> Result<()> {
    debug!(label, "running ffmpeg command");
    cmd.stdout(Stdio::null()).stderr(Stdio::piped());
    let output = cmd.output().await.context("spawning ffmpeg")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let last_line = stderr.lines().last().unwrap_or("").to_string();
        warn!(label, %last_line, "ffmpeg command failed");
        anyhow::bail!(BbbError::Transcode(last_line));
    }
    Ok(())
}

/// Tolerant scanner over `ffprobe -of json`'s stable shape: three scalar
/// fields inside one `streams[0]` object. Avoids pulling in a generic JSON
/// library for three numbers (see DESIGN.md).
fn parse_probe_json(json: &str) -> Result<VideoInfo> {
    let width = extract_json_number(json, "width")
        .ok_or_else(|| BbbError::Transcode("ffprobe output missing width".to_string()))?
        as u32;
    let height = extract_json_number(json, "height")
        .ok_or_else(|| BbbError::Transcode("ffprobe output missing height".to_string()))?
        as u32;
    let duration = extract_json_string_number(json, "duration")
        .ok_or_else(|| BbbError::Transcode("ffprobe output missing duration".to_string()))?;
    Ok(VideoInfo {
        width,
        height,
        duration,
    })
}

fn extract_json_number(json: &str, key: &str) -> Option<f64> {
    let needle = format!("\"{key}\"");
    let key_pos = json.find(&needle)?;
    let after_colon = json[key_pos + needle.len()..].trim_start();
    let after_colon = after_colon.strip_prefix(':')?.trim_start();
    let end = after_colon
        .find(|c: char| c == ',' || c == '}')
        .unwrap_or(after_colon.len());
    after_colon[..end].trim().parse().ok()
}

fn extract_json_string_number(json: &str, key: &str) -> Option<f64> {
    let needle = format!("\"{key}\"");
    let key_pos = json.find(&needle)?;
    let after_colon = json[key_pos + needle.len()..].trim_start();
    let after_colon = after_colon.strip_prefix(':')?.trim_start();
    let after_quote = after_colon.strip_prefix('"')?;
    let end = after_quote.find('"')?;
    after_quote[..end].parse().ok()
}

fn is_frozen(stderr: &str) -> bool {
    let starts = stderr
        .lines()
        .filter(|l| l.contains("lavfi.freezedetect.freeze_start"))
        .count();
    let ends = stderr
        .lines()
        .filter(|l| l.contains("lavfi.freezedetect.freeze_end"))
        .count();
    if starts != 1 || ends != 0 {
        return false;
    }
    stderr
        .lines()
        .find(|l| l.contains("lavfi.freezedetect.freeze_start"))
        .and_then(|l| l.rsplit(':').next())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .map(|t| t <= 10.0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ffprobe_json_shape() {
        let json = r#"{
            "streams": [
                {"width": 1280, "height": 720, "duration": "123.456000"}
            ]
        }"#;
        let info = parse_probe_json(json).unwrap();
        assert_eq!(info.width, 1280);
        assert_eq!(info.height, 720);
        assert!((info.duration - 123.456).abs() < 1e-6);
    }

    // S6 — webcam freeze.
    #[test]
    fn detects_freeze_from_canned_stderr() {
        let stderr = "\
[freezedetect @ 0x1] lavfi.freezedetect.freeze_start: 3.5
frame=  100 fps=24
";
        assert!(is_frozen(stderr));
    }

    #[test]
    fn does_not_flag_freeze_past_ten_seconds() {
        let stderr = "[freezedetect @ 0x1] lavfi.freezedetect.freeze_start: 15.0\n";
        assert!(!is_frozen(stderr));
    }

    #[test]
    fn does_not_flag_freeze_when_it_ends() {
        let stderr = "\
[freezedetect @ 0x1] lavfi.freezedetect.freeze_start: 3.5
[freezedetect @ 0x1] lavfi.freezedetect.freeze_end: 6.0
";
        assert!(!is_frozen(stderr));
    }

    #[test]
    fn even_rounds_odd_numbers_up() {
        assert_eq!(even(255), 256);
        assert_eq!(even(256), 256);
    }
}
