//! CLI surface (spec §6). A thin translation layer from `clap`'s derived
//! `Args` into the `Context` the core components actually consume.

use crate::context::Context;
use crate::url::RecordingUrl;
use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(name = "bbb-recover", author, version, about)]
pub struct Args {
    /// Playback URL of the recording to reconstruct, e.g.
    /// https://bbb.example.org/playback/presentation/2.3/playback.html?meetingId=...
    ///
    /// Omit when `--batch` is given.
    pub url: Option<String>,

    /// Read newline-separated recording URLs from this file instead of a
    /// single positional URL, processing each in turn.
    #[arg(long)]
    pub batch: Option<PathBuf>,

    /// Directory the final video is written to. Defaults to the current
    /// directory.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Directory working directories are created under. Defaults to the
    /// platform temp directory.
    #[arg(long)]
    pub working_dir: Option<PathBuf>,

    /// Explicit output filename; defaults to `<date>_<title>.mp4`.
    #[arg(long)]
    pub output_filename: Option<String>,

    /// Skip the webcam picture-in-picture overlay (audio is still muxed in).
    #[arg(long)]
    pub skip_webcam: bool,

    /// Skip the webcam freeze-detection pass (forces the visual overlay path).
    #[arg(long)]
    pub skip_webcam_freeze_detection: bool,

    /// Skip rendering hand-drawn annotations.
    #[arg(long)]
    pub skip_annotations: bool,

    /// Skip rendering the presenter's cursor.
    #[arg(long)]
    pub skip_cursor: bool,

    /// Keep the working directory (downloaded artifacts, frames, manifests)
    /// after a successful run.
    #[arg(long)]
    pub keep_tmp_files: bool,

    /// Stop after fetching artifacts and print the working directory,
    /// leaving a self-contained replay-able copy for a later run.
    #[arg(long)]
    pub backup: bool,

    /// Maximum number of concurrent headless-browser render workers.
    #[arg(long, default_value_t = 10)]
    pub max_parallel_renderers: usize,

    /// Force the output width (both force-width and force-height must be set together).
    #[arg(long)]
    pub force_width: Option<u32>,

    /// Force the output height (both force-width and force-height must be set together).
    #[arg(long)]
    pub force_height: Option<u32>,

    /// Video encoder passed to the transcoder.
    #[arg(long, default_value = "libx264")]
    pub encoder: String,

    /// Audio codec passed to the transcoder.
    #[arg(long, default_value = "copy")]
    pub audiocodec: String,

    /// Transcoder preset.
    #[arg(long, default_value = "fast")]
    pub preset: String,

    /// Constant rate factor, if the encoder supports one.
    #[arg(long)]
    pub crf: Option<u32>,

    /// Enable debug-level logging for this crate.
    #[arg(long)]
    pub verbose: bool,
}

impl Args {
    pub fn build_context(&self, working_dir_root: &std::path::Path) -> Result<Context> {
        let url = self
            .url
            .as_ref()
            .ok_or_else(|| anyhow!("a recording URL is required outside --batch mode"))?;
        let recording = RecordingUrl::parse(url)?;

        if self.force_width.is_some() != self.force_height.is_some() {
            return Err(anyhow!("--force-width and --force-height must be set together"));
        }

        let mut ctx = Context::new(recording, working_dir_root);
        if let Some(output_dir) = &self.output_dir {
            ctx.output_dir = output_dir.clone();
        }
        ctx.output_filename = self.output_filename.clone();
        ctx.skip_webcam = self.skip_webcam;
        ctx.skip_webcam_freeze_detection = self.skip_webcam_freeze_detection;
        ctx.skip_annotations = self.skip_annotations;
        ctx.skip_cursor = self.skip_cursor;
        ctx.keep_tmp_files = self.keep_tmp_files;
        ctx.backup = self.backup;
        ctx.max_parallel_chromes = self.max_parallel_renderers;
        ctx.force_width = self.force_width;
        ctx.force_height = self.force_height;
        ctx.encoder = self.encoder.clone();
        ctx.audiocodec = self.audiocodec.clone();
        ctx.preset = self.preset.clone();
        ctx.crf = self.crf;
        Ok(ctx)
    }
}
