//! Orchestrator (component H): top-level sequencing, working-directory
//! lifecycle, idempotent resume, final filename assembly.

use crate::context::Context;
use crate::error::BbbError;
use crate::model::TimestampMs;
use crate::{cutlist, fetch, manifest, render, server, timeline, transcode};
use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub enum Outcome {
    /// `--backup` was requested: artifacts are fetched and the working
    /// directory is left in place for a later resuming run.
    BackedUp(PathBuf),
    Completed(PathBuf),
}

pub async fn run(ctx: &Context) -> Result<Outcome> {
    tokio::fs::create_dir_all(&ctx.working_dir)
        .await
        .map_err(|e| BbbError::Config(format!("cannot create working directory: {e}")))?;

    let client = fetch::build_client().context("building HTTP client")?;

    run_cancellable(fetch_essential(&client, ctx)).await??;
    let webcam_path = run_cancellable(fetch::fetch_with_container_fallback(
        &client,
        &ctx.recording,
        &ctx.working_dir,
        "video/webcams",
        true,
    ))
    .await??
    .expect("essential fetch guarantees presence");
    let deskshare_video = run_cancellable(fetch::fetch_with_container_fallback(
        &client,
        &ctx.recording,
        &ctx.working_dir,
        "deskshare/deskshare",
        false,
    ))
    .await??;

    let (metadata, slides, drawings, panzooms, cursors, deskshare_events) = parse_all(ctx).await?;

    run_cancellable(fetch_slide_images(&client, ctx, &slides)).await??;

    if ctx.backup {
        info!(path = %ctx.working_dir.display(), "backup requested, stopping after fetch");
        return Ok(Outcome::BackedUp(ctx.working_dir.clone()));
    }

    let opts = timeline::CompileOptions {
        skip_annotations: ctx.skip_annotations,
        skip_cursor: ctx.skip_cursor,
    };
    let compiled = timeline::build_timeline(&metadata, &slides, &drawings, &panzooms, &cursors, opts);

    let server = server::SceneServer::start(&ctx.working_dir).await?;
    let progress = Arc::new(render::Progress::default());
    let reporter = tokio::spawn(render::report_progress_forever(
        progress.clone(),
        compiled.frames.len(),
        compiled.partitions.len(),
    ));
    let render_opts = render::RenderOptions {
        max_parallel_chromes: ctx.max_parallel_chromes,
        force_width: ctx.force_width,
        force_height: ctx.force_height,
    };
    let render_result = run_cancellable(render::render_all(
        &server.base_url(),
        &ctx.working_dir,
        &compiled,
        render_opts,
        progress,
    ))
    .await?;
    reporter.abort();
    server.shutdown().await;
    render_result?;

    let frames_list: Vec<(TimestampMs, PathBuf)> = compiled
        .frames
        .iter()
        .map(|(ts, frame)| (*ts, frame.capture_rel_path.clone()))
        .collect();
    let slideshow_manifest = cutlist::build_slideshow_manifest(&frames_list);
    tokio::fs::write(ctx.path_in("slideshow.txt"), slideshow_manifest).await?;

    let ffmpeg = transcode::Ffmpeg::ensure_available()?;
    let encode_opts = transcode::EncodeOptions {
        encoder: ctx.encoder.clone(),
        audiocodec: ctx.audiocodec.clone(),
        preset: ctx.preset.clone(),
        crf: ctx.crf,
    };
    let (width, height) = output_dimensions(ctx, &slides, &compiled, deskshare_video.as_deref(), &ffmpeg).await;

    ffmpeg
        .build_slideshow(
            &ctx.path_in("slideshow.txt"),
            width,
            height,
            &ctx.path_in("slideshow.mp4"),
            &encode_opts,
        )
        .await?;

    let mut visual_track = ctx.path_in("slideshow.mp4");
    if !deskshare_events.is_empty() {
        if let Some(deskshare_path) = &deskshare_video {
            ffmpeg
                .resize_deskshare(deskshare_path, width, height, &ctx.path_in("deskshare.mp4"), &encode_opts)
                .await?;
            let slices = cutlist::build_presentation_slices(metadata.duration, &deskshare_events);
            let presentation_manifest = cutlist::render_presentation_manifest(&slices);
            tokio::fs::write(ctx.path_in("deskshare.txt"), presentation_manifest).await?;
            ffmpeg
                .add_deskshare(&ctx.path_in("deskshare.txt"), &ctx.path_in("presentation.mp4"))
                .await?;
            visual_track = ctx.path_in("presentation.mp4");
        } else {
            warn!("deskshare events present but no deskshare video was fetched, skipping overlay");
        }
    }

    let frozen = if ctx.skip_webcam_freeze_detection {
        false
    } else {
        ffmpeg.detect_freeze(&webcam_path).await?
    };
    let use_audio_only = ctx.skip_webcam || frozen;

    let output_path = determine_output_path(ctx, &metadata)?;
    if output_path.exists() {
        return Err(BbbError::Config(format!(
            "output file already exists: {}",
            output_path.display()
        ))
        .into());
    }

    if use_audio_only {
        ffmpeg
            .add_audio_only(&visual_track, &webcam_path, &output_path, &encode_opts)
            .await?;
    } else {
        ffmpeg
            .add_webcam(&visual_track, &webcam_path, width, height, &output_path, &encode_opts)
            .await?;
    }

    if !ctx.keep_tmp_files {
        tokio::fs::remove_dir_all(&ctx.working_dir).await.ok();
    }

    Ok(Outcome::Completed(output_path))
}

async fn fetch_essential(client: &reqwest::Client, ctx: &Context) -> Result<()> {
    fetch::fetch_all(client, &ctx.recording, &ctx.working_dir, &fetch::essential_jobs()).await?;
    Ok(())
}

/// Downloads every slide image `shapes.svg` refers to. These paths are only
/// known once the manifest has been parsed, so this runs after `parse_all`
/// rather than alongside the other essential artifacts; every slide image is
/// essential, matching spec §4.A.
async fn fetch_slide_images(
    client: &reqwest::Client,
    ctx: &Context,
    slides: &[crate::model::SlideImage],
) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    let jobs: Vec<fetch::FetchJob> = slides
        .iter()
        .filter(|s| seen.insert(s.href.clone()))
        .map(|s| fetch::FetchJob {
            rel_path: s.href.clone(),
            essential: true,
        })
        .collect();
    fetch::fetch_all(client, &ctx.recording, &ctx.working_dir, &jobs).await?;
    Ok(())
}

async fn parse_all(
    ctx: &Context,
) -> Result<(
    crate::model::Metadata,
    Vec<crate::model::SlideImage>,
    Vec<crate::model::Drawing>,
    Vec<crate::model::PanZoom>,
    Vec<crate::model::CursorEvent>,
    Vec<crate::model::DeskshareEvent>,
)> {
    let metadata_xml = tokio::fs::read_to_string(ctx.path_in("metadata.xml")).await?;
    let metadata = manifest::parse_metadata(&metadata_xml)?;

    let shapes_svg = tokio::fs::read_to_string(ctx.path_in("shapes.svg")).await?;
    let (slides, drawings) = manifest::parse_shapes(&shapes_svg)?;

    let panzooms = read_optional_xml(ctx, "panzooms.xml")
        .await?
        .map(|xml| manifest::parse_panzooms(&xml))
        .transpose()?
        .unwrap_or_default();

    let cursors = if ctx.skip_cursor {
        Vec::new()
    } else {
        read_optional_xml(ctx, "cursor.xml")
            .await?
            .map(|xml| manifest::parse_cursor(&xml))
            .transpose()?
            .unwrap_or_default()
    };

    let deskshare_events = read_optional_xml(ctx, "deskshare.xml")
        .await?
        .map(|xml| manifest::parse_deskshare(&xml, metadata.duration))
        .transpose()?
        .unwrap_or_default();

    Ok((metadata, slides, drawings, panzooms, cursors, deskshare_events))
}

async fn read_optional_xml(ctx: &Context, rel: &str) -> Result<Option<String>> {
    match tokio::fs::read_to_string(ctx.path_in(rel)).await {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(file = rel, "optional artifact missing, continuing");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Mirrors `get_slideshow_size`: the largest width/height seen across every
/// pan/zoom viewBox plus the (probed) deskshare video, rounded up to even.
/// Falls back to the first slide's native size when there is neither a zoom
/// nor a deskshare track to measure.
async fn output_dimensions(
    ctx: &Context,
    slides: &[crate::model::SlideImage],
    timeline: &crate::model::Timeline,
    deskshare_video: Option<&Path>,
    ffmpeg: &transcode::Ffmpeg,
) -> (u32, u32) {
    if let (Some(w), Some(h)) = (ctx.force_width, ctx.force_height) {
        return (even(w), even(h));
    }

    let mut widths = Vec::new();
    let mut heights = Vec::new();

    if let Some(path) = deskshare_video {
        if let Ok(info) = ffmpeg.probe_video(path).await {
            widths.push(info.width);
            heights.push(info.height);
        }
    }

    for (_, action) in &timeline.only_zooms {
        if let crate::model::Action::SetViewBox { w, h, .. } = action {
            widths.push(*w as u32);
            heights.push(*h as u32);
        }
    }

    match (widths.iter().max(), heights.iter().max()) {
        (Some(&w), Some(&h)) => (even(w), even(h)),
        _ => slides
            .first()
            .map(|s| (even(s.width), even(s.height)))
            .unwrap_or((1280, 720)),
    }
}

fn even(n: u32) -> u32 {
    if n % 2 == 0 {
        n
    } else {
        n + 1
    }
}

fn determine_output_path(ctx: &Context, metadata: &crate::model::Metadata) -> Result<PathBuf> {
    std::fs::create_dir_all(&ctx.output_dir)
        .map_err(|e| BbbError::Config(format!("cannot create output directory: {e}")))?;

    let filename = match &ctx.output_filename {
        Some(name) => name.clone(),
        None => format!("{}_{}.mp4", metadata.date_formatted, sanitize_title(&metadata.title)),
    };
    Ok(ctx.output_dir.join(filename))
}

fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Races `fut` against `ctrl_c()`, returning an error if the user interrupts
/// before `fut` resolves. Used at each phase barrier so a keyboard interrupt
/// stops dispatching new work instead of waiting for the current phase to
/// drain naturally.
async fn run_cancellable<T>(fut: impl std::future::Future<Output = T>) -> Result<T> {
    tokio::select! {
        result = fut => Ok(result),
        _ = tokio::signal::ctrl_c() => Err(BbbError::Config("interrupted".to_string()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metadata;

    #[test]
    fn sanitizes_titles_with_punctuation() {
        assert_eq!(sanitize_title("Lecture 1: Intro!"), "Lecture_1__Intro_");
    }

    #[tokio::test]
    async fn output_dimensions_prefers_forced_size() {
        let recording_url = crate::url::RecordingUrl::parse(
            "https://bbb.example.org/playback/presentation/2.0/1a2b3c4d-1111-2222-3333-444455556666",
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = Context::new(recording_url, dir.path());
        ctx.force_width = Some(641);
        ctx.force_height = Some(361);
        let ffmpeg = transcode::Ffmpeg {
            ffmpeg_bin: "ffmpeg".into(),
            ffprobe_bin: "ffprobe".into(),
        };
        let timeline = crate::model::Timeline::default();
        assert_eq!(
            output_dimensions(&ctx, &[], &timeline, None, &ffmpeg).await,
            (642, 362)
        );
    }

    #[tokio::test]
    async fn output_dimensions_falls_back_to_first_slide_without_zoom_or_deskshare() {
        let recording_url = crate::url::RecordingUrl::parse(
            "https://bbb.example.org/playback/presentation/2.0/1a2b3c4d-1111-2222-3333-444455556666",
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(recording_url, dir.path());
        let ffmpeg = transcode::Ffmpeg {
            ffmpeg_bin: "ffmpeg".into(),
            ffprobe_bin: "ffprobe".into(),
        };
        let timeline = crate::model::Timeline::default();
        let slides = vec![crate::model::SlideImage {
            element_id: "image1".to_string(),
            numeric_id: "1".to_string(),
            ts_in: 0.0,
            ts_out: 10.0,
            width: 641,
            height: 361,
            href: "slide1.png".to_string(),
            has_annotations: false,
        }];
        assert_eq!(
            output_dimensions(&ctx, &slides, &timeline, None, &ffmpeg).await,
            (642, 362)
        );
    }

    #[test]
    fn output_filename_defaults_to_date_and_title() {
        let recording_url = crate::url::RecordingUrl::parse(
            "https://bbb.example.org/playback/presentation/2.0/1a2b3c4d-1111-2222-3333-444455556666",
        )
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(recording_url, dir.path());
        let metadata = Metadata {
            start_epoch_ms: 0,
            date_formatted: "2020-01-01T00-00-00".to_string(),
            duration: 1.0,
            title: "Intro".to_string(),
            bbb_version: None,
        };
        let path = determine_output_path(&ctx, &metadata).unwrap();
        assert_eq!(path.file_name().unwrap(), "2020-01-01T00-00-00_Intro.mp4");
    }
}
