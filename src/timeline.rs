//! Timeline Compiler (component C): turns the typed records from the
//! manifest parser into the frame/zoom/partition outputs consumed by the
//! Scene Server, Render Pool and Cut-list Assembler.

use crate::model::{
    frames_dir_rel_path, Action, CursorEvent, Drawing, Frame, Metadata, PanZoom, Partition,
    SlideImage, Timeline, TimestampMs,
};

/// Options that gate optional event categories; mirrors the CLI flags
/// `--skip-annotations` / `--skip-cursor`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompileOptions {
    pub skip_annotations: bool,
    pub skip_cursor: bool,
}

pub fn build_timeline(
    metadata: &Metadata,
    slides: &[SlideImage],
    drawings: &[Drawing],
    panzooms: &[PanZoom],
    cursors: &[CursorEvent],
    opts: CompileOptions,
) -> Timeline {
    let duration = metadata.duration;
    let mut timeline = Timeline::default();

    // Source-scan order: images (show then hide), then drawings (show then
    // hide), then pan/zoom, then cursor.
    for slide in slides {
        if slide.ts_in >= duration {
            continue;
        }
        let ts_in = clamp(slide.ts_in, duration);
        let ts_out = clamp(slide.ts_out, duration);
        push(
            &mut timeline,
            ts_in,
            Action::ShowImage {
                element_id: slide.element_id.clone(),
                numeric_id: slide.numeric_id.clone(),
                width: slide.width,
                height: slide.height,
            },
        );
        push(
            &mut timeline,
            ts_out,
            Action::HideImage {
                element_id: slide.element_id.clone(),
                numeric_id: slide.numeric_id.clone(),
            },
        );
    }

    if !opts.skip_annotations {
        for drawing in drawings {
            if drawing.ts_in >= duration {
                continue;
            }
            let ts_in = clamp(drawing.ts_in, duration);
            push(
                &mut timeline,
                ts_in,
                Action::ShowDrawing {
                    element_id: drawing.element_id.clone(),
                    shape_id: drawing.shape_id.clone(),
                },
            );
            if let Some(undo) = drawing.ts_out {
                let ts_out = clamp(undo, duration);
                push(
                    &mut timeline,
                    ts_out,
                    Action::HideDrawing {
                        element_id: drawing.element_id.clone(),
                    },
                );
            }
        }
    }

    for zoom in panzooms {
        if zoom.ts_in >= duration {
            continue;
        }
        let ts = clamp(zoom.ts_in, duration);
        push(
            &mut timeline,
            ts,
            Action::SetViewBox {
                x: zoom.x,
                y: zoom.y,
                w: zoom.w,
                h: zoom.h,
                raw: zoom.raw_view_box.clone(),
            },
        );
    }

    if !opts.skip_cursor {
        for cursor in cursors {
            if cursor.ts_in >= duration {
                continue;
            }
            let ts = clamp(cursor.ts_in, duration);
            push(
                &mut timeline,
                ts,
                Action::MoveCursor {
                    x: cursor.x_fraction,
                    y: cursor.y_fraction,
                },
            );
        }
    }

    timeline.only_zooms = timeline
        .frames
        .iter()
        .flat_map(|(ts, frame)| {
            frame
                .actions
                .iter()
                .filter(|a| matches!(a, Action::SetViewBox { .. }))
                .map(move |a| (*ts, a.clone()))
        })
        .collect();
    timeline.only_zooms.sort_by(|a, b| b.0.cmp(&a.0));

    timeline.partitions = compute_partitions(slides, duration);

    timeline
}

fn clamp(secs: f64, duration: f64) -> f64 {
    secs.max(0.0).min(duration)
}

fn push(timeline: &mut Timeline, secs: f64, action: Action) {
    let ts = TimestampMs::from_secs_f64(secs);
    let frame = timeline.frames.entry(ts).or_insert_with(|| Frame {
        actions: Vec::new(),
        capture_rel_path: frames_dir_rel_path(ts),
    });
    frame.actions.push(action);
}

/// Follows `parse_slide_partitions` verbatim: scan slides in document order,
/// open a partition at the first slide's `ts_in`, close it at a slide's
/// `ts_out` when that slide is the last one or carries annotations.
fn compute_partitions(slides: &[SlideImage], duration: f64) -> Vec<Partition> {
    let mut partitions = Vec::new();
    let mut open_start: Option<f64> = None;
    let last_index = slides.len().saturating_sub(1);

    for (i, slide) in slides.iter().enumerate() {
        let ts_in = clamp(slide.ts_in, duration);
        let ts_out = clamp(slide.ts_out, duration);
        if open_start.is_none() {
            open_start = Some(ts_in);
        }
        if i == last_index || slide.has_annotations {
            partitions.push(Partition {
                start: TimestampMs::from_secs_f64(open_start.take().unwrap()),
                end: TimestampMs::from_secs_f64(ts_out),
            });
        }
    }
    partitions
}
