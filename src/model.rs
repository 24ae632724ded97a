//! Data model for a parsed recording: metadata, slide/annotation/pan-zoom/cursor
//! events, the compiled frame timeline, and render partitions.

use std::collections::BTreeMap;
use std::path::PathBuf;

/// Milliseconds since recording start. Frames are keyed on this instead of
/// `f64` seconds so that two events at the same source timestamp always
/// collapse to one frame instead of silently diverging on float rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimestampMs(pub u64);

impl TimestampMs {
    pub fn from_secs_f64(secs: f64) -> Self {
        TimestampMs((secs.max(0.0) * 1000.0).round() as u64)
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    /// Raw `start_time` from metadata.xml, epoch milliseconds.
    pub start_epoch_ms: i64,
    /// `start_epoch_ms` formatted as `YYYY-MM-DDTHH-MM-SS`.
    pub date_formatted: String,
    /// Recording duration in seconds.
    pub duration: f64,
    pub title: String,
    pub bbb_version: Option<String>,
}

impl Metadata {
    pub fn duration_ms(&self) -> TimestampMs {
        TimestampMs::from_secs_f64(self.duration)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlideImage {
    pub element_id: String,
    pub numeric_id: String,
    pub ts_in: f64,
    pub ts_out: f64,
    pub width: u32,
    pub height: u32,
    pub href: String,
    pub has_annotations: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Drawing {
    pub element_id: String,
    pub shape_id: String,
    pub ts_in: f64,
    /// `None` means the drawing is never undone ("-1" in the source XML).
    pub ts_out: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanZoom {
    pub ts_in: f64,
    pub raw_view_box: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CursorEvent {
    pub ts_in: f64,
    /// `(-1.0, -1.0)` means the cursor is hidden at this instant.
    pub x_fraction: f64,
    pub y_fraction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeskshareEvent {
    pub start: f64,
    pub stop: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ShowImage {
        element_id: String,
        numeric_id: String,
        width: u32,
        height: u32,
    },
    HideImage {
        element_id: String,
        numeric_id: String,
    },
    ShowDrawing {
        element_id: String,
        shape_id: String,
    },
    HideDrawing {
        element_id: String,
    },
    SetViewBox {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        raw: String,
    },
    MoveCursor {
        x: f64,
        y: f64,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub actions: Vec<Action>,
    /// Path to the captured PNG, relative to the working directory. Set once
    /// by the timeline compiler; existence on disk (checked by the render
    /// pool) is what "done" means, this field itself is always populated.
    pub capture_rel_path: PathBuf,
}

/// A half-open `[start, end)` interval of timeline time assigned to one
/// render-pool worker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Partition {
    pub start: TimestampMs,
    pub end: TimestampMs,
}

/// Output of the Timeline Compiler (component C).
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    pub frames: BTreeMap<TimestampMs, Frame>,
    /// Sorted descending by timestamp; only ever holds `SetViewBox` actions.
    pub only_zooms: Vec<(TimestampMs, Action)>,
    pub partitions: Vec<Partition>,
}

impl Timeline {
    /// The view box in effect at or before `t`, found by linear scan of the
    /// descending `only_zooms` list (first entry whose timestamp `<= t`).
    pub fn view_box_at(&self, t: TimestampMs) -> Option<&Action> {
        self.only_zooms
            .iter()
            .find(|(ts, _)| *ts <= t)
            .map(|(_, action)| action)
    }
}

pub fn frames_dir_rel_path(ts: TimestampMs) -> PathBuf {
    // `{:?}` rather than `{}`: f64's Debug formatting always keeps a decimal
    // point (`10.0`, not `10`), matching the literal `frames/<secs>.png`
    // names scenario S1 spells out.
    PathBuf::from("frames").join(format!("{:?}.png", ts.as_secs_f64()))
}
