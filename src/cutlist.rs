//! Cut-list Assembler (component F): emits the ffmpeg concat manifests that
//! stitch still frames and (optionally) deskshare segments into the final
//! timeline.

use crate::model::{DeskshareEvent, TimestampMs};
use std::fmt::Write as _;

/// Rounds to the nearest 0.1s using the original's exact formula rather than
/// naive `round`, which would bias differently at the .05 boundary.
fn round_tenth(d: f64) -> f64 {
    (10.0 * d + 0.5).floor() / 10.0
}

/// Builds the slideshow concat manifest: one `file`/`duration` record per
/// adjacent pair of frame timestamps. The final frame is never written: it
/// is always the hide-action frame at `duration` with an empty canvas, so
/// there is nothing useful to show for it and no trailing duration record.
pub fn build_slideshow_manifest(frames: &[(TimestampMs, std::path::PathBuf)]) -> String {
    let mut out = String::new();
    for pair in frames.windows(2) {
        let (t0, path0) = &pair[0];
        let (t1, _) = &pair[1];
        let duration = round_tenth(t1.as_secs_f64() - t0.as_secs_f64());
        writeln!(out, "file '{}'", path0.display()).unwrap();
        writeln!(out, "duration {duration}").unwrap();
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub enum Slice {
    Slideshow { inpoint: f64, outpoint: f64 },
    Deskshare { inpoint: f64, outpoint: f64 },
}

/// Walks deskshare events in temporal order, producing the slice sequence
/// the presentation manifest needs. Callers turn `Slice`s into
/// `file`/`inpoint`/`outpoint` concat records against `slideshow.mp4` and
/// `deskshare.mp4` respectively.
pub fn build_presentation_slices(duration: f64, deskshare: &[DeskshareEvent]) -> Vec<Slice> {
    if deskshare.is_empty() {
        return Vec::new();
    }
    let mut slices = Vec::new();
    let mut cursor = 0.0;
    for event in deskshare {
        if event.start > cursor {
            slices.push(Slice::Slideshow {
                inpoint: cursor,
                outpoint: event.start,
            });
        }
        slices.push(Slice::Deskshare {
            inpoint: event.start,
            outpoint: event.stop,
        });
        cursor = event.stop;
    }
    if cursor < duration {
        slices.push(Slice::Slideshow {
            inpoint: cursor,
            outpoint: duration,
        });
    }
    slices
}

pub fn render_presentation_manifest(slices: &[Slice]) -> String {
    let mut out = String::new();
    for slice in slices {
        match slice {
            Slice::Slideshow { inpoint, outpoint } => {
                writeln!(out, "file 'slideshow.mp4'").unwrap();
                writeln!(out, "inpoint {inpoint}").unwrap();
                writeln!(out, "outpoint {outpoint}").unwrap();
            }
            Slice::Deskshare { inpoint, outpoint } => {
                writeln!(out, "file 'deskshare.mp4'").unwrap();
                writeln!(out, "inpoint {inpoint}").unwrap();
                writeln!(out, "outpoint {outpoint}").unwrap();
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_at_the_point_zero_five_boundary_like_the_original() {
        // 0.05 * 10 + 0.5 = 1.0, floor = 1 -> 0.1, not naive-round's 0.0 or 0.1 ambiguity.
        assert_eq!(round_tenth(0.05), 0.1);
        assert_eq!(round_tenth(0.04), 0.0);
    }

    // S1 — single slide, no annotations.
    #[test]
    fn single_slide_manifest_has_one_duration_record() {
        let frames = vec![
            (TimestampMs::from_secs_f64(0.0), "frames/0.png".into()),
            (TimestampMs::from_secs_f64(10.0), "frames/10.png".into()),
        ];
        let manifest = build_slideshow_manifest(&frames);
        assert_eq!(manifest, "file 'frames/0.png'\nduration 10\n");
    }

    // S4 — deskshare interleaving.
    #[test]
    fn deskshare_interleaving_produces_three_slices() {
        let events = vec![DeskshareEvent {
            start: 10.0,
            stop: 20.0,
            width: 1280,
            height: 720,
        }];
        let slices = build_presentation_slices(30.0, &events);
        assert_eq!(
            slices,
            vec![
                Slice::Slideshow {
                    inpoint: 0.0,
                    outpoint: 10.0
                },
                Slice::Deskshare {
                    inpoint: 10.0,
                    outpoint: 20.0
                },
                Slice::Slideshow {
                    inpoint: 20.0,
                    outpoint: 30.0
                },
            ]
        );
    }

    #[test]
    fn deskshare_starting_at_zero_emits_no_leading_slideshow_slice() {
        let events = vec![DeskshareEvent {
            start: 0.0,
            stop: 5.0,
            width: 640,
            height: 480,
        }];
        let slices = build_presentation_slices(5.0, &events);
        assert_eq!(
            slices,
            vec![Slice::Deskshare {
                inpoint: 0.0,
                outpoint: 5.0
            }]
        );
    }
}
