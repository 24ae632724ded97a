use bbb_recover::cutlist::{build_presentation_slices, build_slideshow_manifest, Slice};
use bbb_recover::manifest::{parse_deskshare, parse_metadata, parse_panzooms, parse_shapes};
use bbb_recover::model::TimestampMs;
use bbb_recover::timeline::{build_timeline, CompileOptions};

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

fn metadata_xml(duration_ms: u64) -> String {
    format!(
        r#"<?xml version="1.0"?>
        <recording>
          <start_time>1700000000000</start_time>
          <playback><duration>{duration_ms}</duration></playback>
          <meta><meetingName>Weekly Sync</meetingName></meta>
        </recording>"#
    )
}

// Full-pipeline version of spec scenario S1: one slide, no annotations.
#[test]
fn s1_single_slide_compiles_to_two_frames_one_partition_and_one_manifest_record() {
    let meta = parse_metadata(&metadata_xml(10_000)).unwrap();
    let svg = format!(
        r#"<svg xmlns="{SVG_NS}" xmlns:xlink="{XLINK_NS}">
          <image class="slide" id="img1" in="0.0" out="10.0" width="640" height="480" xlink:href="p/img1.png" href="p/img1.png" />
        </svg>"#
    );
    let (slides, drawings) = parse_shapes(&svg).unwrap();
    let timeline = build_timeline(&meta, &slides, &drawings, &[], &[], CompileOptions::default());

    assert_eq!(timeline.frames.len(), 2);
    assert_eq!(timeline.partitions.len(), 1);

    let frames_list: Vec<_> = timeline
        .frames
        .iter()
        .map(|(ts, f)| (*ts, f.capture_rel_path.clone()))
        .collect();
    let manifest = build_slideshow_manifest(&frames_list);
    let duration_records = manifest.lines().filter(|l| l.starts_with("duration")).count();
    assert_eq!(duration_records, 1);
    assert!(manifest.contains("duration 10"));
}

// Full-pipeline version of S4: deskshare interleaving against a real parsed
// deskshare.xml, composed with the cut-list assembler.
#[test]
fn s4_deskshare_slices_sum_to_full_duration() {
    let xml = r#"<xml>
      <event start_timestamp="10" stop_timestamp="20" video_width="1280" video_height="720" />
    </xml>"#;
    let events = parse_deskshare(xml, 30.0).unwrap();
    let slices = build_presentation_slices(30.0, &events);

    let total: f64 = slices
        .iter()
        .map(|s| match s {
            Slice::Slideshow { inpoint, outpoint } | Slice::Deskshare { inpoint, outpoint } => outpoint - inpoint,
        })
        .sum();
    assert!((total - 30.0).abs() < 1e-9, "cut-list law: slices must cover the full duration");
}

// Quantified invariant: every Frame's timestamp lies in [0, duration].
#[test]
fn all_frame_timestamps_are_within_duration() {
    let meta = parse_metadata(&metadata_xml(5_000)).unwrap();
    let svg = format!(
        r#"<svg xmlns="{SVG_NS}" xmlns:xlink="{XLINK_NS}">
          <image class="slide" id="img1" in="0" out="3" width="640" height="480" xlink:href="a.png" href="a.png" />
          <image class="slide" id="img2" in="3" out="9" width="640" height="480" xlink:href="b.png" href="b.png" />
        </svg>"#
    );
    let (slides, drawings) = parse_shapes(&svg).unwrap();
    let timeline = build_timeline(&meta, &slides, &drawings, &[], &[], CompileOptions::default());

    let duration_ms = TimestampMs::from_secs_f64(meta.duration);
    for ts in timeline.frames.keys() {
        assert!(*ts <= duration_ms, "{ts:?} exceeds duration {duration_ms:?}");
    }
}

// Quantified invariant: partitions are non-overlapping and ordered.
#[test]
fn partitions_never_overlap() {
    let meta = parse_metadata(&metadata_xml(20_000)).unwrap();
    let svg = format!(
        r#"<svg xmlns="{SVG_NS}" xmlns:xlink="{XLINK_NS}">
          <image class="slide" id="img1" in="0" out="5" width="640" height="480" xlink:href="a.png" href="a.png" />
          <g image="img1"><g id="d1" timestamp="1" undo="2" shape="s1" /></g>
          <image class="slide" id="img2" in="5" out="12" width="640" height="480" xlink:href="b.png" href="b.png" />
          <image class="slide" id="img3" in="12" out="20" width="640" height="480" xlink:href="c.png" href="c.png" />
        </svg>"#
    );
    let (slides, drawings) = parse_shapes(&svg).unwrap();
    let timeline = build_timeline(&meta, &slides, &drawings, &[], &[], CompileOptions::default());

    for pair in timeline.partitions.windows(2) {
        assert!(pair[0].end <= pair[1].start);
    }
}

// Quantified invariant: only_zooms sorted descending and scan-by-<=t0 matches
// the expected viewbox.
#[test]
fn only_zooms_scan_matches_panzoom_xml() {
    let meta = parse_metadata(&metadata_xml(10_000)).unwrap();
    let xml = r#"<xml>
      <event timestamp="1"><viewBox>0 0 800 600</viewBox></event>
      <event timestamp="3"><viewBox>100 100 400 300</viewBox></event>
      <event timestamp="8"><viewBox>200 200 100 100</viewBox></event>
    </xml>"#;
    let panzooms = parse_panzooms(xml).unwrap();
    let timeline = build_timeline(&meta, &[], &[], &panzooms, &[], CompileOptions::default());

    assert!(timeline.only_zooms.windows(2).all(|w| w[0].0 >= w[1].0));
    let vb = timeline.view_box_at(TimestampMs::from_secs_f64(5.0)).unwrap();
    match vb {
        bbb_recover::model::Action::SetViewBox { x, y, .. } => assert_eq!((*x, *y), (100.0, 100.0)),
        _ => panic!("expected SetViewBox"),
    }
}

// Quantified invariant: deskshare events never overlap.
#[test]
fn deskshare_events_are_sorted_and_non_overlapping() {
    let xml = r#"<xml>
      <event start_timestamp="20" stop_timestamp="25" video_width="1280" video_height="720" />
      <event start_timestamp="5" stop_timestamp="10" video_width="1280" video_height="720" />
    </xml>"#;
    let events = parse_deskshare(xml, 30.0).unwrap();
    assert_eq!(events[0].start, 5.0);
    assert_eq!(events[1].start, 20.0);
    for pair in events.windows(2) {
        assert!(pair[0].stop <= pair[1].start);
    }
}

