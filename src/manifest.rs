//! Manifest Parser (component B): turns the raw XML/SVG artifacts into the
//! typed records of the data model (§3), using `roxmltree` for a read-only
//! DOM over each document.

use crate::error::BbbError;
use crate::model::{CursorEvent, DeskshareEvent, Drawing, Metadata, PanZoom, SlideImage};
use anyhow::{Context as _, Result};
use chrono::{TimeZone, Utc};
use regex::Regex;
use roxmltree::Document;
use std::sync::OnceLock;

const SVG_NS: &str = "http://www.w3.org/2000/svg";
const XLINK_NS: &str = "http://www.w3.org/1999/xlink";

fn numeric_run_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"\d+").expect("valid regex"))
}

fn parse_xml<'a>(file: &str, xml: &'a str) -> Result<Document<'a>> {
    Document::parse(xml).map_err(|e| {
        BbbError::Parse {
            file: file.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

pub fn parse_metadata(xml: &str) -> Result<Metadata> {
    let doc = parse_xml("metadata.xml", xml)?;
    let root = doc.root_element();

    let start_epoch_ms: i64 = child_text(&root, "start_time")
        .ok_or_else(|| missing("metadata.xml", "start_time"))?
        .trim()
        .parse()
        .context("start_time is not an integer")?;

    let duration_ms: f64 = descendant_text(&root, "playback", "duration")
        .ok_or_else(|| missing("metadata.xml", "playback/duration"))?
        .trim()
        .parse()
        .context("duration is not a number")?;

    let title = descendant_text(&root, "meta", "meetingName")
        .unwrap_or_else(|| "recording".to_string());

    let bbb_version = descendant_text(&root, "meta", "bbb-origin-version")
        .and_then(|v| v.split_whitespace().next().map(|s| s.to_string()));

    let date_formatted = Utc
        .timestamp_millis_opt(start_epoch_ms)
        .single()
        .map(|dt| dt.format("%Y-%m-%dT%H-%M-%S").to_string())
        .unwrap_or_else(|| "unknown-date".to_string());

    Ok(Metadata {
        start_epoch_ms,
        date_formatted,
        duration: duration_ms / 1000.0,
        title,
        bbb_version,
    })
}

fn child_text(node: &roxmltree::Node, tag: &str) -> Option<String> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == tag)
        .and_then(|n| n.text())
        .map(|s| s.to_string())
}

fn descendant_text(node: &roxmltree::Node, parent_tag: &str, child_tag: &str) -> Option<String> {
    let parent = node
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name() == parent_tag)?;
    child_text(&parent, child_tag)
}

fn missing(file: &str, what: &str) -> BbbError {
    BbbError::Parse {
        file: file.to_string(),
        reason: format!("missing required element: {what}"),
    }
}

/// Parses `shapes.svg`, returning all slide images and their annotation
/// drawings. `duration` is used only to stamp `has_annotations`-style
/// edge-case clamping performed later by the timeline compiler; this
/// function reports raw (unclamped) values, consistent with the data model
/// invariant that clamping happens when building `Frame`s, not at parse time.
pub fn parse_shapes(svg: &str) -> Result<(Vec<SlideImage>, Vec<Drawing>)> {
    let doc = parse_xml("shapes.svg", svg)?;
    let root = doc.root_element();

    let mut slides = Vec::new();
    for image in root
        .children()
        .filter(|n| n.is_element() && n.tag_name() == (SVG_NS, "image"))
    {
        if image.attribute("class") != Some("slide") {
            continue;
        }
        let element_id = image
            .attribute("id")
            .ok_or_else(|| missing("shapes.svg", "image/@id"))?
            .to_string();
        let numeric_id = numeric_run_re()
            .find(&element_id)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| element_id.clone());
        let ts_in: f64 = attr_f64(&image, "in")?;
        let ts_out: f64 = attr_f64(&image, "out")?;
        let width = attr_f64(&image, "width")? as u32;
        let height = attr_f64(&image, "height")? as u32;
        let href = image
            .attribute((XLINK_NS, "href"))
            .ok_or_else(|| missing("shapes.svg", "image/@xlink:href"))?
            .to_string();

        let has_annotations = root
            .children()
            .any(|g| g.is_element() && g.attribute("image") == Some(element_id.as_str()));

        slides.push(SlideImage {
            element_id,
            numeric_id,
            ts_in,
            ts_out,
            width,
            height,
            href,
            has_annotations,
        });
    }

    let mut drawings = Vec::new();
    for group in root
        .descendants()
        .filter(|n| n.is_element() && n.tag_name() == (SVG_NS, "g") && n.has_attribute("image"))
    {
        for g in group
            .children()
            .filter(|n| n.is_element() && n.has_attribute("timestamp"))
        {
            let element_id = g
                .attribute("id")
                .ok_or_else(|| missing("shapes.svg", "g/@id"))?
                .to_string();
            let shape_id = g.attribute("shape").unwrap_or(&element_id).to_string();
            let ts_in = attr_f64(&g, "timestamp")?;
            let undo = attr_f64(&g, "undo").unwrap_or(-1.0);
            let ts_out = if undo < 0.0 { None } else { Some(undo) };
            drawings.push(Drawing {
                element_id,
                shape_id,
                ts_in,
                ts_out,
            });
        }
    }

    Ok((slides, drawings))
}

fn attr_f64(node: &roxmltree::Node, name: &str) -> Result<f64> {
    node.attribute(name)
        .ok_or_else(|| missing("shapes.svg", name))?
        .parse()
        .with_context(|| format!("attribute {name} is not a number"))
}

pub fn parse_panzooms(xml: &str) -> Result<Vec<PanZoom>> {
    let doc = parse_xml("panzooms.xml", xml)?;
    let mut out = Vec::new();
    for event in doc
        .root_element()
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "event" && n.has_attribute("timestamp"))
    {
        let ts_in = attr_f64(&event, "timestamp")?;
        let raw = child_text(&event, "viewBox")
            .ok_or_else(|| missing("panzooms.xml", "event/viewBox"))?;
        let parts: Vec<f64> = raw
            .split_whitespace()
            .map(|p| p.parse())
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("malformed viewBox: {raw}"))?;
        if parts.len() != 4 {
            anyhow::bail!("viewBox does not have 4 components: {raw}");
        }
        out.push(PanZoom {
            ts_in,
            raw_view_box: raw,
            x: parts[0],
            y: parts[1],
            w: parts[2],
            h: parts[3],
        });
    }
    Ok(out)
}

/// Parses `cursor.xml`. Edge cases from spec §4.B: the first event is forced
/// to `timestamp=0.0`; consecutive events with identical or earlier
/// timestamps are coalesced, keeping the first event's timestamp and
/// payload.
pub fn parse_cursor(xml: &str) -> Result<Vec<CursorEvent>> {
    let doc = parse_xml("cursor.xml", xml)?;
    let mut raw = Vec::new();
    for event in doc
        .root_element()
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "event" && n.has_attribute("timestamp"))
    {
        let ts_in = attr_f64(&event, "timestamp")?;
        let text = child_text(&event, "cursor")
            .ok_or_else(|| missing("cursor.xml", "event/cursor"))?;
        let parts: Vec<f64> = text
            .split_whitespace()
            .map(|p| p.parse())
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("malformed cursor fractions: {text}"))?;
        if parts.len() != 2 {
            anyhow::bail!("cursor event does not have 2 components: {text}");
        }
        raw.push(CursorEvent {
            ts_in,
            x_fraction: parts[0],
            y_fraction: parts[1],
        });
    }

    if raw.is_empty() {
        return Ok(raw);
    }

    // Coalesce on the raw timestamps first, so an out-of-order event is
    // compared against the real preceding timestamp, not the
    // not-yet-applied forced zero.
    let mut coalesced: Vec<CursorEvent> = Vec::with_capacity(raw.len());
    for event in raw {
        match coalesced.last() {
            Some(last) if event.ts_in <= last.ts_in => {
                // Keep the first event's timestamp and payload: drop this one.
            }
            _ => coalesced.push(event),
        }
    }
    coalesced[0].ts_in = 0.0;
    Ok(coalesced)
}

pub fn parse_deskshare(xml: &str, duration: f64) -> Result<Vec<DeskshareEvent>> {
    let doc = parse_xml("deskshare.xml", xml)?;
    let mut out = Vec::new();
    for event in doc
        .root_element()
        .children()
        .filter(|n| n.is_element() && n.tag_name().name() == "event" && n.has_attribute("start_timestamp"))
    {
        let start = attr_f64(&event, "start_timestamp")?;
        let stop = attr_f64(&event, "stop_timestamp")?;
        let width = attr_f64(&event, "video_width")? as u32;
        let height = attr_f64(&event, "video_height")? as u32;
        if start < duration {
            out.push(DeskshareEvent {
                start,
                stop: stop.min(duration),
                width,
                height,
            });
        }
    }
    out.sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_metadata() {
        let xml = r#"<?xml version="1.0"?>
        <recording>
          <start_time>1700000000000</start_time>
          <playback><duration>10000</duration></playback>
          <meta><meetingName>Lecture 1</meetingName><bbb-origin-version>2.7.4 (release)</bbb-origin-version></meta>
        </recording>"#;
        let m = parse_metadata(xml).unwrap();
        assert_eq!(m.duration, 10.0);
        assert_eq!(m.title, "Lecture 1");
        assert_eq!(m.bbb_version.as_deref(), Some("2.7.4"));
    }

    #[test]
    fn parses_single_slide_no_annotations() {
        let svg = format!(
            r#"<svg xmlns="{SVG_NS}" xmlns:xlink="{XLINK_NS}">
              <image class="slide" id="image1" in="0.0" out="10.0" width="640" height="480" xlink:href="presentation/slide1.png" href="presentation/slide1.png" />
            </svg>"#
        );
        let (slides, drawings) = parse_shapes(&svg).unwrap();
        assert_eq!(slides.len(), 1);
        assert!(drawings.is_empty());
        assert_eq!(slides[0].ts_in, 0.0);
        assert_eq!(slides[0].ts_out, 10.0);
        assert!(!slides[0].has_annotations);
    }

    #[test]
    fn parses_annotated_slide() {
        let svg = format!(
            r#"<svg xmlns="{SVG_NS}" xmlns:xlink="{XLINK_NS}">
              <image class="slide" id="image1" in="0" out="5" width="800" height="600" xlink:href="p/s1.png" href="p/s1.png" />
              <g image="image1">
                <g id="draw1" timestamp="2" undo="4" shape="s1" />
              </g>
            </svg>"#
        );
        let (slides, drawings) = parse_shapes(&svg).unwrap();
        assert!(slides[0].has_annotations);
        assert_eq!(drawings.len(), 1);
        assert_eq!(drawings[0].ts_in, 2.0);
        assert_eq!(drawings[0].ts_out, Some(4.0));
    }

    #[test]
    fn cursor_first_event_forced_to_zero_and_coalesced() {
        let xml = r#"<xml>
          <event timestamp="1.0"><cursor>0.1 0.2</cursor></event>
          <event timestamp="0.5"><cursor>0.3 0.4</cursor></event>
          <event timestamp="2.0"><cursor>0.5 0.6</cursor></event>
        </xml>"#;
        let events = parse_cursor(xml).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].ts_in, 0.0);
        assert_eq!(events[0].x_fraction, 0.1);
        assert_eq!(events[1].ts_in, 2.0);
    }

    #[test]
    fn deskshare_drops_events_at_or_past_duration() {
        let xml = r#"<xml>
          <event start_timestamp="10" stop_timestamp="20" video_width="1280" video_height="720" />
          <event start_timestamp="30" stop_timestamp="40" video_width="1280" video_height="720" />
        </xml>"#;
        let events = parse_deskshare(xml, 25.0).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].start, 10.0);
    }
}
