//! Recording URL parsing (spec §6).
//!
//! `<scheme>://<host>/playback/presentation/<version>/[playback.html?...meetingId=]<id>`

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingUrl {
    pub website: String,
    pub version: String,
    pub id: String,
}

impl RecordingUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let re = valid_url_re();
        let caps = re
            .captures(url)
            .ok_or_else(|| anyhow!("URL does not look like a BBB playback link: {url}"))?;
        Ok(RecordingUrl {
            website: caps["website"].to_string(),
            version: caps["version"].to_string(),
            id: caps["id"].to_string(),
        })
    }

    /// Base URL that artifact paths in spec §6 are resolved against:
    /// `<website>/presentation/<id>/`.
    pub fn presentation_base(&self) -> String {
        format!("{}/presentation/{}", self.website, self.id)
    }

    pub fn artifact_url(&self, rel_path: &str) -> String {
        assert!(
            !rel_path.starts_with('/') && !rel_path.starts_with('\\'),
            "artifact paths must be relative: {rel_path}"
        );
        format!("{}/{}", self.presentation_base(), rel_path)
    }
}

fn valid_url_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(
            r"(?x)
            (?P<website>https?://[^/]+)/playback/presentation/
            (?P<version>[\d.]+)/
            (playback\.html\?.*?meetingId=)?
            (?P<id>[0-9a-f\-]+)
            ",
        )
        .expect("valid URL regex")
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_playback_html_style_url() {
        let url = "https://bbb.example.org/playback/presentation/2.3/playback.html?meetingId=1a2b3c4d-1111-2222-3333-444455556666";
        let parsed = RecordingUrl::parse(url).unwrap();
        assert_eq!(parsed.website, "https://bbb.example.org");
        assert_eq!(parsed.version, "2.3");
        assert_eq!(parsed.id, "1a2b3c4d-1111-2222-3333-444455556666");
    }

    #[test]
    fn parses_bare_id_style_url() {
        let url = "https://bbb.example.org/playback/presentation/2.0/1a2b3c4d-1111-2222-3333-444455556666";
        let parsed = RecordingUrl::parse(url).unwrap();
        assert_eq!(parsed.id, "1a2b3c4d-1111-2222-3333-444455556666");
    }

    #[test]
    fn rejects_unrelated_url() {
        assert!(RecordingUrl::parse("https://example.org/not/a/recording").is_err());
    }

    #[test]
    fn artifact_url_joins_presentation_base() {
        let parsed = RecordingUrl::parse(
            "https://bbb.example.org/playback/presentation/2.0/1a2b3c4d-1111-2222-3333-444455556666",
        )
        .unwrap();
        assert_eq!(
            parsed.artifact_url("metadata.xml"),
            "https://bbb.example.org/presentation/1a2b3c4d-1111-2222-3333-444455556666/metadata.xml"
        );
    }
}
