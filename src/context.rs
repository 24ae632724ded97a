//! Per-run `Context`, threaded through components instead of the global
//! mutable "source dir" / "meeting id" constants the original used (spec
//! §9's redesign note).

use crate::url::RecordingUrl;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Context {
    pub recording: RecordingUrl,
    /// `<working-dir-root>/<hash-of-id>`
    pub working_dir: PathBuf,
    /// Directory the final video is written to.
    pub output_dir: PathBuf,
    /// Explicit output filename; `None` means derive one from the recording's
    /// date and title.
    pub output_filename: Option<String>,
    pub skip_webcam: bool,
    pub skip_webcam_freeze_detection: bool,
    pub skip_annotations: bool,
    pub skip_cursor: bool,
    pub keep_tmp_files: bool,
    pub backup: bool,
    pub max_parallel_chromes: usize,
    pub force_width: Option<u32>,
    pub force_height: Option<u32>,
    pub encoder: String,
    pub audiocodec: String,
    pub preset: String,
    pub crf: Option<u32>,
}

impl Context {
    pub fn new(recording: RecordingUrl, working_dir_root: &Path) -> Self {
        let hash = stable_hash(&recording.id);
        Context {
            working_dir: working_dir_root.join(hash),
            output_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            output_filename: None,
            recording,
            skip_webcam: false,
            skip_webcam_freeze_detection: false,
            skip_annotations: false,
            skip_cursor: false,
            keep_tmp_files: false,
            backup: false,
            max_parallel_chromes: 10,
            force_width: None,
            force_height: None,
            encoder: "libx264".to_string(),
            audiocodec: "copy".to_string(),
            preset: "fast".to_string(),
            crf: None,
        }
    }

    pub fn path_in(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.working_dir.join(rel.as_ref())
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.path_in("frames")
    }
}

/// A stable (non-cryptographic) hash of the recording id, used only to name
/// a working-directory subfolder. Collision risk is a theoretical concern,
/// not a security boundary, so `DefaultHasher` is used instead of pulling in
/// an MD5 crate solely to match the original implementation's digest choice
/// (see DESIGN.md).
fn stable_hash(id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
