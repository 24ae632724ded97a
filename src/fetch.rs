//! Artifact Fetcher (component A): concurrent, retry/resume download of a
//! list of relative paths from one base URL into the working directory.

use crate::error::BbbError;
use crate::url::RecordingUrl;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

const MAX_PARALLEL: usize = 5;
const MAX_RETRIES: u32 = 10;
const CHUNK_SIZE: usize = 1_048_576;
const PROGRESS_EVERY_N_CHUNKS: u32 = 10;

pub fn build_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(1800))
        .build()
}

/// One download request: a path relative to the recording's presentation
/// base URL, and whether its absence is fatal to the run.
#[derive(Debug, Clone)]
pub struct FetchJob {
    pub rel_path: String,
    pub essential: bool,
}

/// Downloads every job into `working_dir`, honoring the concurrency bound
/// and per-file retry/resume policy of spec §4.A. Returns one bool per job,
/// true meaning "present on disk by the time this call returns".
#[instrument(skip(client, recording, jobs))]
pub async fn fetch_all(
    client: &Client,
    recording: &RecordingUrl,
    working_dir: &Path,
    jobs: &[FetchJob],
) -> anyhow::Result<Vec<bool>> {
    let semaphore = Arc::new(Semaphore::new(MAX_PARALLEL));
    let mut handles = Vec::with_capacity(jobs.len());

    for job in jobs.iter().cloned() {
        let client = client.clone();
        let recording = recording.clone();
        let working_dir = working_dir.to_path_buf();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            fetch_one(&client, &recording, &working_dir, &job).await
        }));
    }

    let mut results = Vec::with_capacity(handles.len());
    let mut first_essential_failure = None;
    for (job, handle) in jobs.iter().zip(handles) {
        let ok = handle.await.expect("fetch task panicked")?;
        if !ok {
            if job.essential {
                first_essential_failure.get_or_insert_with(|| job.rel_path.clone());
            } else {
                warn!(path = %job.rel_path, "optional artifact unavailable, continuing");
            }
        }
        results.push(ok);
    }

    if let Some(path) = first_essential_failure {
        return Err(BbbError::Essential(format!("failed to fetch {path}")).into());
    }
    Ok(results)
}

async fn fetch_one(
    client: &Client,
    recording: &RecordingUrl,
    working_dir: &Path,
    job: &FetchJob,
) -> anyhow::Result<bool> {
    let dest = working_dir.join(&job.rel_path);
    if dest.exists() {
        debug!(path = %job.rel_path, "already present, skipping download");
        return Ok(true);
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let url = recording.artifact_url(&job.rel_path);
    let mut range_capable: Option<bool> = None;

    for attempt in 1..=MAX_RETRIES {
        let received = tokio::fs::metadata(&dest).await.map(|m| m.len()).unwrap_or(0);

        if attempt == 2 && range_capable.is_none() {
            range_capable = Some(probe_range_support(client, &url).await);
        }

        let mut request = client.get(&url);
        if attempt > 1 {
            if range_capable == Some(true) && received > 0 {
                request = request.header("Range", format!("bytes={received}-"));
            } else if received > 0 {
                tokio::fs::remove_file(&dest).await.ok();
            }
        }

        match request.send().await {
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                if !job.essential {
                    return Ok(false);
                }
                warn!(path = %job.rel_path, attempt, "404 on essential artifact");
                return Ok(false);
            }
            Ok(response) if response.status().is_success() || response.status() == StatusCode::PARTIAL_CONTENT => {
                let append = response.status() == StatusCode::PARTIAL_CONTENT;
                match write_body(&dest, response, append).await {
                    Ok(()) => return Ok(true),
                    Err(e) => warn!(path = %job.rel_path, attempt, error = %e, "write failed, retrying"),
                }
            }
            Ok(response) => {
                warn!(path = %job.rel_path, attempt, status = %response.status(), "non-success response, retrying");
            }
            Err(e) => {
                warn!(path = %job.rel_path, attempt, error = %e, "transport error, retrying");
            }
        }
    }

    Ok(false)
}

async fn probe_range_support(client: &Client, url: &str) -> bool {
    let response = match client.get(url).header("Range", "bytes=0-4").send().await {
        Ok(r) => r,
        Err(_) => return false,
    };
    response.status() == StatusCode::PARTIAL_CONTENT && response.headers().contains_key("content-range")
}

async fn write_body(dest: &Path, response: reqwest::Response, append: bool) -> anyhow::Result<()> {
    let mut file: File = if append {
        OpenOptions::new().append(true).open(dest).await?
    } else {
        File::create(dest).await?
    };

    let mut stream = response.bytes_stream();
    let mut received_in_chunk = 0usize;
    let mut chunk_count: u32 = 0;
    while let Some(next) = stream.next().await {
        let bytes = next?;
        file.write_all(&bytes).await?;
        received_in_chunk += bytes.len();
        if received_in_chunk >= CHUNK_SIZE {
            received_in_chunk = 0;
            chunk_count += 1;
            if chunk_count % PROGRESS_EVERY_N_CHUNKS == 0 {
                info!(chunks = chunk_count, path = %dest.display(), "download progress");
            }
        }
    }
    file.flush().await?;
    Ok(())
}

pub fn essential_jobs() -> Vec<FetchJob> {
    [
        "metadata.xml",
        "shapes.svg",
        "panzooms.xml",
        "cursor.xml",
        "deskshare.xml",
        "captions.json",
        "events.xml",
    ]
    .iter()
    .map(|p| FetchJob {
        rel_path: p.to_string(),
        essential: matches!(*p, "metadata.xml" | "shapes.svg"),
    })
    .collect()
}

/// Tries `<base>.webm` then `<base>.mp4`, returning whichever relative path
/// ended up on disk, or `None` if both are absent.
pub async fn fetch_with_container_fallback(
    client: &Client,
    recording: &RecordingUrl,
    working_dir: &Path,
    base_rel: &str,
    essential: bool,
) -> anyhow::Result<Option<PathBuf>> {
    for ext in ["webm", "mp4"] {
        let rel_path = format!("{base_rel}.{ext}");
        let job = FetchJob {
            rel_path: rel_path.clone(),
            essential: false,
        };
        if fetch_one(client, recording, working_dir, &job).await? {
            return Ok(Some(working_dir.join(rel_path)));
        }
    }
    if essential {
        return Err(BbbError::Essential(format!("{base_rel}.webm/.mp4 unavailable")).into());
    }
    Ok(None)
}
