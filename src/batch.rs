//! Batch driver (ambient, spec §6): reads a newline-separated list of
//! recording URLs and invokes the core orchestrator once per line,
//! appending each URL to `successful.txt` or `failed.txt`.

use crate::cli::Args;
use crate::orchestrator::{self, Outcome};
use anyhow::Result;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{error, info};

pub async fn run_batch(list_file: &Path, args: &Args, working_dir_root: &Path) -> Result<()> {
    let output_dir = args.output_dir.clone().unwrap_or_else(|| Path::new(".").to_path_buf());
    tokio::fs::create_dir_all(&output_dir).await?;

    let contents = tokio::fs::read_to_string(list_file).await?;
    let urls: Vec<&str> = contents.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let mut successful = Vec::new();
    let mut failed = Vec::new();

    for url in urls {
        info!(url, "processing batch entry");
        let mut entry_args = args.clone();
        entry_args.url = Some(url.to_string());
        entry_args.batch = None;

        match entry_args.build_context(working_dir_root) {
            Ok(ctx) => match orchestrator::run(&ctx).await {
                Ok(Outcome::Completed(path)) => {
                    info!(url, output = %path.display(), "batch entry completed");
                    successful.push(url.to_string());
                }
                Ok(Outcome::BackedUp(dir)) => {
                    info!(url, working_dir = %dir.display(), "batch entry backed up");
                    successful.push(url.to_string());
                }
                Err(e) => {
                    error!(url, error = %e, "batch entry failed");
                    failed.push(url.to_string());
                }
            },
            Err(e) => {
                error!(url, error = %e, "batch entry rejected");
                failed.push(url.to_string());
            }
        }
    }

    append_lines(&output_dir.join("successful.txt"), &successful).await?;
    append_lines(&output_dir.join("failed.txt"), &failed).await?;

    Ok(())
}

async fn append_lines(path: &Path, lines: &[String]) -> Result<()> {
    if lines.is_empty() {
        return Ok(());
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    for line in lines {
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
    }
    Ok(())
}
