use anyhow::Result;
use bbb_recover::batch::run_batch;
use bbb_recover::cli::Args;
use bbb_recover::error::BbbError;
use bbb_recover::orchestrator::{self, Outcome};
use bbb_recover::{logging, url::RecordingUrl};
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    logging::init(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            let code = e
                .downcast_ref::<BbbError>()
                .map(BbbError::exit_code)
                .unwrap_or(-1);
            ExitCode::from(code.unsigned_abs() as u8)
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let working_dir_root = args
        .working_dir
        .clone()
        .unwrap_or_else(std::env::temp_dir);

    if let Some(batch_file) = &args.batch {
        return run_batch(batch_file, &args, &working_dir_root).await;
    }

    // Validate the URL early so a malformed one is a fast, clear config
    // error rather than surfacing deep inside the fetch phase.
    if let Some(url) = &args.url {
        RecordingUrl::parse(url)?;
    }

    let ctx = args.build_context(&working_dir_root)?;
    match orchestrator::run(&ctx).await? {
        Outcome::Completed(path) => {
            info!(output = %path.display(), "reconstruction complete");
            println!("{}", path.display());
        }
        Outcome::BackedUp(dir) => {
            info!(working_dir = %dir.display(), "backup complete");
            println!("{}", dir.display());
        }
    }
    Ok(())
}
