use std::error::Error as _;
use std::path::{Path, PathBuf};

use bmap2simg::config::DEFAULT_BATCH_BYTES;
use bmap2simg::io_utils::{simg_cli_error, simple_cli_error, CliError};
use bmap2simg::{convert_files, Config, LogContext, Verbosity};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::error;

/// Create an Android sparse image (.simg) from a block mapped image and its
/// block map file (.bmap).
#[derive(Parser)]
#[command(name = "bmap2simg", version)]
struct Args {
    /// Be quiet
    #[arg(short, long)]
    quiet: bool,
    /// Print debugging information
    #[arg(short, long)]
    debug: bool,
    /// Largest raw chunk payload in bytes, rounded down to whole blocks
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BATCH_BYTES)]
    batch_size: u64,
    /// Do not cover blocks after the last mapped range
    #[arg(long)]
    no_trailing_gap: bool,
    /// Print a JSON summary on standard output
    #[arg(long)]
    json: bool,
    /// The block mapped image (e.g. .wic, .img, .ext4)
    image: PathBuf,
    /// The block map file (.bmap) generated by bmaptools for the image
    bmap: PathBuf,
    /// The sparse image to create, or '-' for standard output
    output: PathBuf,
}

fn main() {
    let args = Args::parse();
    let log = LogContext::new(Verbosity::from_flags(args.quiet, args.debug));
    if let Err(e) = run(&args, &log) {
        log.run(|| {
            error!("{e}");
            if log.verbosity() == Verbosity::Debug {
                let mut cause = e.source();
                while let Some(err) = cause {
                    error!("caused by: {err}");
                    cause = err.source();
                }
            }
        });
        std::process::exit(1);
    }
}

fn run(args: &Args, log: &LogContext) -> Result<(), CliError> {
    let to_stdout = args.output == Path::new("-");
    if args.json && to_stdout {
        return Err(simple_cli_error(
            "--json cannot be combined with writing the image to standard output",
        ));
    }

    let config = Config {
        max_batch_bytes: args.batch_size,
        trailing_gap: !args.no_trailing_gap,
    };

    let progress = if args.quiet || args.json || to_stdout {
        ProgressBar::hidden()
    } else {
        let style = ProgressStyle::with_template("{bar:40} {pos}/{len} blocks ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        ProgressBar::new(0).with_style(style)
    };

    let summary = convert_files(&args.image, &args.bmap, &args.output, &config, log, progress)
        .map_err(|e| simg_cli_error("conversion failed", e))?;

    if args.json {
        let text = serde_json::to_string_pretty(&summary)
            .map_err(|e| simple_cli_error(&format!("failed to encode summary: {e}")))?;
        println!("{text}");
    }
    Ok(())
}
