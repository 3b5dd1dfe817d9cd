//! Print the header and chunk list of an Android sparse image.
//!
//! Output is one header line followed by one line per chunk:
//!
//! ```text
//! block_size=4096 total_blocks=10 total_chunks=3 version=1.0
//! #0 dont-care start=0 blocks=2 size=12
//! #1 raw start=2 blocks=4 size=16396
//! ```

use clap::Parser;
use std::fs;
use std::path::PathBuf;
use bmap2simg::io_utils::{io_cli_error, simg_cli_error};
use bmap2simg::sparse::decode_image;

#[derive(Parser)]
struct Args {
    /// Sparse image to inspect
    input: PathBuf,
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let data =
        fs::read(&args.input).map_err(|e| io_cli_error("reading sparse image", &args.input, e))?;
    let image = decode_image(&data).map_err(|e| simg_cli_error("decoding failed", e))?;
    let h = image.header;
    println!(
        "block_size={} total_blocks={} total_chunks={} version={}.{}",
        h.block_size, h.total_blocks, h.total_chunks, h.major_version, h.minor_version
    );
    for (i, chunk) in image.chunks.iter().enumerate() {
        println!(
            "#{} {} start={} blocks={} size={}",
            i,
            chunk.header.chunk_type.name(),
            chunk.start_block,
            chunk.header.blocks,
            chunk.header.total_size
        );
    }
    if image.covered_blocks() != u64::from(h.total_blocks) {
        eprintln!(
            "warning: chunks cover {} blocks, header declares {}",
            image.covered_blocks(),
            h.total_blocks
        );
    }
    Ok(())
}
