//! Block map to sparse image conversion.

use std::fs::File;
use std::io::{self, BufWriter, Read, Seek};
use std::path::Path;

use indicatif::ProgressBar;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bmap::Bmap;
use crate::checksum::verify_range;
use crate::config::Config;
use crate::image::SourceImage;
use crate::io_utils::io_error;
use crate::logging::LogContext;
use crate::writer::{BufferedSink, SimgWriter, SparseSink};
use crate::{Result, SimgError};

/// Outcome of a successful conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub block_size: u32,
    /// Blocks in the source image according to the block map.
    pub total_blocks: u64,
    /// Blocks covered by the sparse image.
    pub output_blocks: u64,
    pub mapped_blocks: u64,
    pub chunks: u32,
    pub raw_chunks: u32,
    pub dont_care_chunks: u32,
    pub ranges_verified: usize,
    pub bytes_written: u64,
}

/// Drives one conversion: gaps, checksum verification, data chunks and the
/// final header.
pub struct Converter<'a> {
    bmap: &'a Bmap,
    config: Config,
    progress: ProgressBar,
}

impl<'a> Converter<'a> {
    pub fn new(bmap: &'a Bmap, config: Config) -> Result<Self> {
        config.validate()?;
        if bmap.total_blocks() > u64::from(u32::MAX) {
            return Err(SimgError::Format(format!(
                "{} blocks exceed what a sparse image can describe",
                bmap.total_blocks()
            )));
        }
        Ok(Self {
            bmap,
            config,
            progress: ProgressBar::hidden(),
        })
    }

    /// Report mapped blocks copied on `progress`.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    pub fn run<R, S>(&self, source: SourceImage<R>, sink: S) -> Result<Summary>
    where
        R: Read + Seek,
        S: SparseSink,
    {
        let bmap = self.bmap;
        let block_size = bmap.block_size();
        let bs = u64::from(block_size);
        let cap = self.config.batch_blocks(block_size);
        let mapped: u64 = bmap.ranges().map(|r| r.block_count()).sum();

        let mut writer = SimgWriter::new(source, sink, block_size)?;
        let mut summary = Summary {
            block_size,
            total_blocks: bmap.total_blocks(),
            mapped_blocks: mapped,
            ..Summary::default()
        };
        self.progress.set_length(mapped);

        let mut cursor = 0u64;
        for range in bmap.ranges() {
            debug!(
                start = range.first_block(),
                end = range.last_block(),
                checksum = range.checksum(),
                "range"
            );
            verify_range(writer.source_mut(), range, block_size, bmap.checksum_type())?;
            summary.ranges_verified += 1;

            for batch in bmap.batches(range, cap) {
                if batch.start > cursor {
                    writer.add_dont_care_chunk((batch.start - cursor) * bs)?;
                    summary.dont_care_chunks += 1;
                }
                debug!(start = batch.start, end = batch.end, length = batch.len, "batch");
                writer.add_data_chunk(batch.start * bs, batch.len * bs)?;
                summary.raw_chunks += 1;
                cursor = batch.end + 1;
                self.progress.inc(batch.len);
            }
        }

        if cursor < bmap.total_blocks() {
            if self.config.trailing_gap {
                writer.add_dont_care_chunk((bmap.total_blocks() - cursor) * bs)?;
                summary.dont_care_chunks += 1;
            } else {
                debug!(
                    blocks = bmap.total_blocks() - cursor,
                    "leaving trailing unmapped blocks out of the image"
                );
            }
        }

        let header = writer.finalize()?;
        self.progress.finish_and_clear();

        summary.output_blocks = u64::from(header.total_blocks);
        summary.chunks = header.total_chunks;
        summary.bytes_written = writer.bytes_written();
        info!(
            chunks = summary.chunks,
            blocks = summary.output_blocks,
            bytes = summary.bytes_written,
            "sparse image written"
        );
        Ok(summary)
    }
}

/// Convert `image` described by `bmap` into a sparse image at `output`.
///
/// `-` as the output writes to standard output; the image is then buffered
/// in memory because the header can only be written once it is complete.
pub fn convert_files(
    image: &Path,
    bmap: &Path,
    output: &Path,
    config: &Config,
    log: &LogContext,
    progress: ProgressBar,
) -> Result<Summary> {
    log.run(|| {
        let map = Bmap::load(bmap).map_err(|e| match e {
            SimgError::Io(err) => SimgError::Io(io_error("reading bmap file", bmap, err)),
            other => other,
        })?;
        info!(
            image = %image.display(),
            blocks = map.total_blocks(),
            mapped = map.mapped_blocks(),
            "converting"
        );

        let file = File::open(image).map_err(|e| io_error("opening image", image, e))?;
        let actual = file
            .metadata()
            .map_err(|e| io_error("reading metadata of", image, e))?
            .len();
        if actual != map.image_size() {
            warn!(
                actual,
                expected = map.image_size(),
                "image size differs from the block map"
            );
        }
        let source = SourceImage::new(file, map.image_size());
        let converter = Converter::new(&map, config.clone())?.with_progress(progress);

        if output == Path::new("-") {
            converter.run(source, BufferedSink::new(io::stdout().lock()))
        } else {
            let out = File::create(output).map_err(|e| io_error("creating output", output, e))?;
            converter.run(source, BufWriter::new(out))
        }
    })
}
