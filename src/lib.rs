//! Convert a block-mapped image and its `.bmap` file into an Android sparse
//! image.
//!
//! The block map lists which block ranges of the image carry data and a
//! digest for each range. Mapped ranges become raw chunks, everything else
//! becomes don't-care chunks, and every range is checked against its digest
//! before any of its bytes reach the output.
//!
//! ```no_run
//! use std::fs::File;
//! use bmap2simg::{Bmap, Config, Converter, SourceImage};
//!
//! # fn main() -> bmap2simg::Result<()> {
//! let bmap = Bmap::load("disk.img.bmap")?;
//! let source = SourceImage::new(File::open("disk.img")?, bmap.image_size());
//! let summary = Converter::new(&bmap, Config::default())?
//!     .run(source, File::create("disk.simg")?)?;
//! println!("{} chunks", summary.chunks);
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod bmap;
pub mod checksum;
pub mod config;
pub mod convert;
pub mod error;
pub mod image;
pub mod io_utils;
pub mod logging;
pub mod sparse;
pub mod writer;
mod xml;

pub use batch::{Batch, Batches};
pub use bmap::{BlockRange, Bmap, Span};
pub use checksum::{verify_range, ChecksumType};
pub use config::Config;
pub use convert::{convert_files, Converter, Summary};
pub use error::{Result, SimgError};
pub use image::SourceImage;
pub use logging::{LogContext, Verbosity};
pub use sparse::{ChunkHeader, ChunkType, SparseHeader, SparseImage};
pub use writer::{BufferedSink, SimgWriter, SparseSink, WriterState};
