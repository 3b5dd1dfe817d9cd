//! Streaming sparse image writer.
//!
//! The writer works in two phases. [`SimgWriter::new`] reserves the file
//! header with a zeroed placeholder, chunks are then streamed straight to
//! the sink, and [`SimgWriter::finalize`] seeks back and writes the real
//! header once block and chunk totals are known.
//!
//! Destinations that cannot seek go through [`BufferedSink`], which keeps
//! the whole image in memory and hands it over on commit.

use std::fs::File;
use std::io::{self, BufWriter, Cursor, Read, Seek, SeekFrom, Write};

use tracing::trace;

use crate::image::{SourceImage, READ_BUF_SIZE};
use crate::sparse::{ChunkHeader, SparseHeader, FILE_HEADER_SIZE};
use crate::{Result, SimgError};

/// Output of a sparse writer: seekable so the header can be patched.
pub trait SparseSink: Write + Seek {
    /// Called once after the header has been patched.
    fn commit(&mut self) -> io::Result<()> {
        self.flush()
    }
}

impl SparseSink for File {}

impl<W: Write + Seek> SparseSink for BufWriter<W> {}

impl SparseSink for Cursor<Vec<u8>> {}

impl SparseSink for Cursor<&mut Vec<u8>> {}

/// In-memory sink for destinations without seek support.
#[derive(Debug)]
pub struct BufferedSink<W: Write> {
    buf: Cursor<Vec<u8>>,
    dest: W,
}

impl<W: Write> BufferedSink<W> {
    pub fn new(dest: W) -> Self {
        Self {
            buf: Cursor::new(Vec::new()),
            dest,
        }
    }

    pub fn into_inner(self) -> W {
        self.dest
    }
}

impl<W: Write> Write for BufferedSink<W> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> Seek for BufferedSink<W> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.buf.seek(pos)
    }
}

impl<W: Write> SparseSink for BufferedSink<W> {
    fn commit(&mut self) -> io::Result<()> {
        self.dest.write_all(self.buf.get_ref())?;
        self.dest.flush()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// Header reserved, no chunk written yet.
    Idle,
    Streaming,
    /// Header written; the writer accepts nothing further.
    Finalized,
}

pub struct SimgWriter<R, S> {
    source: SourceImage<R>,
    sink: S,
    block_size: u32,
    header_pos: u64,
    total_blocks: u32,
    total_chunks: u32,
    bytes_written: u64,
    state: WriterState,
    buf: Vec<u8>,
}

impl<R: Read + Seek, S: SparseSink> SimgWriter<R, S> {
    /// Reserve the header region at the sink's current position.
    pub fn new(source: SourceImage<R>, mut sink: S, block_size: u32) -> Result<Self> {
        if block_size == 0 || block_size % 4 != 0 {
            return Err(SimgError::Format(format!(
                "block size {block_size} is not a non-zero multiple of 4"
            )));
        }
        let header_pos = sink.stream_position()?;
        sink.write_all(&[0u8; FILE_HEADER_SIZE])?;
        Ok(Self {
            source,
            sink,
            block_size,
            header_pos,
            total_blocks: 0,
            total_chunks: 0,
            bytes_written: FILE_HEADER_SIZE as u64,
            state: WriterState::Idle,
            buf: Vec::new(),
        })
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    /// Output blocks emitted so far; the next chunk starts here.
    pub fn cursor(&self) -> u64 {
        u64::from(self.total_blocks)
    }

    pub fn chunk_count(&self) -> u32 {
        self.total_chunks
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn state(&self) -> WriterState {
        self.state
    }

    pub fn source_mut(&mut self) -> &mut SourceImage<R> {
        &mut self.source
    }

    /// Emit a don't-care chunk covering `length_bytes`.
    pub fn add_dont_care_chunk(&mut self, length_bytes: u64) -> Result<()> {
        let blocks = self.chunk_blocks(length_bytes)?;
        let header = ChunkHeader::dont_care(blocks);
        self.sink.write_all(&header.encode())?;
        trace!(start = self.cursor(), blocks, "dont-care chunk");
        self.account(&header)
    }

    /// Emit a raw chunk with `length_bytes` read from the source image at
    /// `source_offset`. The caller is responsible for having verified the
    /// enclosing range.
    pub fn add_data_chunk(&mut self, source_offset: u64, length_bytes: u64) -> Result<()> {
        self.check_aligned("source offset", source_offset)?;
        let blocks = self.chunk_blocks(length_bytes)?;
        let header = ChunkHeader::raw(blocks, self.block_size).ok_or_else(|| {
            SimgError::Format(format!(
                "raw chunk of {blocks} blocks does not fit the chunk size field"
            ))
        })?;
        // Only the final partial block may extend past the image; anything
        // beyond its block-rounded size does not exist in the source.
        let image_end = self
            .source
            .image_size()
            .div_ceil(u64::from(self.block_size))
            .saturating_mul(u64::from(self.block_size));
        let end = source_offset
            .checked_add(length_bytes)
            .filter(|&end| end <= image_end)
            .ok_or(SimgError::ShortRead {
                offset: source_offset,
                wanted: length_bytes,
                got: image_end.saturating_sub(source_offset).min(length_bytes),
            })?;
        self.sink.write_all(&header.encode())?;

        if self.buf.is_empty() {
            self.buf = vec![0u8; READ_BUF_SIZE];
        }
        let mut offset = source_offset;
        while offset < end {
            let len = (end - offset).min(self.buf.len() as u64) as usize;
            self.source.read_padded(offset, &mut self.buf[..len])?;
            self.sink.write_all(&self.buf[..len])?;
            offset += len as u64;
        }
        trace!(start = self.cursor(), blocks, source_offset, "raw chunk");
        self.account(&header)
    }

    /// Patch the header with the final totals and commit the sink.
    pub fn finalize(&mut self) -> Result<SparseHeader> {
        if self.state == WriterState::Finalized {
            return Err(SimgError::WriterFinalized);
        }
        let header = SparseHeader::new(self.block_size, self.total_blocks, self.total_chunks);
        let end = self.sink.stream_position()?;
        self.sink.seek(SeekFrom::Start(self.header_pos))?;
        self.sink.write_all(&header.encode())?;
        self.sink.seek(SeekFrom::Start(end))?;
        self.sink.commit()?;
        self.state = WriterState::Finalized;
        Ok(header)
    }

    /// Give back the sink. Only meaningful after [`finalize`](Self::finalize).
    pub fn into_sink(self) -> S {
        self.sink
    }

    fn check_aligned(&self, what: &'static str, value: u64) -> Result<()> {
        if value % u64::from(self.block_size) != 0 {
            return Err(SimgError::Unaligned {
                what,
                value,
                block_size: self.block_size,
            });
        }
        Ok(())
    }

    fn chunk_blocks(&self, length_bytes: u64) -> Result<u32> {
        if self.state == WriterState::Finalized {
            return Err(SimgError::WriterFinalized);
        }
        self.check_aligned("chunk length", length_bytes)?;
        let blocks = length_bytes / u64::from(self.block_size);
        if blocks == 0 {
            return Err(SimgError::Format("empty chunk".into()));
        }
        u32::try_from(blocks)
            .map_err(|_| SimgError::Format(format!("chunk of {blocks} blocks is too large")))
    }

    fn account(&mut self, header: &ChunkHeader) -> Result<()> {
        let too_large = || SimgError::Format("image too large for the sparse format".into());
        self.total_blocks = self
            .total_blocks
            .checked_add(header.blocks)
            .ok_or_else(too_large)?;
        self.total_chunks = self.total_chunks.checked_add(1).ok_or_else(too_large)?;
        self.bytes_written += u64::from(header.total_size);
        self.state = WriterState::Streaming;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparse::{decode_image, ChunkType};

    fn writer(data: Vec<u8>) -> SimgWriter<Cursor<Vec<u8>>, Cursor<Vec<u8>>> {
        let len = data.len() as u64;
        SimgWriter::new(
            SourceImage::new(Cursor::new(data), len),
            Cursor::new(Vec::new()),
            4,
        )
        .unwrap()
    }

    #[test]
    fn state_machine() {
        let mut w = writer(vec![1u8; 16]);
        assert_eq!(w.state(), WriterState::Idle);
        w.add_dont_care_chunk(8).unwrap();
        assert_eq!(w.state(), WriterState::Streaming);
        w.add_data_chunk(8, 8).unwrap();
        let header = w.finalize().unwrap();
        assert_eq!(header.total_blocks, 4);
        assert_eq!(header.total_chunks, 2);
        assert_eq!(w.state(), WriterState::Finalized);
        assert!(matches!(w.finalize(), Err(SimgError::WriterFinalized)));
        assert!(matches!(w.add_dont_care_chunk(4), Err(SimgError::WriterFinalized)));
        assert!(matches!(w.add_data_chunk(0, 4), Err(SimgError::WriterFinalized)));
    }

    #[test]
    fn output_decodes() {
        let data: Vec<u8> = (0u8..16).collect();
        let mut w = writer(data);
        w.add_data_chunk(0, 8).unwrap();
        w.add_dont_care_chunk(8).unwrap();
        w.finalize().unwrap();
        let written = w.bytes_written();
        let out = w.into_sink().into_inner();
        assert_eq!(out.len() as u64, written);
        let image = decode_image(&out).unwrap();
        assert_eq!(image.header.total_chunks, 2);
        assert_eq!(image.chunks[0].header.chunk_type, ChunkType::Raw);
        let body = image.chunks[0].body_offset;
        assert_eq!(&out[body..body + 8], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(image.chunks[1].header.chunk_type, ChunkType::DontCare);
    }

    #[test]
    fn unaligned_requests_rejected() {
        let mut w = writer(vec![0u8; 16]);
        assert!(matches!(
            w.add_dont_care_chunk(6),
            Err(SimgError::Unaligned { what: "chunk length", .. })
        ));
        assert!(matches!(
            w.add_data_chunk(2, 4),
            Err(SimgError::Unaligned { what: "source offset", .. })
        ));
        assert!(matches!(w.add_dont_care_chunk(0), Err(SimgError::Format(_))));
        assert_eq!(w.chunk_count(), 0);
    }

    #[test]
    fn short_source_surfaces() {
        let mut w = SimgWriter::new(
            SourceImage::new(Cursor::new(vec![0u8; 4]), 16),
            Cursor::new(Vec::new()),
            4,
        )
        .unwrap();
        assert!(matches!(
            w.add_data_chunk(0, 16),
            Err(SimgError::ShortRead { .. })
        ));
    }

    #[test]
    fn reads_past_image_end_rejected() {
        let mut w = writer(vec![7u8; 16]);
        assert!(matches!(
            w.add_data_chunk(64, 16),
            Err(SimgError::ShortRead { offset: 64, wanted: 16, got: 0 })
        ));
        assert!(matches!(
            w.add_data_chunk(8, 16),
            Err(SimgError::ShortRead { offset: 8, wanted: 16, got: 8 })
        ));
        assert!(matches!(
            w.add_data_chunk(u64::MAX - 3, 4),
            Err(SimgError::ShortRead { .. })
        ));
        assert_eq!(w.chunk_count(), 0);
        assert_eq!(w.bytes_written(), FILE_HEADER_SIZE as u64);
        let out = w.into_sink().into_inner();
        assert_eq!(out.len(), FILE_HEADER_SIZE);
    }

    #[test]
    fn partial_final_block_is_zero_padded() {
        let mut w = SimgWriter::new(
            SourceImage::new(Cursor::new(vec![0xAB; 6]), 6),
            Cursor::new(Vec::new()),
            4,
        )
        .unwrap();
        w.add_data_chunk(0, 8).unwrap();
        w.finalize().unwrap();
        let out = w.into_sink().into_inner();
        let image = decode_image(&out).unwrap();
        let body = image.chunks[0].body_offset;
        assert_eq!(&out[body..body + 8], &[0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0xAB, 0, 0]);
    }

    #[test]
    fn buffered_sink_commits_on_finalize() {
        let mut dest = Vec::new();
        {
            let sink = BufferedSink::new(&mut dest);
            let mut w = SimgWriter::new(SourceImage::new(Cursor::new(vec![5u8; 8]), 8), sink, 4)
                .unwrap();
            w.add_data_chunk(0, 8).unwrap();
            w.finalize().unwrap();
        }
        let image = decode_image(&dest).unwrap();
        assert_eq!(image.header.total_blocks, 2);
        assert_eq!(image.chunks.len(), 1);
    }

    #[test]
    fn header_reserved_at_current_position() {
        let mut prefix = Cursor::new(b"PREFIX".to_vec());
        prefix.seek(SeekFrom::End(0)).unwrap();
        let mut w = SimgWriter::new(SourceImage::new(Cursor::new(vec![1u8; 4]), 4), prefix, 4)
            .unwrap();
        w.add_data_chunk(0, 4).unwrap();
        w.finalize().unwrap();
        let out = w.into_sink().into_inner();
        assert_eq!(&out[..6], b"PREFIX");
        let image = decode_image(&out[6..]).unwrap();
        assert_eq!(image.header.total_chunks, 1);
    }
}
