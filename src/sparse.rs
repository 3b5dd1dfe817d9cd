//! Android sparse image layout.
//!
//! All integers are little endian. A file is a 28-byte [`SparseHeader`]
//! followed by `total_chunks` chunks, each a 12-byte [`ChunkHeader`] and an
//! optional body:
//!
//! ```text
//! file header:  magic(4) major(2) minor(2) file_hdr_sz(2) chunk_hdr_sz(2)
//!               blk_sz(4) total_blks(4) total_chunks(4) image_checksum(4)
//! chunk header: chunk_type(2) reserved(2) chunk_sz(4) total_sz(4)
//! ```
//!
//! `chunk_sz` counts output blocks, `total_sz` counts bytes including the
//! chunk header. Raw chunks carry `chunk_sz * blk_sz` bytes, fill and crc32
//! chunks carry 4 bytes, don't-care chunks carry nothing.

use bytemuck::{Pod, Zeroable};

use crate::{Result, SimgError};

pub const SPARSE_MAGIC: u32 = 0xed26_ff3a;
pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;
pub const FILE_HEADER_SIZE: usize = 28;
pub const CHUNK_HEADER_SIZE: usize = 12;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawFileHeader {
    magic: u32,
    major_version: u16,
    minor_version: u16,
    file_hdr_sz: u16,
    chunk_hdr_sz: u16,
    blk_sz: u32,
    total_blks: u32,
    total_chunks: u32,
    image_checksum: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct RawChunkHeader {
    chunk_type: u16,
    reserved: u16,
    chunk_sz: u32,
    total_sz: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    Raw,
    Fill,
    DontCare,
    Crc32,
}

impl ChunkType {
    pub fn code(self) -> u16 {
        match self {
            ChunkType::Raw => 0xcac1,
            ChunkType::Fill => 0xcac2,
            ChunkType::DontCare => 0xcac3,
            ChunkType::Crc32 => 0xcac4,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0xcac1 => Some(ChunkType::Raw),
            0xcac2 => Some(ChunkType::Fill),
            0xcac3 => Some(ChunkType::DontCare),
            0xcac4 => Some(ChunkType::Crc32),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChunkType::Raw => "raw",
            ChunkType::Fill => "fill",
            ChunkType::DontCare => "dont-care",
            ChunkType::Crc32 => "crc32",
        }
    }
}

/// Decoded sparse file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SparseHeader {
    pub major_version: u16,
    pub minor_version: u16,
    pub block_size: u32,
    pub total_blocks: u32,
    pub total_chunks: u32,
    pub image_checksum: u32,
}

impl SparseHeader {
    pub fn new(block_size: u32, total_blocks: u32, total_chunks: u32) -> Self {
        Self {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            block_size,
            total_blocks,
            total_chunks,
            image_checksum: 0,
        }
    }

    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let raw = RawFileHeader {
            magic: SPARSE_MAGIC.to_le(),
            major_version: self.major_version.to_le(),
            minor_version: self.minor_version.to_le(),
            file_hdr_sz: (FILE_HEADER_SIZE as u16).to_le(),
            chunk_hdr_sz: (CHUNK_HEADER_SIZE as u16).to_le(),
            blk_sz: self.block_size.to_le(),
            total_blks: self.total_blocks.to_le(),
            total_chunks: self.total_chunks.to_le(),
            image_checksum: self.image_checksum.to_le(),
        };
        let mut out = [0u8; FILE_HEADER_SIZE];
        out.copy_from_slice(bytemuck::bytes_of(&raw));
        out
    }

    /// Decode and validate a header. Returns the header followed by the
    /// declared file header and chunk header sizes.
    pub fn decode(data: &[u8]) -> Result<(Self, usize, usize)> {
        if data.len() < FILE_HEADER_SIZE {
            return Err(sparse_err("file shorter than sparse header"));
        }
        let raw: RawFileHeader = bytemuck::pod_read_unaligned(&data[..FILE_HEADER_SIZE]);
        let magic = u32::from_le(raw.magic);
        if magic != SPARSE_MAGIC {
            return Err(sparse_err(format!("invalid magic {magic:#010x}")));
        }
        let major = u16::from_le(raw.major_version);
        if major != MAJOR_VERSION {
            return Err(sparse_err(format!("unsupported major version {major}")));
        }
        let file_hdr_sz = u16::from_le(raw.file_hdr_sz) as usize;
        let chunk_hdr_sz = u16::from_le(raw.chunk_hdr_sz) as usize;
        if file_hdr_sz < FILE_HEADER_SIZE || chunk_hdr_sz < CHUNK_HEADER_SIZE {
            return Err(sparse_err(format!(
                "header sizes {file_hdr_sz}/{chunk_hdr_sz} too small"
            )));
        }
        let block_size = u32::from_le(raw.blk_sz);
        if block_size == 0 || block_size % 4 != 0 {
            return Err(sparse_err(format!("invalid block size {block_size}")));
        }
        let header = Self {
            major_version: major,
            minor_version: u16::from_le(raw.minor_version),
            block_size,
            total_blocks: u32::from_le(raw.total_blks),
            total_chunks: u32::from_le(raw.total_chunks),
            image_checksum: u32::from_le(raw.image_checksum),
        };
        Ok((header, file_hdr_sz, chunk_hdr_sz))
    }
}

/// Decoded chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk_type: ChunkType,
    /// Output blocks covered by this chunk.
    pub blocks: u32,
    /// Chunk header plus body, in bytes.
    pub total_size: u32,
}

impl ChunkHeader {
    pub fn dont_care(blocks: u32) -> Self {
        Self {
            chunk_type: ChunkType::DontCare,
            blocks,
            total_size: CHUNK_HEADER_SIZE as u32,
        }
    }

    /// Raw chunk header; `None` if the body does not fit the size field.
    pub fn raw(blocks: u32, block_size: u32) -> Option<Self> {
        let body = blocks.checked_mul(block_size)?;
        let total_size = body.checked_add(CHUNK_HEADER_SIZE as u32)?;
        Some(Self {
            chunk_type: ChunkType::Raw,
            blocks,
            total_size,
        })
    }

    pub fn body_size(&self) -> u32 {
        self.total_size.saturating_sub(CHUNK_HEADER_SIZE as u32)
    }

    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        let raw = RawChunkHeader {
            chunk_type: self.chunk_type.code().to_le(),
            reserved: 0,
            chunk_sz: self.blocks.to_le(),
            total_sz: self.total_size.to_le(),
        };
        let mut out = [0u8; CHUNK_HEADER_SIZE];
        out.copy_from_slice(bytemuck::bytes_of(&raw));
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < CHUNK_HEADER_SIZE {
            return Err(sparse_err("truncated chunk header"));
        }
        let raw: RawChunkHeader = bytemuck::pod_read_unaligned(&data[..CHUNK_HEADER_SIZE]);
        let code = u16::from_le(raw.chunk_type);
        let chunk_type = ChunkType::from_code(code)
            .ok_or_else(|| sparse_err(format!("invalid chunk type {code:#06x}")))?;
        Ok(Self {
            chunk_type,
            blocks: u32::from_le(raw.chunk_sz),
            total_size: u32::from_le(raw.total_sz),
        })
    }
}

/// One chunk located within a decoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub header: ChunkHeader,
    /// First output block covered by the chunk.
    pub start_block: u64,
    /// Offset of the chunk body within the file.
    pub body_offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SparseImage {
    pub header: SparseHeader,
    pub chunks: Vec<ChunkInfo>,
}

impl SparseImage {
    /// Sum of the block counts of all chunks.
    pub fn covered_blocks(&self) -> u64 {
        self.chunks.iter().map(|c| u64::from(c.header.blocks)).sum()
    }
}

/// Walk a complete sparse image held in memory and validate chunk sizes.
pub fn decode_image(data: &[u8]) -> Result<SparseImage> {
    let (header, file_hdr_sz, chunk_hdr_sz) = SparseHeader::decode(data)?;
    let mut offset = file_hdr_sz;
    let mut start_block = 0u64;
    let mut chunks = Vec::new();

    for index in 0..header.total_chunks {
        let chunk_data = data
            .get(offset..)
            .ok_or_else(|| sparse_err(format!("chunk #{index} starts past end of file")))?;
        let chunk = ChunkHeader::decode(chunk_data)?;
        let body = match chunk.chunk_type {
            ChunkType::Raw => u64::from(chunk.blocks) * u64::from(header.block_size),
            ChunkType::Fill | ChunkType::Crc32 => 4,
            ChunkType::DontCare => 0,
        };
        let expected = body + chunk_hdr_sz as u64;
        if u64::from(chunk.total_size) != expected {
            return Err(sparse_err(format!(
                "chunk #{index}: total size {} but expected {expected}",
                chunk.total_size
            )));
        }
        let end = offset as u64 + expected;
        if end > data.len() as u64 {
            return Err(sparse_err(format!("chunk #{index} is truncated")));
        }
        chunks.push(ChunkInfo {
            header: chunk,
            start_block,
            body_offset: offset + chunk_hdr_sz,
        });
        start_block += u64::from(chunk.blocks);
        if start_block > u64::from(header.total_blocks) {
            return Err(sparse_err(format!(
                "chunk #{index} ends at block {start_block}, past total {}",
                header.total_blocks
            )));
        }
        offset = end as usize;
    }

    Ok(SparseImage { header, chunks })
}

fn sparse_err(msg: impl Into<String>) -> SimgError {
    SimgError::SparseFormat(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let bytes = SparseHeader::new(4096, 10, 3).encode();
        assert_eq!(&bytes[0..4], &[0x3a, 0xff, 0x26, 0xed]);
        assert_eq!(&bytes[4..8], &[1, 0, 0, 0]);
        assert_eq!(&bytes[8..12], &[28, 0, 12, 0]);
        assert_eq!(&bytes[12..16], &4096u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &10u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &3u32.to_le_bytes());
        assert_eq!(&bytes[24..28], &[0, 0, 0, 0]);
    }

    #[test]
    fn chunk_header_layout() {
        let bytes = ChunkHeader::raw(4, 4096).unwrap().encode();
        assert_eq!(&bytes[0..2], &[0xc1, 0xca]);
        assert_eq!(&bytes[2..4], &[0, 0]);
        assert_eq!(&bytes[4..8], &4u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &(4 * 4096 + 12u32).to_le_bytes());

        let gap = ChunkHeader::dont_care(7).encode();
        assert_eq!(&gap[0..2], &[0xc3, 0xca]);
        assert_eq!(&gap[8..12], &12u32.to_le_bytes());
    }

    #[test]
    fn raw_chunk_overflow_rejected() {
        assert!(ChunkHeader::raw(u32::MAX / 4096 + 1, 4096).is_none());
        assert!(ChunkHeader::raw(1, u32::MAX - 4).is_none());
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut bytes = SparseHeader::new(4096, 0, 0).encode();
        bytes[0] ^= 0xff;
        assert!(matches!(
            SparseHeader::decode(&bytes),
            Err(SimgError::SparseFormat(_))
        ));
    }

    #[test]
    fn decode_walks_chunks() {
        let mut file = SparseHeader::new(4, 3, 2).encode().to_vec();
        file.extend_from_slice(&ChunkHeader::dont_care(1).encode());
        file.extend_from_slice(&ChunkHeader::raw(2, 4).unwrap().encode());
        file.extend_from_slice(&[9u8; 8]);
        let image = decode_image(&file).unwrap();
        assert_eq!(image.chunks.len(), 2);
        assert_eq!(image.chunks[1].start_block, 1);
        assert_eq!(image.chunks[1].body_offset, 28 + 12 + 12);
        assert_eq!(image.covered_blocks(), 3);

        file.pop();
        assert!(decode_image(&file).is_err());
    }
}
