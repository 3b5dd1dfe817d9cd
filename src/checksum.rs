use std::fmt;
use std::io::{Read, Seek};

use sha2::{Digest, Sha256};

use crate::bmap::BlockRange;
use crate::image::{SourceImage, READ_BUF_SIZE};
use crate::{Result, SimgError};

/// Digest algorithm used by a block map for its ranges and its own checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumType {
    Sha1,
    Sha256,
}

impl ChecksumType {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "sha1" => Some(ChecksumType::Sha1),
            "sha256" => Some(ChecksumType::Sha256),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha256 => "sha256",
        }
    }

    /// Length of a digest of this type in hex characters.
    pub fn hex_len(self) -> usize {
        match self {
            ChecksumType::Sha1 => 40,
            ChecksumType::Sha256 => 64,
        }
    }

    pub fn hasher(self) -> Hasher {
        match self {
            ChecksumType::Sha1 => Hasher::Sha1(sha1::Sha1::new()),
            ChecksumType::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Incremental digest over either supported algorithm.
#[derive(Clone)]
pub enum Hasher {
    Sha1(sha1::Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    /// Lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        match self {
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

pub fn digest_hex(kind: ChecksumType, data: &[u8]) -> String {
    let mut hasher = kind.hasher();
    hasher.update(data);
    hasher.finalize_hex()
}

/// Recompute the digest of `range` from the source image.
///
/// Spans are hashed in order as one byte stream. Only bytes inside the
/// declared image size contribute, so a partial final block hashes the same
/// way bmaptools hashed it.
pub fn range_digest<R: Read + Seek>(
    source: &mut SourceImage<R>,
    range: &BlockRange,
    block_size: u32,
    kind: ChecksumType,
) -> Result<String> {
    let block_size = u64::from(block_size);
    let mut hasher = kind.hasher();
    let mut buf = vec![0u8; READ_BUF_SIZE];
    for span in range.spans() {
        let mut offset = span.first * block_size;
        let end = (span.last + 1) * block_size;
        while offset < end {
            let len = (end - offset).min(buf.len() as u64) as usize;
            let real = source.read_padded(offset, &mut buf[..len])?;
            hasher.update(&buf[..real]);
            if real < len {
                break;
            }
            offset += len as u64;
        }
    }
    Ok(hasher.finalize_hex())
}

/// Verify `range` against the checksum declared in the block map.
pub fn verify_range<R: Read + Seek>(
    source: &mut SourceImage<R>,
    range: &BlockRange,
    block_size: u32,
    kind: ChecksumType,
) -> Result<()> {
    let actual = range_digest(source, range, block_size, kind)?;
    if !actual.eq_ignore_ascii_case(range.checksum()) {
        return Err(SimgError::ChecksumMismatch {
            first: range.first_block(),
            last: range.last_block(),
            expected: range.checksum().to_string(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bmap::Span;
    use std::io::Cursor;

    #[test]
    fn known_digests() {
        assert_eq!(
            digest_hex(ChecksumType::Sha256, b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            digest_hex(ChecksumType::Sha1, b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn type_names_roundtrip() {
        for kind in [ChecksumType::Sha1, ChecksumType::Sha256] {
            assert_eq!(ChecksumType::from_name(kind.name()), Some(kind));
            assert_eq!(digest_hex(kind, b"").len(), kind.hex_len());
        }
        assert_eq!(ChecksumType::from_name(" SHA256 "), Some(ChecksumType::Sha256));
        assert_eq!(ChecksumType::from_name("md5"), None);
    }

    #[test]
    fn multi_span_range_hashes_concatenation() {
        let data: Vec<u8> = (0..64u8).collect();
        let expected = {
            let mut joined = data[0..8].to_vec();
            joined.extend_from_slice(&data[32..48]);
            digest_hex(ChecksumType::Sha256, &joined)
        };
        let range = BlockRange::new(
            vec![Span::new(0, 1), Span::new(8, 11)],
            expected.clone(),
        );
        let mut img = SourceImage::new(Cursor::new(data), 64);
        assert_eq!(
            range_digest(&mut img, &range, 4, ChecksumType::Sha256).unwrap(),
            expected
        );
        verify_range(&mut img, &range, 4, ChecksumType::Sha256).unwrap();
        // Verification has no side effects on the source view.
        verify_range(&mut img, &range, 4, ChecksumType::Sha256).unwrap();
    }

    #[test]
    fn partial_final_block_hashes_real_bytes_only() {
        let data = vec![7u8; 10];
        let expected = digest_hex(ChecksumType::Sha1, &data[8..10]);
        let range = BlockRange::new(vec![Span::new(2, 2)], expected);
        let mut img = SourceImage::new(Cursor::new(data), 10);
        verify_range(&mut img, &range, 4, ChecksumType::Sha1).unwrap();
    }

    #[test]
    fn mismatch_reports_range() {
        let data = vec![0u8; 16];
        let range = BlockRange::new(vec![Span::new(1, 2)], "00".repeat(32));
        let mut img = SourceImage::new(Cursor::new(data), 16);
        match verify_range(&mut img, &range, 4, ChecksumType::Sha256) {
            Err(SimgError::ChecksumMismatch { first, last, .. }) => {
                assert_eq!((first, last), (1, 2));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
