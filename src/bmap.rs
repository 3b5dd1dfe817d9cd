//! Block map (`.bmap`) descriptor parsing.
//!
//! A bmap is a small XML document written by bmaptools:
//!
//! ```text
//! <bmap version="2.0">
//!     <ImageSize> 821752 </ImageSize>
//!     <BlockSize> 4096 </BlockSize>
//!     <BlocksCount> 201 </BlocksCount>
//!     <MappedBlocksCount> 117 </MappedBlocksCount>
//!     <ChecksumType> sha256 </ChecksumType>
//!     <BmapFileChecksum> 4bd4... </BmapFileChecksum>
//!     <BlockMap>
//!         <Range chksum="9b1f..."> 0-1 </Range>
//!         <Range chksum="0fe4..."> 3-5 </Range>
//!     </BlockMap>
//! </bmap>
//! ```
//!
//! Version 1 files carry SHA-1 digests in a `sha1` attribute instead of
//! `chksum`. A range may list several comma-separated spans that share one
//! digest, e.g. `0-3, 8-9`.
//!
//! [`Bmap::from_xml`] validates everything that can be validated without the
//! source image. Range digests are verified later, against the image bytes,
//! by [`crate::checksum::verify_range`].

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::batch::Batches;
use crate::checksum::{digest_hex, ChecksumType};
use crate::xml::{self, Element};
use crate::{Result, SimgError};

/// Contiguous run of blocks, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub first: u64,
    pub last: u64,
}

impl Span {
    pub fn new(first: u64, last: u64) -> Self {
        Self { first, last }
    }

    pub fn block_count(&self) -> u64 {
        self.last - self.first + 1
    }
}

/// A checksummed `<Range>` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRange {
    spans: Vec<Span>,
    checksum: String,
}

impl BlockRange {
    /// Build a range from already validated, ascending spans.
    ///
    /// # Panics
    ///
    /// Panics if `spans` is empty.
    pub fn new(spans: Vec<Span>, checksum: impl Into<String>) -> Self {
        assert!(!spans.is_empty(), "a range needs at least one span");
        Self {
            spans,
            checksum: checksum.into(),
        }
    }

    pub fn spans(&self) -> &[Span] {
        &self.spans
    }

    pub fn first_block(&self) -> u64 {
        self.spans[0].first
    }

    pub fn last_block(&self) -> u64 {
        self.spans[self.spans.len() - 1].last
    }

    /// Number of mapped blocks in this range, summed over its spans.
    pub fn block_count(&self) -> u64 {
        self.spans.iter().map(Span::block_count).sum()
    }

    /// Lowercase hex digest declared for this range.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bmap {
    version: (u32, u32),
    image_size: u64,
    block_size: u32,
    total_blocks: u64,
    mapped_blocks: u64,
    checksum_type: ChecksumType,
    ranges: Vec<BlockRange>,
}

impl Bmap {
    /// Read and validate a block map file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading block map");
        let text = fs::read_to_string(path)?;
        Self::from_xml(&text)
    }

    /// Parse and validate a block map from its XML text.
    pub fn from_xml(text: &str) -> Result<Self> {
        let root = xml::parse(text)?;
        if root.name != "bmap" {
            return Err(format_err(format!(
                "root element is <{}>, expected <bmap>",
                root.name
            )));
        }

        let version = parse_version(
            root.attribute("version")
                .ok_or_else(|| format_err("missing bmap version attribute"))?,
        )?;

        let image_size = required_number(&root, "ImageSize")?;
        let block_size = required_number(&root, "BlockSize")?;
        let total_blocks = required_number(&root, "BlocksCount")?;

        if block_size == 0 || !block_size.is_power_of_two() || block_size % 4 != 0 {
            return Err(format_err(format!(
                "block size {block_size} must be a power of two and a multiple of 4"
            )));
        }
        let block_size = u32::try_from(block_size)
            .map_err(|_| format_err(format!("block size {block_size} is too large")))?;

        let expected_blocks = image_size.div_ceil(u64::from(block_size));
        if total_blocks != expected_blocks {
            return Err(format_err(format!(
                "BlocksCount is {total_blocks} but ImageSize {image_size} needs {expected_blocks} blocks"
            )));
        }

        let checksum_type = if version.0 >= 2 {
            let name = required_text(&root, "ChecksumType")?;
            ChecksumType::from_name(name)
                .ok_or_else(|| format_err(format!("unsupported checksum type '{name}'")))?
        } else {
            ChecksumType::Sha1
        };

        // 1.3 maps carry the same self digest under an older element name.
        let self_digest = if version.0 >= 2 { "BmapFileChecksum" } else { "BmapFileSHA1" };
        if let Some(declared) = root.child(self_digest) {
            verify_file_checksum(text, self_digest, declared.trimmed_text(), checksum_type)?;
        }

        let block_map = root
            .child("BlockMap")
            .ok_or_else(|| format_err("missing <BlockMap>"))?;
        let attr = if version.0 >= 2 { "chksum" } else { "sha1" };

        let mut ranges: Vec<BlockRange> = Vec::new();
        for element in block_map.children_named("Range") {
            let range = parse_range(element, attr, checksum_type)?;
            if range.last_block() >= total_blocks {
                return Err(format_err(format!(
                    "range {}-{} exceeds image of {} blocks",
                    range.first_block(),
                    range.last_block(),
                    total_blocks
                )));
            }
            if let Some(prev) = ranges.last() {
                if range.first_block() <= prev.last_block() {
                    return Err(format_err(format!(
                        "range {}-{} overlaps or precedes range {}-{}",
                        range.first_block(),
                        range.last_block(),
                        prev.first_block(),
                        prev.last_block()
                    )));
                }
            }
            ranges.push(range);
        }

        let mapped: u64 = ranges.iter().map(BlockRange::block_count).sum();
        let mapped_blocks = match root.child("MappedBlocksCount") {
            Some(el) => {
                let declared = parse_number(el)?;
                if declared != mapped {
                    warn!(declared, actual = mapped, "MappedBlocksCount disagrees with block map");
                }
                declared
            }
            None => mapped,
        };

        debug!(
            version = %format!("{}.{}", version.0, version.1),
            image_size,
            block_size,
            total_blocks,
            ranges = ranges.len(),
            checksum = %checksum_type,
            "parsed block map"
        );

        Ok(Self {
            version,
            image_size,
            block_size,
            total_blocks,
            mapped_blocks,
            checksum_type,
            ranges,
        })
    }

    pub fn version(&self) -> (u32, u32) {
        self.version
    }

    pub fn image_size(&self) -> u64 {
        self.image_size
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    /// Mapped block count as declared by the file (or computed if absent).
    pub fn mapped_blocks(&self) -> u64 {
        self.mapped_blocks
    }

    pub fn checksum_type(&self) -> ChecksumType {
        self.checksum_type
    }

    /// Ranges in ascending block order. Guaranteed non-overlapping.
    pub fn ranges(&self) -> impl ExactSizeIterator<Item = &BlockRange> {
        self.ranges.iter()
    }

    /// Split `range` into batches of at most `max_blocks` blocks.
    pub fn batches<'a>(&self, range: &'a BlockRange, max_blocks: u64) -> Batches<'a> {
        Batches::new(range, max_blocks)
    }
}

fn format_err(msg: impl Into<String>) -> SimgError {
    SimgError::Format(msg.into())
}

fn parse_version(text: &str) -> Result<(u32, u32)> {
    let text = text.trim();
    let (major, minor) = text.split_once('.').unwrap_or((text, "0"));
    let major: u32 = major
        .parse()
        .map_err(|_| format_err(format!("invalid bmap version '{text}'")))?;
    let minor: u32 = minor
        .parse()
        .map_err(|_| format_err(format!("invalid bmap version '{text}'")))?;
    if !(1..=2).contains(&major) {
        return Err(format_err(format!("unsupported bmap version '{text}'")));
    }
    Ok((major, minor))
}

fn required_text<'a>(root: &'a Element, name: &str) -> Result<&'a str> {
    root.child(name)
        .map(Element::trimmed_text)
        .ok_or_else(|| format_err(format!("missing <{name}>")))
}

fn required_number(root: &Element, name: &str) -> Result<u64> {
    let el = root
        .child(name)
        .ok_or_else(|| format_err(format!("missing <{name}>")))?;
    parse_number(el)
}

fn parse_number(el: &Element) -> Result<u64> {
    el.trimmed_text().parse().map_err(|_| {
        format_err(format!(
            "<{}> is not a number: '{}'",
            el.name,
            el.trimmed_text()
        ))
    })
}

fn parse_block(text: &str) -> Result<u64> {
    text.trim()
        .parse()
        .map_err(|_| format_err(format!("invalid block number '{}'", text.trim())))
}

fn parse_spans(text: &str) -> Result<Vec<Span>> {
    let mut spans: Vec<Span> = Vec::new();
    for part in text.split(',') {
        let part = part.trim();
        if part.is_empty() {
            return Err(format_err(format!("empty span in range '{}'", text.trim())));
        }
        let span = match part.split_once('-') {
            Some((first, last)) => Span::new(parse_block(first)?, parse_block(last)?),
            None => {
                let block = parse_block(part)?;
                Span::new(block, block)
            }
        };
        if span.first > span.last {
            return Err(format_err(format!(
                "range start {} is after its end {}",
                span.first, span.last
            )));
        }
        if let Some(prev) = spans.last() {
            if span.first <= prev.last {
                return Err(format_err(format!(
                    "spans in range '{}' overlap or are unsorted",
                    text.trim()
                )));
            }
        }
        spans.push(span);
    }
    Ok(spans)
}

fn parse_range(el: &Element, attr: &str, kind: ChecksumType) -> Result<BlockRange> {
    let spans = parse_spans(&el.text)?;
    let checksum = el
        .attribute(attr)
        .ok_or_else(|| {
            format_err(format!(
                "range '{}' has no '{attr}' checksum attribute",
                el.trimmed_text()
            ))
        })?
        .trim()
        .to_ascii_lowercase();
    if checksum.len() != kind.hex_len() || !checksum.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(format_err(format!(
            "range '{}' has an invalid {kind} checksum '{checksum}'",
            el.trimmed_text()
        )));
    }
    Ok(BlockRange::new(spans, checksum))
}

/// bmaptools hashes the file with the checksum value itself replaced by
/// zeros of the same length.
fn verify_file_checksum(
    text: &str,
    element: &str,
    declared: &str,
    kind: ChecksumType,
) -> Result<()> {
    if declared.len() != kind.hex_len() {
        return Err(format_err(format!(
            "{element} has {} characters, expected {}",
            declared.len(),
            kind.hex_len()
        )));
    }
    let zeroed = text.replace(declared, &"0".repeat(declared.len()));
    let actual = digest_hex(kind, zeroed.as_bytes());
    if !actual.eq_ignore_ascii_case(declared) {
        return Err(format_err(format!(
            "bmap file checksum mismatch: expected {declared}, got {actual}"
        )));
    }
    Ok(())
}
