use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimgError {
    /// Malformed or inconsistent block map, or geometry the sparse format
    /// cannot represent.
    #[error("format error: {0}")]
    Format(String),

    /// The block map is not well-formed XML.
    #[error("XML error: {0}")]
    Xml(String),

    /// Recomputed range digest disagrees with the one declared in the bmap.
    #[error("checksum mismatch for blocks {first}-{last}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        first: u64,
        last: u64,
        expected: String,
        actual: String,
    },

    /// The source image ended before a requested read completed.
    #[error("short read at offset {offset}: wanted {wanted} bytes, got {got}")]
    ShortRead { offset: u64, wanted: u64, got: u64 },

    /// A chunk length or source offset is not a multiple of the block size.
    #[error("{what} {value} is not a multiple of the block size {block_size}")]
    Unaligned {
        what: &'static str,
        value: u64,
        block_size: u32,
    },

    /// The writer was used after `finalize`.
    #[error("sparse writer already finalized")]
    WriterFinalized,

    /// Invalid conversion settings.
    #[error("config error: {0}")]
    Config(String),

    /// Malformed sparse image encountered while decoding.
    #[error("sparse image error: {0}")]
    SparseFormat(String),

    /// Propagated I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<xmlparser::Error> for SimgError {
    fn from(err: xmlparser::Error) -> Self {
        SimgError::Xml(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SimgError>;
