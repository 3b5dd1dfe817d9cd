use crate::{Result, SimgError};

/// Default batch size in bytes. One raw chunk never carries more than this.
pub const DEFAULT_BATCH_BYTES: u64 = 1024 * 1024;

/// Runtime parameters for a single conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Upper bound on the payload of one raw chunk, in bytes. Rounded down to
    /// whole blocks, never below one block.
    pub max_batch_bytes: u64,
    /// Emit a don't-care chunk for blocks past the last mapped range so the
    /// output covers the whole image.
    pub trailing_gap: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_batch_bytes: DEFAULT_BATCH_BYTES,
            trailing_gap: true,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_batch_bytes == 0 {
            return Err(SimgError::Config("batch size must be non-zero".into()));
        }
        Ok(())
    }

    /// Batch cap in blocks for the given block size.
    ///
    /// Also bounded so that a raw chunk's total size fits the `u32` field of
    /// its chunk header.
    pub fn batch_blocks(&self, block_size: u32) -> u64 {
        let block_size = u64::from(block_size.max(1));
        let limit = (u64::from(u32::MAX) - crate::sparse::CHUNK_HEADER_SIZE as u64) / block_size;
        (self.max_batch_bytes / block_size).clamp(1, limit.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batch_is_one_mebibyte_of_blocks() {
        let cfg = Config::default();
        assert_eq!(cfg.batch_blocks(4096), 256);
        assert_eq!(cfg.batch_blocks(512), 2048);
    }

    #[test]
    fn batch_never_below_one_block() {
        let cfg = Config {
            max_batch_bytes: 100,
            ..Config::default()
        };
        assert_eq!(cfg.batch_blocks(4096), 1);
    }

    #[test]
    fn batch_fits_chunk_header() {
        let cfg = Config {
            max_batch_bytes: u64::MAX,
            ..Config::default()
        };
        let blocks = cfg.batch_blocks(4096);
        assert!(blocks * 4096 + 12 <= u64::from(u32::MAX));
    }

    #[test]
    fn zero_batch_rejected() {
        let cfg = Config {
            max_batch_bytes: 0,
            ..Config::default()
        };
        assert!(matches!(cfg.validate(), Err(SimgError::Config(_))));
    }
}
