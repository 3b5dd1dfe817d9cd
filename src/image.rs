use std::io::{ErrorKind, Read, Seek, SeekFrom};

use crate::{Result, SimgError};

/// Size of the scratch buffer used when streaming source bytes.
pub const READ_BUF_SIZE: usize = 1024 * 1024;

/// Read-only view of the source image.
///
/// `image_size` is the size declared by the block map. Bytes past it belong
/// to the zero padding of a partial final block and are never read from the
/// underlying file.
#[derive(Debug)]
pub struct SourceImage<R> {
    inner: R,
    image_size: u64,
}

impl<R: Read + Seek> SourceImage<R> {
    pub fn new(inner: R, image_size: u64) -> Self {
        Self { inner, image_size }
    }

    pub fn image_size(&self) -> u64 {
        self.image_size
    }

    /// Fill `buf` with the bytes starting at `offset`.
    ///
    /// Returns the number of bytes that lie inside the image; the remainder
    /// of `buf` is zeroed. A source that ends before `image_size` yields
    /// [`SimgError::ShortRead`].
    pub fn read_padded(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let real = self
            .image_size
            .saturating_sub(offset)
            .min(buf.len() as u64) as usize;
        if real > 0 {
            self.inner.seek(SeekFrom::Start(offset))?;
            let got = read_full(&mut self.inner, &mut buf[..real])?;
            if got < real {
                return Err(SimgError::ShortRead {
                    offset,
                    wanted: real as u64,
                    got: got as u64,
                });
            }
        }
        buf[real..].fill(0);
        Ok(real)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

fn read_full<R: Read>(reader: &mut R, mut buf: &mut [u8]) -> Result<usize> {
    let mut total = 0usize;
    while !buf.is_empty() {
        match reader.read(buf) {
            Ok(0) => break,
            Ok(n) => {
                total += n;
                buf = &mut buf[n..];
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(total)
}
