use std::io::{self, Read};

use sk_core::Error;

use crate::buffer::{Buffer, Pool};

/// Decoded output chunk size for stream transports.
pub const OUTPUT_CHUNK: usize = 256 * 1024;

/// A decompressed byte stream that a TAR reader walks sequentially.
///
/// Implementors only provide buffered access (`fill` / `consume`); the
/// read, discard and write-through operations are shared.
pub trait Transport {
    /// Decoded bytes not yet consumed. Empty means end of stream.
    fn fill(&mut self) -> Result<&[u8], Error>;

    fn consume(&mut self, n: usize);

    /// Copy out up to `buf.len()` bytes. `Ok(0)` only at end of stream.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let available = self.fill()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }

    /// Fill `buf` completely. Returns how many bytes were read before end of
    /// stream, which is less than `buf.len()` only when the stream ended.
    fn read_full(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    /// Skip `n` decoded bytes without copying them out.
    fn discard(&mut self, mut n: u64) -> Result<(), Error> {
        while n > 0 {
            let available = self.fill()?.len();
            if available == 0 {
                return Err(Error::format("unexpected end of stream while skipping"));
            }
            let step = (available as u64).min(n) as usize;
            self.consume(step);
            n -= step as u64;
        }
        Ok(())
    }

    /// Stream exactly `size` bytes into `sink`, adding to `extracted` as
    /// chunks are accepted.
    fn write_to(
        &mut self,
        sink: &mut dyn FnMut(&[u8]) -> bool,
        size: u64,
        extracted: &mut u64,
    ) -> Result<(), Error> {
        let mut left = size;
        while left > 0 {
            let chunk = self.fill()?;
            if chunk.is_empty() {
                return Err(Error::format(format!(
                    "unexpected end of stream: {left} of {size} bytes missing"
                )));
            }
            let step = (chunk.len() as u64).min(left) as usize;
            if !sink(&chunk[..step]) {
                return Err(Error::Canceled);
            }
            self.consume(step);
            *extracted += step as u64;
            left -= step as u64;
        }
        Ok(())
    }
}

/// Decoder errors surface as `InvalidData`/`InvalidInput`; those are
/// malformed input rather than I/O trouble.
pub(crate) fn map_read_error(context: &str, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::UnexpectedEof => {
            Error::format(format!("{context}: {err}"))
        }
        _ => Error::io(context, err),
    }
}

/// Transport over any `Read`: a plain file for `.tar`, or a streaming
/// decoder (`flate2`, `xz2`, `zstd`) for compressed tarballs.
pub struct StreamTransport<'p, R: Read> {
    inner: R,
    output: Buffer<'p>,
    eof: bool,
}

impl<'p, R: Read> StreamTransport<'p, R> {
    pub fn new(inner: R, pool: &'p dyn Pool) -> Self {
        Self {
            inner,
            output: Buffer::with_capacity(pool, OUTPUT_CHUNK),
            eof: false,
        }
    }
}

impl<R: Read> Transport for StreamTransport<'_, R> {
    fn fill(&mut self) -> Result<&[u8], Error> {
        if self.output.remaining() == 0 && !self.eof {
            self.output.clear();
            let n = loop {
                match self.inner.read(self.output.spare_mut()) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(map_read_error("failed to read archive stream", e)),
                }
            };
            if n == 0 {
                self.eof = true;
            }
            self.output.advance(n);
        }
        Ok(self.output.unread())
    }

    fn consume(&mut self, n: usize) {
        self.output.consume(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LocalPool;
    use std::io::Cursor;

    #[test]
    fn read_discard_and_write_through() {
        let pool = LocalPool::new();
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let mut transport = StreamTransport::new(Cursor::new(data.clone()), &pool);

        let mut head = [0u8; 100];
        assert_eq!(transport.read_full(&mut head).unwrap(), 100);
        assert_eq!(&head[..], &data[..100]);

        transport.discard(900).unwrap();

        let mut out = Vec::new();
        let mut extracted = 0;
        transport
            .write_to(
                &mut |chunk| {
                    out.extend_from_slice(chunk);
                    true
                },
                500,
                &mut extracted,
            )
            .unwrap();
        assert_eq!(extracted, 500);
        assert_eq!(out, &data[1000..1500]);
    }

    #[test]
    fn rejecting_sink_cancels() {
        let pool = LocalPool::new();
        let mut transport = StreamTransport::new(Cursor::new(vec![1u8; 64]), &pool);
        let mut extracted = 0;
        let err = transport
            .write_to(&mut |_| false, 10, &mut extracted)
            .unwrap_err();
        assert!(err.is_canceled());
        assert_eq!(extracted, 0);
    }

    #[test]
    fn premature_end_is_format_error() {
        let pool = LocalPool::new();
        let mut transport = StreamTransport::new(Cursor::new(vec![1u8; 8]), &pool);
        let mut extracted = 0;
        let err = transport
            .write_to(&mut |_| true, 16, &mut extracted)
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
        assert_eq!(extracted, 8);

        let err = transport.discard(1).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }
}
