//! Streaming bzip2 decompression for `.tar.bz2` archives.

use std::io::{self, Read};

use bzip2::{Decompress, Status};
use sk_core::Error;
use tracing::trace;

use super::transport::{OUTPUT_CHUNK, Transport, map_read_error};
use crate::buffer::{Buffer, Pool};

/// Compressed bytes pulled from the source per refill.
const INPUT_CHUNK: usize = 32 * 1024;
/// Every bzip2 stream opens with `BZh` and a block size digit.
const STREAM_MAGIC: &[u8] = b"BZh";

/// Decodes concatenated bzip2 streams (as written by `pbzip2` or `cat`) as
/// one. Bytes after the last stream that do not start a new one are
/// ignored.

pub struct Bzip2Reader<'p, R: Read> {
    source: R,
    decoder: Decompress,
    input: Buffer<'p>,
    output: Buffer<'p>,
    source_eof: bool,
    ended: bool,
    /// Output of streams that already finished
    finished_out: u64,
}

impl<'p, R: Read> Bzip2Reader<'p, R> {
    pub fn new(source: R, pool: &'p dyn Pool) -> Self {
        Self {
            source,
            decoder: Decompress::new(false),
            input: Buffer::with_capacity(pool, INPUT_CHUNK),
            output: Buffer::with_capacity(pool, OUTPUT_CHUNK),
            source_eof: false,
            ended: false,
            finished_out: 0,
        }
    }

    /// True once the last end-of-stream marker was decoded. Reads after
    /// that return `Ok(0)` once buffered output is drained.
    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Total decoded bytes so far.
    pub fn total_out(&self) -> u64 {
        self.finished_out + self.decoder.total_out()
    }

    fn refill_input(&mut self) -> Result<(), Error> {
        self.input.clear();
        let n = loop {
            match self.source.read(self.input.spare_mut()) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_read_error("failed to read bzip2 source", e)),
            }
        };
        if n == 0 {
            self.source_eof = true;
        }
        self.input.advance(n);
        Ok(())
    }

    /// After a stream end, reset the decoder if another stream follows.
    fn start_next_stream(&mut self) -> Result<bool, Error> {
        while self.input.remaining() < STREAM_MAGIC.len() && !self.source_eof {
            self.refill_more()?;
        }
        if !self.input.unread().starts_with(STREAM_MAGIC) {
            if self.input.remaining() > 0 {
                trace!(trailing = self.input.remaining(), "ignoring data after bzip2 stream");
            }
            return Ok(false);
        }
        self.finished_out += self.decoder.total_out();
        self.decoder = Decompress::new(false);
        Ok(true)
    }

    /// Append source bytes after the unread input.
    fn refill_more(&mut self) -> Result<(), Error> {
        self.input.compact();
        let n = loop {
            match self.source.read(self.input.spare_mut()) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(map_read_error("failed to read bzip2 source", e)),
            }
        };
        if n == 0 {
            self.source_eof = true;
        }
        self.input.advance(n);
        Ok(())
    }

    /// Run decompression rounds until some output exists or the stream ends.
    fn decode_more(&mut self) -> Result<(), Error> {
        self.output.clear();

        loop {
            if self.input.remaining() == 0 && !self.source_eof {
                self.refill_input()?;
            }

            let before_in = self.decoder.total_in();
            let before_out = self.decoder.total_out();

            let status = self
                .decoder
                .decompress(self.input.unread(), self.output.spare_mut())
                .map_err(|e| Error::format(format!("corrupt bzip2 stream: {e}")))?;

            let consumed = (self.decoder.total_in() - before_in) as usize;
            let produced = (self.decoder.total_out() - before_out) as usize;
            self.input.consume(consumed);
            self.output.advance(produced);

            if matches!(status, Status::StreamEnd) {
                trace!(total_out = self.total_out(), "bzip2 stream end");
                if !self.start_next_stream()? {
                    self.ended = true;
                    return Ok(());
                }
                if produced > 0 {
                    return Ok(());
                }
                continue;
            }
            if produced > 0 {
                return Ok(());
            }
            if consumed == 0 {
                if self.source_eof && self.input.remaining() == 0 {
                    return Err(Error::format("truncated bzip2 stream"));
                }
                if self.input.remaining() > 0 {
                    return Err(Error::format("bzip2 decoder made no progress"));
                }
            }
        }
    }
}

impl<R: Read> Transport for Bzip2Reader<'_, R> {
    fn fill(&mut self) -> Result<&[u8], Error> {
        if self.output.remaining() == 0 && !self.ended {
            self.decode_more()?;
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
    use bzip2::Compression;
    use bzip2::write::BzEncoder;
    use proptest::prelude::*;
    use std::io::{Cursor, Write};

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = BzEncoder::new(Vec::new(), Compression::best());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    #[test]
    fn concatenated_streams_decode_as_one() {
        let pool = LocalPool::new();
        let first = sample(100_000);
        let second = b"second stream".to_vec();
        let mut compressed = compress(&first);
        compressed.extend(compress(&second));

        let mut reader = Bzip2Reader::new(Cursor::new(compressed), &pool);
        let mut out = Vec::new();
        let mut extracted = 0;
        let total = (first.len() + second.len()) as u64;
        reader
            .write_to(
                &mut |chunk| {
                    out.extend_from_slice(chunk);
                    true
                },
                total,
                &mut extracted,
            )
            .unwrap();

        assert_eq!(&out[..first.len()], &first[..]);
        assert_eq!(&out[first.len()..], &second[..]);
        assert_eq!(reader.total_out(), total);
        let mut extra = [0u8; 4];
        assert_eq!(reader.read(&mut extra).unwrap(), 0);
        assert!(reader.is_ended());
    }

    #[test]
    fn trailing_padding_after_stream_is_ignored() {
        let pool = LocalPool::new();
        let data = sample(5000);
        let mut compressed = compress(&data);
        compressed.extend_from_slice(&[0u8; 512]);

        let mut reader = Bzip2Reader::new(Cursor::new(compressed), &pool);
        let mut out = vec![0u8; data.len() + 1];
        assert_eq!(reader.read_full(&mut out).unwrap(), data.len());
        assert_eq!(&out[..data.len()], &data[..]);
        assert!(reader.is_ended());
    }

    #[test]
    fn reads_whole_stream() {
        let pool = LocalPool::new();
        let data = sample(700_000);
        let mut reader = Bzip2Reader::new(Cursor::new(compress(&data)), &pool);

        let mut out = vec![0u8; data.len()];
        assert_eq!(reader.read_full(&mut out).unwrap(), data.len());
        assert_eq!(out, data);

        let mut extra = [0u8; 16];
        assert_eq!(reader.read(&mut extra).unwrap(), 0);
        assert!(reader.is_ended());
        assert_eq!(reader.read(&mut extra).unwrap(), 0);
    }

    #[test]
    fn discard_matches_reading_and_dropping() {
        let pool = LocalPool::new();
        let data = sample(300_000);
        let compressed = compress(&data);

        for skip in [0u64, 1, 511, 262_144, 299_999] {
            let mut reader = Bzip2Reader::new(Cursor::new(compressed.clone()), &pool);
            reader.discard(skip).unwrap();
            let mut rest = Vec::new();
            let mut extracted = 0;
            let left = data.len() as u64 - skip;
            reader
                .write_to(
                    &mut |chunk| {
                        rest.extend_from_slice(chunk);
                        true
                    },
                    left,
                    &mut extracted,
                )
                .unwrap();
            assert_eq!(extracted, left);
            assert_eq!(rest, &data[skip as usize..]);
        }
    }

    #[test]
    fn truncated_input_is_format_error() {
        let pool = LocalPool::new();
        let data = sample(200_000);
        let compressed = compress(&data);
        let truncated = compressed[..compressed.len() / 2].to_vec();
        let mut reader = Bzip2Reader::new(Cursor::new(truncated), &pool);

        let mut out = vec![0u8; data.len()];
        let err = reader.read_full(&mut out).unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn garbage_is_format_error() {
        let pool = LocalPool::new();
        let mut reader = Bzip2Reader::new(Cursor::new(b"definitely not bzip2".to_vec()), &pool);
        let mut out = [0u8; 8];
        assert!(matches!(reader.read(&mut out), Err(Error::Format { .. })));
    }

    #[test]
    fn write_to_cancels_on_rejection() {
        let pool = LocalPool::new();
        let mut reader = Bzip2Reader::new(Cursor::new(compress(&sample(1000))), &pool);
        let mut extracted = 0;
        let err = reader.write_to(&mut |_| false, 1000, &mut extracted).unwrap_err();
        assert!(err.is_canceled());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]
        #[test]
        fn round_trips_arbitrary_payloads(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
            let pool = LocalPool::new();
            let mut reader = Bzip2Reader::new(Cursor::new(compress(&data)), &pool);
            let mut out = vec![0u8; data.len() + 1];
            let n = reader.read_full(&mut out).unwrap();
            prop_assert_eq!(&out[..n], &data[..]);
        }
    }
}
