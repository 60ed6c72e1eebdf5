//! Raw inflate for ZIP entries.
//!
//! ZIP stores deflate streams without a zlib or gzip wrapper, and gives the
//! compressed size and CRC-32 in the central directory. The decoder reads at
//! most `compressed_size` bytes, hands output to a sink chunk by chunk and
//! checks the running CRC once the stream ends.

use std::io::{self, Read};

use flate2::{Crc, Decompress, FlushDecompress, Status};
use sk_core::Error;

use super::{ArchiveEntry, METHOD_DEFLATED, METHOD_STORED};
use crate::buffer::{Buffer, Pool};

const INPUT_CHUNK: usize = 32 * 1024;
const OUTPUT_CHUNK: usize = 256 * 1024;

/// Reusable across entries; state is reset at the start of every `decode`.
pub struct DeflateDecoder<'p> {
    inflater: Decompress,
    input: Buffer<'p>,
    output: Buffer<'p>,
}

impl<'p> DeflateDecoder<'p> {
    pub fn new(pool: &'p dyn Pool) -> Self {
        Self {
            inflater: Decompress::new(false),
            input: Buffer::with_capacity(pool, INPUT_CHUNK),
            output: Buffer::with_capacity(pool, OUTPUT_CHUNK),
        }
    }

    /// Decode one entry from `reader`, which must be positioned at the
    /// entry's data. Returns the number of bytes handed to `sink`.
    ///
    /// A sink returning `false` stops decoding with `Canceled`.
    pub fn decode<R: Read>(
        &mut self,
        reader: &mut R,
        entry: &ArchiveEntry,
        sink: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<u64, Error> {
        self.input.clear();
        self.output.clear();

        let mut crc = Crc::new();
        let written = match entry.method {
            METHOD_STORED => self.copy_stored(reader, entry, &mut crc, sink)?,
            METHOD_DEFLATED => self.inflate(reader, entry, &mut crc, sink)?,
            other => {
                return Err(Error::format(format!(
                    "'{}': unsupported compression method {other}",
                    entry.path
                )));
            }
        };

        if written != entry.uncompressed_size {
            return Err(Error::format(format!(
                "'{}': expected {} bytes, decoded {written}",
                entry.path, entry.uncompressed_size
            )));
        }

        if crc.sum() != entry.crc32 {
            return Err(Error::ChecksumMismatch {
                expected: format!("{:08x}", entry.crc32),
                actual: format!("{:08x}", crc.sum()),
                file_name: Some(entry.path.clone()),
            });
        }

        Ok(written)
    }

    fn copy_stored<R: Read>(
        &mut self,
        reader: &mut R,
        entry: &ArchiveEntry,
        crc: &mut Crc,
        sink: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<u64, Error> {
        let mut left = entry.compressed_size;
        let mut written = 0u64;

        while left > 0 {
            self.output.clear();
            let want = (left as usize).min(self.output.capacity());
            let n = read_some(reader, &mut self.output.spare_mut()[..want])?;
            if n == 0 {
                return Err(Error::format(format!("'{}': truncated entry data", entry.path)));
            }
            self.output.advance(n);

            let chunk = self.output.unread();
            crc.update(chunk);
            if !sink(chunk) {
                return Err(Error::Canceled);
            }
            written += n as u64;
            left -= n as u64;
        }

        Ok(written)
    }

    fn inflate<R: Read>(
        &mut self,
        reader: &mut R,
        entry: &ArchiveEntry,
        crc: &mut Crc,
        sink: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<u64, Error> {
        self.inflater.reset(false);
        let mut compressed_left = entry.compressed_size;
        let mut written = 0u64;

        loop {
            if self.input.remaining() == 0 && compressed_left > 0 {
                self.input.clear();
                let want = (compressed_left as usize).min(self.input.capacity());
                let n = read_some(reader, &mut self.input.spare_mut()[..want])?;
                if n == 0 {
                    return Err(Error::format(format!("'{}': truncated entry data", entry.path)));
                }
                self.input.advance(n);
                compressed_left -= n as u64;
            }

            self.output.clear();
            let before_in = self.inflater.total_in();
            let before_out = self.inflater.total_out();

            let status = self
                .inflater
                .decompress(
                    self.input.unread(),
                    self.output.spare_mut(),
                    FlushDecompress::None,
                )
                .map_err(|e| Error::format(format!("'{}': corrupt deflate data: {e}", entry.path)))?;

            let consumed = (self.inflater.total_in() - before_in) as usize;
            let produced = (self.inflater.total_out() - before_out) as usize;
            self.input.consume(consumed);
            self.output.advance(produced);

            if produced > 0 {
                written += produced as u64;
                if written > entry.uncompressed_size {
                    return Err(Error::format(format!(
                        "'{}': decoded data exceeds declared size {}",
                        entry.path, entry.uncompressed_size
                    )));
                }
                let chunk = self.output.unread();
                crc.update(chunk);
                if !sink(chunk) {
                    return Err(Error::Canceled);
                }
            }

            match status {
                Status::StreamEnd => return Ok(written),
                Status::Ok | Status::BufError => {
                    if consumed == 0 && produced == 0 {
                        if compressed_left == 0 && self.input.remaining() == 0 {
                            return Err(Error::format(format!(
                                "'{}': deflate stream ended early",
                                entry.path
                            )));
                        }
                        if self.input.remaining() > 0 {
                            return Err(Error::format(format!(
                                "'{}': deflate decoder stalled",
                                entry.path
                            )));
                        }
                    }
                }
            }
        }
    }
}

fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, Error> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io("failed to read archive", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::EntryKind;
    use crate::buffer::LocalPool;
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use proptest::prelude::*;
    use std::io::{Cursor, Write};

    fn deflate(data: &[u8]) -> Vec<u8> {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn crc_of(data: &[u8]) -> u32 {
        let mut crc = Crc::new();
        crc.update(data);
        crc.sum()
    }

    fn entry(method: u16, compressed: &[u8], data: &[u8]) -> ArchiveEntry {
        ArchiveEntry {
            path: "file.bin".to_string(),
            compressed_size: compressed.len() as u64,
            uncompressed_size: data.len() as u64,
            crc32: crc_of(data),
            method,
            kind: EntryKind::File,
            modified: None,
            mode: None,
            link_target: None,
            header_offset: 0,
        }
    }

    fn sample(len: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 7) ^ (i >> 3)) as u8).collect()
    }

    #[test]
    fn inflates_large_entry_in_chunks() {
        let pool = LocalPool::new();
        let data = sample(1_000_000);
        let compressed = deflate(&data);
        let entry = entry(METHOD_DEFLATED, &compressed, &data);

        let mut decoder = DeflateDecoder::new(&pool);
        let mut out = Vec::new();
        let mut chunks = 0;
        let written = decoder
            .decode(&mut Cursor::new(&compressed), &entry, &mut |chunk| {
                assert!(chunk.len() <= OUTPUT_CHUNK);
                chunks += 1;
                out.extend_from_slice(chunk);
                true
            })
            .unwrap();

        assert_eq!(written, data.len() as u64);
        assert_eq!(out, data);
        assert!(chunks > 1);
    }

    #[test]
    fn stops_at_compressed_size() {
        let pool = LocalPool::new();
        let data = sample(5000);
        let mut compressed = deflate(&data);
        let entry = entry(METHOD_DEFLATED, &compressed, &data);
        compressed.extend_from_slice(b"next local header");

        let mut cursor = Cursor::new(&compressed);
        let mut decoder = DeflateDecoder::new(&pool);
        decoder.decode(&mut cursor, &entry, &mut |_| true).unwrap();
        assert!(cursor.position() <= entry.compressed_size);
    }

    #[test]
    fn stored_entries_pass_through() {
        let pool = LocalPool::new();
        let data = sample(70_000);
        let entry = entry(METHOD_STORED, &data, &data);

        let mut out = Vec::new();
        DeflateDecoder::new(&pool)
            .decode(&mut Cursor::new(&data), &entry, &mut |chunk| {
                out.extend_from_slice(chunk);
                true
            })
            .unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn crc_mismatch_is_reported() {
        let pool = LocalPool::new();
        let data = sample(4096);
        let compressed = deflate(&data);
        let mut entry = entry(METHOD_DEFLATED, &compressed, &data);
        entry.crc32 ^= 1;

        let err = DeflateDecoder::new(&pool)
            .decode(&mut Cursor::new(&compressed), &entry, &mut |_| true)
            .unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn flipped_byte_is_detected() {
        let pool = LocalPool::new();
        let data = sample(4096);
        let mut compressed = deflate(&data);
        let entry = entry(METHOD_DEFLATED, &compressed, &data);
        let mid = compressed.len() / 2;
        compressed[mid] ^= 0x55;

        let err = DeflateDecoder::new(&pool)
            .decode(&mut Cursor::new(&compressed), &entry, &mut |_| true)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ChecksumMismatch { .. } | Error::Format { .. }
        ));
    }

    #[test]
    fn truncated_data_is_format_error() {
        let pool = LocalPool::new();
        let data = sample(50_000);
        let compressed = deflate(&data);
        let entry = entry(METHOD_DEFLATED, &compressed, &data);
        let truncated = &compressed[..compressed.len() / 2];

        let err = DeflateDecoder::new(&pool)
            .decode(&mut Cursor::new(truncated), &entry, &mut |_| true)
            .unwrap_err();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn sink_rejection_cancels() {
        let pool = LocalPool::new();
        let data = sample(1000);
        let compressed = deflate(&data);
        let entry = entry(METHOD_DEFLATED, &compressed, &data);

        let err = DeflateDecoder::new(&pool)
            .decode(&mut Cursor::new(&compressed), &entry, &mut |_| false)
            .unwrap_err();
        assert!(err.is_canceled());
    }

    #[test]
    fn unknown_method_is_rejected() {
        let pool = LocalPool::new();
        let data = b"abc";
        let entry = entry(14, data, data);
        let err = DeflateDecoder::new(&pool)
            .decode(&mut Cursor::new(data), &entry, &mut |_| true)
            .unwrap_err();
        assert!(err.to_string().contains("unsupported compression method"));
    }

    #[test]
    fn decoder_is_reusable_across_entries() {
        let pool = LocalPool::new();
        let mut decoder = DeflateDecoder::new(&pool);
        for len in [10usize, 100_000, 0, 3] {
            let data = sample(len);
            let compressed = deflate(&data);
            let entry = entry(METHOD_DEFLATED, &compressed, &data);
            let written = decoder
                .decode(&mut Cursor::new(&compressed), &entry, &mut |_| true)
                .unwrap();
            assert_eq!(written, len as u64);
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]
        #[test]
        fn inflate_reproduces_deflated_input(
            data in proptest::collection::vec(any::<u8>(), 0..8192),
            level in 0u32..=9,
        ) {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(level));
            encoder.write_all(&data).unwrap();
            let compressed = encoder.finish().unwrap();
            let entry = entry(METHOD_DEFLATED, &compressed, &data);

            let pool = LocalPool::new();
            let mut out = Vec::new();
            let written = DeflateDecoder::new(&pool)
                .decode(&mut Cursor::new(&compressed), &entry, &mut |chunk| {
                    out.extend_from_slice(chunk);
                    true
                })
                .unwrap();
            prop_assert_eq!(written, data.len() as u64);
            prop_assert_eq!(out, data);
        }
    }
}
