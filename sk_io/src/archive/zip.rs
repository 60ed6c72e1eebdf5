//! ZIP central directory parsing.

use std::io::{Read, Seek, SeekFrom};
use std::time::SystemTime;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sk_core::Error;
use tracing::debug;

use super::{ArchiveEntry, DeflateDecoder, EntryKind};

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const EOCD_LEN: usize = 22;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_LOCATOR_LEN: u64 = 20;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const ZIP64_EOCD_LEN: usize = 56;
const CENTRAL_SIGNATURE: u32 = 0x0201_4b50;
const CENTRAL_LEN: usize = 46;
const LOCAL_SIGNATURE: u32 = 0x0403_4b50;
const LOCAL_LEN: usize = 30;
const ZIP64_EXTRA_ID: u16 = 0x0001;
const MAX_COMMENT: u64 = 0xFFFF;

const FLAG_ENCRYPTED: u16 = 0x0001;
const HOST_UNIX: u16 = 3;
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;
const S_IFDIR: u32 = 0o040000;

fn le16(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn le32(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

fn le64(b: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&b[at..at + 8]);
    u64::from_le_bytes(raw)
}

fn truncated(what: &str) -> Error {
    Error::format(format!("zip: truncated {what}"))
}

pub struct ZipArchive<R: Read + Seek> {
    reader: R,
    entries: Vec<ArchiveEntry>,
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Parse the central directory. No entry data is read.
    pub fn open(mut reader: R) -> Result<Self, Error> {
        let file_len = reader
            .seek(SeekFrom::End(0))
            .map_err(|e| Error::io("failed to seek archive", e))?;

        let directory = locate_directory(&mut reader, file_len)?;
        if directory.offset.saturating_add(directory.size) > file_len {
            return Err(Error::format("zip: central directory lies past end of file"));
        }

        let mut raw = vec![0u8; directory.size as usize];
        reader
            .seek(SeekFrom::Start(directory.offset))
            .and_then(|_| reader.read_exact(&mut raw))
            .map_err(|_| truncated("central directory"))?;

        let entries = parse_central_directory(&raw, directory.entries)?;
        debug!(entries = entries.len(), "parsed zip central directory");

        Ok(Self { reader, entries })
    }

    pub fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }

    /// Total uncompressed size of all entries.
    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.uncompressed_size).sum()
    }

    /// Decode one entry's data into `sink`.
    pub fn extract_entry(
        &mut self,
        entry: &ArchiveEntry,
        decoder: &mut DeflateDecoder<'_>,
        sink: &mut dyn FnMut(&[u8]) -> bool,
    ) -> Result<u64, Error> {
        let data_start = self.data_offset(entry)?;
        self.reader
            .seek(SeekFrom::Start(data_start))
            .map_err(|e| Error::io("failed to seek archive", e))?;

        let mut limited = (&mut self.reader).take(entry.compressed_size);
        decoder.decode(&mut limited, entry, sink)
    }

    /// Local headers repeat the name and carry their own extra field, so the
    /// data offset can only be computed from the local header itself.
    fn data_offset(&mut self, entry: &ArchiveEntry) -> Result<u64, Error> {
        let mut header = [0u8; LOCAL_LEN];
        self.reader
            .seek(SeekFrom::Start(entry.header_offset))
            .and_then(|_| self.reader.read_exact(&mut header))
            .map_err(|_| truncated("local header"))?;

        if le32(&header, 0) != LOCAL_SIGNATURE {
            return Err(Error::format(format!(
                "zip: bad local header for '{}'",
                entry.path
            )));
        }

        let name_len = le16(&header, 26) as u64;
        let extra_len = le16(&header, 28) as u64;
        Ok(entry.header_offset + LOCAL_LEN as u64 + name_len + extra_len)
    }
}

struct Directory {
    entries: u64,
    size: u64,
    offset: u64,
}

fn locate_directory<R: Read + Seek>(reader: &mut R, file_len: u64) -> Result<Directory, Error> {
    if file_len < EOCD_LEN as u64 {
        return Err(Error::format("zip: file too small"));
    }

    // the record sits at the very end, followed only by a comment
    let tail_len = file_len.min(MAX_COMMENT + EOCD_LEN as u64);
    let tail_start = file_len - tail_len;
    let mut tail = vec![0u8; tail_len as usize];
    reader
        .seek(SeekFrom::Start(tail_start))
        .and_then(|_| reader.read_exact(&mut tail))
        .map_err(|_| truncated("end of central directory"))?;

    let pos = (0..=tail.len() - EOCD_LEN)
        .rev()
        .find(|&i| le32(&tail, i) == EOCD_SIGNATURE)
        .ok_or_else(|| Error::format("zip: end of central directory not found"))?;
    let eocd = &tail[pos..pos + EOCD_LEN];

    let mut directory = Directory {
        entries: le16(eocd, 10) as u64,
        size: le32(eocd, 12) as u64,
        offset: le32(eocd, 16) as u64,
    };

    let needs_zip64 = directory.entries == 0xFFFF
        || directory.size == 0xFFFF_FFFF
        || directory.offset == 0xFFFF_FFFF;

    let eocd_offset = tail_start + pos as u64;
    if eocd_offset >= ZIP64_LOCATOR_LEN {
        let mut locator = [0u8; ZIP64_LOCATOR_LEN as usize];
        reader
            .seek(SeekFrom::Start(eocd_offset - ZIP64_LOCATOR_LEN))
            .and_then(|_| reader.read_exact(&mut locator))
            .map_err(|_| truncated("zip64 locator"))?;

        if le32(&locator, 0) == ZIP64_LOCATOR_SIGNATURE {
            let record_offset = le64(&locator, 8);
            let mut record = [0u8; ZIP64_EOCD_LEN];
            reader
                .seek(SeekFrom::Start(record_offset))
                .and_then(|_| reader.read_exact(&mut record))
                .map_err(|_| truncated("zip64 end of central directory"))?;

            if le32(&record, 0) != ZIP64_EOCD_SIGNATURE {
                return Err(Error::format("zip: bad zip64 end of central directory"));
            }
            directory = Directory {
                entries: le64(&record, 32),
                size: le64(&record, 40),
                offset: le64(&record, 48),
            };
        } else if needs_zip64 {
            return Err(Error::format("zip: zip64 locator missing"));
        }
    }

    Ok(directory)
}

fn parse_central_directory(raw: &[u8], expected: u64) -> Result<Vec<ArchiveEntry>, Error> {
    let mut entries = Vec::with_capacity(expected.min(65_536) as usize);
    let mut at = 0usize;

    while entries.len() as u64 != expected {
        if at + CENTRAL_LEN > raw.len() {
            return Err(truncated("central directory record"));
        }
        let record = &raw[at..];
        if le32(record, 0) != CENTRAL_SIGNATURE {
            return Err(Error::format("zip: bad central directory signature"));
        }

        let made_by = le16(record, 4);
        let flags = le16(record, 8);
        let method = le16(record, 10);
        let dos_time = le16(record, 12);
        let dos_date = le16(record, 14);
        let crc32 = le32(record, 16);
        let mut compressed_size = le32(record, 20) as u64;
        let mut uncompressed_size = le32(record, 24) as u64;
        let name_len = le16(record, 28) as usize;
        let extra_len = le16(record, 30) as usize;
        let comment_len = le16(record, 32) as usize;
        let external = le32(record, 38);
        let mut header_offset = le32(record, 42) as u64;

        let record_len = CENTRAL_LEN + name_len + extra_len + comment_len;
        if record.len() < record_len {
            return Err(truncated("central directory record"));
        }
        let name = String::from_utf8_lossy(&record[CENTRAL_LEN..CENTRAL_LEN + name_len]).into_owned();
        let extra = &record[CENTRAL_LEN + name_len..CENTRAL_LEN + name_len + extra_len];

        if flags & FLAG_ENCRYPTED != 0 {
            return Err(Error::format(format!("zip: '{name}' is encrypted")));
        }

        apply_zip64_extra(
            extra,
            &mut uncompressed_size,
            &mut compressed_size,
            &mut header_offset,
        )?;

        let mode = (made_by >> 8 == HOST_UNIX).then_some(external >> 16).filter(|m| *m != 0);
        let kind = match mode {
            _ if name.ends_with('/') => EntryKind::Directory,
            Some(m) if m & S_IFMT == S_IFDIR => EntryKind::Directory,
            Some(m) if m & S_IFMT == S_IFLNK => EntryKind::Symlink,
            _ => EntryKind::File,
        };

        entries.push(ArchiveEntry {
            path: name,
            compressed_size,
            uncompressed_size,
            crc32,
            method,
            kind,
            modified: dos_timestamp(dos_date, dos_time),
            mode,
            link_target: None,
            header_offset,
        });

        at += record_len;
    }

    Ok(entries)
}

/// Fields saturated to 0xFFFFFFFF in the record are stored in the zip64
/// extra block, in this fixed order.
fn apply_zip64_extra(
    mut extra: &[u8],
    uncompressed: &mut u64,
    compressed: &mut u64,
    offset: &mut u64,
) -> Result<(), Error> {
    while extra.len() >= 4 {
        let id = le16(extra, 0);
        let len = le16(extra, 2) as usize;
        if extra.len() < 4 + len {
            return Err(truncated("extra field"));
        }
        let mut data = &extra[4..4 + len];

        if id == ZIP64_EXTRA_ID {
            for field in [uncompressed, compressed, offset] {
                if *field == 0xFFFF_FFFF {
                    if data.len() < 8 {
                        return Err(truncated("zip64 extra field"));
                    }
                    *field = le64(data, 0);
                    data = &data[8..];
                }
            }
            return Ok(());
        }
        extra = &extra[4 + len..];
    }
    Ok(())
}

fn dos_timestamp(date: u16, time: u16) -> Option<SystemTime> {
    let day = NaiveDate::from_ymd_opt(
        1980 + (date >> 9) as i32,
        ((date >> 5) & 0x0F) as u32,
        (date & 0x1F) as u32,
    )?;
    let clock = NaiveTime::from_hms_opt(
        (time >> 11) as u32,
        ((time >> 5) & 0x3F) as u32,
        ((time & 0x1F) * 2) as u32,
    )?;
    Some(NaiveDateTime::new(day, clock).and_utc().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::LocalPool;
    use std::io::{Cursor, Write};
    use ::zip::write::SimpleFileOptions;

    fn build_zip(files: &[(&str, &[u8])], method: ::zip::CompressionMethod) -> Vec<u8> {
        let mut writer = ::zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(method);
        for (name, data) in files {
            if name.ends_with('/') {
                writer.add_directory(name.trim_end_matches('/'), options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, index: usize) -> Result<Vec<u8>, Error> {
        let pool = LocalPool::new();
        let mut decoder = DeflateDecoder::new(&pool);
        let entry = archive.entries()[index].clone();
        let mut out = Vec::new();
        archive.extract_entry(&entry, &mut decoder, &mut |chunk| {
            out.extend_from_slice(chunk);
            true
        })?;
        Ok(out)
    }

    #[test]
    fn lists_and_reads_entries() {
        let big: Vec<u8> = (0..200_000u32).map(|i| (i % 97) as u8).collect();
        let bytes = build_zip(
            &[
                ("bin/", b""),
                ("bin/tool", b"#!/bin/sh\necho hi\n"),
                ("data.bin", &big),
            ],
            ::zip::CompressionMethod::Deflated,
        );

        let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
        let names: Vec<_> = archive.entries().iter().map(|e| e.path.clone()).collect();
        assert_eq!(names, vec!["bin/", "bin/tool", "data.bin"]);
        assert!(archive.entries()[0].is_dir());
        assert!(archive.entries()[1].modified.is_some());
        assert_eq!(archive.total_size(), 18 + big.len() as u64);

        assert_eq!(read_entry(&mut archive, 1).unwrap(), b"#!/bin/sh\necho hi\n");
        assert_eq!(read_entry(&mut archive, 2).unwrap(), big);
    }

    #[test]
    fn reads_stored_entries() {
        let bytes = build_zip(&[("a.txt", b"plain")], ::zip::CompressionMethod::Stored);
        let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.entries()[0].method, 0);
        assert_eq!(read_entry(&mut archive, 0).unwrap(), b"plain");
    }

    #[test]
    fn finds_directory_behind_comment() {
        let mut writer = ::zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer.set_comment("x".repeat(1000));
        writer.start_file("a.txt", SimpleFileOptions::default()).unwrap();
        writer.write_all(b"hello").unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
        assert_eq!(archive.entries().len(), 1);
    }

    #[test]
    fn tampered_data_is_detected() {
        let data: Vec<u8> = b"the quick brown fox ".repeat(100);
        let mut bytes = build_zip(&[("fox.txt", &data)], ::zip::CompressionMethod::Stored);
        let at = bytes.windows(3).position(|w| w == b"fox").unwrap();
        bytes[at + 40] ^= 0xFF;

        let mut archive = ZipArchive::open(Cursor::new(bytes)).unwrap();
        let err = read_entry(&mut archive, 0).unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn garbage_is_format_error() {
        let err = ZipArchive::open(Cursor::new(vec![0u8; 100])).err().unwrap();
        assert!(matches!(err, Error::Format { .. }));
        let err = ZipArchive::open(Cursor::new(vec![1u8; 5])).err().unwrap();
        assert!(matches!(err, Error::Format { .. }));
    }

    #[test]
    fn zip64_extra_overrides_saturated_fields() {
        let mut extra = Vec::new();
        extra.extend_from_slice(&0x5455u16.to_le_bytes());
        extra.extend_from_slice(&1u16.to_le_bytes());
        extra.push(0);
        extra.extend_from_slice(&ZIP64_EXTRA_ID.to_le_bytes());
        extra.extend_from_slice(&16u16.to_le_bytes());
        extra.extend_from_slice(&(5_000_000_000u64).to_le_bytes());
        extra.extend_from_slice(&(4_500_000_000u64).to_le_bytes());

        let mut uncompressed = 0xFFFF_FFFF;
        let mut compressed = 0xFFFF_FFFF;
        let mut offset = 1234;
        apply_zip64_extra(&extra, &mut uncompressed, &mut compressed, &mut offset).unwrap();
        assert_eq!(uncompressed, 5_000_000_000);
        assert_eq!(compressed, 4_500_000_000);
        assert_eq!(offset, 1234);
    }

    #[test]
    fn dos_timestamps_convert() {
        // 2024-03-15 10:30:20
        let date = ((2024 - 1980) << 9) | (3 << 5) | 15;
        let time = (10 << 11) | (30 << 5) | 10;
        let ts = dos_timestamp(date, time).unwrap();
        let secs = ts.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs();
        assert_eq!(secs, 1_710_498_620);
        assert!(dos_timestamp(0, 0).is_none());
    }
}
