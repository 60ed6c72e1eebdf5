//! Sequential TAR reading over a decompressing transport.
//!
//! Handles ustar prefixes, GNU long names (`L`/`K`) and PAX extended
//! headers (`x`). Global PAX headers are skipped.

use std::time::{Duration, SystemTime};

use sk_core::Error;
use tracing::trace;

use super::{ArchiveEntry, EntryKind, Transport};

const BLOCK: u64 = 512;
/// Upper bound for GNU long names and PAX records.
const MAX_META_LEN: u64 = 1024 * 1024;

pub struct TarReader<T: Transport> {
    transport: T,
    /// Unread data of the current entry
    remaining: u64,
    /// Padding after the current entry's data
    padding: u64,
    done: bool,
}

#[derive(Default)]
struct Overrides {
    path: Option<String>,
    link: Option<String>,
    size: Option<u64>,
    mtime: Option<u64>,
}

impl<T: Transport> TarReader<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            remaining: 0,
            padding: 0,
            done: false,
        }
    }

    /// Advance to the next entry, skipping whatever is left of the current
    /// one. `None` at the end-of-archive marker or end of stream.
    pub fn next_entry(&mut self) -> Result<Option<ArchiveEntry>, Error> {
        let mut overrides = Overrides::default();

        loop {
            self.skip_rest()?;
            if self.done {
                return Ok(None);
            }

            let mut header = [0u8; BLOCK as usize];
            let n = self.transport.read_full(&mut header)?;
            if n == 0 {
                self.done = true;
                return Ok(None);
            }
            if n < header.len() {
                return Err(Error::format("tar: truncated header"));
            }

            if header.iter().all(|&b| b == 0) {
                // a second zero block (or nothing at all) ends the archive
                let n = self.transport.read_full(&mut header)?;
                if n == 0 || header.iter().all(|&b| b == 0) {
                    self.done = true;
                    return Ok(None);
                }
                return Err(Error::format("tar: data after end-of-archive block"));
            }

            verify_checksum(&header)?;

            let size = overrides
                .size
                .take()
                .map_or_else(|| parse_numeric(&header[124..136]), Ok)?;
            let padded = size
                .checked_next_multiple_of(BLOCK)
                .ok_or_else(|| Error::format(format!("tar: entry size {size} out of range")))?;
            self.remaining = size;
            self.padding = padded - size;

            let typeflag = header[156];
            match typeflag {
                b'L' => {
                    overrides.path = Some(self.read_meta(size)?);
                    continue;
                }
                b'K' => {
                    overrides.link = Some(self.read_meta(size)?);
                    continue;
                }
                b'x' => {
                    let records = self.read_meta(size)?;
                    parse_pax(&records, &mut overrides)?;
                    continue;
                }
                b'g' => continue,
                _ => {}
            }

            let path = overrides
                .path
                .take()
                .unwrap_or_else(|| header_path(&header));
            let link_target = overrides
                .link
                .take()
                .or_else(|| Some(field_str(&header[157..257])).filter(|s| !s.is_empty()));

            let kind = match typeflag {
                b'0' | b'\0' | b'7' if path.ends_with('/') => EntryKind::Directory,
                b'0' | b'\0' | b'7' => EntryKind::File,
                b'1' => EntryKind::HardLink,
                b'2' => EntryKind::Symlink,
                b'5' => EntryKind::Directory,
                _ => EntryKind::Other,
            };

            let mtime = match overrides.mtime.take() {
                Some(t) => Some(t),
                None => parse_numeric(&header[136..148]).ok(),
            };
            let mode = parse_numeric(&header[100..108]).ok().map(|m| m as u32);

            trace!(path = %path, size, ?kind, "tar entry");

            return Ok(Some(ArchiveEntry {
                path,
                compressed_size: size,
                uncompressed_size: size,
                crc32: 0,
                method: 0,
                kind,
                modified: mtime.map(|t| SystemTime::UNIX_EPOCH + Duration::from_secs(t)),
                mode,
                link_target,
                header_offset: 0,
            }));
        }
    }

    /// Stream the current entry's data into `sink`.
    pub fn write_entry(
        &mut self,
        sink: &mut dyn FnMut(&[u8]) -> bool,
        extracted: &mut u64,
    ) -> Result<(), Error> {
        let size = self.remaining;
        self.remaining = 0;
        self.transport.write_to(sink, size, extracted)
    }

    /// Skip the current entry's data without copying it out.
    pub fn skip_entry(&mut self) -> Result<(), Error> {
        self.skip_rest()
    }

    fn skip_rest(&mut self) -> Result<(), Error> {
        let skip = self
            .remaining
            .checked_add(self.padding)
            .ok_or_else(|| Error::format("tar: entry size out of range"))?;
        self.remaining = 0;
        self.padding = 0;
        if skip > 0 {
            self.transport.discard(skip)?;
        }
        Ok(())
    }

    fn read_meta(&mut self, size: u64) -> Result<String, Error> {
        if size > MAX_META_LEN {
            return Err(Error::format("tar: extended header too large"));
        }
        let mut data = vec![0u8; size as usize];
        if self.transport.read_full(&mut data)? != data.len() {
            return Err(Error::format("tar: truncated extended header"));
        }
        self.remaining = 0;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        data.truncate(end);
        String::from_utf8(data).map_err(|_| Error::format("tar: extended header is not utf-8"))
    }

    pub fn into_inner(self) -> T {
        self.transport
    }
}

fn field_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn header_path(header: &[u8]) -> String {
    let name = field_str(&header[0..100]);
    // only POSIX ustar has a prefix field; GNU reuses those bytes
    if &header[257..263] == b"ustar\0" {
        let prefix = field_str(&header[345..500]);
        if !prefix.is_empty() {
            return format!("{prefix}/{name}");
        }
    }
    name
}

/// Octal, space/NUL padded; GNU base-256 when the high bit is set.
fn parse_numeric(field: &[u8]) -> Result<u64, Error> {
    if let Some(&first) = field.first()
        && first & 0x80 != 0
    {
        let mut value: u64 = (first & 0x7F) as u64;
        for &b in &field[1..] {
            value = value
                .checked_mul(256)
                .and_then(|v| v.checked_add(b as u64))
                .ok_or_else(|| Error::format("tar: numeric field overflow"))?;
        }
        return Ok(value);
    }

    let text = std::str::from_utf8(field)
        .map_err(|_| Error::format("tar: bad numeric field"))?
        .trim_matches(|c: char| c == ' ' || c == '\0');
    if text.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(text, 8).map_err(|_| Error::format(format!("tar: bad octal '{text}'")))
}

fn verify_checksum(header: &[u8]) -> Result<(), Error> {
    let stored = parse_numeric(&header[148..156])?;
    let mut unsigned: u64 = 0;
    let mut signed: i64 = 0;
    for (i, &b) in header.iter().enumerate() {
        let b = if (148..156).contains(&i) { b' ' } else { b };
        unsigned += b as u64;
        signed += (b as i8) as i64;
    }
    if stored == unsigned || stored as i64 == signed {
        Ok(())
    } else {
        Err(Error::format("tar: header checksum mismatch"))
    }
}

/// PAX records: `"<len> <key>=<value>\n"`, where len counts the whole record.
fn parse_pax(records: &str, overrides: &mut Overrides) -> Result<(), Error> {
    let mut rest = records;
    while !rest.is_empty() {
        let (len, _) = rest
            .split_once(' ')
            .ok_or_else(|| Error::format("tar: malformed pax record"))?;
        let len: usize = len
            .parse()
            .map_err(|_| Error::format("tar: malformed pax record length"))?;
        if len == 0 || len > rest.len() || !rest.is_char_boundary(len) {
            return Err(Error::format("tar: pax record length out of range"));
        }
        let record = &rest[..len];
        rest = &rest[len..];

        let body = record
            .split_once(' ')
            .map(|(_, body)| body.trim_end_matches('\n'))
            .unwrap_or_default();
        let Some((key, value)) = body.split_once('=') else {
            continue;
        };
        match key {
            "path" => overrides.path = Some(value.to_string()),
            "linkpath" => overrides.link = Some(value.to_string()),
            "size" => overrides.size = value.parse().ok(),
            "mtime" => {
                // fractional seconds are allowed
                overrides.mtime = value.split('.').next().and_then(|s| s.parse().ok());
            }
            _ => {}
        }
    }
    Ok(())
}
