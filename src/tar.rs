//! Streaming PAX tar reader and writer.
//!
//! This is an iterator-style take on the tar format: the source is read
//! once, without seeking. Entries carry their raw on-disk header bytes next
//! to a small decoded view, so a stream that came out of the reader can be
//! re-emitted byte-for-byte. File payloads are never buffered; the caller
//! either copies them with [`TarReader::copy_entry`] or lets the next
//! [`TarReader::next_entry`] call skip them.

use std::io::{Read, Write};

use crate::error::{Error, Result};

pub const BLOCK_SIZE: usize = 512;

/// Hard cap on one PAX extended-header payload. Real ones are a few KiB.
pub const PAX_PAYLOAD_LIMIT: u64 = 1024 * 1024;

const COPY_BUFFER: usize = 64 * 1024;

/// One tar record. For `x`/`g` records `raw` holds the header block plus
/// the extended-header payload and its padding; for everything else it is
/// the bare 512-byte header block and the payload stays in the stream.
#[derive(Debug, Clone)]
pub struct TarEntry {
    pub raw: Vec<u8>,
    pub name: String,
    pub ftype: u8,
    pub mode: u32,
    pub uid: u64,
    pub gid: u64,
    pub size: u64,
    pub leftovers: u64,
    pub mtime: i64,
    pub linkname: String,
    pub uname: String,
    pub gname: String,
    pub pax: Vec<(String, Vec<u8>)>,
}

impl TarEntry {
    pub fn is_pax(&self) -> bool {
        matches!(self.ftype, b'x' | b'g')
    }

    /// Bytes of payload plus padding that follow `raw` on the wire.
    pub fn payload_len(&self) -> u64 {
        if self.is_pax() {
            0
        } else {
            self.size + self.leftovers
        }
    }

    pub fn pax_value(&self, key: &str) -> Option<&[u8]> {
        self.pax.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_slice())
    }
}

fn field_str(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Numeric header field: octal ASCII, or GNU base-256 when the first byte
/// is 0o200 (positive) or 0o377 (negative).
fn field_num(buf: &[u8], what: &str) -> Result<i64> {
    match buf.first() {
        Some(&0o200) | Some(&0o377) => {
            let mut n: i64 = if buf[0] == 0o377 { -1 } else { 0 };
            for &b in &buf[1..] {
                n = n
                    .checked_mul(256)
                    .and_then(|v| v.checked_add(i64::from(b)))
                    .ok_or_else(|| {
                        Error::InvalidTarHeader(format!("numeric field overflow: {what}"))
                    })?;
            }
            Ok(n)
        }
        _ => {
            let text = field_str(buf);
            let text = text.trim_matches(|c: char| c == ' ' || c == '\0');
            if text.is_empty() {
                return Ok(0);
            }
            i64::from_str_radix(text, 8)
                .map_err(|_| Error::InvalidTarHeader(format!("bad numeric field: {what}")))
        }
    }
}

/// Header checksum: byte sum of the block with the checksum field itself
/// read as spaces.
fn header_checksum(block: &[u8]) -> i64 {
    let mut sum: i64 = 0;
    for (i, &b) in block.iter().enumerate() {
        if (148..156).contains(&i) {
            sum += i64::from(b' ');
        } else {
            sum += i64::from(b);
        }
    }
    sum
}

fn upsert(map: &mut Vec<(String, Vec<u8>)>, key: String, value: Vec<u8>) {
    match map.iter_mut().find(|(k, _)| *k == key) {
        Some(slot) => slot.1 = value,
        None => map.push((key, value)),
    }
}

/// Parse `<len> <key>=<value>\n` records, see the "pax Header Block"
/// section in `man 1 pax`. `len` counts the whole record.
fn parse_pax_records(data: &[u8]) -> Result<Vec<(String, Vec<u8>)>> {
    let mut records = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| Error::InvalidTarHeader("bad PAX record length".to_string()))?;
        let len: usize = std::str::from_utf8(&rest[..space])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::InvalidTarHeader("bad PAX record length".to_string()))?;
        if len <= space + 1 || len > rest.len() || rest[len - 1] != b'\n' {
            return Err(Error::InvalidTarHeader("bad PAX record length".to_string()));
        }
        let body = &rest[space + 1..len - 1];
        rest = &rest[len..];

        let eq = body
            .iter()
            .position(|&b| b == b'=')
            .ok_or_else(|| Error::InvalidTarHeader("PAX record without `=`".to_string()))?;
        let key = std::str::from_utf8(&body[..eq])
            .map_err(|_| Error::InvalidTarHeader("non-UTF-8 PAX key".to_string()))?
            .to_string();
        upsert(&mut records, key, body[eq + 1..].to_vec());
    }
    Ok(records)
}

fn pax_str(value: &[u8], what: &str) -> Result<String> {
    String::from_utf8(value.to_vec())
        .map_err(|_| Error::InvalidTarHeader(format!("non-UTF-8 PAX value for {what}")))
}

/// PAX time values may carry a fractional part; the view keeps whole
/// seconds (or whole units for the id/size keys).
fn pax_int(value: &[u8], what: &str) -> Result<i64> {
    let text = pax_str(value, what)?;
    let whole = text.split('.').next().unwrap_or("");
    whole
        .parse::<i64>()
        .map_err(|_| Error::InvalidTarHeader(format!("bad numeric PAX value for {what}")))
}

fn leftovers_of(size: u64) -> u64 {
    match size % BLOCK_SIZE as u64 {
        0 => 0,
        rem => BLOCK_SIZE as u64 - rem,
    }
}

/// Streaming tar reader. `x` and `g` records are yielded like any other
/// entry (with their payload folded into `raw`) and their key/value pairs
/// are applied to the decoded view of the entries that follow.
pub struct TarReader<R: Read> {
    inner: R,
    offset: u64,
    pending: u64,
    terminated: bool,
    global_pax: Vec<(String, Vec<u8>)>,
    next_pax: Option<Vec<(String, Vec<u8>)>>,
}

impl<R: Read> TarReader<R> {
    pub fn new(inner: R) -> TarReader<R> {
        TarReader {
            inner,
            offset: 0,
            pending: 0,
            terminated: false,
            global_pax: Vec::new(),
            next_pax: None,
        }
    }

    fn read_exact_or_truncated(&mut self, buf: &mut [u8]) -> Result<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(Error::TruncatedBody)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Parse and return the next record, skipping whatever payload of the
    /// previous record the caller did not consume.
    pub fn next_entry(&mut self) -> Result<Option<TarEntry>> {
        if self.terminated {
            return Ok(None);
        }
        self.skip_payload()?;

        let mut block = [0u8; BLOCK_SIZE];
        let mut zeros = 0;
        loop {
            let block_offset = self.offset;
            self.read_exact_or_truncated(&mut block)?;

            if block.iter().all(|&b| b == 0) {
                zeros += 1;
                if zeros >= 2 {
                    self.terminated = true;
                    return Ok(None);
                }
                continue;
            }

            let stored = field_num(&block[148..156], "chksum")?;
            if stored != header_checksum(&block) {
                return Err(Error::TarChecksumError(block_offset));
            }

            let mut name = field_str(&block[0..100]);
            let prefix = field_str(&block[345..500]);
            if !prefix.is_empty() {
                name = format!("{}/{}", prefix, name);
            }
            let size = field_num(&block[124..136], "size")?.max(0) as u64;
            let ftype = block[156];

            if ftype == b'x' || ftype == b'g' {
                return self.read_pax_record(&block, name, size, ftype).map(Some);
            }

            let effective = self.take_effective_pax();
            let mut entry = TarEntry {
                raw: block.to_vec(),
                name,
                ftype,
                mode: field_num(&block[100..108], "mode")?.max(0) as u32,
                uid: field_num(&block[108..116], "uid")?.max(0) as u64,
                gid: field_num(&block[116..124], "gid")?.max(0) as u64,
                size,
                leftovers: 0,
                mtime: field_num(&block[136..148], "mtime")?,
                linkname: field_str(&block[157..257]),
                uname: field_str(&block[265..297]),
                gname: field_str(&block[297..329]),
                pax: effective,
            };
            self.apply_pax_overrides(&mut entry)?;
            entry.leftovers = leftovers_of(entry.size);
            self.pending = entry.size + entry.leftovers;
            return Ok(Some(entry));
        }
    }

    fn read_pax_record(
        &mut self,
        block: &[u8; BLOCK_SIZE],
        name: String,
        size: u64,
        ftype: u8,
    ) -> Result<TarEntry> {
        if size > PAX_PAYLOAD_LIMIT {
            return Err(Error::PaxHeaderTooLarge(size));
        }
        let padded = size + leftovers_of(size);
        let mut raw = vec![0u8; BLOCK_SIZE + padded as usize];
        raw[..BLOCK_SIZE].copy_from_slice(block);
        self.read_exact_or_truncated(&mut raw[BLOCK_SIZE..])?;

        let records = parse_pax_records(&raw[BLOCK_SIZE..BLOCK_SIZE + size as usize])?;
        if ftype == b'g' {
            self.global_pax = records.clone();
            self.next_pax = None;
        } else {
            let mut merged = self.global_pax.clone();
            for (k, v) in &records {
                upsert(&mut merged, k.clone(), v.clone());
            }
            self.next_pax = Some(merged);
        }

        Ok(TarEntry {
            raw,
            name,
            ftype,
            mode: field_num(&block[100..108], "mode")?.max(0) as u32,
            uid: field_num(&block[108..116], "uid")?.max(0) as u64,
            gid: field_num(&block[116..124], "gid")?.max(0) as u64,
            size: 0,
            leftovers: 0,
            mtime: field_num(&block[136..148], "mtime")?,
            linkname: field_str(&block[157..257]),
            uname: field_str(&block[265..297]),
            gname: field_str(&block[297..329]),
            pax: records,
        })
    }

    fn take_effective_pax(&mut self) -> Vec<(String, Vec<u8>)> {
        match self.next_pax.take() {
            Some(merged) => merged,
            None => self.global_pax.clone(),
        }
    }

    fn apply_pax_overrides(&mut self, entry: &mut TarEntry) -> Result<()> {
        // borrow dance: collect the overrides first
        let mut name = None;
        let mut linkname = None;
        let mut uname = None;
        let mut gname = None;
        let mut size = None;
        let mut uid = None;
        let mut gid = None;
        let mut mtime = None;
        for (key, value) in &entry.pax {
            match key.as_str() {
                "path" => name = Some(pax_str(value, "path")?),
                "linkpath" => linkname = Some(pax_str(value, "linkpath")?),
                "uname" => uname = Some(pax_str(value, "uname")?),
                "gname" => gname = Some(pax_str(value, "gname")?),
                "size" => size = Some(pax_int(value, "size")?.max(0) as u64),
                "uid" => uid = Some(pax_int(value, "uid")?.max(0) as u64),
                "gid" => gid = Some(pax_int(value, "gid")?.max(0) as u64),
                "mtime" => mtime = Some(pax_int(value, "mtime")?),
                _ => {}
            }
        }
        if let Some(v) = name {
            entry.name = v;
        }
        if let Some(v) = linkname {
            entry.linkname = v;
        }
        if let Some(v) = uname {
            entry.uname = v;
        }
        if let Some(v) = gname {
            entry.gname = v;
        }
        if let Some(v) = size {
            entry.size = v;
        }
        if let Some(v) = uid {
            entry.uid = v;
        }
        if let Some(v) = gid {
            entry.gid = v;
        }
        if let Some(v) = mtime {
            entry.mtime = v;
        }
        Ok(())
    }

    /// Throw away whatever payload bytes of the current entry are still in
    /// the stream.
    pub fn skip_payload(&mut self) -> Result<()> {
        let mut buf = vec![0u8; COPY_BUFFER];
        while self.pending > 0 {
            let want = self.pending.min(COPY_BUFFER as u64) as usize;
            let n = self.inner.read(&mut buf[..want]).map_err(Error::from)?;
            if n == 0 {
                return Err(Error::TruncatedBody);
            }
            self.offset += n as u64;
            self.pending -= n as u64;
        }
        Ok(())
    }

    /// Write `entry` (which must be the most recent result of
    /// [`next_entry`]) and its payload into `out`.
    pub fn copy_entry<W: Write>(&mut self, entry: &TarEntry, out: &mut TarWriter<W>) -> Result<()> {
        out.write_entry(entry)?;
        let mut buf = vec![0u8; COPY_BUFFER];
        while self.pending > 0 {
            let want = self.pending.min(COPY_BUFFER as u64) as usize;
            let n = self.inner.read(&mut buf[..want]).map_err(Error::from)?;
            if n == 0 {
                return Err(Error::TruncatedBody);
            }
            self.offset += n as u64;
            self.pending -= n as u64;
            out.write_payload(&buf[..n])?;
        }
        Ok(())
    }
}

/// Streaming tar writer. Serialisation is bit-exact: records are emitted
/// from their raw bytes, payload byte counts are checked against the
/// declared sizes, and nothing can be written once the terminator is out.
pub struct TarWriter<W: Write> {
    inner: W,
    owed: u64,
    finished: bool,
}

impl<W: Write> TarWriter<W> {
    pub fn new(inner: W) -> TarWriter<W> {
        TarWriter { inner, owed: 0, finished: false }
    }

    pub fn write_entry(&mut self, entry: &TarEntry) -> Result<()> {
        if self.finished {
            return Err(Error::InvalidTarHeader("write after terminator".to_string()));
        }
        if self.owed != 0 {
            return Err(Error::InvalidTarHeader(format!(
                "previous entry short by {} payload bytes",
                self.owed
            )));
        }
        self.inner.write_all(&entry.raw)?;
        self.owed = entry.payload_len();
        Ok(())
    }

    pub fn write_payload(&mut self, data: &[u8]) -> Result<()> {
        if data.len() as u64 > self.owed {
            return Err(Error::InvalidTarHeader("payload exceeds declared size".to_string()));
        }
        self.inner.write_all(data)?;
        self.owed -= data.len() as u64;
        Ok(())
    }

    /// Emit the two all-zero terminator blocks and flush.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.owed != 0 {
            return Err(Error::InvalidTarHeader(format!(
                "last entry short by {} payload bytes",
                self.owed
            )));
        }
        self.inner.write_all(&[0u8; 2 * BLOCK_SIZE])?;
        self.inner.flush()?;
        self.finished = true;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    pub fn raw_header(name: &str, size: u64, ftype: u8) -> [u8; BLOCK_SIZE] {
        let mut block = [0u8; BLOCK_SIZE];
        block[0..name.len()].copy_from_slice(name.as_bytes());
        block[100..107].copy_from_slice(b"0000644");
        block[108..115].copy_from_slice(b"0001750");
        block[116..123].copy_from_slice(b"0001750");
        let size_field = format!("{:011o}", size);
        block[124..124 + size_field.len()].copy_from_slice(size_field.as_bytes());
        block[136..147].copy_from_slice(b"14000000000");
        block[156] = ftype;
        block[257..265].copy_from_slice(b"ustar\x0000");
        let sum = header_checksum(&block);
        let chksum = format!("{:06o}\0 ", sum);
        block[148..156].copy_from_slice(chksum.as_bytes());
        block
    }

    pub fn file_entry(name: &str, payload: &[u8]) -> Vec<u8> {
        let mut out = raw_header(name, payload.len() as u64, b'0').to_vec();
        out.extend_from_slice(payload);
        out.extend(std::iter::repeat(0u8).take(leftovers_of(payload.len() as u64) as usize));
        out
    }

    pub fn pax_entry(name: &str, records: &[(&str, &str)]) -> Vec<u8> {
        let mut payload = Vec::new();
        for (key, value) in records {
            // the length field counts itself, so iterate until it settles
            let body = key.len() + value.len() + 3;
            let mut len = body + 1;
            while format!("{}", len).len() + body != len {
                len = format!("{}", len).len() + body;
            }
            payload.extend_from_slice(format!("{} {}={}\n", len, key, value).as_bytes());
        }
        let mut out = raw_header(name, payload.len() as u64, b'x').to_vec();
        out.extend_from_slice(&payload);
        out.extend(std::iter::repeat(0u8).take(leftovers_of(payload.len() as u64) as usize));
        out
    }

    pub fn terminator() -> Vec<u8> {
        vec![0u8; 2 * BLOCK_SIZE]
    }

    #[test]
    fn test_read_simple_entries() {
        let mut data = Vec::new();
        data.extend(file_entry("shared/data.bin", b"hello"));
        data.extend(file_entry("apps/a/_manifest", b""));
        data.extend(terminator());

        let mut reader = TarReader::new(Cursor::new(data));
        let first = reader.next_entry().unwrap().unwrap();
        assert_eq!(first.name, "shared/data.bin");
        assert_eq!(first.size, 5);
        assert_eq!(first.leftovers, 507);
        assert_eq!(first.mode, 0o644);

        let second = reader.next_entry().unwrap().unwrap();
        assert_eq!(second.name, "apps/a/_manifest");
        assert_eq!(second.size, 0);

        assert!(reader.next_entry().unwrap().is_none());
        // stays terminated
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_round_trip_bit_exact() {
        let mut data = Vec::new();
        data.extend(pax_entry("pax0", &[("path", "apps/a/really-long-name.dat")]));
        data.extend(file_entry("apps/a/short", b"payload bytes here"));
        data.extend(file_entry("apps/b/other", &[0xAAu8; 1024]));
        data.extend(terminator());

        let mut reader = TarReader::new(Cursor::new(data.clone()));
        let mut writer = TarWriter::new(Vec::new());
        while let Some(entry) = reader.next_entry().unwrap() {
            reader.copy_entry(&entry, &mut writer).unwrap();
        }
        writer.finish().unwrap();
        assert_eq!(writer.into_inner(), data);
    }

    #[test]
    fn test_pax_path_override() {
        let mut data = Vec::new();
        data.extend(pax_entry("pax0", &[("path", "apps/a/really-long-name.dat")]));
        data.extend(file_entry("apps/a/short", b"payload"));
        data.extend(file_entry("apps/a/plain", b""));
        data.extend(terminator());

        let mut reader = TarReader::new(Cursor::new(data));
        let pax = reader.next_entry().unwrap().unwrap();
        assert!(pax.is_pax());
        assert_eq!(pax.pax_value("path").unwrap(), b"apps/a/really-long-name.dat");

        let overridden = reader.next_entry().unwrap().unwrap();
        assert_eq!(overridden.name, "apps/a/really-long-name.dat");

        // the x record applies to the next entry only
        let plain = reader.next_entry().unwrap().unwrap();
        assert_eq!(plain.name, "apps/a/plain");
    }

    #[test]
    fn test_global_pax_applies_to_all() {
        let payload = b"15 uname=radio\n";
        let mut global = raw_header("g0", payload.len() as u64, b'g').to_vec();
        global.extend_from_slice(payload);
        global.extend(std::iter::repeat(0u8).take(leftovers_of(payload.len() as u64) as usize));

        let mut data = Vec::new();
        data.extend(global);
        data.extend(file_entry("one", b""));
        data.extend(file_entry("two", b""));
        data.extend(terminator());

        let mut reader = TarReader::new(Cursor::new(data));
        let g = reader.next_entry().unwrap().unwrap();
        assert_eq!(g.ftype, b'g');
        let one = reader.next_entry().unwrap().unwrap();
        assert_eq!(one.uname, "radio");
        let two = reader.next_entry().unwrap().unwrap();
        assert_eq!(two.uname, "radio");
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut entry = file_entry("apps/a/file", b"data");
        entry[0] ^= 0xFF; // breaks the sum
        let mut data = entry;
        data.extend(terminator());

        let mut reader = TarReader::new(Cursor::new(data));
        match reader.next_entry() {
            Err(Error::TarChecksumError(0)) => {}
            other => panic!("expected TarChecksumError, got {:?}", other),
        }
    }

    #[test]
    fn test_lone_zero_block_is_skipped() {
        let mut data = vec![0u8; BLOCK_SIZE];
        data.extend(file_entry("after-hole", b""));
        data.extend(terminator());

        let mut reader = TarReader::new(Cursor::new(data));
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "after-hole");
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_truncated_stream() {
        let mut data = file_entry("apps/a/file", b"data");
        data.truncate(data.len() - 100);

        let mut reader = TarReader::new(Cursor::new(data));
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.name, "apps/a/file");
        match reader.next_entry() {
            Err(Error::TruncatedBody) => {}
            other => panic!("expected TruncatedBody, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_terminator() {
        let data = file_entry("apps/a/file", b"");
        let mut reader = TarReader::new(Cursor::new(data));
        reader.next_entry().unwrap().unwrap();
        match reader.next_entry() {
            Err(Error::TruncatedBody) => {}
            other => panic!("expected TruncatedBody, got {:?}", other),
        }
    }

    #[test]
    fn test_pax_header_too_large() {
        let block = raw_header("huge", 2 * 1024 * 1024, b'x');
        let mut reader = TarReader::new(Cursor::new(block.to_vec()));
        match reader.next_entry() {
            Err(Error::PaxHeaderTooLarge(_)) => {}
            other => panic!("expected PaxHeaderTooLarge, got {:?}", other),
        }
    }

    #[test]
    fn test_trailing_bytes_after_terminator_are_dropped() {
        let mut data = file_entry("only", b"x");
        data.extend(terminator());
        data.extend_from_slice(b"trailing garbage that tar utilities sometimes leave");

        let mut reader = TarReader::new(Cursor::new(data));
        reader.next_entry().unwrap().unwrap();
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn test_writer_refuses_after_finish() {
        let entry_bytes = file_entry("one", b"");
        let mut reader = TarReader::new(Cursor::new({
            let mut d = entry_bytes;
            d.extend(terminator());
            d
        }));
        let entry = reader.next_entry().unwrap().unwrap();

        let mut writer = TarWriter::new(Vec::new());
        writer.write_entry(&entry).unwrap();
        writer.finish().unwrap();
        assert!(writer.write_entry(&entry).is_err());
    }

    #[test]
    fn test_writer_checks_payload_accounting() {
        let data = {
            let mut d = file_entry("file", b"12345");
            d.extend(terminator());
            d
        };
        let mut reader = TarReader::new(Cursor::new(data));
        let entry = reader.next_entry().unwrap().unwrap();

        let mut writer = TarWriter::new(Vec::new());
        writer.write_entry(&entry).unwrap();
        // header block owes 512 payload+padding bytes
        assert!(writer.finish().is_err());
        writer.write_payload(&[0u8; 512]).unwrap();
        writer.finish().unwrap();
    }
}
