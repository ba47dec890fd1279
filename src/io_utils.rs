//! Read-side helpers shared by the envelope and tar layers.

use std::io::Read;

use crate::error::{Error, Result};

/// Longest header line we are willing to parse. The master-key blob line of
/// an encrypted archive is the longest legitimate one, so this leaves a lot
/// of slack for unusually large salts.
const MAX_HEADER_LINE: usize = 16 * 1024;

/// HeaderRead provides methods for reading the textual Android Backup
/// header primitives: `\n`-terminated lines holding ASCII decimals or hex.
///
/// Lines are read one byte at a time so that no body bytes are consumed
/// past the final header line.
pub trait HeaderRead: Read {
    fn read_header_line(&mut self, what: &str) -> Result<Vec<u8>> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.read_exact(&mut byte) {
                Ok(()) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    return Err(Error::MalformedHeader(format!("{what}: unexpected EOF")));
                }
                Err(e) => return Err(e.into()),
            }
            if byte[0] == b'\n' {
                return Ok(line);
            }
            line.push(byte[0]);
            if line.len() > MAX_HEADER_LINE {
                return Err(Error::MalformedHeader(format!("{what}: line too long")));
            }
        }
    }

    fn read_header_int(&mut self, what: &str) -> Result<u32> {
        let line = self.read_header_line(what)?;
        std::str::from_utf8(&line)
            .ok()
            .and_then(|text| text.parse::<u32>().ok())
            .ok_or_else(|| Error::MalformedHeader(format!("{what}: not a number")))
    }

    fn read_header_hex(&mut self, what: &str) -> Result<Vec<u8>> {
        let line = self.read_header_line(what)?;
        std::str::from_utf8(&line)
            .ok()
            .and_then(|text| hex::decode(text).ok())
            .ok_or_else(|| Error::MalformedHeader(format!("{what}: bad hex")))
    }
}

impl<R: Read> HeaderRead for R {}

/// Read until `buf` is full or the source is exhausted; returns the number
/// of bytes actually read. A short count means EOF.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
