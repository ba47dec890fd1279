//! Merge per-app archives back into a single full-system archive.
//!
//! The reverse of [`crate::split`]: every record of every input is appended
//! to one shared tar writer, each input's own terminator is dropped, and
//! the caller finishes the writer once after the last input. Splitting and
//! merging compose to the identity on the stripped archive.

use std::io::{Read, Write};

use crate::error::{Error, Result};
use crate::tar::{TarReader, TarWriter};

/// Append every record of `reader` to `out`, without terminating `out`.
pub fn merge_into<R: Read, W: Write>(
    reader: &mut TarReader<R>,
    out: &mut TarWriter<W>,
) -> Result<()> {
    while let Some(entry) = reader.next_entry()? {
        reader.copy_entry(&entry, out)?;
    }
    Ok(())
}

/// All inputs of a merge must carry the version of the first one.
pub fn check_version(expected: u32, found: u32) -> Result<()> {
    if expected != found {
        return Err(Error::VersionMismatch { expected, found });
    }
    Ok(())
}
