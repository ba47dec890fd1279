//! Split a full-system backup into one archive per app.
//!
//! The backup manager lays out a full-system archive as an optional
//! preamble (shared storage, and so on) followed by runs of
//! `apps/<package>/...` entries, each run starting with the package's
//! `_manifest`. Those manifest entries are the group boundaries here.

use std::io::Read;

use crate::envelope::EnvelopeWriter;
use crate::error::{Error, Result};
use crate::tar::{TarEntry, TarReader, TarWriter};

/// Return the package name when `name` is an app-boundary marker, i.e.
/// exactly `apps/<package>/_manifest`.
fn manifest_package(name: &str) -> Result<Option<&str>> {
    let package = match name
        .strip_prefix("apps/")
        .and_then(|rest| rest.strip_suffix("/_manifest"))
    {
        Some(p) => p,
        None => return Ok(None),
    };
    if package.contains('/') {
        // a file named `_manifest` deeper inside some app's data
        return Ok(None);
    }
    if package.is_empty() || package == "." || package == ".." {
        return Err(Error::BadPackageName(package.to_string()));
    }
    Ok(Some(package))
}

/// Walk the tar stream and route every record into per-package envelopes
/// obtained from `new_sink(group index, package)`. Entries before the first
/// manifest form the preamble group with the empty package name; `x`/`g`
/// metadata records travel with the entry that follows them, so the
/// concatenation of all groups' bodies reproduces the input order exactly.
///
/// Returns the number of groups written. An input without any manifest
/// marker (even a zero-entry one) produces exactly one group.
pub fn split<R, F>(reader: &mut TarReader<R>, mut new_sink: F) -> Result<usize>
where
    R: Read,
    F: FnMut(usize, &str) -> Result<EnvelopeWriter>,
{
    let mut groups = 0usize;
    let mut current: Option<(String, TarWriter<EnvelopeWriter>)> = None;
    let mut held: Vec<TarEntry> = Vec::new();

    while let Some(entry) = reader.next_entry()? {
        if entry.is_pax() {
            held.push(entry);
            continue;
        }
        let marker = manifest_package(&entry.name)?;
        let rotate = match (&current, marker) {
            (None, _) => true,
            (Some((package, _)), Some(found)) => package != found,
            (Some(_), None) => false,
        };
        if rotate {
            if let Some((_, writer)) = current.take() {
                close_group(writer)?;
            }
            let package = marker.unwrap_or("");
            let sink = new_sink(groups, package)?;
            groups += 1;
            current = Some((package.to_string(), TarWriter::new(sink)));
        }
        if let Some((_, writer)) = current.as_mut() {
            for metadata in held.drain(..) {
                writer.write_entry(&metadata)?;
            }
            reader.copy_entry(&entry, writer)?;
        }
    }

    // a zero-entry archive still yields its (empty) preamble group
    if current.is_none() {
        let sink = new_sink(groups, "")?;
        groups += 1;
        current = Some((String::new(), TarWriter::new(sink)));
    }
    if let Some((_, writer)) = current.as_mut() {
        for metadata in held.drain(..) {
            writer.write_entry(&metadata)?;
        }
    }
    if let Some((_, writer)) = current.take() {
        close_group(writer)?;
    }
    Ok(groups)
}

fn close_group(mut writer: TarWriter<EnvelopeWriter>) -> Result<()> {
    writer.finish()?;
    writer.into_inner().finish()
}
