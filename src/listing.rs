//! `tar -tvf`-style rendering of the envelope and entry metadata.

use chrono::DateTime;

use crate::envelope::EnvelopeDescriptor;
use crate::tar::TarEntry;

/// One-line summary of the envelope. Secrets never appear here; for an
/// encrypted archive only the public KDF parameters are shown.
pub fn describe_envelope(desc: &EnvelopeDescriptor) -> String {
    match desc.params() {
        Some(params) => format!(
            "# Android Backup, version: {}, compression: {}, encryption: AES-256 ({} PBKDF2 iterations, {}/{} byte salts)",
            desc.version(),
            desc.is_compressed() as u8,
            params.iterations,
            params.user_salt.len(),
            params.checksum_salt.len(),
        ),
        None => format!(
            "# Android Backup, version: {}, compression: {}, encryption: none",
            desc.version(),
            desc.is_compressed() as u8,
        ),
    }
}

fn ftype_char(ftype: u8) -> char {
    match ftype {
        0 | b'0' | b'7' => '-',
        b'1' => 'h',
        b'2' => 'l',
        b'3' => 'c',
        b'4' => 'b',
        b'5' => 'd',
        b'6' => 'f',
        _ => '?',
    }
}

fn mode_string(mode: u32) -> String {
    let rwx = [b'r', b'w', b'x'];
    let mut out = String::with_capacity(9);
    for bit in (0..9u32).rev() {
        if mode & (1 << bit) != 0 {
            out.push(rwx[(8 - bit as usize) % 3] as char);
        } else {
            out.push('-');
        }
    }
    out
}

fn owner_string(entry: &TarEntry) -> String {
    let user =
        if entry.uname.is_empty() { entry.uid.to_string() } else { entry.uname.clone() };
    let group =
        if entry.gname.is_empty() { entry.gid.to_string() } else { entry.gname.clone() };
    format!("{:<12}", format!("{}/{}", user, group))
}

fn mtime_string(mtime: i64) -> String {
    match DateTime::from_timestamp(mtime, 0) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "????-??-?? ??:??:??".to_string(),
    }
}

/// Render one entry the way `tar -tvf` would.
pub fn entry_line(entry: &TarEntry) -> String {
    let mut line = format!(
        "{}{} {} {:>8} {} {}",
        ftype_char(entry.ftype),
        mode_string(entry.mode),
        owner_string(entry),
        entry.size,
        mtime_string(entry.mtime),
        entry.name,
    );
    match entry.ftype {
        b'1' => {
            line.push_str(" link to ");
            line.push_str(&entry.linkname);
        }
        b'2' => {
            line.push_str(" -> ");
            line.push_str(&entry.linkname);
        }
        _ => {}
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(ftype: u8, mode: u32) -> TarEntry {
        TarEntry {
            raw: Vec::new(),
            name: "apps/com.foo/_manifest".to_string(),
            ftype,
            mode,
            uid: 1000,
            gid: 1000,
            size: 23,
            leftovers: 489,
            mtime: 1_700_000_000,
            linkname: String::new(),
            uname: String::new(),
            gname: String::new(),
            pax: Vec::new(),
        }
    }

    #[test]
    fn test_mode_string() {
        assert_eq!(mode_string(0o644), "rw-r--r--");
        assert_eq!(mode_string(0o755), "rwxr-xr-x");
        assert_eq!(mode_string(0o000), "---------");
    }

    #[test]
    fn test_entry_line() {
        let line = entry_line(&entry(b'0', 0o600));
        assert_eq!(line, "-rw------- 1000/1000          23 2023-11-14 22:13:20 apps/com.foo/_manifest");
    }

    #[test]
    fn test_symlink_target() {
        let mut e = entry(b'2', 0o777);
        e.linkname = "target".to_string();
        assert!(entry_line(&e).ends_with("apps/com.foo/_manifest -> target"));
    }
}
