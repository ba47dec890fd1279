//! Stream opening, output-name derivation and passphrase resolution.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{Error, Result};

/// Extensions recognised when deriving names from an input path.
pub const AB_EXTENSIONS: &[&str] = &["ab", "adb"];
pub const TAR_EXTENSIONS: &[&str] = &["tar"];

pub fn open_input(path: &str) -> Result<Box<dyn Read>> {
    if path == "-" {
        return Ok(Box::new(std::io::stdin()));
    }
    match File::open(path) {
        Ok(file) => Ok(Box::new(file)),
        Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(Error::NotFound(path.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Create an output file, never clobbering anything that already exists
/// (in particular, never the input).
pub fn create_output(path: &str) -> Result<Box<dyn Write>> {
    if path == "-" {
        return Ok(Box::new(std::io::stdout()));
    }
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Box::new(file)),
        Err(ref e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            Err(Error::RefuseOverwrite(path.to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// The input path without its recognised extension, or unchanged when the
/// extension is something else.
pub fn stem_of(path: &str, exts: &[&str]) -> String {
    let p = Path::new(path);
    match p.extension().and_then(|e| e.to_str()) {
        Some(ext) if exts.iter().any(|known| known.eq_ignore_ascii_case(ext)) => {
            p.with_extension("").to_string_lossy().into_owned()
        }
        _ => path.to_string(),
    }
}

/// Default output path: stdin maps to stdout, a file input maps to its stem
/// plus `suffix`.
pub fn default_output(input: &str, exts: &[&str], suffix: &str) -> String {
    if input == "-" {
        "-".to_string()
    } else {
        format!("{}{}", stem_of(input, exts), suffix)
    }
}

/// Resolution order: explicit passphrase, explicit passfile, a sibling
/// `<stem>.passphrase.txt` next to the input, then an interactive prompt.
/// Passfile contents are used verbatim, byte for byte.
pub fn resolve_passphrase(
    explicit: Option<&str>,
    passfile: Option<&str>,
    input_path: Option<&str>,
    prompt: &str,
) -> Result<Vec<u8>> {
    if let Some(passphrase) = explicit {
        return Ok(passphrase.as_bytes().to_vec());
    }
    if let Some(path) = passfile {
        return match std::fs::read(path) {
            Ok(data) => Ok(data),
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        };
    }
    if let Some(input) = input_path {
        let sibling = format!("{}.passphrase.txt", stem_of(input, AB_EXTENSIONS));
        if let Ok(data) = std::fs::read(&sibling) {
            return Ok(data);
        }
    }
    let passphrase = rpassword::prompt_password(prompt)?;
    Ok(passphrase.into_bytes())
}
