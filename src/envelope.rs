//! The Android Backup envelope: a short textual header followed by the
//! tar body, optionally wrapped in zlib and/or AES-256-CBC.
//!
//! The header is ASCII, `\n`-terminated lines:
//!
//! ```text
//! ANDROID BACKUP
//! <version, decimal, 1..=5>
//! <compression flag, 0 or 1>
//! <encryption algorithm, "none" or "AES-256">
//! ```
//!
//! When the algorithm is `AES-256`, five more lines follow:
//!
//! ```text
//! <user salt, hex>
//! <master-key checksum salt, hex>
//! <PBKDF2 iteration count, decimal>
//! <user key IV, hex>
//! <master key blob, hex>
//! ```
//!
//! The master key blob decrypts (under the PBKDF2-derived user key) to a
//! length-prefixed triple: the body IV, the body key, and a checksum over
//! the body key. Everything after the last header line is the body:
//! `AES(zlib(tar))`, `AES(tar)`, `zlib(tar)` or the tar itself.

use std::io::{Read, Write};

use crate::compression::{CompressWriter, DecompressReader};
use crate::crypto;
use crate::crypto::{DecryptReader, EncryptWriter};
use crate::error::{Error, Result};
use crate::io_utils::HeaderRead;

pub const MAGIC: &[u8] = b"ANDROID BACKUP";
pub const MIN_VERSION: u32 = 1;
pub const MAX_VERSION: u32 = 5;
pub const DEFAULT_SALT_BYTES: usize = 64;
pub const DEFAULT_ITERATIONS: u32 = 10_000;

/// Encryption material exactly as it appears in the header of an encrypted
/// archive. Decrypting the blob requires the passphrase.
#[derive(Debug, Clone)]
pub struct EncryptionParams {
    pub user_salt: Vec<u8>,
    pub checksum_salt: Vec<u8>,
    pub iterations: u32,
    pub user_iv: Vec<u8>,
    pub master_blob: Vec<u8>,
}

/// Parsed (or intended) envelope header. The encryption parameters exist
/// only in the encrypted shapes.
#[derive(Debug, Clone)]
pub enum EnvelopeDescriptor {
    Plain { version: u32 },
    Compressed { version: u32 },
    Encrypted { version: u32, params: EncryptionParams },
    EncryptedCompressed { version: u32, params: EncryptionParams },
}

impl EnvelopeDescriptor {
    fn new(version: u32, compressed: bool, params: Option<EncryptionParams>) -> EnvelopeDescriptor {
        match (compressed, params) {
            (false, None) => EnvelopeDescriptor::Plain { version },
            (true, None) => EnvelopeDescriptor::Compressed { version },
            (false, Some(params)) => EnvelopeDescriptor::Encrypted { version, params },
            (true, Some(params)) => EnvelopeDescriptor::EncryptedCompressed { version, params },
        }
    }

    pub fn version(&self) -> u32 {
        match *self {
            EnvelopeDescriptor::Plain { version }
            | EnvelopeDescriptor::Compressed { version }
            | EnvelopeDescriptor::Encrypted { version, .. }
            | EnvelopeDescriptor::EncryptedCompressed { version, .. } => version,
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(
            *self,
            EnvelopeDescriptor::Compressed { .. } | EnvelopeDescriptor::EncryptedCompressed { .. }
        )
    }

    pub fn is_encrypted(&self) -> bool {
        self.params().is_some()
    }

    pub fn params(&self) -> Option<&EncryptionParams> {
        match *self {
            EnvelopeDescriptor::Encrypted { ref params, .. }
            | EnvelopeDescriptor::EncryptedCompressed { ref params, .. } => Some(params),
            _ => None,
        }
    }
}

fn check_version(version: u32) -> Result<u32> {
    if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
        return Err(Error::UnsupportedVersion(version));
    }
    Ok(version)
}

/// Parse the textual header, leaving the source positioned at the first
/// body byte.
pub fn read_header<R: Read>(src: &mut R) -> Result<EnvelopeDescriptor> {
    let magic = src.read_header_line("magic")?;
    if magic != MAGIC {
        return Err(Error::BadMagic);
    }
    let version = check_version(src.read_header_int("version")?)?;
    let compressed = match src.read_header_int("compression")? {
        0 => false,
        1 => true,
        other => {
            return Err(Error::MalformedHeader(format!("unknown compression flag: {other}")))
        }
    };
    let algo = src.read_header_line("encryption")?.to_ascii_uppercase();
    let params = match algo.as_slice() {
        b"NONE" => None,
        b"AES-256" => {
            let user_salt = src.read_header_hex("user salt")?;
            let checksum_salt = src.read_header_hex("checksum salt")?;
            let iterations = src.read_header_int("iterations")?;
            let user_iv = src.read_header_hex("user IV")?;
            let master_blob = src.read_header_hex("master key blob")?;
            if user_iv.len() != crypto::IV_SIZE {
                return Err(Error::MalformedHeader("user IV is not 16 bytes".to_string()));
            }
            if master_blob.is_empty() || master_blob.len() % crypto::BLOCK_SIZE != 0 {
                return Err(Error::MalformedHeader(
                    "master key blob is not a whole number of AES blocks".to_string(),
                ));
            }
            Some(EncryptionParams { user_salt, checksum_salt, iterations, user_iv, master_blob })
        }
        _ => {
            return Err(Error::MalformedHeader(format!(
                "unknown encryption algorithm: {}",
                String::from_utf8_lossy(&algo)
            )))
        }
    };
    Ok(EnvelopeDescriptor::new(version, compressed, params))
}

/// Derive the user key, open the master-key blob, and verify the stored
/// checksum against both known encodings.
fn unlock(
    params: &EncryptionParams,
    passphrase: &[u8],
    ignore_checksum: bool,
) -> Result<crypto::MasterKeys> {
    let user_key = crypto::derive_key(passphrase, &params.user_salt, params.iterations, crypto::KEY_SIZE)?;
    let blob = crypto::decrypt_blob(&user_key, &params.user_iv, &params.master_blob)?;
    let keys = crypto::parse_master_blob(&blob)?;
    if !ignore_checksum {
        let candidates =
            crypto::checksum_candidates(&keys.master_key, &params.checksum_salt, params.iterations)?;
        if !candidates.iter().any(|c| c[..] == keys.checksum[..]) {
            return Err(Error::CorruptedEncryptedHeader);
        }
    }
    Ok(keys)
}

/// Open an archive for reading: parse the header, set up decryption and
/// (unless `decompress` is off, as in the keep-compression fast path)
/// decompression, and hand back the raw tar byte stream.
///
/// The passphrase provider is called at most once, and only for an
/// encrypted input.
pub fn open_read<R, F>(
    mut src: R,
    passphrase: F,
    ignore_checksum: bool,
    decompress: bool,
) -> Result<(EnvelopeDescriptor, Box<dyn Read>)>
where
    R: Read + 'static,
    F: FnOnce() -> Result<Vec<u8>>,
{
    let desc = read_header(&mut src)?;
    let mut body: Box<dyn Read> = Box::new(src);
    if let Some(params) = desc.params() {
        let keys = unlock(params, &passphrase()?, ignore_checksum)?;
        body = Box::new(DecryptReader::new(body, &keys.master_key, &keys.tar_iv)?);
    }
    if decompress && desc.is_compressed() {
        body = Box::new(DecompressReader::new(body));
    }
    Ok((desc, body))
}

/// Output encryption parameters. Fresh salts, IVs and master key are drawn
/// per archive; only the passphrase is caller-supplied.
#[derive(Clone)]
pub struct EncryptOptions {
    pub passphrase: Vec<u8>,
    pub salt_bytes: usize,
    pub iterations: u32,
}

impl EncryptOptions {
    pub fn new(passphrase: Vec<u8>) -> EncryptOptions {
        EncryptOptions {
            passphrase,
            salt_bytes: DEFAULT_SALT_BYTES,
            iterations: DEFAULT_ITERATIONS,
        }
    }
}

pub struct WriteOptions {
    pub version: u32,
    pub compress: bool,
    pub encrypt: Option<EncryptOptions>,
}

enum BodySink {
    Plain(Box<dyn Write>),
    Encrypted(EncryptWriter<Box<dyn Write>>),
    Compressed(CompressWriter<Box<dyn Write>>),
    EncryptedCompressed(CompressWriter<EncryptWriter<Box<dyn Write>>>),
}

/// The body side of a freshly written envelope. Bytes written here come out
/// compressed and/or encrypted as requested; `finish` settles the zlib
/// stream and the final cipher block.
pub struct EnvelopeWriter {
    sink: Option<BodySink>,
}

impl EnvelopeWriter {
    pub fn finish(mut self) -> Result<()> {
        match self.sink.take() {
            Some(BodySink::Plain(mut w)) => {
                w.flush()?;
            }
            Some(BodySink::Encrypted(w)) => {
                w.finish()?;
            }
            Some(BodySink::Compressed(w)) => {
                let mut inner = w.finish()?;
                inner.flush()?;
            }
            Some(BodySink::EncryptedCompressed(w)) => {
                let enc = w.finish()?;
                enc.finish()?;
            }
            None => {}
        }
        Ok(())
    }
}

impl Write for EnvelopeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.sink.as_mut() {
            Some(BodySink::Plain(w)) => w.write(buf),
            Some(BodySink::Encrypted(w)) => w.write(buf),
            Some(BodySink::Compressed(w)) => w.write(buf),
            Some(BodySink::EncryptedCompressed(w)) => w.write(buf),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "write into a finished envelope",
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.sink.as_mut() {
            Some(BodySink::Plain(w)) => w.flush(),
            Some(BodySink::Encrypted(w)) => w.flush(),
            Some(BodySink::Compressed(w)) => w.flush(),
            Some(BodySink::EncryptedCompressed(w)) => w.flush(),
            None => Ok(()),
        }
    }
}

/// Emit a header with encryption disabled, for the verbatim body-copy path
/// where the compression flag is inherited from the input.
pub fn write_raw_header<W: Write>(dst: &mut W, version: u32, compressed: bool) -> Result<()> {
    check_version(version)?;
    write!(dst, "ANDROID BACKUP\n{}\n{}\nnone\n", version, compressed as u8)?;
    Ok(())
}

/// Open an archive for writing: emit the header (generating fresh
/// encryption material if requested) and wrap the destination so that tar
/// bytes written to the result are encoded as the header announces.
pub fn open_write<W>(mut dst: W, opts: &WriteOptions) -> Result<EnvelopeWriter>
where
    W: Write + 'static,
{
    check_version(opts.version)?;
    let algo = if opts.encrypt.is_some() { "AES-256" } else { "none" };
    write!(dst, "ANDROID BACKUP\n{}\n{}\n{}\n", opts.version, opts.compress as u8, algo)?;

    let mut body: Box<dyn Write> = Box::new(dst);
    let sink = if let Some(enc) = &opts.encrypt {
        let user_salt = crypto::random_bytes(enc.salt_bytes)?;
        let checksum_salt = crypto::random_bytes(enc.salt_bytes)?;
        let user_iv = crypto::random_bytes(crypto::IV_SIZE)?;
        let tar_iv = crypto::random_bytes(crypto::IV_SIZE)?;
        let master_key = crypto::random_bytes(crypto::KEY_SIZE)?;

        // Android checksums the Java-mangled form of the key
        let checksum = crypto::derive_key(
            &crypto::mangle_master_key(&master_key),
            &checksum_salt,
            enc.iterations,
            crypto::CHECKSUM_SIZE,
        )?;
        let blob = crypto::pack_master_blob(&tar_iv, &master_key, &checksum);
        let user_key =
            crypto::derive_key(&enc.passphrase, &user_salt, enc.iterations, crypto::KEY_SIZE)?;
        let user_blob = crypto::encrypt_blob(&user_key, &user_iv, &blob)?;

        write!(
            body,
            "{}\n{}\n{}\n{}\n{}\n",
            hex::encode_upper(&user_salt),
            hex::encode_upper(&checksum_salt),
            enc.iterations,
            hex::encode_upper(&user_iv),
            hex::encode_upper(&user_blob)
        )?;
        let enc_writer = EncryptWriter::new(body, &master_key, &tar_iv)?;
        if opts.compress {
            BodySink::EncryptedCompressed(CompressWriter::new(enc_writer))
        } else {
            BodySink::Encrypted(enc_writer)
        }
    } else if opts.compress {
        BodySink::Compressed(CompressWriter::new(body))
    } else {
        BodySink::Plain(body)
    };
    Ok(EnvelopeWriter { sink: Some(sink) })
}
