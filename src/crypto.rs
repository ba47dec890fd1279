//! Key derivation and the streaming AES-256-CBC layer of the envelope.
//!
//! The Android backup manager derives the user key with PBKDF2-HMAC-SHA1,
//! keeps the actual archive key in a small encrypted blob inside the header,
//! and runs the body through AES-256-CBC with PKCS#7 padding. The blob is
//! tiny and handled in one shot; the body layer is streaming.

use std::io::{Read, Write};
use std::num::NonZeroU32;

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ring::rand::SecureRandom;

use crate::error::{Error, Result};
use crate::io_utils::read_full;

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;

pub const BLOCK_SIZE: usize = 16;
pub const KEY_SIZE: usize = 32;
pub const IV_SIZE: usize = 16;
pub const CHECKSUM_SIZE: usize = 32;

// 8 KiB of ciphertext per inner read
const CHUNK_SIZE: usize = 512 * BLOCK_SIZE;

/// PBKDF2-HMAC-SHA1 as used by Android for both the user key and the
/// master-key checksum.
pub fn derive_key(secret: &[u8], salt: &[u8], iterations: u32, out_len: usize) -> Result<Vec<u8>> {
    let iterations = NonZeroU32::new(iterations)
        .ok_or_else(|| Error::MalformedHeader("zero PBKDF2 iteration count".to_string()))?;
    let mut out = vec![0u8; out_len];
    ring::pbkdf2::derive(ring::pbkdf2::PBKDF2_HMAC_SHA1, iterations, salt, secret, &mut out);
    Ok(out)
}

/// Fresh random material for salts, IVs and keys.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let rng = ring::rand::SystemRandom::new();
    let mut out = vec![0u8; len];
    rng.fill(&mut out).map_err(|_| Error::CryptoError)?;
    Ok(out)
}

/// Re-encode the master key the way Java's implicit String conversion does:
/// bytes with the high bit set become the UTF-8 encoding of codepoint
/// `0xFF00 | byte`. Android derives the stored checksum from this form.
pub fn mangle_master_key(master_key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(master_key.len());
    for &b in master_key {
        if b < 0x80 {
            out.push(b);
        } else {
            // three-byte UTF-8 of a codepoint in U+FF80..=U+FFFF
            let cp = 0xFF00u32 | u32::from(b);
            out.push(0xE0 | (cp >> 12) as u8);
            out.push(0x80 | ((cp >> 6) & 0x3F) as u8);
            out.push(0x80 | (cp & 0x3F) as u8);
        }
    }
    out
}

/// Both checksum encodings seen in the wild: the Java-mangled key (what
/// current Android writes) and the raw key bytes.
pub fn checksum_candidates(master_key: &[u8], salt: &[u8], iterations: u32) -> Result<[Vec<u8>; 2]> {
    let mangled = derive_key(&mangle_master_key(master_key), salt, iterations, CHECKSUM_SIZE)?;
    let plain = derive_key(master_key, salt, iterations, CHECKSUM_SIZE)?;
    Ok([mangled, plain])
}

/// Contents of the decrypted master-key blob.
pub struct MasterKeys {
    pub tar_iv: Vec<u8>,
    pub master_key: Vec<u8>,
    pub checksum: Vec<u8>,
}

fn take_field<'a>(rest: &mut &'a [u8], want: usize) -> Result<&'a [u8]> {
    match rest.split_first() {
        Some((&len, tail)) if len as usize == want && tail.len() >= want => {
            let (field, after) = tail.split_at(want);
            *rest = after;
            Ok(field)
        }
        // a wrong length prefix means the blob decrypted to garbage
        _ => Err(Error::WrongPassphrase),
    }
}

/// Parse the length-prefixed plaintext blob: 16-byte tar IV, 32-byte master
/// key, 32-byte checksum.
pub fn parse_master_blob(blob: &[u8]) -> Result<MasterKeys> {
    let mut rest = blob;
    let tar_iv = take_field(&mut rest, IV_SIZE)?.to_vec();
    let master_key = take_field(&mut rest, KEY_SIZE)?.to_vec();
    let checksum = take_field(&mut rest, CHECKSUM_SIZE)?.to_vec();
    Ok(MasterKeys { tar_iv, master_key, checksum })
}

pub fn pack_master_blob(tar_iv: &[u8], master_key: &[u8], checksum: &[u8]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(3 + tar_iv.len() + master_key.len() + checksum.len());
    blob.push(tar_iv.len() as u8);
    blob.extend_from_slice(tar_iv);
    blob.push(master_key.len() as u8);
    blob.extend_from_slice(master_key);
    blob.push(checksum.len() as u8);
    blob.extend_from_slice(checksum);
    blob
}

/// One-shot AES-256-CBC with PKCS#7, for the master-key blob only.
pub fn decrypt_blob(key: &[u8], iv: &[u8], blob: &[u8]) -> Result<Vec<u8>> {
    let mut data = blob.to_vec();
    let plain = Aes256CbcDec::new_from_slices(key, iv)
        .map_err(|_| Error::CryptoError)?
        .decrypt_padded_mut::<Pkcs7>(&mut data)
        .map_err(|_| Error::WrongPassphrase)?;
    Ok(plain.to_vec())
}

pub fn encrypt_blob(key: &[u8], iv: &[u8], plain: &[u8]) -> Result<Vec<u8>> {
    let msg_len = plain.len();
    let mut data = vec![0u8; (msg_len / BLOCK_SIZE + 1) * BLOCK_SIZE];
    data[..msg_len].copy_from_slice(plain);
    let out = Aes256CbcEnc::new_from_slices(key, iv)
        .map_err(|_| Error::CryptoError)?
        .encrypt_padded_mut::<Pkcs7>(&mut data, msg_len)
        .map_err(|_| Error::CryptoError)?;
    Ok(out.to_vec())
}

fn unpad(block: &[u8; BLOCK_SIZE]) -> Result<&[u8]> {
    let pad = block[BLOCK_SIZE - 1] as usize;
    if pad == 0 || pad > BLOCK_SIZE {
        return Err(Error::WrongPassphrase);
    }
    if block[BLOCK_SIZE - pad..].iter().any(|&b| b as usize != pad) {
        return Err(Error::WrongPassphrase);
    }
    Ok(&block[..BLOCK_SIZE - pad])
}

/// Streaming AES-256-CBC decryption with PKCS#7 removal at EOF.
///
/// The most recently decrypted block is held back until the next inner read
/// proves whether it was the final (padded) one.
pub struct DecryptReader<R: Read> {
    inner: R,
    cipher: Aes256CbcDec,
    in_buf: Box<[u8]>,
    plain: Vec<u8>,
    held: Option<[u8; BLOCK_SIZE]>,
    eof: bool,
}

impl<R: Read> DecryptReader<R> {
    pub fn new(inner: R, key: &[u8], iv: &[u8]) -> Result<DecryptReader<R>> {
        let cipher = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| Error::CryptoError)?;
        Ok(DecryptReader {
            inner,
            cipher,
            in_buf: vec![0u8; CHUNK_SIZE].into_boxed_slice(),
            plain: Vec::with_capacity(CHUNK_SIZE),
            held: None,
            eof: false,
        })
    }

    fn refill(&mut self) -> std::io::Result<()> {
        let n = read_full(&mut self.inner, &mut self.in_buf)?;
        if n == 0 {
            self.eof = true;
            return match self.held.take() {
                Some(block) => {
                    let content = unpad(&block)?;
                    self.plain.extend_from_slice(content);
                    Ok(())
                }
                // an AES-256-CBC body is never empty
                None => Err(Error::TruncatedBody.into()),
            };
        }
        if n % BLOCK_SIZE != 0 {
            return Err(Error::TruncatedBody.into());
        }
        if let Some(block) = self.held.take() {
            self.plain.extend_from_slice(&block);
        }
        let data = &mut self.in_buf[..n];
        for block in data.chunks_exact_mut(BLOCK_SIZE) {
            self.cipher.decrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        let (body, last) = data.split_at(n - BLOCK_SIZE);
        self.plain.extend_from_slice(body);
        let mut held = [0u8; BLOCK_SIZE];
        held.copy_from_slice(last);
        self.held = Some(held);
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        while self.plain.is_empty() && !self.eof {
            self.refill()?;
        }
        let n = std::cmp::min(self.plain.len(), buf.len());
        buf[..n].copy_from_slice(&self.plain[..n]);
        self.plain.drain(..n);
        Ok(n)
    }
}

/// Streaming AES-256-CBC encryption; `finish` appends the PKCS#7 padding
/// block and flushes the inner writer.
pub struct EncryptWriter<W: Write> {
    inner: W,
    cipher: Aes256CbcEnc,
    pending: Vec<u8>,
}

impl<W: Write> EncryptWriter<W> {
    pub fn new(inner: W, key: &[u8], iv: &[u8]) -> Result<EncryptWriter<W>> {
        let cipher = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| Error::CryptoError)?;
        Ok(EncryptWriter { inner, cipher, pending: Vec::with_capacity(BLOCK_SIZE) })
    }

    pub fn finish(self) -> Result<W> {
        let EncryptWriter { mut inner, mut cipher, pending } = self;
        let pad = BLOCK_SIZE - pending.len() % BLOCK_SIZE;
        let mut tail = pending;
        tail.extend(std::iter::repeat(pad as u8).take(pad));
        for block in tail.chunks_exact_mut(BLOCK_SIZE) {
            cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
        }
        inner.write_all(&tail)?;
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.pending.extend_from_slice(buf);
        let full = self.pending.len() / BLOCK_SIZE * BLOCK_SIZE;
        if full > 0 {
            let mut head: Vec<u8> = self.pending.drain(..full).collect();
            for block in head.chunks_exact_mut(BLOCK_SIZE) {
                self.cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
            }
            self.inner.write_all(&head)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
