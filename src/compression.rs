//! The zlib body layer, a thin wrapper over flate2.

use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{Error, Result};

// Android compresses with the zlib default; we go for the best ratio when
// re-compressing by request.
const COMPRESS_LEVEL: u32 = 9;

fn map_zlib_error(error: std::io::Error) -> std::io::Error {
    let ours = error.get_ref().map_or(false, |inner| inner.is::<Error>());
    if !ours
        && matches!(
            error.kind(),
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData
        )
    {
        Error::ZlibError(error.to_string()).into()
    } else {
        error
    }
}

pub struct DecompressReader<R: Read> {
    inner: ZlibDecoder<R>,
}

impl<R: Read> DecompressReader<R> {
    pub fn new(inner: R) -> DecompressReader<R> {
        DecompressReader { inner: ZlibDecoder::new(inner) }
    }
}

impl<R: Read> Read for DecompressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf).map_err(map_zlib_error)
    }
}

pub struct CompressWriter<W: Write> {
    inner: ZlibEncoder<W>,
}

impl<W: Write> CompressWriter<W> {
    pub fn new(inner: W) -> CompressWriter<W> {
        CompressWriter { inner: ZlibEncoder::new(inner, Compression::new(COMPRESS_LEVEL)) }
    }

    pub fn finish(self) -> Result<W> {
        self.inner.finish().map_err(|e| e.into())
    }
}

impl<W: Write> Write for CompressWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}
