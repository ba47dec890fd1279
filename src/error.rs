pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    BadMagic,
    UnsupportedVersion(u32),
    MalformedHeader(String),
    WrongPassphrase,
    CorruptedEncryptedHeader,
    TruncatedBody,
    ZlibError(String),
    TarChecksumError(u64),
    InvalidTarHeader(String),
    PaxHeaderTooLarge(u64),
    BadPackageName(String),
    VersionMismatch { expected: u32, found: u32 },
    CryptoError,
    IoError(std::io::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match *self {
            Error::BadMagic => write!(f, "not an Android Backup file"),
            Error::UnsupportedVersion(v) => write!(f, "unknown Android Backup version: {v}"),
            Error::MalformedHeader(ref what) => write!(f, "unable to parse header: {what}"),
            Error::WrongPassphrase => write!(f, "failed to decrypt, wrong passphrase?"),
            Error::CorruptedEncryptedHeader => {
                write!(f, "bad master key checksum, wrong passphrase?")
            }
            Error::TruncatedBody => write!(f, "unexpected end of archive body"),
            Error::ZlibError(ref msg) => write!(f, "zlib error: {msg}"),
            Error::TarChecksumError(offset) => {
                write!(f, "TAR header checksum mismatch at offset {offset}")
            }
            Error::InvalidTarHeader(ref msg) => write!(f, "invalid TAR header: {msg}"),
            Error::PaxHeaderTooLarge(size) => {
                write!(f, "PAX extended header too large: {size} bytes")
            }
            Error::BadPackageName(ref name) => {
                write!(f, "bad package name in app manifest path: `{name}`")
            }
            Error::VersionMismatch { expected, found } => write!(
                f,
                "can't merge Android Backup files with different versions: expected {expected}, found {found}"
            ),
            Error::CryptoError => write!(f, "crypto provider failure"),
            Error::IoError(ref err) => write!(f, "IO error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            _ => None,
        }
    }
}

// The streaming adapters in `crypto` and `compression` implement
// `std::io::Read`/`Write`, so crate errors crossing those seams travel
// boxed inside an `io::Error` and are unwrapped again here.
impl std::convert::From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        if error.get_ref().map_or(false, |inner| inner.is::<Error>()) {
            match error.into_inner().and_then(|b| b.downcast::<Error>().ok()) {
                Some(e) => *e,
                None => Error::CryptoError,
            }
        } else {
            Error::IoError(error)
        }
    }
}

impl std::convert::From<Error> for std::io::Error {
    fn from(error: Error) -> std::io::Error {
        match error {
            Error::IoError(err) => err,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}
