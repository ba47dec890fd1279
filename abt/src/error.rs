use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    Ab(abx::error::Error),
    IoError(std::io::Error),
    CliInputError(String),
    NotFound(String),
    RefuseOverwrite(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Ab(err) => write!(f, "{}", err),
            Error::IoError(err) => write!(f, "IO error: {}", err),
            Error::CliInputError(msg) => write!(f, "CLI input error: {}", msg),
            Error::NotFound(path) => write!(f, "file `{}` does not exist", path),
            Error::RefuseOverwrite(path) => {
                write!(f, "refusing to overwrite existing file `{}`", path)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Ab(err) => Some(err),
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl std::convert::From<abx::error::Error> for Error {
    fn from(error: abx::error::Error) -> Error {
        Error::Ab(error)
    }
}

// `abx` errors crossing a `Read`/`Write` seam arrive boxed inside an
// `io::Error`; recover them so the user sees the real failure.
impl std::convert::From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        match abx::error::Error::from(error) {
            abx::error::Error::IoError(io) => Error::IoError(io),
            recovered => Error::Ab(recovered),
        }
    }
}
