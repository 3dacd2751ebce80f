use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("nom parser error: {0:?}")]
    Nom(nom::error::ErrorKind),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("malformed draw command: {0}")]
    MalformedDrawCommand(String),
    #[error("unsupported container {path:?}: {reason}")]
    UnsupportedContainer { path: PathBuf, reason: String },
    #[error("no entry ending with {suffix:?} in {path:?}")]
    LogEntryNotFound { path: PathBuf, suffix: &'static str },
    #[error("no log file is loaded")]
    NoLogLoaded,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error {
    pub kind: ErrorKind,
}

impl Error {
    pub fn malformed(msg: impl Into<String>) -> Self {
        ErrorKind::MalformedMessage(msg.into()).into()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        ErrorKind::Io(err).into()
    }
}

impl From<zip::result::ZipError> for Error {
    fn from(err: zip::result::ZipError) -> Self {
        ErrorKind::Zip(err).into()
    }
}

impl<I> nom::error::ParseError<I> for Error {
    fn from_error_kind(_input: I, kind: nom::error::ErrorKind) -> Self {
        ErrorKind::Nom(kind).into()
    }

    fn append(_input: I, _kind: nom::error::ErrorKind, other: Self) -> Self {
        other
    }
}

pub fn failure_from_kind(kind: ErrorKind) -> nom::Err<Error> {
    nom::Err::Failure(kind.into())
}

impl From<nom::Err<Error>> for Error {
    fn from(err: nom::Err<Error>) -> Self {
        match err {
            nom::Err::Incomplete(_) => {
                ErrorKind::MalformedDrawCommand("unexpected end of command".to_string()).into()
            }
            nom::Err::Error(e) | nom::Err::Failure(e) => e,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub type IResult<'a, T> = nom::IResult<&'a [u8], T, Error>;
