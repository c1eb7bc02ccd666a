/// The result surface shared by every hub operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced to callers of the hub.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("bad parameter: {0}")]
    BadParameter(String),
    #[error("not found")]
    NotFound,
    #[error("unsupported")]
    Unsupported,
    #[error("duplicate")]
    Duplicate,
    #[error("out of memory")]
    NoMemory,
    #[error("format error: {0}")]
    FormatError(String),
    #[error("i/o error: {0}")]
    IoError(String),
    #[error("value overflows the string capacity")]
    Overflow,
    #[error("data type mismatch")]
    TypeMismatch,
    #[error("route would form a loop")]
    WouldCycle,
    #[error("operation already in progress")]
    Busy,
    #[error("stream closed")]
    Closed,
    #[error("fault: {0}")]
    Fault(String),
}

impl Error {
    pub fn bad_parameter(msg: impl Into<String>) -> Error {
        Error::BadParameter(msg.into())
    }
}

impl From<sample::ConvertError> for Error {
    fn from(err: sample::ConvertError) -> Error {
        match err {
            sample::ConvertError::Overflow => Error::Overflow,
            sample::ConvertError::TypeMismatch => Error::TypeMismatch,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Error {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound,
            _ => Error::IoError(err.to_string()),
        }
    }
}
