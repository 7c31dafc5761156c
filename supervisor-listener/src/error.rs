use std::string::FromUtf8Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed token {token:?}, expected key:value")]
    MalformedToken { token: String },

    #[error("header line longer than {limit} bytes")]
    HeaderTooLong { limit: usize },

    #[error("header is not valid utf-8: {0}")]
    HeaderEncoding(FromUtf8Error),

    #[error("invalid payload length {0:?}")]
    InvalidLength(String),

    #[error("input closed after {read} of {expected} payload bytes")]
    TruncatedPayload { read: usize, expected: usize },

    #[error("payload is not valid utf-8: {0}")]
    PayloadEncoding(#[from] FromUtf8Error),

    #[error("failed io operation: {0}")]
    Io(#[from] std::io::Error),
}
