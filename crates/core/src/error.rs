use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Bad encoding: {0}")]
    BadEncoding(String),

    #[error("Invalid content identifier: {0}")]
    Cid(#[from] cid::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Shorthand for malformed wire or archive data.
    pub fn bad_encoding(msg: impl Into<String>) -> Self {
        CoreError::BadEncoding(msg.into())
    }
}
