use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP Request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server error: status code {status_code}, message: {message}")]
    Server {
        status_code: u16,
        message: String,
    },

    #[error("Upload incomplete expected: {expected}, actual: {actual}")]
    UploadIncomplete {
        expected: u64,
        actual: u64,
    },

    #[error("Invalid '{header_name}' header: {message}")]
    HeaderParse {
        header_name: String,
        message: String,
    },

    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),

    #[error("Invalid url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// 由传输实现自行描述的失败，原样展示给用户
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn server_error(status_code: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status_code,
            message: message.into(),
        }
    }

    pub fn header_parse(header_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HeaderParse {
            header_name: header_name.into(),
            message: message.into(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

/// Error alias
pub type Result<T, E = TransportError> = std::result::Result<T, E>;
