use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session cache error: {0}")]
    Cache(#[from] serde_json::Error),

    #[error("no data page could be fetched")]
    NoData,
}

impl Error {
    /// Whether the caller can expect a later attempt to succeed without
    /// any change on its side.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Fetch(FetchError::Timeout { .. } | FetchError::Network { .. }) => true,
            Error::Auth(AuthError::Network(_) | AuthError::ConnectionLimit { .. }) => true,
            Error::NoData => true,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("login rejected: {reason}")]
    Rejected { reason: String },

    #[error("device connection limit reached after {attempts} attempts")]
    ConnectionLimit { attempts: u32 },

    #[error("network error during login: {0}")]
    Network(#[source] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} fetching {page}")]
    Http { page: String, status: u16 },

    #[error("session renewal did not help for {page}")]
    ReauthFailed { page: String },

    #[error("network error fetching {page}: {source}")]
    Network {
        page: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("timeout fetching {page}")]
    Timeout { page: String },
}

impl FetchError {
    pub(crate) fn from_reqwest(page: &str, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            FetchError::Timeout {
                page: page.to_string(),
            }
        } else {
            FetchError::Network {
                page: page.to_string(),
                source,
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed XML in {page}: {message}")]
    MalformedXml { page: String, message: String },
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("all {attempts} write strategies failed for {prop}")]
    AllEndpointsFailed { prop: String, attempts: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
