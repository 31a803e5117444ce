/// Errors from talking to Reddit
#[derive(Debug, thiserror::Error)]
pub enum RedditError {
    #[error("missing environment variable {0}")]
    MissingEnv(String),

    #[error("REDDIT_PASSWORD_BASE64 is not valid base64 UTF-8: {0}")]
    InvalidPassword(String),

    #[error("HTTP request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {body}")]
    Status { url: String, status: u16, body: String },

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

impl RedditError {
    pub(crate) fn http(url: &str, source: reqwest::Error) -> Self {
        Self::Http {
            url: url.to_string(),
            source,
        }
    }

    pub(crate) fn decode(url: &str, message: impl std::fmt::Display) -> Self {
        Self::Decode {
            url: url.to_string(),
            message: message.to_string(),
        }
    }
}
