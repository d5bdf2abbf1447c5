use thiserror::Error;
use url::Url;

/// Failure to obtain the text of a linked stylesheet or `@import` target.
/// Fetch errors are per-source: the pass continues with an empty slot and
/// the error is surfaced through the error hook and the log.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request for \"{url}\" failed: {source}")]
    Request { url: Url, source: reqwest::Error },
    #[error("request for \"{url}\" returned status {status}")]
    Status {
        url: Url,
        status: reqwest::StatusCode,
    },
    #[error("could not read \"{url}\": {source}")]
    File { url: Url, source: std::io::Error },
    #[error("unsupported URL scheme in \"{url}\"")]
    Scheme { url: Url },
    #[error("invalid URL \"{href}\": {source}")]
    Href {
        href: String,
        source: url::ParseError,
    },
}
