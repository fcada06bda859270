use std::{io, time::Duration};

use thiserror::Error as ThisError;

use crate::resolver::SocketPath;

#[derive(ThisError, Debug)]
pub enum TransportError {
    #[error("invalid url {0}")]
    Url(#[from] url::ParseError),
    #[error("no adapter mounted for url {0}")]
    InvalidSchema(String),
    #[error("resolve error {0}")]
    Resolve(#[from] ResolveError),
    #[error("connect to {path} failed: {source}")]
    Connect {
        path: SocketPath,
        #[source]
        source: io::Error,
    },
    #[error("{0} does not support specifying proxies")]
    ProxyNotSupported(&'static str),
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Http crate error {0}")]
    Http(#[from] monoio_http::common::error::HttpError),
    #[error("http header error {0}")]
    HttpCrate(#[from] http::Error),
    #[error("invalid request path {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),
    #[error("io error {0}")]
    Io(#[from] io::Error),
}

impl TransportError {
    /// Whether the error happened before a connection was established.
    ///
    /// Callers that only care about "could not reach the socket" match on
    /// this instead of on the individual variants.
    pub fn is_connect(&self) -> bool {
        matches!(
            self,
            Self::Connect { .. } | Self::Resolve(_) | Self::ConnectTimeout(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::ConnectTimeout(_))
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Missing authority in url")]
    MissingAuthority,
    #[error("no unix socket found along path {0}")]
    NoSocket(String),
}
