//! Maps request URLs to the Unix socket to connect to and the request path
//! to put on the wire.
//!
//! The authority of a socket URL is not a network address, so something has
//! to decide which part of the URL names the socket. Three strategies are
//! provided and any `Fn(&Url) -> Result<ResolvedTarget, ResolveError>` can be
//! used in their place:
//!
//! - [`DirectResolver`]: the authority is the percent-encoded socket path,
//!   `http+unix://%2Ftmp%2Fapp.sock/status`.
//! - [`WalkResolver`]: the socket path is embedded unencoded in the URL path
//!   and is found by probing the filesystem, `http://sock.local/tmp/app.sock/status`.
//! - [`FragmentResolver`]: the URL path is the socket and the fragment is the
//!   request path, `http+unix://sock.localhost/tmp/app.sock#/status`.
mod direct;
mod fragment;
mod walk;

use std::{
    ffi::OsString,
    fmt::Display,
    os::unix::ffi::OsStringExt,
    path::{Path, PathBuf},
};

pub use direct::DirectResolver;
pub use fragment::FragmentResolver;
use url::Url;
pub use walk::{Probe, WalkResolver};

use crate::ResolveError;

/// Address of a Unix domain socket.
///
/// Abstract namespace names live in the kernel's socket namespace and are
/// never looked up on the filesystem.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SocketPath {
    Filesystem(PathBuf),
    /// Name without the leading NUL byte.
    Abstract(Vec<u8>),
}

impl SocketPath {
    /// Builds a socket path from raw bytes, a leading NUL byte selects the
    /// abstract namespace.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        match bytes.split_first() {
            Some((0, name)) => Self::Abstract(name.to_vec()),
            _ => Self::Filesystem(PathBuf::from(OsString::from_vec(bytes))),
        }
    }

    /// Percent-decodes `encoded` into a socket path.
    pub fn decode(encoded: &str) -> Self {
        Self::from_bytes(urlencoding::decode_binary(encoded.as_bytes()).into_owned())
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        matches!(self, Self::Abstract(_))
    }

    #[inline]
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Self::Filesystem(path) => Some(path),
            Self::Abstract(_) => None,
        }
    }
}

impl Display for SocketPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocketPath::Filesystem(path) => write!(f, "{}", path.display()),
            SocketPath::Abstract(name) => write!(f, "@{}", String::from_utf8_lossy(name)),
        }
    }
}

impl From<PathBuf> for SocketPath {
    #[inline]
    fn from(path: PathBuf) -> Self {
        Self::Filesystem(path)
    }
}

impl From<&Path> for SocketPath {
    #[inline]
    fn from(path: &Path) -> Self {
        Self::Filesystem(path.to_path_buf())
    }
}

/// Outcome of resolving a URL: where to connect and what to ask for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub socket_path: SocketPath,
    /// Always starts with `/`, may carry a `?query`.
    pub request_path: String,
}

impl ResolvedTarget {
    pub fn new(socket_path: SocketPath, request_path: impl Into<String>) -> Self {
        let mut request_path = request_path.into();
        if !request_path.starts_with('/') {
            request_path.insert(0, '/');
        }
        Self {
            socket_path,
            request_path,
        }
    }
}

/// Strategy deciding which socket a URL addresses.
pub trait Resolver {
    fn resolve(&self, url: &Url) -> Result<ResolvedTarget, ResolveError>;
}

impl<F> Resolver for F
where
    F: Fn(&Url) -> Result<ResolvedTarget, ResolveError>,
{
    #[inline]
    fn resolve(&self, url: &Url) -> Result<ResolvedTarget, ResolveError> {
        (self)(url)
    }
}

/// Appends the url query, if any, to `path`.
pub(crate) fn with_query(mut path: String, url: &Url) -> String {
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        path.push('?');
        path.push_str(query);
    }
    path
}
