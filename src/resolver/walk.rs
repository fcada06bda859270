use std::{fs, os::unix::fs::FileTypeExt, path::Path};

use url::Url;

use super::{with_query, ResolvedTarget, Resolver, SocketPath};
use crate::ResolveError;

/// A top level path segment starting with this marker names an abstract
/// namespace socket.
const ABSTRACT_MARKER: &str = "%00";

/// What a path prefix must be on disk to be taken as the socket.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Probe {
    /// A socket special file.
    #[default]
    Socket,
    /// Anything that exists.
    Exists,
}

impl Probe {
    fn matches(&self, path: &Path) -> bool {
        match self {
            Probe::Socket => fs::metadata(path)
                .map(|meta| meta.file_type().is_socket())
                .unwrap_or(false),
            Probe::Exists => path.exists(),
        }
    }
}

/// Finds the socket by walking the URL path from the longest prefix down.
///
/// The first prefix that [`Probe`] accepts, or that is a single `/%00name`
/// segment, is the socket. Whatever was split off becomes the request path,
/// so the deepest match wins.
#[derive(Default, Clone, Copy, Debug)]
pub struct WalkResolver {
    probe: Probe,
}

impl WalkResolver {
    #[inline]
    pub const fn new(probe: Probe) -> Self {
        Self { probe }
    }

    #[inline]
    pub fn probe(&self) -> Probe {
        self.probe
    }

    /// Splits a raw (still percent-encoded) URL path into socket path and
    /// request path.
    pub fn split(&self, path: &str) -> Option<(SocketPath, String)> {
        let mut prefix = path;
        let mut rest = Vec::new();
        loop {
            if prefix.is_empty() {
                return None;
            }

            let candidate = SocketPath::decode(prefix);
            if let Some(fs_path) = candidate.as_path() {
                if self.probe.matches(fs_path) {
                    return Some((candidate, join_rest(&rest)));
                }
            }
            if let Some(name) = abstract_name(prefix) {
                let mut bytes = vec![0];
                bytes.extend_from_slice(&urlencoding::decode_binary(name.as_bytes()));
                return Some((SocketPath::from_bytes(bytes), join_rest(&rest)));
            }

            let (head, tail) = prefix.rsplit_once('/')?;
            rest.push(tail);
            prefix = head;
        }
    }
}

impl Resolver for WalkResolver {
    fn resolve(&self, url: &Url) -> Result<ResolvedTarget, ResolveError> {
        let (socket_path, request_path) = self
            .split(url.path())
            .ok_or_else(|| ResolveError::NoSocket(url.path().to_owned()))?;
        Ok(ResolvedTarget::new(socket_path, with_query(request_path, url)))
    }
}

fn abstract_name(prefix: &str) -> Option<&str> {
    let name = prefix.strip_prefix('/')?.strip_prefix(ABSTRACT_MARKER)?;
    if name.contains('/') {
        return None;
    }
    Some(name)
}

// Segments were pushed deepest first.
fn join_rest(rest: &[&str]) -> String {
    let mut segments = rest.to_vec();
    segments.reverse();
    format!("/{}", segments.join("/"))
}
