use url::Url;

use super::{with_query, ResolvedTarget, Resolver, SocketPath};
use crate::ResolveError;

/// Reads the socket path from the percent-encoded URL authority.
///
/// Nothing is checked against the filesystem, the socket path is trusted as
/// given and a bad one only shows up when connecting.
#[derive(Default, Clone, Copy, Debug)]
pub struct DirectResolver;

impl Resolver for DirectResolver {
    fn resolve(&self, url: &Url) -> Result<ResolvedTarget, ResolveError> {
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(ResolveError::MissingAuthority)?;
        Ok(ResolvedTarget::new(
            SocketPath::decode(host),
            with_query(url.path().to_owned(), url),
        ))
    }
}
