use url::Url;

use super::{ResolvedTarget, Resolver, SocketPath};
use crate::ResolveError;

/// Takes the URL path as the socket and the fragment as the request path.
///
/// `http+unix://sock.localhost/var/run/docker.sock#/info` connects to
/// `/var/run/docker.sock` and requests `/info`. The authority is ignored.
#[derive(Default, Clone, Copy, Debug)]
pub struct FragmentResolver;

impl Resolver for FragmentResolver {
    fn resolve(&self, url: &Url) -> Result<ResolvedTarget, ResolveError> {
        let path = url.path();
        if path.is_empty() || path == "/" {
            return Err(ResolveError::NoSocket(path.to_owned()));
        }
        Ok(ResolvedTarget::new(
            SocketPath::decode(path),
            url.fragment().unwrap_or_default(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn fragment_is_request_path() {
        let url = Url::parse("http+unix://sock.localhost/var/run/docker.sock#/info").unwrap();
        let target = FragmentResolver.resolve(&url).unwrap();
        assert_eq!(
            target.socket_path,
            SocketPath::Filesystem(PathBuf::from("/var/run/docker.sock"))
        );
        assert_eq!(target.request_path, "/info");
    }

    #[test]
    fn missing_fragment_is_root() {
        let url = Url::parse("http+unix://sock.localhost/var/run/docker.sock").unwrap();
        assert_eq!(FragmentResolver.resolve(&url).unwrap().request_path, "/");
    }

    #[test]
    fn needs_a_path() {
        let url = Url::parse("http+unix://sock.localhost/#/info").unwrap();
        assert!(FragmentResolver.resolve(&url).is_err());
    }
}
