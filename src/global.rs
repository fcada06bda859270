//! A thread-wide default session, so plain calls like [`get`] understand
//! socket URLs once [`monkeypatch`] has been called.
use std::cell::{Cell, RefCell};

use http::Method;

use crate::session::{default_schemes, RequestBuilder, Session};

thread_local! {
    // Installed sessions, the last one is the default.
    static PATCHES: RefCell<Vec<(u64, Session)>> = const { RefCell::new(Vec::new()) };
    static NEXT_PATCH_ID: Cell<u64> = const { Cell::new(0) };
}

/// Guard returned by [`monkeypatch`].
///
/// Dropping it removes only its own session, so guards may be dropped in any
/// order and the default is always the most recent patch still alive.
#[must_use = "the patch is undone when the guard is dropped"]
pub struct MonkeyPatch {
    id: u64,
    session: Session,
}

impl MonkeyPatch {
    /// Installs a session mounting a [`UnixAdapter`](crate::UnixAdapter) on
    /// each of `schemes` as this thread's default.
    pub fn install<I, S>(schemes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let session: Session = Session::with_schemes(schemes);
        let id = NEXT_PATCH_ID.with(|next| next.replace(next.get() + 1));
        PATCHES.with(|patches| patches.borrow_mut().push((id, session.clone())));
        #[cfg(feature = "logging")]
        tracing::debug!("installed default session {:?}", session);
        Self { id, session }
    }

    #[inline]
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for MonkeyPatch {
    fn drop(&mut self) {
        let id = self.id;
        // Ignore drops during thread teardown.
        let _ = PATCHES.try_with(|patches| patches.borrow_mut().retain(|(p, _)| *p != id));
        #[cfg(feature = "logging")]
        tracing::debug!("removed default session patch {}", id);
    }
}

/// Makes the free request functions of this module route [`default_schemes`]
/// URLs over Unix sockets until the guard is dropped.
pub fn monkeypatch() -> MonkeyPatch {
    MonkeyPatch::install(default_schemes())
}

/// The installed default session, or one without adapters.
pub fn current() -> Session {
    PATCHES
        .with(|patches| patches.borrow().last().map(|(_, session)| session.clone()))
        .unwrap_or_else(Session::empty)
}

#[inline]
pub fn request(method: Method, url: impl Into<String>) -> RequestBuilder {
    current().request(method, url)
}

#[inline]
pub fn get(url: impl Into<String>) -> RequestBuilder {
    current().get(url)
}

#[inline]
pub fn head(url: impl Into<String>) -> RequestBuilder {
    current().head(url)
}

#[inline]
pub fn post(url: impl Into<String>) -> RequestBuilder {
    current().post(url)
}

#[inline]
pub fn put(url: impl Into<String>) -> RequestBuilder {
    current().put(url)
}

#[inline]
pub fn patch(url: impl Into<String>) -> RequestBuilder {
    current().patch(url)
}

#[inline]
pub fn delete(url: impl Into<String>) -> RequestBuilder {
    current().delete(url)
}

#[inline]
pub fn options(url: impl Into<String>) -> RequestBuilder {
    current().options(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransportError;

    const URL: &str = "http+unix://%2Fnonexistent-dir-4f1c%2Fa.sock/info";

    #[monoio::test(enable_timer = true)]
    async fn unpatched_calls_do_not_know_the_scheme() {
        let err = get(URL).send().await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidSchema(_)));
    }

    #[monoio::test(enable_timer = true)]
    async fn patch_routes_until_dropped() {
        let guard = monkeypatch();
        let err = get(URL).send().await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }), "{err:?}");
        assert!(guard.session().get_adapter(URL).is_ok());

        drop(guard);
        let err = get(URL).send().await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidSchema(_)));
    }

    #[test]
    fn nested_patches_restore_in_order() {
        let outer = MonkeyPatch::install(["http+unix://"]);
        {
            let _inner = MonkeyPatch::install(["http://sock.local/"]);
            assert!(current().get_adapter("http://sock.local/x").is_ok());
            assert!(current().get_adapter("http+unix://x/").is_err());
        }
        assert!(current().get_adapter("http+unix://x/").is_ok());
        assert!(current().get_adapter("http://sock.local/x").is_err());
        drop(outer);
        assert!(current().get_adapter("http+unix://x/").is_err());
    }

    #[test]
    fn out_of_order_drops_do_not_resurrect_patches() {
        let outer = MonkeyPatch::install(["http+unix://"]);
        let inner = MonkeyPatch::install(["http://sock.local/"]);
        drop(outer);
        assert!(current().get_adapter("http://sock.local/x").is_ok());
        assert!(current().get_adapter("http+unix://x/").is_err());
        drop(inner);
        assert!(current().get_adapter("http+unix://x/").is_err());
        assert!(current().get_adapter("http://sock.local/x").is_err());
    }
}
