use super::{ConnectionPool, Key, Poolable, Pooled};
use crate::connectors::Connector;

/// PooledConnector is a connector with a connection pool.
/// It is designed for non-multiplex transport, like http1.
#[derive(Debug)]
pub struct PooledConnector<C, K, T> {
    transport_connector: C,
    pool: ConnectionPool<K, T>,
}

impl<C, K, T> PooledConnector<C, K, T> {
    #[inline]
    pub const fn new(transport_connector: C, pool: ConnectionPool<K, T>) -> Self {
        Self {
            transport_connector,
            pool,
        }
    }

    #[inline]
    pub fn transport_connector(&self) -> &C {
        &self.transport_connector
    }

    #[inline]
    pub fn pool(&self) -> &ConnectionPool<K, T> {
        &self.pool
    }
}

impl<C: Clone, K, T> Clone for PooledConnector<C, K, T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            transport_connector: self.transport_connector.clone(),
            pool: self.pool.clone(),
        }
    }
}

impl<C, K: Key, T: Poolable> PooledConnector<C, K, T> {
    #[inline]
    pub fn new_with_default_pool(transport_connector: C) -> Self {
        Self::new(transport_connector, Default::default())
    }
}

impl<C, K: Key, T: Poolable> Connector<K> for PooledConnector<C, K, T>
where
    C: Connector<K, Connection = T>,
{
    type Connection = Pooled<K, T>;
    type Error = C::Error;

    async fn connect(&self, key: K) -> Result<Self::Connection, Self::Error> {
        let pool = self.pool.get_or_create(&key);
        if let Some(conn) = pool.checkout() {
            return Ok(conn);
        }
        match self.transport_connector.connect(key.clone()).await {
            Ok(io) => Ok(pool.link(io)),
            Err(e) => {
                // Failed first connects leave nothing behind.
                self.pool.remove_unused(&key, &pool);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, io, rc::Rc, time::Duration};

    use super::*;
    use crate::pool::PoolState;

    struct FakeConn {
        open: bool,
        closed: Rc<Cell<usize>>,
    }

    impl Drop for FakeConn {
        fn drop(&mut self) {
            self.closed.set(self.closed.get() + 1);
        }
    }

    impl Poolable for FakeConn {
        fn is_open(&self) -> bool {
            self.open
        }
    }

    #[derive(Default, Clone)]
    struct CountingConnector {
        connects: Rc<Cell<usize>>,
        closed: Rc<Cell<usize>>,
        fail: bool,
    }

    impl Connector<&'static str> for CountingConnector {
        type Connection = FakeConn;
        type Error = io::Error;

        async fn connect(&self, _key: &'static str) -> Result<FakeConn, io::Error> {
            if self.fail {
                return Err(io::ErrorKind::NotFound.into());
            }
            self.connects.set(self.connects.get() + 1);
            Ok(FakeConn {
                open: true,
                closed: self.closed.clone(),
            })
        }
    }

    fn pooled(
        max_pools: usize,
    ) -> (
        CountingConnector,
        PooledConnector<CountingConnector, &'static str, FakeConn>,
    ) {
        let connector = CountingConnector::default();
        let pooled = PooledConnector::new(
            connector.clone(),
            ConnectionPool::new(Some(max_pools), None),
        );
        (connector, pooled)
    }

    #[monoio::test(enable_timer = true)]
    async fn sequential_requests_reuse() {
        let (counter, connector) = pooled(25);
        let conn = connector.connect("a").await.unwrap();
        assert!(!conn.is_reused());
        drop(conn);
        let conn = connector.connect("a").await.unwrap();
        assert!(conn.is_reused());
        assert_eq!(counter.connects.get(), 1);
        assert_eq!(connector.pool().get(&"a").unwrap().connect_count(), 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn same_key_same_sub_pool() {
        let (_, connector) = pooled(25);
        let first = connector.pool().get_or_create(&"a");
        let second = connector.pool().get_or_create(&"a");
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(first.state(), PoolState::Created);
    }

    #[monoio::test(enable_timer = true)]
    async fn concurrent_checkouts_get_distinct_connections() {
        let (counter, connector) = pooled(25);
        let a = connector.connect("a").await.unwrap();
        let b = connector.connect("a").await.unwrap();
        assert_eq!(counter.connects.get(), 2);
        drop(a);
        drop(b);
        assert_eq!(connector.pool().get_idle_connection_count(), 2);
    }

    #[monoio::test(enable_timer = true)]
    async fn eviction_closes_least_recently_used() {
        let (counter, connector) = pooled(2);
        drop(connector.connect("a").await.unwrap());
        drop(connector.connect("b").await.unwrap());
        let evicted = connector.pool().get(&"a").unwrap();
        drop(connector.connect("c").await.unwrap());

        assert_eq!(counter.closed.get(), 1);
        assert!(!connector.pool().contains(&"a"));
        assert_eq!(evicted.state(), PoolState::Closed);
        assert_eq!(evicted.idle_count(), 0);
        assert_eq!(connector.pool().len(), 2);
    }

    #[monoio::test(enable_timer = true)]
    async fn recently_used_key_survives_eviction() {
        let (_, connector) = pooled(2);
        drop(connector.connect("a").await.unwrap());
        drop(connector.connect("b").await.unwrap());
        drop(connector.connect("a").await.unwrap());
        drop(connector.connect("c").await.unwrap());

        assert!(connector.pool().contains(&"a"));
        assert!(!connector.pool().contains(&"b"));
    }

    #[monoio::test(enable_timer = true)]
    async fn checked_out_connection_of_evicted_key_is_dropped() {
        let (counter, connector) = pooled(1);
        let held = connector.connect("a").await.unwrap();
        drop(connector.connect("b").await.unwrap());
        assert_eq!(counter.closed.get(), 0);

        drop(held);
        assert_eq!(counter.closed.get(), 1);

        let fresh = connector.pool().get_or_create(&"a");
        assert_eq!(fresh.state(), PoolState::Created);
        assert_eq!(fresh.idle_count(), 0);
    }

    #[monoio::test(enable_timer = true)]
    async fn closed_connection_is_not_returned() {
        let (counter, connector) = pooled(25);
        let mut conn = connector.connect("a").await.unwrap();
        conn.open = false;
        drop(conn);
        assert_eq!(counter.closed.get(), 1);
        assert_eq!(connector.pool().get_idle_connection_count(), 0);
    }

    #[monoio::test(enable_timer = true)]
    async fn failed_connect_leaves_no_entry() {
        let connector = PooledConnector::new(
            CountingConnector {
                fail: true,
                ..Default::default()
            },
            ConnectionPool::<&'static str, FakeConn>::default(),
        );
        assert!(connector.connect("a").await.is_err());
        assert!(connector.pool().is_empty());
    }

    #[monoio::test(enable_timer = true)]
    async fn max_idle_per_key() {
        let connector = CountingConnector::default();
        let pooled = PooledConnector::new(connector.clone(), ConnectionPool::new(None, Some(1)));
        let a = pooled.connect("a").await.unwrap();
        let b = pooled.connect("a").await.unwrap();
        drop(a);
        drop(b);
        assert_eq!(pooled.pool().get_idle_connection_count(), 1);
        assert_eq!(connector.closed.get(), 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn zero_max_idle_keeps_nothing() {
        let connector = CountingConnector::default();
        let pooled = PooledConnector::new(connector.clone(), ConnectionPool::new(None, Some(0)));
        drop(pooled.connect("a").await.unwrap());
        assert_eq!(pooled.pool().get_idle_connection_count(), 0);
        assert_eq!(connector.closed.get(), 1);
        assert!(!pooled.connect("a").await.unwrap().is_reused());
        assert_eq!(connector.connects.get(), 2);
    }

    #[monoio::test(enable_timer = true)]
    async fn expired_idle_connection_is_discarded() {
        let connector = CountingConnector::default();
        let pooled = PooledConnector::new(
            connector.clone(),
            ConnectionPool::new_with_idle_timeout(None, None, Some(Duration::from_millis(5))),
        );
        drop(pooled.connect("a").await.unwrap());
        monoio::time::sleep(Duration::from_millis(20)).await;
        let conn = pooled.connect("a").await.unwrap();
        assert!(!conn.is_reused());
        assert_eq!(connector.connects.get(), 2);
        assert_eq!(connector.closed.get(), 1);
    }

    #[monoio::test(enable_timer = true)]
    async fn clear_closes_everything() {
        let (counter, connector) = pooled(25);
        drop(connector.connect("a").await.unwrap());
        drop(connector.connect("b").await.unwrap());
        connector.pool().clear();
        assert!(connector.pool().is_empty());
        assert_eq!(counter.closed.get(), 2);
    }
}
