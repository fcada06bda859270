//! Provides connection pooling keyed by socket, for connection reuse.
//!
//! [`ConnectionPool`] holds one [`SubPool`] per key and keeps at most a fixed
//! number of keys, evicting the least recently used one when full. Evicting
//! or clearing a sub-pool closes every idle connection it holds, connections
//! still checked out are dropped instead of returned. Connections are handed
//! out as [`Pooled`] guards that go back to their sub-pool on drop.
mod connector;

use std::{
    cell::{Cell, RefCell},
    collections::{HashMap, VecDeque},
    hash::Hash,
    ops::{Deref, DerefMut},
    rc::{Rc, Weak},
    time::{Duration, Instant},
};

pub use connector::PooledConnector;

pub(crate) const DEFAULT_POOL_CONNECTIONS: usize = 25;
pub(crate) const DEFAULT_MAX_IDLE: usize = 10;
// https://datatracker.ietf.org/doc/html/rfc6335
pub(crate) const MAX_KEEPALIVE_CONNS: usize = 16384;

pub trait Poolable {
    fn is_open(&self) -> bool;
}

pub trait Key: Eq + Hash + Clone + 'static {}
impl<T: Eq + Hash + Clone + 'static> Key for T {}

/// Lifecycle of a [`SubPool`].
///
/// A closed sub-pool is never handed out again, the next request for its
/// key creates a fresh one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Connected,
    Closed,
}

// Partly borrow from hyper-util. All rights reserved.
pub struct Pooled<K: Key, T: Poolable> {
    value: Option<T>,
    is_reused: bool,
    pool: Weak<SubPool<K, T>>,
}

impl<T: Poolable, K: Key> Pooled<K, T> {
    #[inline]
    const fn new(value: T, is_reused: bool, pool: Weak<SubPool<K, T>>) -> Self {
        Self {
            value: Some(value),
            is_reused,
            pool,
        }
    }

    #[inline]
    pub fn is_reused(&self) -> bool {
        self.is_reused
    }

    #[inline]
    fn as_ref(&self) -> &T {
        self.value.as_ref().expect("not dropped")
    }

    #[inline]
    fn as_mut(&mut self) -> &mut T {
        self.value.as_mut().expect("not dropped")
    }
}

impl<T: Poolable, K: Key> Deref for Pooled<K, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        self.as_ref()
    }
}

impl<T: Poolable, K: Key> DerefMut for Pooled<K, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.as_mut()
    }
}

impl<T: Poolable, K: Key> Drop for Pooled<K, T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take() {
            if !value.is_open() {
                // If we *already* know the connection is done here,
                // it shouldn't be re-inserted back into the pool.
                return;
            }

            if let Some(pool) = self.pool.upgrade() {
                pool.put(value);
            }
        }
    }
}

pub(crate) struct Idle<IO> {
    pub(crate) conn: IO,
    idle_at: Instant,
}

impl<IO> Idle<IO> {
    #[inline]
    pub(crate) fn new(io: IO) -> Self {
        Self {
            conn: io,
            idle_at: Instant::now(),
        }
    }

    #[inline]
    pub(crate) fn expired_opt(&self, max_elapsed: Option<Duration>) -> bool {
        match max_elapsed {
            Some(e) => self.idle_at.elapsed() > e,
            None => false,
        }
    }
}

/// Idle connections to a single key.
pub struct SubPool<K, T> {
    key: K,
    state: Cell<PoolState>,
    idle: RefCell<VecDeque<Idle<T>>>,
    max_idle: usize,
    idle_timeout: Option<Duration>,
    connects: Cell<usize>,
}

impl<K: Key, T: Poolable> SubPool<K, T> {
    fn new(key: K, max_idle: usize, idle_timeout: Option<Duration>) -> Self {
        Self {
            key,
            state: Cell::new(PoolState::Created),
            idle: RefCell::new(VecDeque::with_capacity(max_idle)),
            max_idle,
            idle_timeout,
            connects: Cell::new(0),
        }
    }

    #[inline]
    pub fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    pub fn state(&self) -> PoolState {
        self.state.get()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state.get() == PoolState::Closed
    }

    #[inline]
    pub fn idle_count(&self) -> usize {
        self.idle.borrow().len()
    }

    /// Number of connections ever linked into this sub-pool.
    #[inline]
    pub fn connect_count(&self) -> usize {
        self.connects.get()
    }

    /// Takes an idle connection, skipping expired and closed ones.
    pub fn checkout(self: &Rc<Self>) -> Option<Pooled<K, T>> {
        if self.is_closed() {
            return None;
        }
        loop {
            let idle = self.idle.borrow_mut().pop_front()?;
            if idle.expired_opt(self.idle_timeout) || !idle.conn.is_open() {
                #[cfg(feature = "logging")]
                tracing::debug!("dropping stale idle connection");
                continue;
            }
            #[cfg(feature = "logging")]
            tracing::debug!("connection got from pool");
            return Some(Pooled::new(idle.conn, true, Rc::downgrade(self)));
        }
    }

    /// Wraps a freshly opened connection so it returns here on drop.
    pub fn link(self: &Rc<Self>, conn: T) -> Pooled<K, T> {
        #[cfg(feature = "logging")]
        tracing::debug!("linked new connection to the pool");

        self.connects.set(self.connects.get() + 1);
        if self.state.get() == PoolState::Created {
            self.state.set(PoolState::Connected);
        }
        Pooled::new(conn, false, Rc::downgrade(self))
    }

    fn put(&self, conn: T) {
        if self.is_closed() || self.max_idle == 0 {
            return;
        }
        let mut queue = self.idle.borrow_mut();
        if queue.len() >= self.max_idle {
            #[cfg(feature = "logging")]
            tracing::info!("connection pool is full, dropping oldest idle connection");
            let _ = queue.pop_front();
        }
        queue.push_back(Idle::new(conn));
        #[cfg(feature = "logging")]
        tracing::debug!("connection recycled");
    }

    /// Marks the sub-pool closed and closes all idle connections.
    pub fn close(&self) {
        self.state.set(PoolState::Closed);
        let idle = std::mem::take(&mut *self.idle.borrow_mut());
        #[cfg(feature = "logging")]
        tracing::debug!("closing {} idle connections", idle.len());
        drop(idle);
    }
}

struct PoolInner<K, T> {
    pools: HashMap<K, Rc<SubPool<K, T>>>,
    // Front is least recently used.
    lru: VecDeque<K>,
    max_pools: usize,
    max_idle: usize,
    idle_timeout: Option<Duration>,
}

impl<K: Key, T> PoolInner<K, T> {
    fn touch(&mut self, key: &K) {
        if let Some(pos) = self.lru.iter().position(|k| k == key) {
            if let Some(k) = self.lru.remove(pos) {
                self.lru.push_back(k);
            }
        }
    }

    fn forget(&mut self, key: &K) -> Option<Rc<SubPool<K, T>>> {
        self.lru.retain(|k| k != key);
        self.pools.remove(key)
    }

    fn evict_overflow(&mut self) -> Vec<Rc<SubPool<K, T>>> {
        let mut evicted = Vec::new();
        while self.pools.len() > self.max_pools {
            let Some(oldest) = self.lru.pop_front() else {
                break;
            };
            if let Some(pool) = self.pools.remove(&oldest) {
                evicted.push(pool);
            }
        }
        evicted
    }
}

/// Bounded map from key to [`SubPool`] with least recently used eviction.
pub struct ConnectionPool<K, T> {
    shared: Rc<RefCell<PoolInner<K, T>>>,
}

impl<K, T> Clone for ConnectionPool<K, T> {
    #[inline]
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<K, T> std::fmt::Debug for ConnectionPool<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ConnectionPool")
    }
}

impl<K: Key, T: Poolable> ConnectionPool<K, T> {
    /// `max_pools` bounds the number of distinct keys, `max_idle` the idle
    /// connections kept per key.
    #[inline]
    pub fn new(max_pools: Option<usize>, max_idle: Option<usize>) -> Self {
        Self::new_with_idle_timeout(max_pools, max_idle, None)
    }

    /// Like [`new`](Self::new), idle connections older than `idle_timeout`
    /// are discarded instead of reused.
    pub fn new_with_idle_timeout(
        max_pools: Option<usize>,
        max_idle: Option<usize>,
        idle_timeout: Option<Duration>,
    ) -> Self {
        let max_pools = max_pools.unwrap_or(DEFAULT_POOL_CONNECTIONS).max(1);
        let max_idle = max_idle
            .map(|n| n.min(MAX_KEEPALIVE_CONNS))
            .unwrap_or(DEFAULT_MAX_IDLE);
        Self {
            shared: Rc::new(RefCell::new(PoolInner {
                pools: HashMap::with_capacity(max_pools),
                lru: VecDeque::with_capacity(max_pools),
                max_pools,
                max_idle,
                idle_timeout,
            })),
        }
    }

    /// Returns the sub-pool for `key`, creating it if absent.
    ///
    /// Lookup and insert happen under one borrow with no await point, so
    /// every task asking for the same key gets the same sub-pool. When the
    /// pool is full the least recently used sub-pool is closed before this
    /// returns.
    pub fn get_or_create(&self, key: &K) -> Rc<SubPool<K, T>> {
        let (pool, evicted) = {
            let mut inner = self.shared.borrow_mut();
            if let Some(pool) = inner.pools.get(key).cloned() {
                inner.touch(key);
                return pool;
            }

            let pool = Rc::new(SubPool::new(
                key.clone(),
                inner.max_idle,
                inner.idle_timeout,
            ));
            inner.pools.insert(key.clone(), pool.clone());
            inner.lru.push_back(key.clone());
            #[cfg(feature = "logging")]
            tracing::debug!("pool entry created, {} keys pooled", inner.pools.len());
            (pool, inner.evict_overflow())
        };

        for old in evicted {
            #[cfg(feature = "logging")]
            tracing::info!("evicting least recently used pool entry");
            old.close();
        }
        pool
    }

    /// Returns the sub-pool for `key` without touching its recency.
    #[inline]
    pub fn get(&self, key: &K) -> Option<Rc<SubPool<K, T>>> {
        self.shared.borrow().pools.get(key).cloned()
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.shared.borrow().pools.contains_key(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.shared.borrow().pools.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops `pool` from the map if it is still registered for `key` and never
    /// produced a connection. Used when the first connect attempt fails.
    pub fn remove_unused(&self, key: &K, pool: &Rc<SubPool<K, T>>) -> bool {
        let removed = {
            let mut inner = self.shared.borrow_mut();
            let registered = inner
                .pools
                .get(key)
                .is_some_and(|current| Rc::ptr_eq(current, pool));
            if !registered || pool.state() != PoolState::Created || pool.idle_count() != 0 {
                return false;
            }
            inner.forget(key)
        };
        if let Some(pool) = removed {
            pool.close();
        }
        true
    }

    /// Closes and removes every sub-pool.
    pub fn clear(&self) {
        let pools: Vec<_> = {
            let mut inner = self.shared.borrow_mut();
            inner.lru.clear();
            inner.pools.drain().map(|(_, pool)| pool).collect()
        };
        #[cfg(feature = "logging")]
        tracing::debug!("closing {} pool entries", pools.len());
        for pool in pools {
            pool.close();
        }
    }

    #[inline]
    pub fn get_idle_connection_count(&self) -> usize {
        let inner = self.shared.borrow();
        inner.pools.values().map(|pool| pool.idle_count()).sum()
    }
}

impl<K: Key, T: Poolable> Default for ConnectionPool<K, T> {
    fn default() -> Self {
        Self::new(None, None)
    }
}
