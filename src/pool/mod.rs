//! Bounded Connection Pool
//!
//! A fixed number of checkout slots guarded by a [`Semaphore`], plus an idle list of live
//! connections. A slot is held for the lifetime of a [`PooledConnection`]; dropping the guard
//! returns the connection to the idle list (or discards it when broken) and then frees the slot.
//!
//! Connections are opened lazily, so a pool of size 5 that only ever serves one request at a
//! time holds a single connection.

use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};

/// Opens connections and judges whether a returned one may be reused
pub trait ManageConnection: Send + Sync + 'static {
    type Connection: Send + 'static;

    fn connect(&self) -> impl Future<Output = Result<Self::Connection>> + Send;

    /// True when `conn` must be discarded instead of returned to the idle list
    fn has_broken(&self, conn: &mut Self::Connection) -> bool;
}

/// Point-in-time pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub max_size: usize,
    pub idle: usize,
    pub in_use: usize,
}

struct PoolInner<M: ManageConnection> {
    manager: M,
    idle: Mutex<Vec<M::Connection>>,
    slots: Arc<Semaphore>,
    max_size: usize,
}

impl<M: ManageConnection> PoolInner<M> {
    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<M::Connection>> {
        // The idle list stays consistent even if a holder panicked
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to a bounded pool; cloning is cheap
pub struct Pool<M: ManageConnection> {
    inner: Arc<PoolInner<M>>,
}

impl<M: ManageConnection> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<M: ManageConnection> Pool<M> {
    /// Create a pool allowing at most `max_size` simultaneous checkouts
    pub fn new(manager: M, max_size: usize) -> Result<Self> {
        if max_size == 0 {
            return Err(GatewayError::config_error("pool max_size must be at least 1"));
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                manager,
                idle: Mutex::new(Vec::with_capacity(max_size)),
                slots: Arc::new(Semaphore::new(max_size)),
                max_size,
            }),
        })
    }

    #[must_use]
    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Lease a connection, waiting up to `timeout` for a free slot
    ///
    /// Returns `PoolExhausted` when no slot frees up in time. The timeout also bounds opening a
    /// fresh connection when no idle one is available.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection<M>> {
        let started = Instant::now();

        let slot = Arc::clone(&self.inner.slots).acquire_owned();
        let permit = match tokio::time::timeout(timeout, slot).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(GatewayError::internal("pool", "connection pool is closed")),
            Err(_) => {
                warn!(
                    waited_ms = %started.elapsed().as_millis(),
                    max_size = self.inner.max_size,
                    "pool exhausted"
                );
                return Err(GatewayError::pool_exhausted(started.elapsed()));
            }
            };

        while let Some(mut conn) = self.take_idle() {
            if self.inner.manager.has_broken(&mut conn) {
                debug!("discarding broken idle connection");
                continue;
            }
            return Ok(PooledConnection::new(Arc::clone(&self.inner), conn, permit));
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        debug!("opening new pooled connection");
        let conn = tokio::time::timeout(remaining, self.inner.manager.connect())
            .await
            .map_err(|_| GatewayError::connection_failed("timed out opening a new connection"))??;

        Ok(PooledConnection::new(Arc::clone(&self.inner), conn, permit))
    }

    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let in_use = self.inner.max_size - self.inner.slots.available_permits();
        PoolStatus { max_size: self.inner.max_size, idle: self.inner.idle().len(), in_use }
    }

    fn take_idle(&self) -> Option<M::Connection> {
        self.inner.idle().pop()
    }
}

/// A leased connection; returned to the pool on drop
pub struct PooledConnection<M: ManageConnection> {
    pool: Arc<PoolInner<M>>,
    conn: Option<M::Connection>,
    broken: bool,
    // Released after `Drop::drop` has put the connection back
    _slot: OwnedSemaphorePermit,
}

impl<M: ManageConnection> PooledConnection<M> {
    fn new(pool: Arc<PoolInner<M>>, conn: M::Connection, slot: OwnedSemaphorePermit) -> Self {
        Self { pool, conn: Some(conn), broken: false, _slot: slot }
    }

    /// Discard this connection on release instead of reusing it
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl<M: ManageConnection> Deref for PooledConnection<M> {
    type Target = M::Connection;

    fn deref(&self) -> &M::Connection {
        // Only `Drop` takes the connection out
        match self.conn.as_ref() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<M: ManageConnection> DerefMut for PooledConnection<M> {
    fn deref_mut(&mut self) -> &mut M::Connection {
        match self.conn.as_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl<M: ManageConnection> Drop for PooledConnection<M> {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else { return };
        if self.broken || self.pool.manager.has_broken(&mut conn) {
            warn!("discarding broken connection");
            return;
        }
        self.pool.idle().push(conn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingManager {
        opened: AtomicUsize,
        fail: AtomicBool,
    }

    struct FakeConn {
        id: usize,
        healthy: bool,
    }

    impl CountingManager {
        fn new() -> Self {
            Self { opened: AtomicUsize::new(0), fail: AtomicBool::new(false) }
        }
    }

    impl ManageConnection for CountingManager {
        type Connection = FakeConn;

        async fn connect(&self) -> Result<FakeConn> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(GatewayError::connection_failed("refused"));
            }
            let id = self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakeConn { id, healthy: true })
        }

        fn has_broken(&self, conn: &mut FakeConn) -> bool {
            !conn.healthy
        }
    }

    #[tokio::test]
    async fn test_pool_rejects_zero_size() {
        let err = Pool::new(CountingManager::new(), 0).err().unwrap();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_connection_is_reused_after_release() {
        let pool = Pool::new(CountingManager::new(), 2).unwrap();

        let first_id = {
            let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
            conn.id
        };
        let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();

        assert_eq!(conn.id, first_id);
        assert_eq!(pool.manager().opened.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_acquire_times_out_when_exhausted() {
        let pool = Pool::new(CountingManager::new(), 1).unwrap();
        let _held = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let err = pool.acquire(Duration::from_millis(20)).await.err().unwrap();
        assert_eq!(err.error_code(), "POOL_EXHAUSTED");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_waiter_gets_slot_after_release() {
        let pool = Pool::new(CountingManager::new(), 1).unwrap();
        let held = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Duration::from_secs(2)).await.map(|c| c.id) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_broken_connection_is_replaced() {
        let pool = Pool::new(CountingManager::new(), 1).unwrap();
        {
            let mut conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
            conn.mark_broken();
        }
        assert_eq!(pool.status().idle, 0);

        let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(conn.id, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_connection_is_not_returned() {
        let pool = Pool::new(CountingManager::new(), 1).unwrap();
        {
            let mut conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
            conn.healthy = false;
        }
        assert_eq!(pool.status(), PoolStatus { max_size: 1, idle: 0, in_use: 0 });
    }

    #[tokio::test]
    async fn test_connect_failure_frees_slot() {
        let pool = Pool::new(CountingManager::new(), 1).unwrap();
        pool.manager().fail.store(true, Ordering::SeqCst);

        let err = pool.acquire(Duration::from_secs(1)).await.err().unwrap();
        assert_eq!(err.error_code(), "CONNECTION_FAILED");
        assert_eq!(pool.status().in_use, 0);

        pool.manager().fail.store(false, Ordering::SeqCst);
        assert!(pool.acquire(Duration::from_millis(50)).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_counts_checkouts() {
        let pool = Pool::new(CountingManager::new(), 3).unwrap();
        let a = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let _b = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(pool.status(), PoolStatus { max_size: 3, idle: 0, in_use: 2 });

        drop(a);
        assert_eq!(pool.status(), PoolStatus { max_size: 3, idle: 1, in_use: 1 });
    }
}
