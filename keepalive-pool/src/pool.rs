// Copyright 2024 Cloudflare, Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The bounded connection pool

use log::debug;
use parking_lot::Mutex;
use pingora_error::{Error, Result};
use tokio::time::Instant;

use crate::admission::Admission;
use crate::conf::PoolOptions;
use crate::connection::{Connect, PooledConnection};
use crate::idle::IdleList;
use crate::POOL_CLOSED;

// Everything guarded by the pool lock. The lock is only ever held for bookkeeping, never across
// an await point.
struct PoolState<S> {
    // connections either idle or checked out
    active: usize,
    closed: bool,
    idle: IdleList<PooledConnection<S>>,
}

impl<S> PoolState<S> {
    // one counted connection was closed
    fn release_slot(&mut self) {
        debug_assert!(self.active > 0, "active connection count underflow");
        self.active = self.active.saturating_sub(1);
    }
}

/// Connection pool
///
/// [Pool] hands out connections opened by its [Connect] implementation and keeps the ones that
/// are handed back for reuse, most recently returned first.
///
/// Idle connections are only evicted when [Self::get()] runs into them: expired ones from the
/// back of the idle list, ones past `max_conn_lifetime` or failing
/// [Connect::test_on_borrow()] when they are picked from the front.
pub struct Pool<C: Connect> {
    connector: C,
    options: PoolOptions,
    admission: Admission,
    state: Mutex<PoolState<C::Connection>>,
}

impl<C: Connect> Pool<C> {
    /// Create a new [Pool] that opens connections via the given connector.
    pub fn new(connector: C, options: PoolOptions) -> Self {
        Pool {
            connector,
            admission: Admission::new(options.max_active, options.wait),
            state: Mutex::new(PoolState {
                active: 0,
                closed: false,
                idle: IdleList::new(),
            }),
            options,
        }
    }

    /// Borrow a connection.
    ///
    /// An idle connection is reused if a healthy one is available, otherwise a new one is
    /// opened. When the pool is at `max_active`, this either fails with
    /// [crate::POOL_EXHAUSTED] or, if `wait` is set, waits until a connection is handed back.
    /// There is no timeout on that wait; wrap the call in one if needed. Dropping the returned
    /// future at any point gives back the capacity it held. An idle connection that was being
    /// tested at that moment is dropped without [Connect::close()].
    ///
    /// Fails with [POOL_CLOSED] once [Self::close()] has been called.
    pub async fn get(&self) -> Result<PooledConnection<C::Connection>> {
        self.admission.acquire().await?;
        // from here on, dropping this future hands back whatever it holds
        let mut reserved = Reservation::token(self);

        self.evict_expired().await;

        loop {
            let mut candidate = {
                let mut state = self.state.lock();
                match state.idle.pop_front() {
                    Some(conn) => conn,
                    None => {
                        if state.closed {
                            // a token source created after close() would otherwise stay open
                            self.admission.close();
                            return Error::e_explain(POOL_CLOSED, "get on closed pool");
                        }
                        self.admission.admit(state.active)?;
                        state.active += 1;
                        reserved.slot = true;
                        break;
                    }
                }
            }; // lock released here

            // the candidate is counted in `active` until it is either handed out or closed
            let slot = Reservation::slot(self);
            if self.reusable(&mut candidate).await {
                slot.keep();
                reserved.keep();
                return Ok(candidate);
            }
            self.connector.close(candidate.into_inner()).await;
        }

        let connection = self.connector.connect().await?;
        reserved.keep();
        Ok(PooledConnection::new(connection))
    }

    /// Hand a connection back to the pool.
    ///
    /// With `force_close` set, or once the pool is closed, the connection is closed instead of
    /// kept. Callers should force close any connection that saw a protocol error.
    ///
    /// The connection's capacity is given back even if the returned future is dropped early.
    pub async fn put(&self, mut conn: PooledConnection<C::Connection>, force_close: bool) {
        let to_close = {
            let mut state = self.state.lock();
            if !state.closed && !force_close {
                conn.mark_returned();
                state.idle.push_front(conn);
                if state.idle.len() > self.options.max_idle {
                    // the least recently used one goes, possibly the one just returned
                    state.idle.pop_back()
                } else {
                    None
                }
            } else {
                Some(conn)
            }
        };

        // the caller's token always goes back, the slot only if a connection is closed
        let mut released = Reservation::token(self);
        if let Some(conn) = to_close {
            released.slot = true;
            debug!("closing connection on put, force_close: {force_close}");
            self.connector.close(conn.into_inner()).await;
        }
    }

    /// Close the pool.
    ///
    /// All idle connections are closed and every later or pending [Self::get()] fails.
    /// Connections currently borrowed are closed when they are [Self::put()] back. Calling this
    /// more than once is a no-op.
    pub async fn close(&self) -> Result<()> {
        let idle = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            let idle = std::mem::take(&mut state.idle);
            debug_assert!(state.active >= idle.len());
            state.active = state.active.saturating_sub(idle.len());
            self.admission.close();
            idle
        }; // lock released here

        debug!("pool closed, closing {} idle connections", idle.len());
        for conn in idle.drain() {
            self.connector.close(conn.into_inner()).await;
        }
        Ok(())
    }

    /// The number of open connections, idle or borrowed
    pub fn active(&self) -> usize {
        self.state.lock().active
    }

    /// The number of idle connections
    pub fn idle_count(&self) -> usize {
        self.state.lock().idle.len()
    }

    /// Whether [Self::close()] has been called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// The options this pool was created with
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// The connector this pool opens connections with
    pub fn connector(&self) -> &C {
        &self.connector
    }

    // close idle connections from the back until one that has not timed out is found
    async fn evict_expired(&self) {
        let Some(idle_timeout) = self.options.idle_timeout else {
            return;
        };
        loop {
            let expired = {
                let mut state = self.state.lock();
                let timed_out = state
                    .idle
                    .back()
                    .is_some_and(|c| c.last_returned() + idle_timeout < Instant::now());
                if timed_out {
                    state.idle.pop_back()
                } else {
                    None
                }
            };
            let Some(conn) = expired else {
                return;
            };
            let _slot = Reservation::slot(self);
            debug!("idle connection timed out after {idle_timeout:?}");
            self.connector.close(conn.into_inner()).await;
        }
    }

    async fn reusable(&self, conn: &mut PooledConnection<C::Connection>) -> bool {
        if let Some(lifetime) = self.options.max_conn_lifetime {
            if conn.created().elapsed() >= lifetime {
                debug!("idle connection reached its max lifetime {lifetime:?}");
                return false;
            }
        }
        let last_returned = conn.last_returned();
        match self.connector.test_on_borrow(&mut **conn, last_returned).await {
            Ok(()) => true,
            Err(e) => {
                debug!("idle connection failed the borrow test: {e}");
                false
            }
        }
    }
}

// Capacity held by an in-flight get() or put(): a counted slot in `active` and/or an admission
// token. Whatever is still held when this is dropped is handed back, so a failed dial or probe
// and a caller that drops the future halfway release the same way.
struct Reservation<'a, C: Connect> {
    pool: &'a Pool<C>,
    slot: bool,
    token: bool,
}

impl<'a, C: Connect> Reservation<'a, C> {
    fn token(pool: &'a Pool<C>) -> Self {
        Reservation {
            pool,
            slot: false,
            token: true,
        }
    }

    fn slot(pool: &'a Pool<C>) -> Self {
        Reservation {
            pool,
            slot: true,
            token: false,
        }
    }

    // the capacity now belongs to a connection handed out to the caller
    fn keep(mut self) {
        self.slot = false;
        self.token = false;
    }
}

impl<C: Connect> Drop for Reservation<'_, C> {
    fn drop(&mut self) {
        if !self.slot && !self.token {
            return;
        }
        let closed = {
            let mut state = self.pool.state.lock();
            if self.slot {
                state.release_slot();
            }
            state.closed
        };
        // once closed, waiters fail and tokens are never needed again
        if self.token && !closed {
            self.pool.admission.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::POOL_EXHAUSTED;
    use async_trait::async_trait;
    use pingora_error::ErrorType::{ConnectRefused, ConnectionClosed};
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    // hands out sequential ids and records what gets closed
    #[derive(Default)]
    struct MockConnector {
        next_id: AtomicUsize,
        fail_connect: AtomicBool,
        broken: parking_lot::Mutex<HashSet<usize>>,
        closed: parking_lot::Mutex<Vec<usize>>,
        live: AtomicUsize,
        peak: AtomicUsize,
        // milliseconds each connect, test_on_borrow or close takes
        connect_delay: AtomicU64,
        borrow_test_delay: AtomicU64,
        close_delay: AtomicU64,
    }

    async fn lag(delay: &AtomicU64) {
        let ms = delay.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    impl MockConnector {
        fn closed(&self) -> Vec<usize> {
            let mut closed = self.closed.lock().clone();
            closed.sort();
            closed
        }
    }

    #[async_trait]
    impl Connect for MockConnector {
        type Connection = usize;

        async fn connect(&self) -> Result<usize> {
            lag(&self.connect_delay).await;
            if self.fail_connect.load(Ordering::SeqCst) {
                return Error::e_explain(ConnectRefused, "mock refused");
            }
            let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(live, Ordering::SeqCst);
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn test_on_borrow(&self, conn: &mut usize, _last_returned: Instant) -> Result<()> {
            lag(&self.borrow_test_delay).await;
            if self.broken.lock().contains(&*conn) {
                Error::e_explain(ConnectionClosed, "mock broken")
            } else {
                Ok(())
            }
        }

        async fn close(&self, conn: usize) {
            lag(&self.close_delay).await;
            self.live.fetch_sub(1, Ordering::SeqCst);
            self.closed.lock().push(conn);
        }
    }

    fn options(max_idle: usize, max_active: usize, wait: bool) -> PoolOptions {
        PoolOptions {
            max_idle,
            max_active,
            wait,
            idle_timeout: None,
            max_conn_lifetime: None,
        }
    }

    fn new_pool(options: PoolOptions) -> Arc<Pool<MockConnector>> {
        Arc::new(Pool::new(MockConnector::default(), options))
    }

    #[tokio::test]
    async fn test_lifo_reuse() {
        let pool = new_pool(options(2, 0, false));
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        assert_eq!((*a, *b), (0, 1));
        assert_eq!(pool.active(), 2);

        pool.put(a, false).await;
        pool.put(b, false).await;
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.active(), 2);

        // most recently returned first
        assert_eq!(*pool.get().await.unwrap(), 1);
        assert_eq!(*pool.get().await.unwrap(), 0);
        assert_eq!(pool.active(), 2);
        assert!(pool.connector().closed().is_empty());
    }

    #[tokio::test]
    async fn test_fresh_connection_timestamps() {
        let pool = new_pool(options(1, 0, false));
        let a = pool.get().await.unwrap();
        assert_eq!(a.created(), a.last_returned());

        tokio::time::sleep(Duration::from_millis(10)).await;
        pool.put(a, false).await;
        let a = pool.get().await.unwrap();
        assert!(a.last_returned() > a.created());
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let mut opts = options(2, 0, false);
        opts.idle_timeout = Some(Duration::from_millis(50));
        let pool = new_pool(opts);

        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        pool.put(a, false).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        pool.put(b, false).await;
        assert_eq!(pool.active(), 2);

        // `a` expired at the back and is evicted by this borrow, `b` is reused
        let conn = pool.get().await.unwrap();
        assert_eq!(*conn, 1);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.connector().closed(), vec![0]);
    }

    #[tokio::test]
    async fn test_idle_timeout_all_expired() {
        let mut opts = options(2, 0, false);
        opts.idle_timeout = Some(Duration::from_millis(50));
        let pool = new_pool(opts);

        let a = pool.get().await.unwrap();
        pool.put(a, false).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let conn = pool.get().await.unwrap();
        assert_eq!(*conn, 1);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.connector().closed(), vec![0]);
    }

    #[tokio::test]
    async fn test_lifetime_cap() {
        let mut opts = options(2, 0, false);
        opts.max_conn_lifetime = Some(Duration::from_millis(100));
        let pool = new_pool(opts);

        let a = pool.get().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        pool.put(a, false).await;

        // healthy and just returned, but too old
        let conn = pool.get().await.unwrap();
        assert_eq!(*conn, 1);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.connector().closed(), vec![0]);
    }

    #[tokio::test]
    async fn test_failed_borrow_test() {
        let pool = new_pool(options(2, 0, false));
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        pool.put(a, false).await;
        pool.put(b, false).await;
        pool.connector().broken.lock().insert(1);

        // `b` fails silently and the next idle one is tried
        let conn = pool.get().await.unwrap();
        assert_eq!(*conn, 0);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.connector().closed(), vec![1]);
    }

    #[tokio::test]
    async fn test_exhausted_without_wait() {
        let pool = new_pool(options(1, 1, false));
        let a = pool.get().await.unwrap();

        let e = pool.get().await.unwrap_err();
        assert_eq!(e.etype(), &POOL_EXHAUSTED);
        assert_eq!(pool.active(), 1);

        pool.put(a, false).await;
        assert_eq!(*pool.get().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_admission_reuse() {
        let pool = new_pool(options(1, 1, true));
        let a = pool.get().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.put(a, false).await;
        let conn = waiter.await.unwrap().unwrap();
        // the very same connection
        assert_eq!(*conn, 0);
        assert_eq!(pool.active(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_blocking_admission_force_close() {
        let pool = new_pool(options(1, 1, true));
        let a = pool.get().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.put(a, true).await;
        let conn = waiter.await.unwrap().unwrap();
        // a freshly dialed one
        assert_eq!(*conn, 1);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.connector().closed(), vec![0]);
    }

    #[tokio::test]
    async fn test_close() {
        let pool = new_pool(options(2, 0, false));
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        let c = pool.get().await.unwrap();
        pool.put(a, false).await;
        pool.put(b, false).await;

        pool.close().await.unwrap();
        assert!(pool.is_closed());
        assert_eq!(pool.connector().closed(), vec![0, 1]);
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active(), 1);

        let e = pool.get().await.unwrap_err();
        assert_eq!(e.etype(), &POOL_CLOSED);

        // borrowed before close: closed instead of kept
        pool.put(c, false).await;
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active(), 0);

        // idempotent, and nothing is closed twice
        pool.close().await.unwrap();
        assert_eq!(pool.connector().closed(), vec![0, 1, 2]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_wakes_waiters() {
        let pool = new_pool(options(1, 1, true));
        let a = pool.get().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        pool.close().await.unwrap();
        let e = waiter.await.unwrap().unwrap_err();
        assert_eq!(e.etype(), &POOL_CLOSED);

        pool.put(a, false).await;
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.connector().closed(), vec![0]);
    }

    #[tokio::test]
    async fn test_close_before_first_get() {
        let pool = new_pool(options(1, 1, true));
        pool.close().await.unwrap();
        for _ in 0..3 {
            let e = pool.get().await.unwrap_err();
            assert_eq!(e.etype(), &POOL_CLOSED);
        }
    }

    #[tokio::test]
    async fn test_overflow_eviction() {
        let pool = new_pool(options(1, 0, false));
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        pool.put(a, false).await;
        pool.put(b, false).await;

        assert_eq!(pool.idle_count(), 1);
        assert_eq!(pool.active(), 1);
        assert_eq!(pool.connector().closed(), vec![0]);
        assert_eq!(*pool.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_idle_kept() {
        let pool = new_pool(options(0, 0, false));
        let a = pool.get().await.unwrap();
        pool.put(a, false).await;
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.connector().closed(), vec![0]);
    }

    #[tokio::test]
    async fn test_force_close() {
        let pool = new_pool(options(2, 0, false));
        let a = pool.get().await.unwrap();
        pool.put(a, true).await;
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active(), 0);
        assert_eq!(*pool.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dial_failure_rollback() {
        let pool = new_pool(options(1, 1, true));
        pool.connector().fail_connect.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            let e = pool.get().await.unwrap_err();
            assert_eq!(e.etype(), &ConnectRefused);
            assert_eq!(pool.active(), 0);
        }

        // the token was returned each time, so this does not block
        pool.connector().fail_connect.store(false, Ordering::SeqCst);
        let conn = tokio::time::timeout(Duration::from_secs(1), pool.get())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*conn, 0);
        assert_eq!(pool.active(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_and_ownership() {
        const MAX_ACTIVE: usize = 4;
        let pool = new_pool(options(2, MAX_ACTIVE, true));
        let in_use = Arc::new(parking_lot::Mutex::new(HashSet::new()));

        let mut tasks = vec![];
        for task in 0..16 {
            let pool = pool.clone();
            let in_use = in_use.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..50 {
                    let conn = pool.get().await.unwrap();
                    assert!(pool.active() <= MAX_ACTIVE);
                    // nobody else holds it
                    assert!(in_use.lock().insert(*conn));
                    tokio::task::yield_now().await;
                    assert!(in_use.lock().remove(&*conn));
                    pool.put(conn, (task + round) % 7 == 0).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(pool.connector().peak.load(Ordering::SeqCst) <= MAX_ACTIVE);
        assert!(pool.active() <= MAX_ACTIVE);
        assert_eq!(pool.active(), pool.idle_count());

        pool.close().await.unwrap();
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.connector().live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_large_max_idle() {
        // keep every idle connection, nothing is preallocated for it
        let pool = new_pool(options(usize::MAX, 0, false));
        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        pool.put(a, false).await;
        pool.put(b, false).await;
        assert_eq!(pool.idle_count(), 2);
        assert_eq!(pool.active(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_dial() {
        for wait in [true, false] {
            let pool = new_pool(options(1, 1, wait));
            pool.connector().connect_delay.store(200, Ordering::SeqCst);
            let res = tokio::time::timeout(Duration::from_millis(20), pool.get()).await;
            assert!(res.is_err());
            assert_eq!(pool.active(), 0);

            // the slot and the token of the abandoned dial are both back
            pool.connector().connect_delay.store(0, Ordering::SeqCst);
            let conn = tokio::time::timeout(Duration::from_secs(1), pool.get())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(pool.active(), 1);
            pool.put(conn, false).await;
        }
    }

    #[tokio::test]
    async fn test_cancelled_borrow_test() {
        let pool = new_pool(options(1, 1, true));
        let a = pool.get().await.unwrap();
        pool.put(a, false).await;

        pool.connector().borrow_test_delay.store(200, Ordering::SeqCst);
        let res = tokio::time::timeout(Duration::from_millis(20), pool.get()).await;
        assert!(res.is_err());
        // the candidate was taken off the idle list and is gone with the future
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.active(), 0);

        pool.connector().borrow_test_delay.store(0, Ordering::SeqCst);
        let conn = tokio::time::timeout(Duration::from_secs(1), pool.get())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*conn, 1);
        assert_eq!(pool.active(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_close_on_put() {
        let pool = new_pool(options(1, 1, true));
        let a = pool.get().await.unwrap();

        pool.connector().close_delay.store(200, Ordering::SeqCst);
        let res = tokio::time::timeout(Duration::from_millis(20), pool.put(a, true)).await;
        assert!(res.is_err());
        assert_eq!(pool.active(), 0);

        pool.connector().close_delay.store(0, Ordering::SeqCst);
        let conn = tokio::time::timeout(Duration::from_secs(1), pool.get())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*conn, 1);
        assert_eq!(pool.active(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_expiry_scan() {
        let mut opts = options(1, 1, true);
        opts.idle_timeout = Some(Duration::from_millis(20));
        let pool = new_pool(opts);
        let a = pool.get().await.unwrap();
        pool.put(a, false).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // stuck closing the expired connection
        pool.connector().close_delay.store(200, Ordering::SeqCst);
        let res = tokio::time::timeout(Duration::from_millis(20), pool.get()).await;
        assert!(res.is_err());
        assert_eq!(pool.active(), 0);

        pool.connector().close_delay.store(0, Ordering::SeqCst);
        let conn = tokio::time::timeout(Duration::from_secs(1), pool.get())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*conn, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_capacity_without_wait() {
        const MAX_ACTIVE: usize = 3;
        let pool = new_pool(options(2, MAX_ACTIVE, false));
        let in_use = Arc::new(parking_lot::Mutex::new(HashSet::new()));
        let exhausted = Arc::new(AtomicUsize::new(0));

        let mut tasks = vec![];
        for task in 0..16 {
            let pool = pool.clone();
            let in_use = in_use.clone();
            let exhausted = exhausted.clone();
            tasks.push(tokio::spawn(async move {
                for round in 0..50 {
                    let conn = match pool.get().await {
                        Ok(conn) => conn,
                        Err(e) => {
                            assert_eq!(e.etype(), &POOL_EXHAUSTED);
                            assert!(pool.active() <= MAX_ACTIVE);
                            exhausted.fetch_add(1, Ordering::SeqCst);
                            tokio::task::yield_now().await;
                            continue;
                        }
                    };
                    assert!(pool.active() <= MAX_ACTIVE);
                    assert!(in_use.lock().insert(*conn));
                    assert!(in_use.lock().len() <= MAX_ACTIVE);
                    tokio::task::yield_now().await;
                    assert!(in_use.lock().remove(&*conn));
                    pool.put(conn, (task + round) % 5 == 0).await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(pool.connector().peak.load(Ordering::SeqCst) <= MAX_ACTIVE);
        assert_eq!(pool.active(), pool.idle_count());
        assert!(pool.active() <= MAX_ACTIVE);

        pool.close().await.unwrap();
        assert_eq!(pool.active(), 0);
        assert_eq!(pool.connector().live.load(Ordering::SeqCst), 0);
    }
}
