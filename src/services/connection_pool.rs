use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::ops::Deref;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Notify};

use crate::api::middleware::AppError;
use crate::config::PoolConfig;
use crate::services::executor::RawExecutor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Active,
}

/// One database link owned by the pool
pub struct Connection<C> {
    id: u64,
    state: ConnectionState,
    link: C,
    created_at: Instant,
    last_used: Instant,
}

impl<C> Connection<C> {
    fn new(id: u64, link: C, state: ConnectionState) -> Self {
        let now = Instant::now();
        Self {
            id,
            state,
            link,
            created_at: now,
            last_used: now,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn link(&self) -> &C {
        &self.link
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }
}

struct Waiter<C> {
    id: u64,
    tx: oneshot::Sender<Connection<C>>,
}

struct PoolState<C> {
    idle: VecDeque<Connection<C>>,
    /// Checked-out connections plus slots reserved by in-flight connects
    active: usize,
    waiters: VecDeque<Waiter<C>>,
    closed: bool,
    next_connection_id: u64,
    next_waiter_id: u64,
    total_created: u64,
    total_acquired: u64,
    total_released: u64,
    total_discarded: u64,
}

impl<C> PoolState<C> {
    // Waiters whose acquire future was dropped without timing out
    fn prune_abandoned_waiters(&mut self) {
        self.waiters.retain(|w| !w.tx.is_closed());
    }
}

enum AcquirePlan<C> {
    Ready(Connection<C>),
    Create,
    Wait {
        id: u64,
        rx: oneshot::Receiver<Connection<C>>,
        timeout: Duration,
    },
}

/// Bounded pool of raw executor connections for one database target
///
/// `acquire` hands out an idle connection, opens a new one while below
/// `max_size`, and otherwise fails with `PoolExhausted`. With a positive
/// `acquire_timeout_ms` the caller instead joins a FIFO wait queue and is
/// handed the next released connection directly.
pub struct ConnectionPool<E: RawExecutor> {
    executor: Arc<E>,
    config: PoolConfig,
    state: Mutex<PoolState<E::Connection>>,
    drained: Notify,
}

impl<E: RawExecutor> ConnectionPool<E> {
    pub fn new(executor: Arc<E>, config: PoolConfig) -> Self {
        Self {
            executor,
            config,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: 0,
                waiters: VecDeque::new(),
                closed: false,
                next_connection_id: 1,
                next_waiter_id: 1,
                total_created: 0,
                total_acquired: 0,
                total_released: 0,
                total_discarded: 0,
            }),
            drained: Notify::new(),
        }
    }

    pub fn executor(&self) -> &Arc<E> {
        &self.executor
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    // Counters stay consistent across a panic elsewhere, so a poisoned lock is recovered
    fn lock_state(&self) -> MutexGuard<'_, PoolState<E::Connection>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open connections until `min_size` is reached; returns how many were opened
    pub async fn warm_up(&self) -> usize {
        let mut opened = 0;
        loop {
            {
                let mut state = self.lock_state();
                if state.closed || state.active + state.idle.len() >= self.config.min_size {
                    break;
                }
                state.active += 1;
            }

            let connected = self.executor.connect().await;
            let (stray, drained, keep_going) = {
                let mut state = self.lock_state();
                state.active -= 1;
                let drained = state.active == 0;
                match connected {
                    Ok(link) if !state.closed => {
                        let id = state.next_connection_id;
                        state.next_connection_id += 1;
                        state.total_created += 1;
                        state.idle.push_back(Connection::new(id, link, ConnectionState::Idle));
                        opened += 1;
                        (None, drained, true)
                    }
                    // Closed while connecting: hand the link back instead of parking it
                    Ok(link) => (Some(link), drained, false),
                    Err(e) => {
                        tracing::warn!("Failed to pre-open pooled connection: {}", e);
                        (None, drained, false)
                    }
                }
            };

            if drained {
                self.drained.notify_waiters();
            }
            if let Some(link) = stray {
                self.executor.disconnect(link).await;
            }
            if !keep_going {
                break;
            }
        }

        if opened > 0 {
            tracing::info!(
                "Warmed up {} connection pool with {} connections (min_size: {})",
                self.executor.name(),
                opened,
                self.config.min_size
            );
        }
        opened
    }

    /// Check out a connection
    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection<E>, AppError> {
        let plan = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(AppError::PoolClosed);
            }

            if let Some(mut conn) = state.idle.pop_back() {
                conn.state = ConnectionState::Active;
                state.active += 1;
                state.total_acquired += 1;
                AcquirePlan::Ready(conn)
            } else if state.active + state.idle.len() < self.config.max_size {
                // Reserve the slot before connecting so concurrent callers see it
                state.active += 1;
                AcquirePlan::Create
            } else if let Some(timeout) = self.config.acquire_timeout() {
                state.prune_abandoned_waiters();
                let (tx, rx) = oneshot::channel();
                let id = state.next_waiter_id;
                state.next_waiter_id += 1;
                state.waiters.push_back(Waiter { id, tx });
                tracing::debug!(
                    "Pool saturated, queued waiter {} (waiting: {})",
                    id,
                    state.waiters.len()
                );
                AcquirePlan::Wait { id, rx, timeout }
            } else {
                tracing::debug!(
                    "Pool exhausted (active: {}, max_size: {})",
                    state.active,
                    self.config.max_size
                );
                return Err(AppError::PoolExhausted);
            }
        };

        match plan {
            AcquirePlan::Ready(conn) => Ok(self.guard(conn)),
            AcquirePlan::Create => self.create_connection().await,
            AcquirePlan::Wait { id, rx, timeout } => self.wait_for_release(id, rx, timeout).await,
        }
    }

    async fn create_connection(self: &Arc<Self>) -> Result<PooledConnection<E>, AppError> {
        let connected = self.executor.connect().await;

        let opened = {
            let mut state = self.lock_state();
            match connected {
                Ok(link) if !state.closed => {
                    let id = state.next_connection_id;
                    state.next_connection_id += 1;
                    state.total_created += 1;
                    state.total_acquired += 1;
                    tracing::debug!(
                        "Opened connection {} (active: {}, idle: {})",
                        id,
                        state.active,
                        state.idle.len()
                    );
                    Ok(Connection::new(id, link, ConnectionState::Active))
                }
                // Closed while connecting, or the connect failed: give the slot back
                Ok(link) => {
                    state.active -= 1;
                    Err((Some(link), AppError::PoolClosed, state.active == 0))
                }
                Err(e) => {
                    state.active -= 1;
                    Err((None, e, state.active == 0))
                }
            }
        };

        match opened {
            Ok(conn) => Ok(self.guard(conn)),
            Err((link, e, drained)) => {
                if drained {
                    self.drained.notify_waiters();
                }
                if let Some(link) = link {
                    self.executor.disconnect(link).await;
                }
                Err(e)
            }
        }
    }

    async fn wait_for_release(
        self: &Arc<Self>,
        id: u64,
        mut rx: oneshot::Receiver<Connection<E::Connection>>,
        timeout: Duration,
    ) -> Result<PooledConnection<E>, AppError> {
        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(conn)) => Ok(self.guard(conn)),
            // Sender dropped: the pool closed while we waited
            Ok(Err(_)) => Err(AppError::PoolClosed),
            Err(_) => {
                {
                    let mut state = self.lock_state();
                    if let Some(pos) = state.waiters.iter().position(|w| w.id == id) {
                        state.waiters.remove(pos);
                        tracing::debug!("Waiter {} timed out after {:?}", id, timeout);
                        return Err(AppError::AcquireTimeout(timeout.as_millis() as u64));
                    }
                }
                // Handed a connection under the lock just as the timer fired
                match rx.try_recv() {
                    Ok(conn) => Ok(self.guard(conn)),
                    Err(_) => Err(AppError::AcquireTimeout(timeout.as_millis() as u64)),
                }
            }
        }
    }

    fn guard(self: &Arc<Self>, conn: Connection<E::Connection>) -> PooledConnection<E> {
        PooledConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
        }
    }

    /// Return a checked-out connection
    ///
    /// The oldest live waiter receives it directly; otherwise it becomes idle.
    fn release(&self, mut conn: Connection<E::Connection>) {
        let mut state = self.lock_state();
        state.total_released += 1;
        conn.last_used = Instant::now();

        if !self.executor.is_healthy(&conn.link) {
            state.active -= 1;
            state.total_discarded += 1;
            tracing::warn!("Discarding broken connection {}", conn.id);
            let drained = state.active == 0;
            drop(state);
            drop(conn);
            if drained {
                self.drained.notify_waiters();
            }
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.tx.send(conn) {
                Ok(()) => {
                    state.total_acquired += 1;
                    tracing::debug!("Handed connection to waiter {}", waiter.id);
                    return;
                }
                // Waiter gave up; try the next one
                Err(returned) => conn = returned,
            }
        }

        conn.state = ConnectionState::Idle;
        state.active -= 1;
        state.idle.push_back(conn);
        let drained = state.active == 0;
        drop(state);
        if drained {
            self.drained.notify_waiters();
        }
    }

    /// Disconnect idle connections unused for longer than `idle_timeout_ms`,
    /// keeping at least `min_size` connections open
    pub async fn reap_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let expired: Vec<Connection<E::Connection>> = {
            let mut state = self.lock_state();
            let total = state.active + state.idle.len();
            let removable = total.saturating_sub(self.config.min_size);
            let mut expired = Vec::new();
            // Front of the idle queue is the least recently used
            while expired.len() < removable
                && state.idle.front().is_some_and(|c| c.idle_for() >= idle_timeout)
            {
                if let Some(conn) = state.idle.pop_front() {
                    expired.push(conn);
                }
            }
            expired
        };

        let count = expired.len();
        for conn in expired {
            self.executor.disconnect(conn.link).await;
        }
        if count > 0 {
            tracing::info!("Closed {} idle connections", count);
        }
        count
    }

    /// Stop handing out connections, wait for active ones to come back, then
    /// disconnect everything
    pub async fn close(&self) {
        {
            let mut state = self.lock_state();
            state.closed = true;
            // Dropping the senders fails every pending waiter
            state.waiters.clear();
        }

        loop {
            let notified = self.drained.notified();
            let active = self.lock_state().active;
            if active == 0 {
                break;
            }
            tracing::info!("Waiting for {} active connections to drain", active);
            notified.await;
        }

        let idle: Vec<Connection<E::Connection>> = self.lock_state().idle.drain(..).collect();
        let count = idle.len();
        for conn in idle {
            self.executor.disconnect(conn.link).await;
        }
        tracing::info!("Connection pool closed ({} connections disconnected)", count);
    }

    pub fn status(&self) -> PoolStatus {
        let mut state = self.lock_state();
        state.prune_abandoned_waiters();
        PoolStatus {
            min_size: self.config.min_size,
            max_size: self.config.max_size,
            active: state.active,
            idle: state.idle.len(),
            waiting: state.waiters.len(),
            total_created: state.total_created,
            total_acquired: state.total_acquired,
            total_released: state.total_released,
            total_discarded: state.total_discarded,
        }
    }
}

/// Checked-out connection; returned to the pool exactly once, on drop
pub struct PooledConnection<E: RawExecutor> {
    pool: Arc<ConnectionPool<E>>,
    conn: Option<Connection<E::Connection>>,
}

impl<E: RawExecutor> PooledConnection<E> {
    /// Return the connection to the pool now
    pub fn release(self) {
        drop(self);
    }
}

impl<E: RawExecutor> Deref for PooledConnection<E> {
    type Target = Connection<E::Connection>;

    fn deref(&self) -> &Self::Target {
        // Only taken in drop
        self.conn.as_ref().expect("pooled connection already released")
    }
}

impl<E: RawExecutor> Drop for PooledConnection<E> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

/// Connection pool status information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub min_size: usize,
    pub max_size: usize,
    pub active: usize,
    pub idle: usize,
    pub waiting: usize,
    pub total_created: u64,
    pub total_acquired: u64,
    pub total_released: u64,
    pub total_discarded: u64,
}

impl PoolStatus {
    pub fn total(&self) -> usize {
        self.active + self.idle
    }

    /// active / (active + idle), 0.0 for an empty pool
    pub fn utilization(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.active as f64 / self.total() as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::executor::scripted::ScriptedExecutor;
    use std::sync::atomic::Ordering;
    use tokio_test::assert_ok;

    fn pool(min_size: usize, max_size: usize, acquire_timeout_ms: u64) -> Arc<ConnectionPool<ScriptedExecutor>> {
        Arc::new(ConnectionPool::new(
            Arc::new(ScriptedExecutor::new()),
            PoolConfig {
                min_size,
                max_size,
                acquire_timeout_ms,
                idle_timeout_ms: 60_000,
            },
        ))
    }

    #[tokio::test]
    async fn test_acquire_creates_until_max_then_exhausts() {
        let pool = pool(0, 2, 0);
        let a = assert_ok!(pool.acquire().await);
        let b = assert_ok!(pool.acquire().await);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.state(), ConnectionState::Active);

        let err = pool.acquire().await.err();
        assert!(matches!(err, Some(AppError::PoolExhausted)));

        let status = pool.status();
        assert_eq!(status.active, 2);
        assert_eq!(status.idle, 0);
        assert_eq!(status.waiting, 0);
        assert!(status.total() <= status.max_size);
    }

    #[tokio::test]
    async fn test_release_reuses_idle_connection() {
        let pool = pool(0, 2, 0);
        let first = assert_ok!(pool.acquire().await);
        let first_id = first.id();
        first.release();

        let status = pool.status();
        assert_eq!(status.active, 0);
        assert_eq!(status.idle, 1);

        let again = assert_ok!(pool.acquire().await);
        assert_eq!(again.id(), first_id);
        assert_eq!(pool.executor().connect_count(), 1);
    }

    #[tokio::test]
    async fn test_acquire_and_release_counts_balance() {
        let pool = pool(0, 3, 0);
        for _ in 0..5 {
            let a = assert_ok!(pool.acquire().await);
            let b = assert_ok!(pool.acquire().await);
            drop(a);
            drop(b);
        }
        let status = pool.status();
        assert_eq!(status.total_acquired, 10);
        assert_eq!(status.total_released, 10);
        assert_eq!(status.active, 0);
    }

    #[tokio::test]
    async fn test_warm_up_opens_min_size() {
        let pool = pool(2, 4, 0);
        assert_eq!(pool.warm_up().await, 2);
        let status = pool.status();
        assert_eq!(status.idle, 2);
        assert_eq!(status.total_created, 2);
        // Already at min_size
        assert_eq!(pool.warm_up().await, 0);
    }

    #[tokio::test]
    async fn test_connect_failure_returns_reservation() {
        let pool = pool(0, 1, 0);
        pool.executor().set_unreachable(true);
        let err = pool.acquire().await.err();
        assert!(matches!(err, Some(AppError::Connection(_))));
        assert_eq!(pool.status().active, 0);

        pool.executor().set_unreachable(false);
        assert_ok!(pool.acquire().await);
    }

    #[tokio::test]
    async fn test_waiter_receives_released_connection() {
        let pool = pool(0, 1, 1_000);
        let held = assert_ok!(pool.acquire().await);
        let held_id = held.id();

        let waiting_pool = Arc::clone(&pool);
        let waiter = tokio::spawn(async move { waiting_pool.acquire().await.map(|c| c.id()) });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.status().waiting, 1);

        drop(held);
        let got = assert_ok!(waiter.await.unwrap());
        assert_eq!(got, held_id);

        let status = pool.status();
        assert_eq!(status.waiting, 0);
        assert_eq!(status.active, 0);
        assert_eq!(status.total_acquired, status.total_released);
    }

    #[tokio::test]
    async fn test_waiter_times_out() {
        let pool = pool(0, 1, 30);
        let _held = assert_ok!(pool.acquire().await);
        let err = pool.acquire().await.err();
        assert!(matches!(err, Some(AppError::AcquireTimeout(30))));
        assert_eq!(pool.status().waiting, 0);
        assert_eq!(pool.status().active, 1);
    }

    #[tokio::test]
    async fn test_waiters_are_served_in_order() {
        let pool = pool(0, 1, 1_000);
        let held = assert_ok!(pool.acquire().await);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for n in 0..3 {
            let pool = Arc::clone(&pool);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Ok(conn) = pool.acquire().await {
                    tx.send(n).unwrap();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    drop(conn);
                }
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(held);

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(rx.recv().await.unwrap());
        }
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_not_counted() {
        let pool = pool(0, 1, 5_000);
        let held = assert_ok!(pool.acquire().await);

        let waiting = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.acquire().await.map(|conn| conn.id()) }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.status().waiting, 1);

        waiting.abort();
        let _ = waiting.await;
        assert_eq!(pool.status().waiting, 0);

        drop(held);
        let status = pool.status();
        assert_eq!(status.idle, 1);
        assert_eq!(status.active, 0);
    }

    #[tokio::test]
    async fn test_close_during_warm_up_disconnects_new_link() {
        let pool = Arc::new(ConnectionPool::new(
            Arc::new(ScriptedExecutor::new().with_connect_latency(Duration::from_millis(100))),
            PoolConfig {
                min_size: 2,
                max_size: 4,
                acquire_timeout_ms: 0,
                idle_timeout_ms: 60_000,
            },
        ));

        let warming = tokio::spawn({
            let pool = Arc::clone(&pool);
            async move { pool.warm_up().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let closed = tokio::time::timeout(Duration::from_secs(1), pool.close()).await;
        assert!(closed.is_ok());
        assert_eq!(assert_ok!(warming.await), 0);

        let status = pool.status();
        assert_eq!(status.idle, 0);
        assert_eq!(status.active, 0);
        assert_eq!(pool.executor().disconnects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_reap_idle_keeps_min_size() {
        let pool = Arc::new(ConnectionPool::new(
            Arc::new(ScriptedExecutor::new()),
            PoolConfig {
                min_size: 1,
                max_size: 4,
                acquire_timeout_ms: 0,
                idle_timeout_ms: 10,
            },
        ));
        let a = assert_ok!(pool.acquire().await);
        let b = assert_ok!(pool.acquire().await);
        let c = assert_ok!(pool.acquire().await);
        drop((a, b, c));

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(pool.reap_idle().await, 2);
        assert_eq!(pool.status().idle, 1);
        assert_eq!(pool.executor().disconnects.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_drains_active_connections() {
        let pool = pool(0, 2, 0);
        let held = assert_ok!(pool.acquire().await);
        let idle = assert_ok!(pool.acquire().await);
        drop(idle);

        let closing = Arc::clone(&pool);
        let close = tokio::spawn(async move { closing.close().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!close.is_finished());
        assert!(matches!(pool.acquire().await.err(), Some(AppError::PoolClosed)));

        drop(held);
        close.await.unwrap();

        let status = pool.status();
        assert_eq!(status.active, 0);
        assert_eq!(status.idle, 0);
        assert_eq!(pool.executor().disconnects.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_utilization() {
        let status = PoolStatus {
            min_size: 0,
            max_size: 4,
            active: 3,
            idle: 1,
            waiting: 0,
            total_created: 4,
            total_acquired: 3,
            total_released: 0,
            total_discarded: 0,
        };
        assert!((status.utilization() - 0.75).abs() < 1e-9);
    }
}
