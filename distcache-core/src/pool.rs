//! Per-node socket pool (`spec.md` §4.3): bounded, with a warmed minimum,
//! dead-node detection via a [`FailurePolicy`], and SASL authentication of
//! freshly created sockets. Built on `deadpool::managed`, the same crate the
//! teacher pool used for its own (coarser-grained) client pool.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use deadpool::managed::{Manager, Object, Pool as DeadPool, PoolError, RecycleError, RecycleResult};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    auth::AuthProvider,
    endpoint::Endpoint,
    error::Error,
    failure_policy::{FailurePolicy, NodeState},
    protocol::binary::BinaryCodec,
    socket::{Connection, PooledSocket},
};

struct SocketPoolManager<C: Connection> {
    endpoint: Endpoint,
    connection_timeout: Duration,
    receive_timeout: Duration,
    auth: Option<Arc<AsyncMutex<Box<dyn AuthProvider>>>>,
    failure_policy: Arc<StdMutex<Box<dyn FailurePolicy>>>,
    _conn: std::marker::PhantomData<C>,
}

#[async_trait]
impl<C: Connection> Manager<PooledSocket<C>, Error> for SocketPoolManager<C> {
    async fn create(&self) -> Result<PooledSocket<C>, Error> {
        {
            let mut policy = self.failure_policy.lock().unwrap();
            if matches!(policy.state(), NodeState::Dead { .. }) && !policy.try_claim_probe() {
                return Err(Error::NoNode);
            }
        }

        let result =
            PooledSocket::connect(self.endpoint.clone(), self.connection_timeout, self.receive_timeout).await;
        {
            let mut policy = self.failure_policy.lock().unwrap();
            match &result {
                Ok(_) => policy.record_success(),
                Err(_) => policy.record_failure(),
            }
        }
        let mut socket = result?;

        if let Some(auth) = &self.auth {
            let mut provider = auth.lock().await;
            if let Err(err) = BinaryCodec.authenticate(&mut socket, provider.as_mut()).await {
                self.failure_policy.lock().unwrap().record_failure();
                return Err(err);
            }
        }
        Ok(socket)
    }

    async fn recycle(&self, socket: &mut PooledSocket<C>) -> RecycleResult<Error> {
        if socket.is_broken() {
            self.failure_policy.lock().unwrap().record_failure();
            return Err(RecycleError::Message("socket broken on release".into()));
        }
        Ok(())
    }
}

/// A socket on loan from a [`SocketPool`]. On drop, returns the socket to the
/// pool's idle queue unless the idle queue is already at `min_pool_size`, in
/// which case the surplus socket is closed instead (`spec.md` §4.3).
pub struct PooledConnection<C: Connection> {
    inner: Option<Object<PooledSocket<C>, Error>>,
    pool: DeadPool<PooledSocket<C>, Error>,
    min_pool_size: usize,
}

impl<C: Connection> std::ops::Deref for PooledConnection<C> {
    type Target = PooledSocket<C>;
    fn deref(&self) -> &Self::Target {
        self.inner.as_ref().expect("socket taken before drop")
    }
}

impl<C: Connection> std::ops::DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.inner.as_mut().expect("socket taken before drop")
    }
}

impl<C: Connection> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(socket) = self.inner.take() {
            if self.pool.status().available >= self.min_pool_size as isize {
                drop(Object::take(socket));
            }
        }
    }
}

/// Bounded pool of sockets to one node. `acquire()` blocks up to
/// `queue_timeout` once `max_pool_size` sockets are in use, and fails with
/// [`Error::PoolExhausted`] past that.
pub struct SocketPool<C: Connection> {
    endpoint: Endpoint,
    pool: DeadPool<PooledSocket<C>, Error>,
    queue_timeout: Duration,
    failure_policy: Arc<StdMutex<Box<dyn FailurePolicy>>>,
    min_pool_size: usize,
}

impl<C: Connection> SocketPool<C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        endpoint: Endpoint,
        max_pool_size: usize,
        min_pool_size: usize,
        connection_timeout: Duration,
        receive_timeout: Duration,
        queue_timeout: Duration,
        auth: Option<Box<dyn AuthProvider>>,
        failure_policy: Box<dyn FailurePolicy>,
    ) -> Self {
        let failure_policy = Arc::new(StdMutex::new(failure_policy));
        let manager = SocketPoolManager {
            endpoint: endpoint.clone(),
            connection_timeout,
            receive_timeout,
            auth: auth.map(|provider| Arc::new(AsyncMutex::new(provider))),
            failure_policy: failure_policy.clone(),
            _conn: std::marker::PhantomData,
        };
        Self {
            endpoint,
            pool: DeadPool::new(manager, max_pool_size),
            queue_timeout,
            failure_policy,
            min_pool_size,
        }
    }

    /// Pre-warm `min_pool_size` sockets. Acquires and immediately drops them
    /// so they land in the pool's idle queue; a failure partway through just
    /// leaves the pool under-warmed rather than failing construction.
    pub async fn warm(&self, min_pool_size: usize) {
        let mut held = Vec::with_capacity(min_pool_size);
        for _ in 0..min_pool_size {
            match self.pool.get().await {
                Ok(socket) => held.push(socket),
                Err(err) => {
                    log::warn!("failed to pre-warm a socket to {}: {}", self.endpoint, err);
                    break;
                }
            }
        }
    }

    pub async fn acquire(&self) -> Result<PooledConnection<C>, Error> {
        match tokio::time::timeout(self.queue_timeout, self.pool.get()).await {
            Ok(Ok(socket)) => Ok(PooledConnection {
                inner: Some(socket),
                pool: self.pool.clone(),
                min_pool_size: self.min_pool_size,
            }),
            Ok(Err(PoolError::Backend(err))) => Err(err),
            Ok(Err(_)) => Err(Error::PoolExhausted),
            Err(_) => Err(Error::PoolExhausted),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> NodeState {
        self.failure_policy.lock().unwrap().state()
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.state(), NodeState::Alive)
    }

    pub fn probe_due(&self) -> bool {
        self.failure_policy.lock().unwrap().probe_due()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::test_support::MockConnection;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let pool: SocketPool<MockConnection> = SocketPool::new(
            Endpoint::new("localhost", 11211),
            4,
            1,
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_millis(50),
            None,
            Box::new(crate::failure_policy::NoFailurePolicy),
        );
        let socket = pool.acquire().await.unwrap();
        drop(socket);
        assert!(pool.is_alive());
    }
}
