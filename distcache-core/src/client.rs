//! The public façade (`spec.md` §4.7, §6): applies the key transformer,
//! locates a node, builds an operation, executes it, and maps the typed
//! result back to the caller. Every method here has an asynchronous
//! implementation; `distcache-tokio::BlockingClient` wraps the same
//! pipeline with a synchronous façade rather than duplicating it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    config::ClientConfig,
    endpoint::Endpoint,
    error::Error,
    item::{compute_expiration, CacheItem},
    key_transformer::KeyTransformer,
    protocol::{ConcatMode, MutationMode, Operation, Status, StoreMode},
    server_pool::ServerPool,
    socket::Connection,
    transcoder::Transcoder,
};

/// The outcome of a CAS-aware get: the decoded value plus the token needed
/// to condition a later store.
#[derive(Debug, Clone)]
pub struct CasResult<T> {
    pub value: T,
    pub cas: u64,
}

/// The outcome of a store/cas/append/prepend/delete: whether it succeeded,
/// the resulting (or, on a CAS mismatch, the server's current) CAS, and the
/// status code verbatim (`spec.md` §7 -- protocol-level outcomes are
/// non-exceptional and surface here rather than as a raised error).
#[derive(Debug, Clone)]
pub struct StoreResult {
    pub success: bool,
    pub cas: u64,
    pub status: Status,
}

/// The outcome of an increment/decrement.
#[derive(Debug, Clone)]
pub struct MutateResult {
    pub success: bool,
    pub value: u64,
    pub status: Status,
}

/// A distributed memcached client: one `ServerPool` shared behind every
/// clone, a transcoder for typed values, and a key transformer applied to
/// every user-supplied key before it reaches the locator or the wire.
pub struct Client<C: Connection, Tc: Transcoder, Kt: KeyTransformer> {
    pool: ServerPool<C>,
    transcoder: Tc,
    key_transformer: Kt,
    multi_node_deadline: Duration,
}

impl<C: Connection, Tc: Transcoder, Kt: KeyTransformer> Client<C, Tc, Kt> {
    /// Build the node set, pre-warm each pool to `min_pool_size`, and start
    /// the background reconnection scheduler.
    pub async fn new(config: ClientConfig, transcoder: Tc, key_transformer: Kt) -> Result<Self, Error> {
        let multi_node_deadline = config.multi_node_deadline;
        let min_pool_size = config.socket_pool.min_pool_size;
        let dead_timeout = config.socket_pool.dead_timeout;
        let mut pool = ServerPool::new(&config)?;
        pool.warm(min_pool_size).await;
        pool.start_reconnect_scheduler(dead_timeout);
        Ok(Self {
            pool,
            transcoder,
            key_transformer,
            multi_node_deadline,
        })
    }

    /// Subscribe to node failures. Informational only (`spec.md` §7): it
    /// never fails the request that provoked it beyond that request's own
    /// result.
    pub fn node_failed(&self) -> tokio::sync::broadcast::Receiver<Endpoint> {
        self.pool.subscribe_node_failed()
    }

    /// Stop the background reconnection scheduler. In-flight operations
    /// observe a transport error once their sockets are dropped.
    pub fn dispose(&mut self) {
        self.pool.shutdown();
    }

    fn wire_key(&self, key: &str) -> Vec<u8> {
        self.key_transformer.transform(key)
    }

    fn locate(&self, wire_key: &[u8]) -> Result<&Arc<crate::node::Node<C>>, Error> {
        self.pool.locate(wire_key).ok_or(Error::NoNode)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        Ok(self.get_with_cas(key).await?.map(|result| result.value))
    }

    /// Identical to [`Client::get`]: a miss is already `Ok(None)` rather
    /// than a raised error, so there is no separate throwing/non-throwing
    /// distinction to preserve in this API.
    pub async fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        self.get(key).await
    }

    pub async fn get_with_cas<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CasResult<T>>, Error> {
        let wire_key = self.wire_key(key);
        let node = self.locate(&wire_key)?;
        let result = node.execute(&Operation::Get { key: wire_key }).await?;
        if !result.success {
            return Ok(None);
        }
        let item = CacheItem::new(result.flags, result.value.unwrap_or_default());
        let value = self.transcoder.deserialize(&item)?;
        Ok(Some(CasResult { value, cas: result.cas }))
    }

    /// Byte-level get, bypassing `Tc` entirely. Used by
    /// [`crate::adaptor::DistributedCacheAdaptor`], which speaks raw bytes
    /// rather than the configured transcoder's framing.
    pub async fn get_raw(&self, key: &str) -> Result<Option<CasResult<Vec<u8>>>, Error> {
        let wire_key = self.wire_key(key);
        let node = self.locate(&wire_key)?;
        let result = node.execute(&Operation::Get { key: wire_key }).await?;
        if !result.success {
            return Ok(None);
        }
        Ok(Some(CasResult {
            value: result.value.unwrap_or_default(),
            cas: result.cas,
        }))
    }

    /// Byte-level store, bypassing `Tc` and tagging the frame with
    /// [`crate::transcoder::RAW_FLAGS`] regardless of which transcoder the
    /// client was built with.
    pub async fn store_raw(
        &self,
        mode: StoreMode,
        key: &str,
        value: Vec<u8>,
        cas: u64,
        expiration: Option<Duration>,
    ) -> Result<StoreResult, Error> {
        let wire_key = self.wire_key(key);
        let node = self.locate(&wire_key)?;
        let expiration = compute_expiration(expiration, None, None, None)?;
        let op = Operation::Store {
            mode,
            key: wire_key,
            flags: crate::transcoder::RAW_FLAGS,
            expiration,
            value,
            cas,
        };
        let result = node.execute(&op).await?;
        Ok(StoreResult {
            success: result.success,
            cas: result.cas,
            status: result.status,
        })
    }

    pub async fn get_multi<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<HashMap<String, T>, Error> {
        let with_cas = self.get_multi_with_cas::<T>(keys).await?;
        Ok(with_cas.into_iter().map(|(key, result)| (key, result.value)).collect())
    }

    /// Multi-key dispatch (`spec.md` §5): bucket by owning node, fan out
    /// concurrently, merge under a shared deadline. Keys that locate to no
    /// node, and nodes that do not answer within `multi_node_deadline`, are
    /// silently absent from the result rather than raising an error.
    pub async fn get_multi_with_cas<T: DeserializeOwned>(
        &self,
        keys: &[&str],
    ) -> Result<HashMap<String, CasResult<T>>, Error> {
        let mut wire_to_original: HashMap<Vec<u8>, String> = HashMap::new();
        for key in keys {
            wire_to_original.insert(self.wire_key(key), (*key).to_string());
        }
        let wire_keys: Vec<Vec<u8>> = wire_to_original.keys().cloned().collect();
        let groups = self.pool.group_by_node(&wire_keys);

        let merged = Arc::new(AsyncMutex::new(HashMap::new()));
        let mut tasks = Vec::new();
        for (node_index, group_keys) in groups {
            let node = match self.pool.node_at(node_index).cloned() {
                Some(node) => node,
                None => continue,
            };
            let merged = merged.clone();
            let deadline = self.multi_node_deadline;
            tasks.push(tokio::spawn(async move {
                if let Ok(Ok(hits)) = tokio::time::timeout(deadline, node.execute_multi_get(&group_keys)).await {
                    let mut merged = merged.lock().await;
                    for (wire_key, result) in hits {
                        merged.insert(wire_key, result);
                    }
                }
            }));
        }
        futures::future::join_all(tasks).await;

        let merged = merged.lock().await.clone();
        let mut out = HashMap::with_capacity(merged.len());
        for (wire_key, result) in merged {
            if !result.success {
                continue;
            }
            let original = match wire_to_original.get(&wire_key) {
                Some(original) => original.clone(),
                None => continue,
            };
            let item = CacheItem::new(result.flags, result.value.unwrap_or_default());
            let value: T = self.transcoder.deserialize(&item)?;
            out.insert(original, CasResult { value, cas: result.cas });
        }
        Ok(out)
    }

    pub async fn store<V: Serialize + ?Sized>(
        &self,
        mode: StoreMode,
        key: &str,
        value: &V,
        expiration: Option<Duration>,
    ) -> Result<StoreResult, Error> {
        self.cas(mode, key, value, 0, expiration).await
    }

    /// A non-zero `cas` maps to a conditional request (`spec.md` §4.7); a
    /// mismatch comes back as `success=false, status=KeyExists` with the
    /// server's current CAS, not a raised error.
    pub async fn cas<V: Serialize + ?Sized>(
        &self,
        mode: StoreMode,
        key: &str,
        value: &V,
        cas: u64,
        expiration: Option<Duration>,
    ) -> Result<StoreResult, Error> {
        let wire_key = self.wire_key(key);
        let node = self.locate(&wire_key)?;
        let item = self.transcoder.serialize(value)?;
        let expiration = compute_expiration(expiration, None, None, None)?;
        let op = Operation::Store {
            mode,
            key: wire_key,
            flags: item.flags,
            expiration,
            value: item.data,
            cas,
        };
        let result = node.execute(&op).await?;
        Ok(StoreResult {
            success: result.success,
            cas: result.cas,
            status: result.status,
        })
    }

    pub async fn add<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        expiration: Option<Duration>,
    ) -> Result<StoreResult, Error> {
        self.store(StoreMode::Add, key, value, expiration).await
    }

    pub async fn replace<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
        expiration: Option<Duration>,
    ) -> Result<StoreResult, Error> {
        self.store(StoreMode::Replace, key, value, expiration).await
    }

    pub async fn increment(
        &self,
        key: &str,
        default: u64,
        delta: u64,
        expiration: Option<Duration>,
        cas: u64,
    ) -> Result<MutateResult, Error> {
        self.mutate(MutationMode::Increment, key, default, delta, expiration, cas).await
    }

    pub async fn decrement(
        &self,
        key: &str,
        default: u64,
        delta: u64,
        expiration: Option<Duration>,
        cas: u64,
    ) -> Result<MutateResult, Error> {
        self.mutate(MutationMode::Decrement, key, default, delta, expiration, cas).await
    }

    async fn mutate(
        &self,
        mode: MutationMode,
        key: &str,
        default: u64,
        delta: u64,
        expiration: Option<Duration>,
        cas: u64,
    ) -> Result<MutateResult, Error> {
        let wire_key = self.wire_key(key);
        let node = self.locate(&wire_key)?;
        let expiration = compute_expiration(expiration, None, None, None)?;
        let op = Operation::Mutate {
            mode,
            key: wire_key,
            delta,
            initial: default,
            expiration,
            cas,
        };
        let result = node.execute(&op).await?;
        Ok(MutateResult {
            success: result.success,
            value: result.numeric.unwrap_or(0),
            status: result.status,
        })
    }

    pub async fn append(&self, key: &str, data: &[u8], cas: u64) -> Result<StoreResult, Error> {
        self.concat(ConcatMode::Append, key, data, cas).await
    }

    pub async fn prepend(&self, key: &str, data: &[u8], cas: u64) -> Result<StoreResult, Error> {
        self.concat(ConcatMode::Prepend, key, data, cas).await
    }

    async fn concat(&self, mode: ConcatMode, key: &str, data: &[u8], cas: u64) -> Result<StoreResult, Error> {
        let wire_key = self.wire_key(key);
        let node = self.locate(&wire_key)?;
        let op = Operation::Concat {
            mode,
            key: wire_key,
            value: data.to_vec(),
            cas,
        };
        let result = node.execute(&op).await?;
        Ok(StoreResult {
            success: result.success,
            cas: result.cas,
            status: result.status,
        })
    }

    pub async fn remove(&self, key: &str) -> Result<bool, Error> {
        let wire_key = self.wire_key(key);
        let node = self.locate(&wire_key)?;
        let result = node.execute(&Operation::Delete { key: wire_key, cas: 0 }).await?;
        Ok(result.success)
    }

    /// Emulated via an empty-bytes `Append` (`spec.md` §4.1, §8 property 6):
    /// success proves presence and leaves the value untouched; failure
    /// leaves an absent key absent.
    pub async fn exists(&self, key: &str) -> Result<bool, Error> {
        Ok(self.append(key, &[], 0).await?.success)
    }

    pub async fn flush_all(&self) -> Result<(), Error> {
        let deadline = self.multi_node_deadline;
        let mut tasks = Vec::new();
        for node in self.pool.working_nodes() {
            let node = node.clone();
            tasks.push(tokio::spawn(async move {
                let _ = tokio::time::timeout(deadline, node.execute(&Operation::Flush { delay: 0 })).await;
            }));
        }
        futures::future::join_all(tasks).await;
        Ok(())
    }

    pub async fn stats(&self, class: Option<&str>) -> Result<HashMap<String, HashMap<String, String>>, Error> {
        let deadline = self.multi_node_deadline;
        let merged = Arc::new(AsyncMutex::new(HashMap::new()));
        let mut tasks = Vec::new();
        for node in self.pool.working_nodes() {
            let node = node.clone();
            let merged = merged.clone();
            let class = class.map(|c| c.to_string());
            let endpoint = node.endpoint().to_string();
            tasks.push(tokio::spawn(async move {
                let op = Operation::Stats { class };
                if let Ok(Ok(result)) = tokio::time::timeout(deadline, node.execute(&op)).await {
                    if result.success {
                        let mut merged = merged.lock().await;
                        merged.insert(endpoint, result.pairs.into_iter().collect::<HashMap<_, _>>());
                    }
                }
            }));
        }
        futures::future::join_all(tasks).await;
        Ok(merged.lock().await.clone())
    }
}
