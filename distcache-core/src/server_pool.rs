//! Owns the node set, the locator, and the background reconnection
//! scheduler (`spec.md` §4.6). `NodeFailed` is a broadcast channel
//! subscribers register against explicitly, per the design note in
//! `spec.md` §9 that the pool should expose a registration handle rather
//! than holding a back-reference to its client.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::{
    auth::PlainAuthProvider,
    config::{ClientConfig, FailurePolicyConfig, Protocol},
    endpoint::Endpoint,
    error::Error,
    failure_policy::{FailurePolicy, NoFailurePolicy, ThrottlingFailurePolicy},
    locator::{KetamaLocator, NodeLocator, SingleNodeLocator},
    node::Node,
    pool::SocketPool,
    socket::Connection,
};

fn build_failure_policy(config: &FailurePolicyConfig) -> Box<dyn FailurePolicy> {
    match config {
        FailurePolicyConfig::None => Box::new(NoFailurePolicy),
        FailurePolicyConfig::Throttling {
            failure_threshold,
            reset_after,
            dead_timeout,
        } => Box::new(ThrottlingFailurePolicy::new(*failure_threshold, *reset_after, *dead_timeout)),
    }
}

pub struct ServerPool<C: Connection> {
    nodes: Vec<Arc<Node<C>>>,
    locator: Box<dyn NodeLocator>,
    node_failed_tx: broadcast::Sender<Endpoint>,
    reconnect_handle: Option<JoinHandle<()>>,
}

impl<C: Connection> ServerPool<C> {
    pub fn new(config: &ClientConfig) -> Result<Self, Error> {
        if config.authentication.is_some() && config.protocol != Protocol::Binary {
            return Err(Error::InvalidArgument(
                "SASL authentication requires the binary protocol".into(),
            ));
        }

        let nodes = config
            .servers
            .iter()
            .map(|endpoint| {
                let auth = config.authentication.as_ref().map(|cfg| {
                    let mut provider = PlainAuthProvider::new(cfg.user_name.clone(), cfg.password.clone());
                    if let Some(zone) = &cfg.zone {
                        provider = provider.with_zone(zone.clone());
                    }
                    Box::new(provider) as Box<dyn crate::auth::AuthProvider>
                });
                let pool = SocketPool::new(
                    endpoint.clone(),
                    config.socket_pool.max_pool_size,
                    config.socket_pool.min_pool_size,
                    config.socket_pool.connection_timeout,
                    config.socket_pool.receive_timeout,
                    config.socket_pool.queue_timeout,
                    auth,
                    build_failure_policy(&config.socket_pool.failure_policy),
                );
                Arc::new(Node::new(pool, config.protocol))
            })
            .collect::<Vec<_>>();

        let locator: Box<dyn NodeLocator> = if config.servers.len() <= 1 {
            Box::new(SingleNodeLocator)
        } else {
            Box::new(KetamaLocator::new(&config.servers))
        };

        let (node_failed_tx, _) = broadcast::channel(32);

        Ok(Self {
            nodes,
            locator,
            node_failed_tx,
            reconnect_handle: None,
        })
    }

    pub async fn warm(&self, min_pool_size: usize) {
        for node in &self.nodes {
            node.warm(min_pool_size).await;
        }
    }

    pub fn subscribe_node_failed(&self) -> broadcast::Receiver<Endpoint> {
        self.node_failed_tx.subscribe()
    }

    pub fn locate(&self, wire_key: &[u8]) -> Option<&Arc<Node<C>>> {
        let is_alive = |index: usize| self.nodes[index].is_alive();
        let index = self.locator.locate(wire_key, &is_alive)?;
        self.nodes.get(index)
    }

    pub fn working_nodes(&self) -> impl Iterator<Item = &Arc<Node<C>>> {
        self.nodes.iter().filter(|node| node.is_alive())
    }

    pub fn all_nodes(&self) -> impl Iterator<Item = &Arc<Node<C>>> {
        self.nodes.iter()
    }

    /// Bucket wire keys by owning node (`spec.md` §5 step 2). Keys that
    /// locate to no node (every node dead, or an empty ring) are dropped.
    pub fn group_by_node(&self, wire_keys: &[Vec<u8>]) -> HashMap<usize, Vec<Vec<u8>>> {
        let is_alive = |index: usize| self.nodes[index].is_alive();
        let mut groups: HashMap<usize, Vec<Vec<u8>>> = HashMap::new();
        for key in wire_keys {
            if let Some(index) = self.locator.locate(key, &is_alive) {
                groups.entry(index).or_default().push(key.clone());
            }
        }
        groups
    }

    pub fn node_at(&self, index: usize) -> Option<&Arc<Node<C>>> {
        self.nodes.get(index)
    }

    /// Spawn the background task that probes Dead nodes every `dead_timeout`
    /// (`spec.md` §4.6) and emits `NodeFailed` for nodes observed to flip
    /// from Alive to Dead between ticks.
    pub fn start_reconnect_scheduler(&mut self, dead_timeout: Duration)
    where
        C: 'static,
    {
        let nodes = self.nodes.clone();
        let tx = self.node_failed_tx.clone();
        let handle = tokio::spawn(async move {
            let mut was_alive: Vec<bool> = nodes.iter().map(|n| n.is_alive()).collect();
            loop {
                tokio::time::sleep(dead_timeout).await;
                for (index, node) in nodes.iter().enumerate() {
                    if !node.is_alive() && node.probe_due() {
                        let recovered = node.probe().await;
                        if recovered {
                            log::info!("node {} recovered on probe", node.endpoint());
                        }
                    }
                    let alive_now = node.is_alive();
                    if was_alive[index] && !alive_now {
                        let _ = tx.send(node.endpoint().clone());
                    }
                    was_alive[index] = alive_now;
                }
            }
        });
        self.reconnect_handle = Some(handle);
    }

    /// Stop the background scheduler; in-flight operations observe a
    /// transport error once their sockets are dropped (`spec.md` §4.6).
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.reconnect_handle.take() {
            handle.abort();
        }
    }
}

impl<C: Connection> Drop for ServerPool<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::test_support::MockConnection;

    #[tokio::test]
    async fn test_single_server_uses_single_node_locator() {
        let config = ClientConfig::new(vec![Endpoint::new("localhost", 11211)]);
        let pool: ServerPool<MockConnection> = ServerPool::new(&config).unwrap();
        assert_eq!(1, pool.locator.node_count());
        assert!(pool.locate(b"any-key").is_some());
    }

    #[tokio::test]
    async fn test_multi_server_uses_ketama_locator() {
        let config = ClientConfig::new(vec![
            Endpoint::new("a", 11211),
            Endpoint::new("b", 11211),
            Endpoint::new("c", 11211),
        ]);
        let pool: ServerPool<MockConnection> = ServerPool::new(&config).unwrap();
        assert_eq!(3, pool.locator.node_count());
    }

    #[tokio::test]
    async fn test_text_protocol_rejects_auth_config() {
        let mut config = ClientConfig::new(vec![Endpoint::new("localhost", 11211)]);
        config.protocol = Protocol::Text;
        config.authentication = Some(crate::config::AuthConfig {
            zone: None,
            user_name: "bob".into(),
            password: "hunter2".into(),
        });
        let result: Result<ServerPool<MockConnection>, Error> = ServerPool::new(&config);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_group_by_node_drops_unrouted_keys() {
        let config = ClientConfig::new(vec![Endpoint::new("localhost", 11211)]);
        let pool: ServerPool<MockConnection> = ServerPool::new(&config).unwrap();
        let groups = pool.group_by_node(&[b"k1".to_vec(), b"k2".to_vec()]);
        let total: usize = groups.values().map(|v| v.len()).sum();
        assert_eq!(2, total);
    }
}
