//! Tokio transport and a blocking façade for `distcache-core`.
//!
//! [`TokioConnection`] is the only piece `distcache-core` leaves to the
//! embedding runtime (`spec.md` §1, §4.2): a plain `TcpStream`, since a
//! [`distcache_core::socket::PooledSocket`] is never shared across
//! concurrent callers and needs no internal locking of its own, unlike the
//! teacher crate's `Arc<Mutex<TcpStream>>` connection (whose pool cloned
//! connections directly rather than pooling sockets one level up).
//!
//! [`BlockingClient`] is the synchronous twin `spec.md` §5 calls for: it
//! owns a dedicated Tokio runtime and blocks on the same async
//! [`distcache_core::client::Client`] pipeline rather than duplicating it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;

use distcache_core::{
    client::{CasResult, Client, MutateResult, StoreResult},
    config::ClientConfig,
    endpoint::Endpoint,
    error::Error,
    key_transformer::KeyTransformer,
    protocol::StoreMode,
    socket::Connection,
    transcoder::Transcoder,
};

pub use distcache_core::{adaptor, auth, client, config, endpoint, error, failure_policy, item, key_transformer, locator, protocol, transcoder};

/// A `distcache-core` [`Connection`] backed by a Tokio `TcpStream`.
#[derive(Debug)]
pub struct TokioConnection {
    stream: TcpStream,
}

#[async_trait]
impl Connection for TokioConnection {
    async fn connect(endpoint: &Endpoint) -> Result<Self, Error> {
        let stream = TcpStream::connect(endpoint.authority()).await?;
        Ok(Self { stream })
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        Ok(self.stream.read(buf).await?)
    }

    async fn write_all(&mut self, buf: &[u8]) -> Result<(), Error> {
        Ok(self.stream.write_all(buf).await?)
    }
}

/// A `distcache-core` client over Tokio, re-exposed as a blocking API: one
/// dedicated runtime per client, `block_on` around every call.
pub struct BlockingClient<Tc: Transcoder, Kt: KeyTransformer> {
    runtime: Runtime,
    client: Client<TokioConnection, Tc, Kt>,
}

impl<Tc: Transcoder, Kt: KeyTransformer> BlockingClient<Tc, Kt> {
    pub fn new(config: ClientConfig, transcoder: Tc, key_transformer: Kt) -> Result<Self, Error> {
        let runtime = Runtime::new().map_err(Error::Io)?;
        let client = runtime.block_on(Client::new(config, transcoder, key_transformer))?;
        Ok(Self { runtime, client })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        self.runtime.block_on(self.client.get(key))
    }

    pub fn try_get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        self.runtime.block_on(self.client.try_get(key))
    }

    pub fn get_with_cas<T: DeserializeOwned>(&self, key: &str) -> Result<Option<CasResult<T>>, Error> {
        self.runtime.block_on(self.client.get_with_cas(key))
    }

    pub fn get_multi<T: DeserializeOwned>(&self, keys: &[&str]) -> Result<HashMap<String, T>, Error> {
        self.runtime.block_on(self.client.get_multi(keys))
    }

    pub fn get_multi_with_cas<T: DeserializeOwned>(
        &self,
        keys: &[&str],
    ) -> Result<HashMap<String, CasResult<T>>, Error> {
        self.runtime.block_on(self.client.get_multi_with_cas(keys))
    }

    pub fn store<V: Serialize + ?Sized>(
        &self,
        mode: StoreMode,
        key: &str,
        value: &V,
        expiration: Option<Duration>,
    ) -> Result<StoreResult, Error> {
        self.runtime.block_on(self.client.store(mode, key, value, expiration))
    }

    pub fn cas<V: Serialize + ?Sized>(
        &self,
        mode: StoreMode,
        key: &str,
        value: &V,
        cas: u64,
        expiration: Option<Duration>,
    ) -> Result<StoreResult, Error> {
        self.runtime.block_on(self.client.cas(mode, key, value, cas, expiration))
    }

    pub fn add<V: Serialize + ?Sized>(&self, key: &str, value: &V, expiration: Option<Duration>) -> Result<StoreResult, Error> {
        self.runtime.block_on(self.client.add(key, value, expiration))
    }

    pub fn replace<V: Serialize + ?Sized>(&self, key: &str, value: &V, expiration: Option<Duration>) -> Result<StoreResult, Error> {
        self.runtime.block_on(self.client.replace(key, value, expiration))
    }

    pub fn increment(&self, key: &str, default: u64, delta: u64, expiration: Option<Duration>, cas: u64) -> Result<MutateResult, Error> {
        self.runtime.block_on(self.client.increment(key, default, delta, expiration, cas))
    }

    pub fn decrement(&self, key: &str, default: u64, delta: u64, expiration: Option<Duration>, cas: u64) -> Result<MutateResult, Error> {
        self.runtime.block_on(self.client.decrement(key, default, delta, expiration, cas))
    }

    pub fn append(&self, key: &str, data: &[u8], cas: u64) -> Result<StoreResult, Error> {
        self.runtime.block_on(self.client.append(key, data, cas))
    }

    pub fn prepend(&self, key: &str, data: &[u8], cas: u64) -> Result<StoreResult, Error> {
        self.runtime.block_on(self.client.prepend(key, data, cas))
    }

    pub fn remove(&self, key: &str) -> Result<bool, Error> {
        self.runtime.block_on(self.client.remove(key))
    }

    pub fn exists(&self, key: &str) -> Result<bool, Error> {
        self.runtime.block_on(self.client.exists(key))
    }

    pub fn flush_all(&self) -> Result<(), Error> {
        self.runtime.block_on(self.client.flush_all())
    }

    pub fn stats(&self, class: Option<&str>) -> Result<HashMap<String, HashMap<String, String>>, Error> {
        self.runtime.block_on(self.client.stats(class))
    }

    pub fn dispose(&mut self) {
        self.client.dispose()
    }
}

#[cfg(test)]
#[cfg(feature = "bincode")]
mod tests {
    use super::*;
    use distcache_core::key_transformer::IdentityKeyTransformer;
    use rand::Rng;
    use std::io::{BufRead, BufReader};
    use std::process::{Child, Command, Stdio};

    /// Spawns one or more `memcached` containers, in the spirit of the
    /// teacher crate's own Docker-backed integration tests.
    struct MemcachedTester {
        names: Vec<String>,
        procs: Vec<Child>,
    }

    impl MemcachedTester {
        fn new(port: u16) -> Self {
            Self::new_cluster(vec![port])
        }

        fn new_cluster(ports: Vec<u16>) -> Self {
            let mut names = Vec::new();
            let mut procs = Vec::new();
            for (i, port) in ports.into_iter().enumerate() {
                let name = format!("distcache_tokio_test_{}_{}", std::process::id(), i);
                let mut proc = Command::new("docker")
                    .args([
                        "run",
                        "--rm",
                        "-t",
                        "--name",
                        &name,
                        "-p",
                        &format!("{}:11211", port),
                        "memcached",
                        "memcached",
                        "-vv",
                    ])
                    .stdout(Stdio::piped())
                    .spawn()
                    .unwrap();

                let stdout = proc.stdout.as_mut().unwrap();
                let mut reader = BufReader::new(stdout);
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();

                names.push(name);
                procs.push(proc);
            }
            Self { names, procs }
        }
    }

    impl Drop for MemcachedTester {
        fn drop(&mut self) {
            for name in &self.names {
                let _ = Command::new("docker").args(["stop", name]).output();
            }
            for proc in &mut self.procs {
                let _ = proc.wait();
            }
        }
    }

    fn random_port(range: std::ops::Range<u16>) -> u16 {
        rand::thread_rng().gen_range(range)
    }

    #[test]
    fn test_single_node_round_trip() {
        let port = random_port(20000..30000);
        let _tester = MemcachedTester::new(port);
        let config = ClientConfig::new(vec![Endpoint::new("127.0.0.1", port)]);
        let client: BlockingClient<distcache_core::transcoder::BincodeTranscoder, IdentityKeyTransformer> =
            BlockingClient::new(config, distcache_core::transcoder::BincodeTranscoder, IdentityKeyTransformer).unwrap();

        assert_eq!(None, client.get::<String>("greeting").unwrap());
        client.store(StoreMode::Set, "greeting", &"hello".to_string(), None).unwrap();
        assert_eq!(Some("hello".to_string()), client.get::<String>("greeting").unwrap());
        assert!(client.remove("greeting").unwrap());
        assert_eq!(None, client.get::<String>("greeting").unwrap());
    }

    #[test]
    fn test_cas_mismatch_preserves_server_cas() {
        let port = random_port(30000..40000);
        let _tester = MemcachedTester::new(port);
        let config = ClientConfig::new(vec![Endpoint::new("127.0.0.1", port)]);
        let client: BlockingClient<distcache_core::transcoder::BincodeTranscoder, IdentityKeyTransformer> =
            BlockingClient::new(config, distcache_core::transcoder::BincodeTranscoder, IdentityKeyTransformer).unwrap();

        let stored = client.add("counter", &1_u64, None).unwrap();
        assert!(stored.success);
        let result = client.cas(StoreMode::Set, "counter", &2_u64, stored.cas + 1, None).unwrap();
        assert!(!result.success);
        assert_eq!(distcache_core::protocol::Status::KeyExists, result.status);
    }

    #[test]
    fn test_multi_node_multi_get() {
        let ports: Vec<u16> = (0..3).map(|i| 40000 + i + random_port(0..5000)).collect();
        let _tester = MemcachedTester::new_cluster(ports.clone());
        let config = ClientConfig::new(ports.into_iter().map(|p| Endpoint::new("127.0.0.1", p)).collect());
        let client: BlockingClient<distcache_core::transcoder::BincodeTranscoder, IdentityKeyTransformer> =
            BlockingClient::new(config, distcache_core::transcoder::BincodeTranscoder, IdentityKeyTransformer).unwrap();

        for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
            client.store(StoreMode::Set, key, &value.to_string(), None).unwrap();
        }
        let result: HashMap<String, String> = client.get_multi(&["a", "b", "c", "missing"]).unwrap();
        assert_eq!(3, result.len());
        assert_eq!(Some(&"1".to_string()), result.get("a"));
    }
}
