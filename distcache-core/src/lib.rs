//! Runtime-agnostic core for a distributed memcached client: consistent
//! hashing over live nodes, per-node socket pools with failure detection,
//! and the binary and text wire protocols. A concrete [`socket::Connection`]
//! (e.g. `distcache-tokio::TokioConnection`) is the only piece left to the
//! embedding crate; everything above the socket is written against that
//! trait.
//!
//! If `bincode` serialization of typed values is undesired, the `bincode`
//! feature (on by default) can be disabled; [`transcoder::RawTranscoder`]
//! and the [`adaptor`] module's byte-oriented helpers remain usable either
//! way.

pub mod adaptor;
pub mod auth;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod failure_policy;
pub mod item;
pub mod key_transformer;
pub mod locator;
pub(crate) mod node;
pub(crate) mod pool;
pub mod protocol;
pub(crate) mod server_pool;
pub mod socket;
pub mod transcoder;
