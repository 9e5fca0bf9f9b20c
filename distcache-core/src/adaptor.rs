//! A thin byte-oriented view over [`crate::client::Client`] (`spec.md` §4.8):
//! `set`/`get`/`remove`/`refresh`, with expiration metadata recorded under a
//! derived key so `refresh` can re-apply the original window. Core
//! operations are unaffected by this layer; it exists only for callers that
//! want the narrower distributed-cache shape instead of the full façade.
//!
//! Values pass through as raw bytes via [`Client::get_raw`]/[`Client::store_raw`],
//! bypassing whichever transcoder the client was built with -- this layer
//! has no notion of a value type.

use std::time::Duration;

use crate::{client::Client, error::Error, key_transformer::KeyTransformer, protocol::StoreMode, socket::Connection, transcoder::Transcoder};

const OPTIONS_KEY_SUFFIX: &str = "-DistributedCacheEntryOptions";

fn options_key(key: &str) -> String {
    format!("{}{}", key, OPTIONS_KEY_SUFFIX)
}

pub struct DistributedCacheAdaptor<'a, C: Connection, Tc: Transcoder, Kt: KeyTransformer> {
    client: &'a Client<C, Tc, Kt>,
}

impl<'a, C: Connection, Tc: Transcoder, Kt: KeyTransformer> DistributedCacheAdaptor<'a, C, Tc, Kt> {
    pub fn new(client: &'a Client<C, Tc, Kt>) -> Self {
        Self { client }
    }

    /// Store `value` under `key`. When `expires_in` is set, the window is
    /// also recorded under the derived options key so a later `refresh` can
    /// re-apply it.
    pub async fn set(&self, key: &str, value: Vec<u8>, expires_in: Option<Duration>) -> Result<(), Error> {
        self.client.store_raw(StoreMode::Set, key, value, 0, expires_in).await?;
        if let Some(expires_in) = expires_in {
            let options_value = expires_in.as_secs().to_string().into_bytes();
            self.client
                .store_raw(StoreMode::Set, &options_key(key), options_value, 0, Some(expires_in))
                .await?;
        }
        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.client.get_raw(key).await?.map(|result| result.value))
    }

    pub async fn remove(&self, key: &str) -> Result<bool, Error> {
        let removed = self.client.remove(key).await?;
        self.client.remove(&options_key(key)).await?;
        Ok(removed)
    }

    /// Re-store the value under its recorded expiration window. The window
    /// recorded by `set` is a *duration*, not an absolute timestamp -- a
    /// correct re-application recomputes `now + duration` rather than
    /// treating the recorded seconds as a relative offset a second time
    /// (`spec.md` §9: the source this was distilled from instead reused the
    /// recorded absolute Unix timestamp as a fresh relative expiration,
    /// which drifts further every refresh).
    pub async fn refresh(&self, key: &str) -> Result<bool, Error> {
        let options_raw = match self.client.get_raw(&options_key(key)).await? {
            Some(result) => result.value,
            None => return Ok(false),
        };
        let secs: u64 = String::from_utf8(options_raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::InvalidArgument("malformed DistributedCacheEntryOptions value".into()))?;
        let expires_in = Duration::from_secs(secs);

        let value = match self.client.get_raw(key).await? {
            Some(result) => result.value,
            None => return Ok(false),
        };

        self.client.store_raw(StoreMode::Set, key, value, 0, Some(expires_in)).await?;
        let options_value = secs.to_string().into_bytes();
        self.client
            .store_raw(StoreMode::Set, &options_key(key), options_value, 0, Some(expires_in))
            .await?;
        Ok(true)
    }
}
