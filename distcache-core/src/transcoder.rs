#[cfg(feature = "bincode")]
use bincode::{DefaultOptions, Options};
use serde::{de::DeserializeOwned, Serialize};

use crate::{error::Error, item::CacheItem};

/// Object <-> byte-frame serialization is an external collaborator per
/// `spec.md` §1; the core only ever calls `serialize`/`deserialize`. Two
/// stock implementations are provided below so the crate is usable out of
/// the box, but any type implementing this trait can be substituted.
pub trait Transcoder: Send + Sync + 'static {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<CacheItem, Error>;
    fn deserialize<T: DeserializeOwned>(&self, item: &CacheItem) -> Result<T, Error>;
}

/// Flags values the stock transcoders tag their frames with, so a reader
/// using a different transcoder fails loudly instead of misinterpreting
/// bytes that happen to parse.
pub const RAW_FLAGS: u32 = 0;
#[cfg(feature = "bincode")]
pub const BINCODE_FLAGS: u32 = 1;

/// Passes `Vec<u8>` values through unchanged; serializing any other type is
/// a caller error, not a transport failure, so `T` is bounded to `AsRef<[u8]>`
/// at the call site rather than attempted generically here.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawTranscoder;

impl RawTranscoder {
    pub fn wrap(&self, data: Vec<u8>) -> CacheItem {
        CacheItem::new(RAW_FLAGS, data)
    }

    pub fn unwrap(&self, item: &CacheItem) -> Result<Vec<u8>, Error> {
        if item.flags != RAW_FLAGS {
            return Err(Error::InvalidArgument(format!(
                "item has flags {} but RawTranscoder expects {}",
                item.flags, RAW_FLAGS
            )));
        }
        Ok(item.data.clone())
    }
}

/// The default [`Transcoder`]: bincode with a fixed-width, big-endian
/// configuration (the same `DefaultOptions` the teacher crate already used
/// for packet extras, kept consistent for values too).
#[cfg(feature = "bincode")]
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeTranscoder;

#[cfg(feature = "bincode")]
impl Transcoder for BincodeTranscoder {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<CacheItem, Error> {
        let config = DefaultOptions::new().with_big_endian().with_fixint_encoding();
        let data = config.serialize(value)?;
        Ok(CacheItem::new(BINCODE_FLAGS, data))
    }

    fn deserialize<T: DeserializeOwned>(&self, item: &CacheItem) -> Result<T, Error> {
        if item.flags != BINCODE_FLAGS {
            return Err(Error::InvalidArgument(format!(
                "item has flags {} but BincodeTranscoder expects {}",
                item.flags, BINCODE_FLAGS
            )));
        }
        let config = DefaultOptions::new().with_big_endian().with_fixint_encoding();
        Ok(config.deserialize(&item.data)?)
    }
}

#[cfg(all(test, feature = "bincode"))]
mod tests {
    use super::*;

    #[test]
    fn test_bincode_round_trip() {
        let t = BincodeTranscoder;
        let item = t.serialize("hello").unwrap();
        assert_eq!(BINCODE_FLAGS, item.flags);
        let value: String = t.deserialize(&item).unwrap();
        assert_eq!("hello", value);
    }

    #[test]
    fn test_bincode_rejects_foreign_flags() {
        let t = BincodeTranscoder;
        let item = CacheItem::new(RAW_FLAGS, b"raw bytes".to_vec());
        let result: Result<String, Error> = t.deserialize(&item);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
