/// Memcached's own key-length ceiling; keys longer than this are rejected
/// by the server outright, so the stock hashing transformer uses it as the
/// threshold past which it substitutes a digest.
pub const MAX_KEY_LENGTH: usize = 250;

/// `transform(user_key) -> wire_key` is an external collaborator per
/// `spec.md` §1. The core calls it once per key, before handing the result
/// to the locator and the codec.
pub trait KeyTransformer: Send + Sync + 'static {
    fn transform(&self, key: &str) -> Vec<u8>;
}

/// Passes keys through unchanged. The default for callers who already keep
/// their keys within memcached's limits.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityKeyTransformer;

impl KeyTransformer for IdentityKeyTransformer {
    fn transform(&self, key: &str) -> Vec<u8> {
        key.as_bytes().to_vec()
    }
}

/// Passes short keys through unchanged; keys over [`MAX_KEY_LENGTH`] bytes
/// are replaced with a fixed-width hex MD5 digest so they always fit on the
/// wire. Two different overlong keys may collide on the digest, which is
/// the same trade-off every "hash the overlong key" transformer makes.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashingKeyTransformer;

impl KeyTransformer for HashingKeyTransformer {
    fn transform(&self, key: &str) -> Vec<u8> {
        let bytes = key.as_bytes();
        if bytes.len() <= MAX_KEY_LENGTH {
            return bytes.to_vec();
        }
        format!("{:x}", md5::compute(bytes)).into_bytes()
    }
}
