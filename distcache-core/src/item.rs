use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Error;

/// An opaque byte payload plus the transcoder-defined type flags that let a
/// matching transcoder reinterpret it later. Owned by a get result or a
/// pending store; the core never looks inside `data`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CacheItem {
    pub flags: u32,
    pub data: Vec<u8>,
}

impl CacheItem {
    pub fn new(flags: u32, data: Vec<u8>) -> Self {
        Self { flags, data }
    }
}

/// Largest relative expiration memcached will accept before switching to
/// interpreting the value as an absolute Unix timestamp (30 days).
pub const MAX_RELATIVE_EXPIRATION: u32 = 60 * 60 * 24 * 30;

/// A sentinel meaning "far enough in the future it should never expire",
/// mirrored from `DateTime.MaxValue` / `TimeSpan.MaxValue` in the source
/// this protocol was distilled from.
const NEVER_SENTINEL_SECS: u64 = u32::MAX as u64;

/// Resolve the four ways an expiration can be specified into the 32-bit
/// seconds value memcached expects on the wire. At most one of `valid_for`
/// and `expires_at` may be supplied; `absolute` and `relative_to_now` are an
/// independent pair used by the distributed-cache adaptor (`spec.md` §4.8)
/// and never combined with the first two in practice, so they take
/// precedence when present.
///
/// - both `valid_for` and `expires_at` set => `InvalidArgument`.
/// - none set => `0` (never expire).
/// - `absolute`/`expires_at` before the Unix epoch => `InvalidArgument`.
/// - `absolute`/`expires_at` at the "never" sentinel => `0`.
/// - `valid_for` of `0` or the sentinel => `0`.
/// - otherwise, the resolved instant is converted to Unix seconds.
pub fn compute_expiration(
    valid_for: Option<Duration>,
    expires_at: Option<SystemTime>,
    absolute: Option<SystemTime>,
    relative_to_now: Option<Duration>,
) -> Result<u32, Error> {
    if valid_for.is_some() && expires_at.is_some() {
        return Err(Error::InvalidArgument(
            "valid_for and expires_at cannot both be set".into(),
        ));
    }

    if let Some(at) = absolute {
        return unix_seconds_or_never(at);
    }

    if let Some(delta) = relative_to_now {
        return unix_seconds_or_never(SystemTime::now() + delta);
    }

    if let Some(duration) = valid_for {
        let secs = duration.as_secs();
        if secs == 0 || secs >= NEVER_SENTINEL_SECS {
            return Ok(0);
        }
        return unix_seconds_or_never(SystemTime::now() + duration);
    }

    if let Some(at) = expires_at {
        return unix_seconds_or_never(at);
    }

    Ok(0)
}

fn unix_seconds_or_never(at: SystemTime) -> Result<u32, Error> {
    match at.duration_since(UNIX_EPOCH) {
        Ok(d) if d.as_secs() >= NEVER_SENTINEL_SECS => Ok(0),
        Ok(d) => Ok(d.as_secs() as u32),
        Err(_) => Err(Error::InvalidArgument(
            "expiration instant predates the Unix epoch".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_for_zero_never_expires() {
        assert_eq!(0, compute_expiration(Some(Duration::ZERO), None, None, None).unwrap());
    }

    #[test]
    fn test_valid_for_max_never_expires() {
        let max = Duration::from_secs(NEVER_SENTINEL_SECS);
        assert_eq!(0, compute_expiration(Some(max), None, None, None).unwrap());
    }

    #[test]
    fn test_all_none_never_expires() {
        assert_eq!(0, compute_expiration(None, None, None, None).unwrap());
    }

    #[test]
    fn test_absolute_matches_unix_seconds() {
        let at = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        assert_eq!(1_700_000_000, compute_expiration(None, None, Some(at), None).unwrap());
    }

    #[test]
    fn test_conflicting_args_rejected() {
        let result = compute_expiration(
            Some(Duration::from_secs(60)),
            Some(SystemTime::now()),
            None,
            None,
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_expires_at_before_epoch_rejected() {
        let before = UNIX_EPOCH - Duration::from_secs(1);
        let result = compute_expiration(None, Some(before), None, None);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_relative_to_now_is_approximately_now_plus_delta() {
        let before = SystemTime::now();
        let got = compute_expiration(None, None, None, Some(Duration::from_secs(30))).unwrap();
        let expect_low = before.duration_since(UNIX_EPOCH).unwrap().as_secs() as u32 + 29;
        assert!(got >= expect_low);
    }
}
