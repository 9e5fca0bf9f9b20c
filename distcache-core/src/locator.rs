//! Maps a wire key to a node index using a Ketama-style consistent-hash
//! ring (`spec.md` §4.5). The locator only ever deals in node indices: it
//! has no notion of sockets or connections, so [`crate::server_pool::ServerPool`]
//! can be generic over any `Connection` without the locator caring.

use std::convert::TryInto;

use crate::endpoint::Endpoint;

const POINTS_PER_NODE: usize = 160;
const HASHES_PER_NODE: usize = POINTS_PER_NODE / 4;

/// `locate` takes a liveness predicate rather than owning node state itself,
/// since liveness lives in each node's failure policy.
pub trait NodeLocator: Send + Sync + 'static {
    fn locate(&self, key: &[u8], is_alive: &dyn Fn(usize) -> bool) -> Option<usize>;
    fn node_count(&self) -> usize;
}

/// A consistent-hash ring with 160 virtual points per node. Each node
/// contributes 40 MD5 digests of `"<host>:<port>-<n>"`; each digest yields
/// four points by splitting it into four little-endian `u32`s.
pub struct KetamaLocator {
    ring: Vec<(u32, usize)>,
    node_count: usize,
}

impl KetamaLocator {
    pub fn new(endpoints: &[Endpoint]) -> Self {
        let mut ring = Vec::with_capacity(endpoints.len() * POINTS_PER_NODE);
        for (index, endpoint) in endpoints.iter().enumerate() {
            for n in 0..HASHES_PER_NODE {
                let digest = md5::compute(format!("{}-{}", endpoint.authority(), n));
                for chunk in digest.chunks(4) {
                    let position = u32::from_le_bytes(chunk.try_into().unwrap());
                    ring.push((position, index));
                }
            }
        }
        ring.sort_unstable_by_key(|(position, _)| *position);
        Self {
            ring,
            node_count: endpoints.len(),
        }
    }
}

impl NodeLocator for KetamaLocator {
    fn locate(&self, key: &[u8], is_alive: &dyn Fn(usize) -> bool) -> Option<usize> {
        if self.ring.is_empty() {
            return None;
        }
        let digest = md5::compute(key);
        let target = u32::from_le_bytes(digest[0..4].try_into().unwrap());
        let start = self.ring.partition_point(|(position, _)| *position < target);
        (0..self.ring.len())
            .map(|offset| self.ring[(start + offset) % self.ring.len()].1)
            .find(|index| is_alive(*index))
    }

    fn node_count(&self) -> usize {
        self.node_count
    }
}

/// The degenerate single-server case (`spec.md` §4.5): no ring needed, the
/// one configured node is either alive or there is nowhere to route to.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleNodeLocator;

impl NodeLocator for SingleNodeLocator {
    fn locate(&self, _key: &[u8], is_alive: &dyn Fn(usize) -> bool) -> Option<usize> {
        is_alive(0).then_some(0)
    }

    fn node_count(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoints(n: usize) -> Vec<Endpoint> {
        (0..n).map(|i| Endpoint::new("cache", 11211 + i as u16)).collect()
    }

    #[test]
    fn test_locate_is_deterministic() {
        let locator = KetamaLocator::new(&endpoints(3));
        let alive = |_: usize| true;
        let a = locator.locate(b"my-key", &alive);
        let b = locator.locate(b"my-key", &alive);
        assert_eq!(a, b);
        assert!(a.is_some());
    }

    #[test]
    fn test_removing_selected_node_reroutes() {
        let locator = KetamaLocator::new(&endpoints(3));
        let always_alive = |_: usize| true;
        let selected = locator.locate(b"my-key", &always_alive).unwrap();
        let without_selected = |index: usize| index != selected;
        let rerouted = locator.locate(b"my-key", &without_selected);
        assert!(rerouted.is_some());
        assert_ne!(selected, rerouted.unwrap());
    }

    #[test]
    fn test_all_dead_returns_none() {
        let locator = KetamaLocator::new(&endpoints(2));
        assert_eq!(None, locator.locate(b"my-key", &|_| false));
    }

    #[test]
    fn test_empty_ring_returns_none() {
        let locator = KetamaLocator::new(&[]);
        assert_eq!(None, locator.locate(b"my-key", &|_| true));
    }

    #[test]
    fn test_single_node_locator() {
        let locator = SingleNodeLocator;
        assert_eq!(Some(0), locator.locate(b"anything", &|_| true));
        assert_eq!(None, locator.locate(b"anything", &|_| false));
    }
}
