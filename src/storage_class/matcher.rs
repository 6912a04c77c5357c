//! Storage class matcher
//!
//! Computes the candidate pools for a volume request and picks one.
//!
//! ```text
//! universe   = pools of online backends
//! base       = pools whose offers satisfy every attribute request
//! if pools   : base = base ∩ pools
//! candidates = (base ∪ additional_pools) − exclude_pools
//!            then filtered by protocol and access mode
//! ```

use super::StorageClassConfig;
use crate::error::{Error, Result};
use crate::storage::{AccessMode, Backend, Pool, Protocol, VolumeConfig};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placement requirements taken from a volume request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchRequest {
    pub protocol: Protocol,
    pub access_mode: AccessMode,
}

impl From<&VolumeConfig> for MatchRequest {
    fn from(config: &VolumeConfig) -> Self {
        Self {
            protocol: config.protocol,
            access_mode: config.access_mode,
        }
    }
}

impl Default for MatchRequest {
    fn default() -> Self {
        Self {
            protocol: Protocol::Any,
            access_mode: AccessMode::Any,
        }
    }
}

/// A pool eligible for placement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolCandidate {
    pub backend_uuid: Uuid,
    pub backend_name: String,
    pub pool: String,
    pub protocol: Protocol,
}

fn attributes_match(class: &StorageClassConfig, pool: &Pool) -> bool {
    class
        .attributes
        .iter()
        .all(|(name, request)| request.matches(name, &pool.attributes, &pool.labels))
}

fn protocol_compatible(backend: &Backend, request: &MatchRequest) -> bool {
    backend.protocol.serves(request.protocol) && backend.protocol.supports(request.access_mode)
}

/// Every pool the class admits for this request, ordered by backend then pool
pub fn candidates(
    class: &StorageClassConfig,
    request: &MatchRequest,
    backends: &[Backend],
) -> Vec<PoolCandidate> {
    let mut matched = Vec::new();

    for backend in backends.iter().filter(|b| b.state.is_online()) {
        if !protocol_compatible(backend, request) {
            continue;
        }

        for pool in backend.pools.values() {
            let listed = class.pools.is_empty() || class.pools.contains(&backend.name, &pool.name);
            let base = listed && attributes_match(class, pool);
            let additional = class.additional_pools.contains(&backend.name, &pool.name);
            let excluded = class.exclude_pools.contains(&backend.name, &pool.name);

            if (base || additional) && !excluded {
                matched.push(PoolCandidate {
                    backend_uuid: backend.uuid,
                    backend_name: backend.name.clone(),
                    pool: pool.name.clone(),
                    protocol: backend.protocol,
                });
            }
        }
    }

    matched.sort_by(|a, b| {
        (a.backend_name.as_str(), a.pool.as_str()).cmp(&(b.backend_name.as_str(), b.pool.as_str()))
    });
    matched
}

/// Pick one candidate uniformly at random
pub fn select<'a, R: Rng + ?Sized>(
    candidates: &'a [PoolCandidate],
    rng: &mut R,
) -> Option<&'a PoolCandidate> {
    candidates.choose(rng)
}

/// Compute candidates and pick one, or explain why there is none
pub fn pick<R: Rng + ?Sized>(
    class: &StorageClassConfig,
    request: &MatchRequest,
    backends: &[Backend],
    rng: &mut R,
) -> Result<PoolCandidate> {
    let matched = candidates(class, request, backends);
    select(&matched, rng)
        .cloned()
        .ok_or_else(|| Error::NoSuitableBackend {
            storage_class: class.name.clone(),
            reason: describe_miss(backends, request),
        })
}

fn describe_miss(backends: &[Backend], request: &MatchRequest) -> String {
    let online = backends.iter().filter(|b| b.state.is_online()).count();
    if online == 0 {
        return "no online backends".to_string();
    }
    format!(
        "no pool on {} online backend(s) satisfies the class for protocol {} and access mode {}",
        online, request.protocol, request.access_mode
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeRequest, AttributeValue, PoolSet, MEDIA, SELECTOR};
    use crate::storage::{BackendConfig, BackendState, DiscoveredPool};
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::{BTreeMap, BTreeSet};

    fn backend(name: &str, protocol: Protocol, pools: Vec<DiscoveredPool>) -> Backend {
        let mut backend = Backend {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
            driver_kind: "memory".to_string(),
            protocol,
            state: BackendState::Online,
            state_reason: None,
            pools: BTreeMap::new(),
            config: BackendConfig::new(name, "memory"),
            registered_at: Utc::now(),
        };
        backend.set_pools(pools);
        backend
    }

    fn ssd(name: &str) -> DiscoveredPool {
        DiscoveredPool::new(name).with_attribute(MEDIA, AttributeValue::string("ssd"))
    }

    fn hdd(name: &str) -> DiscoveredPool {
        DiscoveredPool::new(name).with_attribute(MEDIA, AttributeValue::string("hdd"))
    }

    fn names(candidates: &[PoolCandidate]) -> Vec<String> {
        candidates
            .iter()
            .map(|c| format!("{}:{}", c.backend_name, c.pool))
            .collect()
    }

    fn fleet() -> Vec<Backend> {
        vec![
            backend("nas-1", Protocol::File, vec![ssd("aggr1"), hdd("aggr2")]),
            backend("san-1", Protocol::Block, vec![ssd("pool1"), hdd("pool2")]),
        ]
    }

    #[test]
    fn test_attribute_matching() {
        let class = StorageClassConfig::new("fast")
            .with_attribute(MEDIA, AttributeRequest::String("ssd".into()));
        let matched = candidates(&class, &MatchRequest::default(), &fleet());
        assert_eq!(names(&matched), vec!["nas-1:aggr1", "san-1:pool1"]);
    }

    #[test]
    fn test_storage_pools_restrict() {
        let class = StorageClassConfig::new("fast")
            .with_attribute(MEDIA, AttributeRequest::String("ssd".into()))
            .with_pools(PoolSet::parse("san-1:pool1,pool2").unwrap());
        let matched = candidates(&class, &MatchRequest::default(), &fleet());
        assert_eq!(names(&matched), vec!["san-1:pool1"]);
    }

    #[test]
    fn test_additional_pools_bypass_attributes() {
        let class = StorageClassConfig::new("fast")
            .with_attribute(MEDIA, AttributeRequest::String("ssd".into()))
            .with_pools(PoolSet::parse("san-1:pool1").unwrap())
            .with_additional_pools(PoolSet::parse("nas-1:aggr2").unwrap());
        let matched = candidates(&class, &MatchRequest::default(), &fleet());
        assert_eq!(names(&matched), vec!["nas-1:aggr2", "san-1:pool1"]);
    }

    #[test]
    fn test_exclude_wins() {
        let class = StorageClassConfig::new("any")
            .with_additional_pools(PoolSet::parse("nas-1:aggr2").unwrap())
            .with_exclude_pools(PoolSet::parse("nas-1:aggr1,aggr2;san-1:pool2").unwrap());
        let matched = candidates(&class, &MatchRequest::default(), &fleet());
        assert_eq!(names(&matched), vec!["san-1:pool1"]);
    }

    #[test]
    fn test_protocol_and_access_mode_filter() {
        let class = StorageClassConfig::new("any");

        let file_only = MatchRequest {
            protocol: Protocol::File,
            access_mode: AccessMode::ReadWriteOnce,
        };
        assert_eq!(
            names(&candidates(&class, &file_only, &fleet())),
            vec!["nas-1:aggr1", "nas-1:aggr2"]
        );

        let shared = MatchRequest {
            protocol: Protocol::Any,
            access_mode: AccessMode::ReadWriteMany,
        };
        assert!(candidates(&class, &shared, &fleet())
            .iter()
            .all(|c| c.backend_name == "nas-1"));

        // Additional pools are still subject to the protocol filter
        let class = StorageClassConfig::new("rwx")
            .with_pools(PoolSet::parse("nas-1:aggr1").unwrap())
            .with_additional_pools(PoolSet::parse("san-1:pool1").unwrap());
        assert_eq!(
            names(&candidates(&class, &shared, &fleet())),
            vec!["nas-1:aggr1"]
        );
    }

    #[test]
    fn test_only_online_backends() {
        let mut backends = fleet();
        backends[1].state = BackendState::Failed;
        let matched =
            candidates(&StorageClassConfig::new("any"), &MatchRequest::default(), &backends);
        assert!(matched.iter().all(|c| c.backend_name == "nas-1"));
    }

    #[test]
    fn test_selector_fails_closed() {
        let backends = vec![backend(
            "nas-1",
            Protocol::File,
            vec![
                ssd("aggr1").with_label("tier", "gold"),
                ssd("aggr2").with_label("tier", "gold").with_label("cost", "low"),
            ],
        )];
        let class = StorageClassConfig::new("gold").with_attribute(
            SELECTOR,
            AttributeRequest::parse(SELECTOR, "tier=gold; cost=low").unwrap(),
        );
        let matched = candidates(&class, &MatchRequest::default(), &backends);
        assert_eq!(names(&matched), vec!["nas-1:aggr2"]);
    }

    #[test]
    fn test_pick_is_seed_deterministic() {
        let class = StorageClassConfig::new("any");
        let backends = fleet();

        let request = MatchRequest::default();
        let first = pick(&class, &request, &backends, &mut StdRng::seed_from_u64(7)).unwrap();
        let second = pick(&class, &request, &backends, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_pick_covers_all_candidates() {
        let class = StorageClassConfig::new("any");
        let backends = fleet();
        let mut rng = StdRng::seed_from_u64(42);

        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            let c = pick(&class, &MatchRequest::default(), &backends, &mut rng).unwrap();
            seen.insert(format!("{}:{}", c.backend_name, c.pool));
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_no_candidates() {
        let class = StorageClassConfig::new("slow")
            .with_attribute(MEDIA, AttributeRequest::String("tape".into()));
        let mut rng = StdRng::seed_from_u64(1);
        let result = pick(&class, &MatchRequest::default(), &fleet(), &mut rng);
        assert_matches!(
            result,
            Err(Error::NoSuitableBackend { storage_class, .. }) if storage_class == "slow"
        );

        let result = pick(&class, &MatchRequest::default(), &[], &mut rng);
        assert_matches!(
            result,
            Err(Error::NoSuitableBackend { reason, .. }) if reason == "no online backends"
        );
    }

    const MEDIA_KINDS: [&str; 3] = ["ssd", "hdd", "nvme"];

    /// What a generated backend looks like, kept apart from the `Backend`
    struct Shape {
        name: String,
        protocol: Protocol,
        online: bool,
        pools: Vec<(String, Option<&'static str>)>,
    }

    fn random_pool_set(rng: &mut StdRng, shapes: &[Shape], odds: f64) -> PoolSet {
        let mut set = PoolSet::new();
        for shape in shapes {
            for (pool, _) in &shape.pools {
                if rng.gen_bool(odds) {
                    set.insert(shape.name.clone(), pool.clone());
                }
            }
        }
        if rng.gen_bool(0.2) {
            set.insert("ghost", "pool-0");
        }
        set
    }

    #[test]
    fn test_candidates_match_set_formula_on_random_fleets() {
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for round in 0..500 {
            let shapes: Vec<Shape> = (0..rng.gen_range(0..6))
                .map(|b| Shape {
                    name: format!("backend-{}", b),
                    protocol: if rng.gen_bool(0.5) { Protocol::File } else { Protocol::Block },
                    online: rng.gen_bool(0.8),
                    pools: (0..rng.gen_range(0..4))
                        .map(|p| {
                            let media = if rng.gen_bool(0.8) {
                                Some(MEDIA_KINDS[rng.gen_range(0..MEDIA_KINDS.len())])
                            } else {
                                None
                            };
                            (format!("pool-{}", p), media)
                        })
                        .collect(),
                })
                .collect();

            let backends: Vec<Backend> = shapes
                .iter()
                .map(|shape| {
                    let pools = shape
                        .pools
                        .iter()
                        .map(|(name, media)| match media {
                            Some(m) => DiscoveredPool::new(name)
                                .with_attribute(MEDIA, AttributeValue::string(*m)),
                            None => DiscoveredPool::new(name),
                        })
                        .collect();
                    let mut b = backend(&shape.name, shape.protocol, pools);
                    if !shape.online {
                        b.state = BackendState::Failed;
                    }
                    b
                })
                .collect();

            let wanted_media = if rng.gen_bool(0.5) {
                Some(MEDIA_KINDS[rng.gen_range(0..MEDIA_KINDS.len())])
            } else {
                None
            };
            let mut class = StorageClassConfig::new("random");
            if let Some(m) = wanted_media {
                class = class.with_attribute(MEDIA, AttributeRequest::String(m.to_string()));
            }
            if rng.gen_bool(0.5) {
                class = class.with_pools(random_pool_set(&mut rng, &shapes, 0.5));
            }
            class = class
                .with_additional_pools(random_pool_set(&mut rng, &shapes, 0.2))
                .with_exclude_pools(random_pool_set(&mut rng, &shapes, 0.2));

            let request = MatchRequest {
                protocol: [Protocol::Block, Protocol::File, Protocol::Any][rng.gen_range(0..3)],
                access_mode: [
                    AccessMode::ReadWriteOnce,
                    AccessMode::ReadOnlyMany,
                    AccessMode::ReadWriteMany,
                ][rng.gen_range(0..3)],
            };

            // ((attributes ∩ pools?) ∪ additional) − exclude, over online and compatible backends
            let mut expected = BTreeSet::new();
            for shape in shapes.iter().filter(|s| s.online) {
                let serves =
                    request.protocol == Protocol::Any || request.protocol == shape.protocol;
                let supports = request.access_mode != AccessMode::ReadWriteMany
                    || shape.protocol == Protocol::File;
                if !serves || !supports {
                    continue;
                }
                for (pool, media) in &shape.pools {
                    let attr = wanted_media.map_or(true, |w| *media == Some(w));
                    let listed = class.pools.is_empty() || class.pools.contains(&shape.name, pool);
                    let additional = class.additional_pools.contains(&shape.name, pool);
                    let excluded = class.exclude_pools.contains(&shape.name, pool);
                    if ((attr && listed) || additional) && !excluded {
                        expected.insert(format!("{}:{}", shape.name, pool));
                    }
                }
            }

            let actual: BTreeSet<String> =
                names(&candidates(&class, &request, &backends)).into_iter().collect();
            assert_eq!(actual, expected, "round {}", round);
        }
    }
}
