//! Time-bounded, singleflight topic -> route cache (spec §4.2).
//!
//! Keyed future-cache: the first caller for a topic installs a pending
//! watch and performs the name-server fetch; every other concurrent
//! caller for that topic attaches to the same watch instead of issuing
//! its own lookup. `TopicNotFound` is itself cached, with a shorter TTL,
//! so repeated lookups of a bad topic don't hammer the name-server.

use crate::error::{ProxyError, ProxyErrorKind};
use crate::model::TopicRoute;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Resolves a topic's route from the name-server. Implemented by the host
/// binary; `proxy-core` has no name-server client of its own.
#[async_trait::async_trait]
pub trait RouteResolver: Send + Sync {
    async fn resolve(&self, topic: &str) -> Result<TopicRoute, ProxyError>;
}

#[derive(Clone)]
enum CachedOutcome {
    Found(Arc<TopicRoute>),
    NotFound,
}

struct CacheEntry {
    outcome: CachedOutcome,
    expires_at: Instant,
}

/// Pending-state shared by all callers racing the same in-flight fetch,
/// the way web3-proxy's `ActiveRequestsMap` dedupes concurrent RPC calls
/// behind a `watch::Receiver<bool>`: readers await the receiver rather
/// than issuing their own upstream request.
enum Slot {
    Pending(watch::Receiver<bool>),
    Resolved(CacheEntry),
}

/// Singleflight topic route cache described in spec §4.2.
pub struct TopicRouteCache {
    resolver: Arc<dyn RouteResolver>,
    entries: DashMap<String, Slot>,
    ttl: Duration,
    negative_ttl: Duration,
}

impl TopicRouteCache {
    pub fn new(resolver: Arc<dyn RouteResolver>, ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            resolver,
            entries: DashMap::new(),
            ttl,
            negative_ttl,
        }
    }

    /// Returns the topic's route, fetching from the name-server on a
    /// cache miss or expiry. Concurrent callers for the same topic share
    /// one upstream fetch.
    pub async fn get_message_queue(&self, topic: &str) -> Result<Arc<TopicRoute>, ProxyError> {
        loop {
            // Fast path: a resolved, unexpired entry.
            if let Some(slot) = self.entries.get(topic) {
                match &*slot {
                    Slot::Resolved(entry) if entry.expires_at > Instant::now() => {
                        return match &entry.outcome {
                            CachedOutcome::Found(route) => Ok(route.clone()),
                            CachedOutcome::NotFound => {
                                Err(ProxyErrorKind::TopicNotFound(topic.to_string()).into())
                            }
                        };
                    }
                    Slot::Pending(rx) => {
                        let mut rx = rx.clone();
                        drop(slot);
                        // Wait for the in-flight fetch installed by another
                        // caller to complete, then loop back to read it.
                        let _ = rx.changed().await;
                        continue;
                    }
                    Slot::Resolved(_) => {
                        // Expired; fall through to install a fresh fetch.
                    }
                }
            }

            // Attempt to become the single fetcher for this topic: only
            // succeeds if no pending/fresh slot exists (or the existing
            // one just expired and we atomically replace it).
            let (tx, rx) = watch::channel(false);
            let installed = match self.entries.entry(topic.to_string()) {
                dashmap::mapref::entry::Entry::Vacant(v) => {
                    v.insert(Slot::Pending(rx));
                    true
                }
                dashmap::mapref::entry::Entry::Occupied(mut o) => match o.get() {
                    Slot::Resolved(entry) if entry.expires_at <= Instant::now() => {
                        o.insert(Slot::Pending(rx));
                        true
                    }
                    _ => false,
                },
            };

            if !installed {
                // Lost the race; loop and either read the winner's result
                // or attach to their pending watch.
                continue;
            }

            let outcome = match self.resolver.resolve(topic).await {
                Ok(route) => CachedOutcome::Found(Arc::new(route)),
                Err(e) if matches!(e.kind, ProxyErrorKind::TopicNotFound(_)) => CachedOutcome::NotFound,
                Err(e) => {
                    // Fetch failed for a reason other than a confirmed
                    // absence: remove the pending slot so a later caller
                    // retries instead of getting stuck behind it.
                    self.entries.remove(topic);
                    let _ = tx.send(true);
                    return Err(e);
                }
            };

            let ttl = match outcome {
                CachedOutcome::Found(_) => self.ttl,
                CachedOutcome::NotFound => self.negative_ttl,
            };
            let result = match &outcome {
                CachedOutcome::Found(route) => Ok(route.clone()),
                CachedOutcome::NotFound => Err(ProxyErrorKind::TopicNotFound(topic.to_string()).into()),
            };
            self.entries.insert(
                topic.to_string(),
                Slot::Resolved(CacheEntry {
                    outcome,
                    expires_at: Instant::now() + ttl,
                }),
            );
            let _ = tx.send(true);
            return result;
        }
    }

    /// Explicit invalidation, used after a route-affecting broker error
    /// (e.g. a send that fails because the topic was deleted).
    pub fn invalidate(&self, topic: &str) {
        self.entries.remove(topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BrokerData, Perm, QueueData};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingResolver {
        calls: AtomicU32,
        not_found: bool,
    }

    #[async_trait::async_trait]
    impl RouteResolver for CountingResolver {
        async fn resolve(&self, topic: &str) -> Result<TopicRoute, ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.not_found {
                return Err(ProxyErrorKind::TopicNotFound(topic.to_string()).into());
            }
            Ok(TopicRoute {
                queue_datas: vec![QueueData {
                    broker_name: "b1".into(),
                    read_queue_nums: 4,
                    write_queue_nums: 4,
                    perm: Perm::READ_WRITE,
                }],
                broker_datas: vec![BrokerData {
                    cluster: "DefaultCluster".into(),
                    broker_name: "b1".into(),
                    broker_addrs: HashMap::from([(0, "10.0.0.1:10911".into())]),
                }],
            })
        }
    }

    #[tokio::test]
    async fn concurrent_lookups_share_one_fetch() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicU32::new(0),
            not_found: false,
        });
        let cache = Arc::new(TopicRouteCache::new(
            resolver.clone(),
            Duration::from_secs(30),
            Duration::from_secs(5),
        ));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get_message_queue("orders").await.unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn not_found_is_cached_negatively() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicU32::new(0),
            not_found: true,
        });
        let cache = TopicRouteCache::new(resolver.clone(), Duration::from_secs(30), Duration::from_secs(5));

        assert!(cache.get_message_queue("missing").await.is_err());
        assert!(cache.get_message_queue("missing").await.is_err());
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let resolver = Arc::new(CountingResolver {
            calls: AtomicU32::new(0),
            not_found: false,
        });
        let cache = TopicRouteCache::new(resolver.clone(), Duration::from_secs(30), Duration::from_secs(5));

        cache.get_message_queue("orders").await.unwrap();
        cache.invalidate("orders");
        cache.get_message_queue("orders").await.unwrap();

        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }
}
