use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use ballot_common::crypto::Hash;

#[derive(Debug, Default)]
struct SeenInner {
    entries: HashMap<Hash, Instant>,
    order: VecDeque<(Hash, Instant)>,
}

/// Bounded, time-evicted set of recently seen gossip message ids.
#[derive(Debug)]
pub struct SeenCache {
    inner: Mutex<SeenInner>,
    capacity: usize,
    ttl: Duration,
}

impl SeenCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(SeenInner::default()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// Marks `id` as seen. Returns `true` the first time an id is observed
    /// within the TTL window, `false` for repeats.
    pub fn check_and_mark(&self, id: Hash) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        Self::prune_locked(&mut inner, now, self.ttl);

        if inner.entries.contains_key(&id) {
            return false;
        }

        while inner.entries.len() >= self.capacity {
            match inner.order.pop_front() {
                Some((oldest, _)) => {
                    inner.entries.remove(&oldest);
                }
                None => break,
            }
        }

        inner.entries.insert(id, now);
        inner.order.push_back((id, now));
        true
    }

    pub fn contains(&self, id: &Hash) -> bool {
        let mut inner = self.inner.lock();
        Self::prune_locked(&mut inner, Instant::now(), self.ttl);
        inner.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune_locked(inner: &mut SeenInner, now: Instant, ttl: Duration) {
        while let Some(&(id, at)) = inner.order.front() {
            if now.duration_since(at) < ttl {
                break;
            }
            inner.order.pop_front();
            inner.entries.remove(&id);
        }
    }
}
