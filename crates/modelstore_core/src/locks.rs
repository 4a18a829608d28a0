//! Striped locks for per-feature critical sections.

use crate::id::Id;
use parking_lot::{Mutex, MutexGuard};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A fixed set of mutexes indexed by `(owner, feature-name)`.
///
/// Two features may share a stripe; that only costs parallelism.
#[derive(Debug)]
pub(crate) struct FeatureLocks {
    stripes: Vec<Mutex<()>>,
}

/// Guards held for a two-feature operation.
pub(crate) struct PairGuard<'a> {
    _first: MutexGuard<'a, ()>,
    _second: Option<MutexGuard<'a, ()>>,
}

impl FeatureLocks {
    pub(crate) fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    fn stripe(&self, owner: &Id, name: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        owner.hash(&mut hasher);
        name.hash(&mut hasher);
        // Truncation is fine for picking a stripe
        #[allow(clippy::cast_possible_truncation)]
        let hash = hasher.finish() as usize;
        hash % self.stripes.len()
    }

    /// Locks the stripe of one feature.
    pub(crate) fn lock(&self, owner: &Id, name: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe(owner, name)].lock()
    }

    /// Locks the stripes of two features in index order.
    pub(crate) fn lock_pair(
        &self,
        first: (&Id, &str),
        second: (&Id, &str),
    ) -> PairGuard<'_> {
        let a = self.stripe(first.0, first.1);
        let b = self.stripe(second.0, second.1);
        if a == b {
            return PairGuard {
                _first: self.stripes[a].lock(),
                _second: None,
            };
        }
        let (low, high) = if a < b { (a, b) } else { (b, a) };
        let low_guard = self.stripes[low].lock();
        let high_guard = self.stripes[high].lock();
        PairGuard {
            _first: low_guard,
            _second: Some(high_guard),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_stripe_pair_does_not_deadlock() {
        let locks = FeatureLocks::new(1);
        let a = Id::generate();
        let b = Id::generate();
        let _guard = locks.lock_pair((&a, "x"), (&b, "y"));
    }

    #[test]
    fn zero_stripes_uses_one() {
        let locks = FeatureLocks::new(0);
        let id = Id::generate();
        drop(locks.lock(&id, "f"));
        drop(locks.lock(&id, "f"));
    }

    #[test]
    fn same_feature_same_stripe() {
        let locks = FeatureLocks::new(16);
        let id = Id::generate();
        assert_eq!(locks.stripe(&id, "f"), locks.stripe(&id, "f"));
    }
}
