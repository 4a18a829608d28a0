//! Concurrent stress helpers.
//!
//! These drive one mapper from several threads and check that per-feature
//! shifts were linearized. No element may be lost or duplicated, and a
//! concurrent reader never sees a half-applied shift.

use modelstore_core::{DataMapper, Id, SingleFeatureKey, Slot, Value};
use std::collections::BTreeSet;
use std::thread;
use std::time::{Duration, Instant};

/// Configuration for stress runs.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of concurrent threads.
    pub threads: usize,
    /// Operations per thread.
    pub ops_per_thread: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            ops_per_thread: 200,
        }
    }
}

/// Result of a stress run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
}

impl StressTestResult {
    /// Returns the throughput.
    #[must_use]
    pub fn ops_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.total_ops as f64 / secs
        } else {
            0.0
        }
    }
}

fn tagged(thread: usize, op: usize) -> Slot {
    Slot::Value(Value::Integer((thread * 1_000_000 + op) as i64))
}

/// Inserts at the front of one shared feature from every thread.
///
/// Every thread inserts at position 0, so each insert shifts everything
/// written so far.
pub fn stress_shared_front_inserts(
    mapper: &dyn DataMapper,
    key: &SingleFeatureKey,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let failed: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| {
                scope.spawn(move || {
                    (0..config.ops_per_thread)
                        .filter(|&i| mapper.insert_at(&key.with_position(0), tagged(t, i)).is_err())
                        .count()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(config.ops_per_thread))
            .sum()
    });
    StressTestResult {
        total_ops: config.threads * config.ops_per_thread,
        failed_ops: failed,
        duration: start.elapsed(),
    }
}

/// Appends to a private feature per thread, all on one owner.
pub fn stress_disjoint_appends(
    mapper: &dyn DataMapper,
    owner: Id,
    config: &StressConfig,
) -> StressTestResult {
    let start = Instant::now();
    let failed: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| {
                scope.spawn(move || {
                    let key = SingleFeatureKey::new(owner, format!("feature{t}"));
                    (0..config.ops_per_thread)
                        .filter(|&i| mapper.append(&key, tagged(t, i)).is_err())
                        .count()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(config.ops_per_thread))
            .sum()
    });
    StressTestResult {
        total_ops: config.threads * config.ops_per_thread,
        failed_ops: failed,
        duration: start.elapsed(),
    }
}

/// Elements [`stress_readers_against_writers`] keeps at the tail of the
/// shared feature.
pub const READER_BASELINE: usize = 3;

fn baseline() -> Vec<Slot> {
    (0..READER_BASELINE)
        .map(|i| Slot::Value(Value::from(format!("base{i}"))))
        .collect()
}

/// Whether a read of the shared feature saw a state some writer produced.
fn read_is_consistent(mapper: &dyn DataMapper, key: &SingleFeatureKey) -> bool {
    let Ok(size) = mapper.size_of(key) else {
        return false;
    };
    if (size as usize) < READER_BASELINE || mapper.get_at(&key.with_position(0)).is_err() {
        return false;
    }
    let Ok(all) = mapper.all_of(key) else {
        return false;
    };
    all.len() >= READER_BASELINE && all.ends_with(&baseline())
}

/// Runs readers against writers on one shared feature.
///
/// The feature is seeded with [`READER_BASELINE`] elements. Half of the
/// threads (at least one) repeatedly insert at the front and remove
/// their insert again, the others read sizes, positions and whole
/// feature contents. A read fails when it errors or sees a state no
/// writer produced. On return the feature holds only the seed again.
pub fn stress_readers_against_writers(
    mapper: &dyn DataMapper,
    key: &SingleFeatureKey,
    config: &StressConfig,
) -> StressTestResult {
    let threads = config.threads.max(2);
    let writers = threads / 2;
    let start = Instant::now();
    if mapper.append_all(key, baseline()).is_err() {
        return StressTestResult {
            total_ops: 0,
            failed_ops: 1,
            duration: start.elapsed(),
        };
    }
    let failed: usize = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads)
            .map(|t| {
                scope.spawn(move || {
                    (0..config.ops_per_thread)
                        .filter(|&i| {
                            if t < writers {
                                let front = key.with_position(0);
                                mapper.insert_at(&front, tagged(t, i)).is_err()
                                    || mapper.remove_at(&front).is_err()
                            } else {
                                !read_is_consistent(mapper, key)
                            }
                        })
                        .count()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(config.ops_per_thread))
            .sum()
    });
    let settled = mapper.all_of(key).is_ok_and(|all| all == baseline());
    StressTestResult {
        total_ops: threads * config.ops_per_thread,
        failed_ops: failed + usize::from(!settled),
        duration: start.elapsed(),
    }
}

/// Checks that `key` holds exactly the elements written by
/// [`stress_shared_front_inserts`], each once, at contiguous positions.
pub fn verify_shared_front_inserts(
    mapper: &dyn DataMapper,
    key: &SingleFeatureKey,
    config: &StressConfig,
) -> Result<(), String> {
    let expected = config.threads * config.ops_per_thread;
    let size = mapper.size_of(key).map_err(|e| e.to_string())? as usize;
    if size != expected {
        return Err(format!("size {size}, expected {expected}"));
    }
    let mut seen = BTreeSet::new();
    for p in 0..size {
        let slot = mapper
            .get_at(&key.with_position(p as u32))
            .map_err(|e| format!("position {p}: {e}"))?;
        let Slot::Value(Value::Integer(n)) = slot else {
            return Err(format!("position {p}: unexpected element"));
        };
        if !seen.insert(n) {
            return Err(format!("element {n} appears twice"));
        }
    }
    // Each thread's own writes appear newest first
    let all = mapper.all_of(key).map_err(|e| e.to_string())?;
    for t in 0..config.threads {
        let mine: Vec<i64> = all
            .iter()
            .filter_map(|s| match s {
                Slot::Value(Value::Integer(n)) if *n as usize / 1_000_000 == t => Some(*n),
                _ => None,
            })
            .collect();
        if mine.windows(2).any(|w| w[0] < w[1]) {
            return Err(format!("thread {t} writes are out of order"));
        }
    }
    Ok(())
}
