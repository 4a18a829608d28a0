//! A `Vec`-based model of many-valued features.
//!
//! [`VecOracle`] applies [`FeatureOp`]s to a plain vector; comparing its
//! [`Outcome`]s with those of a real mapper checks that shifting,
//! renumbering and bounds checks behave identically across backends.

use modelstore_core::{CoreError, CoreResult, DataMapper, SingleFeatureKey, Slot};

/// One operation on a many-valued feature.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureOp {
    /// Insert at a position.
    Insert {
        /// Target position.
        position: u32,
        /// Inserted element.
        slot: Slot,
    },
    /// Insert several elements at a position.
    InsertAll {
        /// Target position.
        position: u32,
        /// Inserted elements.
        slots: Vec<Slot>,
    },
    /// Append at the end.
    Append {
        /// Appended element.
        slot: Slot,
    },
    /// Replace the element at a position.
    Set {
        /// Target position.
        position: u32,
        /// New element.
        slot: Slot,
    },
    /// Remove the element at a position.
    Remove {
        /// Target position.
        position: u32,
    },
    /// Move an element within the feature.
    Move {
        /// Source position.
        from: u32,
        /// Target position.
        to: u32,
    },
    /// Remove everything.
    Clear,
    /// Read one element.
    Get {
        /// Position to read.
        position: u32,
    },
}

/// The observable result of a [`FeatureOp`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The operation succeeded; some operations return an element.
    Done(Option<Slot>),
    /// A position was out of bounds and nothing changed.
    OutOfRange,
}

/// The reference model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VecOracle {
    items: Vec<Slot>,
}

impl VecOracle {
    /// Creates an empty oracle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current elements.
    #[must_use]
    pub fn items(&self) -> &[Slot] {
        &self.items
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.items.len() as u32
    }

    /// Returns `true` if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Applies `op`.
    pub fn apply(&mut self, op: &FeatureOp) -> Outcome {
        let len = self.items.len();
        match op {
            FeatureOp::Insert { position, slot } => {
                let p = *position as usize;
                if p > len {
                    return Outcome::OutOfRange;
                }
                self.items.insert(p, slot.clone());
                Outcome::Done(None)
            }
            FeatureOp::InsertAll { position, slots } => {
                let p = *position as usize;
                if p > len {
                    return Outcome::OutOfRange;
                }
                self.items.splice(p..p, slots.iter().cloned());
                Outcome::Done(None)
            }
            FeatureOp::Append { slot } => {
                self.items.push(slot.clone());
                Outcome::Done(None)
            }
            FeatureOp::Set { position, slot } => match self.items.get_mut(*position as usize) {
                Some(item) => Outcome::Done(Some(std::mem::replace(item, slot.clone()))),
                None => Outcome::OutOfRange,
            },
            FeatureOp::Remove { position } => {
                let p = *position as usize;
                if p >= len {
                    return Outcome::OutOfRange;
                }
                Outcome::Done(Some(self.items.remove(p)))
            }
            FeatureOp::Move { from, to } => {
                let (from, to) = (*from as usize, *to as usize);
                if from >= len || to >= len {
                    return Outcome::OutOfRange;
                }
                let item = self.items.remove(from);
                self.items.insert(to, item.clone());
                Outcome::Done(Some(item))
            }
            FeatureOp::Clear => {
                self.items.clear();
                Outcome::Done(None)
            }
            FeatureOp::Get { position } => match self.items.get(*position as usize) {
                Some(item) => Outcome::Done(Some(item.clone())),
                None => Outcome::OutOfRange,
            },
        }
    }
}

/// Applies `op` to the feature `key` of `mapper`.
///
/// # Errors
///
/// Returns any error other than [`CoreError::IndexOutOfRange`], which
/// maps to [`Outcome::OutOfRange`].
pub fn apply_to_mapper(
    mapper: &dyn DataMapper,
    key: &SingleFeatureKey,
    op: &FeatureOp,
) -> CoreResult<Outcome> {
    let result = match op {
        FeatureOp::Insert { position, slot } => mapper
            .insert_at(&key.with_position(*position), slot.clone())
            .map(|()| None),
        FeatureOp::InsertAll { position, slots } => mapper
            .insert_all_at(&key.with_position(*position), slots.clone())
            .map(|()| None),
        FeatureOp::Append { slot } => mapper.append(key, slot.clone()).map(|_| None),
        FeatureOp::Set { position, slot } => mapper
            .set_at(&key.with_position(*position), slot.clone())
            .map(Some),
        FeatureOp::Remove { position } => mapper.remove_at(&key.with_position(*position)).map(Some),
        FeatureOp::Move { from, to } => mapper
            .move_slot(&key.with_position(*from), &key.with_position(*to))
            .map(Some),
        FeatureOp::Clear => mapper.clear(key).map(|()| None),
        FeatureOp::Get { position } => mapper.get_at(&key.with_position(*position)).map(Some),
    };
    match result {
        Ok(slot) => Ok(Outcome::Done(slot)),
        Err(CoreError::IndexOutOfRange { .. }) => Ok(Outcome::OutOfRange),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelstore_core::Value;

    fn int(n: i64) -> Slot {
        Slot::Value(Value::Integer(n))
    }

    #[test]
    fn oracle_shifts_like_a_vec() {
        let mut oracle = VecOracle::new();
        oracle.apply(&FeatureOp::Insert { position: 0, slot: int(1) });
        oracle.apply(&FeatureOp::Insert { position: 0, slot: int(2) });
        assert_eq!(oracle.items(), &[int(2), int(1)]);

        let moved = oracle.apply(&FeatureOp::Move { from: 0, to: 1 });
        assert_eq!(moved, Outcome::Done(Some(int(2))));
        assert_eq!(oracle.items(), &[int(1), int(2)]);
    }

    #[test]
    fn oracle_rejects_out_of_range() {
        let mut oracle = VecOracle::new();
        assert_eq!(oracle.apply(&FeatureOp::Remove { position: 0 }), Outcome::OutOfRange);
        assert_eq!(
            oracle.apply(&FeatureOp::Insert { position: 1, slot: int(1) }),
            Outcome::OutOfRange
        );
        assert!(oracle.is_empty());
    }
}
