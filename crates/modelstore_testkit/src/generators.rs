//! Property-based test generators using proptest.

use crate::oracle::FeatureOp;
use modelstore_core::{Id, Slot, Value};
use proptest::prelude::*;

/// Strategy for generating ids.
pub fn id_strategy() -> impl Strategy<Value = Id> {
    prop::array::uniform16(any::<u8>()).prop_map(Id::from_bytes)
}

/// Strategy for generating attribute values.
///
/// Floats are finite so that equality comparisons are meaningful.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9f64..1.0e9).prop_map(Value::Float),
        "[a-z]{0,12}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

/// Strategy for generating stored elements of either kind.
pub fn slot_strategy() -> impl Strategy<Value = Slot> {
    prop_oneof![
        3 => value_strategy().prop_map(Slot::Value),
        1 => id_strategy().prop_map(Slot::Reference),
    ]
}

/// Strategy for generating one feature operation.
///
/// Positions range up to `max_position`, so some operations fall out of
/// bounds on purpose.
pub fn feature_op_strategy(max_position: u32) -> impl Strategy<Value = FeatureOp> {
    let pos = move || 0..=max_position;
    prop_oneof![
        4 => (pos(), slot_strategy()).prop_map(|(position, slot)| FeatureOp::Insert { position, slot }),
        1 => (pos(), prop::collection::vec(slot_strategy(), 0..4))
            .prop_map(|(position, slots)| FeatureOp::InsertAll { position, slots }),
        2 => slot_strategy().prop_map(|slot| FeatureOp::Append { slot }),
        2 => (pos(), slot_strategy()).prop_map(|(position, slot)| FeatureOp::Set { position, slot }),
        3 => pos().prop_map(|position| FeatureOp::Remove { position }),
        3 => (pos(), pos()).prop_map(|(from, to)| FeatureOp::Move { from, to }),
        1 => Just(FeatureOp::Clear),
        3 => pos().prop_map(|position| FeatureOp::Get { position }),
    ]
}

/// Strategy for generating a sequence of feature operations.
pub fn feature_op_sequence_strategy(
    max_position: u32,
    max_ops: usize,
) -> impl Strategy<Value = Vec<FeatureOp>> {
    prop::collection::vec(feature_op_strategy(max_position), 0..max_ops)
}

/// One containment mutation among a fixed pool of entities.
///
/// Indices refer to positions in the pool; positions are clamped by the
/// test before use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainmentOp {
    /// Add `child` to the many-valued feature of `parent`.
    Add {
        /// Index of the parent.
        parent: usize,
        /// Index of the child.
        child: usize,
        /// Requested position.
        position: u32,
    },
    /// Set the single-valued feature of `parent` to `child`.
    Set {
        /// Index of the parent.
        parent: usize,
        /// Index of the child.
        child: usize,
    },
    /// Remove the element at `position` of `parent`.
    Remove {
        /// Index of the parent.
        parent: usize,
        /// Requested position.
        position: u32,
    },
    /// Unset the single-valued feature of `parent`.
    Unset {
        /// Index of the parent.
        parent: usize,
    },
}

/// Strategy for generating containment mutations over `entities` entities.
pub fn containment_op_strategy(entities: usize) -> impl Strategy<Value = ContainmentOp> {
    let index = move || 0..entities;
    prop_oneof![
        4 => (index(), index(), 0u32..4)
            .prop_map(|(parent, child, position)| ContainmentOp::Add { parent, child, position }),
        2 => (index(), index()).prop_map(|(parent, child)| ContainmentOp::Set { parent, child }),
        2 => (index(), 0u32..4).prop_map(|(parent, position)| ContainmentOp::Remove { parent, position }),
        1 => index().prop_map(|parent| ContainmentOp::Unset { parent }),
    ]
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn values_equal_themselves(value in value_strategy()) {
            prop_assert_eq!(value.clone(), value);
        }

        #[test]
        fn op_positions_are_bounded(op in feature_op_strategy(5)) {
            match op {
                FeatureOp::Insert { position, .. }
                | FeatureOp::InsertAll { position, .. }
                | FeatureOp::Set { position, .. }
                | FeatureOp::Remove { position }
                | FeatureOp::Get { position } => prop_assert!(position <= 5),
                FeatureOp::Move { from, to } => prop_assert!(from <= 5 && to <= 5),
                FeatureOp::Append { .. } | FeatureOp::Clear => {}
            }
        }

        #[test]
        fn containment_indices_are_bounded(op in containment_op_strategy(3)) {
            let (ContainmentOp::Add { parent, .. }
            | ContainmentOp::Set { parent, .. }
            | ContainmentOp::Remove { parent, .. }
            | ContainmentOp::Unset { parent }) = op;
            prop_assert!(parent < 3);
        }
    }
}
