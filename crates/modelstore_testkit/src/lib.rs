//! # ModelStore Testkit
//!
//! Test utilities for ModelStore.
//!
//! This crate provides:
//! - Fixtures opening every mapper flavour (key-value over memory or a
//!   log file with each encoding, property graph, cached)
//! - A sample metamodel with inheritance and containment
//! - Property-based generators using proptest
//! - A `Vec`-based oracle for many-valued feature operations
//! - Concurrent stress helpers
//!
//! ## Usage
//!
//! ```rust
//! use modelstore_core::{DataMapper, Id, SingleFeatureKey, Slot};
//! use modelstore_testkit::prelude::*;
//!
//! for_each_mapper(|flavor, mapper| {
//!     let key = SingleFeatureKey::new(Id::generate(), "items");
//!     mapper.append(&key, Slot::Value(1.into())).unwrap();
//!     assert_eq!(mapper.size_of(&key).unwrap(), 1, "{flavor}");
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod oracle;
pub mod stress;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::oracle::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use oracle::*;
pub use stress::*;
