//! # ModelStore Codec
//!
//! Value and record encoding for ModelStore.
//!
//! This crate provides:
//! - [`Value`], the scalar attribute type stored by every backend
//! - CBOR record encoding through `serde` ([`to_cbor`], [`from_cbor`])
//! - Order-preserving composite keys ([`KeyBuilder`], [`KeyReader`])
//!
//! ## Usage
//!
//! ```
//! use modelstore_codec::{from_cbor, to_cbor, Value};
//!
//! let value = Value::Integer(42);
//! let bytes = to_cbor(&value).unwrap();
//! let decoded: Value = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod error;
mod key;
mod value;

pub use cbor::{from_cbor, to_cbor};
pub use error::{CodecError, CodecResult};
pub use key::{KeyBuilder, KeyReader};
pub use value::Value;
