//! CBOR record encoding.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes any serializable record to CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::EncodingFailed`] if serialization fails.
pub fn to_cbor<T: Serialize + ?Sized>(value: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(value, &mut out)
        .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    Ok(out)
}

/// Decodes a record from CBOR bytes.
///
/// # Errors
///
/// Returns [`CodecError::DecodingFailed`] if the bytes are not a valid
/// encoding of `T`.
pub fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Value;
    use proptest::prelude::*;

    #[test]
    fn cbor_values() {
        let values = vec![
            Value::Bool(false),
            Value::Integer(i64::MIN),
            Value::Float(1.5),
            Value::from("text"),
            Value::Bytes(vec![0, 255]),
        ];
        let bytes = to_cbor(&values).unwrap();
        let decoded: Vec<Value> = from_cbor(&bytes).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn cbor_rejects_garbage() {
        let result: CodecResult<Vec<Value>> = from_cbor(&[0xff, 0x00, 0x13]);
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }

    #[test]
    fn cbor_rejects_wrong_shape() {
        let bytes = to_cbor(&42u32).unwrap();
        let result: CodecResult<String> = from_cbor(&bytes);
        assert!(result.is_err());
    }

    proptest! {
        #[test]
        fn cbor_text_values(s in ".*") {
            let bytes = to_cbor(&Value::Text(s.clone())).unwrap();
            let decoded: Value = from_cbor(&bytes).unwrap();
            prop_assert_eq!(decoded, Value::Text(s));
        }
    }
}
