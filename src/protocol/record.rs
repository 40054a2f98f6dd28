//! Application record format boundary.
//!
//! The transport does not know the wire format of records. It hands the text
//! payload of each inbound frame to a [`RecordFormat`] and emits whatever comes
//! back. [`JsonRecordFormat`] is provided as the default.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{Error, Result};

// ============================================================================
// RecordFormat
// ============================================================================

/// Parses frame payloads into records and serializes records into payloads.
///
/// Implementations must be pure: the same text always parses to the same
/// record, and a malformed payload must fail instead of producing a partial
/// record.
pub trait RecordFormat: Send + Sync + 'static {
    /// The parsed application record.
    type Record: Send + 'static;

    /// Parses one frame payload.
    ///
    /// # Errors
    ///
    /// Returns a parse error ([`Error::is_parse_error`]) on malformed input.
    fn parse(&self, text: &str) -> Result<Self::Record>;

    /// Serializes one record into a frame payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be represented.
    fn serialize(&self, record: &Self::Record) -> Result<String>;
}

// ============================================================================
// JsonRecordFormat
// ============================================================================

/// Untyped JSON records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonRecordFormat;

impl RecordFormat for JsonRecordFormat {
    type Record = Value;

    fn parse(&self, text: &str) -> Result<Value> {
        Ok(serde_json::from_str(text)?)
    }

    fn serialize(&self, record: &Value) -> Result<String> {
        Ok(serde_json::to_string(record)?)
    }
}

// ============================================================================
// TypedJsonFormat
// ============================================================================

/// JSON records decoded straight into `T`.
pub struct TypedJsonFormat<T> {
    _record: PhantomData<fn() -> T>,
}

impl<T> TypedJsonFormat<T> {
    /// Creates the format.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<T> Default for TypedJsonFormat<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for TypedJsonFormat<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for TypedJsonFormat<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedJsonFormat")
            .field("record", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> RecordFormat for TypedJsonFormat<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Record = T;

    fn parse(&self, text: &str) -> Result<T> {
        serde_json::from_str(text).map_err(|e| Error::record(e.to_string()))
    }

    fn serialize(&self, record: &T) -> Result<String> {
        Ok(serde_json::to_string(record)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Call {
        method: String,
        args: Vec<i64>,
    }

    #[test]
    fn test_json_parse() {
        let record = JsonRecordFormat.parse(r#"{"call":[1,"auth"]}"#).unwrap();
        assert_eq!(record, json!({ "call": [1, "auth"] }));
    }

    #[test]
    fn test_json_parse_rejects_malformed() {
        let err = JsonRecordFormat.parse("{call:").unwrap_err();
        assert!(err.is_parse_error());

        let err = JsonRecordFormat.parse("").unwrap_err();
        assert!(err.is_parse_error());
    }

    #[test]
    fn test_json_serialize_is_compact() {
        let text = JsonRecordFormat.serialize(&json!({ "a": [1, 2] })).unwrap();
        assert_eq!(text, r#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_typed_parse() {
        let format = TypedJsonFormat::<Call>::new();
        let call = format.parse(r#"{"method":"sum","args":[1,2]}"#).unwrap();
        assert_eq!(
            call,
            Call {
                method: "sum".into(),
                args: vec![1, 2],
            }
        );
    }

    #[test]
    fn test_typed_parse_wrong_shape_is_record_error() {
        let format = TypedJsonFormat::<Call>::new();
        let err = format.parse(r#"{"method":3}"#).unwrap_err();
        assert!(matches!(err, Error::Record { .. }));
    }
}
