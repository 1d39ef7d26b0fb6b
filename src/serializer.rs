//! # Safe Serializer
//!
//! Bounded, failure-tolerant conversion of arbitrary values into size-capped
//! strings for records and previews. Nothing here returns an error: a value
//! that cannot be serialized becomes a placeholder string.

use crate::constants::system::TRUNCATION_MARKER;
use serde::Serialize;
use serde_json::Value;
use std::fmt::Debug;
use std::io;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafeSerializer {
    max_length: usize,
}

impl SafeSerializer {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// JSON rendering of `value`, truncated to the configured length
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> String {
        match serde_json::to_string(value) {
            Ok(json) => self.truncate(&json),
            Err(e) => self.truncate(&format!("<unserializable: {e}>")),
        }
    }

    /// Like [`serialize`](Self::serialize) but renders bare strings without quotes
    pub fn preview(&self, value: &Value) -> String {
        match value {
            Value::String(s) => self.truncate(s),
            Value::Null => String::new(),
            other => self.serialize(other),
        }
    }

    /// `Debug` rendering for values that are not `Serialize`
    pub fn debug<T: Debug + ?Sized>(&self, value: &T) -> String {
        self.truncate(&format!("{value:?}"))
    }

    /// Cap `text` at `max_length` bytes on a char boundary, appending a marker
    pub fn truncate(&self, text: &str) -> String {
        truncate_to(text, self.max_length)
    }

    /// Serialized byte size of `value`, or 0 if it cannot be serialized.
    /// Counts bytes without buffering the serialized output.
    pub fn estimate_size<T: Serialize + ?Sized>(value: &T) -> usize {
        let mut counter = ByteCounter(0);
        match serde_json::to_writer(&mut counter, value) {
            Ok(()) => counter.0,
            Err(_) => 0,
        }
    }
}

impl Default for SafeSerializer {
    fn default() -> Self {
        Self::new(crate::constants::system::DEFAULT_MAX_SERIALIZED_LENGTH)
    }
}

pub(crate) fn truncate_to(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }
    let budget = max_length.saturating_sub(TRUNCATION_MARKER.len());
    let mut cut = budget;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &text[..cut], TRUNCATION_MARKER)
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::ser::Error as _;
    use serde_json::json;

    struct Unserializable;

    impl Serialize for Unserializable {
        fn serialize<S: serde::Serializer>(&self, _s: S) -> Result<S::Ok, S::Error> {
            Err(S::Error::custom("socket handles cannot be serialized"))
        }
    }

    #[test]
    fn test_short_values_pass_through() {
        let serializer = SafeSerializer::new(100);
        assert_eq!(serializer.serialize(&json!({"a": 1})), r#"{"a":1}"#);
    }

    #[test]
    fn test_long_values_are_truncated() {
        let serializer = SafeSerializer::new(40);
        let long = "x".repeat(500);
        let out = serializer.serialize(&json!({ "text": long }));
        assert!(out.len() <= 40);
        assert!(out.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let out = truncate_to(&"é".repeat(40), 21);
        assert!(out.ends_with(TRUNCATION_MARKER));
        assert!(out.len() <= 21);
    }

    #[test]
    fn test_unserializable_values_degrade() {
        let serializer = SafeSerializer::default();
        let out = serializer.serialize(&Unserializable);
        assert!(out.starts_with("<unserializable:"));
        assert_eq!(SafeSerializer::estimate_size(&Unserializable), 0);
    }

    #[test]
    fn test_estimate_size_matches_serialized_length() {
        let value = json!({"messages": ["hello", "world"], "count": 2});
        let expected = serde_json::to_vec(&value).unwrap().len();
        assert_eq!(SafeSerializer::estimate_size(&value), expected);
    }

    #[test]
    fn test_preview_unquotes_strings() {
        let serializer = SafeSerializer::new(100);
        assert_eq!(serializer.preview(&json!("review the design")), "review the design");
        assert_eq!(serializer.preview(&Value::Null), "");
    }
}
