//! Conversion between property file contents and values.

use crate::types::Value;

/// Encodes values for writing and decodes file text for reading.
///
/// Files carry no type information, so a round trip through a codec may
/// change a value's kind: with [`TextCodec`] the string `"42"` reads back as
/// `Int(42)` and `"2.5"` as `Double(2.5)`. Numbers keep their kind.
pub trait ValueCodec: Send + Sync + 'static {
    /// Bytes to write for `value`.
    fn encode(&self, value: &Value) -> Vec<u8>;

    /// Value for the text read from a property file. `Unset` means the text
    /// could not be interpreted.
    fn decode(&self, text: &str) -> Value;

    /// Value to publish when the source became unreadable while `previous`
    /// was cached.
    fn default_for(&self, previous: &Value) -> Value;
}

/// Plain-text codec: integers, then finite floats, then strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextCodec;

impl ValueCodec for TextCodec {
    fn encode(&self, value: &Value) -> Vec<u8> {
        match value {
            Value::Double(v) => {
                let mut text = v.to_string();
                // Whole numbers would read back as integers
                if v.is_finite() && !text.contains(|c: char| c == '.' || c == 'e') {
                    text.push_str(".0");
                }
                text.into_bytes()
            }
            other => other.to_string().into_bytes(),
        }
    }

    fn decode(&self, text: &str) -> Value {
        let text = text.trim_end_matches(&['\n', '\r', '\0'][..]);
        if text.is_empty() {
            return Value::Unset;
        }

        let trimmed = text.trim();
        if let Ok(v) = trimmed.parse::<i64>() {
            return Value::Int(v);
        }
        // "inf" and "nan" parse as floats but are names here
        if trimmed.bytes().any(|b| b.is_ascii_digit()) {
            if let Ok(v) = trimmed.parse::<f64>() {
                if v.is_finite() {
                    return Value::Double(v);
                }
            }
        }
        Value::String(text.to_string())
    }

    fn default_for(&self, previous: &Value) -> Value {
        match previous {
            Value::Unset => Value::Unset,
            Value::Int(_) => Value::Int(0),
            Value::Double(_) => Value::Double(0.0),
            Value::String(_) => Value::String(String::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_kinds() {
        let codec = TextCodec;
        assert_eq!(codec.decode("42\n"), Value::Int(42));
        assert_eq!(codec.decode("-7"), Value::Int(-7));
        assert_eq!(codec.decode("3.5"), Value::Double(3.5));
        assert_eq!(codec.decode("charging\0"), Value::String("charging".into()));
        assert_eq!(codec.decode("inf"), Value::String("inf".into()));
        assert_eq!(codec.decode("\n"), Value::Unset);
        assert_eq!(codec.decode(""), Value::Unset);
    }

    #[test]
    fn test_default_keeps_kind() {
        let codec = TextCodec;
        assert_eq!(codec.default_for(&Value::Int(80)), Value::Int(0));
        assert_eq!(codec.default_for(&Value::Double(1.5)), Value::Double(0.0));
        assert_eq!(
            codec.default_for(&Value::String("full".into())),
            Value::String(String::new())
        );
        assert_eq!(codec.default_for(&Value::Unset), Value::Unset);
    }

    #[test]
    fn test_encode_is_plain_text() {
        let codec = TextCodec;
        assert_eq!(codec.encode(&Value::Int(12)), b"12".to_vec());
        assert_eq!(codec.encode(&Value::from("abc")), b"abc".to_vec());
        assert!(codec.encode(&Value::Unset).is_empty());
    }

    #[test]
    fn test_doubles_keep_their_kind() {
        let codec = TextCodec;
        assert_eq!(codec.encode(&Value::Double(2.0)), b"2.0".to_vec());
        assert_eq!(codec.encode(&Value::Double(-0.5)), b"-0.5".to_vec());

        for v in [2.0, -0.0, 0.1, 1e21, -123456789.0] {
            let text = String::from_utf8(codec.encode(&Value::Double(v))).unwrap();
            assert_eq!(codec.decode(&text), Value::Double(v), "{}", text);
        }
    }

    #[test]
    fn test_numeric_strings_read_back_as_numbers() {
        let codec = TextCodec;
        let text = String::from_utf8(codec.encode(&Value::from("42"))).unwrap();
        assert_eq!(codec.decode(&text), Value::Int(42));
    }
}
