//! Custom serde helpers for backend wire formats.

/// Deserializes an epoch timestamp that may arrive as an integer or a float
/// JSON number (`1700000000000` or `1700000000000.0`) into `i64`.
pub mod epoch_number {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Number {
        Int(i64),
        Float(f64),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Number::deserialize(deserializer)? {
            Number::Int(i) => Ok(i),
            Number::Float(f) if f.is_finite() => Ok(f as i64),
            Number::Float(f) => Err(serde::de::Error::custom(format!(
                "Invalid timestamp: {}",
                f
            ))),
        }
    }

    /// Same as the parent module, for optional fields. `null` and
    /// non-finite floats map to `None`.
    pub mod option {
        use super::Number;
        use serde::{Deserialize, Deserializer};

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Ok(match Option::<Number>::deserialize(deserializer)? {
                Some(Number::Int(i)) => Some(i),
                Some(Number::Float(f)) if f.is_finite() => Some(f as i64),
                _ => None,
            })
        }
    }
}
