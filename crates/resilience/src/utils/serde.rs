//! Serde helpers for configuration types

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};

/// Serialize a [`Duration`] as whole milliseconds
///
/// # Usage
/// ```rust
/// use std::time::Duration;
///
/// use serde::{Deserialize, Serialize};
/// use steadfast_resilience::utils::duration_millis;
///
/// #[derive(Serialize, Deserialize)]
/// struct Example {
///     #[serde(with = "duration_millis")]
///     timeout: Duration,
/// }
/// ```
pub mod duration_millis {
    use super::*;

    type SerializeResult<S> = Result<<S as Serializer>::Ok, <S as Serializer>::Error>;

    /// Serialize as a `u64` millisecond count, saturating at `u64::MAX`
    pub fn serialize<S>(duration: &Duration, serializer: S) -> SerializeResult<S>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
    }

    /// Deserialize a `u64` millisecond count
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::*;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Timeouts {
        #[serde(with = "duration_millis")]
        reset_timeout: Duration,
    }

    /// Durations serialize to their millisecond count.
    #[test]
    fn test_duration_millis_serialize() {
        let data = Timeouts { reset_timeout: Duration::from_millis(1500) };
        let json = serde_json::to_string(&data).expect("Should serialize valid struct");
        assert_eq!(json, r#"{"reset_timeout":1500}"#);
    }

    #[test]
    fn test_duration_millis_deserialize_toml() {
        let data: Timeouts = toml::from_str("reset_timeout = 60000").expect("Should parse TOML");
        assert_eq!(data.reset_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_duration_millis_saturates_huge_durations() {
        let data = Timeouts { reset_timeout: Duration::MAX };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains(&u64::MAX.to_string()));
    }

    #[test]
    fn test_duration_millis_rejects_negative() {
        let result: Result<Timeouts, _> = serde_json::from_str(r#"{"reset_timeout":-5}"#);
        assert!(result.is_err());
    }
}
