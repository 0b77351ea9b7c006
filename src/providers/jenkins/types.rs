use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Detail payload of a single Jenkins build.
///
/// Decoding is tolerant: a field that is missing or has an unexpected shape
/// is left unset instead of failing the whole payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildDetail {
    #[serde(default, deserialize_with = "lenient::option")]
    pub building: Option<bool>,

    #[serde(default, deserialize_with = "lenient::option")]
    pub result: Option<String>,

    /// Start time, milliseconds since the epoch
    #[serde(default, rename = "timestamp", deserialize_with = "lenient::millis")]
    pub timestamp_ms: Option<i64>,

    #[serde(default, rename = "duration", deserialize_with = "lenient::millis")]
    pub duration_ms: Option<i64>,

    #[serde(default, deserialize_with = "lenient::seq")]
    pub actions: Vec<Action>,
}

impl BuildDetail {
    pub fn is_building(&self) -> bool {
        self.building == Some(true)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.timestamp_ms.and_then(DateTime::from_timestamp_millis)
    }

    /// Start plus duration; a missing duration counts as zero.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        let start = self.start_time()?;
        Some(start + chrono::Duration::milliseconds(self.duration_ms.unwrap_or(0).max(0)))
    }
}

/// One entry of a build's heterogeneous `actions` list.
///
/// Only the fields the sentinel reads are modelled; everything else is ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Action {
    #[serde(default, rename = "_class", deserialize_with = "lenient::option")]
    pub class: Option<String>,

    #[serde(default, rename = "waitingTimeMillis", deserialize_with = "lenient::option")]
    pub waiting_time_millis: Option<f64>,

    #[serde(default, rename = "buildableTimeMillis", deserialize_with = "lenient::option")]
    pub buildable_time_millis: Option<f64>,

    #[serde(default, rename = "blockedTimeMillis", deserialize_with = "lenient::option")]
    pub blocked_time_millis: Option<f64>,

    #[serde(default, rename = "executingTimeMillis", deserialize_with = "lenient::option")]
    pub executing_time_millis: Option<f64>,

    #[serde(default, deserialize_with = "lenient::seq")]
    pub causes: Vec<Cause>,
}

/// An entry of a cause action's `causes` list.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Cause {
    #[serde(default, rename = "userName", deserialize_with = "lenient::option")]
    pub user_name: Option<String>,

    #[serde(default, rename = "userId", deserialize_with = "lenient::option")]
    pub user_id: Option<String>,
}

mod lenient {
    use serde::de::DeserializeOwned;
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(serde_json::from_value(value).ok())
    }

    /// Integer milliseconds; floats are truncated.
    pub fn millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        #[allow(clippy::cast_possible_truncation)]
        Ok(value
            .as_i64()
            .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)))
    }

    /// Keeps the elements that decode and drops the rest.
    pub fn seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(match value {
            Value::Array(items) => items
                .into_iter()
                .filter_map(|item| serde_json::from_value(item).ok())
                .collect(),
            _ => Vec::new(),
        })
    }
}
