use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn to_json<T: Serialize>(value: &T, key: &str) -> Result<String> {
    serde_json::to_string(value).with_context(|| format!("failed to encode value for {key}"))
}

pub fn from_json<T: DeserializeOwned>(raw: &str, key: &str) -> Result<T> {
    serde_json::from_str(raw).with_context(|| format!("failed to decode value stored at {key}"))
}
