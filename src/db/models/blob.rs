use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedBlob {
    pub key: String,
    pub data: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}
