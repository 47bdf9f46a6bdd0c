/// Server-assigned backup operation identifiers are opaque strings.
pub type JobId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
