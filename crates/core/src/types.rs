/// Opaque server-assigned task identifier.
pub type TaskId = String;

/// Identifier of a shared downloadable resource (a model repository).
pub type RepoId = String;

/// Per-tab identity token sent as the `X-Client-ID` header.
pub type ClientId = String;

/// All wall-clock timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
