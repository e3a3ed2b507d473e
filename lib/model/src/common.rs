use serde::{Deserialize, Serialize};

/// Milliseconds since epoch. Always supplied by the caller rather than
/// read from the system clock inside decision functions, so runner logic
/// stays deterministic under test.
pub type Timestamp = i64;

/// Optimistic-concurrency handle carried on every persisted document.
/// A write is only accepted by the store if both fields still match what
/// is currently stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeqNoPrimaryTerm {
  pub seq_no: u64,
  pub primary_term: u64,
}

impl SeqNoPrimaryTerm {
  pub const fn new(seq_no: u64, primary_term: u64) -> Self {
    Self { seq_no, primary_term }
  }

  /// The handle a freshly-created (never-persisted) document carries.
  pub const fn unset() -> Self {
    Self::new(0, 0)
  }
}

/// Free-form operator-facing info attached to a job's metadata, mirroring
/// the `info.message` field from the source system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobInfo {
  pub message: String,
}

impl JobInfo {
  pub fn new(message: impl Into<String>) -> Self {
    Self { message: message.into() }
  }
}
