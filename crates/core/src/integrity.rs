//! Pre-submission file integrity checks.
//!
//! Each input file may come with an expected SHA-256 digest. A
//! [`SubmissionPolicy`] decides what happens when some files fail.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// SHA-256 hex digest of a file's contents.
pub fn sha256_file(path: &Path) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// What to do when some files fail verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionPolicy {
    /// Any failed file blocks the whole submission.
    #[default]
    RequireAllVerified,
    /// Failed files are dropped; the rest are submitted.
    SubmitVerifiedOnly,
}

impl fmt::Display for SubmissionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmissionPolicy::RequireAllVerified => f.write_str("require_all_verified"),
            SubmissionPolicy::SubmitVerifiedOnly => f.write_str("submit_verified_only"),
        }
    }
}

impl FromStr for SubmissionPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "require_all_verified" | "strict" => Ok(SubmissionPolicy::RequireAllVerified),
            "submit_verified_only" | "lenient" => Ok(SubmissionPolicy::SubmitVerifiedOnly),
            other => Err(CoreError::Validation(format!(
                "Unknown submission policy: '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Checks
// ---------------------------------------------------------------------------

/// Result of verifying one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Verified,
    /// No expected digest was supplied; the file is accepted as-is.
    Unknown,
    Mismatch { expected: String, actual: String },
    Unreadable(String),
}

impl CheckOutcome {
    pub fn is_acceptable(&self) -> bool {
        matches!(self, CheckOutcome::Verified | CheckOutcome::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCheck {
    pub name: String,
    pub outcome: CheckOutcome,
}

/// Verify `path` against an optional expected digest.
pub fn check_file(path: &Path, expected: Option<&str>) -> FileCheck {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let outcome = match sha256_file(path) {
        Err(e) => CheckOutcome::Unreadable(e.to_string()),
        Ok(actual) => match expected {
            None => CheckOutcome::Unknown,
            Some(exp) if exp.eq_ignore_ascii_case(&actual) => CheckOutcome::Verified,
            Some(exp) => CheckOutcome::Mismatch {
                expected: exp.to_ascii_lowercase(),
                actual,
            },
        },
    };

    FileCheck { name, outcome }
}

/// Decide which files may be submitted.
///
/// Returns the accepted file names in input order, or a
/// [`CoreError::Validation`] naming the files that blocked submission.
pub fn plan_submission(
    checks: &[FileCheck],
    policy: SubmissionPolicy,
) -> Result<Vec<String>, CoreError> {
    let failed: Vec<&str> = checks
        .iter()
        .filter(|c| !c.outcome.is_acceptable())
        .map(|c| c.name.as_str())
        .collect();

    let accepted: Vec<String> = checks
        .iter()
        .filter(|c| c.outcome.is_acceptable())
        .map(|c| c.name.clone())
        .collect();

    match policy {
        SubmissionPolicy::RequireAllVerified if !failed.is_empty() => Err(CoreError::Validation(
            format!("Integrity check failed for: {}", failed.join(", ")),
        )),
        _ if accepted.is_empty() => Err(CoreError::Validation(if failed.is_empty() {
            "No files to submit".to_string()
        } else {
            format!("No file passed the integrity check ({})", failed.join(", "))
        })),
        _ => Ok(accepted),
    }
}
