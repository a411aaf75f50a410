//! Identifiers for learnpath entities.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use ulid::Ulid;

/// Error returned when an identifier fails validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    /// Learner id is empty, too long or uses characters outside the allowed set
    #[error("invalid learner id '{0}': expected 1-128 chars of [A-Za-z0-9_.@-]")]
    InvalidLearner(String),

    /// Phase id is not a non-negative integer
    #[error("invalid phase id '{0}'")]
    InvalidPhase(String),
}

fn learner_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9_.@-]{1,128}$").expect("learner id pattern is valid")
    })
}

/// Opaque learner identifier.
///
/// The id doubles as a storage key and path segment, so it is validated once
/// at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LearnerId(String);

impl LearnerId {
    /// Validate and wrap a learner id.
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        // ".." would escape a file-backed store's root
        if raw == "." || raw == ".." || !learner_pattern().is_match(&raw) {
            return Err(IdError::InvalidLearner(raw));
        }
        Ok(Self(raw))
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for LearnerId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<LearnerId> for String {
    fn from(id: LearnerId) -> Self {
        id.0
    }
}

impl std::fmt::Display for LearnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for LearnerId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Ordinal of a phase within a learner's curriculum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhaseId(pub u32);

impl std::fmt::Display for PhaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for PhaseId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(PhaseId)
            .map_err(|_| IdError::InvalidPhase(s.to_string()))
    }
}

/// Unique identifier for an adaptation history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdaptationId(Ulid);

impl AdaptationId {
    /// Generate a new AdaptationId
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for AdaptationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AdaptationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for AdaptationId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_learner_id_accepts_common_forms() {
        assert!(LearnerId::parse("user-42").is_ok());
        assert!(LearnerId::parse("jane.doe@example.com").is_ok());
        assert!(LearnerId::parse("A_b").is_ok());
    }

    #[test]
    fn test_learner_id_rejects_path_like_values() {
        assert!(LearnerId::parse("").is_err());
        assert!(LearnerId::parse("..").is_err());
        assert!(LearnerId::parse("a/b").is_err());
        assert!(LearnerId::parse("with space").is_err());
        assert!(LearnerId::parse("x".repeat(129)).is_err());
    }

    #[test]
    fn test_learner_id_serde_validates() {
        let ok: LearnerId = serde_json::from_str("\"learner-1\"").unwrap();
        assert_eq!(ok.as_str(), "learner-1");
        assert!(serde_json::from_str::<LearnerId>("\"../etc\"").is_err());
    }

    #[test]
    fn test_phase_id_parse() {
        assert_eq!("3".parse::<PhaseId>().unwrap(), PhaseId(3));
        assert!("-1".parse::<PhaseId>().is_err());
    }
}
