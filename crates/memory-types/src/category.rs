//! Validated category tags.
//!
//! Categories are a closed set. Free-form strings are rejected at the
//! ingestion boundary so unknown tags never flow through dedup scoping,
//! storage keys, or sharing policy evaluation.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::MemoryError;

/// Category of a stored memory.
///
/// Dedup scoping and `CategoryShared` visibility are both keyed on this
/// value, so it must parse to a known variant before a write is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Declarative knowledge ("the sky is blue")
    Facts,
    /// User or agent preferences
    Preferences,
    /// How-to knowledge and workflows
    Procedures,
    /// Conversation summaries and transcripts
    Conversations,
    /// Recorded decisions and their rationale
    Decisions,
}

impl Category {
    /// All known categories, in canonical order.
    pub const ALL: [Category; 5] = [
        Category::Facts,
        Category::Preferences,
        Category::Procedures,
        Category::Conversations,
        Category::Decisions,
    ];

    /// Canonical lowercase name, used in storage keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Facts => "facts",
            Category::Preferences => "preferences",
            Category::Procedures => "procedures",
            Category::Conversations => "conversations",
            Category::Decisions => "decisions",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "facts" => Ok(Category::Facts),
            "preferences" => Ok(Category::Preferences),
            "procedures" => Ok(Category::Procedures),
            "conversations" => Ok(Category::Conversations),
            "decisions" => Ok(Category::Decisions),
            other => Err(MemoryError::UnknownCategory(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_categories() {
        for category in Category::ALL {
            let parsed: Category = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        let parsed: Category = "  Facts ".parse().unwrap();
        assert_eq!(parsed, Category::Facts);
    }

    #[test]
    fn test_parse_rejects_unknown() {
        let result = "gossip".parse::<Category>();
        assert!(matches!(result, Err(MemoryError::UnknownCategory(_))));
    }

    #[test]
    fn test_serde_snake_case() {
        let json = serde_json::to_string(&Category::Conversations).unwrap();
        assert_eq!(json, "\"conversations\"");
        let back: Category = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Category::Conversations);
    }
}
